//! Packed bit-field encoding of knob settings. A [`FieldSet`] describes
//! the layout of every knob within an [`Instance`], an ordered sequence
//! of packed machine words. Instances compare and hash on their raw
//! words, so all writes are normalized.

use std::fmt;

/// Storage word of a packed instance.
pub type PackedWord = u64;

/// Value of a discrete or term field.
pub type DiscValue = u16;

const WORD_BITS: u32 = PackedWord::BITS;

/// A single ternary digit of a continuous field. `Stop` terminates the
/// digit sequence; it never appears inside a decoded value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Trit {
  /// End of the digit sequence.
  Stop,
  /// Refine the value downwards.
  Left,
  /// Refine the value upwards.
  Right,
}

impl Trit {
  fn code(self) -> u64 {
    match self {
      Trit::Stop => 0,
      Trit::Left => 1,
      Trit::Right => 2,
    }
  }

  fn from_code(code: u64) -> Trit {
    match code {
      0 => Trit::Stop,
      1 => Trit::Left,
      2 => Trit::Right,
      _ => panic!("reserved continuous digit code {code}"),
    }
  }
}

/// Layout descriptor of one knob within an instance.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Field {
  /// Discrete field with cardinality `card >= 2`; consumes
  /// `ceil(log2(card))` bits.
  Disc {
    /// Number of distinct settings.
    card: DiscValue,
  },
  /// Continuous field of `depth >= 1` ternary digits, two bits each.
  Contin {
    /// Maximum number of refinement digits.
    depth: u16,
  },
  /// Index into an external term table; packed like a discrete field.
  Term {
    /// Length of the term table.
    card: DiscValue,
  },
}

impl Field {
  /// Number of bits the field consumes.
  pub fn width(&self) -> u32 {
    match *self {
      Field::Disc { card } | Field::Term { card } => {
        DiscValue::BITS - (card - 1).leading_zeros()
      }
      Field::Contin { depth } => 2 * u32::from(depth),
    }
  }
}

/// A packed knob assignment. Equality and hashing operate on the raw
/// words.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Instance {
  words: Vec<PackedWord>,
}

impl Instance {
  /// Raw packed words.
  pub fn words(&self) -> &[PackedWord] {
    &self.words
  }

  fn get_bits(&self, offset: u32, width: u32) -> u64 {
    debug_assert!(0 < width && width <= 32, "field width out of range");
    let word = (offset / WORD_BITS) as usize;
    let shift = offset % WORD_BITS;
    let mask = (1u64 << width) - 1;
    let mut bits = self.words[word] >> shift;
    if shift + width > WORD_BITS {
      bits |= self.words[word + 1] << (WORD_BITS - shift);
    }
    bits & mask
  }

  fn set_bits(&mut self, offset: u32, width: u32, value: u64) {
    let word = (offset / WORD_BITS) as usize;
    let shift = offset % WORD_BITS;
    let mask = (1u64 << width) - 1;
    debug_assert!(value <= mask, "value wider than field");
    self.words[word] &= !(mask << shift);
    self.words[word] |= value << shift;
    if shift + width > WORD_BITS {
      let spill = shift + width - WORD_BITS;
      let spill_mask = (1u64 << spill) - 1;
      self.words[word + 1] &= !spill_mask;
      self.words[word + 1] |= value >> (WORD_BITS - shift);
    }
  }
}

impl fmt::Debug for Instance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Instance[")?;
    for (i, w) in self.words.iter().enumerate() {
      if i > 0 {
        write!(f, " ")?;
      }
      write!(f, "{w:016x}")?;
    }
    write!(f, "]")
  }
}

/// Ordered list of fields with precomputed bit offsets; the schema of
/// every instance of one deme.
#[derive(Clone, Debug)]
pub struct FieldSet {
  fields: Vec<Field>,
  offsets: Vec<u32>,
  n_bits: u32,
}

impl FieldSet {
  /// Lays out `fields` in order.
  ///
  /// # Panics
  ///
  /// Panics if a discrete or term field has cardinality below 2 or a
  /// continuous field has zero depth.
  pub fn new(fields: Vec<Field>) -> Self {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut n_bits = 0;
    for field in &fields {
      match *field {
        Field::Disc { card } | Field::Term { card } => {
          assert!(card >= 2, "discrete field with cardinality {card}")
        }
        Field::Contin { depth } => {
          assert!(depth >= 1, "continuous field with zero depth")
        }
      }
      offsets.push(n_bits);
      n_bits += field.width();
    }
    FieldSet {
      fields,
      offsets,
      n_bits,
    }
  }

  /// Number of fields.
  pub fn len(&self) -> usize {
    self.fields.len()
  }

  /// True when no knobs were laid out.
  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  /// Field descriptors in layout order.
  pub fn fields(&self) -> &[Field] {
    &self.fields
  }

  /// Total number of bits an instance of this layout occupies.
  pub fn n_bits(&self) -> u32 {
    self.n_bits
  }

  /// An instance with every knob at its zero setting.
  pub fn zero_instance(&self) -> Instance {
    let words = self.n_bits.div_ceil(WORD_BITS) as usize;
    Instance {
      words: vec![0; words],
    }
  }

  /// Reads a discrete or term field.
  pub fn disc_get(&self, field: usize, instance: &Instance) -> DiscValue {
    let f = &self.fields[field];
    match f {
      Field::Disc { .. } | Field::Term { .. } => {
        instance.get_bits(self.offsets[field], f.width()) as DiscValue
      }
      Field::Contin { .. } => panic!("field {field} is not discrete"),
    }
  }

  /// Writes a discrete or term field.
  ///
  /// # Panics
  ///
  /// Panics if `value` is outside the field's cardinality.
  pub fn disc_set(
    &self,
    field: usize,
    value: DiscValue,
    instance: &mut Instance,
  ) {
    let f = &self.fields[field];
    match *f {
      Field::Disc { card } | Field::Term { card } => {
        assert!(value < card, "value {value} out of domain 0..{card}");
        instance.set_bits(self.offsets[field], f.width(), u64::from(value));
      }
      Field::Contin { .. } => panic!("field {field} is not discrete"),
    }
  }

  /// Reads the digits of a continuous field up to the first stop code.
  /// Digits beyond the stop are ignored.
  pub fn contin_get(&self, field: usize, instance: &Instance) -> Vec<Trit> {
    let Field::Contin { depth } = self.fields[field] else {
      panic!("field {field} is not continuous");
    };
    let offset = self.offsets[field];
    let mut digits = Vec::new();
    for d in 0..u32::from(depth) {
      match Trit::from_code(instance.get_bits(offset + 2 * d, 2)) {
        Trit::Stop => break,
        trit => digits.push(trit),
      }
    }
    digits
  }

  /// Writes the digits of a continuous field and clears everything
  /// after the implied stop, so raw-word equality keeps tracking
  /// semantic equality.
  ///
  /// # Panics
  ///
  /// Panics if `digits` is longer than the field's depth or contains a
  /// stop code.
  pub fn contin_set(
    &self,
    field: usize,
    digits: &[Trit],
    instance: &mut Instance,
  ) {
    let Field::Contin { depth } = self.fields[field] else {
      panic!("field {field} is not continuous");
    };
    assert!(
      digits.len() <= usize::from(depth),
      "{} digits exceed depth {depth}",
      digits.len()
    );
    assert!(
      !digits.contains(&Trit::Stop),
      "stop is implied, not written explicitly"
    );
    let offset = self.offsets[field];
    for d in 0..usize::from(depth) {
      let code = digits.get(d).map_or(0, |t| t.code());
      instance.set_bits(offset + 2 * d as u32, 2, code);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_field_widths() {
    assert_eq!(Field::Disc { card: 2 }.width(), 1);
    assert_eq!(Field::Disc { card: 3 }.width(), 2);
    assert_eq!(Field::Disc { card: 4 }.width(), 2);
    assert_eq!(Field::Term { card: 9 }.width(), 4);
    assert_eq!(Field::Contin { depth: 5 }.width(), 10);
  }

  #[test]
  fn test_disc_roundtrip() {
    let fs = FieldSet::new(vec![
      Field::Disc { card: 3 },
      Field::Disc { card: 7 },
      Field::Term { card: 5 },
    ]);
    let mut inst = fs.zero_instance();
    for (field, value) in [(0, 2), (1, 6), (2, 4)] {
      fs.disc_set(field, value, &mut inst);
      assert_eq!(fs.disc_get(field, &inst), value);
    }
    // neighbours untouched
    assert_eq!(fs.disc_get(0, &inst), 2);
    assert_eq!(fs.disc_get(1, &inst), 6);
  }

  #[test]
  fn test_word_straddling_fields() {
    // 21 three-bit fields put field 21 across the 64-bit boundary
    let fields = vec![Field::Disc { card: 8 }; 24];
    let fs = FieldSet::new(fields);
    assert_eq!(fs.n_bits(), 72);
    let mut inst = fs.zero_instance();
    assert_eq!(inst.words().len(), 2);
    for field in 0..24 {
      fs.disc_set(field, (field % 8) as DiscValue, &mut inst);
    }
    for field in 0..24 {
      assert_eq!(fs.disc_get(field, &inst), (field % 8) as DiscValue);
    }
  }

  #[test]
  fn test_contin_roundtrip() {
    let fs = FieldSet::new(vec![Field::Contin { depth: 4 }]);
    let mut inst = fs.zero_instance();
    let digits = [Trit::Left, Trit::Right, Trit::Right];
    fs.contin_set(0, &digits, &mut inst);
    assert_eq!(fs.contin_get(0, &inst), digits);
  }

  #[test]
  fn test_contin_write_normalizes() {
    let fs = FieldSet::new(vec![Field::Contin { depth: 4 }]);
    let mut dirty = fs.zero_instance();
    fs.contin_set(0, &[Trit::Left, Trit::Right, Trit::Left], &mut dirty);
    fs.contin_set(0, &[Trit::Left], &mut dirty);
    let mut fresh = fs.zero_instance();
    fs.contin_set(0, &[Trit::Left], &mut fresh);
    // word equality tracks semantic equality
    assert_eq!(dirty, fresh);
  }

  #[test]
  fn test_zero_instance() {
    let fs = FieldSet::new(vec![]);
    assert!(fs.is_empty());
    assert_eq!(fs.zero_instance().words().len(), 0);

    let fs = FieldSet::new(vec![Field::Disc { card: 2 }]);
    let inst = fs.zero_instance();
    assert_eq!(fs.disc_get(0, &inst), 0);
  }

  #[test]
  #[should_panic(expected = "out of domain")]
  fn test_disc_set_out_of_domain() {
    let fs = FieldSet::new(vec![Field::Disc { card: 3 }]);
    let mut inst = fs.zero_instance();
    fs.disc_set(0, 3, &mut inst);
  }
}
