//! Which fields of an instance were explicitly provided.
//!
//! Validation marks every field the input carried; defaults leave their bit
//! clear. Dumps with `exclude_unset` rely on this, and so does re-validating
//! one instance into another model (only provided fields count as set).

/// A compact bitset over field indices `0..len`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldsSet {
    len: usize,
    bits: Box<[u64]>,
}

impl FieldsSet {
    /// All fields unset.
    #[must_use]
    pub fn empty(len: usize) -> Self {
        Self {
            len,
            bits: vec![0u64; len.div_ceil(64)].into_boxed_slice(),
        }
    }

    /// All fields set.
    #[must_use]
    pub fn all(len: usize) -> Self {
        let mut s = Self::empty(len);
        (0..len).for_each(|idx| s.set(idx));
        s
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mark `idx` as set. Out-of-range indices are ignored.
    pub fn set(&mut self, idx: usize) {
        if idx >= self.len {
            return;
        }
        if let Some(w) = self.bits.get_mut(idx / 64) {
            *w |= 1u64 << (idx % 64);
        }
    }

    #[must_use]
    pub fn is_set(&self, idx: usize) -> bool {
        idx < self.len
            && self
                .bits
                .get(idx / 64)
                .is_some_and(|w| (w & (1u64 << (idx % 64))) != 0)
    }

    /// Indices of all set fields, ascending.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|idx| self.is_set(*idx))
    }

    /// Number of set fields.
    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}
