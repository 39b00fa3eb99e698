//! Fixed-width bit vectors over an atom index space.
//!
//! Every bitset built from one [`AtomicPredicates`][crate::atoms::AtomicPredicates]
//! run has the same width (the number of atoms), so binary operations can
//! work word by word without any resizing. Mixing widths is a logic error and
//! panics.

use std::fmt;

/// A fixed-width bit set backed by a vector of u64 words.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AtomSet {
    /// Storage: each u64 holds 64 bits; bits at or beyond `width` are zero.
    words: Vec<u64>,
    width: usize,
}

impl AtomSet {
    /// Number of bits per word.
    const BITS_PER_WORD: usize = 64;

    fn num_words(width: usize) -> usize {
        width.div_ceil(Self::BITS_PER_WORD)
    }

    /// Creates a set of `width` bits, all clear.
    pub fn empty(width: usize) -> Self {
        Self {
            words: vec![0; Self::num_words(width)],
            width,
        }
    }

    /// Creates a set of `width` bits, all set.
    pub fn full(width: usize) -> Self {
        let mut set = Self {
            words: vec![u64::MAX; Self::num_words(width)],
            width,
        };
        set.clear_tail();
        set
    }

    /// Creates a set of `width` bits with the given indices set.
    pub fn from_indices(width: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut set = Self::empty(width);
        for index in indices {
            set.insert(index);
        }
        set
    }

    fn clear_tail(&mut self) {
        let rem = self.width % Self::BITS_PER_WORD;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    #[inline]
    fn word_and_bit(index: usize) -> (usize, usize) {
        (index / Self::BITS_PER_WORD, index % Self::BITS_PER_WORD)
    }

    fn check_width(&self, other: &AtomSet) {
        assert_eq!(
            self.width, other.width,
            "Atom sets of different widths cannot be combined"
        );
    }

    /// Width of the set, in bits.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if no bits are set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Returns true if every bit is set.
    pub fn is_full(&self) -> bool {
        self.count() == self.width
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        if index >= self.width {
            return false;
        }
        let (word, bit) = Self::word_and_bit(index);
        self.words[word] & (1u64 << bit) != 0
    }

    /// Sets the bit at the given index. Returns true if it was previously clear.
    ///
    /// # Panics
    ///
    /// Panics if `index >= width`.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(
            index < self.width,
            "Atom index {} out of range for width {}",
            index,
            self.width
        );
        let (word, bit) = Self::word_and_bit(index);
        let mask = 1u64 << bit;
        let was_clear = self.words[word] & mask == 0;
        self.words[word] |= mask;
        was_clear
    }

    /// Intersection, as a new set.
    pub fn and(&self, other: &AtomSet) -> AtomSet {
        let mut res = self.clone();
        res.and_assign(other);
        res
    }

    pub fn and_assign(&mut self, other: &AtomSet) {
        self.check_width(other);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= *b;
        }
    }

    pub fn or_assign(&mut self, other: &AtomSet) {
        self.check_width(other);
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
    }

    /// Bits of `self` that are not in `other`.
    pub fn difference(&self, other: &AtomSet) -> AtomSet {
        self.check_width(other);
        let words = self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| a & !b)
            .collect();
        AtomSet {
            words,
            width: self.width,
        }
    }

    pub fn is_subset(&self, other: &AtomSet) -> bool {
        self.check_width(other);
        self.words
            .iter()
            .zip(&other.words)
            .all(|(a, b)| a & !b == 0)
    }

    pub fn intersects(&self, other: &AtomSet) -> bool {
        self.check_width(other);
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Returns an iterator over all set bit indices, in increasing order.
    pub fn iter(&self) -> AtomSetIter<'_> {
        AtomSetIter {
            set: self,
            word_idx: 0,
            current_word: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl fmt::Debug for AtomSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomSet<{}>", self.width)?;
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over set bits in an [`AtomSet`].
pub struct AtomSetIter<'a> {
    set: &'a AtomSet,
    word_idx: usize,
    current_word: u64,
}

impl Iterator for AtomSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let bit_idx = self.current_word.trailing_zeros() as usize;
                self.current_word &= self.current_word - 1; // Clear lowest set bit
                return Some(self.word_idx * AtomSet::BITS_PER_WORD + bit_idx);
            }

            self.word_idx += 1;
            if self.word_idx >= self.set.words.len() {
                return None;
            }
            self.current_word = self.set.words[self.word_idx];
        }
    }
}
