//! Fixed-size bitset over document ordinals
//!
//! Used for segment deletions, query evaluation and the transaction
//! visibility filter. Bits beyond `len` are always zero.

/// Fixed-size set of `u32` ordinals backed by 64-bit words.
#[derive(Clone, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// All bits clear.
    pub fn new(len: usize) -> Self {
        BitSet {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// All bits set.
    pub fn full(len: usize) -> Self {
        let mut set = BitSet {
            words: vec![u64::MAX; len.div_ceil(64)],
            len,
        };
        set.mask_tail();
        set
    }

    /// Build from ordinals; ordinals `>= len` are ignored.
    pub fn from_ordinals(len: usize, ordinals: impl IntoIterator<Item = u32>) -> Self {
        let mut set = BitSet::new(len);
        for ord in ordinals {
            set.insert(ord);
        }
        set
    }

    fn mask_tail(&mut self) {
        let rem = self.len % 64;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    /// Capacity in bits.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the capacity is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `ord` is set; out-of-range ordinals are never set.
    #[inline]
    pub fn contains(&self, ord: u32) -> bool {
        let i = ord as usize;
        i < self.len && self.words[i / 64] & (1u64 << (i % 64)) != 0
    }

    /// Set `ord`; returns true if it was previously clear.
    #[inline]
    pub fn insert(&mut self, ord: u32) -> bool {
        let i = ord as usize;
        if i >= self.len {
            return false;
        }
        let mask = 1u64 << (i % 64);
        let was_clear = self.words[i / 64] & mask == 0;
        self.words[i / 64] |= mask;
        was_clear
    }

    /// Clear `ord`; returns true if it was previously set.
    #[inline]
    pub fn remove(&mut self, ord: u32) -> bool {
        let i = ord as usize;
        if i >= self.len {
            return false;
        }
        let mask = 1u64 << (i % 64);
        let was_set = self.words[i / 64] & mask != 0;
        self.words[i / 64] &= !mask;
        was_set
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Intersect in place; bits beyond `other.len()` are cleared.
    pub fn intersect_with(&mut self, other: &BitSet) {
        for (i, w) in self.words.iter_mut().enumerate() {
            *w &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// Union in place; bits of `other` beyond `self.len()` are dropped.
    pub fn union_with(&mut self, other: &BitSet) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
        }
        self.mask_tail();
    }

    /// Remove every bit set in `other`.
    pub fn difference_with(&mut self, other: &BitSet) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w &= !*o;
        }
    }

    /// Set ordinals in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros();
                w &= w - 1;
                Some((wi * 64) as u32 + bit)
            })
        })
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitSet")
            .field("len", &self.len)
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_masks_tail() {
        let set = BitSet::full(70);
        assert_eq!(set.count(), 70);
        assert!(set.contains(69));
        assert!(!set.contains(70));
    }

    #[test]
    fn test_insert_remove() {
        let mut set = BitSet::new(10);
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.contains(3));
        assert!(set.remove(3));
        assert!(!set.remove(3));
        assert!(!set.insert(10));
    }

    #[test]
    fn test_iter_ascending() {
        let set = BitSet::from_ordinals(200, [150, 3, 64, 0]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 3, 64, 150]);
    }

    #[test]
    fn test_set_operations() {
        let mut a = BitSet::from_ordinals(100, [1, 2, 3, 99]);
        let b = BitSet::from_ordinals(100, [2, 3, 4]);
        let mut u = a.clone();
        u.union_with(&b);
        assert_eq!(u.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 99]);

        let mut d = a.clone();
        d.difference_with(&b);
        assert_eq!(d.iter().collect::<Vec<_>>(), vec![1, 99]);

        a.intersect_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_intersect_with_shorter_set_clears_tail() {
        let mut a = BitSet::full(130);
        let b = BitSet::full(10);
        a.intersect_with(&b);
        assert_eq!(a.count(), 10);
    }
}
