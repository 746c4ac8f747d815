
/// Upper bound on alleles per bubble and on haplotype realizations per
/// cluster; explain bitsets are this wide.
pub const MAX_NUMBER_OF_HAPLOTYPES: usize = 64;

/// A fixed-width bitset over allele (or haplotype) indices.
/// Bit `j` set means "index j is consistent with the evidence so far".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AlleleSet(u64);

impl AlleleSet {
    /// The empty set
    pub fn none() -> Self {
        Self(0)
    }

    /// The set containing indices `0..count`
    pub fn all_below(count: usize) -> Self {
        assert!(count <= MAX_NUMBER_OF_HAPLOTYPES);
        if count == MAX_NUMBER_OF_HAPLOTYPES {
            Self(u64::MAX)
        } else {
            Self((1_u64 << count) - 1)
        }
    }

    /// The singleton set {index}
    pub fn single(index: u16) -> Self {
        assert!((index as usize) < MAX_NUMBER_OF_HAPLOTYPES);
        Self(1_u64 << index)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, index: u16) -> bool {
        (index as usize) < MAX_NUMBER_OF_HAPLOTYPES && (self.0 >> index) & 1 == 1
    }

    pub fn insert(&mut self, index: u16) {
        assert!((index as usize) < MAX_NUMBER_OF_HAPLOTYPES);
        self.0 |= 1_u64 << index;
    }

    pub fn remove(&mut self, index: u16) {
        if (index as usize) < MAX_NUMBER_OF_HAPLOTYPES {
            self.0 &= !(1_u64 << index);
        }
    }

    pub fn union(&self, other: AlleleSet) -> AlleleSet {
        Self(self.0 | other.0)
    }

    pub fn intersection(&self, other: AlleleSet) -> AlleleSet {
        Self(self.0 & other.0)
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// When exactly one index is set, returns it
    pub fn unique_index(&self) -> Option<u16> {
        if self.0.count_ones() == 1 {
            Some(self.0.trailing_zeros() as u16)
        } else {
            None
        }
    }

    /// Iterates over the set indices in increasing order
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..MAX_NUMBER_OF_HAPLOTYPES as u16).filter(move |&i| self.contains(i))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_set_operations() {
        let mut set = AlleleSet::none();
        assert!(set.is_empty());
        set.insert(0);
        set.insert(3);
        assert!(set.contains(0));
        assert!(set.contains(3));
        assert!(!set.contains(1));
        assert_eq!(set.count(), 2);
        assert_eq!(set.unique_index(), None);

        set.remove(0);
        assert_eq!(set.unique_index(), Some(3));
    }

    #[test]
    fn test_all_below() {
        let set = AlleleSet::all_below(3);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        let full = AlleleSet::all_below(MAX_NUMBER_OF_HAPLOTYPES);
        assert_eq!(full.count(), 64);
    }

    #[test]
    fn test_union_intersection() {
        let a = AlleleSet::single(1).union(AlleleSet::single(2));
        let b = AlleleSet::single(2).union(AlleleSet::single(3));
        assert_eq!(a.intersection(b), AlleleSet::single(2));
        assert_eq!(a.union(b).count(), 3);
        assert!(a.intersection(AlleleSet::single(0)).is_empty());
    }
}
