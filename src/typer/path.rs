
use crate::data_types::allele_set::AlleleSet;
use crate::graph::variation_graph::WalkExtension;
use crate::index::kmer::KmerLabel;

/// A contiguous walk through the graph explaining a slice of the read.
/// Absolute positions are inclusive on both sides and may be special
/// positions when an end lands inside an insertion. `nums[i]` holds the
/// alleles of bubble `var_orders[i]` that are consistent with this walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    pub start: u32,
    pub end: u32,
    pub read_start_index: u32,
    pub read_end_index: u32,
    pub var_orders: Vec<u32>,
    pub nums: Vec<AlleleSet>,
    pub mismatches: u16,
}

impl Path {
    /// A single-kmer path straight from an index label
    pub fn from_label(label: &KmerLabel, read_start_index: u32, read_end_index: u32, mismatches: u16) -> Self {
        let (var_orders, nums) = if label.has_variant() {
            (vec![label.variant_order], vec![AlleleSet::single(label.variant_num)])
        } else {
            (vec![], vec![])
        };
        Self {
            start: label.start_index,
            end: label.end_index,
            read_start_index,
            read_end_index,
            var_orders,
            nums,
            mismatches,
        }
    }

    /// Read bases covered by this path
    pub fn size(&self) -> u32 {
        self.read_end_index - self.read_start_index + 1
    }

    /// The allele bitset recorded for a bubble, if this path crosses it
    pub fn nums_of(&self, order: u32) -> Option<AlleleSet> {
        self.var_orders.iter()
            .position(|&o| o == order)
            .map(|i| self.nums[i])
    }

    /// True when the walk is consistent with the reference allele at every
    /// bubble it crosses (trivially true off-bubble)
    pub fn is_reference(&self) -> bool {
        self.nums.iter().all(|n| n.contains(0))
    }

    /// Records one bubble constraint, intersecting with an existing entry
    /// for the same bubble. Returns false when the intersection empties,
    /// meaning the combination is not walkable.
    #[must_use]
    pub fn add_variant(&mut self, order: u32, alleles: AlleleSet) -> bool {
        match self.var_orders.iter().position(|&o| o == order) {
            Some(i) => {
                let merged = self.nums[i].intersection(alleles);
                if merged.is_empty() {
                    return false;
                }
                self.nums[i] = merged;
                true
            }
            None => {
                let insert_at = self.var_orders.partition_point(|&o| o < order);
                self.var_orders.insert(insert_at, order);
                self.nums.insert(insert_at, alleles);
                true
            }
        }
    }

    /// Chains a successor kmer label whose window shares this path's last
    /// read base and graph position.
    pub fn try_append_label(&self, label: &KmerLabel, read_end_index: u32, mismatches: u16) -> Option<Path> {
        if label.start_index != self.end {
            return None;
        }
        let mut merged = self.clone();
        merged.end = label.end_index;
        merged.read_end_index = read_end_index;
        merged.mismatches += mismatches;
        if label.has_variant()
            && !merged.add_variant(label.variant_order, AlleleSet::single(label.variant_num))
        {
            return None;
        }
        Some(merged)
    }

    /// Chains a predecessor kmer label, the leftward mirror of
    /// [`try_append_label`](Self::try_append_label)
    pub fn try_prepend_label(&self, label: &KmerLabel, read_start_index: u32, mismatches: u16) -> Option<Path> {
        if label.end_index != self.start {
            return None;
        }
        let mut merged = self.clone();
        merged.start = label.start_index;
        merged.read_start_index = read_start_index;
        merged.mismatches += mismatches;
        if label.has_variant()
            && !merged.add_variant(label.variant_order, AlleleSet::single(label.variant_num))
        {
            return None;
        }
        Some(merged)
    }

    /// Applies a rightward walk extension. Returns None when a bubble
    /// constraint from the walk contradicts this path.
    pub fn extended_right(&self, ext: &WalkExtension) -> Option<Path> {
        let mut merged = self.clone();
        merged.end = ext.end_pos;
        merged.read_end_index += ext.matched;
        merged.mismatches += ext.mismatches;
        for &(order, num) in &ext.vars {
            if !merged.add_variant(order, AlleleSet::single(num)) {
                return None;
            }
        }
        Some(merged)
    }

    /// Applies a leftward walk extension
    pub fn extended_left(&self, ext: &WalkExtension) -> Option<Path> {
        let mut merged = self.clone();
        merged.start = ext.end_pos;
        merged.read_start_index -= ext.matched;
        merged.mismatches += ext.mismatches;
        for &(order, num) in &ext.vars {
            if !merged.add_variant(order, AlleleSet::single(num)) {
                return None;
            }
        }
        Some(merged)
    }

    /// True when two paths describe the same walk boundaries; such paths
    /// merge by OR-ing their allele bitsets.
    pub fn same_span(&self, other: &Path) -> bool {
        self.start == other.start
            && self.end == other.end
            && self.read_start_index == other.read_start_index
            && self.read_end_index == other.read_end_index
    }

    /// Merges an equal-span path into this one. The walk with fewer
    /// mismatches explains the read better, so its allele constraints win
    /// outright; only equally good walks union their bitsets.
    pub fn absorb(&mut self, other: &Path) {
        debug_assert!(self.same_span(other));
        if other.mismatches < self.mismatches {
            *self = other.clone();
            return;
        }
        if other.mismatches > self.mismatches {
            return;
        }
        for (i, &order) in other.var_orders.iter().enumerate() {
            match self.var_orders.iter().position(|&o| o == order) {
                Some(j) => self.nums[j] = self.nums[j].union(other.nums[i]),
                None => {
                    let insert_at = self.var_orders.partition_point(|&o| o < order);
                    self.var_orders.insert(insert_at, order);
                    self.nums.insert(insert_at, other.nums[i]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label() {
        let label = KmerLabel::new(11, 42, 37, 1);
        let path = Path::from_label(&label, 0, 31, 0);
        assert_eq!(path.size(), 32);
        assert_eq!(path.nums_of(37), Some(AlleleSet::single(1)));
        assert!(!path.is_reference());

        let plain = Path::from_label(&KmerLabel::reference(1, 32), 0, 31, 0);
        assert!(plain.is_reference());
        assert_eq!(plain.nums_of(37), None);
    }

    #[test]
    fn test_append_label_chains_on_shared_base() {
        let path = Path::from_label(&KmerLabel::reference(1, 32), 0, 31, 0);
        let next = KmerLabel::new(32, 63, 37, 0);
        let merged = path.try_append_label(&next, 62, 0).unwrap();
        assert_eq!(merged.start, 1);
        assert_eq!(merged.end, 63);
        assert_eq!(merged.read_end_index, 62);
        assert_eq!(merged.nums_of(37), Some(AlleleSet::single(0)));

        // disconnected labels do not chain
        let far = KmerLabel::reference(40, 71);
        assert!(path.try_append_label(&far, 62, 0).is_none());
    }

    #[test]
    fn test_conflicting_alleles_reject_chain() {
        let label = KmerLabel::new(11, 42, 37, 1);
        let path = Path::from_label(&label, 0, 31, 0);
        // a successor claiming a different allele of the same bubble
        let conflicting = KmerLabel::new(42, 73, 37, 0);
        assert!(path.try_append_label(&conflicting, 62, 0).is_none());
    }

    #[test]
    fn test_absorb_prefers_fewer_mismatches() {
        // the cleaner walk wins outright
        let mut a = Path::from_label(&KmerLabel::new(11, 42, 37, 0), 0, 31, 1);
        let b = Path::from_label(&KmerLabel::new(11, 42, 37, 1), 0, 31, 0);
        assert!(a.same_span(&b));
        a.absorb(&b);
        let nums = a.nums_of(37).unwrap();
        assert!(nums.contains(1) && !nums.contains(0));
        assert_eq!(a.mismatches, 0);
    }

    #[test]
    fn test_absorb_unions_equal_walks() {
        // two alleles explaining the read equally well stay ambiguous
        let mut a = Path::from_label(&KmerLabel::new(11, 42, 37, 0), 0, 31, 0);
        let b = Path::from_label(&KmerLabel::new(11, 42, 37, 1), 0, 31, 0);
        a.absorb(&b);
        let nums = a.nums_of(37).unwrap();
        assert!(nums.contains(0) && nums.contains(1));
    }

    #[test]
    fn test_extend_right_with_walk() {
        let path = Path::from_label(&KmerLabel::reference(1, 32), 0, 31, 0);
        let ext = WalkExtension { matched: 10, end_pos: 42, mismatches: 1, vars: vec![(37, 1)] };
        let merged = path.extended_right(&ext).unwrap();
        assert_eq!(merged.end, 42);
        assert_eq!(merged.read_end_index, 41);
        assert_eq!(merged.mismatches, 1);
        assert_eq!(merged.nums_of(37), Some(AlleleSet::single(1)));
    }
}
