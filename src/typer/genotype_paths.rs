
use rustc_hash::FxHashMap;

use crate::data_types::allele_set::AlleleSet;
use crate::graph::variation_graph::Graph;
use crate::index::kmer::KmerLabel;
use crate::typer::path::Path;

/// Sentinel stored while a read has no properly paired mate
pub const INSERT_SIZE_WHEN_NOT_PROPER_PAIR: i32 = 0x7FFF_FFFF;

/// Per-read details kept only when statistics are collected
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct GenotypePathsDetails {
    pub query_name: String,
    pub read_group: String,
    pub score_diff: u32,
}

/// Per-read alignment state: the read bytes, the surviving paths through
/// the graph, and the flags the genotyper consumes.
#[derive(Clone, Debug)]
pub struct GenotypePaths {
    pub(crate) read: Vec<u8>,
    pub(crate) qual: Vec<u8>,
    pub(crate) mapq: u8,
    pub paths: Vec<Path>,
    pub(crate) longest_path_length: u32,
    pub(crate) original_pos: u32,
    pub(crate) ml_insert_size: i32,
    pub(crate) is_first_in_pair: bool,
    pub(crate) forward_strand: bool,
    pub(crate) is_originally_unaligned: bool,
    pub(crate) is_originally_clipped: bool,
    pub(crate) details: Option<Box<GenotypePathsDetails>>,
}

impl GenotypePaths {
    pub fn new(read: Vec<u8>, qual: Vec<u8>, mapq: u8) -> Self {
        Self {
            read,
            qual,
            mapq,
            paths: vec![],
            longest_path_length: 0,
            original_pos: 0,
            ml_insert_size: INSERT_SIZE_WHEN_NOT_PROPER_PAIR,
            is_first_in_pair: true,
            forward_strand: true,
            is_originally_unaligned: false,
            is_originally_clipped: false,
            details: None,
        }
    }

    pub fn read(&self) -> &[u8] {
        &self.read
    }

    pub fn qual(&self) -> &[u8] {
        &self.qual
    }

    pub fn mapq(&self) -> u8 {
        self.mapq
    }

    pub fn longest_path_length(&self) -> u32 {
        self.longest_path_length
    }

    pub fn original_pos(&self) -> u32 {
        self.original_pos
    }

    pub fn ml_insert_size(&self) -> i32 {
        self.ml_insert_size
    }

    pub fn is_first_in_pair(&self) -> bool {
        self.is_first_in_pair
    }

    pub fn forward_strand(&self) -> bool {
        self.forward_strand
    }

    pub fn is_originally_unaligned(&self) -> bool {
        self.is_originally_unaligned
    }

    pub fn is_originally_clipped(&self) -> bool {
        self.is_originally_clipped
    }

    pub fn details(&self) -> Option<&GenotypePathsDetails> {
        self.details.as_deref()
    }

    pub fn is_proper_pair(&self) -> bool {
        self.ml_insert_size != INSERT_SIZE_WHEN_NOT_PROPER_PAIR
    }

    /***********************
     * CLASS MODIFICATIONS *
     ***********************/

    pub fn clear_paths(&mut self) {
        self.paths.clear();
        self.longest_path_length = 0;
    }

    /// Chains successor kmer labels onto the existing paths. A label whose
    /// window connects (shared read base, shared graph position) replaces
    /// the path it extends; labels that extend nothing open new paths.
    pub fn add_next_kmer_labels(
        &mut self,
        labels: &[KmerLabel],
        read_start_index: u32,
        read_end_index: u32,
        mismatches: u16,
    ) {
        let mut next_paths: Vec<Path> = vec![];
        let mut extended = vec![false; self.paths.len()];

        for label in labels {
            let mut chained = false;
            for (i, path) in self.paths.iter().enumerate() {
                if path.read_end_index != read_start_index {
                    continue;
                }
                if let Some(merged) = path.try_append_label(label, read_end_index, mismatches) {
                    push_or_absorb(&mut next_paths, merged);
                    extended[i] = true;
                    chained = true;
                }
            }
            if !chained {
                push_or_absorb(
                    &mut next_paths,
                    Path::from_label(label, read_start_index, read_end_index, mismatches),
                );
            }
        }

        for (i, path) in self.paths.drain(..).enumerate() {
            if !extended[i] {
                push_or_absorb(&mut next_paths, path);
            }
        }
        self.paths = next_paths;
        self.update_longest_path_length();
    }

    /// Chains predecessor kmer labels, extending paths leftward
    pub fn add_prev_kmer_labels(
        &mut self,
        labels: &[KmerLabel],
        read_start_index: u32,
        read_end_index: u32,
        mismatches: u16,
    ) {
        let mut next_paths: Vec<Path> = vec![];
        let mut extended = vec![false; self.paths.len()];

        for label in labels {
            let mut chained = false;
            for (i, path) in self.paths.iter().enumerate() {
                if path.read_start_index != read_end_index {
                    continue;
                }
                if let Some(merged) = path.try_prepend_label(label, read_start_index, mismatches) {
                    push_or_absorb(&mut next_paths, merged);
                    extended[i] = true;
                    chained = true;
                }
            }
            if !chained {
                push_or_absorb(
                    &mut next_paths,
                    Path::from_label(label, read_start_index, read_end_index, mismatches),
                );
            }
        }

        for (i, path) in self.paths.drain(..).enumerate() {
            if !extended[i] {
                push_or_absorb(&mut next_paths, path);
            }
        }
        self.paths = next_paths;
        self.update_longest_path_length();
    }

    /// Extends every path base-by-base toward the read end. The mismatch
    /// budget is adaptive: `max(1, read_len / k)` minus what the path has
    /// already spent.
    pub fn walk_read_ends(&mut self, graph: &Graph, k: usize) {
        let read_len = self.read.len() as u32;
        let mut next_paths: Vec<Path> = vec![];

        for path in self.paths.drain(..) {
            if path.read_end_index + 1 >= read_len {
                push_or_absorb(&mut next_paths, path);
                continue;
            }
            let budget = path_budget(read_len, k).saturating_sub(path.mismatches);
            let pattern = &self.read[(path.read_end_index + 1) as usize..];
            let mut any = false;
            for loc in graph.locations_of(path.end, Some(&path)) {
                for ext in graph.walk_forward(loc, pattern, budget) {
                    if let Some(merged) = path.extended_right(&ext) {
                        push_or_absorb(&mut next_paths, merged);
                        any = true;
                    }
                }
            }
            if !any {
                push_or_absorb(&mut next_paths, path);
            }
        }
        self.paths = next_paths;
        self.update_longest_path_length();
    }

    /// Extends every path base-by-base toward the read start
    pub fn walk_read_starts(&mut self, graph: &Graph, k: usize) {
        let read_len = self.read.len() as u32;
        let mut next_paths: Vec<Path> = vec![];

        for path in self.paths.drain(..) {
            if path.read_start_index == 0 {
                push_or_absorb(&mut next_paths, path);
                continue;
            }
            let budget = path_budget(read_len, k).saturating_sub(path.mismatches);
            let mut pattern = self.read[..path.read_start_index as usize].to_vec();
            pattern.reverse();
            let mut any = false;
            for loc in graph.locations_of(path.start, Some(&path)) {
                for ext in graph.walk_backward(loc, &pattern, budget) {
                    if let Some(merged) = path.extended_left(&ext) {
                        push_or_absorb(&mut next_paths, merged);
                        any = true;
                    }
                }
            }
            if !any {
                push_or_absorb(&mut next_paths, path);
            }
        }
        self.paths = next_paths;
        self.update_longest_path_length();
    }

    /******************
     * PATH FILTERING *
     ******************/

    /// Keeps only the longest paths; everything goes when even the longest
    /// is shorter than one k-mer.
    pub fn remove_short_paths(&mut self, k: usize) {
        self.update_longest_path_length();
        if self.longest_path_length < k as u32 {
            self.clear_paths();
            return;
        }
        let longest = self.longest_path_length;
        self.paths.retain(|p| p.size() == longest);
    }

    /// Drops paths lying entirely inside a variant node with no backbone
    /// flank on either side
    pub fn remove_paths_within_variant_node(&mut self, graph: &Graph) {
        self.paths.retain(|p| !graph.is_within_bubble(p.start, p.end));
        self.update_longest_path_length();
    }

    pub fn remove_paths_with_too_many_mismatches(&mut self, k: usize) {
        let read_len = self.read.len() as u32;
        self.paths.retain(|p| p.mismatches <= path_budget(read_len, k));
        self.update_longest_path_length();
    }

    /// When a perfect full-length reference path exists, non-reference
    /// paths of the same length are noise from the bubble fan-out.
    pub fn remove_non_ref_paths_when_read_matches_ref(&mut self) {
        let longest = self.longest_path_length;
        let perfect_ref = self.paths.iter()
            .any(|p| p.is_reference() && p.mismatches == 0 && p.size() == longest);
        if perfect_ref {
            self.paths.retain(|p| p.is_reference());
        }
        self.update_longest_path_length();
    }

    /// Drops paths whose both ends sit on special positions: walks that
    /// never touch the backbone, such as pure SV-escape spans
    pub fn remove_fully_special_paths(&mut self, graph: &Graph) {
        self.paths.retain(|p| !(graph.is_special_pos(p.start) && graph.is_special_pos(p.end)));
        self.update_longest_path_length();
    }

    pub fn update_longest_path_length(&mut self) {
        self.longest_path_length = self.paths.iter().map(Path::size).max().unwrap_or(0);
    }

    /*********************
     * CLASS INFORMATION *
     *********************/

    /// True when every surviving path describes the same graph placement
    pub fn all_paths_unique(&self) -> bool {
        match self.paths.split_first() {
            Some((first, rest)) => rest.iter().all(|p| p.same_span(first)),
            None => true,
        }
    }

    pub fn all_paths_fully_aligned(&self) -> bool {
        !self.paths.is_empty() && self.longest_path_length == self.read.len() as u32
    }

    /// Minimum mismatch count among the longest paths
    pub fn mismatches_of_longest(&self) -> u16 {
        self.paths.iter()
            .filter(|p| p.size() == self.longest_path_length)
            .map(|p| p.mismatches)
            .min()
            .unwrap_or(0)
    }

    /// Union of allele support per bubble across all paths
    pub fn explain_map(&self) -> FxHashMap<u32, AlleleSet> {
        let mut map: FxHashMap<u32, AlleleSet> = FxHashMap::default();
        for path in &self.paths {
            for (i, &order) in path.var_orders.iter().enumerate() {
                let entry = map.entry(order).or_insert_with(AlleleSet::none);
                *entry = entry.union(path.nums[i]);
            }
        }
        map
    }
}

/// Adaptive mismatch budget for one path
fn path_budget(read_len: u32, k: usize) -> u16 {
    ((read_len as usize / k).max(1)) as u16
}

fn push_or_absorb(paths: &mut Vec<Path>, path: Path) {
    for existing in paths.iter_mut() {
        if existing.same_span(&path) {
            existing.absorb(&path);
            return;
        }
    }
    paths.push(path);
}

/// Decides which orientation of a read to keep: more paths win, then longer
/// coverage, then fewer mismatches, then a unique placement, then the
/// original orientation. Returns 1 for the first candidate, 2 for the
/// second, 0 when neither aligned at all.
pub fn compare_genotype_paths(geno1: &GenotypePaths, geno2: &GenotypePaths) -> u8 {
    if geno1.paths.is_empty() && geno2.paths.is_empty() {
        return 0;
    }
    let rank = |g: &GenotypePaths| {
        (
            g.paths.len(),
            g.longest_path_length,
            u16::MAX - g.mismatches_of_longest(),
            g.all_paths_unique(),
        )
    };
    if rank(geno2) > rank(geno1) {
        2
    } else {
        1
    }
}

/// The paired version: both mates are summed before comparing
pub fn compare_genotype_path_pairs(
    genos1: &(GenotypePaths, GenotypePaths),
    genos2: &(GenotypePaths, GenotypePaths),
) -> u8 {
    let aligned1 = !genos1.0.paths.is_empty() || !genos1.1.paths.is_empty();
    let aligned2 = !genos2.0.paths.is_empty() || !genos2.1.paths.is_empty();
    if !aligned1 && !aligned2 {
        return 0;
    }
    let rank = |pair: &(GenotypePaths, GenotypePaths)| {
        (
            pair.0.paths.len() + pair.1.paths.len(),
            pair.0.longest_path_length + pair.1.longest_path_length,
            u16::MAX - (pair.0.mismatches_of_longest() + pair.1.mismatches_of_longest()),
            pair.0.all_paths_unique() && pair.1.all_paths_unique(),
        )
    };
    if rank(genos2) > rank(genos1) {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geno_with_paths(read_len: usize, labels: &[KmerLabel]) -> GenotypePaths {
        let mut geno = GenotypePaths::new(vec![b'A'; read_len], vec![30; read_len], 60);
        for (i, label) in labels.iter().enumerate() {
            let start = i as u32 * 31;
            geno.add_next_kmer_labels(std::slice::from_ref(label), start, start + 31, 0);
        }
        geno
    }

    #[test]
    fn test_chaining_merges_windows() {
        let geno = geno_with_paths(63, &[
            KmerLabel::reference(1, 32),
            KmerLabel::reference(32, 63),
        ]);
        assert_eq!(geno.paths.len(), 1);
        assert_eq!(geno.paths[0].start, 1);
        assert_eq!(geno.paths[0].end, 63);
        assert_eq!(geno.longest_path_length(), 63);
    }

    #[test]
    fn test_prev_kmer_labels_extend_leftward() {
        let mut geno = GenotypePaths::new(vec![b'A'; 63], vec![30; 63], 60);
        geno.add_next_kmer_labels(&[KmerLabel::reference(32, 63)], 31, 62, 0);
        geno.add_prev_kmer_labels(&[KmerLabel::reference(1, 32)], 0, 31, 0);
        assert_eq!(geno.paths.len(), 1);
        assert_eq!(geno.paths[0].start, 1);
        assert_eq!(geno.paths[0].read_start_index, 0);
        assert_eq!(geno.longest_path_length(), 63);
    }

    #[test]
    fn test_disconnected_windows_stay_separate() {
        let geno = geno_with_paths(63, &[
            KmerLabel::reference(1, 32),
            KmerLabel::reference(200, 231),
        ]);
        assert_eq!(geno.paths.len(), 2);
        assert_eq!(geno.longest_path_length(), 32);
    }

    #[test]
    fn test_remove_short_paths_keeps_longest() {
        let mut geno = geno_with_paths(63, &[
            KmerLabel::reference(1, 32),
            KmerLabel::reference(32, 63),
        ]);
        // also seed a lone, never-extended window elsewhere
        geno.add_next_kmer_labels(&[KmerLabel::reference(400, 431)], 0, 31, 0);
        assert_eq!(geno.paths.len(), 2);
        geno.remove_short_paths(32);
        assert_eq!(geno.paths.len(), 1);
        assert_eq!(geno.paths[0].size(), 63);
    }

    #[test]
    fn test_remove_short_paths_clears_below_k() {
        let mut geno = GenotypePaths::new(vec![b'A'; 40], vec![], 60);
        geno.add_next_kmer_labels(&[KmerLabel::reference(1, 12)], 0, 11, 0);
        geno.remove_short_paths(32);
        assert!(geno.paths.is_empty());
        assert_eq!(geno.longest_path_length(), 0);
    }

    #[test]
    fn test_read_matches_ref_filter() {
        let mut geno = geno_with_paths(32, &[KmerLabel::reference(1, 32)]);
        // a second placement through a bubble, shifted on the backbone
        geno.add_next_kmer_labels(&[KmerLabel::new(101, 132, 137, 1)], 0, 31, 1);
        assert_eq!(geno.paths.len(), 2);
        geno.remove_non_ref_paths_when_read_matches_ref();
        assert_eq!(geno.paths.len(), 1);
        assert!(geno.paths[0].is_reference());
    }

    #[test]
    fn test_compare_prefers_longer_coverage() {
        let long = geno_with_paths(63, &[
            KmerLabel::reference(1, 32),
            KmerLabel::reference(32, 63),
        ]);
        let short = geno_with_paths(63, &[KmerLabel::reference(1, 32)]);
        // both have one path; the longer coverage wins
        assert_eq!(compare_genotype_paths(&long, &short), 1);
        assert_eq!(compare_genotype_paths(&short, &long), 2);

        let empty = GenotypePaths::new(vec![b'A'; 63], vec![], 60);
        assert_eq!(compare_genotype_paths(&empty, &long), 2);
        assert_eq!(compare_genotype_paths(&empty, &empty), 0);
    }

    #[test]
    fn test_explain_map_unions_paths() {
        let mut geno = GenotypePaths::new(vec![b'A'; 32], vec![], 60);
        geno.add_next_kmer_labels(
            &[KmerLabel::new(1, 32, 37, 0), KmerLabel::new(1, 32, 37, 1)],
            0, 31, 0,
        );
        // equal spans merged into one path carrying both alleles
        assert_eq!(geno.paths.len(), 1);
        let map = geno.explain_map();
        let nums = map[&37];
        assert!(nums.contains(0) && nums.contains(1));
    }
}
