
use crate::data_types::allele_set::AlleleSet;
use crate::data_types::variants::{genotype_count, genotype_index, SampleCall};
use crate::graph::genotype::Genotype;
use crate::graph::variation_graph::Graph;

/// Sentinels stored in the per-read coverage scratch
pub const NO_COVERAGE: u16 = 0xFFFF;
pub const MULTI_ALT_COVERAGE: u16 = 0xFFFE;
pub const MULTI_REF_COVERAGE: u16 = 0xFFFD;

/// Reward a read can contribute to one haplotype pair; penalties subtract
/// from it and the floor is zero, which keeps every score within u16 range.
const READ_REWARD: u16 = 40;
const NON_UNIQUE_PENALTY: u16 = 1;
const CLIP_PENALTY: u16 = 4;

/// Penalty unit scaled by mapping quality; confident reads hurt more when
/// they disagree
fn error_penalty(mapq: u8) -> u16 {
    (1 + u16::from(mapq) / 20).min(4)
}

/// Auxiliary per-bubble statistics, only meaningful when stats are kept
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct VarStats {
    /// mapq histogram, 10-wide bins with the last bin open-ended
    pub mapq_hist: [u32; 7],
    pub proper_pairs: u32,
    pub improper_pairs: u32,
    pub clipped_reads: u32,
    pub unaligned_reads: u32,
    pub forward_strand_first: u32,
    pub forward_strand_second: u32,
    pub reverse_strand_first: u32,
    pub reverse_strand_second: u32,
    pub realignment_distance_sum: u64,
    pub realignment_count: u32,
    /// graph complexity around the bubble, from `ten_log10_num_paths`
    pub graph_complexity: u8,
}

impl VarStats {
    pub fn add_mapq(&mut self, mapq: u8) {
        let bin = (usize::from(mapq) / 10).min(6);
        self.mapq_hist[bin] += 1;
    }

    pub fn add_pair(&mut self, proper: bool) {
        if proper {
            self.proper_pairs += 1;
        } else {
            self.improper_pairs += 1;
        }
    }

    pub fn add_strand(&mut self, forward: bool, first_in_pair: bool) {
        match (forward, first_in_pair) {
            (true, true) => self.forward_strand_first += 1,
            (true, false) => self.forward_strand_second += 1,
            (false, true) => self.reverse_strand_first += 1,
            (false, false) => self.reverse_strand_second += 1,
        }
    }

    pub fn add_clipped(&mut self) {
        self.clipped_reads += 1;
    }

    pub fn add_realignment(&mut self, is_unaligned: bool, original_pos: u32, new_pos: u32) {
        if is_unaligned {
            self.unaligned_reads += 1;
            return;
        }
        self.realignment_distance_sum += u64::from(original_pos.abs_diff(new_pos));
        self.realignment_count += 1;
    }

    pub fn merge(&mut self, other: &VarStats) {
        for (a, b) in self.mapq_hist.iter_mut().zip(other.mapq_hist.iter()) {
            *a += b;
        }
        self.proper_pairs += other.proper_pairs;
        self.improper_pairs += other.improper_pairs;
        self.clipped_reads += other.clipped_reads;
        self.unaligned_reads += other.unaligned_reads;
        self.forward_strand_first += other.forward_strand_first;
        self.forward_strand_second += other.forward_strand_second;
        self.reverse_strand_first += other.reverse_strand_first;
        self.reverse_strand_second += other.reverse_strand_second;
        self.realignment_distance_sum += other.realignment_distance_sum;
        self.realignment_count += other.realignment_count;
        self.graph_complexity = self.graph_complexity.max(other.graph_complexity);
    }
}

/// Per-haplotype coverage detail, kept only when a stats directory is set
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct HapStats {
    pub hap_coverage: Vec<u8>,
    pub hap_unique_coverage: Vec<u8>,
}

/// Per-sample evidence for one haplotype cluster.
#[derive(Clone, Debug, Default)]
pub struct HapSample {
    /// accumulated score of each unordered haplotype pair; higher is better
    log_score: Vec<u16>,
    /// per-bubble, per-allele read support
    gt_coverage: Vec<Vec<u16>>,
    max_log_score: u16,
    ambiguous_depth: u8,
    ambiguous_depth_alt: u8,
    alt_proper_pair_depth: u8,
    /// further statistics are only kept when the stats option is used
    stats: Option<Box<HapStats>>,
}

impl HapSample {
    pub fn log_score(&self) -> &[u16] {
        &self.log_score
    }

    pub fn max_log_score(&self) -> u16 {
        self.max_log_score
    }

    pub fn gt_coverage(&self) -> &[Vec<u16>] {
        &self.gt_coverage
    }

    pub fn ambiguous_depth(&self) -> u8 {
        self.ambiguous_depth
    }

    pub fn ambiguous_depth_alt(&self) -> u8 {
        self.ambiguous_depth_alt
    }

    pub fn alt_proper_pair_depth(&self) -> u8 {
        self.alt_proper_pair_depth
    }

    pub fn stats(&self) -> Option<&HapStats> {
        self.stats.as_deref()
    }

    pub fn increment_ambiguous_depth(&mut self) {
        self.ambiguous_depth = self.ambiguous_depth.saturating_add(1);
    }

    pub fn increment_ambiguous_depth_alt(&mut self) {
        self.ambiguous_depth_alt = self.ambiguous_depth_alt.saturating_add(1);
    }

    pub fn increment_alt_proper_pair_depth(&mut self) {
        self.alt_proper_pair_depth = self.alt_proper_pair_depth.saturating_add(1);
    }

    pub fn increment_allele_depth(&mut self, gt_index: usize, allele: usize) {
        let slot = &mut self.gt_coverage[gt_index][allele];
        *slot = slot.saturating_add(1);
    }
}

/// A cluster of bubbles typed together because a read can span them. Holds
/// the bubbles, per-sample evidence, per-bubble statistics, and the per-read
/// scratch (coverage and explain bitsets) that is folded into the evidence
/// after every read.
#[derive(Clone, Debug)]
pub struct Haplotype {
    gts: Vec<Genotype>,
    hap_samples: Vec<HapSample>,
    var_stats: Vec<VarStats>,
    coverage: Vec<u16>,
    explains: Vec<AlleleSet>,
}

impl Haplotype {
    pub fn new(gts: Vec<Genotype>) -> Self {
        let count = gts.len();
        Self {
            gts,
            hap_samples: vec![],
            var_stats: vec![VarStats::default(); count],
            coverage: vec![NO_COVERAGE; count],
            explains: vec![AlleleSet::none(); count],
        }
    }

    pub fn gts(&self) -> &[Genotype] {
        &self.gts
    }

    pub fn hap_samples(&self) -> &[HapSample] {
        &self.hap_samples
    }

    pub fn var_stats(&self) -> &[VarStats] {
        &self.var_stats
    }

    /// Number of haplotype realizations: the product of allele counts
    pub fn num_haplotypes(&self) -> usize {
        self.gts.iter().map(|gt| gt.allele_count() as usize).product()
    }

    pub fn has_too_many_haplotypes(&self, max_haplotypes: usize) -> bool {
        self.num_haplotypes() > max_haplotypes
    }

    /// Index of the bubble with variant order `order` within this cluster
    pub fn local_gt_index(&self, order: u32) -> Option<usize> {
        self.gts.iter().position(|gt| gt.order() == order)
    }

    /// Prepares per-sample slots; called once per region
    pub fn clear_and_resize_samples(&mut self, sample_count: usize, keep_stats: bool) {
        let num_haps = self.num_haplotypes();
        let score_len = genotype_count(num_haps);
        self.hap_samples = (0..sample_count)
            .map(|_| HapSample {
                log_score: vec![0; score_len],
                gt_coverage: self.gts.iter()
                    .map(|gt| vec![0; gt.allele_count() as usize])
                    .collect(),
                max_log_score: 0,
                ambiguous_depth: 0,
                ambiguous_depth_alt: 0,
                alt_proper_pair_depth: 0,
                stats: keep_stats.then(|| Box::new(HapStats {
                    hap_coverage: vec![0; num_haps],
                    hap_unique_coverage: vec![0; num_haps],
                })),
            })
            .collect();
    }

    /// Installs a worker-owned sample slot into this haplotype, the reduce
    /// step of the per-sample fan-out.
    pub fn set_sample(&mut self, sample: usize, evidence: HapSample) {
        self.hap_samples[sample] = evidence;
    }

    /// Moves a sample slot out, leaving an empty one behind
    pub fn take_sample(&mut self, sample: usize) -> HapSample {
        std::mem::take(&mut self.hap_samples[sample])
    }

    pub fn merge_var_stats_from(&mut self, other: &Haplotype) {
        for (mine, theirs) in self.var_stats.iter_mut().zip(other.var_stats.iter()) {
            mine.merge(theirs);
        }
    }

    /**********************
     * PER-READ EVIDENCE  *
     **********************/

    /// ORs a read's allele explanation into the scratch for one bubble
    pub fn add_explanation(&mut self, local_gt: usize, explain: AlleleSet) {
        self.explains[local_gt] = self.explains[local_gt].union(explain);
    }

    /// Merges a read's allele support into the coverage scratch, degrading
    /// to the MULTI sentinels when reads support different alleles
    pub fn add_coverage(&mut self, local_gt: usize, allele: u16) {
        let slot = &mut self.coverage[local_gt];
        *slot = match *slot {
            NO_COVERAGE => allele,
            current if current == allele => current,
            current if current == 0 || allele == 0 => MULTI_REF_COVERAGE,
            MULTI_REF_COVERAGE => MULTI_REF_COVERAGE,
            _ => MULTI_ALT_COVERAGE,
        };
    }

    /// Clears the per-read scratch; called after the read's evidence has
    /// been folded into every sample accumulator.
    pub fn clear_scratch(&mut self) {
        self.coverage.iter_mut().for_each(|c| *c = NO_COVERAGE);
        self.explains.iter_mut().for_each(|e| *e = AlleleSet::none());
    }

    /// The haplotype realizations consistent with the current read: a
    /// realization is explained when every bubble the read covers allows its
    /// allele digit. Bubbles the read says nothing about allow everything.
    pub fn explains_to_haplotypes(&self) -> AlleleSet {
        let num_haps = self.num_haplotypes();
        let mut out = AlleleSet::none();
        for h in 0..num_haps {
            let mut index = h;
            let mut explained = true;
            for (g, gt) in self.gts.iter().enumerate() {
                let digit = (index % gt.allele_count() as usize) as u16;
                index /= gt.allele_count() as usize;
                if !self.explains[g].is_empty() && !self.explains[g].contains(digit) {
                    explained = false;
                    break;
                }
            }
            if explained {
                out.insert(h as u16);
            }
        }
        out
    }

    /// Allele digit of bubble `g` in haplotype realization `h`
    fn digit_of(&self, h: usize, g: usize) -> u16 {
        let mut index = h;
        for gt in &self.gts[..g] {
            index /= gt.allele_count() as usize;
        }
        (index % self.gts[g].allele_count() as usize) as u16
    }

    /// Converts the current read's explain scratch into score updates over
    /// every unordered haplotype pair for one sample.
    pub fn explain_to_score(
        &mut self,
        sample: usize,
        non_unique_paths: bool,
        mapq: u8,
        fully_aligned: bool,
        mismatches: u16,
    ) {
        let explained = self.explains_to_haplotypes();
        let num_haps = self.num_haplotypes();
        let penalty = error_penalty(mapq);
        let clip = if fully_aligned { 0 } else { CLIP_PENALTY };

        let covered_reward = READ_REWARD
            .saturating_sub(mismatches.saturating_mul(penalty))
            .saturating_sub(clip);
        let half_reward = READ_REWARD
            .saturating_sub(penalty)
            .saturating_sub(if non_unique_paths { NON_UNIQUE_PENALTY } else { 0 })
            .saturating_sub(mismatches.saturating_mul(penalty))
            .saturating_sub(clip);

        let hap_sample = &mut self.hap_samples[sample];
        for b in 0..num_haps {
            let b_covered = explained.contains(b as u16);
            for a in 0..=b {
                let a_covered = explained.contains(a as u16);
                let reward = match (a_covered, b_covered) {
                    (true, true) => covered_reward,
                    (false, false) => 0,
                    _ => half_reward,
                };
                let slot = &mut hap_sample.log_score[genotype_index(a, b)];
                *slot = slot.saturating_add(reward);
            }
        }

        if let Some(stats) = hap_sample.stats.as_deref_mut() {
            for h in explained.iter() {
                let slot = &mut stats.hap_coverage[h as usize];
                *slot = slot.saturating_add(1);
            }
            if let Some(h) = explained.unique_index() {
                if !non_unique_paths {
                    let slot = &mut stats.hap_unique_coverage[h as usize];
                    *slot = slot.saturating_add(1);
                }
            }
        }

        self.update_max_log_score(sample);
    }

    /// Folds the coverage scratch into per-allele depths for one sample
    pub fn coverage_to_gts(&mut self, sample: usize, is_proper_pair: bool) {
        for g in 0..self.gts.len() {
            match self.coverage[g] {
                NO_COVERAGE => {}
                MULTI_REF_COVERAGE => {
                    self.hap_samples[sample].increment_ambiguous_depth();
                }
                MULTI_ALT_COVERAGE => {
                    self.hap_samples[sample].increment_ambiguous_depth();
                    self.hap_samples[sample].increment_ambiguous_depth_alt();
                }
                allele => {
                    self.hap_samples[sample].increment_allele_depth(g, allele as usize);
                    if allele > 0 && is_proper_pair {
                        self.hap_samples[sample].increment_alt_proper_pair_depth();
                    }
                }
            }
        }
    }

    /// Refreshes the best score seen for one sample
    pub fn update_max_log_score(&mut self, sample: usize) {
        let hap_sample = &mut self.hap_samples[sample];
        hap_sample.max_log_score = hap_sample.log_score.iter().copied().max().unwrap_or(0);
    }

    /***************
     * STATISTICS  *
     ***************/

    pub fn mapq_to_stats(&mut self, mapq: u8) {
        for stats in self.var_stats.iter_mut() {
            stats.add_mapq(mapq);
        }
    }

    pub fn strand_to_stats(&mut self, forward_strand: bool, is_first_in_pair: bool) {
        for stats in self.var_stats.iter_mut() {
            stats.add_strand(forward_strand, is_first_in_pair);
        }
    }

    pub fn pair_to_stats(&mut self, is_proper_pair: bool) {
        for stats in self.var_stats.iter_mut() {
            stats.add_pair(is_proper_pair);
        }
    }

    pub fn clipped_reads_to_stats(&mut self, fully_aligned: bool) {
        if !fully_aligned {
            for stats in self.var_stats.iter_mut() {
                stats.add_clipped();
            }
        }
    }

    pub fn realignment_to_stats(&mut self, is_unaligned_read: bool, original_pos: u32, new_pos: u32) {
        for stats in self.var_stats.iter_mut() {
            stats.add_realignment(is_unaligned_read, original_pos, new_pos);
        }
    }

    pub fn graph_complexity_to_stats(&mut self, graph: &Graph, max_distance: u32) {
        for (g, gt) in self.gts.iter().enumerate() {
            self.var_stats[g].graph_complexity =
                graph.ten_log10_num_paths(gt.first_var(), max_distance);
        }
    }

    /**************
     * EMISSION   *
     **************/

    /// Builds the per-sample call for bubble `g` by marginalizing the
    /// haplotype-pair scores onto the bubble's allele pairs.
    pub fn sample_call_for_gt(&self, sample: usize, g: usize) -> SampleCall {
        let gt = &self.gts[g];
        let allele_count = gt.allele_count() as usize;
        let num_haps = self.num_haplotypes();
        let hap_sample = &self.hap_samples[sample];

        // best score per unordered allele pair of this bubble
        let mut best = vec![0_u16; genotype_count(allele_count)];
        for b in 0..num_haps {
            let db = self.digit_of(b, g) as usize;
            for a in 0..=b {
                let da = self.digit_of(a, g) as usize;
                let (i, j) = if da <= db { (da, db) } else { (db, da) };
                let slot = &mut best[genotype_index(i, j)];
                *slot = (*slot).max(hap_sample.log_score[genotype_index(a, b)]);
            }
        }

        let top = best.iter().copied().max().unwrap_or(0);
        let phred: Vec<u8> = best.iter()
            .map(|&score| u32::from(top - score).min(255) as u8)
            .collect();

        let coverage = hap_sample.gt_coverage[g].clone();
        let ref_total = coverage[0];
        let alt_total = coverage[1..].iter().fold(0_u16, |acc, &c| acc.saturating_add(c));

        SampleCall {
            phred,
            coverage,
            ref_total_depth: ref_total,
            alt_total_depth: alt_total,
            ambiguous_depth: u16::from(hap_sample.ambiguous_depth),
            alt_proper_pair_depth: u16::from(hap_sample.alt_proper_pair_depth),
            filtered: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn biallelic_haplotype() -> Haplotype {
        let mut hap = Haplotype::new(vec![Genotype::new(37, 0, 2)]);
        hap.clear_and_resize_samples(1, false);
        hap
    }

    #[test]
    fn test_num_haplotypes_is_allele_product() {
        let hap = Haplotype::new(vec![Genotype::new(10, 0, 2), Genotype::new(40, 2, 3)]);
        assert_eq!(hap.num_haplotypes(), 6);
        assert!(!hap.has_too_many_haplotypes(6));
        assert!(hap.has_too_many_haplotypes(5));
    }

    #[test]
    fn test_coverage_sentinels() {
        let mut hap = biallelic_haplotype();
        hap.add_coverage(0, 1);
        assert_eq!(hap.coverage[0], 1);
        hap.add_coverage(0, 1);
        assert_eq!(hap.coverage[0], 1);
        hap.add_coverage(0, 0);
        assert_eq!(hap.coverage[0], MULTI_REF_COVERAGE);

        hap.clear_scratch();
        assert_eq!(hap.coverage[0], NO_COVERAGE);
        hap.add_coverage(0, 1);
        hap.add_coverage(0, 2);
        assert_eq!(hap.coverage[0], MULTI_ALT_COVERAGE);
    }

    #[test]
    fn test_explains_to_haplotypes_silent_bubble() {
        let mut hap = Haplotype::new(vec![Genotype::new(10, 0, 2), Genotype::new(40, 2, 2)]);
        hap.clear_and_resize_samples(1, false);
        // the read only pins the first bubble to its alt allele
        hap.add_explanation(0, AlleleSet::single(1));
        let explained = hap.explains_to_haplotypes();
        // haplotype indices: digit0 + 2 * digit1
        assert!(!explained.contains(0));
        assert!(explained.contains(1));
        assert!(!explained.contains(2));
        assert!(explained.contains(3));
    }

    #[test]
    fn test_genotyping_scenario() {
        // twenty reads on each allele of a biallelic bubble at mapq 60:
        // the het genotype wins and both homs are far behind
        let mut hap = biallelic_haplotype();
        for allele in [0_u16, 1] {
            for _ in 0..20 {
                hap.add_explanation(0, AlleleSet::single(allele));
                hap.add_coverage(0, allele);
                hap.explain_to_score(0, false, 60, true, 0);
                hap.coverage_to_gts(0, true);
                hap.clear_scratch();
            }
        }

        let call = hap.sample_call_for_gt(0, 0);
        assert_eq!(call.coverage, vec![20, 20]);
        let het = call.phred[genotype_index(0, 1)];
        let hom_ref = call.phred[genotype_index(0, 0)];
        let hom_alt = call.phred[genotype_index(1, 1)];
        assert_eq!(het, 0);
        assert!(hom_ref > 100);
        assert!(hom_alt > 100);
        assert_eq!(call.ref_total_depth, 20);
        assert_eq!(call.alt_total_depth, 20);
        assert_eq!(call.alt_proper_pair_depth, 20);
        assert_eq!(call.ambiguous_depth, 0);
    }

    #[test]
    fn test_ambiguous_read_counts_once() {
        let mut hap = biallelic_haplotype();
        hap.add_explanation(0, AlleleSet::single(0).union(AlleleSet::single(1)));
        hap.add_coverage(0, 0);
        hap.add_coverage(0, 1);
        hap.coverage_to_gts(0, true);
        hap.clear_scratch();

        let sample = &hap.hap_samples()[0];
        assert_eq!(sample.ambiguous_depth(), 1);
        assert_eq!(sample.gt_coverage()[0], vec![0, 0]);
    }

    #[test]
    fn test_var_stats_accumulate() {
        let mut hap = biallelic_haplotype();
        hap.mapq_to_stats(60);
        hap.mapq_to_stats(3);
        hap.strand_to_stats(true, true);
        hap.pair_to_stats(true);
        hap.clipped_reads_to_stats(false);
        hap.realignment_to_stats(false, 100, 110);

        let stats = &hap.var_stats()[0];
        assert_eq!(stats.mapq_hist[6], 1);
        assert_eq!(stats.mapq_hist[0], 1);
        assert_eq!(stats.forward_strand_first, 1);
        assert_eq!(stats.proper_pairs, 1);
        assert_eq!(stats.clipped_reads, 1);
        assert_eq!(stats.realignment_distance_sum, 10);
    }
}
