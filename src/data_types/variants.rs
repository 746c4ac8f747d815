
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum VariantError {
    #[error("a variant needs at least two alleles, got {count}")]
    TooFewAlleles { count: usize },
    #[error("the reference allele is empty")]
    EmptyRefAllele,
    #[error("phred vector length {phred_len} does not match {allele_count} alleles")]
    PhredLengthMismatch { phred_len: usize, allele_count: usize },
    #[error("coverage vector length {coverage_len} does not match {allele_count} alleles")]
    CoverageLengthMismatch { coverage_len: usize, allele_count: usize },
}

/// Index of the unordered genotype (i, j), i <= j, in the VCF likelihood
/// ordering: (0,0), (0,1), (1,1), (0,2), (1,2), (2,2), ...
pub fn genotype_index(i: usize, j: usize) -> usize {
    assert!(i <= j);
    j * (j + 1) / 2 + i
}

/// Number of unordered genotypes over `allele_count` alleles
pub fn genotype_count(allele_count: usize) -> usize {
    allele_count * (allele_count + 1) / 2
}

/// Per-sample call for one variant site.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SampleCall {
    /// normalized phred-scaled likelihoods over unordered genotypes
    pub phred: Vec<u8>,
    /// per-allele read support
    pub coverage: Vec<u16>,
    pub ref_total_depth: u16,
    pub alt_total_depth: u16,
    pub ambiguous_depth: u16,
    pub alt_proper_pair_depth: u16,
    /// cached result of downstream filtering; cleared by default
    pub filtered: bool,
}

impl SampleCall {
    /// # Errors
    /// * if the phred or coverage vector lengths disagree with the allele count
    pub fn new(
        phred: Vec<u8>, coverage: Vec<u16>,
        ref_total_depth: u16, alt_total_depth: u16,
        ambiguous_depth: u16, alt_proper_pair_depth: u16,
    ) -> Result<Self, VariantError> {
        let allele_count = coverage.len();
        if phred.len() != genotype_count(allele_count) {
            return Err(VariantError::PhredLengthMismatch { phred_len: phred.len(), allele_count });
        }
        Ok(Self {
            phred, coverage,
            ref_total_depth, alt_total_depth,
            ambiguous_depth, alt_proper_pair_depth,
            filtered: false,
        })
    }

    pub fn allele_count(&self) -> usize {
        self.coverage.len()
    }

    /// The called genotype: the (i, j) pair with the minimum phred value
    pub fn called_genotype(&self) -> (usize, usize) {
        let allele_count = self.allele_count();
        let mut best = (0, 0);
        let mut best_phred = u8::MAX;
        for j in 0..allele_count {
            for i in 0..=j {
                let phred = self.phred[genotype_index(i, j)];
                if phred < best_phred {
                    best_phred = phred;
                    best = (i, j);
                }
            }
        }
        best
    }

    /// Projects the call through an allele mapping: allele `a` of this call
    /// becomes allele `mapping[a]` of the result. Coverage is summed per
    /// target allele and phred values combine by minimum (then renormalize).
    pub fn project(&self, mapping: &[u16], new_allele_count: usize) -> SampleCall {
        assert_eq!(mapping.len(), self.allele_count());
        let mut coverage = vec![0_u16; new_allele_count];
        for (a, &depth) in self.coverage.iter().enumerate() {
            let target = mapping[a] as usize;
            coverage[target] = coverage[target].saturating_add(depth);
        }

        let mut phred = vec![u8::MAX; genotype_count(new_allele_count)];
        for j in 0..self.allele_count() {
            for i in 0..=j {
                let (mut ni, mut nj) = (mapping[i] as usize, mapping[j] as usize);
                if ni > nj {
                    std::mem::swap(&mut ni, &mut nj);
                }
                let target = genotype_index(ni, nj);
                phred[target] = phred[target].min(self.phred[genotype_index(i, j)]);
            }
        }
        normalize_phred(&mut phred);

        SampleCall {
            phred,
            coverage,
            ref_total_depth: self.ref_total_depth,
            alt_total_depth: self.alt_total_depth,
            ambiguous_depth: self.ambiguous_depth,
            alt_proper_pair_depth: self.alt_proper_pair_depth,
            filtered: self.filtered,
        }
    }

    /// Projects a multi-allelic call onto the biallelic site (ref, `aa`):
    /// every other allele folds into the reference.
    pub fn make_bi_allelic(&self, aa: u16) -> SampleCall {
        let mapping: Vec<u16> = (0..self.allele_count() as u16)
            .map(|a| u16::from(a == aa))
            .collect();
        self.project(&mapping, 2)
    }

    /// Derives a biallelic call from depth alone; used for SV bubbles where
    /// the primary signal is coverage rather than per-path likelihood.
    pub fn make_call_based_on_coverage(ref_depth: u16, alt_depth: u16) -> SampleCall {
        // three units of phred per supporting read, the usual haploid scale
        let scale = |d: u16| -> u8 { (u32::from(d) * 3).min(255) as u8 };
        let balance = u16::from(ref_depth.abs_diff(alt_depth));
        let mut phred = vec![scale(alt_depth), scale(balance), scale(ref_depth)];
        normalize_phred(&mut phred);
        SampleCall {
            phred,
            coverage: vec![ref_depth, alt_depth],
            ref_total_depth: ref_depth,
            alt_total_depth: alt_depth,
            ambiguous_depth: 0,
            alt_proper_pair_depth: 0,
            filtered: false,
        }
    }
}

/// Subtracts the minimum and caps at 255 so the best genotype reads as zero
pub fn normalize_phred(phred: &mut [u8]) {
    let min = phred.iter().copied().min().unwrap_or(0);
    for p in phred.iter_mut() {
        *p -= min;
    }
}

/// An output-facing variant record: absolute position, allele sequences
/// (first is the reference allele), per-sample calls, and free-form info.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variant {
    abs_pos: u32,
    alleles: Vec<Vec<u8>>,
    calls: Vec<SampleCall>,
    infos: BTreeMap<String, String>,
    phase: Vec<u8>,
}

impl Variant {
    /// # Errors
    /// * if fewer than two alleles are given or the reference allele is empty
    pub fn new(abs_pos: u32, alleles: Vec<Vec<u8>>) -> Result<Self, VariantError> {
        if alleles.len() < 2 {
            return Err(VariantError::TooFewAlleles { count: alleles.len() });
        }
        if alleles[0].is_empty() {
            return Err(VariantError::EmptyRefAllele);
        }
        Ok(Self {
            abs_pos,
            alleles,
            calls: vec![],
            infos: BTreeMap::new(),
            phase: vec![],
        })
    }

    pub fn abs_pos(&self) -> u32 {
        self.abs_pos
    }

    pub fn alleles(&self) -> &[Vec<u8>] {
        &self.alleles
    }

    pub fn calls(&self) -> &[SampleCall] {
        &self.calls
    }

    pub fn infos(&self) -> &BTreeMap<String, String> {
        &self.infos
    }

    pub fn phase(&self) -> &[u8] {
        &self.phase
    }

    pub fn add_sample_call(&mut self, call: SampleCall) -> Result<(), VariantError> {
        if call.allele_count() != self.alleles.len() {
            return Err(VariantError::CoverageLengthMismatch {
                coverage_len: call.allele_count(),
                allele_count: self.alleles.len(),
            });
        }
        self.calls.push(call);
        Ok(())
    }

    pub fn set_info(&mut self, key: &str, value: String) {
        self.infos.insert(key.to_string(), value);
    }

    pub fn set_phase(&mut self, phase: Vec<u8>) {
        self.phase = phase;
    }

    pub fn is_snp(&self) -> bool {
        self.alleles.iter().all(|a| a.len() == 1)
    }

    /// Left-aligns and trims the record until no base is shared as a common
    /// suffix across all alleles and either the alleles differ at the first
    /// base or one of them has length 1. `prev_base` supplies the backbone
    /// base immediately before an absolute position, for left extension.
    /// Normalization is idempotent and preserves the represented alleles.
    pub fn normalize(&mut self, prev_base: &dyn Fn(u32) -> Option<u8>) {
        loop {
            let mut changed = false;

            // trim a shared suffix base
            while self.alleles_share_last_base() {
                if self.alleles.iter().any(|a| a.len() == 1) {
                    // a trim would empty an allele; extend left first
                    match prev_base(self.abs_pos) {
                        Some(base) => {
                            for allele in self.alleles.iter_mut() {
                                allele.insert(0, base);
                            }
                            self.abs_pos -= 1;
                        }
                        None => break,
                    }
                }
                for allele in self.alleles.iter_mut() {
                    allele.pop();
                }
                changed = true;
            }

            // trim a shared prefix base
            while self.alleles.iter().all(|a| a.len() >= 2) && self.alleles_share_first_base() {
                for allele in self.alleles.iter_mut() {
                    allele.remove(0);
                }
                self.abs_pos += 1;
                changed = true;
            }

            if !changed {
                break;
            }
        }
    }

    fn alleles_share_first_base(&self) -> bool {
        let first = self.alleles[0].first();
        first.is_some() && self.alleles.iter().all(|a| a.first() == first)
    }

    fn alleles_share_last_base(&self) -> bool {
        let last = self.alleles[0].last();
        last.is_some() && self.alleles.iter().all(|a| a.last() == last)
    }

    /// Splits an all-SNP multi-allelic record into `R - 1` biallelic SNPs,
    /// projecting every sample call onto each alternate allele.
    pub fn break_multi_snps(&self) -> Vec<Variant> {
        assert!(self.is_snp());
        if self.alleles.len() == 2 {
            return vec![self.clone()];
        }
        let mut records = Vec::with_capacity(self.alleles.len() - 1);
        for aa in 1..self.alleles.len() {
            let mut variant = Variant::new(
                self.abs_pos,
                vec![self.alleles[0].clone(), self.alleles[aa].clone()],
            ).expect("two non-empty alleles");
            variant.infos = self.infos.clone();
            for call in &self.calls {
                variant.calls.push(call.make_bi_allelic(aa as u16));
            }
            records.push(variant);
        }
        records
    }

    /// Breaks a complex record into disjoint simpler records. Records whose
    /// alleles all have equal length decompose into one SNP per divergent
    /// column, provided the divergent columns are at least `threshold` bases
    /// apart; everything else is returned whole.
    pub fn break_down(&self, threshold: usize) -> Vec<Variant> {
        if self.is_snp() {
            return self.break_multi_snps();
        }

        let len = self.alleles[0].len();
        if !self.alleles.iter().all(|a| a.len() == len) {
            return vec![self.clone()];
        }

        let divergent: Vec<usize> = (0..len)
            .filter(|&col| self.alleles.iter().any(|a| a[col] != self.alleles[0][col]))
            .collect();
        if divergent.len() < 2 || divergent.windows(2).any(|w| w[1] - w[0] < threshold) {
            return vec![self.clone()];
        }

        let mut records = Vec::with_capacity(divergent.len());
        for &col in &divergent {
            // distinct alleles observed in this column, reference base first
            let ref_base = self.alleles[0][col];
            let mut column_alleles: Vec<Vec<u8>> = vec![vec![ref_base]];
            let mut mapping = Vec::with_capacity(self.alleles.len());
            for allele in &self.alleles {
                let base = allele[col];
                let target = match column_alleles.iter().position(|a| a[0] == base) {
                    Some(index) => index,
                    None => {
                        column_alleles.push(vec![base]);
                        column_alleles.len() - 1
                    }
                };
                mapping.push(target as u16);
            }

            let allele_count = column_alleles.len();
            let mut variant = Variant::new(self.abs_pos + col as u32, column_alleles)
                .expect("column split keeps at least two alleles");
            variant.infos = self.infos.clone();
            for call in &self.calls {
                variant.calls.push(call.project(&mapping, allele_count));
            }
            records.push(variant);
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_reference(_: u32) -> Option<u8> {
        None
    }

    #[test]
    fn test_genotype_index() {
        assert_eq!(genotype_index(0, 0), 0);
        assert_eq!(genotype_index(0, 1), 1);
        assert_eq!(genotype_index(1, 1), 2);
        assert_eq!(genotype_index(0, 2), 3);
        assert_eq!(genotype_index(2, 2), 5);
        assert_eq!(genotype_count(3), 6);
    }

    #[test]
    fn test_normalize_trims_shared_suffix() {
        // ATT -> AGT at 100 shares the trailing T: becomes AT -> AG
        let mut variant = Variant::new(100, vec![b"ATT".to_vec(), b"AGT".to_vec()]).unwrap();
        variant.normalize(&no_reference);
        assert_eq!(variant.abs_pos(), 101);
        assert_eq!(variant.alleles(), &[b"T".to_vec(), b"G".to_vec()]);
    }

    #[test]
    fn test_normalize_left_aligns_deletion() {
        // deleting CA out of the CACACA repeat left-aligns to the G anchor
        let reference = b"NNGCACACAT".to_vec();
        let prev = |pos: u32| -> Option<u8> {
            if pos == 0 { None } else { reference.get(pos as usize - 1).copied() }
        };
        let mut variant = Variant::new(5, vec![b"CAC".to_vec(), b"C".to_vec()]).unwrap();
        variant.normalize(&prev);
        assert_eq!(variant.abs_pos(), 2);
        assert_eq!(variant.alleles(), &[b"GCA".to_vec(), b"G".to_vec()]);
    }

    #[test]
    fn test_normalize_idempotent() {
        let reference = b"NNGCACACAT".to_vec();
        let prev = |pos: u32| -> Option<u8> {
            if pos == 0 { None } else { reference.get(pos as usize - 1).copied() }
        };
        let mut variant = Variant::new(3, vec![b"CACAC".to_vec(), b"CAC".to_vec()]).unwrap();
        variant.normalize(&prev);
        let once = variant.clone();
        variant.normalize(&prev);
        assert_eq!(variant, once);
    }

    #[test]
    fn test_break_multi_snps() {
        let mut variant = Variant::new(50, vec![b"A".to_vec(), b"C".to_vec(), b"G".to_vec()]).unwrap();
        let call = SampleCall::new(
            vec![0, 10, 20, 30, 40, 50], vec![12, 5, 3],
            12, 8, 0, 0,
        ).unwrap();
        variant.add_sample_call(call).unwrap();

        let records = variant.break_multi_snps();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].alleles(), &[b"A".to_vec(), b"C".to_vec()]);
        assert_eq!(records[1].alleles(), &[b"A".to_vec(), b"G".to_vec()]);
        // allele G folds into the reference for the A/C record
        assert_eq!(records[0].calls()[0].coverage, vec![15, 5]);
        assert_eq!(records[1].calls()[0].coverage, vec![17, 3]);
    }

    #[test]
    fn test_break_down_equal_length() {
        // two divergent columns far enough apart to split
        let variant = Variant::new(10, vec![b"ACGTA".to_vec(), b"TCGTC".to_vec()]).unwrap();
        let records = variant.break_down(2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].abs_pos(), 10);
        assert_eq!(records[0].alleles(), &[b"A".to_vec(), b"T".to_vec()]);
        assert_eq!(records[1].abs_pos(), 14);
        assert_eq!(records[1].alleles(), &[b"A".to_vec(), b"C".to_vec()]);
    }

    #[test]
    fn test_break_down_keeps_close_columns() {
        // adjacent divergent columns stay one record at threshold 2
        let variant = Variant::new(10, vec![b"ACG".to_vec(), b"ATG".to_vec(), b"AAG".to_vec()]).unwrap();
        let records = variant.break_down(2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], variant);
    }

    #[test]
    fn test_called_genotype() {
        let call = SampleCall::new(vec![30, 0, 40], vec![10, 9], 10, 9, 0, 0).unwrap();
        assert_eq!(call.called_genotype(), (0, 1));
    }

    #[test]
    fn test_coverage_call() {
        let hom_alt = SampleCall::make_call_based_on_coverage(0, 20);
        assert_eq!(hom_alt.called_genotype(), (1, 1));
        let het = SampleCall::make_call_based_on_coverage(10, 10);
        assert_eq!(het.called_genotype(), (0, 1));
        let hom_ref = SampleCall::make_call_based_on_coverage(20, 1);
        assert_eq!(hom_ref.called_genotype(), (0, 0));
    }
}
