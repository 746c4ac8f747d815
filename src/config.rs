
use derive_builder::Builder;
use std::path::PathBuf;

/// Options recognized by the genotyping core.
/// Regions are genotyped against a single immutable config; there is no
/// process-wide option state.
#[derive(Builder, Clone, Debug)]
#[builder(default)]
pub struct GenotyperConfig {
    /// k-mer length used by the index; must be <= 32 so a key fits a u64
    pub k: usize,
    /// per-query ceiling on index labels before the lookup fails soft
    pub max_index_labels: usize,
    /// upper bound on read length, used to cluster bubbles into haplotypes
    pub max_read_length: u32,
    /// bit width of explain bitsets; haplotype clusters with more
    /// realizations than this are skipped
    pub max_number_of_haplotypes: usize,
    /// target insert size for pair refinement
    pub optimal_insert_size: u32,
    /// a read is skipped when its rarest k-mer has more index hits than this
    pub max_unique_kmer_positions: usize,
    /// include near-but-non-overlapping variants as separate bubbles instead
    /// of collapsing them
    pub add_all_variants: bool,
    /// when set, per-read alignment details are retained and can be flushed
    /// as JSON into this directory
    pub stats_dir: Option<PathBuf>,
    /// drop paths whose insert size strays too far from the optimum; the
    /// upstream implementation ships with this disabled
    pub filter_on_insert_size: bool,
}

impl Default for GenotyperConfig {
    fn default() -> Self {
        // these defaults mirror the production pipeline and are also
        // reasonable for unit tests
        Self {
            k: 32,
            max_index_labels: 64,
            max_read_length: 151,
            max_number_of_haplotypes: 64,
            optimal_insert_size: 400,
            max_unique_kmer_positions: 1000,
            add_all_variants: false,
            stats_dir: None,
            filter_on_insert_size: false,
        }
    }
}

impl GenotyperConfig {
    /// True when per-read statistics should be collected
    pub fn keep_stats(&self) -> bool {
        self.stats_dir.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GenotyperConfig::default();
        assert_eq!(config.k, 32);
        assert_eq!(config.max_index_labels, 64);
        assert!(!config.add_all_variants);
        assert!(!config.filter_on_insert_size);
        assert!(!config.keep_stats());
    }

    #[test]
    fn test_builder() {
        let config = GenotyperConfigBuilder::default()
            .k(21_usize)
            .optimal_insert_size(350_u32)
            .build()
            .unwrap();
        assert_eq!(config.k, 21);
        assert_eq!(config.optimal_insert_size, 350);
        // unset fields fall back to the defaults
        assert_eq!(config.max_index_labels, 64);
    }
}
