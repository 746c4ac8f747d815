
/// Fixed-width allele / haplotype bitsets used for explain tracking
pub mod allele_set;
/// Contig table and the absolute coordinate service
pub mod contigs;
/// Parsed input records: variant records and aligned reads
pub mod records;
/// Half-open genomic intervals in contig coordinates
pub mod region;
/// Sample roster discovered from read-group headers
pub mod roster;
/// Output-facing variant records, per-sample calls, and normalization
pub mod variants;
