
/// Index construction: enumerating every spellable k-length walk
pub mod builder;
/// 2-bit k-mer encoding and graph labels
pub mod kmer;
/// The in-memory key to label-list store with Hamming-1 companion map
pub mod mem_index;

pub use kmer::KmerLabel;
pub use mem_index::{IndexError, KmerIndex};
