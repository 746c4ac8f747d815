
/// Turning reads into graph walks and refining mate pairs
pub mod alignment;
/// Per-read alignment state and path filtering
pub mod genotype_paths;
/// The region genotyping driver
pub mod genotyping;
/// A contiguous walk through the graph
pub mod path;

pub use genotype_paths::{GenotypePaths, INSERT_SIZE_WHEN_NOT_PROPER_PAIR};
pub use path::Path;
