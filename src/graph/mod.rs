
/// Graph construction from a reference slice and sorted variant records
pub mod construction;
/// One bubble of the graph, typed as a unit
pub mod genotype;
/// Haplotype clusters and the per-sample evidence they accumulate
pub mod haplotype;
/// Reference-allele nodes and variant-allele nodes
pub mod node;
/// Per-sample and global per-position read depth tracking
pub mod reference_depth;
/// The variation graph itself: topology, coordinates, walks
pub mod variation_graph;

pub use variation_graph::{Graph, GraphError, Location, NodeSite, SPECIAL_START};
