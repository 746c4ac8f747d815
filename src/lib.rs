
/*!
# Bilby
Bilby is a library for genotyping short variants and structural variants by
aligning short reads to a variation graph: a reference backbone interleaved
with bubbles of known alternate alleles.

The typical flow is: build a [`graph::Graph`] for a region, derive a
[`index::KmerIndex`] from it, align read pairs with [`typer::alignment`], and
fold the resulting path evidence into haplotype genotype likelihoods with
[`typer::genotyping::genotype_region`].

## Example graph construction and index lookup
```rust
use bilby::config::GenotyperConfig;
use bilby::data_types::contigs::Contig;
use bilby::data_types::records::VarRecord;
use bilby::data_types::region::GenomicRegion;
use bilby::graph::construction::build_graph;
use bilby::index::KmerIndex;

// one contig, one SNP at 0-based position 36 (A -> C)
let contigs = vec![Contig::new("chr1".to_string(), 66)];
let reference = b"AGGTTTCCCCAGGTTTCCCCAGGTTTCCCCAGGTTTACCCAGGTTTCCCCAGGTTTCCCCTTTGGA";
let records = vec![VarRecord::new(36, b"A".to_vec(), vec![b"C".to_vec()]).unwrap()];
let region = GenomicRegion::new(0, "chr1".to_string(), 0, 66);

let graph = build_graph(reference, records, region, contigs).unwrap();
assert!(graph.check().is_ok());
assert_eq!(graph.ref_nodes().len(), 2);
assert_eq!(graph.var_nodes().len(), 2);

// the reference allele is always the first variant node of a bubble
assert_eq!(graph.var_nodes()[0].dna(), b"A");
assert_eq!(graph.var_nodes()[1].dna(), b"C");

// index the graph and look up the first 32-mer of the backbone
let config = GenotyperConfig::default();
let index = KmerIndex::build(&graph, &config).unwrap();
let key = bilby::index::kmer::encode_kmer(&reference[0..32]).unwrap();
let labels = index.get(&[key]);
assert_eq!(labels.len(), 1);
assert_eq!(labels[0].start_index, 1);
assert_eq!(labels[0].end_index, 32);
```
*/

/// Configuration options recognized by the genotyping core
pub mod config;
/// Shared data types: coordinates, input records, output variants
pub mod data_types;
/// The variation graph, haplotype clusters, and reference depth tracking
pub mod graph;
/// The k-mer index mapping fixed-length sequences to graph locations
pub mod index;
/// Read alignment, pair refinement, and the region genotyping driver
pub mod typer;
/// Contains generic utility functions
pub mod util;
