
use rustc_hash::FxHashMap;

use crate::config::GenotyperConfig;
use crate::graph::variation_graph::Graph;
use crate::index::builder::build_labels;
use crate::index::kmer::{hamming1_neighbor_keys, KmerLabel};
use crate::util::serialize as ser;

const INDEX_MAGIC: &[u8; 4] = b"BLBI";
const INDEX_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("k must be between 1 and 32, got {0}")]
    InvalidK(usize),
    #[error("index was built with k={index_k} but k={expected} was requested")]
    KmerSizeMismatch { index_k: usize, expected: usize },
    #[error("index was built against a different contig table")]
    ContigChecksumMismatch,
    #[error("bad magic bytes; not a serialized index")]
    BadMagic,
    #[error("unsupported index version {0}")]
    UnsupportedVersion(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// In-memory k-mer index: key to label-list map with an optional Hamming-1
/// companion map that resolves every near-miss key to its unique primary.
#[derive(Clone, Debug)]
pub struct KmerIndex {
    k: usize,
    contig_digest: [u8; 32],
    empty_key: u64,
    max_index_labels: usize,
    hamming0: FxHashMap<u64, Vec<KmerLabel>>,
    hamming1: FxHashMap<u64, u64>,
}

impl KmerIndex {
    /// Builds the index for a graph by enumerating every spellable k-length
    /// walk.
    /// # Errors
    /// * if the configured k does not fit the 2-bit u64 packing
    pub fn build(graph: &Graph, config: &GenotyperConfig) -> Result<Self, IndexError> {
        if config.k == 0 || config.k > 32 {
            return Err(IndexError::InvalidK(config.k));
        }

        let mut hamming0: FxHashMap<u64, Vec<KmerLabel>> = FxHashMap::default();
        for (key, label) in build_labels(graph, config.k) {
            let labels = hamming0.entry(key).or_default();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }

        let empty_key = choose_empty_key(&hamming0);
        Ok(Self {
            k: config.k,
            contig_digest: graph.contigs().digest(),
            empty_key,
            max_index_labels: config.max_index_labels,
            hamming0,
            hamming1: FxHashMap::default(),
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn empty_key(&self) -> u64 {
        self.empty_key
    }

    pub fn has_hamming1(&self) -> bool {
        !self.hamming1.is_empty()
    }

    /// True when the key itself is stored; lets callers tell an absent key
    /// apart from a lookup that failed soft on the label ceiling
    pub fn contains(&self, key: u64) -> bool {
        self.hamming0.contains_key(&key)
    }

    /// Precomputes the Hamming-1 neighborhood map: every neighbor of every
    /// stored key points at its primary, and neighbors claimed by more than
    /// one primary are elided. Turns the per-window 3k-way fan-out into one
    /// hash probe per neighbor.
    pub fn generate_hamming1(&mut self) {
        self.hamming1.clear();
        let mut duplicates: Vec<u64> = vec![];
        for &key in self.hamming0.keys() {
            for neighbor in hamming1_neighbor_keys(key, self.k) {
                match self.hamming1.entry(neighbor) {
                    std::collections::hash_map::Entry::Vacant(slot) => {
                        slot.insert(key);
                    }
                    std::collections::hash_map::Entry::Occupied(_) => {
                        duplicates.push(neighbor);
                    }
                }
            }
        }
        for key in duplicates {
            self.hamming1.remove(&key);
        }
    }

    /// Union of the label lists of all present keys. Fails soft: when the
    /// total label count exceeds the configured ceiling the whole lookup
    /// returns empty, bounding the work a repetitive k-mer can cause.
    pub fn get(&self, keys: &[u64]) -> Vec<KmerLabel> {
        let mut hits: Vec<&Vec<KmerLabel>> = vec![];
        let mut total = 0_usize;
        for &key in keys {
            if key == self.empty_key {
                continue;
            }
            if let Some(labels) = self.hamming0.get(&key) {
                total += labels.len();
                if total > self.max_index_labels {
                    return vec![];
                }
                hits.push(labels);
            }
        }
        hits.into_iter().flatten().copied().collect()
    }

    /// Per-query version of [`get`](Self::get)
    pub fn multi_get(&self, batch: &[Vec<u64>]) -> Vec<Vec<KmerLabel>> {
        batch.iter().map(|keys| self.get(keys)).collect()
    }

    /// Looks every neighbor key up in the precomputed Hamming-1 map and
    /// returns the labels of the primaries it names.
    pub fn multi_get_hamming1(&self, batch: &[Vec<u64>]) -> Vec<Vec<KmerLabel>> {
        batch.iter()
            .map(|keys| {
                let mut labels: Vec<KmerLabel> = vec![];
                for key in keys {
                    if let Some(primary) = self.hamming1.get(key) {
                        if let Some(found) = self.hamming0.get(primary) {
                            labels.extend_from_slice(found);
                        }
                    }
                }
                labels
            })
            .collect()
    }

    /*****************
     * SERIALIZATION *
     *****************/

    pub fn serialize_into<W: std::io::Write>(&self, writer: &mut W) -> Result<(), IndexError> {
        writer.write_all(INDEX_MAGIC)?;
        ser::write_u32(writer, INDEX_VERSION)?;
        ser::write_u32(writer, self.k as u32)?;
        writer.write_all(&self.contig_digest)?;

        // deterministic entry order keeps the artifact byte-exact
        let mut keys: Vec<u64> = self.hamming0.keys().copied().collect();
        keys.sort_unstable();
        ser::write_u64(writer, keys.len() as u64)?;
        for key in keys {
            let labels = &self.hamming0[&key];
            ser::write_u64(writer, key)?;
            ser::write_u32(writer, labels.len() as u32)?;
            for label in labels {
                ser::write_u32(writer, label.start_index)?;
                ser::write_u32(writer, label.end_index)?;
                ser::write_u32(writer, label.variant_order)?;
                ser::write_u16(writer, label.variant_num)?;
            }
        }
        Ok(())
    }

    /// Loads a serialized index and verifies it matches the graph and the
    /// configured k; both mismatches are fatal at load.
    pub fn load_from<R: std::io::Read>(
        reader: &mut R,
        graph: &Graph,
        config: &GenotyperConfig,
    ) -> Result<Self, IndexError> {
        let mut magic = [0_u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(IndexError::BadMagic);
        }
        let version = ser::read_u32(reader)?;
        if version != INDEX_VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }

        let k = ser::read_u32(reader)? as usize;
        if k != config.k {
            return Err(IndexError::KmerSizeMismatch { index_k: k, expected: config.k });
        }
        let mut contig_digest = [0_u8; 32];
        reader.read_exact(&mut contig_digest)?;
        if contig_digest != graph.contigs().digest() {
            return Err(IndexError::ContigChecksumMismatch);
        }

        let entry_count = ser::read_u64(reader)? as usize;
        let mut hamming0: FxHashMap<u64, Vec<KmerLabel>> = FxHashMap::default();
        for _ in 0..entry_count {
            let key = ser::read_u64(reader)?;
            let label_count = ser::read_u32(reader)? as usize;
            let mut labels = Vec::with_capacity(label_count);
            for _ in 0..label_count {
                let start_index = ser::read_u32(reader)?;
                let end_index = ser::read_u32(reader)?;
                let variant_order = ser::read_u32(reader)?;
                let variant_num = ser::read_u16(reader)?;
                labels.push(KmerLabel::new(start_index, end_index, variant_order, variant_num));
            }
            hamming0.insert(key, labels);
        }

        let empty_key = choose_empty_key(&hamming0);
        Ok(Self {
            k,
            contig_digest,
            empty_key,
            max_index_labels: config.max_index_labels,
            hamming0,
            hamming1: FxHashMap::default(),
        })
    }
}

/// The reserved empty key: the first u64 not used by any stored k-mer
fn choose_empty_key(hamming0: &FxHashMap<u64, Vec<KmerLabel>>) -> u64 {
    (0_u64..).find(|key| !hamming0.contains_key(key)).expect("u64 space cannot be exhausted")
}
