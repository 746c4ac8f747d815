
/// Sentinel variant order for labels that cross no bubble; zero stays out of
/// the order space because node orders start at one.
pub const NO_VARIANT_ORDER: u32 = 0;

/// Maps a k-mer window to a graph span: the absolute positions of its first
/// and last base, plus the bubble it crosses (one label per crossed bubble).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KmerLabel {
    pub start_index: u32,
    pub end_index: u32,
    pub variant_order: u32,
    pub variant_num: u16,
}

impl KmerLabel {
    pub fn new(start_index: u32, end_index: u32, variant_order: u32, variant_num: u16) -> Self {
        Self { start_index, end_index, variant_order, variant_num }
    }

    /// A label for a walk entirely on the reference backbone
    pub fn reference(start_index: u32, end_index: u32) -> Self {
        Self::new(start_index, end_index, NO_VARIANT_ORDER, 0)
    }

    pub fn has_variant(&self) -> bool {
        self.variant_order != NO_VARIANT_ORDER
    }
}

/// 2-bit code of one base: A=00, C=01, G=10, T=11; N (and anything else)
/// disables the whole window.
fn encode_base(base: u8) -> Option<u64> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Packs a k-mer into a u64 key, first base in the lowest bits.
/// Returns None when the window contains N or is longer than 32 bases.
pub fn encode_kmer(seq: &[u8]) -> Option<u64> {
    if seq.len() > 32 {
        return None;
    }
    let mut key: u64 = 0;
    for (i, &base) in seq.iter().enumerate() {
        key |= encode_base(base)? << (2 * i);
    }
    Some(key)
}

/// Unpacks a key back into bases; the test-facing inverse of `encode_kmer`
pub fn decode_kmer(key: u64, k: usize) -> Vec<u8> {
    (0..k)
        .map(|i| match (key >> (2 * i)) & 3 {
            0 => b'A',
            1 => b'C',
            2 => b'G',
            _ => b'T',
        })
        .collect()
}

/// All 3k keys at Hamming distance one from `key`
pub fn hamming1_neighbor_keys(key: u64, k: usize) -> Vec<u64> {
    let mut neighbors = Vec::with_capacity(3 * k);
    for i in 0..k {
        for delta in 1..=3_u64 {
            neighbors.push(key ^ (delta << (2 * i)));
        }
    }
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let seq = b"ACGTACGTACGTACGTACGTACGTACGTACGT";
        let key = encode_kmer(seq).unwrap();
        assert_eq!(decode_kmer(key, 32), seq.to_vec());
    }

    #[test]
    fn test_n_disables_window() {
        assert_eq!(encode_kmer(b"ACGN"), None);
        assert_eq!(encode_kmer(b"ACGX"), None);
    }

    #[test]
    fn test_too_long_window() {
        let seq = vec![b'A'; 33];
        assert_eq!(encode_kmer(&seq), None);
    }

    #[test]
    fn test_hamming1_neighbors() {
        let key = encode_kmer(b"AAAA").unwrap();
        let neighbors = hamming1_neighbor_keys(key, 4);
        assert_eq!(neighbors.len(), 12);
        // every neighbor differs in exactly one base
        for &n in &neighbors {
            let bases = decode_kmer(n, 4);
            let diff = bases.iter().filter(|&&b| b != b'A').count();
            assert_eq!(diff, 1);
        }
        // neighbors are distinct
        let mut sorted = neighbors.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 12);
    }

    #[test]
    fn test_label_variant_sentinel() {
        let plain = KmerLabel::reference(1, 32);
        assert!(!plain.has_variant());
        let bubbled = KmerLabel::new(10, 42, 37, 1);
        assert!(bubbled.has_variant());
    }
}
