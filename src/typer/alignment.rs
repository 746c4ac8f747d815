
use log::debug;

use crate::config::GenotyperConfig;
use crate::data_types::records::{ReadPair, ReadRecord};
use crate::graph::variation_graph::Graph;
use crate::index::kmer::{encode_kmer, hamming1_neighbor_keys, KmerLabel};
use crate::index::KmerIndex;
use crate::typer::genotype_paths::{
    compare_genotype_path_pairs, compare_genotype_paths, GenotypePaths, GenotypePathsDetails,
};
use crate::typer::genotyping::RunStats;
use crate::util::sequence::reverse_complement;

/// Non-overlapping seed windows of the read at stride k-1; consecutive
/// windows share one base so their graph spans chain by position equality.
/// Windows containing N yield no key.
fn window_keys(read: &[u8], k: usize) -> Vec<Vec<u64>> {
    let mut windows = vec![];
    let mut start = 0_usize;
    while start + k <= read.len() {
        let keys = match encode_kmer(&read[start..start + k]) {
            Some(key) => vec![key],
            None => vec![],
        };
        windows.push(keys);
        start += k - 1;
    }
    windows
}

/// Hamming-1 keys per window, for the neighborhood lookup
fn window_neighbor_keys(windows: &[Vec<u64>], k: usize) -> Vec<Vec<u64>> {
    windows.iter()
        .map(|keys| keys.iter().flat_map(|&key| hamming1_neighbor_keys(key, k)).collect())
        .collect()
}

/// Seeds, chains, walks, and filters one read against the graph.
/// Returns an empty GenotypePaths when the read is skipped because its
/// rarest k-mer is too common.
fn find_genotype_paths_of_one_sequence(
    read: &[u8],
    qual: &[u8],
    mapq: u8,
    graph: &Graph,
    index: &KmerIndex,
    config: &GenotyperConfig,
    stats: &mut RunStats,
) -> GenotypePaths {
    let mut geno = GenotypePaths::new(read.to_vec(), qual.to_vec(), mapq);
    let k = config.k;
    if read.len() < k {
        return geno;
    }

    let windows = window_keys(read, k);
    let hamming0 = index.multi_get(&windows);

    // a stored key coming back empty means the label ceiling was hit
    for (keys, labels) in windows.iter().zip(hamming0.iter()) {
        if labels.is_empty() && keys.iter().any(|&key| index.contains(key)) {
            stats.label_overflows += 1;
        }
    }

    let neighbor_batch = window_neighbor_keys(&windows, k);
    let hamming1 = if index.has_hamming1() {
        index.multi_get_hamming1(&neighbor_batch)
    } else {
        index.multi_get(&neighbor_batch)
    };

    // skip reads whose best seed is hopelessly repetitive
    let min_hits = hamming0.iter().map(Vec::len).min().unwrap_or(0);
    if min_hits > config.max_unique_kmer_positions {
        debug!("skipping read: rarest k-mer has {min_hits} index hits");
        stats.skipped_common_kmers += 1;
        return geno;
    }

    let mut read_start_index = 0_u32;
    for i in 0..windows.len() {
        let read_end_index = read_start_index + (k as u32 - 1);
        geno.add_next_kmer_labels(&hamming0[i], read_start_index, read_end_index, 0);
        let hamming1_only: Vec<KmerLabel> = hamming1[i].iter()
            .filter(|label| !hamming0[i].contains(label))
            .copied()
            .collect();
        geno.add_next_kmer_labels(&hamming1_only, read_start_index, read_end_index, 1);
        read_start_index += k as u32 - 1;
    }

    geno.remove_short_paths(k);
    geno.walk_read_starts(graph, k);
    geno.walk_read_ends(graph, k);
    geno.remove_short_paths(k);
    geno.remove_paths_within_variant_node(graph);
    geno.remove_paths_with_too_many_mismatches(k);
    geno.remove_short_paths(k);
    geno
}

/// The ML insert size of one path pair: the backbone distance between the
/// leftmost mate start and the rightmost mate end that lies closest to the
/// configured optimum.
fn insert_size_of_path_pair(
    p1: &crate::typer::path::Path,
    p2: &crate::typer::path::Path,
    reverse_complement_pair: bool,
    graph: &Graph,
    optimal: i64,
) -> i64 {
    let (from, to) = if reverse_complement_pair {
        (graph.locations_of(p2.start, Some(p2)), graph.locations_of(p1.end, Some(p1)))
    } else {
        (graph.locations_of(p1.start, Some(p1)), graph.locations_of(p2.end, Some(p2)))
    };
    let mut best = i64::from(u32::MAX);
    for distance in graph.reference_distance_between(&from, &to) {
        if (distance - optimal).abs() < (best - optimal).abs() {
            best = distance;
        }
    }
    best
}

/// Records the signed ML insert size on both mates, opposite signs
fn refine_insert_size(
    genos: &mut (GenotypePaths, GenotypePaths),
    reverse_complement_pair: bool,
    graph: &Graph,
    config: &GenotyperConfig,
) {
    if genos.0.paths.is_empty() || genos.1.paths.is_empty() {
        return;
    }
    let optimal = i64::from(config.optimal_insert_size);
    let mut best = i64::from(u32::MAX);
    for p1 in &genos.0.paths {
        for p2 in &genos.1.paths {
            let distance = insert_size_of_path_pair(p1, p2, reverse_complement_pair, graph, optimal);
            if (distance - optimal).abs() < (best - optimal).abs() {
                best = distance;
            }
        }
    }
    let best = best as i32;
    if reverse_complement_pair {
        genos.0.ml_insert_size = -best;
        genos.1.ml_insert_size = best;
    } else {
        genos.0.ml_insert_size = best;
        genos.1.ml_insert_size = -best;
    }
}

/// Extra slack on top of the best pair distance when the optional
/// insert-size filter is enabled
const INSERT_SIZE_SLACK: i64 = 500;

/// The optional stricter refinement: drop paths with no partner on the
/// other mate within the slack of the best observed insert size. Off by
/// default; the upstream pipeline ships it disabled.
fn remove_distant_paths(
    genos: &mut (GenotypePaths, GenotypePaths),
    reverse_complement_pair: bool,
    graph: &Graph,
    config: &GenotyperConfig,
) {
    if genos.0.paths.is_empty() || genos.1.paths.is_empty() {
        return;
    }
    let optimal = i64::from(config.optimal_insert_size);
    let best_deviation = i64::from(genos.0.ml_insert_size.abs_diff(config.optimal_insert_size as i32));
    let cutoff = best_deviation + INSERT_SIZE_SLACK;

    let close = |p1: &crate::typer::path::Path, p2: &crate::typer::path::Path| {
        let distance = insert_size_of_path_pair(p1, p2, reverse_complement_pair, graph, optimal);
        (distance - optimal).abs() <= cutoff
    };

    let paths2 = genos.1.paths.clone();
    genos.0.paths.retain(|p1| paths2.iter().any(|p2| close(p1, p2)));
    if genos.0.paths.is_empty() {
        genos.0.clear_paths();
        genos.1.clear_paths();
        return;
    }
    let paths1 = genos.0.paths.clone();
    genos.1.paths.retain(|p2| paths1.iter().any(|p1| close(p1, p2)));
    genos.0.update_longest_path_length();
    genos.1.update_longest_path_length();
}

/// Allele co-support across the pair: when both mates cover a bubble, the
/// intersection of their allele bitsets must be non-empty.
fn support_same_path(genos: &(GenotypePaths, GenotypePaths)) -> bool {
    let explain1 = genos.0.explain_map();
    let explain2 = genos.1.explain_map();
    for (order, nums1) in &explain1 {
        if let Some(nums2) = explain2.get(order) {
            if nums1.intersection(*nums2).is_empty() {
                return false;
            }
        }
    }
    true
}

fn attach_record_flags(geno: &mut GenotypePaths, record: &ReadRecord, keep_stats: bool) {
    geno.is_first_in_pair = record.is_first_in_pair() || !record.is_paired();
    geno.is_originally_unaligned = record.is_unmapped();
    geno.is_originally_clipped = record.is_clipped();
    geno.original_pos = record.original_pos();
    if keep_stats {
        geno.details = Some(Box::new(GenotypePathsDetails {
            query_name: record.name().to_string(),
            read_group: record.read_group().unwrap_or("NA").to_string(),
            score_diff: record.score_diff(),
        }));
    }
}

/// Aligns both orientations of both mates, keeps the better orientation,
/// refines the pair by insert size and allele co-support, and drops pairs
/// where either mate has no surviving path.
pub fn align_read_pair(
    pair: &ReadPair,
    graph: &Graph,
    index: &KmerIndex,
    config: &GenotyperConfig,
    stats: &mut RunStats,
) -> Option<(GenotypePaths, GenotypePaths)> {
    let record2 = pair.second.as_ref()?;
    let record1 = &pair.first;

    let mut genos1 = (
        find_genotype_paths_of_one_sequence(
            record1.sequence(), record1.qualities(), record1.mapq(), graph, index, config, stats,
        ),
        find_genotype_paths_of_one_sequence(
            record2.sequence(), record2.qualities(), record2.mapq(), graph, index, config, stats,
        ),
    );
    refine_insert_size(&mut genos1, false, graph, config);
    if config.filter_on_insert_size {
        remove_distant_paths(&mut genos1, false, graph, config);
    }

    let rc1 = reverse_complement(record1.sequence());
    let rc2 = reverse_complement(record2.sequence());
    let mut rq1 = record1.qualities().to_vec();
    rq1.reverse();
    let mut rq2 = record2.qualities().to_vec();
    rq2.reverse();
    let mut genos2 = (
        find_genotype_paths_of_one_sequence(&rc1, &rq1, record1.mapq(), graph, index, config, stats),
        find_genotype_paths_of_one_sequence(&rc2, &rq2, record2.mapq(), graph, index, config, stats),
    );
    refine_insert_size(&mut genos2, true, graph, config);
    if config.filter_on_insert_size {
        remove_distant_paths(&mut genos2, true, graph, config);
    }

    for genos in [&mut genos1, &mut genos2] {
        genos.0.remove_fully_special_paths(graph);
        genos.0.remove_non_ref_paths_when_read_matches_ref();
        genos.1.remove_fully_special_paths(graph);
        genos.1.remove_non_ref_paths_when_read_matches_ref();
    }

    let mut chosen = match compare_genotype_path_pairs(&genos1, &genos2) {
        1 => {
            genos1.1.forward_strand = false;
            genos1
        }
        2 => {
            genos2.0.forward_strand = false;
            genos2
        }
        _ => {
            stats.unaligned_reads += 2;
            return None;
        }
    };

    if chosen.0.paths.is_empty() || chosen.1.paths.is_empty() {
        stats.unaligned_reads += 2;
        return None;
    }

    if !support_same_path(&chosen) {
        stats.inconsistent_pairs += 1;
        return None;
    }

    let keep_stats = config.keep_stats();
    attach_record_flags(&mut chosen.0, record1, keep_stats);
    attach_record_flags(&mut chosen.1, record2, keep_stats);
    chosen.1.is_first_in_pair = false;

    Some(chosen)
}

/// Aligns a single unpaired read in both orientations and keeps the better
/// one; None when neither orientation produced a surviving path.
pub fn align_unpaired_read(
    record: &ReadRecord,
    graph: &Graph,
    index: &KmerIndex,
    config: &GenotyperConfig,
    stats: &mut RunStats,
) -> Option<GenotypePaths> {
    let geno1 = find_genotype_paths_of_one_sequence(
        record.sequence(), record.qualities(), record.mapq(), graph, index, config, stats,
    );
    let rc = reverse_complement(record.sequence());
    let mut rq = record.qualities().to_vec();
    rq.reverse();
    let geno2 = find_genotype_paths_of_one_sequence(&rc, &rq, record.mapq(), graph, index, config, stats);

    let mut chosen = match compare_genotype_paths(&geno1, &geno2) {
        1 => geno1,
        2 => {
            let mut geno = geno2;
            geno.forward_strand = false;
            geno
        }
        _ => {
            stats.unaligned_reads += 1;
            return None;
        }
    };

    chosen.remove_fully_special_paths(graph);
    chosen.remove_non_ref_paths_when_read_matches_ref();
    if chosen.paths.is_empty() {
        stats.unaligned_reads += 1;
        return None;
    }

    attach_record_flags(&mut chosen, record, config.keep_stats());
    Some(chosen)
}
