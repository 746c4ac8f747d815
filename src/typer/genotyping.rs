
use anyhow::Context;
use log::{debug, info};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::config::GenotyperConfig;
use crate::data_types::records::ReadPair;
use crate::data_types::roster::SampleRoster;
use crate::data_types::variants::{SampleCall, Variant};
use crate::graph::haplotype::Haplotype;
use crate::graph::reference_depth::{GlobalReferenceDepth, ReferenceDepth};
use crate::graph::variation_graph::Graph;
use crate::index::KmerIndex;
use crate::typer::alignment::{align_read_pair, align_unpaired_read};
use crate::typer::genotype_paths::GenotypePaths;
use crate::util::json_io::{region_stats_path, save_json};
use crate::util::sequence::is_acgtn_only;

/// Distance the complexity score looks ahead from each bubble
const COMPLEXITY_DISTANCE: u32 = 60;

/// Minimum spacing between divergent columns for record break-down
const BREAK_DOWN_SPACING: usize = 2;

/// Soft-failure counters surfaced in run statistics; nothing in the read
/// loop aborts the region.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct RunStats {
    pub genotyped_reads: u64,
    pub unaligned_reads: u64,
    pub skipped_common_kmers: u64,
    pub label_overflows: u64,
    pub inconsistent_pairs: u64,
    pub skipped_haplotype_clusters: u64,
    pub reads_without_sample: u64,
}

impl RunStats {
    pub fn merge(&mut self, other: &RunStats) {
        self.genotyped_reads += other.genotyped_reads;
        self.unaligned_reads += other.unaligned_reads;
        self.skipped_common_kmers += other.skipped_common_kmers;
        self.label_overflows += other.label_overflows;
        self.inconsistent_pairs += other.inconsistent_pairs;
        self.skipped_haplotype_clusters += other.skipped_haplotype_clusters;
        self.reads_without_sample += other.reads_without_sample;
    }
}

/// The result of genotyping one region
#[derive(Debug)]
pub struct RegionOutcome {
    pub variants: Vec<Variant>,
    pub stats: RunStats,
}

/// One line of the per-read stats dump
#[derive(Clone, Debug, serde::Serialize)]
struct ReadStatsRow {
    query_name: String,
    read_group: String,
    score_diff: u32,
    ml_insert_size: i32,
    longest_path_length: u32,
    mismatches: u16,
    forward_strand: bool,
}

struct SampleResult {
    sample: usize,
    haplotypes: Vec<Haplotype>,
    depth: ReferenceDepth,
    stats: RunStats,
    read_rows: Vec<ReadStatsRow>,
}

/// Genotypes one region: aligns every read pair, refines pairs, accounts
/// depth, folds path evidence into haplotype likelihoods, and emits
/// normalized variant records.
///
/// Samples are processed in parallel; each worker owns its sample's
/// evidence and the per-sample depth commits under one short-lived mutex.
/// The `check_cancel` hook is polled between read pairs.
pub fn genotype_region(
    graph: &Graph,
    index: &KmerIndex,
    config: &GenotyperConfig,
    roster: &SampleRoster,
    read_pairs: &[ReadPair],
    check_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> anyhow::Result<RegionOutcome> {
    let mut stats = RunStats::default();

    // the explain bitsets bound how many realizations a cluster can hold
    let max_haplotypes = config.max_number_of_haplotypes
        .min(crate::data_types::allele_set::MAX_NUMBER_OF_HAPLOTYPES);
    let mut haplotypes = graph.all_haplotypes(config.max_read_length, max_haplotypes);
    let cluster_count = haplotypes.len();
    haplotypes.retain(|h| !h.has_too_many_haplotypes(max_haplotypes));
    stats.skipped_haplotype_clusters += (cluster_count - haplotypes.len()) as u64;
    for hap in haplotypes.iter_mut() {
        hap.graph_complexity_to_stats(graph, COMPLEXITY_DISTANCE);
    }

    let order_to_cluster: FxHashMap<u32, usize> = haplotypes.iter().enumerate()
        .flat_map(|(i, hap)| hap.gts().iter().map(move |gt| (gt.order(), i)))
        .collect();

    let sample_count = roster.sample_count().max(1);
    let mut by_sample: Vec<Vec<&ReadPair>> = vec![vec![]; sample_count];
    for pair in read_pairs {
        match pair.first.read_group().and_then(|rg| roster.sample_index(rg)) {
            Some(sample) => by_sample[sample].push(pair),
            None if roster.sample_count() <= 1 => by_sample[0].push(pair),
            None => stats.reads_without_sample += 1,
        }
    }

    let global_depth = GlobalReferenceDepth::new(
        graph.reference_offset(),
        graph.region().len() as usize,
        sample_count,
    );

    info!(
        "genotyping {} read pairs over {} samples in {}",
        read_pairs.len(), sample_count, graph.region()
    );

    let worker_results: Vec<anyhow::Result<SampleResult>> = by_sample
        .par_iter()
        .enumerate()
        .map(|(sample, reads)| {
            process_sample(
                sample, reads, graph, index, config,
                &haplotypes, &order_to_cluster, check_cancel,
            )
        })
        .collect();

    for hap in haplotypes.iter_mut() {
        hap.clear_and_resize_samples(sample_count, config.keep_stats());
    }

    let mut read_rows: Vec<ReadStatsRow> = vec![];
    for result in worker_results {
        let mut result = result?;
        global_depth.add_reference_depths_from(&result.depth, result.sample);
        for (ci, worker_hap) in result.haplotypes.iter_mut().enumerate() {
            haplotypes[ci].merge_var_stats_from(worker_hap);
            haplotypes[ci].set_sample(result.sample, worker_hap.take_sample(0));
        }
        stats.merge(&result.stats);
        read_rows.extend(result.read_rows);
    }

    if let Some(stats_dir) = config.stats_dir.as_ref() {
        let region = graph.region();
        let path = region_stats_path(stats_dir, region.chrom(), region.begin(), region.end());
        save_json(&read_rows, &path)
            .with_context(|| format!("Error while writing read stats for {region}"))?;
    }

    let variants = emit_variants(graph, &haplotypes, &global_depth, sample_count)?;
    Ok(RegionOutcome { variants, stats })
}

fn process_sample(
    sample: usize,
    reads: &[&ReadPair],
    graph: &Graph,
    index: &KmerIndex,
    config: &GenotyperConfig,
    haplotypes: &[Haplotype],
    order_to_cluster: &FxHashMap<u32, usize>,
    check_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> anyhow::Result<SampleResult> {
    let mut local_haps: Vec<Haplotype> = haplotypes.to_vec();
    for hap in local_haps.iter_mut() {
        hap.clear_and_resize_samples(1, config.keep_stats());
    }
    let mut depth = ReferenceDepth::new(graph.reference_offset(), graph.region().len() as usize);
    let mut stats = RunStats::default();
    let mut read_rows: Vec<ReadStatsRow> = vec![];

    for pair in reads {
        if let Some(cancel) = check_cancel {
            if cancel() {
                anyhow::bail!("genotyping cancelled in {}", graph.region());
            }
        }

        if pair.second.is_some() {
            if let Some((geno1, geno2)) = align_read_pair(pair, graph, index, config, &mut stats) {
                for geno in [&geno1, &geno2] {
                    fold_read_evidence(
                        geno, graph, &mut local_haps, order_to_cluster,
                        &mut depth, &mut read_rows,
                    );
                }
                stats.genotyped_reads += 2;
            }
        } else if let Some(geno) =
            align_unpaired_read(&pair.first, graph, index, config, &mut stats)
        {
            fold_read_evidence(
                &geno, graph, &mut local_haps, order_to_cluster,
                &mut depth, &mut read_rows,
            );
            stats.genotyped_reads += 1;
        }
    }

    Ok(SampleResult { sample, haplotypes: local_haps, depth, stats, read_rows })
}

/// Folds one aligned read into the depth tracker and every haplotype
/// cluster it touches, then clears the per-read scratch.
fn fold_read_evidence(
    geno: &GenotypePaths,
    graph: &Graph,
    local_haps: &mut [Haplotype],
    order_to_cluster: &FxHashMap<u32, usize>,
    depth: &mut ReferenceDepth,
    read_rows: &mut Vec<ReadStatsRow>,
) {
    let longest = geno.longest_path_length();
    for path in geno.paths.iter().filter(|p| p.size() == longest) {
        depth.increase_local_depth_by_one(
            graph.ref_reach_pos(path.start),
            graph.ref_reach_pos(path.end),
        );
    }
    depth.commit_local_depth();

    let mut touched: Vec<usize> = vec![];
    for (&order, &nums) in &geno.explain_map() {
        let Some(&ci) = order_to_cluster.get(&order) else {
            continue;
        };
        let hap = &mut local_haps[ci];
        let g = hap.local_gt_index(order).expect("cluster contains its own orders");
        hap.add_explanation(g, nums);
        for allele in nums.iter() {
            hap.add_coverage(g, allele);
        }
        if !touched.contains(&ci) {
            touched.push(ci);
        }
    }

    let new_pos = geno.paths.iter()
        .map(|p| graph.ref_reach_pos(p.start))
        .min()
        .unwrap_or(0);

    for ci in touched {
        let hap = &mut local_haps[ci];
        hap.explain_to_score(
            0,
            !geno.all_paths_unique(),
            geno.mapq(),
            geno.all_paths_fully_aligned(),
            geno.mismatches_of_longest(),
        );
        hap.coverage_to_gts(0, geno.is_proper_pair());
        hap.mapq_to_stats(geno.mapq());
        hap.strand_to_stats(geno.forward_strand(), geno.is_first_in_pair());
        hap.pair_to_stats(geno.is_proper_pair());
        hap.clipped_reads_to_stats(geno.all_paths_fully_aligned());
        hap.realignment_to_stats(geno.is_originally_unaligned(), geno.original_pos(), new_pos);
        hap.clear_scratch();
    }

    if let Some(details) = geno.details() {
        read_rows.push(ReadStatsRow {
            query_name: details.query_name.clone(),
            read_group: details.read_group.clone(),
            score_diff: details.score_diff,
            ml_insert_size: geno.ml_insert_size(),
            longest_path_length: geno.longest_path_length(),
            mismatches: geno.mismatches_of_longest(),
            forward_strand: geno.forward_strand(),
        });
    }
}

/// Converts the accumulated haplotype evidence into normalized variant
/// records, one per bubble (plus any break-down products).
fn emit_variants(
    graph: &Graph,
    haplotypes: &[Haplotype],
    global_depth: &GlobalReferenceDepth,
    sample_count: usize,
) -> anyhow::Result<Vec<Variant>> {
    let prev_base = |pos: u32| if pos == 0 { None } else { graph.ref_base_at(pos) };
    let mut variants: Vec<Variant> = vec![];

    for hap in haplotypes {
        for (g, gt) in hap.gts().iter().enumerate() {
            let alleles = graph.allele_sequences_of(gt);
            // SV alleles carry the inline escape, so they are not plain DNA
            let is_sv = alleles[1..].iter().any(|a| !is_acgtn_only(a));
            let ref_span_end = gt.order() + alleles[0].len() as u32 - 1;

            let mut variant = Variant::new(gt.order() - 1, alleles)?;
            for sample in 0..sample_count {
                let call = hap.sample_call_for_gt(sample, g);
                let call = if is_sv && gt.allele_count() == 2 {
                    // depth is the primary SV signal
                    let span_depth = global_depth.read_depth(gt.order(), ref_span_end, sample);
                    SampleCall::make_call_based_on_coverage(
                        span_depth.saturating_sub(call.alt_total_depth),
                        call.alt_total_depth,
                    )
                } else {
                    call
                };
                variant.add_sample_call(call)?;
            }

            let var_stats = &hap.var_stats()[g];
            variant.set_info("GC", var_stats.graph_complexity.to_string());
            variant.set_info("PP", format!("{},{}", var_stats.proper_pairs, var_stats.improper_pairs));
            variant.set_info("CR", var_stats.clipped_reads.to_string());
            variant.set_info("SB", format!(
                "{},{},{},{}",
                var_stats.forward_strand_first, var_stats.forward_strand_second,
                var_stats.reverse_strand_first, var_stats.reverse_strand_second,
            ));

            variant.normalize(&prev_base);
            debug!("emitting variant at absolute position {}", variant.abs_pos());
            variants.extend(variant.break_down(BREAK_DOWN_SPACING));
        }
    }

    variants.sort_by_key(Variant::abs_pos);
    Ok(variants)
}
