
use log::debug;

use crate::data_types::contigs::{Contig, ContigTable};
use crate::data_types::records::VarRecord;
use crate::data_types::region::GenomicRegion;
use crate::graph::node::{RefNode, VarNode};
use crate::graph::variation_graph::{Graph, GraphError};
use crate::util::sequence::sv_escape;

/// Builds the variation graph for one region from a reference slice and
/// variant records sorted by position.
///
/// Records overlapping each other in the reference are collapsed into one
/// bubble whose alternate alleles enumerate the combinations; records not
/// fully contained in the region are dropped. The emitted node arrays obey
/// the alternating RefNode/VarNode layout, with the reference allele stored
/// as the first variant node of every bubble.
///
/// # Errors
/// * if the region names an unknown contig or runs past its end
/// * if the reference slice length disagrees with the region
/// * if a variant record runs past the contig end
/// * if the assembled graph fails its structural self-checks
pub fn build_graph(
    reference: &[u8],
    records: Vec<VarRecord>,
    region: GenomicRegion,
    contigs: Vec<Contig>,
) -> Result<Graph, GraphError> {
    build_graph_with_config(reference, records, region, contigs, &crate::config::GenotyperConfig::default())
}

/// [`build_graph`] with explicit options. With `add_all_variants` set,
/// overlapping records keep their own alleles verbatim instead of also
/// enumerating combination alleles.
pub fn build_graph_with_config(
    reference: &[u8],
    records: Vec<VarRecord>,
    region: GenomicRegion,
    contigs: Vec<Contig>,
    config: &crate::config::GenotyperConfig,
) -> Result<Graph, GraphError> {
    let table = ContigTable::new(contigs);
    let begin_abs = table.absolute_position(region.chrom(), region.begin())?;
    table.absolute_position(region.chrom(), region.end())?;
    if reference.len() != region.len() as usize {
        return Err(GraphError::ReferenceLengthMismatch {
            expected: region.len(),
            actual: reference.len() as u32,
        });
    }

    // orders are absolute positions plus one, keeping zero reserved
    let base_order = begin_abs + 1;

    let mut kept: Vec<VarRecord> = vec![];
    for record in records {
        // a record running past the contig end is malformed input
        table.absolute_position(region.chrom(), record.end())?;
        if !region.contains_span(record.position(), record.ref_len()) {
            debug!(
                "dropping variant record at {}:{} that is not fully inside {region}",
                region.chrom(), record.position()
            );
            continue;
        }
        kept.push(record);
    }

    let merged = merge_overlapping_records(kept, reference, region.begin(), !config.add_all_variants)?;

    let mut graph = Graph {
        contigs: table,
        reference_offset: base_order,
        region,
        ref_nodes: vec![],
        var_nodes: vec![],
        svs: vec![],
        ref_reach_poses: vec![],
        actual_poses: vec![],
        ref_reach_to_special: Default::default(),
        special_vars: vec![],
    };

    let mut cursor = graph.region.begin();
    for record in merged {
        let node_rel = (cursor - graph.region.begin()) as usize;
        let record_rel = (record.position() - graph.region.begin()) as usize;
        let backbone = reference[node_rel..record_rel].to_vec();

        let first_var = graph.var_nodes.len() as u32;
        let bubble_order = base_order + record.position() - graph.region.begin();
        let out_ref = (graph.ref_nodes.len() + 1) as u32;

        // reference allele first, then the alternates in input order
        graph.var_nodes.push(VarNode::new(bubble_order, record.ref_allele().to_vec(), out_ref));
        for alt in record.alt_alleles() {
            let mut dna = alt.clone();
            if let Some(sv) = record.sv() {
                let id = graph.svs.len() as u32;
                graph.svs.push(sv.clone());
                dna.extend(sv_escape(id));
            }
            graph.var_nodes.push(VarNode::new(bubble_order, dna, out_ref));
        }

        let allele_count = (graph.var_nodes.len() as u32 - first_var) as usize;
        let out_vars = (first_var..first_var + allele_count as u32).collect();
        graph.ref_nodes.push(RefNode::new(base_order + cursor - graph.region.begin(), backbone, out_vars));
        cursor = record.end();
    }

    // terminal ref node, possibly empty, always without successors
    let node_rel = (cursor - graph.region.begin()) as usize;
    graph.ref_nodes.push(RefNode::new(
        base_order + cursor - graph.region.begin(),
        reference[node_rel..].to_vec(),
        vec![],
    ));

    graph.create_special_positions();
    graph.check()?;
    Ok(graph)
}

/// Collapses runs of mutually overlapping records into single records whose
/// alleles are left-aligned over the union span. Fully overlapping records
/// merge their allele sets; partial overlaps additionally contribute the
/// combination alleles where both records substitute cleanly.
fn merge_overlapping_records(
    records: Vec<VarRecord>,
    reference: &[u8],
    region_begin: u32,
    combine_alleles: bool,
) -> Result<Vec<VarRecord>, GraphError> {
    let mut merged: Vec<VarRecord> = vec![];
    for record in records {
        match merged.last() {
            Some(last) if record.position() < last.end() => {
                let combined = merge_two_records(
                    merged.pop().expect("checked non-empty"),
                    record,
                    reference,
                    region_begin,
                    combine_alleles,
                )?;
                merged.push(combined);
            }
            _ => merged.push(record),
        }
    }
    Ok(merged)
}

fn merge_two_records(
    a: VarRecord,
    b: VarRecord,
    reference: &[u8],
    region_begin: u32,
    combine_alleles: bool,
) -> Result<VarRecord, GraphError> {
    debug!("collapsing overlapping records at {} and {}", a.position(), b.position());
    let union_start = a.position();
    let union_end = a.end().max(b.end());
    let rel = |pos: u32| (pos - region_begin) as usize;
    let union_ref = reference[rel(union_start)..rel(union_end)].to_vec();

    let extend = |record: &VarRecord, allele: &[u8]| -> Vec<u8> {
        let mut extended = union_ref[..rel(record.position()) - rel(union_start)].to_vec();
        extended.extend_from_slice(allele);
        extended.extend_from_slice(&union_ref[rel(record.end()) - rel(union_start)..]);
        extended
    };

    let mut alts: Vec<Vec<u8>> = vec![];
    let push_unique = |allele: Vec<u8>, alts: &mut Vec<Vec<u8>>| {
        if allele != union_ref && !alts.contains(&allele) {
            alts.push(allele);
        }
    };

    for alt in a.alt_alleles() {
        push_unique(extend(&a, alt), &mut alts);
    }
    for alt in b.alt_alleles() {
        push_unique(extend(&b, alt), &mut alts);
    }

    // combination alleles: apply b inside each substitution-like allele of a
    if combine_alleles && b.end() <= a.end() {
        for a_alt in a.alt_alleles() {
            if a_alt.len() as u32 != a.ref_len() {
                continue;
            }
            for b_alt in b.alt_alleles() {
                let mut combo = extend(&a, a_alt);
                let from = rel(b.position()) - rel(union_start);
                let to = from + b.ref_len() as usize;
                combo.splice(from..to, b_alt.iter().copied());
                push_unique(combo, &mut alts);
            }
        }
    }

    let mut merged = VarRecord::new(union_start, union_ref, alts)?;
    if let Some(sv) = a.sv().or(b.sv()) {
        merged = VarRecord::new_sv(
            merged.position(),
            merged.ref_allele().to_vec(),
            merged.alt_alleles()[0].clone(),
            sv.clone(),
        )?;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::records::{SvKind, SvRecord};

    const CHR1_REF: &[u8] = b"AGGTTTCCCCAGGTTTCCCCAGGTTTCCCCAGGTTTACCCAGGTTTCCCCAGGTTTCCCCTTTGGA";
    const CHR2_REF: &[u8] = b"CCCCAGGTTTCCCCAGGTTTCCCCAGGTTTCCCCAGGTTTCCCCAGGTTTCCCCAGGTTTGGACCC";
    const CHR3_REF: &[u8] = b"AAAACAAAATAAAACAAAATAAAAGAAAACAAAATAAAACAAAATAAAAGAAAACATTATAAAACA";

    fn contig_table() -> Vec<Contig> {
        vec![
            Contig::new("chr1".to_string(), 66),
            Contig::new("chr2".to_string(), 66),
            Contig::new("chr3".to_string(), 66),
        ]
    }

    #[test]
    fn test_snp_bubble_chr1() {
        let records = vec![VarRecord::new(36, b"A".to_vec(), vec![b"C".to_vec()]).unwrap()];
        let region = GenomicRegion::new(0, "chr1".to_string(), 0, 66);
        let graph = build_graph(CHR1_REF, records, region, contig_table()).unwrap();

        assert_eq!(graph.ref_nodes().len(), 2);
        assert_eq!(graph.var_nodes().len(), 2);

        // connectivity
        assert_eq!(graph.ref_nodes()[0].out_degree(), 2);
        assert_eq!(graph.ref_nodes()[0].var_index(0), 0);
        assert_eq!(graph.ref_nodes()[0].var_index(1), 1);
        assert_eq!(graph.var_nodes()[0].out_ref_index(), 1);
        assert_eq!(graph.var_nodes()[1].out_ref_index(), 1);
        assert_eq!(graph.ref_nodes()[1].out_degree(), 0);

        // orders: absolute position + 1
        assert_eq!(graph.ref_nodes()[0].order(), 1);
        assert_eq!(graph.var_nodes()[0].order(), 37);
        assert_eq!(graph.var_nodes()[1].order(), 37);
        assert_eq!(graph.ref_nodes()[1].order(), 38);

        // labels
        assert_eq!(graph.ref_nodes()[0].dna(), b"AGGTTTCCCCAGGTTTCCCCAGGTTTCCCCAGGTTT");
        assert_eq!(graph.var_nodes()[0].dna(), b"A");
        assert_eq!(graph.var_nodes()[1].dna(), b"C");
        assert_eq!(graph.ref_nodes()[1].dna(), b"CCCAGGTTTCCCCAGGTTTCCCCTTTGGA");
    }

    #[test]
    fn test_adjacent_snps_chr2() {
        // adjacent SNPs touch but do not overlap: two bubbles separated by
        // an empty backbone node
        let records = vec![
            VarRecord::new(1, b"C".to_vec(), vec![b"A".to_vec()]).unwrap(),
            VarRecord::new(2, b"C".to_vec(), vec![b"A".to_vec()]).unwrap(),
        ];
        let region = GenomicRegion::new(1, "chr2".to_string(), 0, 66);
        let graph = build_graph(CHR2_REF, records, region, contig_table()).unwrap();

        assert_eq!(graph.ref_nodes().len(), 3);
        assert_eq!(graph.var_nodes().len(), 4);

        assert_eq!(graph.ref_nodes()[0].var_index(0), 0);
        assert_eq!(graph.ref_nodes()[0].var_index(1), 1);
        assert_eq!(graph.ref_nodes()[1].var_index(0), 2);
        assert_eq!(graph.ref_nodes()[1].var_index(1), 3);
        assert_eq!(graph.var_nodes()[0].out_ref_index(), 1);
        assert_eq!(graph.var_nodes()[2].out_ref_index(), 2);
        assert_eq!(graph.ref_nodes()[2].out_degree(), 0);

        let offset = 66;
        assert_eq!(graph.ref_nodes()[0].order(), offset + 1);
        assert_eq!(graph.var_nodes()[0].order(), offset + 2);
        assert_eq!(graph.ref_nodes()[1].order(), offset + 3);
        assert_eq!(graph.var_nodes()[2].order(), offset + 3);
        assert_eq!(graph.ref_nodes()[2].order(), offset + 4);

        assert_eq!(graph.ref_nodes()[0].dna(), b"C");
        assert_eq!(graph.var_nodes()[0].dna(), b"C");
        assert_eq!(graph.var_nodes()[1].dna(), b"A");
        assert_eq!(graph.ref_nodes()[1].dna(), b"");
        assert_eq!(graph.var_nodes()[2].dna(), b"C");
        assert_eq!(graph.var_nodes()[3].dna(), b"A");
        assert_eq!(
            graph.ref_nodes()[2].dna(),
            b"CAGGTTTCCCCAGGTTTCCCCAGGTTTCCCCAGGTTTCCCCAGGTTTCCCCAGGTTTGGACCC"
        );

        // the spanned haplotypes across both bubbles enumerate CC/CA/AC/AA
        let orders = graph.var_orders_in(offset + 2, offset + 3);
        assert_eq!(orders, vec![offset + 2, offset + 3]);
    }

    #[test]
    fn test_multi_allelic_indel_chr3() {
        let records = vec![
            VarRecord::new(30, b"A".to_vec(), vec![b"G".to_vec(), b"GA".to_vec()]).unwrap(),
        ];
        let region = GenomicRegion::new(2, "chr3".to_string(), 0, 66);
        let graph = build_graph(CHR3_REF, records, region, contig_table()).unwrap();

        assert_eq!(graph.ref_nodes().len(), 2);
        assert_eq!(graph.var_nodes().len(), 3);

        let offset = 132;
        assert_eq!(graph.ref_nodes()[0].order(), offset + 1);
        assert_eq!(graph.var_nodes()[0].order(), offset + 31);
        assert_eq!(graph.ref_nodes()[1].order(), offset + 32);

        assert_eq!(graph.ref_nodes()[0].dna(), b"AAAACAAAATAAAACAAAATAAAAGAAAAC");
        assert_eq!(graph.var_nodes()[0].dna(), b"A");
        assert_eq!(graph.var_nodes()[1].dna(), b"G");
        assert_eq!(graph.var_nodes()[2].dna(), b"GA");
        assert_eq!(graph.ref_nodes()[1].dna(), b"AAATAAAACAAAATAAAAGAAAACATTATAAAACA");

        // the insertion registers one special position
        assert_eq!(graph.actual_poses(), &[offset + 32]);
        assert_eq!(graph.ref_reach_poses(), &[offset + 31]);
        assert_eq!(graph.ref_reach_to_special().len(), 1);
        assert!(graph.ref_reach_to_special().contains_key(&(offset + 31)));
    }

    #[test]
    fn test_record_outside_region_dropped() {
        // only the second indel is fully inside the clipped region
        let reference: Vec<u8> = [
            b"TGCAAATCTC".as_slice(),
            b"ATATATATATATATATATATATATATAT",
            b"ATATATATTTTTTTTTT",
        ].concat();
        let len = reference.len() as u32;
        let rec2_pos = len - 17;

        // the first record runs one base past the region and is dropped
        let mut long_ref = reference[30..].to_vec();
        long_ref.push(b'T');
        let records = vec![
            VarRecord::new(30, long_ref, vec![b"A".to_vec()]).unwrap(),
            VarRecord::new(rec2_pos, reference[rec2_pos as usize..].to_vec(), vec![b"A".to_vec()]).unwrap(),
        ];
        let contigs = vec![Contig::new("chr8".to_string(), 80)];
        let region = GenomicRegion::new(0, "chr8".to_string(), 0, len);
        let graph = build_graph(&reference, records, region, contigs).unwrap();

        assert_eq!(graph.ref_nodes().len(), 2);
        assert_eq!(graph.var_nodes().len(), 2);
        assert_eq!(graph.var_nodes()[0].order(), rec2_pos + 1);
        assert_eq!(graph.var_nodes()[0].dna(), &reference[rec2_pos as usize..]);
        assert_eq!(graph.var_nodes()[1].dna(), b"A");
        assert_eq!(graph.ref_nodes()[1].dna(), b"");
        assert_eq!(graph.actual_poses().len(), 0);
    }

    #[test]
    fn test_overlapping_snps_collapse() {
        // two records at the same position fold into one multi-allelic bubble
        let records = vec![
            VarRecord::new(36, b"A".to_vec(), vec![b"C".to_vec()]).unwrap(),
            VarRecord::new(36, b"A".to_vec(), vec![b"G".to_vec()]).unwrap(),
        ];
        let region = GenomicRegion::new(0, "chr1".to_string(), 0, 66);
        let graph = build_graph(CHR1_REF, records, region, contig_table()).unwrap();

        assert_eq!(graph.ref_nodes().len(), 2);
        assert_eq!(graph.var_nodes().len(), 3);
        assert_eq!(graph.var_nodes()[0].dna(), b"A");
        assert_eq!(graph.var_nodes()[1].dna(), b"C");
        assert_eq!(graph.var_nodes()[2].dna(), b"G");
    }

    #[test]
    fn test_overlapping_indel_and_snp() {
        // a deletion spanning a SNP: union span alleles plus the clean
        // substitution combination
        let records = vec![
            VarRecord::new(10, b"AGG".to_vec(), vec![b"A".to_vec(), b"TGG".to_vec()]).unwrap(),
            VarRecord::new(11, b"G".to_vec(), vec![b"C".to_vec()]).unwrap(),
        ];
        let region = GenomicRegion::new(0, "chr1".to_string(), 0, 66);
        let graph = build_graph(CHR1_REF, records, region, contig_table()).unwrap();

        assert_eq!(graph.ref_nodes().len(), 2);
        let alleles: Vec<&[u8]> = graph.var_nodes().iter().map(|v| v.dna()).collect();
        assert_eq!(alleles[0], b"AGG");
        assert!(alleles.contains(&&b"A"[..]));
        assert!(alleles.contains(&&b"TGG"[..]));
        assert!(alleles.contains(&&b"ACG"[..]));
        assert!(alleles.contains(&&b"TCG"[..]));
    }

    #[test]
    fn test_add_all_variants_skips_combinations() {
        let records = vec![
            VarRecord::new(10, b"AGG".to_vec(), vec![b"A".to_vec(), b"TGG".to_vec()]).unwrap(),
            VarRecord::new(11, b"G".to_vec(), vec![b"C".to_vec()]).unwrap(),
        ];
        let region = GenomicRegion::new(0, "chr1".to_string(), 0, 66);
        let config = crate::config::GenotyperConfigBuilder::default()
            .add_all_variants(true)
            .build()
            .unwrap();
        let graph =
            build_graph_with_config(CHR1_REF, records, region, contig_table(), &config).unwrap();

        let alleles: Vec<&[u8]> = graph.var_nodes().iter().map(|v| v.dna()).collect();
        assert!(alleles.contains(&&b"ACG"[..]));
        // no synthesized combination alleles in this mode
        assert!(!alleles.contains(&&b"TCG"[..]));
    }

    #[test]
    fn test_sv_record_inlines_escape() {
        let sv = SvRecord { kind: SvKind::Deletion, size: 500, sequence: vec![] };
        let records = vec![
            VarRecord::new_sv(36, b"A".to_vec(), b"A".to_vec(), sv).unwrap(),
        ];
        let region = GenomicRegion::new(0, "chr1".to_string(), 0, 66);
        let graph = build_graph(CHR1_REF, records, region, contig_table()).unwrap();

        assert_eq!(graph.svs().len(), 1);
        assert_eq!(graph.var_nodes()[1].dna(), b"A<SV:0000000>");
        // the escape counts as overhang, so special positions exist
        assert!(!graph.actual_poses().is_empty());
    }

    #[test]
    fn test_unknown_contig_is_fatal() {
        let records = vec![VarRecord::new(36, b"A".to_vec(), vec![b"C".to_vec()]).unwrap()];
        let region = GenomicRegion::new(0, "chr9".to_string(), 0, 66);
        let result = build_graph(CHR1_REF, records, region, contig_table());
        assert!(matches!(result, Err(GraphError::Coordinate(_))));
    }

    #[test]
    fn test_record_past_contig_end_is_fatal() {
        let records = vec![VarRecord::new(64, b"GGAT".to_vec(), vec![b"G".to_vec()]).unwrap()];
        let region = GenomicRegion::new(0, "chr1".to_string(), 0, 66);
        let result = build_graph(CHR1_REF, records, region, contig_table());
        assert!(matches!(result, Err(GraphError::Coordinate(_))));
    }

    #[test]
    fn test_reference_length_mismatch() {
        let region = GenomicRegion::new(0, "chr1".to_string(), 0, 60);
        let result = build_graph(CHR1_REF, vec![], region, contig_table());
        assert!(matches!(result, Err(GraphError::ReferenceLengthMismatch { .. })));
    }
}
