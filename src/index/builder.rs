
use log::warn;

use crate::graph::variation_graph::{Graph, Location, NodeSite};
use crate::index::kmer::{encode_kmer, KmerLabel};

/// Bound on the spellable paths enumerated from one start location; a start
/// inside a dense cluster of bubbles is truncated rather than allowed to
/// explode combinatorially.
const MAX_PATHS_PER_START: usize = 256;

/// Enumerates every k-length walk from every graph location and returns the
/// (key, label) pairs to index. A walk crossing several bubbles yields one
/// label per bubble; windows containing N (or SV escape bytes) are skipped.
pub fn build_labels(graph: &Graph, k: usize) -> Vec<(u64, KmerLabel)> {
    let mut out = vec![];
    for i in 0..graph.ref_nodes().len() {
        for offset in 0..graph.ref_nodes()[i].dna().len() {
            let start = Location::new(NodeSite::Ref(i as u32), offset as u32);
            spell_from(graph, start, k, vec![], &mut out);
        }
    }
    for v in 0..graph.var_nodes().len() {
        let order = graph.var_nodes()[v].order();
        let num = graph.variant_num_of(v as u32);
        for offset in 0..graph.var_nodes()[v].dna().len() {
            let start = Location::new(NodeSite::Var(v as u32), offset as u32);
            spell_from(graph, start, k, vec![(order, num)], &mut out);
        }
    }
    out
}

fn spell_from(
    graph: &Graph,
    start: Location,
    k: usize,
    seed_vars: Vec<(u32, u16)>,
    out: &mut Vec<(u64, KmerLabel)>,
) {
    struct Partial {
        loc: Location,
        bases: Vec<u8>,
        vars: Vec<(u32, u16)>,
    }

    let mut stack = vec![Partial { loc: start, bases: Vec::with_capacity(k), vars: seed_vars }];
    let mut spelled = 0_usize;

    while let Some(mut partial) = stack.pop() {
        loop {
            partial.bases.push(graph.base_at(partial.loc));
            if partial.bases.len() == k {
                spelled += 1;
                if let Some(key) = encode_kmer(&partial.bases) {
                    let start_pos = graph.absolute_of(start);
                    let end_pos = graph.absolute_of(partial.loc);
                    if partial.vars.is_empty() {
                        out.push((key, KmerLabel::reference(start_pos, end_pos)));
                    } else {
                        for &(order, num) in &partial.vars {
                            out.push((key, KmerLabel::new(start_pos, end_pos, order, num)));
                        }
                    }
                }
                break;
            }

            let mut nexts = graph.step_right(partial.loc);
            match nexts.len() {
                0 => break,
                1 => {
                    let (loc, tags) = nexts.pop().expect("length checked");
                    partial.loc = loc;
                    partial.vars.extend(tags);
                }
                _ => {
                    for (loc, tags) in nexts {
                        let mut fork = Partial {
                            loc,
                            bases: partial.bases.clone(),
                            vars: partial.vars.clone(),
                        };
                        fork.vars.extend(tags);
                        stack.push(fork);
                    }
                    break;
                }
            }
        }

        if spelled > MAX_PATHS_PER_START {
            warn!(
                "kmer enumeration truncated after {MAX_PATHS_PER_START} paths from one location"
            );
            break;
        }
    }
}
