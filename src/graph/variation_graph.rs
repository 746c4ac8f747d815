
use log::debug;
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::data_types::contigs::ContigTable;
use crate::data_types::records::{SvKind, SvRecord};
use crate::data_types::region::GenomicRegion;
use crate::graph::genotype::Genotype;
use crate::graph::haplotype::Haplotype;
use crate::graph::node::{RefNode, VarNode};
use crate::typer::path::Path;
use crate::util::sequence;
use crate::util::serialize as ser;

/// First synthetic absolute position; everything at or above this value is a
/// special position introduced by an insertion.
pub const SPECIAL_START: u32 = 0xD000_0000;

/// Bound on the number of DFS states one walk may expand; a read that forks
/// past this is abandoned rather than allowed to run away.
const MAX_WALK_STATES: usize = 10_000;

const GRAPH_MAGIC: &[u8; 4] = b"BLBG";
const GRAPH_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    #[error(transparent)]
    Coordinate(#[from] crate::data_types::contigs::CoordinateError),
    #[error(transparent)]
    Record(#[from] crate::data_types::records::RecordError),
    #[error("reference slice is {actual} bases but the region spans {expected}")]
    ReferenceLengthMismatch { expected: u32, actual: u32 },
    #[error("node at order {order} contains invalid byte {byte:#04x}")]
    InvalidBase { order: u32, byte: u8 },
    #[error("bubble at order {order} has an empty reference allele")]
    EmptyBubbleRefAllele { order: u32 },
    #[error("node orders are not increasing at order {order}")]
    DecreasingOrder { order: u32 },
    #[error("node orders disagree with the reference layout at order {order}")]
    OrderMismatch { order: u32 },
    #[error("bad magic bytes; not a serialized graph")]
    BadMagic,
    #[error("unsupported graph version {0}")]
    UnsupportedVersion(u32),
    #[error("serialized SV record has unknown kind {0}")]
    UnknownSvKind(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which node array a graph position lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeSite {
    Ref(u32),
    Var(u32),
}

/// A graph position: a node plus an offset into its DNA
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub site: NodeSite,
    pub offset: u32,
}

impl Location {
    pub fn new(site: NodeSite, offset: u32) -> Self {
        Self { site, offset }
    }
}

/// The outcome of one DFS walk from a seed location: how many pattern bases
/// were consumed, the graph position of the last matched base, the
/// mismatches spent, and the bubbles crossed with the allele taken.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkExtension {
    pub matched: u32,
    pub end_pos: u32,
    pub mismatches: u16,
    pub vars: Vec<(u32, u16)>,
}

/// The variation graph of one region: an ordered reference backbone
/// interleaved with variant bubbles. Immutable once built; all genotyping
/// reads it through shared references.
#[derive(Clone, Debug)]
pub struct Graph {
    pub(crate) contigs: ContigTable,
    pub(crate) region: GenomicRegion,
    /// order of the first backbone base of the region
    pub(crate) reference_offset: u32,
    pub(crate) ref_nodes: Vec<RefNode>,
    pub(crate) var_nodes: Vec<VarNode>,
    pub(crate) svs: Vec<SvRecord>,
    pub(crate) ref_reach_poses: Vec<u32>,
    pub(crate) actual_poses: Vec<u32>,
    pub(crate) ref_reach_to_special: FxHashMap<u32, Vec<u32>>,
    /// owning var node of each special position; rebuilt from the nodes
    pub(crate) special_vars: Vec<u32>,
}

impl Graph {
    pub fn contigs(&self) -> &ContigTable {
        &self.contigs
    }

    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }

    pub fn reference_offset(&self) -> u32 {
        self.reference_offset
    }

    pub fn ref_nodes(&self) -> &[RefNode] {
        &self.ref_nodes
    }

    pub fn var_nodes(&self) -> &[VarNode] {
        &self.var_nodes
    }

    pub fn svs(&self) -> &[SvRecord] {
        &self.svs
    }

    pub fn size(&self) -> usize {
        self.ref_nodes.len() + self.var_nodes.len()
    }

    pub fn ref_reach_poses(&self) -> &[u32] {
        &self.ref_reach_poses
    }

    pub fn actual_poses(&self) -> &[u32] {
        &self.actual_poses
    }

    pub fn ref_reach_to_special(&self) -> &FxHashMap<u32, Vec<u32>> {
        &self.ref_reach_to_special
    }

    /*********************
     * BUBBLE NAVIGATION *
     *********************/

    /// The bubble opened by ref node `ref_index`, if any
    pub fn genotype_of_ref(&self, ref_index: usize) -> Option<Genotype> {
        let node = &self.ref_nodes[ref_index];
        if node.out_vars.is_empty() {
            return None;
        }
        Some(Genotype::new(node.end_order(), node.out_vars[0], node.out_vars.len() as u16))
    }

    /// All bubbles, ordered by variant order
    pub fn genotypes(&self) -> Vec<Genotype> {
        (0..self.ref_nodes.len()).filter_map(|i| self.genotype_of_ref(i)).collect()
    }

    /// Index of the first var node of the bubble containing `var_index`
    pub fn first_var_of_bubble(&self, var_index: u32) -> u32 {
        let order = self.var_nodes[var_index as usize].order;
        self.var_nodes.partition_point(|n| n.order < order) as u32
    }

    /// Allele number of a var node within its bubble; 0 is the reference
    pub fn variant_num_of(&self, var_index: u32) -> u16 {
        (var_index - self.first_var_of_bubble(var_index)) as u16
    }

    /// Reference span of the bubble containing `var_index`
    fn ref_span_of_var(&self, var_index: u32) -> u32 {
        let first = self.first_var_of_bubble(var_index);
        self.var_nodes[first as usize].dna.len() as u32
    }

    /// The bubble whose variant order equals `order`, as a ref-node index
    fn ref_index_of_bubble_order(&self, order: u32) -> Option<usize> {
        let i = self.ref_nodes.partition_point(|r| r.end_order() < order);
        if i < self.ref_nodes.len()
            && self.ref_nodes[i].end_order() == order
            && !self.ref_nodes[i].out_vars.is_empty()
        {
            Some(i)
        } else {
            None
        }
    }

    /// Allele sequences of a bubble, reference allele first
    pub fn allele_sequences_of(&self, gt: &Genotype) -> Vec<Vec<u8>> {
        (0..gt.allele_count())
            .map(|num| self.var_nodes[gt.var_index(num) as usize].dna.clone())
            .collect()
    }

    /// Variant orders of all bubbles intersecting `[start, end]`
    pub fn var_orders_in(&self, start: u32, end: u32) -> Vec<u32> {
        self.genotypes()
            .into_iter()
            .map(|gt| gt.order())
            .filter(|&order| order >= start && order <= end)
            .collect()
    }

    /*********************
     * SPECIAL POSITIONS *
     *********************/

    pub fn is_special_pos(&self, pos: u32) -> bool {
        pos >= SPECIAL_START && ((pos - SPECIAL_START) as usize) < self.actual_poses.len()
    }

    /// The synthetic absolute position of `pos` (identity for normal ones)
    pub fn actual_pos(&self, pos: u32) -> u32 {
        if self.is_special_pos(pos) {
            self.actual_poses[(pos - SPECIAL_START) as usize]
        } else {
            pos
        }
    }

    /// The last backbone position reachable from `pos`
    pub fn ref_reach_pos(&self, pos: u32) -> u32 {
        if self.is_special_pos(pos) {
            self.ref_reach_poses[(pos - SPECIAL_START) as usize]
        } else {
            pos
        }
    }

    /// Allocates the special positions for every var-node base that extends
    /// past its bubble's reference span. Called once after construction and
    /// after deserialization.
    pub(crate) fn create_special_positions(&mut self) {
        self.ref_reach_poses.clear();
        self.actual_poses.clear();
        self.ref_reach_to_special.clear();
        self.special_vars.clear();

        for v in 0..self.var_nodes.len() {
            let span = self.ref_span_of_var(v as u32);
            let dna_len = self.var_nodes[v].dna.len() as u32;
            if dna_len <= span {
                self.var_nodes[v].special_base = None;
                continue;
            }

            let order = self.var_nodes[v].order;
            let ref_reach = order + span - 1;
            self.var_nodes[v].special_base = Some(SPECIAL_START + self.actual_poses.len() as u32);
            for d in span..dna_len {
                let special = SPECIAL_START + self.actual_poses.len() as u32;
                self.actual_poses.push(order + d);
                self.ref_reach_poses.push(ref_reach);
                self.special_vars.push(v as u32);
                self.ref_reach_to_special.entry(ref_reach).or_default().push(special);
            }
        }
    }

    /***************
     * COORDINATES *
     ***************/

    /// Absolute (order-space) position of a graph location; positions inside
    /// an insertion overhang come out as special positions.
    pub fn absolute_of(&self, loc: Location) -> u32 {
        match loc.site {
            NodeSite::Ref(i) => self.ref_nodes[i as usize].order + loc.offset,
            NodeSite::Var(v) => {
                let node = &self.var_nodes[v as usize];
                let span = self.ref_span_of_var(v);
                if loc.offset < span {
                    node.order + loc.offset
                } else {
                    node.special_base.expect("overhang implies special positions") + (loc.offset - span)
                }
            }
        }
    }

    /// Graph positions corresponding to an absolute coordinate, expanded
    /// through bubbles the path hint (if any) does not forbid.
    pub fn locations_of(&self, pos: u32, hint: Option<&Path>) -> Vec<Location> {
        let mut out = vec![];

        if self.is_special_pos(pos) {
            let idx = (pos - SPECIAL_START) as usize;
            let v = self.special_vars[idx];
            let node = &self.var_nodes[v as usize];
            let span = self.ref_span_of_var(v);
            let offset = span + (pos - node.special_base.expect("special position implies base"));
            if self.hint_allows(hint, node.order, self.variant_num_of(v)) {
                out.push(Location::new(NodeSite::Var(v), offset));
            }
            return out;
        }

        if self.ref_nodes.is_empty() {
            return out;
        }

        let i = self.ref_nodes.partition_point(|r| r.order <= pos);
        if i == 0 {
            return out;
        }
        let i = i - 1;
        let node = &self.ref_nodes[i];
        if pos < node.end_order() {
            out.push(Location::new(NodeSite::Ref(i as u32), pos - node.order));
        } else if let Some(gt) = self.genotype_of_ref(i) {
            let span = self.var_nodes[gt.first_var() as usize].dna.len() as u32;
            if pos >= gt.order() && pos < gt.order() + span {
                let offset = pos - gt.order();
                for num in 0..gt.allele_count() {
                    let v = gt.var_index(num);
                    if offset < self.var_nodes[v as usize].dna.len() as u32
                        && offset < span
                        && self.hint_allows(hint, gt.order(), num)
                    {
                        out.push(Location::new(NodeSite::Var(v), offset));
                    }
                }
            }
        }
        out
    }

    fn hint_allows(&self, hint: Option<&Path>, order: u32, num: u16) -> bool {
        match hint {
            Some(path) => match path.nums_of(order) {
                Some(nums) => nums.contains(num),
                None => true,
            },
            None => true,
        }
    }

    /// All distinct backbone distances from any location in `from` to any
    /// location in `to`, sorted.
    pub fn reference_distance_between(&self, from: &[Location], to: &[Location]) -> Vec<i64> {
        let mut distances: Vec<i64> = vec![];
        for &l1 in from {
            let p1 = i64::from(self.ref_reach_pos(self.absolute_of(l1)));
            for &l2 in to {
                let p2 = i64::from(self.ref_reach_pos(self.absolute_of(l2)));
                distances.push(p2 - p1);
            }
        }
        distances.sort_unstable();
        distances.dedup();
        distances
    }

    /// Backbone base at an absolute order, for normalization left-extension
    pub fn ref_base_at(&self, order: u32) -> Option<u8> {
        self.ref_slice(order, order + 1).first().copied()
    }

    /*****************
     * GRAPH ACCESS  *
     *****************/

    /// Splices the reference backbone over the half-open order interval
    /// `[from, to)`. Bubble reference alleles fill the gaps between ref
    /// nodes.
    pub fn ref_slice(&self, from: u32, to: u32) -> Vec<u8> {
        let mut out = vec![];
        for (i, node) in self.ref_nodes.iter().enumerate() {
            push_overlap(&mut out, &node.dna, node.order, from, to);
            if let Some(gt) = self.genotype_of_ref(i) {
                let ref_allele = &self.var_nodes[gt.first_var() as usize].dna;
                push_overlap(&mut out, ref_allele, gt.order(), from, to);
            }
        }
        out
    }

    /// One random haplotype realization over `[from, to)`: every bubble
    /// whose order falls in the interval contributes a uniformly chosen
    /// allele.
    pub fn walk_random_path<R: Rng>(&self, from: u32, to: u32, rng: &mut R) -> Vec<u8> {
        let mut out = vec![];
        for (i, node) in self.ref_nodes.iter().enumerate() {
            push_overlap(&mut out, &node.dna, node.order, from, to);
            if let Some(gt) = self.genotype_of_ref(i) {
                if gt.order() >= from && gt.order() < to {
                    let num = rng.gen_range(0..gt.allele_count());
                    out.extend_from_slice(&self.var_nodes[gt.var_index(num) as usize].dna);
                }
            }
        }
        out
    }

    /// A complexity score for the neighborhood of var node `var_index`:
    /// ten times the log10 of the number of distinct paths through all
    /// bubbles within `max_distance` of it, saturating at u8::MAX.
    pub fn ten_log10_num_paths(&self, var_index: u32, max_distance: u32) -> u8 {
        let from = self.var_nodes[var_index as usize].order;
        let to = from + max_distance;
        let mut log_paths = 0.0_f64;
        for gt in self.genotypes() {
            if gt.order() >= from && gt.order() <= to {
                log_paths += f64::from(gt.allele_count()).log10();
            }
        }
        (10.0 * log_paths).round().min(255.0) as u8
    }

    /*********
     * WALKS *
     *********/

    /// Walks right from the position after `start_after`, matching `pattern`
    /// base by base with at most `max_mismatches`. Forks at every bubble; a
    /// fork that busts the budget reports the prefix it matched cleanly.
    pub fn walk_forward(&self, start_after: Location, pattern: &[u8], max_mismatches: u16) -> Vec<WalkExtension> {
        self.walk(start_after, pattern, max_mismatches, true)
    }

    /// Walks left from the position before `end_before`; `pattern` is given
    /// right-to-left (its first byte is matched closest to the seed).
    pub fn walk_backward(&self, end_before: Location, pattern: &[u8], max_mismatches: u16) -> Vec<WalkExtension> {
        self.walk(end_before, pattern, max_mismatches, false)
    }

    fn walk(&self, seed: Location, pattern: &[u8], max_mismatches: u16, forward: bool) -> Vec<WalkExtension> {
        #[derive(Clone)]
        struct State {
            loc: Location,
            idx: usize,
            mismatches: u16,
            end_pos: u32,
            vars: Vec<(u32, u16)>,
        }

        let mut results: Vec<WalkExtension> = vec![];
        if pattern.is_empty() {
            return results;
        }

        let mut emit = |st: &State| {
            if st.idx > 0 {
                results.push(WalkExtension {
                    matched: st.idx as u32,
                    end_pos: st.end_pos,
                    mismatches: st.mismatches,
                    vars: st.vars.clone(),
                });
            }
        };

        let mut stack: Vec<State> = vec![];
        let mut expanded = 0_usize;
        for (loc, tags) in self.step(seed, forward) {
            stack.push(State { loc, idx: 0, mismatches: 0, end_pos: 0, vars: tags });
        }

        while let Some(mut st) = stack.pop() {
            expanded += 1;
            if expanded > MAX_WALK_STATES {
                debug!("walk abandoned after {MAX_WALK_STATES} states");
                break;
            }

            loop {
                let base = self.base_at(st.loc);
                if base != pattern[st.idx] {
                    st.mismatches += 1;
                    if st.mismatches > max_mismatches {
                        // report the clean prefix and drop this fork
                        st.mismatches -= 1;
                        emit(&st);
                        break;
                    }
                }
                st.end_pos = self.absolute_of(st.loc);
                st.idx += 1;
                if st.idx == pattern.len() {
                    emit(&st);
                    break;
                }

                let mut nexts = self.step(st.loc, forward);
                match nexts.len() {
                    0 => {
                        // dead end at the region boundary
                        emit(&st);
                        break;
                    }
                    1 => {
                        let (loc, tags) = nexts.pop().expect("length checked");
                        st.loc = loc;
                        st.vars.extend(tags);
                    }
                    _ => {
                        for (loc, tags) in nexts {
                            let mut fork = st.clone();
                            fork.loc = loc;
                            fork.vars.extend(tags);
                            stack.push(fork);
                        }
                        break;
                    }
                }
            }
        }

        results.sort_by(|a, b| {
            (b.matched, a.mismatches, a.end_pos).cmp(&(a.matched, b.mismatches, b.end_pos))
        });
        results.dedup();
        results
    }

    /// The byte stored at a graph location
    pub(crate) fn base_at(&self, loc: Location) -> u8 {
        match loc.site {
            NodeSite::Ref(i) => self.ref_nodes[i as usize].dna[loc.offset as usize],
            NodeSite::Var(v) => self.var_nodes[v as usize].dna[loc.offset as usize],
        }
    }

    /// All locations one base to the right (or left) of `loc`, each with the
    /// bubble alleles entered along the way. Empty-DNA nodes are stepped
    /// through transparently, so one step can cross several bubbles.
    fn step(&self, loc: Location, forward: bool) -> Vec<(Location, Vec<(u32, u16)>)> {
        if forward {
            self.step_right(loc)
        } else {
            self.step_left(loc)
        }
    }

    pub(crate) fn step_right(&self, loc: Location) -> Vec<(Location, Vec<(u32, u16)>)> {
        match loc.site {
            NodeSite::Ref(i) => {
                let node = &self.ref_nodes[i as usize];
                if loc.offset + 1 < node.dna.len() as u32 {
                    return vec![(Location::new(loc.site, loc.offset + 1), vec![])];
                }
                self.enter_bubble_right(i as usize)
            }
            NodeSite::Var(v) => {
                let node = &self.var_nodes[v as usize];
                if loc.offset + 1 < node.dna.len() as u32 {
                    return vec![(Location::new(loc.site, loc.offset + 1), vec![])];
                }
                self.enter_ref_right(node.out_ref as usize)
            }
        }
    }

    /// First positions inside the bubble of ref node `i` (every allele),
    /// skipping empty alleles through to the rejoin node
    fn enter_bubble_right(&self, i: usize) -> Vec<(Location, Vec<(u32, u16)>)> {
        let Some(gt) = self.genotype_of_ref(i) else {
            return vec![];
        };
        let mut out = vec![];
        for num in 0..gt.allele_count() {
            let v = gt.var_index(num);
            let tag = (gt.order(), num);
            if self.var_nodes[v as usize].dna.is_empty() {
                for (loc, mut tags) in self.enter_ref_right(self.var_nodes[v as usize].out_ref as usize) {
                    tags.insert(0, tag);
                    out.push((loc, tags));
                }
            } else {
                out.push((Location::new(NodeSite::Var(v), 0), vec![tag]));
            }
        }
        out
    }

    /// First position of ref node `i`, skipping empty ref nodes forward
    fn enter_ref_right(&self, i: usize) -> Vec<(Location, Vec<(u32, u16)>)> {
        if self.ref_nodes[i].dna.is_empty() {
            self.enter_bubble_right(i)
        } else {
            vec![(Location::new(NodeSite::Ref(i as u32), 0), vec![])]
        }
    }

    fn step_left(&self, loc: Location) -> Vec<(Location, Vec<(u32, u16)>)> {
        match loc.site {
            NodeSite::Ref(i) => {
                if loc.offset > 0 {
                    return vec![(Location::new(loc.site, loc.offset - 1), vec![])];
                }
                self.enter_bubble_left(i as usize)
            }
            NodeSite::Var(v) => {
                if loc.offset > 0 {
                    return vec![(Location::new(loc.site, loc.offset - 1), vec![])];
                }
                let first = self.first_var_of_bubble(v);
                let order = self.var_nodes[first as usize].order;
                match self.ref_index_of_bubble_order(order) {
                    Some(i) => self.enter_ref_left(i),
                    None => vec![],
                }
            }
        }
    }

    /// Last positions inside the bubble rejoining at ref node `i`
    fn enter_bubble_left(&self, i: usize) -> Vec<(Location, Vec<(u32, u16)>)> {
        if i == 0 {
            return vec![];
        }
        let Some(gt) = self.genotype_of_ref(i - 1) else {
            return vec![];
        };
        let mut out = vec![];
        for num in 0..gt.allele_count() {
            let v = gt.var_index(num);
            let dna_len = self.var_nodes[v as usize].dna.len() as u32;
            let tag = (gt.order(), num);
            if dna_len == 0 {
                for (loc, mut tags) in self.enter_ref_left(i - 1) {
                    tags.insert(0, tag);
                    out.push((loc, tags));
                }
            } else {
                out.push((Location::new(NodeSite::Var(v), dna_len - 1), vec![tag]));
            }
        }
        out
    }

    /// Last position of ref node `i`, skipping empty ref nodes backward
    fn enter_ref_left(&self, i: usize) -> Vec<(Location, Vec<(u32, u16)>)> {
        let dna_len = self.ref_nodes[i].dna.len() as u32;
        if dna_len == 0 {
            self.enter_bubble_left(i)
        } else {
            vec![(Location::new(NodeSite::Ref(i as u32), dna_len - 1), vec![])]
        }
    }

    /// True when the span `[start, end]` (absolute, possibly special) lies
    /// entirely inside a single variant node with no backbone flank.
    pub fn is_within_bubble(&self, start: u32, end: u32) -> bool {
        let start_locs = self.locations_of(start, None);
        let end_locs = self.locations_of(end, None);
        if start_locs.is_empty() || end_locs.is_empty() {
            return false;
        }
        start_locs.iter().all(|l| matches!(l.site, NodeSite::Var(_)))
            && end_locs.iter().all(|l| matches!(l.site, NodeSite::Var(_)))
            && start_locs.iter().any(|s| end_locs.iter().any(|e| s.site == e.site))
    }

    /**************
     * HAPLOTYPES *
     **************/

    /// Clusters bubbles into haplotypes: consecutive bubbles closer than
    /// `max_read_length` type together, as long as the number of haplotype
    /// realizations stays within `max_haplotypes`.
    pub fn all_haplotypes(&self, max_read_length: u32, max_haplotypes: usize) -> Vec<Haplotype> {
        let mut haplotypes: Vec<Haplotype> = vec![];
        let mut current: Vec<Genotype> = vec![];
        let mut realizations = 1_usize;

        for gt in self.genotypes() {
            let gap_break = current.last()
                .map(|last| gt.order() - last.order() > max_read_length)
                .unwrap_or(false);
            let size_break = realizations.saturating_mul(gt.allele_count() as usize) > max_haplotypes;
            if (gap_break || size_break) && !current.is_empty() {
                haplotypes.push(Haplotype::new(std::mem::take(&mut current)));
                realizations = 1;
            }
            realizations = realizations.saturating_mul(gt.allele_count() as usize);
            current.push(gt);
        }
        if !current.is_empty() {
            haplotypes.push(Haplotype::new(current));
        }
        haplotypes
    }

    /******************
     * ERROR CHECKING *
     ******************/

    /// Runs every structural self-check
    pub fn check(&self) -> Result<(), GraphError> {
        self.check_acgtn_only()?;
        self.check_empty_variant_dna()?;
        self.check_increasing_order()?;
        self.check_order_follows_reference()
    }

    pub fn check_acgtn_only(&self) -> Result<(), GraphError> {
        for node in &self.ref_nodes {
            if let Some(&byte) = node.dna.iter().find(|&&b| !sequence::is_acgtn(b)) {
                return Err(GraphError::InvalidBase { order: node.order, byte });
            }
        }
        for node in &self.var_nodes {
            if !sequence::is_acgtn_or_sv_escape(&node.dna) {
                let byte = *node.dna.iter().find(|&&b| !sequence::is_acgtn(b)).unwrap_or(&0);
                return Err(GraphError::InvalidBase { order: node.order, byte });
            }
        }
        Ok(())
    }

    pub fn check_empty_variant_dna(&self) -> Result<(), GraphError> {
        for i in 0..self.ref_nodes.len() {
            if let Some(gt) = self.genotype_of_ref(i) {
                if self.var_nodes[gt.first_var() as usize].dna.is_empty() {
                    return Err(GraphError::EmptyBubbleRefAllele { order: gt.order() });
                }
            }
        }
        Ok(())
    }

    pub fn check_increasing_order(&self) -> Result<(), GraphError> {
        for pair in self.ref_nodes.windows(2) {
            if pair[1].order <= pair[0].order {
                return Err(GraphError::DecreasingOrder { order: pair[1].order });
            }
        }
        for pair in self.var_nodes.windows(2) {
            if pair[1].order < pair[0].order {
                return Err(GraphError::DecreasingOrder { order: pair[1].order });
            }
        }
        Ok(())
    }

    pub fn check_order_follows_reference(&self) -> Result<(), GraphError> {
        for i in 0..self.ref_nodes.len() {
            let Some(gt) = self.genotype_of_ref(i) else {
                continue;
            };
            let span = self.var_nodes[gt.first_var() as usize].dna.len() as u32;
            for num in 0..gt.allele_count() {
                let node = &self.var_nodes[gt.var_index(num) as usize];
                if node.order != gt.order() || node.out_ref as usize != i + 1 {
                    return Err(GraphError::OrderMismatch { order: gt.order() });
                }
            }
            match self.ref_nodes.get(i + 1) {
                Some(next) if next.order != gt.order() + span => {
                    return Err(GraphError::OrderMismatch { order: gt.order() });
                }
                None => return Err(GraphError::OrderMismatch { order: gt.order() }),
                _ => {}
            }
        }
        Ok(())
    }

    /*****************
     * SERIALIZATION *
     *****************/

    pub fn serialize_into<W: std::io::Write>(&self, writer: &mut W) -> Result<(), GraphError> {
        writer.write_all(GRAPH_MAGIC)?;
        ser::write_u32(writer, GRAPH_VERSION)?;
        self.contigs.serialize_into(writer)?;
        ser::write_u32(writer, self.region.rid())?;
        ser::write_string(writer, self.region.chrom())?;
        ser::write_u32(writer, self.region.begin())?;
        ser::write_u32(writer, self.region.end())?;
        ser::write_u32(writer, self.reference_offset)?;

        ser::write_u32(writer, self.ref_nodes.len() as u32)?;
        for node in &self.ref_nodes {
            ser::write_u32(writer, node.order)?;
            ser::write_bytes(writer, &node.dna)?;
            ser::write_u32(writer, node.out_vars.len() as u32)?;
            for &v in &node.out_vars {
                ser::write_u32(writer, v)?;
            }
        }

        ser::write_u32(writer, self.var_nodes.len() as u32)?;
        for node in &self.var_nodes {
            ser::write_u32(writer, node.order)?;
            ser::write_bytes(writer, &node.dna)?;
            ser::write_u32(writer, node.out_ref)?;
        }

        ser::write_u32(writer, self.svs.len() as u32)?;
        for sv in &self.svs {
            writer.write_all(&[sv.kind as u8])?;
            ser::write_u32(writer, sv.size)?;
            ser::write_bytes(writer, &sv.sequence)?;
        }

        ser::write_u32(writer, self.actual_poses.len() as u32)?;
        for i in 0..self.actual_poses.len() {
            ser::write_u32(writer, self.ref_reach_poses[i])?;
            ser::write_u32(writer, self.actual_poses[i])?;
        }
        Ok(())
    }

    pub fn load_from<R: std::io::Read>(reader: &mut R) -> Result<Self, GraphError> {
        let mut magic = [0_u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != GRAPH_MAGIC {
            return Err(GraphError::BadMagic);
        }
        let version = ser::read_u32(reader)?;
        if version != GRAPH_VERSION {
            return Err(GraphError::UnsupportedVersion(version));
        }

        let contigs = ContigTable::load_from(reader)?;
        let rid = ser::read_u32(reader)?;
        let chrom = ser::read_string(reader)?;
        let begin = ser::read_u32(reader)?;
        let end = ser::read_u32(reader)?;
        let reference_offset = ser::read_u32(reader)?;

        let ref_count = ser::read_u32(reader)? as usize;
        let mut ref_nodes = Vec::with_capacity(ref_count);
        for _ in 0..ref_count {
            let order = ser::read_u32(reader)?;
            let dna = ser::read_bytes(reader)?;
            let out_count = ser::read_u32(reader)? as usize;
            let mut out_vars = Vec::with_capacity(out_count);
            for _ in 0..out_count {
                out_vars.push(ser::read_u32(reader)?);
            }
            ref_nodes.push(RefNode::new(order, dna, out_vars));
        }

        let var_count = ser::read_u32(reader)? as usize;
        let mut var_nodes = Vec::with_capacity(var_count);
        for _ in 0..var_count {
            let order = ser::read_u32(reader)?;
            let dna = ser::read_bytes(reader)?;
            let out_ref = ser::read_u32(reader)?;
            var_nodes.push(VarNode::new(order, dna, out_ref));
        }

        let sv_count = ser::read_u32(reader)? as usize;
        let mut svs = Vec::with_capacity(sv_count);
        for _ in 0..sv_count {
            let mut kind = [0_u8; 1];
            reader.read_exact(&mut kind)?;
            let kind = SvKind::from_u8(kind[0]).ok_or(GraphError::UnknownSvKind(kind[0]))?;
            let size = ser::read_u32(reader)?;
            let sequence = ser::read_bytes(reader)?;
            svs.push(SvRecord { kind, size, sequence });
        }

        let special_count = ser::read_u32(reader)? as usize;
        for _ in 0..special_count {
            ser::read_u32(reader)?;
            ser::read_u32(reader)?;
        }

        let mut graph = Graph {
            contigs,
            region: GenomicRegion::new(rid, chrom, begin, end),
            reference_offset,
            ref_nodes,
            var_nodes,
            svs,
            ref_reach_poses: vec![],
            actual_poses: vec![],
            ref_reach_to_special: FxHashMap::default(),
            special_vars: vec![],
        };
        // the special tables are fully determined by the nodes
        graph.create_special_positions();
        Ok(graph)
    }
}

/// Appends the part of `dna` (starting at absolute order `order`) that
/// overlaps the half-open order interval `[from, to)`.
fn push_overlap(out: &mut Vec<u8>, dna: &[u8], order: u32, from: u32, to: u32) {
    let node_end = order + dna.len() as u32;
    let begin = from.max(order);
    let end = to.min(node_end);
    if begin < end {
        out.extend_from_slice(&dna[(begin - order) as usize..(end - order) as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::contigs::Contig;
    use crate::data_types::records::VarRecord;
    use crate::graph::construction::build_graph;
    use rand::SeedableRng;

    const CHR1_REF: &[u8] = b"AGGTTTCCCCAGGTTTCCCCAGGTTTCCCCAGGTTTACCCAGGTTTCCCCAGGTTTCCCCTTTGGA";
    const CHR3_REF: &[u8] = b"AAAACAAAATAAAACAAAATAAAAGAAAACAAAATAAAACAAAATAAAAGAAAACATTATAAAACA";

    fn chr1_graph() -> Graph {
        let contigs = vec![Contig::new("chr1".to_string(), 66)];
        let records = vec![VarRecord::new(36, b"A".to_vec(), vec![b"C".to_vec()]).unwrap()];
        let region = GenomicRegion::new(0, "chr1".to_string(), 0, 66);
        build_graph(CHR1_REF, records, region, contigs).unwrap()
    }

    fn chr3_graph() -> Graph {
        let contigs = vec![
            Contig::new("chr1".to_string(), 66),
            Contig::new("chr2".to_string(), 66),
            Contig::new("chr3".to_string(), 66),
        ];
        let records = vec![
            VarRecord::new(30, b"A".to_vec(), vec![b"G".to_vec(), b"GA".to_vec()]).unwrap(),
        ];
        let region = GenomicRegion::new(2, "chr3".to_string(), 0, 66);
        build_graph(CHR3_REF, records, region, contigs).unwrap()
    }

    #[test]
    fn test_ref_slice_round_trip() {
        let graph = chr1_graph();
        assert_eq!(graph.ref_slice(1, 67), CHR1_REF.to_vec());
        assert_eq!(graph.ref_slice(1, 7), b"AGGTTT".to_vec());
        // slicing across the bubble keeps the reference allele
        assert_eq!(graph.ref_slice(36, 39), b"TAC".to_vec());
    }

    #[test]
    fn test_locations_of_backbone_and_bubble() {
        let graph = chr1_graph();
        // inside the first ref node
        let locs = graph.locations_of(10, None);
        assert_eq!(locs, vec![Location::new(NodeSite::Ref(0), 9)]);
        // at the bubble both alleles match
        let locs = graph.locations_of(37, None);
        assert_eq!(locs.len(), 2);
        assert!(locs.contains(&Location::new(NodeSite::Var(0), 0)));
        assert!(locs.contains(&Location::new(NodeSite::Var(1), 0)));
    }

    #[test]
    fn test_special_positions() {
        let graph = chr3_graph();
        let offset = 132; // two 66-base contigs precede chr3
        assert_eq!(graph.actual_poses(), &[offset + 32]);
        assert_eq!(graph.ref_reach_poses(), &[offset + 31]);
        assert_eq!(graph.ref_reach_to_special().len(), 1);

        let special = SPECIAL_START;
        assert!(graph.is_special_pos(special));
        assert_eq!(graph.actual_pos(special), offset + 32);
        assert_eq!(graph.ref_reach_pos(special), offset + 31);
        // normal positions map to themselves
        assert_eq!(graph.actual_pos(offset + 5), offset + 5);

        // the overhang base of the GA allele resolves to the special pos
        let locs = graph.locations_of(special, None);
        assert_eq!(locs.len(), 1);
        assert_eq!(graph.absolute_of(locs[0]), special);
    }

    #[test]
    fn test_walk_forward_through_bubble() {
        let graph = chr1_graph();
        // seed just before the bubble, pattern takes the alt allele; the
        // reference fork busts the budget and only reports its clean prefix
        let seed = Location::new(NodeSite::Ref(0), 34);
        let results = graph.walk_forward(seed, b"TCCCC", 0);
        assert_eq!(results[0].matched, 5);
        assert_eq!(results[0].mismatches, 0);
        assert_eq!(results[0].vars, vec![(37, 1)]);

        // same seed through the reference allele
        let results = graph.walk_forward(seed, b"TACCC", 0);
        assert_eq!(results[0].matched, 5);
        assert_eq!(results[0].vars, vec![(37, 0)]);
    }

    #[test]
    fn test_walk_forward_budget() {
        let graph = chr1_graph();
        let seed = Location::new(NodeSite::Ref(0), 0);
        // one mismatch fits the budget, so the walk reaches full length
        let results = graph.walk_forward(seed, b"GGTTTCGCCA", 1);
        assert_eq!(results[0].matched, 10);
        assert_eq!(results[0].mismatches, 1);

        // with no budget the walk stops at the clean prefix
        let results = graph.walk_forward(seed, b"GGTTTCGCCA", 0);
        assert_eq!(results[0].matched, 6);
        assert_eq!(results[0].mismatches, 0);
    }

    #[test]
    fn test_walk_backward() {
        let graph = chr1_graph();
        // walk left from backbone position 10 (base index 9)
        let seed = Location::new(NodeSite::Ref(0), 9);
        // pattern right-to-left: bases 9,8,7 are C,C,C
        let results = graph.walk_backward(seed, b"CCC", 0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].matched, 3);
        assert_eq!(results[0].end_pos, 7);
    }

    #[test]
    fn test_reference_distance() {
        let graph = chr1_graph();
        let from = graph.locations_of(5, None);
        let to = graph.locations_of(60, None);
        let distances = graph.reference_distance_between(&from, &to);
        assert_eq!(distances, vec![55]);
    }

    #[test]
    fn test_ten_log10_num_paths_monotone() {
        let graph = chr3_graph();
        let near = graph.ten_log10_num_paths(0, 1);
        let far = graph.ten_log10_num_paths(0, 60);
        assert!(near <= far);
        // one tri-allelic bubble: 10 * log10(3) ~ 5
        assert_eq!(far, 5);
    }

    #[test]
    fn test_walk_random_path_realizes_haplotype() {
        let graph = chr1_graph();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let walked = graph.walk_random_path(1, 67, &mut rng);
            assert_eq!(walked.len(), 66);
            assert!(walked[36] == b'A' || walked[36] == b'C');
        }
    }

    #[test]
    fn test_serialization_round_trip() {
        let graph = chr3_graph();
        let mut buffer: Vec<u8> = vec![];
        graph.serialize_into(&mut buffer).unwrap();
        let loaded = Graph::load_from(&mut &buffer[..]).unwrap();
        assert_eq!(loaded.ref_nodes(), graph.ref_nodes());
        assert_eq!(loaded.var_nodes(), graph.var_nodes());
        assert_eq!(loaded.actual_poses(), graph.actual_poses());
        assert_eq!(loaded.region(), graph.region());
        assert!(loaded.check().is_ok());

        // byte-exact re-serialization
        let mut buffer2: Vec<u8> = vec![];
        loaded.serialize_into(&mut buffer2).unwrap();
        assert_eq!(buffer, buffer2);
    }

    #[test]
    fn test_haplotype_clustering() {
        let graph = chr3_graph();
        let haplotypes = graph.all_haplotypes(151, 64);
        assert_eq!(haplotypes.len(), 1);
        assert_eq!(haplotypes[0].gts().len(), 1);
        assert_eq!(haplotypes[0].gts()[0].allele_count(), 3);
    }
}
