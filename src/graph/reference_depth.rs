
use std::sync::Mutex;

/// Per-sample reference depth over one region, staged per read and folded in
/// on commit so repeated spans from one read count once.
#[derive(Clone, Debug)]
pub struct ReferenceDepth {
    reference_offset: u32,
    depth: Vec<u16>,
    /// indexes staged by the current read; may contain duplicates
    local_depth: Vec<u32>,
}

impl ReferenceDepth {
    /// # Arguments
    /// * `reference_offset` - order of the first tracked position
    /// * `size` - number of tracked positions (the region length)
    pub fn new(reference_offset: u32, size: usize) -> Self {
        Self {
            reference_offset,
            depth: vec![0; size],
            local_depth: vec![],
        }
    }

    pub fn depth(&self) -> &[u16] {
        &self.depth
    }

    fn index_of(&self, pos: u32) -> Option<usize> {
        pos.checked_sub(self.reference_offset)
            .map(|i| i as usize)
            .filter(|&i| i < self.depth.len())
    }

    /// Stages one depth increment over the inclusive span `[start, end]`
    pub fn increase_local_depth_by_one(&mut self, start_pos: u32, end_pos: u32) {
        if end_pos < start_pos {
            return;
        }
        for pos in start_pos..=end_pos {
            if let Some(index) = self.index_of(pos) {
                self.local_depth.push(index as u32);
            }
        }
    }

    /// Folds the staged increments into the depth array, once per position
    /// regardless of how many times the read staged it.
    pub fn commit_local_depth(&mut self) {
        self.local_depth.sort_unstable();
        self.local_depth.dedup();
        for &index in &self.local_depth {
            let slot = &mut self.depth[index as usize];
            *slot = slot.saturating_add(1);
        }
        self.local_depth.clear();
    }

    /// Minimum depth over the inclusive span; conservative for indels
    pub fn read_depth(&self, start_pos: u32, end_pos: u32) -> u16 {
        (start_pos..=end_pos)
            .filter_map(|pos| self.index_of(pos))
            .map(|i| self.depth[i])
            .min()
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.depth.iter_mut().for_each(|d| *d = 0);
        self.local_depth.clear();
    }
}

/// Depth across all samples, protected for concurrent update with one mutex
/// per sample slice.
#[derive(Debug)]
pub struct GlobalReferenceDepth {
    reference_offset: u32,
    size: usize,
    depths: Vec<Mutex<Vec<u16>>>,
}

impl GlobalReferenceDepth {
    pub fn new(reference_offset: u32, size: usize, sample_count: usize) -> Self {
        Self {
            reference_offset,
            size,
            depths: (0..sample_count).map(|_| Mutex::new(vec![0; size])).collect(),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.depths.len()
    }

    /// Accumulates a worker's per-sample depth; the sample's mutex is held
    /// only for the duration of this one commit.
    pub fn add_reference_depths_from(&self, local: &ReferenceDepth, sample: usize) {
        let mut depths = self.depths[sample].lock().expect("depth mutex poisoned");
        for (slot, &add) in depths.iter_mut().zip(local.depth()) {
            *slot = slot.saturating_add(add);
        }
    }

    /// Minimum depth over the inclusive absolute span for one sample
    pub fn read_depth(&self, start_pos: u32, end_pos: u32, sample: usize) -> u16 {
        let depths = self.depths[sample].lock().expect("depth mutex poisoned");
        (start_pos..=end_pos)
            .filter_map(|pos| {
                pos.checked_sub(self.reference_offset)
                    .map(|i| i as usize)
                    .filter(|&i| i < self.size)
            })
            .map(|i| depths[i])
            .min()
            .unwrap_or(0)
    }

    /// Total depth over the span, summed across the given samples
    pub fn total_read_depth(&self, start_pos: u32, end_pos: u32, samples: &[usize]) -> u64 {
        samples.iter()
            .map(|&s| u64::from(self.read_depth(start_pos, end_pos, s)))
            .sum()
    }
}
