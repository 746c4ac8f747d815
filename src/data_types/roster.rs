
use log::info;
use rustc_hash::FxHashMap;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RosterError {
    #[error("read group \"{read_group}\" maps to both \"{existing}\" and \"{conflicting}\"")]
    ConflictingReadGroup { read_group: String, existing: String, conflicting: String },
}

/// The sample roster discovered from `@RG` header lines: a read-group id to
/// sample mapping plus the deduplicated, sorted sample list.
#[derive(Clone, Debug, Default)]
pub struct SampleRoster {
    samples: Vec<String>,
    rg_to_sample: FxHashMap<String, usize>,
}

impl SampleRoster {
    /// Parses `@RG` lines out of header text, reading the `ID:` and `SM:`
    /// fields. Lines without both fields are ignored.
    /// # Errors
    /// * if the same read-group id maps to two different sample names
    pub fn from_header_text(header_text: &str) -> Result<Self, RosterError> {
        let mut roster = Self::default();
        for line in header_text.lines() {
            if !line.starts_with("@RG") {
                continue;
            }
            let mut rg_id: Option<&str> = None;
            let mut sample: Option<&str> = None;
            for field in line.split('\t') {
                if let Some(value) = field.strip_prefix("ID:") {
                    rg_id = Some(value);
                } else if let Some(value) = field.strip_prefix("SM:") {
                    sample = Some(value);
                }
            }
            if let (Some(rg_id), Some(sample)) = (rg_id, sample) {
                roster.add_read_group(rg_id, sample)?;
            }
        }
        roster.finalize();
        Ok(roster)
    }

    /// Registers one read group; the sample is created on first sight.
    pub fn add_read_group(&mut self, rg_id: &str, sample: &str) -> Result<(), RosterError> {
        if let Some(&existing) = self.rg_to_sample.get(rg_id) {
            if self.samples[existing] != sample {
                return Err(RosterError::ConflictingReadGroup {
                    read_group: rg_id.to_string(),
                    existing: self.samples[existing].clone(),
                    conflicting: sample.to_string(),
                });
            }
            return Ok(());
        }

        let sample_index = match self.samples.iter().position(|s| s == sample) {
            Some(index) => index,
            None => {
                self.samples.push(sample.to_string());
                self.samples.len() - 1
            }
        };
        info!("Added RG: '{rg_id}' => '{sample}'");
        self.rg_to_sample.insert(rg_id.to_string(), sample_index);
        Ok(())
    }

    /// Sorts samples by name and rewires the read-group indices; done once
    /// after all headers are ingested.
    fn finalize(&mut self) {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        order.sort_by(|&a, &b| self.samples[a].cmp(&self.samples[b]));
        let mut remap = vec![0_usize; self.samples.len()];
        for (new_index, &old_index) in order.iter().enumerate() {
            remap[old_index] = new_index;
        }
        let mut sorted = self.samples.clone();
        sorted.sort();
        self.samples = sorted;
        for index in self.rg_to_sample.values_mut() {
            *index = remap[*index];
        }
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Looks up the sample index for a read group; None for unknown groups.
    pub fn sample_index(&self, rg_id: &str) -> Option<usize> {
        self.rg_to_sample.get(rg_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_from_header() {
        let header = "@HD\tVN:1.6\n\
                      @RG\tID:rg2\tPL:ILLUMINA\tSM:sampleB\n\
                      @RG\tID:rg1\tSM:sampleA\n\
                      @RG\tID:rg3\tSM:sampleA\n\
                      @SQ\tSN:chr1\tLN:248956422\n";
        let roster = SampleRoster::from_header_text(header).unwrap();
        assert_eq!(roster.samples(), &["sampleA".to_string(), "sampleB".to_string()]);
        assert_eq!(roster.sample_index("rg1"), Some(0));
        assert_eq!(roster.sample_index("rg3"), Some(0));
        assert_eq!(roster.sample_index("rg2"), Some(1));
        assert_eq!(roster.sample_index("rg9"), None);
    }

    #[test]
    fn test_duplicate_read_group_same_sample() {
        let header = "@RG\tID:rg1\tSM:sampleA\n@RG\tID:rg1\tSM:sampleA\n";
        let roster = SampleRoster::from_header_text(header).unwrap();
        assert_eq!(roster.sample_count(), 1);
    }

    #[test]
    fn test_conflicting_read_group() {
        let header = "@RG\tID:rg1\tSM:sampleA\n@RG\tID:rg1\tSM:sampleB\n";
        let result = SampleRoster::from_header_text(header);
        assert_eq!(
            result.unwrap_err(),
            RosterError::ConflictingReadGroup {
                read_group: "rg1".to_string(),
                existing: "sampleA".to_string(),
                conflicting: "sampleB".to_string(),
            }
        );
    }

    #[test]
    fn test_lines_without_sample_ignored() {
        let header = "@RG\tID:rg1\n@RG\tSM:lonely\n";
        let roster = SampleRoster::from_header_text(header).unwrap();
        assert_eq!(roster.sample_count(), 0);
    }
}
