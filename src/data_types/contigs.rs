
use rustc_hash::FxHashMap;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CoordinateError {
    #[error("unknown contig \"{contig}\"")]
    UnknownContig { contig: String },
    #[error("position {position} is past the end of contig \"{contig}\" (length {length})")]
    PositionPastEnd { contig: String, position: u32, length: u32 },
}

/// One reference sequence with its length
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contig {
    name: String,
    length: u32,
}

impl Contig {
    pub fn new(name: String, length: u32) -> Self {
        Self { name, length }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u32 {
        self.length
    }
}

/// Defines a concatenated absolute coordinate space over a set of contigs:
/// `absolute(contig, i) = offset[contig] + i`.
#[derive(Clone, Debug, Default)]
pub struct ContigTable {
    contigs: Vec<Contig>,
    offsets: Vec<u32>,
    name_to_index: FxHashMap<String, usize>,
}

impl ContigTable {
    /// Builds the table, pre-computing the cumulative offsets.
    pub fn new(contigs: Vec<Contig>) -> Self {
        let mut offsets = Vec::with_capacity(contigs.len());
        let mut name_to_index = FxHashMap::default();
        let mut running: u32 = 0;
        for (i, contig) in contigs.iter().enumerate() {
            offsets.push(running);
            name_to_index.insert(contig.name.clone(), i);
            running += contig.length;
        }
        Self { contigs, offsets, name_to_index }
    }

    pub fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    pub fn is_contig_available(&self, contig: &str) -> bool {
        self.name_to_index.contains_key(contig)
    }

    /// Maps a contig-relative position into the absolute coordinate space.
    /// # Errors
    /// * `UnknownContig` when the name is not in the table
    /// * `PositionPastEnd` when the position is beyond the contig length;
    ///   the position equal to the length is allowed so half-open interval
    ///   ends can be converted
    pub fn absolute_position(&self, contig: &str, position: u32) -> Result<u32, CoordinateError> {
        let index = *self.name_to_index.get(contig)
            .ok_or_else(|| CoordinateError::UnknownContig { contig: contig.to_string() })?;
        let length = self.contigs[index].length;
        if position > length {
            return Err(CoordinateError::PositionPastEnd {
                contig: contig.to_string(),
                position,
                length,
            });
        }
        Ok(self.offsets[index] + position)
    }

    /// Maps an absolute position back to `(contig_name, position)`.
    /// The contig chosen is the one with the greatest offset <= `absolute`.
    /// # Panics
    /// * if the table is empty
    pub fn contig_position(&self, absolute: u32) -> (&str, u32) {
        assert!(!self.contigs.is_empty(), "contig table is empty");
        // partition_point returns the count of offsets <= absolute
        let i = self.offsets.partition_point(|&offset| offset <= absolute) - 1;
        (self.contigs[i].name(), absolute - self.offsets[i])
    }

    /// Serialized form: count then (name, length) pairs
    pub fn serialize_into<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        crate::util::serialize::write_u32(writer, self.contigs.len() as u32)?;
        for contig in &self.contigs {
            crate::util::serialize::write_string(writer, &contig.name)?;
            crate::util::serialize::write_u32(writer, contig.length)?;
        }
        Ok(())
    }

    pub fn load_from<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
        let count = crate::util::serialize::read_u32(reader)? as usize;
        let mut contigs = Vec::with_capacity(count);
        for _ in 0..count {
            let name = crate::util::serialize::read_string(reader)?;
            let length = crate::util::serialize::read_u32(reader)?;
            contigs.push(Contig::new(name, length));
        }
        Ok(Self::new(contigs))
    }

    /// Content digest of the table, stored in the index header so an index
    /// built against different contigs is rejected at load.
    pub fn digest(&self) -> [u8; 32] {
        let mut buffer: Vec<u8> = vec![];
        self.serialize_into(&mut buffer).expect("writing to a Vec cannot fail");
        *blake3::hash(&buffer).as_bytes()
    }
}
