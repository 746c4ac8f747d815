
use std::io::{Read, Write};

/// The serialized artifacts are little-endian and length-prefixed
/// throughout; these helpers keep the graph and index writers symmetric
/// with their loaders.

pub fn write_u16<W: Write>(writer: &mut W, value: u16) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> std::io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    write_u32(writer, bytes.len() as u32)?;
    writer.write_all(bytes)
}

pub fn write_string<W: Write>(writer: &mut W, value: &str) -> std::io::Result<()> {
    write_bytes(writer, value.as_bytes())
}

pub fn read_u16<R: Read>(reader: &mut R) -> std::io::Result<u16> {
    let mut buf = [0_u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut buf = [0_u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut buf = [0_u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_bytes<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let mut buf = vec![0_u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_string<R: Read>(reader: &mut R) -> std::io::Result<String> {
    let bytes = read_bytes(reader)?;
    String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_round_trip() {
        let mut buffer: Vec<u8> = vec![];
        write_u16(&mut buffer, 513).unwrap();
        write_u32(&mut buffer, 0xDEAD_BEEF).unwrap();
        write_u64(&mut buffer, u64::MAX - 1).unwrap();
        write_bytes(&mut buffer, b"ACGT").unwrap();
        write_string(&mut buffer, "chr1").unwrap();

        let mut cursor = &buffer[..];
        assert_eq!(read_u16(&mut cursor).unwrap(), 513);
        assert_eq!(read_u32(&mut cursor).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_u64(&mut cursor).unwrap(), u64::MAX - 1);
        assert_eq!(read_bytes(&mut cursor).unwrap(), b"ACGT".to_vec());
        assert_eq!(read_string(&mut cursor).unwrap(), "chr1");
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_truncated_input() {
        let mut buffer: Vec<u8> = vec![];
        write_u32(&mut buffer, 100).unwrap();
        // length prefix claims 100 bytes but none follow
        let mut cursor = &buffer[..];
        assert!(read_bytes(&mut cursor).is_err());
    }
}
