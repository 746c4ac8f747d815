
use anyhow::Context;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// This will save a generic serializable struct to JSON, gzipping the output
/// when the target filename ends in `.gz`. Used for the per-read stats dumps
/// when a stats directory is configured.
/// # Arguments
/// * `data` - the data in memory
/// * `out_filename` - user provided path to write to
/// # Errors
/// * if opening or writing to the file throw errors
/// * if JSON serialization throws errors
pub fn save_json<T: serde::Serialize>(data: &T, out_filename: &Path) -> anyhow::Result<()> {
    let file: Box<dyn std::io::Write> = if out_filename.extension().unwrap_or_default() == "gz" {
        Box::new(
            flate2::write::GzEncoder::new(
                File::create(out_filename)?,
                flate2::Compression::best()
            )
        )
    } else {
        Box::new(File::create(out_filename)?)
    };
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .with_context(|| format!("Error while serializing {out_filename:?}:"))?;
    writer.flush()
        .with_context(|| format!("Error while flushing output to {out_filename:?}:"))?;
    Ok(())
}

/// Builds the stats filename for one region inside the configured stats
/// directory, e.g. `<stats_dir>/reads_chr1_1000_2000.json.gz`.
pub fn region_stats_path(stats_dir: &Path, chrom: &str, begin: u32, end: u32) -> std::path::PathBuf {
    stats_dir.join(format!("reads_{chrom}_{begin}_{end}.json.gz"))
}
