// ========================================================================================
//                                Scan result accumulator
// ========================================================================================

use crate::types::WindowPValue;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const OUTPUT_HEADER: &str = "p.values loci.midpoint";

/// Per-window p-values in scan order. Window sets are appended as they complete,
/// and each set arrives already ordered by window position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    rows: Vec<WindowPValue>,
}

impl ScanResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend_from_set(&mut self, set: Vec<WindowPValue>) {
        self.rows.extend(set);
    }

    pub fn rows(&self) -> &[WindowPValue] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the space-separated table: a header, then one `p-value midpoint` line
    /// per non-empty window.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "{OUTPUT_HEADER}")?;
        let mut ryu_buffer = ryu::Buffer::new();
        for row in &self.rows {
            writeln!(
                writer,
                "{} {}",
                ryu_buffer.format(row.p_value),
                row.midpoint
            )?;
        }
        Ok(())
    }

    /// Writes the table to `path`, gzip-compressed when the path ends in `.gz`.
    pub fn write_to_path(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        if path.extension().is_some_and(|ext| ext == "gz") {
            let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));
            self.write_to(&mut writer)?;
            writer.into_inner().map_err(|e| e.into_error())?.finish()?;
        } else {
            let mut writer = BufWriter::new(file);
            self.write_to(&mut writer)?;
            writer.flush()?;
        }
        log::info!("Wrote {} window p-values to {}", self.rows.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn sample() -> ScanResult {
        let mut result = ScanResult::new();
        result.extend_from_set(vec![
            WindowPValue {
                p_value: 0.25,
                midpoint: 13,
            },
            WindowPValue {
                p_value: 1.0,
                midpoint: 38,
            },
        ]);
        result.extend_from_set(vec![WindowPValue {
            p_value: 0.0005,
            midpoint: 63,
        }]);
        result
    }

    #[test]
    fn table_has_header_and_one_line_per_window() {
        let mut out = Vec::new();
        sample().write_to(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "p.values loci.midpoint\n0.25 13\n1.0 38\n0.0005 63\n"
        );
    }

    #[test]
    fn gz_paths_are_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.txt.gz");
        sample().write_to_path(&path).unwrap();

        let mut text = String::new();
        MultiGzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.starts_with("p.values loci.midpoint\n0.25 13\n"));
    }

    #[test]
    fn empty_scans_still_write_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.txt");
        ScanResult::new().write_to_path(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "p.values loci.midpoint\n");
    }
}
