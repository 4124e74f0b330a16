//! The append-only text log of an ingestion run.
//!
//! The log is the audit trail for every dropped or degraded series: one
//! banner, one timestamped line per error or slice-count warning, and a
//! timestamped closing summary.

use crate::ingest::ProcessingStats;

use std::{
    fs::{File, OpenOptions},
    io::{self, LineWriter, Write},
    path::{Path, PathBuf},
};

pub const LOG_FILE_NAME: &str = "processing_log.txt";

pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct ProcessingLog {
    path: PathBuf,
    writer: LineWriter<File>,
}

impl ProcessingLog {
    /// Create (truncating) the log in `directory` and write the run banner.
    pub fn start(directory: &Path) -> io::Result<Self> {
        let path = directory.join(LOG_FILE_NAME);
        let mut writer = LineWriter::new(File::create(&path)?);
        writeln!(writer, "DICOM Processing Log - Started at {}", timestamp())?;
        writeln!(writer, "{}", "=".repeat(50))?;
        writeln!(writer)?;
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn error(&mut self, directory: &Path, cause: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[{}] ERROR: {}: {}",
            timestamp(),
            directory.display(),
            cause
        )
    }

    pub fn warning(&mut self, directory: &Path, message: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[{}] WARNING: {} {}",
            timestamp(),
            directory.display(),
            message
        )
    }

    /// Write the closing lines and hand back the log location.
    pub fn finish(mut self, stats: &ProcessingStats) -> io::Result<PathBuf> {
        writeln!(self.writer)?;
        writeln!(self.writer, "Processing completed at {}", timestamp())?;
        writeln!(
            self.writer,
            "Final stats: {} processed, {} errors, {} warnings",
            stats.processed, stats.errors, stats.warnings
        )?;
        self.writer.flush()?;
        Ok(self.path)
    }
}

/// Append the summary block with the success rate to an existing log.
pub fn append_summary(path: &Path, stats: &ProcessingStats) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    writeln!(file)?;
    writeln!(file, "=== Processing Summary ===")?;
    writeln!(file, "Total processed: {}", stats.processed)?;
    writeln!(file, "Total errors: {}", stats.errors)?;
    writeln!(file, "Total warnings: {}", stats.warnings)?;
    match stats.success_rate() {
        Some(rate) => writeln!(file, "Success rate: {:.1}%", rate * 100.0),
        None => writeln!(file, "Success rate: n/a"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn log_has_banner_events_and_summary_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ProcessingLog::start(dir.path()).unwrap();
        log.warning(Path::new("raw/a"), "contains 3 DICOM files, but loaded series has 2 slices")
            .unwrap();
        log.error(Path::new("raw/b"), "No valid DICOM images found").unwrap();
        let stats = ProcessingStats {
            processed: 1,
            errors: 1,
            warnings: 1,
        };
        let path = log.finish(&stats).unwrap();
        append_summary(&path, &stats).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert!(lines[0].starts_with("DICOM Processing Log - Started at "));
        assert_eq!(lines[1], "=".repeat(50));
        assert!(lines[3].ends_with(
            "] WARNING: raw/a contains 3 DICOM files, but loaded series has 2 slices"
        ));
        assert!(lines[4].ends_with("] ERROR: raw/b: No valid DICOM images found"));
        assert!(lines[6].starts_with("Processing completed at "));
        assert_eq!(lines[7], "Final stats: 1 processed, 1 errors, 1 warnings");
        assert_eq!(lines[9], "=== Processing Summary ===");
        assert_eq!(lines.last(), Some(&"Success rate: 50.0%"));
    }

    #[test]
    fn starting_a_run_truncates_the_previous_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ProcessingLog::start(dir.path()).unwrap();
        log.error(Path::new("raw/old"), "boom").unwrap();
        log.finish(&ProcessingStats::default()).unwrap();

        let path = ProcessingLog::start(dir.path())
            .unwrap()
            .finish(&ProcessingStats::default())
            .unwrap();

        assert!(!fs::read_to_string(path).unwrap().contains("raw/old"));
    }
}
