//! Run analysis and the plain-text summary report.

use crate::{ingest::ProcessingStats, metadata::SeriesRecord};

use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs, io,
    path::{Path, PathBuf},
};
use tracing::info;

pub const SUMMARY_FILE_NAME: &str = "processing_summary.txt";

/// Occurrences of each value, most frequent first, ties by value.
pub fn value_counts<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    let mut counts: Vec<_> = counts
        .into_iter()
        .map(|(value, count)| (value.to_owned(), count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

pub fn label_distribution(records: &[SeriesRecord]) -> Vec<(String, usize)> {
    value_counts(records.iter().map(|r| r.canonical_label.as_str()))
}

/// Aggregate view of an ingestion run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunAnalysis {
    pub stats: ProcessingStats,
    pub total_series: usize,
    pub unique_patients: usize,
    pub unique_descriptions: usize,
    pub scanner_types: Vec<(String, usize)>,
    pub manufacturers: Vec<(String, usize)>,
    pub labels: Vec<(String, usize)>,
}

impl RunAnalysis {
    pub fn new(records: &[SeriesRecord], stats: ProcessingStats) -> Self {
        let patients: HashSet<&str> = records.iter().map(|r| r.patient_id.as_str()).collect();
        let descriptions: HashSet<&str> = records
            .iter()
            .map(|r| r.series_description.as_str())
            .collect();
        Self {
            stats,
            total_series: records.len(),
            unique_patients: patients.len(),
            unique_descriptions: descriptions.len(),
            scanner_types: value_counts(records.iter().map(|r| r.scanner_type.as_str())),
            manufacturers: value_counts(records.iter().map(|r| r.scanner_manufacturer.as_str())),
            labels: label_distribution(records),
        }
    }

    pub fn log(&self, log_path: &Path) {
        info!(
            processed = self.stats.processed,
            errors = self.stats.errors,
            warnings = self.stats.warnings,
            log = %log_path.display(),
            "processing analysis"
        );
        info!(
            unique_patients = self.unique_patients,
            unique_descriptions = self.unique_descriptions,
            manufacturers = ?self.manufacturers,
            labels = ?self.labels,
            "metadata analysis"
        );
    }

    pub fn write_report(&self, directory: &Path) -> io::Result<PathBuf> {
        let path = directory.join(SUMMARY_FILE_NAME);
        fs::write(&path, self.to_string())?;
        info!(path = %path.display(), "summary report saved");
        Ok(path)
    }
}

/// The plain-text summary report.
impl fmt::Display for RunAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DICOM Processing Summary Report")?;
        writeln!(f, "{}\n", "=".repeat(40))?;
        writeln!(f, "Total series processed: {}", self.total_series)?;
        writeln!(f, "Unique patients: {}", self.unique_patients)?;
        writeln!(f, "Unique series descriptions: {}", self.unique_descriptions)?;

        let sections = [
            ("Scanner Types", &self.scanner_types),
            ("Generic Sequence Labels", &self.labels),
            ("Scanner Manufacturers", &self.manufacturers),
        ];
        for (title, counts) in sections {
            writeln!(f, "\n{title}:")?;
            for (value, count) in counts {
                writeln!(f, "  {value}: {count}")?;
            }
        }
        Ok(())
    }
}
