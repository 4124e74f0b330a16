//! Ingestion of a raw DICOM tree into [`SeriesRecord`]s.
//!
//! Every series directory found below the root is loaded and turned into a
//! [`SeriesOutcome`]. Directories may be processed in parallel, but outcomes
//! are folded into the statistics and the processing log strictly in
//! discovery order, so the record table and the log read the same as in a
//! sequential run.

use crate::{
    config::DicomTags,
    discovery::series_directories,
    lookup::CanonicalLookupTable,
    metadata::{ExtractError, Extraction, SeriesRecord, SeriesWarning, extract_metadata},
    processing_log::ProcessingLog,
    volume_loader::{LoadError, SeriesLoader},
};

use rayon::prelude::*;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write processing log: {0}")]
    Log(#[from] io::Error),
}

/// Counters of one ingestion run. Warnings are a subset of processed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub processed: usize,
    pub errors: usize,
    pub warnings: usize,
}

impl ProcessingStats {
    /// Fraction of attempted directories that produced a record
    pub fn success_rate(&self) -> Option<f64> {
        let attempted = self.processed + self.errors;
        (attempted > 0).then(|| self.processed as f64 / attempted as f64)
    }

    fn tally(&mut self, outcome: &SeriesOutcome) {
        match outcome {
            SeriesOutcome::Failed { .. } => self.errors += 1,
            SeriesOutcome::Processed(extraction) => {
                self.processed += 1;
                if extraction.slice_mismatch().is_some() {
                    self.warnings += 1;
                }
            }
        }
    }
}

/// Result of processing one series directory.
#[derive(Debug)]
pub enum SeriesOutcome {
    Processed(Extraction),
    Failed { cause: String },
}

#[derive(Clone, Copy, Debug)]
pub struct IngestOptions {
    /// Load several directories at once
    pub parallel: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self { parallel: true }
    }
}

#[derive(Debug)]
pub struct IngestReport {
    pub records: Vec<SeriesRecord>,
    pub stats: ProcessingStats,
    pub log_path: PathBuf,
}

pub struct Ingestor<'a, L: SeriesLoader> {
    loader: &'a L,
    dicom_tags: &'a DicomTags,
    table: &'a CanonicalLookupTable,
    options: IngestOptions,
}

impl<'a, L: SeriesLoader> Ingestor<'a, L> {
    pub fn new(loader: &'a L, dicom_tags: &'a DicomTags, table: &'a CanonicalLookupTable) -> Self {
        Self {
            loader,
            dicom_tags,
            table,
            options: IngestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    /// Load and extract a single series directory.
    pub fn process_series(&self, directory: &Path, root: &Path) -> Result<Extraction, SeriesError> {
        let series = self.loader.load(directory)?;
        Ok(extract_metadata(
            &series,
            directory,
            root,
            self.dicom_tags,
            self.table,
        )?)
    }

    fn outcome(&self, directory: &Path, root: &Path) -> SeriesOutcome {
        match self.process_series(directory, root) {
            Ok(extraction) => SeriesOutcome::Processed(extraction),
            Err(err) => SeriesOutcome::Failed {
                cause: err.to_string(),
            },
        }
    }

    /// Ingest every series below `root`, writing the processing log into
    /// `output_dir`.
    ///
    /// Each outcome is written to the log as soon as it and all outcomes
    /// before it are known. In parallel mode directories are loaded in
    /// batches of one per worker thread.
    pub fn run(&self, root: &Path, output_dir: &Path) -> Result<IngestReport, IngestError> {
        fs::create_dir_all(output_dir).map_err(|source| IngestError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;
        let mut log = ProcessingLog::start(output_dir)?;

        let directories: Vec<PathBuf> = series_directories(root).collect();
        let total = directories.len();
        info!(total, "found DICOM directories to process");
        info!(log = %log.path().display(), "logging to processing log");

        let batch_size = if self.options.parallel {
            rayon::current_num_threads().max(1)
        } else {
            1
        };
        let progress_step = (total / 20).max(1);
        let mut stats = ProcessingStats::default();
        let mut records = Vec::with_capacity(total);
        let mut done = 0;

        for batch in directories.chunks(batch_size) {
            let outcomes: Vec<SeriesOutcome> = if batch.len() > 1 {
                batch
                    .par_iter()
                    .map(|directory| self.outcome(directory, root))
                    .collect()
            } else {
                batch
                    .iter()
                    .map(|directory| self.outcome(directory, root))
                    .collect()
            };

            for (directory, outcome) in batch.iter().zip(outcomes) {
                stats.tally(&outcome);
                if let Some(record) = Self::report_outcome(&mut log, directory, outcome)? {
                    records.push(record);
                }

                done += 1;
                if done % progress_step == 0 || done == total {
                    info!(
                        done,
                        total,
                        processed = stats.processed,
                        errors = stats.errors,
                        warnings = stats.warnings,
                        "processing DICOM"
                    );
                }
            }
        }

        let log_path = log.finish(&stats)?;

        Ok(IngestReport {
            records,
            stats,
            log_path,
        })
    }

    /// Write the log lines of one outcome and hand back its record, if any.
    fn report_outcome(
        log: &mut ProcessingLog,
        directory: &Path,
        outcome: SeriesOutcome,
    ) -> io::Result<Option<SeriesRecord>> {
        match outcome {
            SeriesOutcome::Failed { cause } => {
                debug!(directory = %directory.display(), %cause, "series failed");
                log.error(directory, &cause)?;
                Ok(None)
            }
            SeriesOutcome::Processed(extraction) => {
                for warning in &extraction.warnings {
                    match warning {
                        SeriesWarning::SliceMismatch { .. } => {
                            log.warning(directory, &warning.to_string())?;
                        }
                        SeriesWarning::UnmappedLabel { .. } => {
                            warn!(directory = %directory.display(), "{warning}");
                        }
                    }
                }
                Ok(Some(extraction.record))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lookup::CanonicalLabel,
        processing_log::LOG_FILE_NAME,
        volume::{IDENTITY_DIRECTION, Volume},
        volume_loader::{LoadedSeries, TagSet},
    };
    use dicom_dictionary_std::tags;
    use ndarray::Array3;
    use std::{collections::HashMap, sync::Mutex};

    /// Serves synthetic series keyed by directory name.
    struct FakeLoader {
        series: HashMap<String, (usize, &'static str)>,
    }

    impl SeriesLoader for FakeLoader {
        fn load(&self, directory: &Path) -> Result<LoadedSeries, LoadError> {
            let name = directory.file_name().unwrap().to_string_lossy().into_owned();
            let (depth, description) = *self
                .series
                .get(&name)
                .ok_or(LoadError::NoValidImages { skipped: 1 })?;
            let tags: TagSet = [
                (tags::PATIENT_ID, "P001"),
                (tags::STUDY_INSTANCE_UID, "1.2.3"),
                (tags::SERIES_INSTANCE_UID, name.as_str()),
                (tags::MODALITY, "MR"),
                (tags::MANUFACTURER, "SIEMENS"),
                (tags::MANUFACTURER_MODEL_NAME, "Skyra"),
                (tags::MAGNETIC_FIELD_STRENGTH, "3"),
                (tags::SERIES_DESCRIPTION, description),
            ]
            .into_iter()
            .collect();
            Ok(LoadedSeries {
                volume: Volume::new(
                    Array3::zeros((depth, 2, 2)),
                    [0.0; 3],
                    [1.0; 3],
                    IDENTITY_DIRECTION,
                ),
                tags,
            })
        }
    }

    fn write_series(root: &Path, name: &str, files: usize) {
        let directory = root.join("P001").join("1.2.3").join(name);
        fs::create_dir_all(&directory).unwrap();
        for i in 0..files {
            fs::write(directory.join(format!("{i:04}.dcm")), b"").unwrap();
        }
    }

    fn fixture() -> (tempfile::TempDir, FakeLoader, CanonicalLookupTable) {
        let root = tempfile::tempdir().unwrap();
        write_series(root.path(), "a_t2", 3);
        write_series(root.path(), "b_adc", 4);
        write_series(root.path(), "c_broken", 2);
        write_series(root.path(), "d_scout", 1);
        let loader = FakeLoader {
            series: HashMap::from([
                ("a_t2".to_owned(), (3, "t2_tse_tra")),
                // one file fewer decoded than present
                ("b_adc".to_owned(), (3, "ep2d_diff_ADC")),
                ("d_scout".to_owned(), (1, "localizer")),
            ]),
        };
        let table = [("P001", "t2_tse_tra", "T2"), ("P001", "ep2d_diff_ADC", "ADC")]
            .into_iter()
            .collect();
        (root, loader, table)
    }

    #[test]
    fn outcomes_are_classified_and_counted() {
        let (root, loader, table) = fixture();
        let raw = root.path();
        let out = tempfile::tempdir().unwrap();
        let tags = DicomTags::default();

        let report = Ingestor::new(&loader, &tags, &table)
            .run(raw, out.path())
            .unwrap();

        assert_eq!(
            report.stats,
            ProcessingStats {
                processed: 3,
                errors: 1,
                warnings: 1
            }
        );
        let labels: Vec<_> = report
            .records
            .iter()
            .map(|record| record.canonical_label.clone())
            .collect();
        assert_eq!(
            labels,
            vec![
                CanonicalLabel::Resolved("T2".into()),
                CanonicalLabel::Resolved("ADC".into()),
                CanonicalLabel::Unresolved,
            ]
        );
        assert_eq!(report.log_path, out.path().join(LOG_FILE_NAME));
    }

    #[test]
    fn log_records_errors_and_slice_mismatches_only() {
        let (root, loader, table) = fixture();
        let out = tempfile::tempdir().unwrap();
        let tags = DicomTags::default();

        let report = Ingestor::new(&loader, &tags, &table)
            .run(root.path(), out.path())
            .unwrap();
        let log = fs::read_to_string(report.log_path).unwrap();

        let events: Vec<_> = log
            .lines()
            .filter(|line| line.contains("] ERROR: ") || line.contains("] WARNING: "))
            .collect();
        assert_eq!(events.len(), 2);
        assert!(events[0].contains("WARNING: ") && events[0].ends_with(
            "b_adc contains 4 DICOM files, but loaded series has 3 slices"
        ));
        assert!(events[1].contains("c_broken: No valid DICOM images found"));
        assert!(log.contains("Final stats: 3 processed, 1 errors, 1 warnings"));
    }

    #[test]
    fn rerunning_yields_identical_records() {
        let (root, loader, table) = fixture();
        let out = tempfile::tempdir().unwrap();
        let tags = DicomTags::default();
        let ingestor = Ingestor::new(&loader, &tags, &table);

        let first = ingestor.run(root.path(), out.path()).unwrap();
        let second = ingestor
            .with_options(IngestOptions { parallel: false })
            .run(root.path(), out.path())
            .unwrap();

        assert_eq!(first.records, second.records);
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn summary_is_written_even_when_everything_fails() {
        let root = tempfile::tempdir().unwrap();
        write_series(root.path(), "x", 2);
        write_series(root.path(), "y", 2);
        let loader = FakeLoader {
            series: HashMap::new(),
        };
        let out = tempfile::tempdir().unwrap();
        let tags = DicomTags::default();
        let table = CanonicalLookupTable::default();

        let report = Ingestor::new(&loader, &tags, &table)
            .run(root.path(), out.path())
            .unwrap();

        assert!(report.records.is_empty());
        assert_eq!(report.stats.errors, 2);
        assert!(
            fs::read_to_string(report.log_path)
                .unwrap()
                .contains("Final stats: 0 processed, 2 errors, 0 warnings")
        );
    }

    /// Fails every series and captures the log as seen while loading `b`.
    struct LogReadingLoader {
        log_path: PathBuf,
        seen: Mutex<Option<String>>,
    }

    impl SeriesLoader for LogReadingLoader {
        fn load(&self, directory: &Path) -> Result<LoadedSeries, LoadError> {
            if directory.ends_with("b") {
                let content = fs::read_to_string(&self.log_path)?;
                *self.seen.lock().unwrap() = Some(content);
            }
            Err(LoadError::NoValidImages { skipped: 1 })
        }
    }

    #[test]
    fn log_lines_are_written_as_series_finish() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("a")).unwrap();
        fs::create_dir_all(root.path().join("b")).unwrap();
        fs::write(root.path().join("a/1.dcm"), b"").unwrap();
        fs::write(root.path().join("b/1.dcm"), b"").unwrap();
        let out = tempfile::tempdir().unwrap();
        let loader = LogReadingLoader {
            log_path: out.path().join(LOG_FILE_NAME),
            seen: Mutex::new(None),
        };
        let tags = DicomTags::default();
        let table = CanonicalLookupTable::default();

        let report = Ingestor::new(&loader, &tags, &table)
            .with_options(IngestOptions { parallel: false })
            .run(root.path(), out.path())
            .unwrap();

        let seen = loader.seen.lock().unwrap().clone().unwrap();
        let a = root.path().join("a");
        assert!(seen.contains(&format!("] ERROR: {}: No valid DICOM images found", a.display())));
        assert!(!seen.contains("Final stats"));
        assert_eq!(report.stats.errors, 2);
    }

    #[test]
    fn success_rate_needs_attempts() {
        assert_eq!(ProcessingStats::default().success_rate(), None);
        let stats = ProcessingStats {
            processed: 3,
            errors: 1,
            warnings: 0,
        };
        assert_eq!(stats.success_rate(), Some(0.75));
    }
}
