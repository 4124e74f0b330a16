use crate::metadata::SeriesRecord;

use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::info;

pub const METADATA_FILE_NAME: &str = "series_metadata.csv";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Metadata table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// The series metadata table shared by the ingestion and processing stages.
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    /// The table at its standard name inside `directory`.
    pub fn in_dir(directory: impl AsRef<Path>) -> Self {
        Self::at(directory.as_ref().join(METADATA_FILE_NAME))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write all records, replacing any previous table. The header row is
    /// written even when there are no records.
    pub fn write(&self, records: &[SeriesRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let csv_error = |source| StoreError::Csv {
            path: self.path.clone(),
            source,
        };
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!records.is_empty())
            .from_path(&self.path)
            .map_err(csv_error)?;
        if records.is_empty() {
            writer
                .write_record(SeriesRecord::COLUMNS)
                .map_err(csv_error)?;
        }
        for record in records {
            writer.serialize(record).map_err(csv_error)?;
        }
        writer
            .flush()
            .map_err(|source| csv_error(csv::Error::from(source)))?;

        info!(path = %self.path.display(), rows = records.len(), "metadata saved");
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<SeriesRecord>, StoreError> {
        let csv_error = |source| StoreError::Csv {
            path: self.path.clone(),
            source,
        };
        let mut reader = csv::Reader::from_path(&self.path).map_err(csv_error)?;
        reader
            .deserialize()
            .collect::<Result<Vec<SeriesRecord>, _>>()
            .map_err(csv_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lookup::CanonicalLabel, metadata::Triple};

    fn record(series_id: &str, label: CanonicalLabel) -> SeriesRecord {
        SeriesRecord {
            patient_id: "P001".into(),
            study_id: "1.2.840.1".into(),
            series_id: series_id.into(),
            scanner_type: "MR".into(),
            scanner_manufacturer: "SIEMENS".into(),
            scanner_model: "Skyra, \"fit\"".into(),
            magnetic_field_strength: "3".into(),
            series_description: " t2_tse tra ".into(),
            canonical_label: label,
            num_source_files: 25,
            num_loaded_slices: 24,
            volume_size: Triple([384, 384, 24]),
            voxel_spacing: Triple([0.5208333333333334, 0.5208333333333334, 3.6]),
            relative_path: PathBuf::from("P001/1.2.840.1/t2"),
        }
    }

    #[test]
    fn records_survive_a_write_read_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::in_dir(dir.path().join("metadata"));
        let records = vec![
            record("1.2.840.1.1", CanonicalLabel::Resolved("T2".into())),
            record("1.2.840.1.2", CanonicalLabel::Unresolved),
        ];

        store.write(&records).unwrap();

        assert_eq!(store.read().unwrap(), records);
    }

    #[test]
    fn empty_table_keeps_its_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::in_dir(dir.path());

        store.write(&[]).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(content.trim_end(), SeriesRecord::COLUMNS.join(","));
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn header_matches_record_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::in_dir(dir.path());

        store
            .write(&[record("1", CanonicalLabel::Unresolved)])
            .unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            content.lines().next().unwrap(),
            SeriesRecord::COLUMNS.join(",")
        );
        assert!(content.contains(",unknown,"));
        assert!(content.contains(",384x384x24,"));
    }
}
