//! Canonical series labels.
//!
//! A curated table maps `(patient id, series description)` to the generic
//! sequence label of a series. Descriptions are compared with every
//! whitespace character removed.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LookupTableError {
    #[error("Failed to open lookup table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Row {row}: expected 3 columns, found {found}")]
    MalformedRow { row: usize, found: usize },
}

/// The label assigned to a series.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CanonicalLabel {
    Resolved(String),
    /// No table entry matched; persisted as [`CanonicalLabel::UNRESOLVED`].
    Unresolved,
}

impl CanonicalLabel {
    pub const UNRESOLVED: &'static str = "unknown";

    pub fn as_str(&self) -> &str {
        match self {
            CanonicalLabel::Resolved(label) => label,
            CanonicalLabel::Unresolved => Self::UNRESOLVED,
        }
    }

    pub fn resolved(&self) -> Option<&str> {
        match self {
            CanonicalLabel::Resolved(label) => Some(label),
            CanonicalLabel::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, CanonicalLabel::Resolved(_))
    }
}

impl fmt::Display for CanonicalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for CanonicalLabel {
    fn from(label: String) -> Self {
        if label == Self::UNRESOLVED {
            CanonicalLabel::Unresolved
        } else {
            CanonicalLabel::Resolved(label)
        }
    }
}

impl From<CanonicalLabel> for String {
    fn from(label: CanonicalLabel) -> Self {
        match label {
            CanonicalLabel::Resolved(label) => label,
            CanonicalLabel::Unresolved => CanonicalLabel::UNRESOLVED.to_owned(),
        }
    }
}

pub fn normalize_description(description: &str) -> String {
    description.chars().filter(|c| !c.is_whitespace()).collect()
}

#[derive(Clone, Debug, Default)]
pub struct CanonicalLookupTable {
    labels: HashMap<(String, String), String>,
}

impl CanonicalLookupTable {
    /// Load the curated table from a CSV file.
    ///
    /// Columns are taken by position as patient id, series description and
    /// generic sequence label; the header names are ignored. The first data
    /// row is a secondary header and is skipped.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LookupTableError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| LookupTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader(reader: impl io::Read) -> Result<Self, LookupTableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = Self::default();
        for (index, record) in reader.records().enumerate().skip(1) {
            let record = record?;
            // 1-based, counting the header line
            let row = index + 2;
            if record.len() < 3 {
                return Err(LookupTableError::MalformedRow {
                    row,
                    found: record.len(),
                });
            }
            let label = &record[2];
            if label.is_empty() {
                debug!(row, "lookup row has no label, ignoring");
                continue;
            }
            table.insert(&record[0], &record[1], label);
        }
        Ok(table)
    }

    /// Add or replace a mapping. Later rows win over earlier duplicates.
    pub fn insert(&mut self, patient_id: &str, description: &str, label: &str) {
        self.labels.insert(
            (patient_id.to_owned(), normalize_description(description)),
            label.to_owned(),
        );
    }

    pub fn resolve(&self, patient_id: &str, description: &str) -> CanonicalLabel {
        let key = (patient_id.to_owned(), normalize_description(description));
        match self.labels.get(&key) {
            Some(label) => CanonicalLabel::Resolved(label.clone()),
            None => CanonicalLabel::Unresolved,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str, &'a str)> for CanonicalLookupTable {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str, &'a str)>>(rows: I) -> Self {
        let mut table = Self::default();
        for (patient_id, description, label) in rows {
            table.insert(patient_id, description, label);
        }
        table
    }
}
