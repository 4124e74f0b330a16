//! Pipeline configuration.
//!
//! The configuration is a YAML document loaded once and then passed by
//! reference to every component. Nothing reads it from global state.

use crate::enums::Interpolation;

use dicom::core::Tag;
use dicom_dictionary_std::tags;
use serde::{
    Deserialize, Deserializer,
    de::{MapAccess, Visitor},
};
use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Paths {
    /// Root of the raw per-series DICOM folders
    pub dicom_raw: PathBuf,
    /// Directory receiving the metadata table, log and summary report
    pub metadata: PathBuf,
    /// Root of the resampled per-study output
    pub dicom_processed: PathBuf,
    /// Curated lookup table (CSV)
    pub series_descriptions: PathBuf,
}

/// Path overrides given on the command line.
#[derive(Clone, Debug, Default)]
pub struct PathOverrides {
    pub dicom_raw: Option<PathBuf>,
    pub metadata: Option<PathBuf>,
    pub dicom_processed: Option<PathBuf>,
}

/// Required canonical labels in configured order, each with the slot name
/// its output file is written under.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeriesToProcess(Vec<(String, String)>);

impl SeriesToProcess {
    pub fn new<L, S>(entries: impl IntoIterator<Item = (L, S)>) -> Self
    where
        L: Into<String>,
        S: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(label, slot)| (label.into(), slot.into()))
                .collect(),
        )
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(label, _)| label.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(label, slot)| (label.as_str(), slot.as_str()))
    }

    pub fn slot(&self, label: &str) -> Option<&str> {
        self.iter().find(|(l, _)| *l == label).map(|(_, slot)| slot)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.slot(label).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for SeriesToProcess {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = SeriesToProcess;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of canonical label to slot name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((label, slot)) = map.next_entry::<String, String>()? {
                    entries.push((label, slot));
                }
                Ok(SeriesToProcess(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// A DICOM tag identifier as written in the configuration.
///
/// Accepts `GGGG|EEEE`, `(GGGG,EEEE)` and `GGGGEEEE`, hexadecimal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct TagId(pub Tag);

impl FromStr for TagId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Invalid(format!("malformed DICOM tag identifier {s:?}"));
        let trimmed = s.trim().trim_start_matches('(').trim_end_matches(')');
        let (group, element) = match trimmed.split_once(['|', ',']) {
            Some((group, element)) => (group.trim(), element.trim()),
            None if trimmed.len() == 8 && trimmed.is_ascii() => trimmed.split_at(4),
            None => return Err(invalid()),
        };
        let parse = |part: &str| u16::from_str_radix(part, 16).map_err(|_| invalid());
        Ok(TagId(Tag(parse(group)?, parse(element)?)))
    }
}

impl TryFrom<String> for TagId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Where each identifying attribute is read from.
///
/// When given, all eight identifiers must be listed. An absent block means
/// the standard tags.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DicomTags {
    pub patient_id: TagId,
    pub study_id: TagId,
    pub series_id: TagId,
    pub scanner_type: TagId,
    pub scanner_manufacturer: TagId,
    pub scanner_model: TagId,
    pub magnetic_field_strength: TagId,
    pub series_description: TagId,
}

impl Default for DicomTags {
    fn default() -> Self {
        Self {
            patient_id: TagId(tags::PATIENT_ID),
            study_id: TagId(tags::STUDY_INSTANCE_UID),
            series_id: TagId(tags::SERIES_INSTANCE_UID),
            scanner_type: TagId(tags::MODALITY),
            scanner_manufacturer: TagId(tags::MANUFACTURER),
            scanner_model: TagId(tags::MANUFACTURER_MODEL_NAME),
            magnetic_field_strength: TagId(tags::MAGNETIC_FIELD_STRENGTH),
            series_description: TagId(tags::SERIES_DESCRIPTION),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub paths: Paths,
    pub series_to_process: SeriesToProcess,
    pub reference_series: String,
    #[serde(default)]
    pub dicom_tags: DicomTags,
    /// Per-label interpolation, nearest neighbour when absent
    #[serde(default)]
    pub interpolation: BTreeMap<String, Interpolation>,
}

impl Config {
    pub const DEFAULT_PATH: &'static str = "config.yaml";

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let paths = [
            ("dicom_raw", &self.paths.dicom_raw),
            ("metadata", &self.paths.metadata),
            ("dicom_processed", &self.paths.dicom_processed),
            ("series_descriptions", &self.paths.series_descriptions),
        ];
        if let Some((name, _)) = paths.iter().find(|(_, path)| path.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid(format!("paths.{name} is empty")));
        }

        if self.series_to_process.is_empty() {
            return Err(ConfigError::Invalid("series_to_process is empty".into()));
        }
        let mut labels = HashSet::new();
        let mut slots = HashSet::new();
        for (label, slot) in self.series_to_process.iter() {
            if !labels.insert(label) {
                return Err(ConfigError::Invalid(format!("label {label} listed twice")));
            }
            if slot.is_empty() || !slots.insert(slot) {
                return Err(ConfigError::Invalid(format!(
                    "slot name {slot:?} of {label} is empty or not unique"
                )));
            }
        }

        if !self.series_to_process.contains(&self.reference_series) {
            return Err(ConfigError::Invalid(format!(
                "reference_series {} is not listed in series_to_process",
                self.reference_series
            )));
        }

        if let Some(label) = self
            .interpolation
            .keys()
            .find(|label| !self.series_to_process.contains(label))
        {
            return Err(ConfigError::Invalid(format!(
                "interpolation given for {label}, which is not in series_to_process"
            )));
        }
        Ok(())
    }

    /// Replace the paths given on the command line.
    pub fn with_overrides(mut self, overrides: PathOverrides) -> Self {
        if let Some(path) = overrides.dicom_raw {
            self.paths.dicom_raw = path;
        }
        if let Some(path) = overrides.metadata {
            self.paths.metadata = path;
        }
        if let Some(path) = overrides.dicom_processed {
            self.paths.dicom_processed = path;
        }
        self
    }

    pub fn interpolation_for(&self, label: &str) -> Interpolation {
        self.interpolation.get(label).copied().unwrap_or_default()
    }

    pub fn reference_slot(&self) -> Option<&str> {
        self.series_to_process.slot(&self.reference_series)
    }
}
