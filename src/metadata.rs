use crate::{
    config::{DicomTags, TagId},
    discovery::dicom_files,
    lookup::{CanonicalLabel, CanonicalLookupTable},
    volume_loader::LoadedSeries,
};

use dicom::core::Tag;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Missing tag {name} {tag}")]
    MissingTag { name: &'static str, tag: Tag },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Three values stored as one `AxBxC` column.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Triple<T>(pub [T; 3]);

impl<T: fmt::Display> fmt::Display for Triple<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = &self.0;
        write!(f, "{a}x{b}x{c}")
    }
}

impl<T: FromStr> FromStr for Triple<T> {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split('x')
            .map(|part| part.trim().parse::<T>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("invalid value in {s:?}"))?;
        let values: [T; 3] = values
            .try_into()
            .map_err(|_| format!("expected three values in {s:?}"))?;
        Ok(Triple(values))
    }
}

impl<T: fmt::Display> Serialize for Triple<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: FromStr> Deserialize<'de> for Triple<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// Everything recorded about one successfully loaded series directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub patient_id: String,
    pub study_id: String,
    pub series_id: String,
    pub scanner_type: String,
    pub scanner_manufacturer: String,
    pub scanner_model: String,
    pub magnetic_field_strength: String,
    pub series_description: String,
    pub canonical_label: CanonicalLabel,
    /// `.dcm` files in the directory
    pub num_source_files: usize,
    /// Depth of the decoded volume
    pub num_loaded_slices: usize,
    /// (x, y, z) voxels
    pub volume_size: Triple<usize>,
    /// (x, y, z) millimetres
    pub voxel_spacing: Triple<f64>,
    /// Series directory relative to the ingestion root
    pub relative_path: PathBuf,
}

impl SeriesRecord {
    pub const COLUMNS: [&'static str; 14] = [
        "patient_id",
        "study_id",
        "series_id",
        "scanner_type",
        "scanner_manufacturer",
        "scanner_model",
        "magnetic_field_strength",
        "series_description",
        "canonical_label",
        "num_source_files",
        "num_loaded_slices",
        "volume_size",
        "voxel_spacing",
        "relative_path",
    ];

    pub fn has_slice_mismatch(&self) -> bool {
        self.num_source_files != self.num_loaded_slices
    }
}

/// Non-fatal findings while extracting a record.
#[derive(Clone, Debug, PartialEq)]
pub enum SeriesWarning {
    /// Counted in the run statistics and written to the processing log.
    SliceMismatch {
        num_source_files: usize,
        num_loaded_slices: usize,
    },
    /// Reported only; the record keeps [`CanonicalLabel::Unresolved`].
    UnmappedLabel {
        patient_id: String,
        series_description: String,
    },
}

impl fmt::Display for SeriesWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesWarning::SliceMismatch {
                num_source_files,
                num_loaded_slices,
            } => write!(
                f,
                "contains {num_source_files} DICOM files, but loaded series has {num_loaded_slices} slices"
            ),
            SeriesWarning::UnmappedLabel {
                patient_id,
                series_description,
            } => write!(
                f,
                "no generic sequence label found for patient {patient_id}, series {series_description}"
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    pub record: SeriesRecord,
    pub warnings: Vec<SeriesWarning>,
}

impl Extraction {
    pub fn slice_mismatch(&self) -> Option<&SeriesWarning> {
        self.warnings
            .iter()
            .find(|warning| matches!(warning, SeriesWarning::SliceMismatch { .. }))
    }
}

/// Build the record of a loaded series found in `directory` below `root`.
pub fn extract_metadata(
    series: &LoadedSeries,
    directory: &Path,
    root: &Path,
    dicom_tags: &DicomTags,
    table: &CanonicalLookupTable,
) -> Result<Extraction, ExtractError> {
    let read = |name: &'static str, TagId(tag): TagId| {
        series
            .tags
            .get(tag)
            .map(str::to_owned)
            .ok_or(ExtractError::MissingTag { name, tag })
    };

    let patient_id = read("patient_id", dicom_tags.patient_id)?;
    let series_description = read("series_description", dicom_tags.series_description)?;
    let study_id = read("study_id", dicom_tags.study_id)?;
    let series_id = read("series_id", dicom_tags.series_id)?;
    let scanner_type = read("scanner_type", dicom_tags.scanner_type)?;
    let scanner_manufacturer = read("scanner_manufacturer", dicom_tags.scanner_manufacturer)?;
    let scanner_model = read("scanner_model", dicom_tags.scanner_model)?;
    let magnetic_field_strength =
        read("magnetic_field_strength", dicom_tags.magnetic_field_strength)?;

    let mut warnings = Vec::new();

    let canonical_label = table.resolve(&patient_id, &series_description);
    if !canonical_label.is_resolved() {
        warnings.push(SeriesWarning::UnmappedLabel {
            patient_id: patient_id.clone(),
            series_description: series_description.clone(),
        });
    }

    let num_source_files = dicom_files(directory)?.len();
    let num_loaded_slices = series.volume.depth();
    if num_source_files != num_loaded_slices {
        warnings.push(SeriesWarning::SliceMismatch {
            num_source_files,
            num_loaded_slices,
        });
    }

    let relative_path = match directory.strip_prefix(root) {
        Ok(relative) if relative.as_os_str().is_empty() => PathBuf::from("."),
        Ok(relative) => relative.to_path_buf(),
        Err(_) => directory.to_path_buf(),
    };

    let record = SeriesRecord {
        patient_id,
        study_id,
        series_id,
        scanner_type,
        scanner_manufacturer,
        scanner_model,
        magnetic_field_strength,
        series_description,
        canonical_label,
        num_source_files,
        num_loaded_slices,
        volume_size: Triple(series.volume.size()),
        voxel_spacing: Triple(series.volume.spacing()),
        relative_path,
    };

    Ok(Extraction { record, warnings })
}
