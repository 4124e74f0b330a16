//! Writing co-registered volumes for consolidated studies.
//!
//! The reference series of each study is written unchanged; every other
//! required series is resampled onto the reference grid first. Output goes
//! to `{dicom_processed}/{patient_id}/{study_id}/image_{slot}.mha`.

use crate::{
    config::Config,
    consolidate::{ConsolidatedStudy, SelectedSeries},
    metaimage::{self, MetaImageError, write_metaimage},
    resample::{ResampleError, Resampler},
    volume::Volume,
    volume_loader::{LoadError, SeriesLoader},
};

use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum StudyProcessingError {
    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Study has no {0} series selected")]
    MissingSelection(String),

    #[error("Failed to load {label} series from {path}: {source}")]
    Load {
        label: String,
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    #[error("Failed to resample {label} series: {source}")]
    Resample {
        label: String,
        #[source]
        source: ResampleError,
    },

    #[error(transparent)]
    Write(#[from] MetaImageError),
}

/// Files written for one study.
#[derive(Clone, Debug, PartialEq)]
pub struct StudyOutput {
    pub study_id: String,
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResampleSummary {
    pub written: Vec<StudyOutput>,
    /// Study ids whose processing was aborted
    pub failed: Vec<String>,
}

pub struct StudyProcessor<'a, L: SeriesLoader> {
    loader: &'a L,
    config: &'a Config,
}

impl<'a, L: SeriesLoader> StudyProcessor<'a, L> {
    pub fn new(loader: &'a L, config: &'a Config) -> Self {
        Self { loader, config }
    }

    pub fn output_directory(&self, study: &ConsolidatedStudy) -> PathBuf {
        self.config
            .paths
            .dicom_processed
            .join(&study.patient_id)
            .join(&study.study_id)
    }

    fn output_file(directory: &Path, slot: &str) -> PathBuf {
        directory.join(format!("image_{slot}.{}", metaimage::EXTENSION))
    }

    fn load(&self, selected: &SelectedSeries) -> Result<Volume, StudyProcessingError> {
        let path = self
            .config
            .paths
            .dicom_raw
            .join(&selected.record.relative_path);
        self.loader
            .load(&path)
            .map(|series| series.volume)
            .map_err(|source| StudyProcessingError::Load {
                label: selected.label.clone(),
                path,
                source,
            })
    }

    /// Write the reference volume and every other required volume resampled
    /// onto its grid. The first failure aborts the study.
    pub fn process_study(
        &self,
        study: &ConsolidatedStudy,
    ) -> Result<StudyOutput, StudyProcessingError> {
        let directory = self.output_directory(study);
        fs::create_dir_all(&directory).map_err(|source| StudyProcessingError::OutputDir {
            path: directory.clone(),
            source,
        })?;

        let reference_label = &self.config.reference_series;
        let reference = study
            .selection(reference_label)
            .ok_or_else(|| StudyProcessingError::MissingSelection(reference_label.clone()))?;
        let reference_volume = self.load(reference)?;

        let mut files = Vec::with_capacity(study.selections.len());
        let reference_file = Self::output_file(&directory, &reference.slot);
        write_metaimage(&reference_file, &reference_volume)?;
        files.push(reference_file);

        let resampler = Resampler::with_reference(&reference_volume);
        drop(reference_volume);

        for selected in study
            .selections
            .iter()
            .filter(|selected| selected.label != *reference_label)
        {
            let moving = self.load(selected)?;
            let resampled = resampler
                .resample_with(&moving, self.config.interpolation_for(&selected.label))
                .map_err(|source| StudyProcessingError::Resample {
                    label: selected.label.clone(),
                    source,
                })?;
            let file = Self::output_file(&directory, &selected.slot);
            write_metaimage(&file, &resampled)?;
            files.push(file);
        }

        Ok(StudyOutput {
            study_id: study.study_id.clone(),
            directory,
            files,
        })
    }

    /// Process all studies in order. Failures are logged and do not stop
    /// the remaining studies.
    pub fn run(&self, studies: &[ConsolidatedStudy]) -> ResampleSummary {
        let mut summary = ResampleSummary::default();
        for (index, study) in studies.iter().enumerate() {
            match self.process_study(study) {
                Ok(output) => {
                    info!(
                        study = %study.study_id,
                        done = index + 1,
                        total = studies.len(),
                        "study written"
                    );
                    summary.written.push(output);
                }
                Err(err) => {
                    error!(study = %study.study_id, error = %err, "study processing failed");
                    summary.failed.push(study.study_id.clone());
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, PathOverrides},
        lookup::CanonicalLabel,
        metadata::{SeriesRecord, Triple},
        metaimage::read_metaimage,
        volume::IDENTITY_DIRECTION,
        volume_loader::{LoadedSeries, TagSet},
    };
    use ndarray::Array3;
    use std::collections::HashMap;

    struct FakeLoader {
        volumes: HashMap<PathBuf, Volume>,
    }

    impl SeriesLoader for FakeLoader {
        fn load(&self, directory: &Path) -> Result<LoadedSeries, LoadError> {
            let volume = self
                .volumes
                .get(directory)
                .cloned()
                .ok_or(LoadError::NoValidImages { skipped: 0 })?;
            Ok(LoadedSeries {
                volume,
                tags: TagSet::default(),
            })
        }
    }

    fn config(raw: &Path, processed: &Path) -> Config {
        Config::from_yaml_str(
            "paths: {dicom_raw: r, metadata: m, dicom_processed: p, series_descriptions: s}\n\
             series_to_process: {T2: t2w, ADC: adc, DWI: hbv}\n\
             reference_series: T2\n",
        )
        .unwrap()
        .with_overrides(PathOverrides {
            dicom_raw: Some(raw.to_path_buf()),
            metadata: None,
            dicom_processed: Some(processed.to_path_buf()),
        })
    }

    fn selected(label: &str, slot: &str) -> SelectedSeries {
        SelectedSeries {
            label: label.into(),
            slot: slot.into(),
            record: SeriesRecord {
                patient_id: "P001".into(),
                study_id: "S1".into(),
                series_id: label.into(),
                scanner_type: "MR".into(),
                scanner_manufacturer: "GE".into(),
                scanner_model: "Discovery".into(),
                magnetic_field_strength: "3".into(),
                series_description: label.into(),
                canonical_label: CanonicalLabel::Resolved(label.into()),
                num_source_files: 4,
                num_loaded_slices: 4,
                volume_size: Triple([4, 4, 4]),
                voxel_spacing: Triple([1.0; 3]),
                relative_path: PathBuf::from("P001/S1").join(label),
            },
        }
    }

    fn study() -> ConsolidatedStudy {
        ConsolidatedStudy {
            study_id: "S1".into(),
            patient_id: "P001".into(),
            selections: vec![
                selected("T2", "t2w"),
                selected("ADC", "adc"),
                selected("DWI", "hbv"),
            ],
        }
    }

    fn ramp(dim: (usize, usize, usize), origin: [f64; 3], spacing: [f64; 3]) -> Volume {
        let data = Array3::from_shape_fn(dim, |(z, y, x)| (100 * z + 10 * y + x) as f32);
        Volume::new(data, origin, spacing, IDENTITY_DIRECTION)
    }

    fn loader(raw: &Path) -> FakeLoader {
        FakeLoader {
            volumes: HashMap::from([
                (
                    raw.join("P001/S1/T2"),
                    ramp((4, 8, 8), [0.0; 3], [0.5, 0.5, 3.0]),
                ),
                (
                    raw.join("P001/S1/ADC"),
                    ramp((6, 4, 4), [0.25, 0.0, -1.0], [1.0, 1.0, 2.0]),
                ),
                (
                    raw.join("P001/S1/DWI"),
                    ramp((3, 2, 2), [-1.0, -1.0, 0.0], [2.0, 2.0, 4.0]),
                ),
            ]),
        }
    }

    #[test]
    fn all_outputs_share_the_reference_grid() {
        let raw = tempfile::tempdir().unwrap();
        let processed = tempfile::tempdir().unwrap();
        let config = config(raw.path(), processed.path());
        let loader = loader(raw.path());

        let output = StudyProcessor::new(&loader, &config)
            .process_study(&study())
            .unwrap();

        assert_eq!(output.directory, processed.path().join("P001/S1"));
        let names: Vec<_> = output
            .files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["image_t2w.mha", "image_adc.mha", "image_hbv.mha"]);

        let reference = &loader.volumes[&raw.path().join("P001/S1/T2")];
        for file in &output.files {
            let volume = read_metaimage(file).unwrap();
            assert!(volume.geometry().same_grid(reference.geometry(), 1e-9));
        }
        assert_eq!(&read_metaimage(&output.files[0]).unwrap(), reference);
    }

    #[test]
    fn failing_series_aborts_only_its_study() {
        let raw = tempfile::tempdir().unwrap();
        let processed = tempfile::tempdir().unwrap();
        let config = config(raw.path(), processed.path());
        let loader = loader(raw.path());

        let mut broken = study();
        broken.study_id = "S0".into();
        broken.selections[2].record.relative_path = PathBuf::from("P001/S0/DWI");
        let summary = StudyProcessor::new(&loader, &config).run(&[broken, study()]);

        assert_eq!(summary.failed, vec!["S0".to_owned()]);
        assert_eq!(summary.written.len(), 1);
        assert_eq!(summary.written[0].study_id, "S1");
    }

    #[test]
    fn missing_reference_selection_is_reported() {
        let raw = tempfile::tempdir().unwrap();
        let processed = tempfile::tempdir().unwrap();
        let config = config(raw.path(), processed.path());
        let loader = loader(raw.path());
        let mut study = study();
        study.selections.remove(0);

        let err = StudyProcessor::new(&loader, &config)
            .process_study(&study)
            .unwrap_err();

        assert!(matches!(err, StudyProcessingError::MissingSelection(label) if label == "T2"));
    }
}
