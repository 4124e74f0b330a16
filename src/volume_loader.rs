use crate::{
    discovery::dicom_files,
    enums::SortBy,
    volume::{IDENTITY_DIRECTION, Volume},
};

use dicom::{
    core::Tag,
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("No DICOM files found in {0}")]
    NoDicomFiles(PathBuf),

    #[error("No valid DICOM images found ({skipped} files could not be decoded)")]
    NoValidImages { skipped: usize },

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Directory holds {0} different series, expected exactly one")]
    MultipleSeries(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text values of the data elements of one slice, keyed by tag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TagSet(BTreeMap<Tag, String>);

impl TagSet {
    /// Collect every element that has a textual representation. Values are
    /// trimmed of the space and NUL padding DICOM uses.
    pub fn from_dicom_object(dicom_object: &InMemDicomObject) -> Self {
        dicom_object
            .iter()
            .filter(|element| element.header().tag != tags::PIXEL_DATA)
            .filter_map(|element| {
                let value = element.to_str().ok()?;
                let value = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
                Some((element.header().tag, value.to_owned()))
            })
            .collect()
    }

    pub fn get(&self, tag: Tag) -> Option<&str> {
        self.0.get(&tag).map(String::as_str)
    }

    pub fn insert(&mut self, tag: Tag, value: impl Into<String>) {
        self.0.insert(tag, value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(Tag, S)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (Tag, S)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(tag, value)| (tag, value.into())).collect())
    }
}

/// A decoded series: the volume and the tags of its first slice.
#[derive(Clone, Debug)]
pub struct LoadedSeries {
    pub volume: Volume,
    pub tags: TagSet,
}

/// Loads one series per directory.
pub trait SeriesLoader: Sync {
    fn load(&self, directory: &Path) -> Result<LoadedSeries, LoadError>;
}

struct Slice {
    dicom_object: FileDicomObject<InMemDicomObject>,
    image: Array2<f32>,
    position: Option<[f64; 3]>,
    orientation: Option<[f64; 6]>,
    instance_number: Option<i32>,
    series_uid: Option<String>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VolumeLoader {
    sort_by: SortBy,
}

impl SeriesLoader for VolumeLoader {
    fn load(&self, directory: &Path) -> Result<LoadedSeries, LoadError> {
        Self::load_from_directory(directory, self.sort_by)
    }
}

impl VolumeLoader {
    pub fn new(sort_by: SortBy) -> Self {
        Self { sort_by }
    }

    /// Load a series from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - DICOM file objects of one series
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images are found, dimensions are
    /// inconsistent, spacing is missing or the objects span several series.
    /// Objects without decodable pixel data are skipped.
    pub fn load_from_dicom_objects(
        dicom_objects: Vec<FileDicomObject<InMemDicomObject>>,
        sort_by: SortBy,
    ) -> Result<LoadedSeries, LoadError> {
        let total = dicom_objects.len();
        let mut slices: Vec<_> = dicom_objects
            .into_par_iter()
            .filter_map(Self::extract_slice)
            .collect();

        if slices.is_empty() {
            return Err(LoadError::NoValidImages { skipped: total });
        }
        if slices.len() < total {
            debug!(skipped = total - slices.len(), "skipped slices without pixel data");
        }

        Self::validate_single_series(&slices)?;

        let orientation = slices
            .iter()
            .find_map(|slice| slice.orientation)
            .unwrap_or([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let row = [orientation[0], orientation[1], orientation[2]];
        let col = [orientation[3], orientation[4], orientation[5]];
        let normal = cross(row, col);

        Self::sort_slices(&mut slices, sort_by, normal);
        Self::validate_dimensions(&slices)?;

        let spacing = Self::get_spacing(&slices, normal).ok_or(LoadError::MissingSpacing)?;
        let origin = slices[0].position.unwrap_or([0.0; 3]);
        let direction = if normal.iter().all(|v| *v == 0.0) {
            IDENTITY_DIRECTION
        } else {
            [
                row[0], col[0], normal[0], row[1], col[1], normal[1], row[2], col[2], normal[2],
            ]
        };

        let tags = TagSet::from_dicom_object(&slices[0].dicom_object);
        let data = Self::build_volume_array(&slices);

        Ok(LoadedSeries {
            volume: Volume::new(data, origin, spacing, direction),
            tags,
        })
    }

    /// Load a series from file paths, skipping files that fail to parse
    pub fn load_from_file_paths(
        paths: &[PathBuf],
        sort_by: SortBy,
    ) -> Result<LoadedSeries, LoadError> {
        let objects: Vec<_> = paths
            .par_iter()
            .filter_map(|path| match open_file(path) {
                Ok(dicom_object) => Some(dicom_object),
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "skipping unreadable DICOM file");
                    None
                }
            })
            .collect();

        if objects.is_empty() {
            return Err(LoadError::NoValidImages {
                skipped: paths.len(),
            });
        }

        Self::load_from_dicom_objects(objects, sort_by)
    }

    /// Load a series from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<LoadedSeries, LoadError> {
        let path = path.as_ref();
        let paths = dicom_files(path)?;

        if paths.is_empty() {
            return Err(LoadError::NoDicomFiles(path.to_path_buf()));
        }

        Self::load_from_file_paths(&paths, sort_by)
    }

    fn extract_slice(dicom_object: FileDicomObject<InMemDicomObject>) -> Option<Slice> {
        let image = Self::decode_image(&dicom_object)?;
        let position = Self::get_floats::<3>(&dicom_object, tags::IMAGE_POSITION_PATIENT);
        let orientation = Self::get_floats::<6>(&dicom_object, tags::IMAGE_ORIENTATION_PATIENT);
        let instance_number = dicom_object
            .element(tags::INSTANCE_NUMBER)
            .ok()
            .and_then(|element| element.to_int::<i32>().ok());
        let series_uid = dicom_object
            .element(tags::SERIES_INSTANCE_UID)
            .ok()
            .and_then(|element| element.to_str().ok())
            .map(|uid| uid.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_owned());

        Some(Slice {
            dicom_object,
            image,
            position,
            orientation,
            instance_number,
            series_uid,
        })
    }

    fn get_floats<const N: usize>(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        tag: Tag,
    ) -> Option<[f64; N]> {
        let values = dicom_object.element(tag).ok()?.to_multi_float64().ok()?;
        values.get(..N)?.try_into().ok()
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn validate_single_series(slices: &[Slice]) -> Result<(), LoadError> {
        let series: BTreeSet<_> = slices
            .iter()
            .filter_map(|slice| slice.series_uid.as_deref())
            .collect();
        if series.len() > 1 {
            return Err(LoadError::MultipleSeries(series.len()));
        }
        Ok(())
    }

    fn sort_key(slice: &Slice, sort_by: SortBy, normal: [f64; 3]) -> Option<f64> {
        let by_instance = slice.instance_number.map(f64::from);
        match sort_by {
            SortBy::ImagePositionPatient => slice
                .position
                .map(|position| dot(position, normal))
                .or(by_instance),
            SortBy::InstanceNumber => by_instance,
            SortBy::None => Some(0.0),
        }
    }

    fn sort_slices(slices: &mut [Slice], sort_by: SortBy, normal: [f64; 3]) {
        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| {
                Self::sort_key(a, sort_by, normal)
                    .partial_cmp(&Self::sort_key(b, sort_by, normal))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    fn validate_dimensions(slices: &[Slice]) -> Result<(), LoadError> {
        let first_dim = slices[0].image.dim();
        if slices.iter().any(|slice| slice.image.dim() != first_dim) {
            return Err(LoadError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(slices: &[Slice]) -> Array3<f32> {
        let (height, width) = slices[0].image.dim();
        let depth = slices.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.image);
        }

        volume
    }

    /// Spacing as (x, y, z). In-plane spacing comes from PixelSpacing
    /// (row spacing first, i.e. y before x); the slice spacing from the
    /// distance between the outermost slices, else from SpacingBetweenSlices
    /// or SliceThickness, else 1.
    fn get_spacing(slices: &[Slice], normal: [f64; 3]) -> Option<[f64; 3]> {
        let pixel_spacing = slices
            .iter()
            .find_map(|slice| Self::get_floats::<2>(&slice.dicom_object, tags::PIXEL_SPACING))?;

        let from_positions = match (slices.first(), slices.last()) {
            (Some(first), Some(last)) if slices.len() > 1 => {
                first.position.zip(last.position).map(|(a, b)| {
                    let distance = dot([b[0] - a[0], b[1] - a[1], b[2] - a[2]], normal).abs();
                    distance / (slices.len() - 1) as f64
                })
            }
            _ => None,
        };
        let z_spacing = from_positions
            .filter(|spacing| *spacing > 1e-6)
            .or_else(|| {
                [tags::SPACING_BETWEEN_SLICES, tags::SLICE_THICKNESS]
                    .into_iter()
                    .find_map(|tag| {
                        slices[0]
                            .dicom_object
                            .element(tag)
                            .ok()?
                            .to_float64()
                            .ok()
                            .filter(|spacing| *spacing > 0.0)
                    })
            })
            .unwrap_or(1.0);

        Some([pixel_spacing[1], pixel_spacing[0], z_spacing])
    }
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
