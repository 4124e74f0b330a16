//! # DICOM study preparation
//!
//! This crate turns a tree of raw per-series DICOM folders into a
//! curated, co-registered dataset in two stages:
//!
//!  - **organize**: every folder holding `.dcm` files is loaded as one
//!    volume, its identifying tags are extracted and the series description
//!    is mapped to a canonical label through a curated lookup table. The
//!    result is a CSV metadata table plus a processing log and summary.
//!  - **process**: the metadata table is grouped by study. Studies that
//!    contain every required label are resampled onto the grid of the
//!    reference series and written as MetaImage (`.mha`) files.
//!
//! Volumes are built on top of the dicom-rs ecosystem. Slices of a series
//! are decoded in parallel using rayon, sorted along the slice normal and
//! stacked into a [`Volume`] that carries origin, spacing and direction.
//! DICOM files are assumed to have the following attributes:
//!   - No multiframe (always the first frame is used)
//!   - One series (Series Instance UID) per folder
//!
//! # Examples
//!
//! ## Resampling one series onto another
//!
//! ```no_run
//! # use dicom_study_prep::{
//! #     enums::Interpolation, metaimage::write_metaimage, resample::Resampler,
//! #     volume_loader::{SeriesLoader, VolumeLoader},
//! # };
//! # use std::path::Path;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = VolumeLoader::default();
//! let t2 = loader.load(Path::new("raw/P001/1.2.3/t2"))?;
//! let adc = loader.load(Path::new("raw/P001/1.2.3/adc"))?;
//!
//! let resampled = Resampler::with_reference(&t2.volume)
//!     .interpolation(Interpolation::Linear)
//!     .resample(&adc.volume)?;
//! write_metaimage("image_adc.mha", &resampled)?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Volume`]: volume::Volume

pub mod config;
pub mod consolidate;
pub mod discovery;
pub mod enums;
pub mod ingest;
mod interpolator;
pub mod lookup;
pub mod metadata;
pub mod metaimage;
pub mod processing_log;
pub mod report;
pub mod resample;
pub mod store;
pub mod study_processor;
pub mod volume;
pub mod volume_loader;
