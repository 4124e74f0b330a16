//! MetaImage (`.mha`) volume files.
//!
//! Only the subset needed for this pipeline is supported: three
//! dimensional, uncompressed `MET_FLOAT` data stored inline after the
//! header (`ElementDataFile = LOCAL`).

use crate::volume::Volume;

use ndarray::Array3;
use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const EXTENSION: &str = "mha";

#[derive(Debug, Error)]
pub enum MetaImageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing header field {0}")]
    MissingField(&'static str),

    #[error("Invalid header field {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Unsupported element type {0}")]
    UnsupportedElementType(String),

    #[error("Expected {expected} bytes of voxel data, found {found}")]
    TruncatedData { expected: usize, found: usize },
}

/// Write `volume` as a single-file MetaImage.
pub fn write_metaimage(path: impl AsRef<Path>, volume: &Volume) -> Result<(), MetaImageError> {
    let path = path.as_ref();
    let io_error = |source| MetaImageError::Io {
        path: path.to_path_buf(),
        source,
    };

    let geometry = volume.geometry();
    let d = &geometry.direction;
    // TransformMatrix lists the image axes one after another (column-major)
    let transform = [d[0], d[3], d[6], d[1], d[4], d[7], d[2], d[5], d[8]];

    let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
    let header = format!(
        "ObjectType = Image\n\
         NDims = 3\n\
         BinaryData = True\n\
         BinaryDataByteOrderMSB = {}\n\
         CompressedData = False\n\
         TransformMatrix = {}\n\
         Offset = {}\n\
         CenterOfRotation = 0 0 0\n\
         ElementSpacing = {}\n\
         DimSize = {}\n\
         ElementType = MET_FLOAT\n\
         ElementDataFile = LOCAL\n",
        if cfg!(target_endian = "big") { "True" } else { "False" },
        join(&transform),
        join(&geometry.origin),
        join(&geometry.spacing),
        join(&geometry.size),
    );
    writer.write_all(header.as_bytes()).map_err(io_error)?;

    let data = volume.data().as_standard_layout();
    let written = match data.as_slice() {
        Some(voxels) => writer.write_all(bytemuck::cast_slice(voxels)),
        None => {
            let voxels: Vec<f32> = data.iter().copied().collect();
            writer.write_all(bytemuck::cast_slice(&voxels))
        }
    };
    written.map_err(io_error)?;
    writer.flush().map_err(io_error)
}

/// Read a MetaImage written by [`write_metaimage`].
pub fn read_metaimage(path: impl AsRef<Path>) -> Result<Volume, MetaImageError> {
    let path = path.as_ref();
    let io_error = |source| MetaImageError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut fields = HashMap::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).map_err(io_error)? == 0 {
            return Err(MetaImageError::MissingField("ElementDataFile"));
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim().to_owned(), value.trim().to_owned());
        let is_last = key == "ElementDataFile";
        fields.insert(key, value);
        if is_last {
            break;
        }
    }

    let field = |name: &'static str| {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or(MetaImageError::MissingField(name))
    };

    if field("ElementDataFile")? != "LOCAL" {
        return Err(MetaImageError::InvalidField {
            field: "ElementDataFile",
            value: field("ElementDataFile")?.to_owned(),
        });
    }
    let element_type = field("ElementType")?;
    if element_type != "MET_FLOAT" {
        return Err(MetaImageError::UnsupportedElementType(element_type.to_owned()));
    }
    let big_endian = fields
        .get("BinaryDataByteOrderMSB")
        .or_else(|| fields.get("ElementByteOrderMSB"))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let size: [usize; 3] = parse_values("DimSize", field("DimSize")?)?;
    let spacing: [f64; 3] = parse_values("ElementSpacing", field("ElementSpacing")?)?;
    let origin: [f64; 3] = match fields.get("Offset").or_else(|| fields.get("Origin")) {
        Some(value) => parse_values("Offset", value)?,
        None => [0.0; 3],
    };
    let t: [f64; 9] = parse_values("TransformMatrix", field("TransformMatrix")?)?;
    let direction = [t[0], t[3], t[6], t[1], t[4], t[7], t[2], t[5], t[8]];

    let expected = size.iter().product::<usize>() * std::mem::size_of::<f32>();
    let mut bytes = Vec::with_capacity(expected);
    reader.read_to_end(&mut bytes).map_err(io_error)?;
    if bytes.len() < expected {
        return Err(MetaImageError::TruncatedData {
            expected,
            found: bytes.len(),
        });
    }

    let voxels: Vec<f32> = bytes[..expected]
        .chunks_exact(4)
        .map(|chunk| {
            let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
            if big_endian {
                f32::from_be_bytes(raw)
            } else {
                f32::from_le_bytes(raw)
            }
        })
        .collect();

    let [width, height, depth] = size;
    let data = Array3::from_shape_vec((depth, height, width), voxels).map_err(|_| {
        MetaImageError::InvalidField {
            field: "DimSize",
            value: field("DimSize").unwrap_or_default().to_owned(),
        }
    })?;

    Ok(Volume::new(data, origin, spacing, direction))
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_values<T: std::str::FromStr, const N: usize>(
    field: &'static str,
    value: &str,
) -> Result<[T; N], MetaImageError> {
    let invalid = || MetaImageError::InvalidField {
        field,
        value: value.to_owned(),
    };
    let parsed = value
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|_| invalid())?;
    parsed.try_into().map_err(|_| invalid())
}
