//! Discovery of series directories.
//!
//! A series directory is any directory that directly contains at least one
//! `.dcm` file. The tree is walked depth first with entries sorted by file
//! name, so the yielded order is lexical and stable between runs over the
//! same tree.

use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::warn;
use walkdir::WalkDir;

pub const DICOM_EXTENSION: &str = "dcm";

pub fn is_dicom_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DICOM_EXTENSION))
}

/// The `.dcm` files directly inside `directory`, sorted by path.
pub fn dicom_files(directory: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths: Vec<_> = fs::read_dir(directory)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_dicom_file(path))
        .collect();
    paths.sort();
    Ok(paths)
}

fn contains_dicom_files(directory: &Path) -> bool {
    fs::read_dir(directory).is_ok_and(|entries| {
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .any(|path| path.is_file() && is_dicom_file(&path))
    })
}

/// Lazily yield every series directory below `root`, `root` included.
pub fn series_directories(root: &Path) -> impl Iterator<Item = PathBuf> + use<> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable path during discovery");
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir() && contains_dicom_files(entry.path()))
        .map(walkdir::DirEntry::into_path)
}
