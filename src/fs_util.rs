use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tempfile::Builder;

use crate::error::KiraError;

/// Immediate children of a directory, split into files and subdirectories,
/// each sorted by name. Entries whose names are not UTF-8 are skipped.
#[derive(Debug, Default)]
pub struct DirListing {
    pub files: Vec<Utf8PathBuf>,
    pub dirs: Vec<Utf8PathBuf>,
}

pub fn list_dir(dir: &Utf8Path) -> Result<DirListing, KiraError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("read dir {dir}: {err}")))?;
    let mut listing = DirListing::default();
    for entry in entries {
        let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        if path.as_std_path().is_dir() {
            listing.dirs.push(path);
        } else if path.as_std_path().is_file() {
            listing.files.push(path);
        }
    }
    listing.files.sort();
    listing.dirs.sort();
    Ok(listing)
}

/// Experiment number of an integer-named directory.
pub fn experiment_number(dir: &Utf8Path) -> Option<u32> {
    let name = dir.file_name()?;
    if name.is_empty() || !name.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

pub fn is_hidden(path: &Utf8Path) -> bool {
    path.file_name()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

pub fn modified_utc(path: &Utf8Path) -> Result<DateTime<Utc>, KiraError> {
    let modified = fs::metadata(path.as_std_path())
        .and_then(|meta| meta.modified())
        .map_err(|err| KiraError::Filesystem(format!("stat {path}: {err}")))?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Writes through a temporary file in the same directory and renames it
/// over the destination.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".kira-sm")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    std::io::Write::write_all(&mut temp, content)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}
