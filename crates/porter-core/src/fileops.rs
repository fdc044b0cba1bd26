//! Filesystem movers used by pipelines, the undo ledger and `file.move`.
//!
//! All functions are synchronous; async callers run them on the blocking
//! pool.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::models::{CoreError, CoreErrorKind};

pub const MAX_CONFLICT_SUFFIX: u32 = 999;

/// Moves `source` to `destination`, creating parent directories and picking
/// a free `-N` suffixed name when the destination is taken. Returns the path
/// actually used.
pub fn move_file(source: &Path, destination: &Path) -> Result<PathBuf, CoreError> {
    ensure_source(source)?;

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|error| {
            CoreError::io(
                &format!("create destination directory '{}'", parent.display()),
                error,
            )
        })?;
    }

    let target = resolve_conflict(destination)?;
    relocate(source, &target)
        .map_err(|error| CoreError::io(&format!("move file to '{}'", target.display()), error))?;
    Ok(target)
}

/// Renames `source` within its own directory.
pub fn rename_file(source: &Path, new_name: &str) -> Result<PathBuf, CoreError> {
    let trimmed = new_name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::invalid_input("new file name must not be empty"));
    }
    if trimmed.contains('/') || trimmed.contains(std::path::MAIN_SEPARATOR) {
        return Err(CoreError::invalid_input(format!(
            "new file name '{trimmed}' must not contain path separators"
        )));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(CoreError::invalid_input(format!(
            "'{trimmed}' is not a valid file name"
        )));
    }
    ensure_source(source)?;

    let directory = source.parent().unwrap_or_else(|| Path::new(""));
    let target = resolve_conflict(&directory.join(trimmed))?;
    fs::rename(source, &target)
        .map_err(|error| CoreError::io(&format!("rename file to '{}'", target.display()), error))?;
    Ok(target)
}

/// Returns `destination` when free, else the first free `stem-N.ext` for
/// N in 1..=999. Never returns an occupied path.
pub fn resolve_conflict(destination: &Path) -> Result<PathBuf, CoreError> {
    if !exists(destination) {
        return Ok(destination.to_path_buf());
    }

    let stem = destination
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = destination
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()))
        .unwrap_or_default();

    for suffix in 1..=MAX_CONFLICT_SUFFIX {
        let candidate = destination.with_file_name(format!("{stem}-{suffix}{extension}"));
        if !exists(&candidate) {
            return Ok(candidate);
        }
    }

    Err(CoreError::new(
        CoreErrorKind::Io,
        format!(
            "no free name for '{}' after {MAX_CONFLICT_SUFFIX} attempts",
            destination.display()
        ),
    ))
}

fn ensure_source(source: &Path) -> Result<(), CoreError> {
    fs::symlink_metadata(source)
        .map(|_| ())
        .map_err(|error| CoreError::io(&format!("source not found '{}'", source.display()), error))
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub(crate) fn relocate(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Err(error) if error.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(source, target)?;
            fs::remove_file(source)
        }
        other => other,
    }
}
