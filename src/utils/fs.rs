//! File system helpers for materializing and moving packages.
//!
//! These functions are synchronous and meant to be run inside
//! `tokio::task::spawn_blocking` by async callers.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Creates a directory and its parents if missing.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Recursively copies `src` into `dst`, skipping entries for which `skip`
/// returns true. `skip` receives paths relative to `src`. Symlinks are not followed.
pub fn copy_dir_filtered(src: &Path, dst: &Path, skip: &dyn Fn(&Path) -> bool) -> Result<()> {
    copy_dir_inner(src, src, dst, skip)
}

/// Recursively copies `src` into `dst`.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    copy_dir_filtered(src, dst, &|_| false)
}

fn copy_dir_inner(root: &Path, src: &Path, dst: &Path, skip: &dyn Fn(&Path) -> bool) -> Result<()> {
    ensure_dir(dst)?;

    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let relative = src_path.strip_prefix(root).unwrap_or(&src_path);
        if skip(relative) {
            continue;
        }
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir_inner(root, &src_path, &dst_path, skip)?;
        } else if file_type.is_file() {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "Failed to copy file from {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
    }

    Ok(())
}

fn is_cross_device(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::CrossesDevices || error.raw_os_error() == Some(18)
}

/// Moves a directory, copying and deleting when `src` and `dst` live on different devices.
pub fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                target: "fs",
                "Cross-device move of {}, falling back to copy",
                src.display()
            );
            copy_dir(src, dst)?;
            remove_dir_all(src)
        }
        Err(e) => Err(e)
            .with_context(|| format!("Failed to move {} to {}", src.display(), dst.display())),
    }
}

/// Recursively removes a directory. Missing directories are not an error.
pub fn remove_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to remove directory: {}", path.display()))
        }
    }
}

/// Writes data as pretty JSON.
pub fn write_json_file<T>(path: &Path, data: &T) -> Result<()>
where
    T: serde::Serialize,
{
    let json = serde_json::to_string_pretty(data)?;
    fs::write(path, json).with_context(|| format!("Failed to write JSON file: {}", path.display()))
}

/// Resolves `.` and `..` components without touching the file system.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            _ => components.push(component),
        }
    }
    components.iter().collect()
}

/// Joins `path` onto `base` unless it is already absolute, then normalizes.
#[must_use]
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}
