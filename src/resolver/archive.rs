//! Archive detection and extraction for downloaded and copied packages.
//!
//! Handles zip, tar and gzip-compressed tar. Extraction is synchronous and
//! runs inside `spawn_blocking`.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::core::ResolveError;

/// Files the OS drops into directories that never count as package content.
const JUNK: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini", "._.DS_Store", "npm-debug.log"];

pub fn is_junk(name: &str) -> bool {
    JUNK.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Detects the format from the file name, then from the MIME type.
    pub fn detect(path: &Path, mime: Option<&str>) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            return Some(Self::Zip);
        }
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            return Some(Self::TarGz);
        }
        if name.ends_with(".tar") {
            return Some(Self::Tar);
        }
        let mime = mime?.split(';').next()?.trim().to_lowercase();
        match mime.as_str() {
            "application/zip" | "application/x-zip-compressed" => Some(Self::Zip),
            "application/x-tar" => Some(Self::Tar),
            "application/x-gzip" | "application/gzip" | "application/x-tgz" | "application/x-gtar" => {
                Some(Self::TarGz)
            }
            _ => None,
        }
    }
}

fn extract_error(path: &Path, reason: impl ToString) -> anyhow::Error {
    ResolveError::Extract {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Extracts `archive` into `dest`.
pub fn extract(archive: &Path, dest: &Path, kind: ArchiveKind) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    let reader = BufReader::new(file);

    match kind {
        ArchiveKind::Zip => extract_zip(reader, archive, dest),
        ArchiveKind::Tar => extract_tar(reader, archive, dest),
        ArchiveKind::TarGz => extract_tar(flate2::read::GzDecoder::new(reader), archive, dest),
    }
}

fn extract_tar<R: Read>(reader: R, archive: &Path, dest: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(reader);
    for entry in tar.entries().map_err(|e| extract_error(archive, e))? {
        let mut entry = entry.map_err(|e| extract_error(archive, e))?;
        // unpack_in refuses entries escaping dest and reports them as false
        let inside = entry.unpack_in(dest).map_err(|e| extract_error(archive, e))?;
        if !inside {
            let path = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
            return Err(extract_error(archive, format!("invalid path in archive: {path}")));
        }
    }
    Ok(())
}

fn extract_zip<R: Read + io::Seek>(reader: R, archive: &Path, dest: &Path) -> Result<()> {
    let mut zip = ZipArchive::new(reader).map_err(|e| extract_error(archive, e))?;
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).map_err(|e| extract_error(archive, e))?;
        let Some(relative) = file.enclosed_name() else {
            return Err(extract_error(archive, format!("invalid path in archive: {}", file.name())));
        };
        let path = dest.join(relative);
        if file.is_dir() {
            fs::create_dir_all(&path)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        io::copy(&mut file, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// Entries of `dir` that count as content.
pub fn content_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        if !is_junk(&entry.file_name().to_string_lossy()) {
            entries.push(entry.path());
        }
    }
    entries.sort();
    Ok(entries)
}

/// When `dir` holds a single directory and nothing else, moves that
/// directory's contents up into `dir`. Returns whether anything moved.
pub fn move_single_dir_up(dir: &Path) -> Result<bool> {
    let entries = content_entries(dir)?;
    let [only] = entries.as_slice() else {
        return Ok(false);
    };
    if !only.is_dir() {
        return Ok(false);
    }

    // Rename first so a child sharing the parent's name cannot clash
    let staging = dir.join(format!(".pkgplan-unwrap-{}", std::process::id()));
    fs::rename(only, &staging)
        .with_context(|| format!("Failed to move {}", only.display()))?;
    for entry in fs::read_dir(&staging)? {
        let entry = entry?;
        fs::rename(entry.path(), dir.join(entry.file_name()))?;
    }
    fs::remove_dir(&staging)?;
    Ok(true)
}
