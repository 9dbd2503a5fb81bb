//! Package metadata and the sidecar file that persists it.
//!
//! A package may ship an embedded descriptor ([`EMBEDDED_META_FILE`]) with its
//! name, version, entry point, ignore patterns and dependencies. When a
//! resolver materializes a package it writes the descriptor back as a
//! sidecar ([`SIDECAR_META_FILE`]) with injected underscore fields recording
//! where the package came from and how it was resolved:
//!
//! ```json
//! {
//!   "name": "jquery",
//!   "version": "2.0.3",
//!   "_source": "https://github.com/jquery/jquery.git",
//!   "_target": "~2.0.0",
//!   "_release": "2.0.3",
//!   "_resolution": { "type": "version", "tag": "2.0.3", "commit": "f852e631..." },
//!   "_direct": true
//! }
//! ```
//!
//! The sidecar is what cache entries are indexed and validated by, so field
//! names and shape must stay stable. Unknown fields are preserved verbatim.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::constants::SHORT_COMMIT_LEN;
use crate::core::ResolveError;
use crate::version::clean_version;

/// Descriptor shipped inside a package.
pub const EMBEDDED_META_FILE: &str = "package.json";

/// Descriptor written next to materialized content.
pub const SIDECAR_META_FILE: &str = ".package.json";

/// Whether a file name is one of the metadata files.
pub fn is_meta_file(name: &str) -> bool {
    name == EMBEDDED_META_FILE || name == SIDECAR_META_FILE
}

/// How a VCS target was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Resolution {
    /// A semver tag selected by a version or range
    Version { tag: String, commit: String },
    /// A tag named exactly by the target
    Tag { tag: String, commit: String },
    /// A branch tip
    Branch { branch: String, commit: String },
    /// A commit hash (or svn revision) named by the target
    Commit { commit: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    Version,
    Tag,
    Branch,
    Commit,
}

impl Resolution {
    pub fn kind(&self) -> ResolutionKind {
        match self {
            Self::Version { .. } => ResolutionKind::Version,
            Self::Tag { .. } => ResolutionKind::Tag,
            Self::Branch { .. } => ResolutionKind::Branch,
            Self::Commit { .. } => ResolutionKind::Commit,
        }
    }

    pub fn commit(&self) -> &str {
        match self {
            Self::Version { commit, .. }
            | Self::Tag { commit, .. }
            | Self::Branch { commit, .. }
            | Self::Commit { commit } => commit,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Version { tag, .. } | Self::Tag { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            Self::Branch { branch, .. } => Some(branch),
            _ => None,
        }
    }

    /// The ref to check out: tag, branch or commit.
    pub fn reference(&self) -> &str {
        match self {
            Self::Version { tag, .. } | Self::Tag { tag, .. } => tag,
            Self::Branch { branch, .. } => branch,
            Self::Commit { commit } => commit,
        }
    }

    pub fn short_commit(&self) -> &str {
        let commit = self.commit();
        commit.get(..SHORT_COMMIT_LEN).unwrap_or(commit)
    }
}

/// Package metadata, embedded or sidecar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Entry point, a path or list of paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<Value>,
    /// Gitignore-style patterns pruned after materialization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "_target", default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(rename = "_release", default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(rename = "_resolution", default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(rename = "_direct", default, skip_serializing_if = "Option::is_none")]
    pub direct: Option<bool>,
    #[serde(rename = "_originalSource", default, skip_serializing_if = "Option::is_none")]
    pub original_source: Option<String>,
    #[serde(rename = "_cacheHeaders", default, skip_serializing_if = "Option::is_none")]
    pub cache_headers: Option<BTreeMap<String, String>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageMeta {
    /// Minimal metadata for a package that ships none.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Reads a metadata file.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
        serde_json::from_str(&content).map_err(|e| {
            ResolveError::CorruptMeta {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Reads the embedded descriptor in `dir`, `None` if the package has none.
    pub fn read_embedded(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(EMBEDDED_META_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    /// Reads the sidecar in `dir`.
    pub fn read_sidecar(dir: &Path) -> Result<Self> {
        Self::read(&dir.join(SIDECAR_META_FILE))
    }

    /// Writes the sidecar into `dir`.
    pub fn write_sidecar(&self, dir: &Path) -> Result<()> {
        crate::utils::fs::write_json_file(&dir.join(SIDECAR_META_FILE), self)
    }

    /// Drops a declared version that is not valid semver and normalizes the rest.
    ///
    /// Returns the discarded value so callers can report it.
    pub fn normalize_version(&mut self) -> Option<String> {
        let raw = self.version.take()?;
        match clean_version(&raw) {
            Some(clean) => {
                self.version = Some(clean);
                None
            }
            None => Some(raw),
        }
    }

    /// The release label: `_release` if recorded, else the version, else the target.
    pub fn release_label(&self) -> Option<&str> {
        self.release
            .as_deref()
            .or(self.version.as_deref())
            .or(self.target.as_deref())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
