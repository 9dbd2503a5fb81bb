//! Post-processing shared by every resolver kind.

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use std::path::Path;
use walkdir::WalkDir;

use super::archive::content_entries;
use crate::metadata::{PackageMeta, is_meta_file};

/// Embedded metadata, or a stand-in carrying only the inferred name.
pub(super) async fn read_meta(dir: &Path, name: &str) -> Result<PackageMeta> {
    let dir = dir.to_path_buf();
    let name = name.to_string();
    tokio::task::spawn_blocking(move || {
        Ok(PackageMeta::read_embedded(&dir)?.unwrap_or_else(|| PackageMeta::named(name)))
    })
    .await
    .context("spawn_blocking panicked")?
}

/// One gitignore-style pattern.
#[derive(Debug)]
struct IgnoreRule {
    pattern: Pattern,
    negated: bool,
    dir_only: bool,
    /// Matches against the full relative path rather than the file name
    anchored: bool,
}

impl IgnoreRule {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            return None;
        }
        let (negated, raw) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (dir_only, raw) = match raw.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let anchored = raw.contains('/');
        let raw = raw.strip_prefix('/').unwrap_or(raw);
        let pattern = Pattern::new(raw).ok()?;
        Some(Self {
            pattern,
            negated,
            dir_only,
            anchored,
        })
    }

    fn matches(&self, relative: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        if self.anchored {
            self.pattern.matches_with(relative, options)
        } else {
            let name = relative.rsplit('/').next().unwrap_or(relative);
            self.pattern.matches_with(name, options)
        }
    }
}

fn is_ignored(rules: &[IgnoreRule], relative: &str, is_dir: bool) -> bool {
    let mut ignored = false;
    for rule in rules {
        if rule.matches(relative, is_dir) {
            ignored = !rule.negated;
        }
    }
    ignored
}

/// Removes everything under `dir` matched by `patterns`. Metadata files at
/// the package root are always kept. Returns the number of entries removed.
pub(super) async fn apply_ignore(dir: &Path, patterns: &[String]) -> Result<usize> {
    if patterns.is_empty() {
        return Ok(0);
    }
    let dir = dir.to_path_buf();
    let patterns = patterns.to_vec();
    tokio::task::spawn_blocking(move || prune_ignored(&dir, &patterns))
        .await
        .context("spawn_blocking panicked")?
}

/// Blocking form of [`apply_ignore`].
pub(super) fn prune_ignored(dir: &Path, patterns: &[String]) -> Result<usize> {
    let rules: Vec<IgnoreRule> = patterns.iter().filter_map(|p| IgnoreRule::parse(p)).collect();
    if rules.is_empty() {
        return Ok(0);
    }
    prune(dir, &rules)
}

fn prune(root: &Path, rules: &[IgnoreRule]) -> Result<usize> {
    let mut doomed = Vec::new();
    let mut walker = WalkDir::new(root).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        let is_dir = entry.file_type().is_dir();
        if entry.depth() == 1 && is_meta_file(&relative) {
            continue;
        }
        if is_ignored(rules, &relative, is_dir) {
            if is_dir {
                walker.skip_current_dir();
            }
            doomed.push((entry.into_path(), is_dir));
        }
    }

    for (path, is_dir) in &doomed {
        let removed = if *is_dir { std::fs::remove_dir_all(path) } else { std::fs::remove_file(path) };
        removed.with_context(|| format!("Failed to remove ignored {}", path.display()))?;
    }
    Ok(doomed.len())
}

/// Renames a lone non-metadata file to `index<ext>`, returning the new name.
pub(super) fn rename_single_file(dir: &Path) -> Result<Option<String>> {
    let entries = content_entries(dir)?;
    let [only] = entries.as_slice() else {
        return Ok(None);
    };
    if !only.is_file() {
        return Ok(None);
    }
    let name = only.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    if is_meta_file(&name) {
        return Ok(None);
    }
    let renamed = match Path::new(&name).extension() {
        Some(ext) => format!("index.{}", ext.to_string_lossy()),
        None => "index".to_string(),
    };
    if renamed != name {
        std::fs::rename(only, dir.join(&renamed))
            .with_context(|| format!("Failed to rename {}", only.display()))?;
    }
    Ok(Some(renamed))
}
