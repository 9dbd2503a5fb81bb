//! Version control plumbing shared by the git and svn resolvers.
//!
//! A VCS source exposes named refs (tags and branches, each pointing at a
//! commit or revision). [`find_resolution`] maps a requested target onto one
//! of those refs with a fixed precedence:
//!
//! 1. an exact commit hash (full or abbreviated) or svn revision (`r<N>`)
//! 2. an exact tag, then an exact branch
//! 3. a semver range over the tags that parse as versions, stable tags first
//! 4. for `*` with no version tags, the default branch
//!
//! Tag listing, cloning and exporting live in [`git`] and [`svn`], and every
//! process they start goes through [`command::VcsCommand`].

pub mod command;
pub mod git;
pub mod svn;

use regex::Regex;
use semver::Version;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::core::ResolveError;
use crate::endpoint::{WILDCARD, is_wildcard};
use crate::metadata::Resolution;
use crate::version::{Range, parse_version};

pub use command::{CommandOutput, ExecPool, VcsCommand};

static FULL_COMMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{40}$").expect("commit pattern is valid"));

static SHORT_COMMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{4,39}$").expect("short commit pattern is valid"));

static SVN_REVISION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^r(\d+)$").expect("revision pattern is valid"));

/// Abbreviated hashes shorter than this are only accepted when they prefix a known ref.
const MIN_BARE_SHORT_COMMIT: usize = 7;

/// Named refs of a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefSet {
    /// Tag name to commit (or revision)
    pub tags: BTreeMap<String, String>,
    /// Branch name to commit (or revision)
    pub branches: BTreeMap<String, String>,
}

impl RefSet {
    /// Parses `git show-ref` or `git ls-remote` output.
    ///
    /// Peeled tag lines (`refs/tags/v1.0.0^{}`) override the tag object's
    /// hash with the commit it points at.
    pub fn from_git_refs(output: &str) -> Self {
        let mut refs = Self::default();
        for line in output.lines() {
            let mut parts = line.split_whitespace();
            let (Some(commit), Some(reference)) = (parts.next(), parts.next()) else {
                continue;
            };
            if let Some(tag) = reference.strip_prefix("refs/tags/") {
                match tag.strip_suffix("^{}") {
                    Some(peeled) => {
                        refs.tags.insert(peeled.to_string(), commit.to_string());
                    }
                    None => {
                        refs.tags.entry(tag.to_string()).or_insert_with(|| commit.to_string());
                    }
                }
            } else if let Some(branch) = reference.strip_prefix("refs/heads/") {
                refs.branches.insert(branch.to_string(), commit.to_string());
            }
        }
        refs
    }

    /// Tags that parse as versions, highest first. Equal versions keep tag-name order.
    pub fn versions(&self) -> Vec<(Version, &str, &str)> {
        let mut versions: Vec<_> = self
            .tags
            .iter()
            .filter_map(|(tag, commit)| {
                parse_version(tag).map(|v| (v, tag.as_str(), commit.as_str()))
            })
            .collect();
        versions.sort_by(|a, b| b.0.cmp(&a.0));
        versions
    }

    fn commits(&self) -> impl Iterator<Item = &String> {
        self.tags.values().chain(self.branches.values())
    }
}

/// Flavor-specific parts of target matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsFlavor {
    Git,
    Svn,
}

impl VcsFlavor {
    /// Branches tried, in order, for `*` when no version tags exist.
    pub fn default_branches(self) -> &'static [&'static str] {
        match self {
            Self::Git => &["master", "main"],
            Self::Svn => &["trunk"],
        }
    }

    /// Resolves a target naming a commit or revision directly.
    fn commit(self, target: &str, refs: &RefSet) -> Option<String> {
        match self {
            Self::Git => {
                let lower = target.to_ascii_lowercase();
                if FULL_COMMIT.is_match(&lower) {
                    return Some(lower);
                }
                if !SHORT_COMMIT.is_match(&lower) {
                    return None;
                }
                refs.commits().find(|c| c.starts_with(&lower)).cloned()
            }
            Self::Svn => SVN_REVISION
                .captures(target)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
        }
    }

    /// An abbreviated hash that matched no ref but cannot be anything else.
    fn bare_commit(self, target: &str) -> Option<String> {
        let lower = target.to_ascii_lowercase();
        let plausible = self == Self::Git
            && lower.len() >= MIN_BARE_SHORT_COMMIT
            && SHORT_COMMIT.is_match(&lower)
            && Range::parse(&lower).is_err();
        plausible.then_some(lower)
    }
}

/// Maps a target onto a ref of the repository.
///
/// # Errors
///
/// [`ResolveError::NoResolveTarget`] when nothing in `refs` matches.
pub fn find_resolution(
    flavor: VcsFlavor,
    source: &str,
    target: &str,
    refs: &RefSet,
) -> Result<Resolution, ResolveError> {
    let target = if is_wildcard(target) { WILDCARD } else { target.trim() };

    if let Some(commit) = flavor.commit(target, refs) {
        return Ok(Resolution::Commit {
            commit,
        });
    }

    if let Some(commit) = refs.tags.get(target) {
        let tag = target.to_string();
        let commit = commit.clone();
        // A tag that is itself a version keeps its version
        return Ok(if parse_version(target).is_some() {
            Resolution::Version {
                tag,
                commit,
            }
        } else {
            Resolution::Tag {
                tag,
                commit,
            }
        });
    }

    if let Some(commit) = refs.branches.get(target) {
        return Ok(Resolution::Branch {
            branch: target.to_string(),
            commit: commit.clone(),
        });
    }

    if let Some(commit) = flavor.bare_commit(target) {
        return Ok(Resolution::Commit {
            commit,
        });
    }

    let no_target = || ResolveError::NoResolveTarget {
        reason: match flavor {
            VcsFlavor::Git => "no tag, branch or commit matches".to_string(),
            VcsFlavor::Svn => "no tag, branch or revision matches".to_string(),
        },
        locator: source.to_string(),
        target: target.to_string(),
    };

    let Ok(range) = Range::parse(target) else {
        return Err(no_target());
    };

    let versions = refs.versions();
    if versions.is_empty() && target == WILDCARD {
        for branch in flavor.default_branches() {
            if let Some(commit) = refs.branches.get(*branch) {
                return Ok(Resolution::Branch {
                    branch: (*branch).to_string(),
                    commit: commit.clone(),
                });
            }
        }
        return Err(no_target());
    }

    let stable = versions.iter().find(|(v, _, _)| v.pre.is_empty() && range.matches(v));
    let picked = stable.or_else(|| versions.iter().find(|(v, _, _)| range.matches_including_prerelease(v)));
    match picked {
        Some((_, tag, commit)) => Ok(Resolution::Version {
            tag: (*tag).to_string(),
            commit: (*commit).to_string(),
        }),
        None => Err(no_target()),
    }
}
