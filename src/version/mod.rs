//! Version parsing and ordering for package releases.
//!
//! Releases come from many places (package metadata, VCS tags, cache
//! directory names) and not all of them are semantic versions. This module
//! provides the lenient parsing used everywhere a tag or label might be a
//! version, the one ordering rule shared by the cache and the resolvers, and
//! the range engine in [`range`].
//!
//! # Ordering
//!
//! Valid semantic versions sort descending. Anything that does not parse as a
//! version ranks below every version and keeps its encounter order.

pub mod range;

use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub use range::{Bound, Range, is_valid_range, satisfies};

/// Parses a tag or label as a semantic version, accepting a leading `v` or `=`.
///
/// ```
/// use pkgplan_cli::version::parse_version;
///
/// assert_eq!(parse_version("v1.2.3").unwrap().to_string(), "1.2.3");
/// assert!(parse_version("master").is_none());
/// ```
pub fn parse_version(input: &str) -> Option<Version> {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix('=')
        .unwrap_or(trimmed)
        .trim_start();
    let stripped = stripped.strip_prefix('v').unwrap_or(stripped);
    Version::parse(stripped).ok()
}

/// Whether the string is a single valid version (not a range).
pub fn is_valid_version(input: &str) -> bool {
    parse_version(input).is_some()
}

/// Normalized form of a version string, `None` when it is not a version.
pub fn clean_version(input: &str) -> Option<String> {
    parse_version(input).map(|v| v.to_string())
}

/// Compares two labels under the release ordering: versions first, highest first.
pub fn compare_releases(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => vb.cmp(&va),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sorts labels in place under the release ordering. The sort is stable.
pub fn sort_releases<S: AsRef<str>>(releases: &mut [S]) {
    releases.sort_by(|a, b| compare_releases(a.as_ref(), b.as_ref()));
}

/// How a freshly requested wildcard target is pinned after resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WildcardPromotion {
    /// `^<version>`
    #[default]
    Caret,
    /// `~<version>`
    Tilde,
}

impl WildcardPromotion {
    /// The range a wildcard is promoted to for the given resolved version.
    pub fn promote(self, version: &str) -> String {
        match self {
            Self::Caret => format!("^{version}"),
            Self::Tilde => format!("~{version}"),
        }
    }
}
