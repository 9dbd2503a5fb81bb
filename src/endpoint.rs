//! Endpoints: one request to resolve a package, and its outcome.
//!
//! The textual form is `[<name>=]<source>[#<target>]`:
//!
//! ```text
//! jquery                          source "jquery", target "*"
//! jquery#~2.0.0                   source "jquery", target "~2.0.0"
//! jq=git://host/jquery.git#2.x    name "jq"
//! ```
//!
//! An empty target, `*` and `latest` all mean the wildcard `*`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::core::ResolveError;
use crate::metadata::PackageMeta;

static ENDPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([\w\-]|(?:[\w.\-]+[\w\-])?)=)?([^|#]+)(?:#(.*))?$")
        .expect("endpoint pattern is valid")
});

/// The wildcard target.
pub const WILDCARD: &str = "*";

/// Whether a target means "latest".
pub fn is_wildcard(target: &str) -> bool {
    matches!(target.trim(), "" | "*" | "latest")
}

fn normalize_target(target: &str) -> String {
    if is_wildcard(target) {
        WILDCARD.to_string()
    } else {
        target.trim().to_string()
    }
}

/// A resolution request and, once fetched, its result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: Option<String>,
    pub source: String,
    pub target: String,
    /// The target before wildcard promotion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkg_meta: Option<PackageMeta>,
    /// Explicitly requested by the user
    #[serde(default)]
    pub newly: bool,
    /// Resolved by a resolver that cannot address versions
    #[serde(default)]
    pub untargetable: bool,
    #[serde(default)]
    pub linked: bool,
    #[serde(default)]
    pub missing: bool,
    /// Saved resolutions must not override this endpoint
    #[serde(default)]
    pub unresolvable: bool,
    /// Source was looked up in the registry
    #[serde(default)]
    pub registry: bool,
    /// Names of the packages that depend on this endpoint
    #[serde(default)]
    pub dependants: BTreeSet<String>,
}

impl Endpoint {
    pub fn new(name: Option<&str>, source: &str, target: &str) -> Self {
        Self {
            name: name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
            source: source.trim().to_string(),
            target: normalize_target(target),
            ..Self::default()
        }
    }

    /// Parses `[<name>=]<source>[#<target>]`.
    pub fn decompose(input: &str) -> Result<Self, ResolveError> {
        let caps = ENDPOINT.captures(input.trim()).ok_or_else(|| ResolveError::InvalidEndpoint {
            input: input.to_string(),
            reason: "expected [<name>=]<source>[#<target>]".to_string(),
        })?;
        let name = caps.get(1).map(|m| m.as_str());
        let source = caps.get(2).map_or("", |m| m.as_str());
        let target = caps.get(3).map_or("", |m| m.as_str());
        if source.trim().is_empty() {
            return Err(ResolveError::InvalidEndpoint {
                input: input.to_string(),
                reason: "source is empty".to_string(),
            });
        }
        Ok(Self::new(name, source, target))
    }

    /// Parses one entry of a package's `dependencies` map.
    ///
    /// `"jquery": "~2.0.0"` names a target for source `jquery`, a value that
    /// looks like a locator (`/`, `\` or `@`) is the source itself, and a
    /// value with `#` carries both (an empty source falls back to the key).
    pub fn from_dependency(key: &str, value: &str) -> Result<Self, ResolveError> {
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            return Err(ResolveError::InvalidEndpoint {
                input: value.to_string(),
                reason: "the dependency key must be specified".to_string(),
            });
        }
        let composed = match value.split_once('#') {
            Some((source, target)) => {
                let source = source.trim();
                let source = if source.is_empty() { key } else { source };
                format!("{key}={source}#{}", target.trim())
            }
            None if looks_like_source(value) => format!("{key}={value}#*"),
            None => format!("{key}={key}#{value}"),
        };
        Self::decompose(&composed)
    }

    /// Inverse of [`decompose`](Self::decompose). Wildcard targets are omitted.
    pub fn compose(&self) -> String {
        let mut composed = String::new();
        if let Some(name) = &self.name {
            composed.push_str(name);
            composed.push('=');
        }
        composed.push_str(&self.source);
        if !is_wildcard(&self.target) {
            composed.push('#');
            composed.push_str(&self.target);
        }
        composed
    }

    /// The name, or an empty string if not yet known.
    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn has_wildcard_target(&self) -> bool {
        is_wildcard(&self.target)
    }

    /// The resolved version, if the package declares one.
    pub fn version(&self) -> Option<&str> {
        self.pkg_meta.as_ref().and_then(|m| m.version.as_deref())
    }

    /// The resolved release label.
    pub fn release(&self) -> Option<&str> {
        self.pkg_meta.as_ref().and_then(PackageMeta::release_label)
    }

    /// Whether two endpoints describe the same request.
    pub fn same_request(&self, other: &Self) -> bool {
        self.name == other.name && self.source == other.source && self.target == other.target
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compose())
    }
}

fn looks_like_source(value: &str) -> bool {
    value.contains(['/', '\\', '@'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompose() {
        let ep = Endpoint::decompose("jquery").unwrap();
        assert_eq!(ep.name, None);
        assert_eq!(ep.source, "jquery");
        assert_eq!(ep.target, "*");

        let ep = Endpoint::decompose("jq=git://github.com/jquery/jquery.git#~2.0.0").unwrap();
        assert_eq!(ep.name.as_deref(), Some("jq"));
        assert_eq!(ep.source, "git://github.com/jquery/jquery.git");
        assert_eq!(ep.target, "~2.0.0");

        assert_eq!(Endpoint::decompose("foo#latest").unwrap().target, "*");
        assert_eq!(Endpoint::decompose("foo#").unwrap().target, "*");
        assert_eq!(Endpoint::decompose("my.pkg=./some/path").unwrap().name.as_deref(), Some("my.pkg"));
    }

    #[test]
    fn test_decompose_invalid() {
        let err = Endpoint::decompose("").unwrap_err();
        assert_eq!(err.code(), "INVALID_ENDPOINT");
        assert!(Endpoint::decompose("a|b").is_err());
    }

    #[test]
    fn test_compose_round_trip() {
        for input in ["jquery", "jquery#~2.0.0", "jq=git@github.com:jquery/jquery.git#2.x"] {
            assert_eq!(Endpoint::decompose(input).unwrap().compose(), input);
        }
        assert_eq!(Endpoint::decompose("foo#*").unwrap().compose(), "foo");
    }

    #[test]
    fn test_from_dependency() {
        let ep = Endpoint::from_dependency("jquery", "~2.0.0").unwrap();
        assert_eq!((ep.name_str(), ep.source.as_str(), ep.target.as_str()), ("jquery", "jquery", "~2.0.0"));

        let ep = Endpoint::from_dependency("jquery", "jquery/jquery").unwrap();
        assert_eq!((ep.source.as_str(), ep.target.as_str()), ("jquery/jquery", "*"));

        let ep = Endpoint::from_dependency("jq", "git://host/jquery.git#1.8").unwrap();
        assert_eq!((ep.source.as_str(), ep.target.as_str()), ("git://host/jquery.git", "1.8"));

        let ep = Endpoint::from_dependency("jquery", "#1.8").unwrap();
        assert_eq!((ep.source.as_str(), ep.target.as_str()), ("jquery", "1.8"));

        let ep = Endpoint::from_dependency("jquery", "").unwrap();
        assert_eq!(ep.target, "*");

        assert!(Endpoint::from_dependency("", "1.0.0").is_err());
    }
}
