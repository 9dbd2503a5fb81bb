//! Range expressions over semantic versions.
//!
//! Package targets use the range grammar common to JavaScript package
//! registries rather than Cargo's `VersionReq` syntax: whitespace separates
//! comparators that must all hold, `||` separates alternatives, and the
//! sugar forms `~`, `^`, `x`-ranges, partial versions and hyphen ranges are
//! accepted. Every expression is desugared into sets of primitive
//! comparators so that matching and bound extraction work on one shape.
//!
//! ```text
//! ~1.2.3        >=1.2.3 <1.3.0
//! ^0.2.3        >=0.2.3 <0.3.0
//! 1.2           >=1.2.0 <1.3.0
//! 1.2 - 2.3     >=1.2.0 <2.4.0
//! >1.2          >=1.3.0
//! ```

use regex::Regex;
use semver::{Prerelease, Version};
use std::fmt;
use std::sync::LazyLock;

use crate::core::ResolveError;

static PARTIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[v=]?(\d+|[xX*])(?:\.(\d+|[xX*])(?:\.(\d+|[xX*])(?:-([0-9A-Za-z.\-]+))?(?:\+([0-9A-Za-z.\-]+))?)?)?$",
    )
    .expect("partial version pattern is valid")
});

static HYPHEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+-\s+(\S+)$").expect("hyphen pattern is valid"));

static OPERATOR_GAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(~>|<=|>=|<|>|=|~|\^)\s+").expect("operator gap pattern is valid")
});

/// Primitive comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// A single `op version` test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
}

impl Comparator {
    fn new(op: Op, version: Version) -> Self {
        Self {
            op,
            version,
        }
    }

    /// Tests the version against this comparator, ignoring prerelease gating.
    pub fn test(&self, version: &Version) -> bool {
        match self.op {
            Op::Eq => version == &self.version,
            Op::Gt => version > &self.version,
            Op::Gte => version >= &self.version,
            Op::Lt => version < &self.version,
            Op::Lte => version <= &self.version,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)
    }
}

/// A parsed range: a disjunction of comparator sets.
///
/// An empty comparator set matches every non-prerelease version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    raw: String,
    sets: Vec<Vec<Comparator>>,
}

/// Which end of a range [`Range::cap`] should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Highest,
    Lowest,
}

#[derive(Debug, Clone)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
}

impl Partial {
    fn parse(input: &str) -> Option<Self> {
        let caps = PARTIAL.captures(input)?;
        let part = |idx: usize| -> Option<Option<u64>> {
            match caps.get(idx) {
                None => Some(None),
                Some(m) if matches!(m.as_str(), "x" | "X" | "*") => Some(None),
                Some(m) => m.as_str().parse::<u64>().ok().map(Some),
            }
        };
        let major = part(1)?;
        let mut minor = part(2)?;
        let mut patch = part(3)?;
        // Anything after a wildcard is a wildcard too
        if major.is_none() {
            minor = None;
        }
        if minor.is_none() {
            patch = None;
        }
        let pre = match caps.get(4) {
            Some(m) if patch.is_some() => Prerelease::new(m.as_str()).ok()?,
            _ => Prerelease::EMPTY,
        };
        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    fn floor(&self) -> Version {
        let mut version = Version::new(
            self.major.unwrap_or(0),
            self.minor.unwrap_or(0),
            self.patch.unwrap_or(0),
        );
        version.pre = self.pre.clone();
        version
    }

    /// First version above everything the partial's given components cover.
    /// `None` for a bare wildcard, a full version, or when no such version
    /// is representable.
    fn ceiling(&self) -> Option<Version> {
        match (self.major, self.minor, self.patch) {
            (Some(major), None, _) => next_major(major),
            (Some(major), Some(minor), None) => next_minor(major, minor),
            _ => None,
        }
    }

    fn is_full(&self) -> bool {
        self.patch.is_some()
    }
}

fn nothing() -> Vec<Comparator> {
    let mut zero = Version::new(0, 0, 0);
    zero.pre = Prerelease::new("0").unwrap_or(Prerelease::EMPTY);
    vec![Comparator::new(Op::Lt, zero)]
}

// Components may sit at u64::MAX; a bump overflowing every component
// leaves the range without an upper bound.
fn next_major(major: u64) -> Option<Version> {
    major.checked_add(1).map(|major| Version::new(major, 0, 0))
}

fn next_minor(major: u64, minor: u64) -> Option<Version> {
    match minor.checked_add(1) {
        Some(minor) => Some(Version::new(major, minor, 0)),
        None => next_major(major),
    }
}

fn next_patch(major: u64, minor: u64, patch: u64) -> Option<Version> {
    match patch.checked_add(1) {
        Some(patch) => Some(Version::new(major, minor, patch)),
        None => next_minor(major, minor),
    }
}

fn bounded(floor: Version, upper: Option<Version>) -> Vec<Comparator> {
    let mut set = vec![Comparator::new(Op::Gte, floor)];
    set.extend(upper.map(|upper| Comparator::new(Op::Lt, upper)));
    set
}

fn desugar_tilde(p: &Partial) -> Vec<Comparator> {
    let Some(major) = p.major else {
        return Vec::new();
    };
    let upper = match p.minor {
        None => next_major(major),
        Some(minor) => next_minor(major, minor),
    };
    bounded(p.floor(), upper)
}

fn desugar_caret(p: &Partial) -> Vec<Comparator> {
    let Some(major) = p.major else {
        return Vec::new();
    };
    let upper = match (major, p.minor, p.patch) {
        (0, None, _) => next_major(0),
        (0, Some(minor), None) => next_minor(0, minor),
        (0, Some(0), Some(patch)) => next_patch(0, 0, patch),
        (0, Some(minor), Some(_)) => next_minor(0, minor),
        (major, _, _) => next_major(major),
    };
    bounded(p.floor(), upper)
}

fn desugar_primitive(op: Op, p: &Partial) -> Vec<Comparator> {
    if p.major.is_none() {
        return match op {
            Op::Gt | Op::Lt => nothing(),
            _ => Vec::new(),
        };
    }
    if p.is_full() {
        return vec![Comparator::new(op, p.floor())];
    }
    let ceiling = p.ceiling();
    match op {
        Op::Eq => bounded(p.floor(), ceiling),
        Op::Gte => vec![Comparator::new(Op::Gte, p.floor())],
        Op::Gt => match ceiling {
            Some(ceiling) => vec![Comparator::new(Op::Gte, ceiling)],
            None => nothing(),
        },
        Op::Lt => vec![Comparator::new(Op::Lt, p.floor())],
        Op::Lte => ceiling.map(|c| Comparator::new(Op::Lt, c)).into_iter().collect(),
    }
}

fn desugar_hyphen(from: &Partial, to: &Partial) -> Vec<Comparator> {
    let mut set = Vec::new();
    if from.major.is_some() {
        set.push(Comparator::new(Op::Gte, from.floor()));
    }
    if to.is_full() {
        set.push(Comparator::new(Op::Lte, to.floor()));
    } else if let Some(ceiling) = to.ceiling() {
        set.push(Comparator::new(Op::Lt, ceiling));
    }
    set
}

fn parse_token(token: &str) -> Option<Vec<Comparator>> {
    let (op, rest) = if let Some(rest) = token.strip_prefix("~>") {
        ("~", rest)
    } else if let Some(rest) = token.strip_prefix(">=") {
        (">=", rest)
    } else if let Some(rest) = token.strip_prefix("<=") {
        ("<=", rest)
    } else if let Some(rest) = token.strip_prefix('>') {
        (">", rest)
    } else if let Some(rest) = token.strip_prefix('<') {
        ("<", rest)
    } else if let Some(rest) = token.strip_prefix('~') {
        ("~", rest)
    } else if let Some(rest) = token.strip_prefix('^') {
        ("^", rest)
    } else if let Some(rest) = token.strip_prefix('=') {
        ("=", rest)
    } else {
        ("", token)
    };
    let partial = Partial::parse(rest.trim())?;
    Some(match op {
        "~" => desugar_tilde(&partial),
        "^" => desugar_caret(&partial),
        ">=" => desugar_primitive(Op::Gte, &partial),
        "<=" => desugar_primitive(Op::Lte, &partial),
        ">" => desugar_primitive(Op::Gt, &partial),
        "<" => desugar_primitive(Op::Lt, &partial),
        _ => desugar_primitive(Op::Eq, &partial),
    })
}

fn parse_set(input: &str) -> Option<Vec<Comparator>> {
    let input = input.trim();
    if input.is_empty() {
        return Some(Vec::new());
    }
    if let Some(caps) = HYPHEN.captures(input) {
        let from = Partial::parse(&caps[1])?;
        let to = Partial::parse(&caps[2])?;
        return Some(desugar_hyphen(&from, &to));
    }
    let collapsed = OPERATOR_GAP.replace_all(input, "$1");
    let mut set = Vec::new();
    for token in collapsed.split_whitespace() {
        set.extend(parse_token(token)?);
    }
    Some(set)
}

impl Range {
    /// Parses a range expression.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidRange`] when any comparator set fails to parse.
    pub fn parse(input: &str) -> Result<Self, ResolveError> {
        let raw = input.trim().to_string();
        let mut sets = Vec::new();
        for part in raw.split("||") {
            match parse_set(part) {
                Some(set) => sets.push(set),
                None => {
                    return Err(ResolveError::InvalidRange {
                        range: input.to_string(),
                    });
                }
            }
        }
        Ok(Self {
            raw,
            sets,
        })
    }

    /// The expression as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn sets(&self) -> &[Vec<Comparator>] {
        &self.sets
    }

    /// Whether the version satisfies the range. Prerelease versions only
    /// match sets that name a prerelease on the same `major.minor.patch`.
    pub fn matches(&self, version: &Version) -> bool {
        self.sets.iter().any(|set| set_matches(set, version, false))
    }

    /// Like [`matches`](Self::matches) but lets prereleases through.
    pub fn matches_including_prerelease(&self, version: &Version) -> bool {
        self.sets.iter().any(|set| set_matches(set, version, true))
    }

    /// The highest version in `versions` that satisfies the range.
    pub fn max_satisfying<'a, I>(&self, versions: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions.into_iter().filter(|v| self.matches(v)).max()
    }

    /// The most extreme comparator version in the range and the operator that
    /// bounds it. First seen wins on ties. `None` for unbounded ranges.
    pub fn cap(&self, bound: Bound) -> Option<(Version, &'static str)> {
        let mut cap: Option<(Version, &'static str)> = None;
        for comparator in self.sets.iter().flatten() {
            let replace = match &cap {
                None => true,
                Some((current, _)) => match bound {
                    Bound::Highest => comparator.version > *current,
                    Bound::Lowest => comparator.version < *current,
                },
            };
            if replace {
                cap = Some((comparator.version.clone(), comparator.op.as_str()));
            }
        }
        cap
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn set_matches(set: &[Comparator], version: &Version, include_prerelease: bool) -> bool {
    if !set.iter().all(|c| c.test(version)) {
        return false;
    }
    if version.pre.is_empty() || include_prerelease {
        return true;
    }
    set.iter().any(|c| {
        !c.version.pre.is_empty()
            && c.version.major == version.major
            && c.version.minor == version.minor
            && c.version.patch == version.patch
    })
}

/// Whether the string parses as a range expression.
pub fn is_valid_range(input: &str) -> bool {
    Range::parse(input).is_ok()
}

/// Whether the version satisfies the range expression. Invalid ranges never match.
pub fn satisfies(version: &Version, range: &str) -> bool {
    Range::parse(range).is_ok_and(|r| r.matches(version))
}
