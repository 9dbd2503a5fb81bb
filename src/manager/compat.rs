//! Whether a new request can reuse an endpoint already resolved or in flight.

use crate::endpoint::Endpoint;
use crate::version::{Bound, Range, parse_version, satisfies};

/// Whether `candidate` can be served by `resolved`.
///
/// Identical targets always are. Once `resolved` has a version, a version
/// target must equal it and a range target must accept it. While it is still
/// being fetched only the targets can be compared: version against range,
/// version against version, or two ranges sharing the same upper bound.
pub fn are_compatible(candidate: &Endpoint, resolved: &Endpoint) -> bool {
    if candidate.target == resolved.target {
        return true;
    }

    let candidate_version = parse_version(&candidate.target);
    let candidate_range = Range::parse(&candidate.target).ok();

    let Some(resolved_version) = resolved.version().and_then(parse_version) else {
        let resolved_version = parse_version(&resolved.target);
        let resolved_range = Range::parse(&resolved.target).ok();

        if let (Some(version), Some(range)) = (&candidate_version, &resolved_range) {
            return range.matches(version);
        }
        if let (Some(version), Some(range)) = (&resolved_version, &candidate_range) {
            return range.matches(version);
        }
        if let (Some(a), Some(b)) = (&candidate_version, &resolved_version) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&candidate_range, &resolved_range) {
            return match (a.cap(Bound::Highest), b.cap(Bound::Highest)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
        }
        return false;
    };

    if let Some(version) = candidate_version {
        return version == resolved_version;
    }
    if candidate_range.is_some() {
        return satisfies(&resolved_version, &candidate.target);
    }
    false
}
