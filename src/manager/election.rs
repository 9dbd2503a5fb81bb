//! Choosing one endpoint per package name.
//!
//! [`elect`] is pure: given the candidates and the policy it returns either a
//! winner or the sorted list of picks that still need a decision. Prompting
//! and logging are left to the caller.

use std::cmp::Ordering;

use super::arena::{Arena, EndpointId};
use crate::endpoint::is_wildcard;
use crate::version::{Range, parse_version, satisfies};

/// How conflicts may be settled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Policy<'a> {
    /// Saved resolution for this name
    pub resolution: Option<&'a str>,
    pub force_latest: bool,
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// One candidate satisfies every request
    Suitable(EndpointId),
    /// The saved resolution picked a candidate
    Resolved(EndpointId),
    /// Force-latest picked the highest candidate
    Forced(EndpointId),
    /// A human has to pick
    NeedsInput,
    /// Nothing may settle the conflict
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub outcome: Outcome,
    /// Conflicting candidates, lowest first. Empty without a conflict.
    pub picks: Vec<EndpointId>,
    /// A saved resolution existed but matched no pick
    pub unsuitable_resolution: bool,
}

impl Ballot {
    /// The elected endpoint, unless a decision is still pending.
    pub fn winner(&self) -> Option<EndpointId> {
        match self.outcome {
            Outcome::Suitable(id) | Outcome::Resolved(id) | Outcome::Forced(id) => Some(id),
            Outcome::NeedsInput | Outcome::Conflict => None,
        }
    }
}

/// Splits candidates into versioned ones, highest first, and the rest.
///
/// Among equal versions the wildcard-targeted candidates come last. The sort
/// is stable, so order is otherwise that of `ids`.
pub fn partition(arena: &Arena, ids: &[EndpointId]) -> (Vec<EndpointId>, Vec<EndpointId>) {
    let (mut semvers, non_semvers): (Vec<_>, Vec<_>) =
        ids.iter().copied().partition(|&id| version_of(arena, id).is_some());
    semvers.sort_by(|&a, &b| {
        let order = version_of(arena, b).cmp(&version_of(arena, a));
        if order != Ordering::Equal {
            return order;
        }
        match (is_wildcard(&arena[a].target), is_wildcard(&arena[b].target)) {
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => Ordering::Equal,
        }
    });
    (semvers, non_semvers)
}

/// Elects among candidates split by [`partition`].
pub fn elect(arena: &Arena, semvers: &[EndpointId], non_semvers: &[EndpointId], policy: &Policy<'_>) -> Ballot {
    let mut picks = match find_suitable(arena, semvers, non_semvers) {
        Ok(id) => {
            return Ballot {
                outcome: Outcome::Suitable(id),
                picks: Vec::new(),
                unsuitable_resolution: false,
            };
        }
        Err(picks) => picks,
    };
    sort_picks(arena, &mut picks);

    let mut unsuitable_resolution = false;
    let unresolvable = picks.iter().any(|&id| arena[id].unresolvable);
    if let Some(resolution) = policy.resolution.filter(|_| !unresolvable) {
        match match_resolution(arena, &picks, resolution) {
            Some(index) => {
                let pick = picks[index];
                return Ballot {
                    outcome: Outcome::Resolved(pick),
                    picks,
                    unsuitable_resolution,
                };
            }
            None => unsuitable_resolution = true,
        }
    }

    let outcome = match picks.last() {
        Some(&highest) if policy.force_latest => Outcome::Forced(highest),
        _ if policy.interactive => Outcome::NeedsInput,
        _ => Outcome::Conflict,
    };
    Ballot {
        outcome,
        picks,
        unsuitable_resolution,
    }
}

/// The candidate every request accepts, or the picks of the conflict.
///
/// Mixing versioned and unversioned candidates is always a conflict. A
/// single unversioned candidate wins. Among versioned candidates, the first
/// (highest) whose version satisfies every other candidate's target wins.
fn find_suitable(
    arena: &Arena,
    semvers: &[EndpointId],
    non_semvers: &[EndpointId],
) -> Result<EndpointId, Vec<EndpointId>> {
    if !semvers.is_empty() && !non_semvers.is_empty() {
        return Err(semvers.iter().chain(non_semvers).copied().collect());
    }
    if !non_semvers.is_empty() {
        return match non_semvers {
            [only] => Ok(*only),
            _ => Err(non_semvers.to_vec()),
        };
    }
    let suitable = semvers.iter().copied().find(|&subject| {
        let Some(version) = version_of(arena, subject) else {
            return false;
        };
        semvers.iter().all(|&other| other == subject || satisfies(&version, &arena[other].target))
    });
    suitable.ok_or_else(|| semvers.to_vec())
}

/// Orders picks lowest first: by version, unversioned below versioned, then
/// by fewer dependants.
fn sort_picks(arena: &Arena, picks: &mut [EndpointId]) {
    picks.sort_by(|&a, &b| {
        let order = match (version_of(arena, a), version_of(arena, b)) {
            (Some(va), Some(vb)) => va.cmp(&vb),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        order.then_with(|| arena[b].dependants.len().cmp(&arena[a].dependants.len()))
    });
}

/// Index of the pick a saved resolution selects.
///
/// A range resolution takes the first pick whose version satisfies it; any
/// resolution also matches a pick's target or release exactly.
pub fn match_resolution(arena: &Arena, picks: &[EndpointId], resolution: &str) -> Option<usize> {
    if let Ok(range) = Range::parse(resolution) {
        let found = picks.iter().position(|&id| version_of(arena, id).is_some_and(|v| range.matches(&v)));
        if found.is_some() {
            return found;
        }
    }
    picks.iter().position(|&id| {
        let endpoint = &arena[id];
        endpoint.target == resolution || endpoint.release() == Some(resolution)
    })
}

fn version_of(arena: &Arena, id: EndpointId) -> Option<semver::Version> {
    arena[id].version().and_then(parse_version)
}
