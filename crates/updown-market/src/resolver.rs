//! Picks the "current" daily market out of a series.
//!
//! Preference order: among instances that are open and end in the
//! future, the one closing soonest. When nothing qualifies (overnight
//! gap, series winding down), the latest-ending instance regardless of
//! state, so callers always get something to point at.

use chrono::{DateTime, Utc};
use thiserror::Error;
use updown_common::MarketInstance;

/// Errors from current-instance resolution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no market instances to resolve")]
    NoInstances,
}

/// Resolves the current instance at `now`.
///
/// Ties on `end_time` go to the first instance in input order, in both
/// the primary pass and the fallback, so resolution is deterministic
/// for any fixed input ordering.
pub fn resolve_current(
    instances: &[MarketInstance],
    now: DateTime<Utc>,
) -> Result<&MarketInstance, ResolveError> {
    if instances.is_empty() {
        return Err(ResolveError::NoInstances);
    }

    let mut soonest_open: Option<&MarketInstance> = None;
    for instance in instances {
        if instance.is_open(now) {
            match soonest_open {
                Some(best) if instance.end_time < best.end_time => {
                    soonest_open = Some(instance);
                }
                None => soonest_open = Some(instance),
                _ => {}
            }
        }
    }
    if let Some(best) = soonest_open {
        return Ok(best);
    }

    let mut latest: Option<&MarketInstance> = None;
    for instance in instances {
        match latest {
            Some(best) if instance.end_time > best.end_time => {
                latest = Some(instance);
            }
            None => latest = Some(instance),
            _ => {}
        }
    }

    // Non-empty input guarantees a fallback candidate.
    latest.ok_or(ResolveError::NoInstances)
}
