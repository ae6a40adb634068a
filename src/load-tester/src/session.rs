//! Per-virtual-user state.
//!
//! Each user gets a session id and deterministic slices of the bundle and
//! combo id spaces. Bundle slices of neighbouring users intentionally overlap
//! so that several users contend for the same hot bundles.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::IdRangeConfig;
use crate::data_pool::{self, DataPool};
use crate::error::Result;

/// Inclusive id range `[lo, hi]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub lo: u64,
    pub hi: u64,
}

impl IdRange {
    pub fn contains(&self, id: u64) -> bool {
        self.lo <= id && id <= self.hi
    }
}

impl std::fmt::Display for IdRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.lo, self.hi)
    }
}

/// Slice `[min, max]` into consecutive chunks of `per_user` ids and widen
/// chunk `index` by `per_user * overlap_fraction` on both sides.
///
/// Always returns `min <= lo <= hi <= max`; indices past the end of the space
/// collapse onto `max`.
pub fn partition_range(
    index: u64,
    min: u64,
    max: u64,
    per_user: u64,
    overlap_fraction: f64,
) -> IdRange {
    let start = min.saturating_add(index.saturating_mul(per_user)).min(max);
    let end = start.saturating_add(per_user).min(max);
    let overlap = (per_user as f64 * overlap_fraction) as u64;

    IdRange {
        lo: start.saturating_sub(overlap).max(min),
        hi: end.saturating_add(overlap).min(max),
    }
}

pub fn bundle_range_for_user(index: u64, config: &IdRangeConfig) -> IdRange {
    partition_range(
        index,
        config.bundle_min,
        config.bundle_max,
        config.bundle_range_per_user,
        config.overlap_fraction,
    )
}

/// Combo ranges are partitioned without overlap.
pub fn combo_range_for_user(index: u64, config: &IdRangeConfig) -> IdRange {
    partition_range(
        index,
        config.combo_min,
        config.combo_max,
        config.combo_range_per_user,
        0.0,
    )
}

/// State owned by one virtual user for its whole lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub user_index: u64,
    pub session_id: String,
    pub bundle_range: IdRange,
    pub combo_range: IdRange,
}

impl UserSession {
    /// Create the session for user `user_index`.
    ///
    /// The session id is `fixed_session_id` when given, otherwise drawn from
    /// the pool.
    pub fn start<R>(
        user_index: u64,
        pool: &DataPool,
        fixed_session_id: Option<&str>,
        ranges: &IdRangeConfig,
        rng: &mut R,
    ) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        let session_id = match fixed_session_id {
            Some(id) => id.to_string(),
            None => data_pool::choose(&pool.session_ids, "session ids", rng)?.clone(),
        };

        Ok(Self {
            user_index,
            session_id,
            bundle_range: bundle_range_for_user(user_index, ranges),
            combo_range: combo_range_for_user(user_index, ranges),
        })
    }

    /// Pick a bundle id, preferring candidates inside this user's range.
    pub fn pick_bundle<R>(&self, candidates: &[u64], rng: &mut R) -> Result<u64>
    where
        R: Rng + ?Sized,
    {
        pick_in_range(candidates, self.bundle_range, "bundle ids", rng)
    }

    /// Pick a combo id, preferring candidates inside this user's range.
    pub fn pick_combo<R>(&self, candidates: &[u64], rng: &mut R) -> Result<u64>
    where
        R: Rng + ?Sized,
    {
        pick_in_range(candidates, self.combo_range, "combo ids", rng)
    }
}

// Pool ids rarely cover a user's whole range, so fall back to any pool id
// rather than inventing one.
fn pick_in_range<R>(candidates: &[u64], range: IdRange, what: &str, rng: &mut R) -> Result<u64>
where
    R: Rng + ?Sized,
{
    let in_range: Vec<u64> = candidates
        .iter()
        .copied()
        .filter(|id| range.contains(*id))
        .collect();

    if in_range.is_empty() {
        data_pool::choose(candidates, what, rng).copied()
    } else {
        data_pool::choose(&in_range, what, rng).copied()
    }
}
