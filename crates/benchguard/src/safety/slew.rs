//! Time-aware rate-of-change clamp.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::warn;

use benchguard_common::{EquipmentId, SlewParameter};

/// Elapsed time never counts as less than this.
pub const MIN_ELAPSED: Duration = Duration::from_millis(1);

/// Identifies one controlled value on one instrument.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlewKey {
    pub equipment_id: EquipmentId,
    pub parameter: SlewParameter,
}

impl SlewKey {
    pub fn new(equipment_id: EquipmentId, parameter: SlewParameter) -> Self {
        Self {
            equipment_id,
            parameter,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct SlewPoint {
    value: f64,
    at: Instant,
    /// Reference replaced by this one, kept for [`SlewRateLimiter::revert`]
    previous: Option<(f64, Instant)>,
}

/// What the limiter returned for one request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlewOutcome {
    /// The value the caller may apply
    pub value: f64,
    pub clamped: bool,
    /// Largest change allowed for this call, `None` on the first call for a key
    pub max_change: Option<f64>,
}

/// Per-key slew limiter.
///
/// The first request for a key is passed through and becomes the reference
/// point. Every later request is measured against the time since the previous
/// one, and the stored point is always the value actually returned.
#[derive(Default)]
pub struct SlewRateLimiter {
    points: DashMap<SlewKey, SlewPoint>,
}

impl SlewRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_and_limit(
        &self,
        key: &SlewKey,
        new_value: f64,
        current_value: f64,
        max_rate_per_sec: f64,
    ) -> f64 {
        self.check_and_limit_at(key, new_value, current_value, max_rate_per_sec, Instant::now())
            .value
    }

    /// [`SlewRateLimiter::check_and_limit`] against an explicit clock reading.
    pub fn check_and_limit_at(
        &self,
        key: &SlewKey,
        new_value: f64,
        current_value: f64,
        max_rate_per_sec: f64,
        now: Instant,
    ) -> SlewOutcome {
        match self.points.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(SlewPoint {
                    value: new_value,
                    at: now,
                    previous: None,
                });
                SlewOutcome {
                    value: new_value,
                    clamped: false,
                    max_change: None,
                }
            }
            Entry::Occupied(mut occupied) => {
                let elapsed = now.saturating_duration_since(occupied.get().at).max(MIN_ELAPSED);
                let max_change = max_rate_per_sec.max(0.0) * elapsed.as_secs_f64();
                let requested = new_value - current_value;

                let (value, clamped) = if requested.abs() > max_change {
                    let limited = current_value + max_change.copysign(requested);
                    warn!(
                        "Slew limit on {} {}: requested {} -> {}, limited to {} ({}/s over {:?})",
                        key.equipment_id,
                        key.parameter.as_str(),
                        current_value,
                        new_value,
                        limited,
                        max_rate_per_sec,
                        elapsed
                    );
                    (limited, true)
                } else {
                    (new_value, false)
                };

                let replaced = *occupied.get();
                *occupied.get_mut() = SlewPoint {
                    value,
                    at: now,
                    previous: Some((replaced.value, replaced.at)),
                };
                SlewOutcome {
                    value,
                    clamped,
                    max_change: Some(max_change),
                }
            }
        }
    }

    /// Last value handed out for `key`.
    pub fn last_value(&self, key: &SlewKey) -> Option<f64> {
        self.points.get(key).map(|point| point.value)
    }

    /// Undoes the last request for `key`, restoring the reference point it
    /// replaced. Used when the limited value never reached the instrument.
    pub fn revert(&self, key: &SlewKey) {
        if let Entry::Occupied(mut occupied) = self.points.entry(key.clone()) {
            match occupied.get().previous {
                Some((value, at)) => {
                    *occupied.get_mut() = SlewPoint {
                        value,
                        at,
                        previous: None,
                    };
                }
                None => {
                    occupied.remove();
                }
            }
        }
    }

    /// Forgets every reference point for one instrument.
    pub fn reset_equipment(&self, equipment_id: &EquipmentId) {
        self.points.retain(|key, _| &key.equipment_id != equipment_id);
    }
}
