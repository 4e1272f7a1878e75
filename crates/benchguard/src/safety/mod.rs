//! Hard safety limits, interlocks and slew limiting.
//!
//! Every check runs before a command is dispatched. A failed check returns a
//! [`SafetyViolation`] and the command must not be sent. Violations and slew
//! clamps are appended to a per-equipment audit log capped at
//! [`MAX_SAFETY_EVENTS`] entries.

pub mod slew;

use std::collections::VecDeque;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{error, info};

use benchguard_common::{
    EquipmentId, EquipmentType, MAX_SAFETY_EVENTS, SafetyConfig, SafetyEvent, SafetyEventKind,
    SafetyLimits, SafetyViolation, SlewParameter, ViolationType, push_bounded,
};

pub use slew::{SlewKey, SlewOutcome, SlewRateLimiter};

#[derive(Debug, Default)]
struct EquipmentSafety {
    limits: SafetyLimits,
    interlock: bool,
    events: VecDeque<SafetyEvent>,
}

/// Validates requested outputs against per-equipment limits.
///
/// Limits start from the per-type defaults in [`SafetyConfig`] when an
/// instrument is registered and can be overridden per instance. Ids that were
/// never registered are treated as unbounded.
pub struct SafetyValidator {
    defaults: SafetyConfig,
    equipment: DashMap<EquipmentId, EquipmentSafety>,
    slew: SlewRateLimiter,
}

impl SafetyValidator {
    pub fn new(defaults: SafetyConfig) -> Self {
        Self {
            defaults,
            equipment: DashMap::new(),
            slew: SlewRateLimiter::new(),
        }
    }

    /// Applies the type defaults to an instrument. Its interlock state and
    /// event log are kept if it was registered before.
    pub fn register(&self, equipment_id: &EquipmentId, equipment_type: EquipmentType) {
        let limits = self.defaults.limits_for(equipment_type);
        self.equipment.entry(equipment_id.clone()).or_default().limits = limits;
        info!("Safety limits for {} set to {} defaults", equipment_id, equipment_type);
    }

    /// Per-instance override of the type defaults.
    pub fn set_limits(&self, equipment_id: &EquipmentId, limits: SafetyLimits) {
        self.equipment.entry(equipment_id.clone()).or_default().limits = limits;
    }

    pub fn limits(&self, equipment_id: &EquipmentId) -> SafetyLimits {
        self.equipment
            .get(equipment_id)
            .map(|entry| entry.limits)
            .unwrap_or_default()
    }

    pub fn check_voltage(&self, equipment_id: &EquipmentId, value: f64) -> Result<(), SafetyViolation> {
        let limits = self.limits(equipment_id);
        self.check_bounds(
            equipment_id,
            value,
            (limits.min_voltage, ViolationType::VoltageBelowMin),
            (limits.max_voltage, ViolationType::VoltageAboveMax),
        )
    }

    pub fn check_current(&self, equipment_id: &EquipmentId, value: f64) -> Result<(), SafetyViolation> {
        let limits = self.limits(equipment_id);
        self.check_bounds(
            equipment_id,
            value,
            (limits.min_current, ViolationType::CurrentBelowMin),
            (limits.max_current, ViolationType::CurrentAboveMax),
        )
    }

    /// Checks a power level in watts.
    pub fn check_power(&self, equipment_id: &EquipmentId, value: f64) -> Result<(), SafetyViolation> {
        let limits = self.limits(equipment_id);
        self.check_bounds(
            equipment_id,
            value,
            (None, ViolationType::PowerAboveMax),
            (limits.max_power, ViolationType::PowerAboveMax),
        )
    }

    /// Fails when the instrument requires an interlock that is not set.
    pub fn check_interlock(&self, equipment_id: &EquipmentId) -> Result<(), SafetyViolation> {
        let (required, set) = self
            .equipment
            .get(equipment_id)
            .map(|entry| (entry.limits.require_interlock, entry.interlock))
            .unwrap_or((false, false));

        if required && !set {
            return Err(self.reject(SafetyViolation {
                violation_type: ViolationType::InterlockNotSet,
                attempted_value: 0.0,
                limit_value: 1.0,
                equipment_id: equipment_id.clone(),
            }));
        }
        Ok(())
    }

    pub fn set_interlock(&self, equipment_id: &EquipmentId, engaged: bool) {
        self.equipment.entry(equipment_id.clone()).or_default().interlock = engaged;
        info!(
            "Interlock on {} {}",
            equipment_id,
            if engaged { "engaged" } else { "released" }
        );
    }

    pub fn interlock(&self, equipment_id: &EquipmentId) -> bool {
        self.equipment
            .get(equipment_id)
            .map(|entry| entry.interlock)
            .unwrap_or(false)
    }

    /// Clamps a requested level to the configured slew rate for `parameter`.
    /// Parameters without a configured rate pass through untouched.
    pub fn limit_slew(
        &self,
        equipment_id: &EquipmentId,
        parameter: SlewParameter,
        new_value: f64,
        current_value: f64,
    ) -> f64 {
        self.limit_slew_at(equipment_id, parameter, new_value, current_value, Instant::now())
    }

    pub fn limit_slew_at(
        &self,
        equipment_id: &EquipmentId,
        parameter: SlewParameter,
        new_value: f64,
        current_value: f64,
        now: Instant,
    ) -> f64 {
        let limits = self.limits(equipment_id);
        let rate = match parameter {
            SlewParameter::Voltage => limits.voltage_slew_rate,
            SlewParameter::Current => limits.current_slew_rate,
        };
        let Some(rate) = rate else {
            return new_value;
        };

        let key = SlewKey::new(equipment_id.clone(), parameter);
        let outcome = self.slew.check_and_limit_at(&key, new_value, current_value, rate, now);
        if let (true, Some(max_change)) = (outcome.clamped, outcome.max_change) {
            self.record_event(SafetyEvent {
                timestamp: Utc::now(),
                equipment_id: equipment_id.clone(),
                requested_value: new_value,
                kind: SafetyEventKind::SlewLimited {
                    parameter,
                    applied_value: outcome.value,
                    max_change,
                },
            });
        }
        outcome.value
    }

    pub fn limit_voltage_slew(&self, equipment_id: &EquipmentId, new_value: f64, current_value: f64) -> f64 {
        self.limit_slew(equipment_id, SlewParameter::Voltage, new_value, current_value)
    }

    pub fn limit_current_slew(&self, equipment_id: &EquipmentId, new_value: f64, current_value: f64) -> f64 {
        self.limit_slew(equipment_id, SlewParameter::Current, new_value, current_value)
    }

    /// Rolls back the last slew reference recorded for `parameter`.
    pub fn revert_slew(&self, equipment_id: &EquipmentId, parameter: SlewParameter) {
        self.slew.revert(&SlewKey::new(equipment_id.clone(), parameter));
    }

    /// Drops the slew reference points of one instrument, e.g. after its
    /// outputs were reset out of band.
    pub fn clear_slew_state(&self, equipment_id: &EquipmentId) {
        self.slew.reset_equipment(equipment_id);
    }

    /// The most recent `limit` events for an instrument, oldest first.
    pub fn safety_events(&self, equipment_id: &EquipmentId, limit: usize) -> Vec<SafetyEvent> {
        self.equipment
            .get(equipment_id)
            .map(|entry| {
                let skip = entry.events.len().saturating_sub(limit);
                entry.events.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    fn check_bounds(
        &self,
        equipment_id: &EquipmentId,
        value: f64,
        (min, below): (Option<f64>, ViolationType),
        (max, above): (Option<f64>, ViolationType),
    ) -> Result<(), SafetyViolation> {
        let violated = if let Some(max) = max.filter(|max| value > *max || value.is_nan()) {
            Some((above, max))
        } else {
            min.filter(|min| value < *min || value.is_nan()).map(|min| (below, min))
        };

        match violated {
            Some((violation_type, limit_value)) => Err(self.reject(SafetyViolation {
                violation_type,
                attempted_value: value,
                limit_value,
                equipment_id: equipment_id.clone(),
            })),
            None => Ok(()),
        }
    }

    fn reject(&self, violation: SafetyViolation) -> SafetyViolation {
        error!("Blocked command: {}", violation);
        self.record_event(SafetyEvent::violation(&violation));
        violation
    }

    fn record_event(&self, event: SafetyEvent) {
        let mut entry = self.equipment.entry(event.equipment_id.clone()).or_default();
        push_bounded(&mut entry.events, event, MAX_SAFETY_EVENTS);
    }
}
