//! The driver seam and the fleet registry.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use benchguard_common::{EquipmentError, EquipmentId, EquipmentStatus, EquipmentType};

/// A single instrument as exposed by its driver.
///
/// Drivers are shared between the monitor, the diagnostics engine and the
/// command path, so every method takes `&self` and implementations handle
/// their own interior locking.
#[async_trait]
pub trait Equipment: Send + Sync {
    /// Kind of instrument, used to pick default safety limits.
    fn equipment_type(&self) -> EquipmentType;

    /// Opens (or re-opens) the session with the instrument.
    async fn connect(&self) -> Result<(), EquipmentError>;

    /// Reports whether the session is live.
    async fn status(&self) -> Result<EquipmentStatus, EquipmentError>;

    /// Sends a command and waits for its reply.
    async fn query(&self, command: &str) -> Result<String, EquipmentError>;

    /// Sends a command that has no reply.
    async fn write(&self, command: &str) -> Result<(), EquipmentError>;

    /// Turns every output off.
    ///
    /// Measurement-only instruments keep the default, which reports the
    /// operation as unsupported.
    async fn disable_output(&self) -> Result<(), EquipmentError> {
        Err(EquipmentError::Unsupported("disable_output"))
    }
}

/// Concurrent map of every instrument the control-plane knows about.
///
/// Lookups hand out cloned `Arc`s so no map guard is ever held across an
/// `.await`.
#[derive(Default)]
pub struct EquipmentRegistry {
    equipment: DashMap<EquipmentId, Arc<dyn Equipment>>,
}

impl std::fmt::Debug for EquipmentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EquipmentRegistry [{} instruments]", self.equipment.len())
    }
}

impl EquipmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an instrument, returning the one it replaced.
    pub fn insert(
        &self,
        id: EquipmentId,
        equipment: Arc<dyn Equipment>,
    ) -> Option<Arc<dyn Equipment>> {
        self.equipment.insert(id, equipment)
    }

    pub fn remove(&self, id: &EquipmentId) -> Option<Arc<dyn Equipment>> {
        self.equipment.remove(id).map(|(_, equipment)| equipment)
    }

    pub fn get(&self, id: &EquipmentId) -> Option<Arc<dyn Equipment>> {
        self.equipment.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &EquipmentId) -> bool {
        self.equipment.contains_key(id)
    }

    /// Sorted ids of every registered instrument.
    pub fn ids(&self) -> Vec<EquipmentId> {
        let mut ids: Vec<EquipmentId> = self.equipment.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Point-in-time copy of the registry, sorted by id.
    pub fn snapshot(&self) -> Vec<(EquipmentId, Arc<dyn Equipment>)> {
        let mut entries: Vec<(EquipmentId, Arc<dyn Equipment>)> = self
            .equipment
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.equipment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equipment.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedInstrument;

    #[test]
    fn test_registry_snapshot_is_sorted() {
        let registry = EquipmentRegistry::new();
        for id in ["scope-2", "psu-1", "load-7"] {
            registry.insert(
                EquipmentId::new(id),
                Arc::new(SimulatedInstrument::new(EquipmentType::Oscilloscope)),
            );
        }

        let ids: Vec<String> = registry.snapshot().into_iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec!["load-7", "psu-1", "scope-2"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_insert_replaces() {
        let registry = EquipmentRegistry::new();
        let id = EquipmentId::new("psu-1");
        assert!(registry
            .insert(id.clone(), Arc::new(SimulatedInstrument::new(EquipmentType::PowerSupply)))
            .is_none());
        assert!(registry
            .insert(id.clone(), Arc::new(SimulatedInstrument::new(EquipmentType::PowerSupply)))
            .is_some());
        assert!(registry.remove(&id).is_some());
        assert!(registry.is_empty());
    }
}
