use std::collections::BTreeMap;
use std::sync::Arc;

use crate::hal::config::EquipmentConfig;
use crate::hal::equipment::Equipment;

/// Equipment registered with a manager, locked for the duration of each use
pub type SharedEquipment = Arc<tokio::sync::Mutex<Equipment>>;

/// Errors raised when populating a [`HardwareManager`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    /// A piece of equipment with this name is already registered
    #[error("equipment named {0} is already registered")]
    Duplicate(String),
}

/// Name-keyed registry of equipment with best-effort aggregate operations
///
/// The aggregate operations visit every item independently: one failure is
/// logged and recorded in the returned map, and never stops the others.
#[derive(Debug, Default)]
pub struct HardwareManager {
    equipment: BTreeMap<String, SharedEquipment>,
}

impl HardwareManager {
    /// empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// build and register one driver per config
    pub fn from_configs(configs: &[EquipmentConfig]) -> Result<Self, ManagerError> {
        let mut manager = Self::new();
        for config in configs {
            manager.add(Equipment::from_config(config))?;
        }
        Ok(manager)
    }

    /// register `equipment` under its own name
    pub fn add(&mut self, equipment: impl Into<Equipment>) -> Result<(), ManagerError> {
        let equipment = equipment.into();
        let name = equipment.name().to_string();
        if self.equipment.contains_key(&name) {
            return Err(ManagerError::Duplicate(name));
        }
        tracing::info!("added {} {}", equipment.kind(), name);
        self.equipment
            .insert(name, Arc::new(tokio::sync::Mutex::new(equipment)));
        Ok(())
    }

    /// look up by name
    pub fn get(&self, name: &str) -> Option<SharedEquipment> {
        self.equipment.get(name).cloned()
    }

    /// registered names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.equipment.keys().map(String::as_str)
    }

    /// number of registered items
    pub fn len(&self) -> usize {
        self.equipment.len()
    }

    /// true if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.equipment.is_empty()
    }

    /// connect and initialize every item, returning per-name success
    pub async fn connect_all(&self) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for (name, equipment) in &self.equipment {
            let mut equipment = equipment.lock().await;
            let outcome = match equipment.connect().await {
                Ok(()) => equipment.initialize().await,
                Err(err) => Err(err),
            };
            let success = match outcome {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!("unable to bring up {}: {}", name, err);
                    false
                }
            };
            results.insert(name.clone(), success);
        }
        results
    }

    /// close every transport
    pub async fn disconnect_all(&self) {
        for equipment in self.equipment.values() {
            equipment.lock().await.disconnect().await;
        }
    }

    /// items whose transport is currently open
    pub async fn connected_equipment(&self) -> Vec<SharedEquipment> {
        let mut connected = Vec::new();
        for equipment in self.equipment.values() {
            if equipment.lock().await.is_connected() {
                connected.push(equipment.clone());
            }
        }
        connected
    }

    /// self test every connected item, returning per-name pass/fail
    pub async fn self_test_all(&self) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for (name, equipment) in &self.equipment {
            let mut equipment = equipment.lock().await;
            if !equipment.is_connected() {
                continue;
            }
            let passed = match equipment.self_test().await {
                Ok(passed) => passed,
                Err(err) => {
                    tracing::warn!("self test of {} failed: {}", name, err);
                    false
                }
            };
            results.insert(name.clone(), passed);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{ConnectionConfig, EquipmentKind, Multimeter, PowerSupply, Transport};
    use tokio_test::io::Builder;

    fn unreachable(name: &str, kind: EquipmentKind) -> EquipmentConfig {
        EquipmentConfig::new(name, kind, ConnectionConfig::tcp("127.0.0.1", 1))
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut manager = HardwareManager::new();
        manager
            .add(Equipment::from_config(&unreachable("dmm", EquipmentKind::Multimeter)))
            .unwrap();
        assert_eq!(
            manager.add(Equipment::from_config(&unreachable("dmm", EquipmentKind::PowerSupply))),
            Err(ManagerError::Duplicate("dmm".to_string()))
        );
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn from_configs_propagates_duplicates() {
        let configs = [
            unreachable("psu", EquipmentKind::PowerSupply),
            unreachable("psu", EquipmentKind::PowerSupply),
        ];
        assert!(HardwareManager::from_configs(&configs).is_err());
    }

    #[tokio::test]
    async fn self_test_skips_disconnected_items() {
        let mock = Builder::new().write(b"*TST?\r\n").read(b"0\r\n").build();
        let mut manager = HardwareManager::new();
        manager.add(Multimeter::new("dmm", Transport::mock(mock))).unwrap();
        manager
            .add(PowerSupply::new(
                "psu",
                Transport::new(ConnectionConfig::tcp("127.0.0.1", 1)),
            ))
            .unwrap();

        let results = manager.self_test_all().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results.get("dmm"), Some(&true));
        assert_eq!(manager.connected_equipment().await.len(), 1);
        assert_eq!(manager.names().collect::<Vec<_>>(), ["dmm", "psu"]);
    }

    #[tokio::test]
    async fn connect_all_does_not_abort_on_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mock = Builder::new()
            .write(b"*IDN?\r\n")
            .read(b"SIM,DMM\r\n")
            .write(b"*RST\r\n")
            .build();
        let mut manager = HardwareManager::new();
        manager
            .add(PowerSupply::new(
                "a_psu",
                Transport::new(ConnectionConfig::tcp("127.0.0.1", port)),
            ))
            .unwrap();
        manager.add(Multimeter::new("b_dmm", Transport::mock(mock))).unwrap();

        let results = manager.connect_all().await;
        assert_eq!(results.get("a_psu"), Some(&false));
        assert_eq!(results.get("b_dmm"), Some(&true));
    }
}
