use crate::error::ConnectionError;
use crate::hal::config::{EquipmentConfig, EquipmentKind};
use crate::hal::multimeter::Multimeter;
use crate::hal::power_supply::PowerSupply;
use crate::hal::transport::Transport;

/// Errors raised by equipment drivers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    /// Driver was used while its transport is closed
    #[error("equipment {0} is not connected")]
    NotConnected(String),
    /// Transport failure while talking to the equipment
    #[error("equipment {name}: {source}")]
    Connection {
        /// equipment name
        name: String,
        /// underlying transport error
        #[source]
        source: ConnectionError,
    },
    /// Reply could not be parsed
    #[error("invalid reply to {command}: {reply:?}")]
    InvalidReply {
        /// command that was sent
        command: String,
        /// text that came back
        reply: String,
    },
}

/// Any driver the [`HardwareManager`](crate::hal::HardwareManager) can hold
#[derive(Debug)]
pub enum Equipment {
    /// digital multimeter
    Multimeter(Multimeter),
    /// programmable power supply
    PowerSupply(PowerSupply),
}

impl From<Multimeter> for Equipment {
    fn from(x: Multimeter) -> Self {
        Equipment::Multimeter(x)
    }
}

impl From<PowerSupply> for Equipment {
    fn from(x: PowerSupply) -> Self {
        Equipment::PowerSupply(x)
    }
}

impl Equipment {
    /// build the driver described by `config`, not yet connected
    pub fn from_config(config: &EquipmentConfig) -> Self {
        let transport = Transport::new(config.connection.clone());
        match config.kind {
            EquipmentKind::Multimeter => Multimeter::new(&config.name, transport).into(),
            EquipmentKind::PowerSupply => PowerSupply::new(&config.name, transport).into(),
        }
    }

    /// registry name
    pub fn name(&self) -> &str {
        match self {
            Equipment::Multimeter(x) => x.name(),
            Equipment::PowerSupply(x) => x.name(),
        }
    }

    /// driver type
    pub fn kind(&self) -> EquipmentKind {
        match self {
            Equipment::Multimeter(_) => EquipmentKind::Multimeter,
            Equipment::PowerSupply(_) => EquipmentKind::PowerSupply,
        }
    }

    /// reply to the last `*IDN?`
    pub fn identity(&self) -> Option<&str> {
        match self {
            Equipment::Multimeter(x) => x.identity(),
            Equipment::PowerSupply(x) => x.identity(),
        }
    }

    /// true while the transport is open
    pub fn is_connected(&self) -> bool {
        match self {
            Equipment::Multimeter(x) => x.is_connected(),
            Equipment::PowerSupply(x) => x.is_connected(),
        }
    }

    /// open the transport
    pub async fn connect(&mut self) -> Result<(), HalError> {
        match self {
            Equipment::Multimeter(x) => x.connect().await,
            Equipment::PowerSupply(x) => x.connect().await,
        }
    }

    /// close the transport
    pub async fn disconnect(&mut self) {
        match self {
            Equipment::Multimeter(x) => x.disconnect().await,
            Equipment::PowerSupply(x) => x.disconnect().await,
        }
    }

    /// bring the instrument into a known state
    pub async fn initialize(&mut self) -> Result<(), HalError> {
        match self {
            Equipment::Multimeter(x) => x.initialize().await,
            Equipment::PowerSupply(x) => x.initialize().await,
        }
    }

    /// `*RST`
    pub async fn reset(&mut self) -> Result<(), HalError> {
        match self {
            Equipment::Multimeter(x) => x.reset().await,
            Equipment::PowerSupply(x) => x.reset().await,
        }
    }

    /// `*TST?`, true on pass
    pub async fn self_test(&mut self) -> Result<bool, HalError> {
        match self {
            Equipment::Multimeter(x) => x.self_test().await,
            Equipment::PowerSupply(x) => x.self_test().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::ConnectionConfig;

    #[test]
    fn builds_driver_from_config() {
        let config = EquipmentConfig::new(
            "psu",
            EquipmentKind::PowerSupply,
            ConnectionConfig::tcp("127.0.0.1", 5025),
        );
        let equipment = Equipment::from_config(&config);
        assert_eq!(equipment.name(), "psu");
        assert_eq!(equipment.kind(), EquipmentKind::PowerSupply);
        assert!(!equipment.is_connected());
        assert_eq!(equipment.identity(), None);
    }

    #[test]
    fn connection_error_names_equipment() {
        let err = HalError::Connection {
            name: "dmm".to_string(),
            source: ConnectionError::Closed,
        };
        assert_eq!(err.to_string(), "equipment dmm: connection closed by peer");
    }
}
