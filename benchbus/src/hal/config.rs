use std::collections::BTreeMap;
use std::time::Duration;

use crate::serial::{DataBits, Parity, SerialSettings, StopBits};

/// How an instrument is reached
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum TransportKind {
    /// serial port, `address` is the device path
    Serial,
    /// TCP socket, `address` is the host
    Tcp,
}

/// Connection parameters of one piece of equipment
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ConnectionConfig {
    /// serial or TCP
    pub transport_kind: TransportKind,
    /// serial device path or TCP host
    pub address: String,
    /// TCP port
    pub port: Option<u16>,
    /// serial baud rate, 9600 when absent
    pub baud_rate: Option<u32>,
    /// limit on connecting and on waiting for each reply
    pub timeout: Duration,
    /// transport specific options: `data_bits` (5-8), `parity` (none/odd/even), `stop_bits` (1/2)
    pub extra: BTreeMap<String, String>,
}

/// Default per-operation timeout of an instrument connection
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

impl ConnectionConfig {
    /// serial port at `path` with 8N1 framing
    pub fn serial(path: &str, baud_rate: u32) -> Self {
        Self {
            transport_kind: TransportKind::Serial,
            address: path.to_string(),
            port: None,
            baud_rate: Some(baud_rate),
            timeout: DEFAULT_TIMEOUT,
            extra: BTreeMap::new(),
        }
    }

    /// TCP socket at `host:port`
    pub fn tcp(host: &str, port: u16) -> Self {
        Self {
            transport_kind: TransportKind::Tcp,
            address: host.to_string(),
            port: Some(port),
            baud_rate: None,
            timeout: DEFAULT_TIMEOUT,
            extra: BTreeMap::new(),
        }
    }

    /// replace the timeout
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// add a transport specific option
    pub fn with_extra(mut self, key: &str, value: &str) -> Self {
        self.extra.insert(key.to_string(), value.to_string());
        self
    }

    /// human readable endpoint for logging and errors
    pub fn target(&self) -> String {
        match (self.transport_kind, self.port) {
            (TransportKind::Tcp, Some(port)) => format!("{}:{}", self.address, port),
            _ => self.address.clone(),
        }
    }

    /// serial settings derived from the baud rate and the `extra` options
    pub fn serial_settings(&self) -> SerialSettings {
        let mut settings = SerialSettings::default();
        if let Some(baud_rate) = self.baud_rate {
            settings.baud_rate = baud_rate;
        }
        match self.extra.get("data_bits").map(String::as_str) {
            Some("5") => settings.data_bits = DataBits::Five,
            Some("6") => settings.data_bits = DataBits::Six,
            Some("7") => settings.data_bits = DataBits::Seven,
            Some("8") | None => {}
            Some(other) => tracing::warn!("ignoring data_bits option: {}", other),
        }
        match self.extra.get("parity").map(|x| x.to_ascii_lowercase()).as_deref() {
            Some("odd") => settings.parity = Parity::Odd,
            Some("even") => settings.parity = Parity::Even,
            Some("none") | None => {}
            Some(other) => tracing::warn!("ignoring parity option: {}", other),
        }
        match self.extra.get("stop_bits").map(String::as_str) {
            Some("2") => settings.stop_bits = StopBits::Two,
            Some("1") | None => {}
            Some(other) => tracing::warn!("ignoring stop_bits option: {}", other),
        }
        settings
    }
}

/// Kind of driver to build for a piece of equipment
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum EquipmentKind {
    /// digital multimeter
    Multimeter,
    /// programmable power supply
    PowerSupply,
}

impl std::fmt::Display for EquipmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EquipmentKind::Multimeter => f.write_str("multimeter"),
            EquipmentKind::PowerSupply => f.write_str("power_supply"),
        }
    }
}

impl std::str::FromStr for EquipmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "multimeter" | "dmm" => Ok(EquipmentKind::Multimeter),
            "power_supply" | "psu" => Ok(EquipmentKind::PowerSupply),
            _ => Err(format!("unknown equipment kind: {s}")),
        }
    }
}

/// Everything needed to build one registered piece of equipment
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct EquipmentConfig {
    /// unique name steps refer to
    pub name: String,
    /// driver to build
    pub kind: EquipmentKind,
    /// how to reach it
    pub connection: ConnectionConfig,
}

impl EquipmentConfig {
    /// construct from its fields
    pub fn new(name: &str, kind: EquipmentKind, connection: ConnectionConfig) -> Self {
        Self {
            name: name.to_string(),
            kind,
            connection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_defaults_to_8n1() {
        let settings = ConnectionConfig::serial("/dev/ttyUSB0", 115_200).serial_settings();
        assert_eq!(settings, SerialSettings::with_baud_rate(115_200));
    }

    #[test]
    fn extra_options_override_framing() {
        let settings = ConnectionConfig::serial("COM3", 9600)
            .with_extra("parity", "Even")
            .with_extra("stop_bits", "2")
            .with_extra("data_bits", "7")
            .serial_settings();
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert_eq!(settings.data_bits, DataBits::Seven);
    }

    #[test]
    fn tcp_target_includes_port() {
        let config = ConnectionConfig::tcp("192.168.1.50", 5025);
        assert_eq!(config.target(), "192.168.1.50:5025");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn parses_equipment_kinds() {
        assert_eq!("PSU".parse::<EquipmentKind>(), Ok(EquipmentKind::PowerSupply));
        assert_eq!("multimeter".parse::<EquipmentKind>(), Ok(EquipmentKind::Multimeter));
        assert!("scope".parse::<EquipmentKind>().is_err());
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn loads_equipment_list_from_json() {
        let json = r#"[{
            "name": "dmm",
            "kind": "multimeter",
            "connection": {
                "transport_kind": "tcp",
                "address": "127.0.0.1",
                "port": 5025,
                "baud_rate": null,
                "timeout": { "secs": 2, "nanos": 0 },
                "extra": {}
            }
        }]"#;
        let configs: Vec<EquipmentConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(configs[0].kind, EquipmentKind::Multimeter);
        assert_eq!(configs[0].connection.target(), "127.0.0.1:5025");
    }
}
