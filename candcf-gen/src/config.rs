//! YAML network configuration
//!
//! A network config has an `options` table, a `master` table, and one table
//! per slave. Slave tables are processed in document order; top-level keys
//! starting with `.` are ignored (YAML anchors conventionally live there).

use indexmap::IndexMap;
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use std::path::Path;

/// Error returned when loading a network configuration file
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("IO error loading {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("error parsing YAML: {source}"))]
    YamlParsing { source: serde_yaml::Error },
    #[snafu(display("invalid config for '{name}': {source}"))]
    SlaveEntry {
        name: String,
        source: serde_yaml::Error,
    },
    #[snafu(display("invalid 'options' section: {source}"))]
    OptionsEntry { source: serde_yaml::Error },
    #[snafu(display("invalid 'master' section: {source}"))]
    MasterEntry { source: serde_yaml::Error },
}

fn default_cob_id() -> u32 {
    0x680
}
fn default_heartbeat_multiplier() -> f64 {
    3.0
}
fn default_retry_factor() -> u32 {
    3
}

/// Network-wide generation options
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// Base of the COB-ID pool used for `cob_id: auto` beyond the four
    /// predefined slots
    #[serde(default = "default_cob_id")]
    pub cob_id: u32,
    /// Directory recorded as the location of generated slave configuration
    /// files
    #[serde(default)]
    pub dcf_path: String,
    #[serde(default = "default_heartbeat_multiplier")]
    pub heartbeat_multiplier: f64,
    #[serde(default = "default_retry_factor")]
    pub retry_factor: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cob_id: default_cob_id(),
            dcf_path: String::new(),
            heartbeat_multiplier: default_heartbeat_multiplier(),
            retry_factor: default_retry_factor(),
        }
    }
}

/// The `master` table of a network config
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterConfig {
    pub node_id: Option<u8>,
    pub baudrate: Option<u32>,
    pub vendor_id: Option<u32>,
    pub product_code: Option<u32>,
    pub revision_number: Option<u32>,
    pub serial_number: Option<u32>,
    pub sync_period: Option<u32>,
    pub sync_window: Option<u32>,
    pub sync_overflow: Option<u8>,
    pub time_cob_id: Option<u32>,
    pub emcy_inhibit_time: Option<u16>,
    pub heartbeat_multiplier: Option<f64>,
    pub heartbeat_consumer: Option<bool>,
    pub heartbeat_producer: Option<u16>,
    #[serde(default)]
    pub error_behavior: IndexMap<u8, u8>,
    pub nmt_inhibit_time: Option<u16>,
    pub start: Option<bool>,
    pub start_nodes: Option<bool>,
    pub start_all_nodes: Option<bool>,
    pub reset_all_nodes: Option<bool>,
    pub stop_all_nodes: Option<bool>,
    pub boot_time: Option<u32>,
}

/// One slave table of a network config
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlaveConfig {
    /// Path of the slave's EDS/DCF file
    pub dcf: String,
    pub node_id: Option<u8>,
    pub dcf_path: Option<String>,
    pub revision_number: Option<u32>,
    pub serial_number: Option<u32>,
    pub time_cob_id: Option<u32>,
    pub heartbeat_multiplier: Option<f64>,
    pub heartbeat_consumer: Option<bool>,
    pub heartbeat_producer: Option<u16>,
    pub retry_factor: Option<u32>,
    pub guard_time: Option<u16>,
    pub life_time_factor: Option<u16>,
    /// Writes to object 0x1029, keyed by sub-index
    #[serde(default)]
    pub error_behavior: IndexMap<u8, u8>,
    #[serde(default)]
    pub rpdo: IndexMap<u16, PdoOverlay>,
    #[serde(default)]
    pub tpdo: IndexMap<u16, PdoOverlay>,
    pub boot: Option<bool>,
    pub mandatory: Option<bool>,
    pub reset_communication: Option<bool>,
    pub software_file: Option<String>,
    pub software_version: Option<u32>,
    pub restore_configuration: Option<u8>,
    pub configuration_file: Option<String>,
    /// Raw SDO writes appended after all derived configuration
    #[serde(default)]
    pub sdo: Vec<SdoWrite>,
}

/// Requested state of one PDO slot
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PdoOverlay {
    pub cob_id: Option<CobId>,
    pub transmission: Option<u8>,
    pub inhibit_time: Option<u16>,
    pub event_timer: Option<u16>,
    pub event_deadline: Option<u16>,
    pub sync_start: Option<u8>,
    /// Replacement mapping; an empty list clears the PDO
    pub mapping: Option<Vec<MappingEntry>>,
    /// Whether to re-enable the PDO after configuration (default true)
    pub enabled: Option<bool>,
}

/// A COB-ID request: a fixed value, or `auto` to draw from the pool
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CobId {
    Auto,
    Fixed(u32),
}

impl<'de> Deserialize<'de> for CobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = CobId;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a COB-ID or the string 'auto'")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<CobId, E> {
                u32::try_from(v)
                    .map(CobId::Fixed)
                    .map_err(|_| E::custom(format!("COB-ID out of range: {}", v)))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<CobId, E> {
                u32::try_from(v)
                    .map(CobId::Fixed)
                    .map_err(|_| E::custom(format!("COB-ID out of range: {}", v)))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<CobId, E> {
                if v.eq_ignore_ascii_case("auto") {
                    Ok(CobId::Auto)
                } else {
                    Err(E::custom(format!(
                        "expected 'auto' or an integer COB-ID, got '{}'",
                        v
                    )))
                }
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

/// One mapping slot: a sub-object reference
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingEntry {
    pub index: u16,
    #[serde(default)]
    pub sub_index: u8,
}

/// A raw concise-SDO write
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SdoWrite {
    pub index: u16,
    #[serde(default)]
    pub sub_index: u8,
    #[serde(default)]
    pub value: i64,
}

/// A parsed network configuration: options, master, and the slaves in
/// document order
#[derive(Clone, Debug, Default)]
pub struct NetworkConfig {
    pub options: Options,
    pub master: MasterConfig,
    pub slaves: IndexMap<String, SlaveConfig>,
}

impl NetworkConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<NetworkConfig, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<NetworkConfig, ConfigError> {
        let raw: IndexMap<String, serde_yaml::Value> =
            serde_yaml::from_str(text).context(YamlParsingSnafu)?;

        let mut config = NetworkConfig::default();
        for (name, value) in raw {
            match name.as_str() {
                "options" => {
                    config.options =
                        serde_yaml::from_value(value).context(OptionsEntrySnafu)?;
                }
                "master" => {
                    config.master = serde_yaml::from_value(value).context(MasterEntrySnafu)?;
                }
                _ if name.starts_with('.') => {}
                _ => {
                    let slave = serde_yaml::from_value(value)
                        .context(SlaveEntrySnafu { name: name.as_str() })?;
                    config.slaves.insert(name, slave);
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_contains;

    #[test]
    fn test_network_config_parse() {
        let text = "\
options:
  dcf_path: /etc/canopen
  heartbeat_multiplier: 2.5

master:
  node_id: 1
  heartbeat_producer: 1000

.defaults: ignored

drive:
  dcf: drive.eds
  node_id: 2
  heartbeat_consumer: true
  rpdo:
    1:
      cob_id: 0x201
      transmission: 255
      mapping:
        - {index: 0x6200, sub_index: 1}
  sdo:
    - {index: 0x2000, sub_index: 0, value: 42}

io:
  dcf: io.eds
  node_id: 3
  tpdo:
    2:
      cob_id: auto
";
        let config = NetworkConfig::load_from_str(text).unwrap();
        assert_eq!(config.options.dcf_path, "/etc/canopen");
        assert_eq!(config.options.heartbeat_multiplier, 2.5);
        assert_eq!(config.options.cob_id, 0x680);
        assert_eq!(config.master.node_id, Some(1));

        assert_eq!(
            config.slaves.keys().collect::<Vec<_>>(),
            vec!["drive", "io"]
        );
        let drive = &config.slaves["drive"];
        assert_eq!(drive.dcf, "drive.eds");
        let rpdo1 = &drive.rpdo[&1];
        assert_eq!(rpdo1.cob_id, Some(CobId::Fixed(0x201)));
        assert_eq!(rpdo1.transmission, Some(255));
        assert_eq!(rpdo1.mapping.as_ref().unwrap()[0].index, 0x6200);
        assert_eq!(drive.sdo[0].value, 42);

        let io = &config.slaves["io"];
        assert_eq!(io.tpdo[&2].cob_id, Some(CobId::Auto));
    }

    #[test]
    fn test_unknown_slave_field_is_rejected() {
        let text = "\
drive:
  dcf: drive.eds
  no_such_field: 1
";
        let err = NetworkConfig::load_from_str(text).unwrap_err();
        assert_contains!(err.to_string(), "invalid config for 'drive'");
    }

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::load_from_str("master: {node_id: 1}\n").unwrap();
        assert_eq!(config.options.cob_id, 0x680);
        assert_eq!(config.options.heartbeat_multiplier, 3.0);
        assert_eq!(config.options.retry_factor, 3);
        assert!(config.slaves.is_empty());
    }
}
