//! Slave configuration: declarative overlay to concise-SDO script
//!
//! A [Slave] wraps the parsed [Device] of one node together with the
//! network-level settings and the ordered SDO download script that programs
//! the node at boot. [Slave::from_config] applies a [SlaveConfig] overlay,
//! emitting one concise-SDO record per difference between the overlay and
//! the state described by the DCF.

use snafu::{IntoError as _, ResultExt as _, Snafu};
use std::path::{Path, PathBuf};

use candcf_core::data_type::DataType;
use candcf_core::device::Device;
use candcf_core::diag::Diagnostics;
use candcf_core::pdo::{Pdo, SubRef, COB_ID_DISABLED};
use candcf_core::sdo;
use candcf_core::value::{Env, TypedValue, ValueError};
use candcf_core::ModelError;

use crate::config::{CobId, Options, PdoOverlay, SlaveConfig};

/// Error raised while composing a node configuration
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigureError {
    #[snafu(display("{name}: {source}"))]
    Model { name: String, source: ModelError },
    #[snafu(display("{name}: object 0x{index:04X} does not exist"))]
    NoSuchObject { name: String, index: u16 },
    #[snafu(display("{name}: sub-object 0x{index:04X}/{sub_index} does not exist"))]
    NoSuchSubObject {
        name: String,
        index: u16,
        sub_index: u8,
    },
    #[snafu(display("{name}: Receive-PDO {num} not available"))]
    RpdoNotAvailable { name: String, num: u16 },
    #[snafu(display("{name}: Transmit-PDO {num} not available"))]
    TpdoNotAvailable { name: String, num: u16 },
    #[snafu(display("no valid 11-bit COB-IDs remaining"))]
    CobIdPoolExhausted,
    #[snafu(display("{name}: {source}"))]
    Encode { name: String, source: ValueError },
    #[snafu(display("IO error writing {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// One slave node: its device model plus network-level configuration
#[derive(Clone, Debug)]
pub struct Slave {
    pub device: Device,
    pub name: String,
    /// Directory where the generated configuration file will live
    pub dcf_path: String,
    pub time_cob_id: u32,
    pub emcy_cob_id: u32,
    pub heartbeat_multiplier: f64,
    pub heartbeat_consumer: bool,
    pub heartbeat_producer: u16,
    pub retry_factor: u32,
    pub life_time_factor: u16,
    pub guard_time: u16,
    pub boot: bool,
    pub mandatory: bool,
    pub reset_communication: bool,
    pub software_file: String,
    pub software_version: u32,
    pub configuration_file: String,
    pub restore_configuration: u8,
    /// The ordered concise-SDO download script for this node
    pub sdo: Vec<Vec<u8>>,
}

impl Slave {
    /// Wrap a parsed device with default network settings
    pub fn new(name: impl Into<String>, device: Device) -> Slave {
        Slave {
            device,
            name: name.into(),
            dcf_path: String::new(),
            time_cob_id: 0x100,
            emcy_cob_id: COB_ID_DISABLED,
            heartbeat_multiplier: 1.0,
            heartbeat_consumer: false,
            heartbeat_producer: 0,
            retry_factor: 1,
            life_time_factor: 0,
            guard_time: 0,
            boot: true,
            mandatory: false,
            reset_communication: true,
            software_file: String::new(),
            software_version: 0,
            configuration_file: String::new(),
            restore_configuration: 0,
            sdo: Vec::new(),
        }
    }

    /// Load a slave's DCF and apply its overlay
    pub fn from_config(
        name: &str,
        cfg: &SlaveConfig,
        options: &mut Options,
        diag: &mut Diagnostics,
        strict: bool,
    ) -> Result<Slave, ConfigureError> {
        let mut env = Env::new();
        if let Some(node_id) = cfg.node_id {
            env.insert("NODEID".to_string(), node_id);
        }
        let device =
            Device::from_dcf(&cfg.dcf, env, diag, strict).context(ModelSnafu { name })?;
        let mut slave = Slave::new(name, device);
        slave.apply_config(cfg, options, diag)?;
        Ok(slave)
    }

    /// Encode a concise-SDO write to a sub-object, using its declared data
    /// type
    ///
    /// Writing a read-only target is reported but still encoded. A write to
    /// sub-index 0 of an object that exists but does not describe sub 0 is
    /// encoded as UNSIGNED8, the conventional type of "highest sub-index
    /// supported" entries.
    pub fn concise_value(
        &self,
        index: u16,
        sub_index: u8,
        value: i128,
        diag: &mut Diagnostics,
    ) -> Result<Vec<u8>, ConfigureError> {
        let object = self
            .device
            .object(index)
            .ok_or_else(|| {
                NoSuchObjectSnafu {
                    name: self.name.as_str(),
                    index,
                }
                .build()
            })?;
        if let Some(subobj) = object.sub(sub_index) {
            if !subobj.access_type.is_writable() {
                diag.warn(
                    2,
                    format!(
                        "{}: no write access for sub-object 0x{:04X}/{}",
                        self.name, index, sub_index
                    ),
                );
            }
            subobj
                .data_type
                .concise_value(index, sub_index, &TypedValue::Integer(value))
                .context(EncodeSnafu { name: self.name.as_str() })
        } else if sub_index == 0 && !object.subs.is_empty() {
            DataType::UNSIGNED8
                .concise_value(index, 0, &TypedValue::Integer(value))
                .context(EncodeSnafu { name: self.name.as_str() })
        } else {
            NoSuchSubObjectSnafu {
                name: self.name.as_str(),
                index,
                sub_index,
            }
            .fail()
        }
    }

    fn read_sub0(&self, index: u16) -> Result<Option<i128>, ConfigureError> {
        match self.device.sub_object(index, 0) {
            Some(subobj) => subobj
                .value
                .resolve_int(&self.device.env)
                .map(Some)
                .context(EncodeSnafu { name: self.name.as_str() }),
            None => Ok(None),
        }
    }

    /// Emit a write to `index`/0 when the overlay value differs from the
    /// current one; warn when the object is missing entirely
    fn reconcile_sub0(
        &mut self,
        index: u16,
        current: i128,
        requested: i128,
        diag: &mut Diagnostics,
    ) -> Result<(), ConfigureError> {
        if requested != current {
            if self.device.contains_object(index) {
                let record = self.concise_value(index, 0, requested, diag)?;
                self.sdo.push(record);
            } else {
                diag.warn(
                    2,
                    format!("{}: object 0x{:04X} does not exist", self.name, index),
                );
            }
        }
        Ok(())
    }

    /// Apply a network overlay, appending the resulting SDO records in order
    pub fn apply_config(
        &mut self,
        cfg: &SlaveConfig,
        options: &mut Options,
        diag: &mut Diagnostics,
    ) -> Result<(), ConfigureError> {
        self.dcf_path = cfg
            .dcf_path
            .clone()
            .unwrap_or_else(|| options.dcf_path.clone());

        if let Some(revision_number) = cfg.revision_number {
            if self.device.revision_number != 0 && self.device.revision_number != revision_number
            {
                diag.warn(
                    2,
                    format!("{}: specified revision number differs from DCF", self.name),
                );
            }
            self.device.revision_number = revision_number;
        }
        if let Some(serial_number) = cfg.serial_number {
            if self.device.serial_number != 0 && self.device.serial_number != serial_number {
                diag.warn(
                    2,
                    format!("{}: specified serial number differs from DCF", self.name),
                );
            }
            self.device.serial_number = serial_number;
        }

        if let Some(current) = self.read_sub0(0x1012)? {
            self.time_cob_id = current as u32;
        }
        if let Some(time_cob_id) = cfg.time_cob_id {
            self.reconcile_sub0(0x1012, self.time_cob_id as i128, time_cob_id as i128, diag)?;
            self.time_cob_id = time_cob_id;
        }

        if let Some(current) = self.read_sub0(0x1014)? {
            self.emcy_cob_id = current as u32;
        }

        self.heartbeat_multiplier = cfg
            .heartbeat_multiplier
            .unwrap_or(options.heartbeat_multiplier);
        if let Some(consumer) = cfg.heartbeat_consumer {
            self.heartbeat_consumer = consumer;
        }

        if let Some(current) = self.read_sub0(0x1017)? {
            self.heartbeat_producer = current as u16;
        }
        if let Some(producer) = cfg.heartbeat_producer {
            self.reconcile_sub0(0x1017, self.heartbeat_producer as i128, producer as i128, diag)?;
            self.heartbeat_producer = producer;
        }

        self.retry_factor = cfg.retry_factor.unwrap_or(options.retry_factor);

        if let Some(current) = self.read_sub0(0x100C)? {
            self.guard_time = current as u16;
        }
        if let Some(guard_time) = cfg.guard_time {
            self.reconcile_sub0(0x100C, self.guard_time as i128, guard_time as i128, diag)?;
            self.guard_time = guard_time;
        }

        if let Some(current) = self.read_sub0(0x100D)? {
            self.life_time_factor = current as u16;
        }
        if let Some(life_time_factor) = cfg.life_time_factor {
            self.reconcile_sub0(
                0x100D,
                self.life_time_factor as i128,
                life_time_factor as i128,
                diag,
            )?;
            self.life_time_factor = life_time_factor;
        }

        if self.guard_time != 0 && self.life_time_factor != 0 && self.heartbeat_producer != 0 {
            diag.warn(
                2,
                "Cannot use heartbeat protocol and node guarding protocol simultaneously",
            );
            self.guard_time = 0;
            self.life_time_factor = 0;
        }

        for (&sub_index, &value) in &cfg.error_behavior {
            match self.device.error_behavior.get(&sub_index).copied() {
                Some(current) => {
                    if value != current {
                        let record = self.concise_value(0x1029, sub_index, value as i128, diag)?;
                        self.sdo.push(record);
                    }
                }
                None => diag.warn(
                    2,
                    format!(
                        "{}: sub-object 0x1029/{} does not exist",
                        self.name, sub_index
                    ),
                ),
            }
        }

        for (&num, overlay) in &cfg.rpdo {
            if !self.device.rpdo.contains_key(&num) {
                return RpdoNotAvailableSnafu {
                    name: self.name.as_str(),
                    num,
                }
                .fail();
            }
            // Unwrap safety: presence checked above
            let mut pdo = self.device.rpdo.get(&num).cloned().unwrap();
            let records = self.apply_pdo_overlay(&mut pdo, 0x1400 + num - 1, overlay, options, diag)?;
            self.device.rpdo.insert(num, pdo);
            self.sdo.extend(records);
        }
        self.device
            .rpdo
            .retain(|_, pdo| !pdo.is_disabled() && !pdo.mapping.is_empty());

        for (&num, overlay) in &cfg.tpdo {
            if !self.device.tpdo.contains_key(&num) {
                return TpdoNotAvailableSnafu {
                    name: self.name.as_str(),
                    num,
                }
                .fail();
            }
            let mut pdo = self.device.tpdo.get(&num).cloned().unwrap();
            let records = self.apply_pdo_overlay(&mut pdo, 0x1800 + num - 1, overlay, options, diag)?;
            self.device.tpdo.insert(num, pdo);
            self.sdo.extend(records);
        }
        self.device
            .tpdo
            .retain(|_, pdo| !pdo.is_disabled() && !pdo.mapping.is_empty());

        if let Some(boot) = cfg.boot {
            self.boot = boot;
        }
        if let Some(mandatory) = cfg.mandatory {
            self.mandatory = mandatory;
        }
        if let Some(reset_communication) = cfg.reset_communication {
            self.reset_communication = reset_communication;
        }
        if let Some(software_file) = &cfg.software_file {
            self.software_file = software_file.clone();
        }
        if let Some(software_version) = cfg.software_version {
            self.software_version = software_version;
            if self.device.sub_object(0x1F56, 1).is_none() {
                diag.warn(
                    2,
                    format!("{}: sub-object 0x1F56/1 does not exist", self.name),
                );
            }
        }
        if let Some(restore_configuration) = cfg.restore_configuration {
            self.restore_configuration = restore_configuration;
            if self
                .device
                .sub_object(0x1011, restore_configuration)
                .is_none()
            {
                diag.warn(
                    2,
                    format!(
                        "{}: sub-object 0x1011/{} does not exist",
                        self.name, restore_configuration
                    ),
                );
            }
        }

        for write in &cfg.sdo {
            let record =
                self.concise_value(write.index, write.sub_index, write.value as i128, diag)?;
            self.sdo.push(record);
        }

        if !self.sdo.is_empty() {
            self.configuration_file = PathBuf::from(&self.dcf_path)
                .join(format!("{}.bin", self.name))
                .display()
                .to_string();
        }
        if let Some(configuration_file) = &cfg.configuration_file {
            self.configuration_file = configuration_file.clone();
        }

        Ok(())
    }

    /// Reconfigure one PDO slot in two phases: disable under the old COB-ID,
    /// apply the changed parameters and mapping, then re-enable
    fn apply_pdo_overlay(
        &self,
        pdo: &mut Pdo,
        comm_idx: u16,
        overlay: &PdoOverlay,
        options: &mut Options,
        diag: &mut Diagnostics,
    ) -> Result<Vec<Vec<u8>>, ConfigureError> {
        let mut records = Vec::new();
        let is_tpdo = (comm_idx & 0xFE00) == 0x1800;
        let old_cob_id = pdo.cob_id;

        if let Some(cob_id) = overlay.cob_id {
            match cob_id {
                CobId::Auto => {
                    let slot = (comm_idx & 0x01FF) as u32;
                    if slot < 4 {
                        let base = if is_tpdo { 0x80 } else { 0x100 };
                        pdo.cob_id = (slot + 1) * 0x100 + base + self.device.node_id as u32;
                    } else {
                        pdo.cob_id = options.cob_id;
                        if pdo.cob_id >= 0x6E0 {
                            return CobIdPoolExhaustedSnafu.fail();
                        }
                        options.cob_id = pdo.cob_id + 1;
                    }
                }
                CobId::Fixed(value) => pdo.cob_id = value,
            }
        }

        // Phase A: unless the slot already holds the disabled form of the
        // requested COB-ID, disable it under its current identity before
        // touching anything else
        if old_cob_id != pdo.cob_id | COB_ID_DISABLED {
            records.push(self.concise_value(
                comm_idx,
                1,
                (old_cob_id | COB_ID_DISABLED) as i128,
                diag,
            )?);
        }

        if pdo.cob_id & COB_ID_DISABLED == 0 {
            if let Some(transmission) = overlay.transmission {
                if transmission != pdo.transmission_type {
                    pdo.transmission_type = transmission;
                    records.push(self.concise_value(comm_idx, 2, transmission as i128, diag)?);
                }
            }
            if let Some(inhibit_time) = overlay.inhibit_time {
                if inhibit_time != pdo.inhibit_time {
                    pdo.inhibit_time = inhibit_time;
                    if is_tpdo {
                        records.push(self.concise_value(comm_idx, 3, inhibit_time as i128, diag)?);
                    }
                }
            }
            if let Some(event_timer) = overlay.event_timer {
                if event_timer != pdo.event_timer {
                    pdo.event_timer = event_timer;
                    if is_tpdo {
                        records.push(self.concise_value(comm_idx, 5, event_timer as i128, diag)?);
                    }
                }
            }
            if let Some(event_deadline) = overlay.event_deadline {
                if event_deadline != pdo.event_deadline {
                    pdo.event_deadline = event_deadline;
                    if !is_tpdo {
                        records.push(self.concise_value(
                            comm_idx,
                            5,
                            event_deadline as i128,
                            diag,
                        )?);
                    }
                }
            }
            if let Some(sync_start) = overlay.sync_start {
                if sync_start != pdo.sync_start_value {
                    pdo.sync_start_value = sync_start;
                    if is_tpdo {
                        records.push(self.concise_value(comm_idx, 6, sync_start as i128, diag)?);
                    }
                }
            }

            let map_idx = comm_idx + 0x200;
            if let Some(mapping) = &overlay.mapping {
                if pdo.n > 0 || !mapping.is_empty() {
                    pdo.n = 0;
                    pdo.mapping.clear();
                    records.push(self.concise_value(map_idx, 0, 0, diag)?);
                }

                let mut total_bits = 0u32;
                let mut slot = 0u8;
                for entry in mapping {
                    let Some(subobj) = self.device.sub_object(entry.index, entry.sub_index)
                    else {
                        return NoSuchSubObjectSnafu {
                            name: self.name.as_str(),
                            index: entry.index,
                            sub_index: entry.sub_index,
                        }
                        .fail();
                    };
                    if !subobj.pdo_mapping {
                        diag.warn(
                            3,
                            format!(
                                "{}: sub-object 0x{:04X}/{} does not support PDO mapping",
                                self.name, entry.index, entry.sub_index
                            ),
                        );
                    }
                    let bits = subobj.data_type.bits().ok_or_else(|| {
                        EncodeSnafu { name: self.name.as_str() }.into_error(ValueError::NotPackable {
                            index: subobj.data_type.index(),
                        })
                    })?;
                    total_bits += bits;
                    slot += 1;
                    pdo.mapping.insert(
                        slot,
                        SubRef {
                            index: entry.index,
                            sub_index: entry.sub_index,
                        },
                    );
                    let word = ((entry.index as u32) << 16)
                        | ((entry.sub_index as u32) << 8)
                        | (bits & 0xFF);
                    records.push(self.concise_value(map_idx, slot, word as i128, diag)?);
                }

                if total_bits > 64 {
                    let kind = if is_tpdo { "TPDO" } else { "RPDO" };
                    diag.warn(
                        3,
                        format!(
                            "{}: {} {} mapping exceeds 64 bits",
                            self.name,
                            kind,
                            (comm_idx & 0x1FF) + 1
                        ),
                    );
                }

                pdo.n = pdo.mapping.len() as u8;
                if pdo.n > 0 {
                    records.push(self.concise_value(map_idx, 0, pdo.n as i128, diag)?);
                }
            }

            // Phase B ends by re-enabling the slot under its new COB-ID
            if overlay.enabled.unwrap_or(true) {
                records.push(self.concise_value(comm_idx, 1, pdo.cob_id as i128, diag)?);
            }
        }

        Ok(records)
    }

    /// Write the node's concise-SDO script to `{name}.bin`, if any
    pub fn write_bin(&self, directory: &Path) -> Result<(), ConfigureError> {
        if self.sdo.is_empty() {
            return Ok(());
        }
        let path = directory.join(format!("{}.bin", self.name));
        let mut file = std::fs::File::create(&path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        sdo::write_bin(&mut file, &self.sdo).context(IoSnafu {
            path: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candcf_core::sdo::decode_record;

    const SLAVE_DCF: &str = "\
[DeviceComissioning]
NodeID=2

[MandatoryObjects]
SupportedObjects=2
1=0x1000
2=0x1018

[OptionalObjects]
SupportedObjects=8
1=0x100C
2=0x100D
3=0x1017
4=0x1029
5=0x1400
6=0x1600
7=0x6200
8=0x6000

[1000]
ParameterName=Device type
DataType=0x0007
AccessType=ro
DefaultValue=0x00020191

[100C]
ParameterName=Guard time
DataType=0x0006
AccessType=rw
DefaultValue=0

[100D]
ParameterName=Life time factor
DataType=0x0005
AccessType=rw
DefaultValue=0

[1017]
ParameterName=Producer heartbeat time
DataType=0x0006
AccessType=rw
DefaultValue=0

[1018]
ParameterName=Identity object
ObjectType=0x09
SubNumber=2

[1018sub0]
ParameterName=Highest sub-index supported
DataType=0x0005
AccessType=const
DefaultValue=1

[1018sub1]
ParameterName=Vendor-ID
DataType=0x0007
AccessType=ro
DefaultValue=0x360

[1029]
ParameterName=Error behavior
ObjectType=0x08
SubNumber=2

[1029sub0]
ParameterName=Number of error classes
DataType=0x0005
AccessType=ro
DefaultValue=1

[1029sub1]
ParameterName=Communication error
DataType=0x0005
AccessType=rw
DefaultValue=0x00

[1400]
ParameterName=RPDO1 communication parameter
ObjectType=0x09
SubNumber=4

[1400sub0]
ParameterName=Highest sub-index supported
DataType=0x0005
AccessType=const
DefaultValue=2

[1400sub1]
ParameterName=COB-ID used by RPDO
DataType=0x0007
AccessType=rw
DefaultValue=0x200

[1400sub2]
ParameterName=Transmission type
DataType=0x0005
AccessType=rw
DefaultValue=254

[1400sub5]
ParameterName=Event-timer / deadline
DataType=0x0006
AccessType=rw
DefaultValue=0

[1600]
ParameterName=RPDO1 mapping parameter
ObjectType=0x09
SubNumber=2

[1600sub0]
ParameterName=Number of mapped objects
DataType=0x0005
AccessType=rw
DefaultValue=1

[1600sub1]
ParameterName=Mapping entry 1
DataType=0x0007
AccessType=rw
DefaultValue=0x62000008

[6200]
ParameterName=Digital outputs
ObjectType=0x08
DataType=0x0005
AccessType=rww
PDOMapping=1
CompactSubObj=2

[6000]
ParameterName=Status word
DataType=0x0006
AccessType=ro
DefaultValue=0
";

    fn build_slave() -> Slave {
        let mut diag = Diagnostics::new();
        let device = Device::from_dcf_str(SLAVE_DCF, Env::new(), &mut diag, true)
            .expect("slave DCF should build");
        assert!(diag.is_empty(), "{:?}", diag.warnings());
        Slave::new("drive", device)
    }

    fn overlay(yaml: &str) -> SlaveConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn writes(slave: &Slave) -> Vec<(u16, u8, Vec<u8>)> {
        slave
            .sdo
            .iter()
            .map(|record| {
                let decoded = decode_record(record).unwrap();
                (decoded.index, decoded.sub_index, decoded.data)
            })
            .collect()
    }

    #[test]
    fn test_rpdo_disable_then_enable_sequence() {
        let mut slave = build_slave();
        let cfg = overlay(
            "\
dcf: unused.eds
rpdo:
  1:
    cob_id: 0x201
    transmission: 255
    mapping:
      - {index: 0x6200, sub_index: 1}
",
        );
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        slave.apply_config(&cfg, &mut options, &mut diag).unwrap();

        assert_eq!(
            writes(&slave),
            vec![
                (0x1400, 1, 0x80000200u32.to_le_bytes().to_vec()),
                (0x1400, 2, vec![255]),
                (0x1600, 0, vec![0]),
                (0x1600, 1, 0x62000108u32.to_le_bytes().to_vec()),
                (0x1600, 0, vec![1]),
                (0x1400, 1, 0x201u32.to_le_bytes().to_vec()),
            ]
        );

        let pdo = slave.device.rpdo.get(&1).unwrap();
        assert_eq!(pdo.cob_id, 0x201);
        assert_eq!(pdo.transmission_type, 255);
        assert_eq!(
            pdo.mapping.get(&1),
            Some(&SubRef {
                index: 0x6200,
                sub_index: 1
            })
        );
    }

    #[test]
    fn test_event_deadline_writes_the_deadline() {
        let mut slave = build_slave();
        let cfg = overlay(
            "\
dcf: unused.eds
rpdo:
  1:
    event_deadline: 250
",
        );
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        slave.apply_config(&cfg, &mut options, &mut diag).unwrap();

        // The deadline itself must land in comm sub 5, not a stale timer
        // value
        let all = writes(&slave);
        let deadline = all.iter().find(|(index, sub, _)| (*index, *sub) == (0x1400, 5));
        assert_eq!(deadline.unwrap().2, 250u16.to_le_bytes().to_vec());
        assert_eq!(slave.device.rpdo.get(&1).unwrap().event_deadline, 250);
    }

    #[test]
    fn test_auto_cob_id_for_predefined_slot() {
        let mut slave = build_slave();
        let cfg = overlay("dcf: unused.eds\nrpdo: {1: {cob_id: auto}}\n");
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        slave.apply_config(&cfg, &mut options, &mut diag).unwrap();

        // Slot 1 with node-ID 2 gets the predefined 0x200 + node-ID
        assert_eq!(slave.device.rpdo.get(&1).unwrap().cob_id, 0x202);
        // The pool was not consumed
        assert_eq!(options.cob_id, 0x680);
    }

    #[test]
    fn test_disabling_a_pdo_removes_it() {
        let mut slave = build_slave();
        let cfg = overlay("dcf: unused.eds\nrpdo: {1: {cob_id: 0x80000201}}\n");
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        slave.apply_config(&cfg, &mut options, &mut diag).unwrap();

        assert!(slave.device.rpdo.is_empty());
    }

    #[test]
    fn test_unknown_pdo_slot_is_fatal() {
        let mut slave = build_slave();
        let cfg = overlay("dcf: unused.eds\nrpdo: {3: {cob_id: 0x400}}\n");
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        let err = slave
            .apply_config(&cfg, &mut options, &mut diag)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigureError::RpdoNotAvailable { num: 3, .. }
        ));
    }

    #[test]
    fn test_mapping_target_must_exist() {
        let mut slave = build_slave();
        let cfg = overlay(
            "dcf: unused.eds\nrpdo: {1: {mapping: [{index: 0x7777, sub_index: 1}]}}\n",
        );
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        let err = slave
            .apply_config(&cfg, &mut options, &mut diag)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigureError::NoSuchSubObject { index: 0x7777, .. }
        ));
    }

    #[test]
    fn test_unmappable_target_warns() {
        let mut slave = build_slave();
        let cfg = overlay(
            "dcf: unused.eds\nrpdo: {1: {mapping: [{index: 0x6000, sub_index: 0}]}}\n",
        );
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        slave.apply_config(&cfg, &mut options, &mut diag).unwrap();
        assert!(diag.any_contains(
            "drive: sub-object 0x6000/0 does not support PDO mapping"
        ));
    }

    #[test]
    fn test_heartbeat_and_node_guarding_conflict() {
        let mut slave = build_slave();
        let cfg = overlay(
            "\
dcf: unused.eds
heartbeat_producer: 1000
guard_time: 200
life_time_factor: 3
",
        );
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        slave.apply_config(&cfg, &mut options, &mut diag).unwrap();

        assert!(diag.any_contains(
            "Cannot use heartbeat protocol and node guarding protocol simultaneously"
        ));
        assert_eq!(slave.guard_time, 0);
        assert_eq!(slave.life_time_factor, 0);
        assert_eq!(slave.heartbeat_producer, 1000);
        // All three writes were still emitted, in overlay order
        let targets: Vec<(u16, u8)> = writes(&slave)
            .iter()
            .map(|(index, sub, _)| (*index, *sub))
            .collect();
        assert_eq!(targets, vec![(0x1017, 0), (0x100C, 0), (0x100D, 0)]);
    }

    #[test]
    fn test_error_behavior_writes_only_differences() {
        let mut slave = build_slave();
        let cfg = overlay("dcf: unused.eds\nerror_behavior: {1: 0x00, 2: 0x01}\n");
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        slave.apply_config(&cfg, &mut options, &mut diag).unwrap();

        // Sub 1 already holds 0, so only the missing sub 2 is reported
        assert!(writes(&slave).is_empty());
        assert!(diag.any_contains("drive: sub-object 0x1029/2 does not exist"));
    }

    #[test]
    fn test_raw_sdo_and_configuration_file() {
        let mut slave = build_slave();
        let cfg = overlay(
            "\
dcf: unused.eds
sdo:
  - {index: 0x1017, sub_index: 0, value: 500}
",
        );
        let mut options = Options {
            dcf_path: "/etc/canopen".to_string(),
            ..Default::default()
        };
        let mut diag = Diagnostics::new();
        slave.apply_config(&cfg, &mut options, &mut diag).unwrap();

        assert_eq!(
            slave.sdo,
            vec![vec![0x17, 0x10, 0x00, 0x02, 0x00, 0x00, 0x00, 0xF4, 0x01]]
        );
        assert_eq!(slave.configuration_file, "/etc/canopen/drive.bin");
    }

    #[test]
    fn test_non_writable_target_warns() {
        let mut slave = build_slave();
        let cfg = overlay("dcf: unused.eds\nsdo: [{index: 0x1000, sub_index: 0, value: 1}]\n");
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        slave.apply_config(&cfg, &mut options, &mut diag).unwrap();
        assert!(diag.any_contains("drive: no write access for sub-object 0x1000/0"));
        assert_eq!(slave.sdo.len(), 1);
    }

    #[test]
    fn test_write_bin() {
        let mut slave = build_slave();
        let cfg = overlay("dcf: unused.eds\nsdo: [{index: 0x1017, sub_index: 0, value: 500}]\n");
        let mut options = Options::default();
        let mut diag = Diagnostics::new();
        slave.apply_config(&cfg, &mut options, &mut diag).unwrap();

        let dir = tempfile::tempdir().unwrap();
        slave.write_bin(dir.path()).unwrap();
        let bytes = std::fs::read(dir.path().join("drive.bin")).unwrap();
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(
            &bytes[4..],
            &[0x17, 0x10, 0x00, 0x02, 0x00, 0x00, 0x00, 0xF4, 0x01]
        );
    }
}
