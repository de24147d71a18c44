//! Master composition: aggregate slaves and emit the master-level script
//!
//! The master wires each slave's heartbeat consumer table (0x1016) to its own
//! heartbeat production, records the identity values it expects each slave to
//! report (0x1F87 / 0x1F88), and pins software versions (0x1F55).

use indexmap::IndexMap;
use snafu::ResultExt as _;
use std::path::Path;

use candcf_core::data_type::DataType;
use candcf_core::diag::Diagnostics;
use candcf_core::sdo;
use candcf_core::value::TypedValue;

use crate::config::{MasterConfig, Options};
use crate::slave::{ConfigureError, EncodeSnafu, IoSnafu, Slave};

/// The master node's network configuration
#[derive(Clone, Debug)]
pub struct Master {
    pub node_id: u8,
    pub baudrate: u32,
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision_number: u32,
    pub serial_number: u32,
    pub sync_period: u32,
    pub sync_window: u32,
    pub sync_overflow: u8,
    pub time_cob_id: u32,
    pub emcy_inhibit_time: u16,
    pub heartbeat_multiplier: f64,
    pub heartbeat_consumer: bool,
    pub heartbeat_producer: u16,
    pub error_behavior: IndexMap<u8, u8>,
    pub nmt_inhibit_time: u16,
    pub start: bool,
    pub start_nodes: bool,
    pub start_all_nodes: bool,
    pub reset_all_nodes: bool,
    pub stop_all_nodes: bool,
    pub boot_time: u32,
    /// Whether remote PDO mappings should be rendered into the master DCF
    pub remote_pdo: bool,
    /// The master's own concise-SDO script
    pub sdo: Vec<Vec<u8>>,
}

impl Default for Master {
    fn default() -> Self {
        Self {
            node_id: 255,
            baudrate: 1000,
            vendor_id: 0,
            product_code: 0,
            revision_number: 0,
            serial_number: 0,
            sync_period: 0,
            sync_window: 0,
            sync_overflow: 0,
            time_cob_id: 0x100,
            emcy_inhibit_time: 0,
            heartbeat_multiplier: 1.0,
            heartbeat_consumer: true,
            heartbeat_producer: 0,
            error_behavior: IndexMap::from([(1, 0x00)]),
            nmt_inhibit_time: 0,
            start: true,
            start_nodes: true,
            start_all_nodes: false,
            reset_all_nodes: false,
            stop_all_nodes: false,
            boot_time: 0,
            remote_pdo: false,
            sdo: Vec::new(),
        }
    }
}

fn encode_u32(index: u16, sub_index: u8, value: u32) -> Result<Vec<u8>, ConfigureError> {
    DataType::UNSIGNED32
        .concise_value(index, sub_index, &TypedValue::Integer(value as i128))
        .context(EncodeSnafu { name: "master" })
}

impl Master {
    /// Build the master from its config table and wire up the slaves
    ///
    /// Slave scripts may be prepended to (heartbeat consumer entries must be
    /// programmed before anything that can trigger heartbeat evaluation), so
    /// the slaves are taken mutably.
    pub fn from_config(
        cfg: &MasterConfig,
        options: &Options,
        slaves: &mut IndexMap<String, Slave>,
        diag: &mut Diagnostics,
    ) -> Result<Master, ConfigureError> {
        let mut master = Master::default();

        if let Some(node_id) = cfg.node_id {
            master.node_id = node_id;
        }
        if let Some(baudrate) = cfg.baudrate {
            master.baudrate = baudrate;
        }
        if let Some(vendor_id) = cfg.vendor_id {
            master.vendor_id = vendor_id;
        }
        if let Some(product_code) = cfg.product_code {
            master.product_code = product_code;
        }
        if let Some(revision_number) = cfg.revision_number {
            master.revision_number = revision_number;
        }
        if let Some(serial_number) = cfg.serial_number {
            master.serial_number = serial_number;
        }

        if master.serial_number != 0 {
            let record = encode_u32(0x1018, 0x04, master.serial_number)?;
            master.sdo.push(record);
        }

        if let Some(sync_period) = cfg.sync_period {
            master.sync_period = sync_period;
        }
        if let Some(sync_window) = cfg.sync_window {
            master.sync_window = sync_window;
        }
        if let Some(sync_overflow) = cfg.sync_overflow {
            master.sync_overflow = sync_overflow;
        }
        if let Some(time_cob_id) = cfg.time_cob_id {
            master.time_cob_id = time_cob_id;
        }
        if let Some(emcy_inhibit_time) = cfg.emcy_inhibit_time {
            master.emcy_inhibit_time = emcy_inhibit_time;
        }

        master.heartbeat_multiplier = cfg
            .heartbeat_multiplier
            .unwrap_or(options.heartbeat_multiplier);
        if let Some(heartbeat_consumer) = cfg.heartbeat_consumer {
            master.heartbeat_consumer = heartbeat_consumer;
        }
        if let Some(heartbeat_producer) = cfg.heartbeat_producer {
            master.heartbeat_producer = heartbeat_producer;
        }

        for (&sub_index, &value) in &cfg.error_behavior {
            master.error_behavior.insert(sub_index, value);
        }

        if let Some(nmt_inhibit_time) = cfg.nmt_inhibit_time {
            master.nmt_inhibit_time = nmt_inhibit_time;
        }
        if let Some(start) = cfg.start {
            master.start = start;
        }
        if let Some(start_nodes) = cfg.start_nodes {
            master.start_nodes = start_nodes;
        }
        if let Some(start_all_nodes) = cfg.start_all_nodes {
            master.start_all_nodes = start_all_nodes;
        }
        if let Some(reset_all_nodes) = cfg.reset_all_nodes {
            master.reset_all_nodes = reset_all_nodes;
        }
        if let Some(stop_all_nodes) = cfg.stop_all_nodes {
            master.stop_all_nodes = stop_all_nodes;
        }
        if let Some(boot_time) = cfg.boot_time {
            master.boot_time = boot_time;
        }

        let heartbeat =
            (master.heartbeat_producer as f64 * master.heartbeat_multiplier) as i128;
        for slave in slaves.values_mut() {
            master.wire_heartbeat_consumer(slave, heartbeat, diag)?;
        }

        for slave in slaves.values_mut() {
            if slave.software_version != 0 {
                let record = encode_u32(0x1F55, slave.device.node_id, slave.software_version)?;
                master.sdo.push(record);
            }

            let identity = slave.device.object(0x1018);
            if slave.device.revision_number != 0
                && identity.is_some_and(|obj| obj.sub(3).is_some())
            {
                let record =
                    encode_u32(0x1F87, slave.device.node_id, slave.device.revision_number)?;
                master.sdo.push(record);
            }
            if slave.device.serial_number != 0
                && identity.is_some_and(|obj| obj.sub(4).is_some())
            {
                let record =
                    encode_u32(0x1F88, slave.device.node_id, slave.device.serial_number)?;
                master.sdo.push(record);
            }
        }

        Ok(master)
    }

    /// Program one slave's 0x1016 table for this master's heartbeat
    ///
    /// A consuming slave gets `(master_node_id << 16) | expected_ms` written
    /// to the entry already targeting the master, or to the first unused
    /// entry. A non-consuming slave keeps its node-ID entry but has its time
    /// zeroed.
    fn wire_heartbeat_consumer(
        &self,
        slave: &mut Slave,
        heartbeat: i128,
        diag: &mut Diagnostics,
    ) -> Result<(), ConfigureError> {
        let read_entries = |slave: &Slave| -> Result<Vec<(u8, i128)>, ConfigureError> {
            // Unwrap safety: callers check object presence first
            let object = slave.device.object(0x1016).unwrap();
            object
                .subs
                .iter()
                .filter(|(sub_index, _)| **sub_index != 0)
                .map(|(sub_index, subobj)| {
                    subobj
                        .value
                        .resolve_int(&slave.device.env)
                        .map(|value| (*sub_index, value))
                        .context(EncodeSnafu {
                            name: slave.name.as_str(),
                        })
                })
                .collect()
        };

        if slave.heartbeat_consumer && heartbeat > 0 {
            if !slave.device.contains_object(0x1016) {
                diag.warn(
                    2,
                    format!("{}: object 0x1016 does not exist", slave.name),
                );
                return Ok(());
            }
            let entries = read_entries(slave)?;
            let mut target = entries
                .iter()
                .find(|(_, value)| ((value >> 16) & 0xFF) as u8 == self.node_id)
                .map(|(sub_index, _)| *sub_index);
            if target.is_none() {
                target = entries
                    .iter()
                    .find(|(_, value)| {
                        let heartbeat_time = value & 0xFFFF;
                        let node_id = (value >> 16) & 0xFF;
                        heartbeat_time == 0 || node_id == 0 || node_id > 127
                    })
                    .map(|(sub_index, _)| *sub_index);
            }
            match target {
                Some(sub_index) => {
                    let value = ((self.node_id as i128) << 16) | (heartbeat & 0xFFFF);
                    let record = slave.concise_value(0x1016, sub_index, value, diag)?;
                    slave.sdo.insert(0, record);
                }
                None => diag.warn(
                    2,
                    format!("{}: no unused entry found in object 0x1016", slave.name),
                ),
            }
        } else if slave.device.contains_object(0x1016) {
            // Disable any stale entry pointing at this master, keeping the
            // node-ID in place
            let entries = read_entries(slave)?;
            for (sub_index, value) in entries {
                let heartbeat_time = value & 0xFFFF;
                let node_id = (value >> 16) & 0xFF;
                if heartbeat_time != 0 && node_id as u8 == self.node_id {
                    let record =
                        slave.concise_value(0x1016, sub_index, node_id << 16, diag)?;
                    slave.sdo.insert(0, record);
                }
            }
        }
        Ok(())
    }

    /// Write the master's concise-SDO script to `master.bin`, if any
    pub fn write_bin(&self, directory: &Path) -> Result<(), ConfigureError> {
        if self.sdo.is_empty() {
            return Ok(());
        }
        let path = directory.join("master.bin");
        let mut file = std::fs::File::create(&path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        sdo::write_bin(&mut file, &self.sdo).context(IoSnafu {
            path: path.display().to_string(),
        })
    }
}
