//! Reconstruction of logical PDOs from communication and mapping records
//!
//! A PDO is described in the dictionary by a communication parameter record
//! (0x1400.. for RPDOs, 0x1800.. for TPDOs) and a mapping parameter record at
//! the communication index + 0x200. [Pdo::from_objects] reads both back into
//! one logical structure with the mapping slots resolved to sub-object
//! handles.

use std::collections::BTreeMap;

use crate::device::{
    Device, ModelError, NoSuchObjectSnafu, NoSuchSubObjectSnafu, Object,
};
use crate::value::Env;

/// Handle to a dictionary sub-object, as stored in a PDO mapping slot
///
/// Mapping entries reference sub-objects owned by the device; resolving the
/// handle through [Device::sub_object] keeps the dictionary as the single
/// owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubRef {
    pub index: u16,
    pub sub_index: u8,
}

/// A logical Receive- or Transmit-PDO
#[derive(Clone, Debug, PartialEq)]
pub struct Pdo {
    /// COB-ID; bit 31 means disabled, bit 30 means RTR is not allowed
    pub cob_id: u32,
    pub transmission_type: u8,
    /// TPDO only: minimum time between transmissions, in multiples of 100us
    pub inhibit_time: u16,
    /// TPDO only: transmission period in ms
    pub event_timer: u16,
    /// RPDO only: reception deadline in ms
    pub event_deadline: u16,
    /// TPDO only
    pub sync_start_value: u8,
    /// Number of valid mapping entries
    pub n: u8,
    /// Mapping slots (1-based) resolved to sub-object handles
    pub mapping: BTreeMap<u8, SubRef>,
}

/// COB-ID flag: the PDO exists but is not used
pub const COB_ID_DISABLED: u32 = 0x8000_0000;
/// COB-ID flag: RTR is not allowed on this PDO
pub const COB_ID_NO_RTR: u32 = 0x4000_0000;

impl Default for Pdo {
    fn default() -> Self {
        Self {
            cob_id: COB_ID_DISABLED,
            transmission_type: 0,
            inhibit_time: 0,
            event_timer: 0,
            event_deadline: 0,
            sync_start_value: 0,
            n: 0,
            mapping: BTreeMap::new(),
        }
    }
}

impl Pdo {
    pub fn is_disabled(&self) -> bool {
        self.cob_id & COB_ID_DISABLED != 0
    }

    /// The CAN identifier without the flag bits
    pub fn can_id(&self) -> u32 {
        self.cob_id & 0x1FFF_FFFF
    }

    /// Read a PDO back from its communication and mapping records
    ///
    /// Mapping words referencing an index below 0x1000 are dummy (padding)
    /// entries; a placeholder object is fabricated for them in `dummies`.
    pub(crate) fn from_objects(
        objects: &BTreeMap<u16, Object>,
        dummies: &mut BTreeMap<u16, Object>,
        env: &Env,
        comm_index: u16,
    ) -> Result<Pdo, ModelError> {
        let is_tpdo = (comm_index & 0xFE00) == 0x1800;
        let mut pdo = Pdo::default();

        let comm = objects
            .get(&comm_index)
            .ok_or_else(|| NoSuchObjectSnafu { index: comm_index }.build())?;
        let comm_value = |sub_index: u8| -> Result<Option<i128>, ModelError> {
            match comm.sub(sub_index) {
                Some(subobj) => subobj
                    .value
                    .resolve_int(env)
                    .map(Some)
                    .map_err(|source| ModelError::InvalidEntry {
                        section: format!("{:04X}sub{:X}", comm_index, sub_index),
                        key: "ParameterValue".to_string(),
                        source,
                    }),
                None => Ok(None),
            }
        };

        // Sub 0 declares how many communication sub-entries are valid; honor
        // it even where CANopen would allow more.
        let n = comm_value(0)?.unwrap_or(0);
        if n >= 1 {
            if let Some(v) = comm_value(1)? {
                pdo.cob_id = v as u32;
            }
        }
        if n >= 2 {
            if let Some(v) = comm_value(2)? {
                pdo.transmission_type = v as u8;
            }
        }
        if n >= 3 && is_tpdo {
            if let Some(v) = comm_value(3)? {
                pdo.inhibit_time = v as u16;
            }
        }
        if n >= 5 {
            if let Some(v) = comm_value(5)? {
                if is_tpdo {
                    pdo.event_timer = v as u16;
                } else {
                    pdo.event_deadline = v as u16;
                }
            }
        }
        if n >= 6 && is_tpdo {
            if let Some(v) = comm_value(6)? {
                pdo.sync_start_value = v as u8;
            }
        }

        let map_index = comm_index + 0x200;
        let mapping_obj = objects
            .get(&map_index)
            .ok_or_else(|| NoSuchObjectSnafu { index: map_index }.build())?;
        let count = match mapping_obj.sub(0) {
            Some(subobj) => subobj
                .value
                .resolve_int(env)
                .map_err(|source| ModelError::InvalidEntry {
                    section: format!("{:04X}sub0", map_index),
                    key: "ParameterValue".to_string(),
                    source,
                })?,
            None => 64,
        };
        for slot in 1..=count.clamp(0, 64) as u8 {
            let Some(subobj) = mapping_obj.sub(slot) else {
                continue;
            };
            let word = subobj
                .value
                .resolve_int(env)
                .map_err(|source| ModelError::InvalidEntry {
                    section: format!("{:04X}sub{:X}", map_index, slot),
                    key: "ParameterValue".to_string(),
                    source,
                })? as u32;
            if word == 0 {
                continue;
            }
            let index = (word >> 16) as u16;
            let sub_index = ((word >> 8) & 0xFF) as u8;
            if index < 0x1000 {
                dummies
                    .entry(index)
                    .or_insert_with(|| Object::from_dummy(index));
                if dummies[&index].sub(sub_index).is_none() {
                    return NoSuchSubObjectSnafu { index, sub_index }.fail();
                }
            } else if objects
                .get(&index)
                .and_then(|obj| obj.sub(sub_index))
                .is_none()
            {
                return NoSuchSubObjectSnafu { index, sub_index }.fail();
            }
            pdo.mapping.insert(slot, SubRef { index, sub_index });
        }
        pdo.n = if mapping_obj.sub(0).is_some() {
            count as u8
        } else {
            pdo.mapping.len() as u8
        };

        Ok(pdo)
    }
}

/// Print the Receive-PDO mappings of a device, one line per connection
pub fn print_rpdo(dev: &Device) -> Result<(), ModelError> {
    print_pdos(dev, false)
}

/// Print the Transmit-PDO mappings of a device, one line per connection
pub fn print_tpdo(dev: &Device) -> Result<(), ModelError> {
    print_pdos(dev, true)
}

fn print_pdos(dev: &Device, tx: bool) -> Result<(), ModelError> {
    let pdos = if tx { &dev.tpdo } else { &dev.rpdo };
    // Remote PDO objects describing the peer, when the device carries them
    let peer_base: u16 = if tx { 0x5C00 } else { 0x5800 };
    let peer_map_base: u16 = if tx { 0x5E00 } else { 0x5A00 };

    for (i, pdo) in pdos {
        if pdo.is_disabled() {
            continue;
        }
        let (j, node_id) = match optional(dev, peer_base + i - 1, 0)? {
            Some(value) => ((value >> 8) as u32, (value & 0xFF) as u32),
            None => {
                if pdo.cob_id & COB_ID_NO_RTR != 0 {
                    continue;
                }
                let cob_id = pdo.cob_id & 0x780;
                let valid: &[u32] = if tx {
                    &[0x200, 0x300, 0x400, 0x500]
                } else {
                    &[0x180, 0x280, 0x380, 0x480]
                };
                if !valid.contains(&cob_id) {
                    continue;
                }
                let j = if tx { (cob_id >> 8) - 1 } else { cob_id >> 8 };
                (j, pdo.cob_id & 0x7F)
            }
        };
        if tx {
            println!("TPDO {} mapped to RPDO {} on node {}", i, j, node_id);
        } else {
            println!("RPDO {} mapped to TPDO {} on node {}", i, j, node_id);
        }
        for (slot, subref) in &pdo.mapping {
            if let Some(value) = optional(dev, peer_map_base + i - 1, *slot)? {
                let index = (value >> 16) & 0xFFFF;
                let sub_index = (value >> 8) & 0xFF;
                let arrow = if tx { "->" } else { "<-" };
                println!(
                    "  0x{:04X}/{} {} 0x{:04X}/{}",
                    subref.index, subref.sub_index, arrow, index, sub_index
                );
            }
        }
    }
    Ok(())
}

fn optional(dev: &Device, index: u16, sub_index: u8) -> Result<Option<i128>, ModelError> {
    match dev.object(index).and_then(|obj| obj.sub(sub_index)) {
        Some(subobj) => subobj
            .value
            .resolve_int(&dev.env)
            .map(Some)
            .map_err(|source| ModelError::InvalidEntry {
                section: format!("{:04X}sub{:X}", index, sub_index),
                key: "ParameterValue".to_string(),
                source,
            }),
        None => Ok(None),
    }
}
