//! Core EDS/DCF processing for CANopen devices
//!
//! This crate turns a CANopen Electronic Data Sheet / Device Configuration
//! File (an INI document describing a device's object dictionary) into a
//! validated in-memory [Device](device::Device) model:
//!
//! 1. [ini] parses the document into an ordered, case-insensitive store and
//!    expands the implicit `CompactPDO` objects.
//! 2. [lint] checks the document against the DCF structure rules.
//! 3. [device] builds the object dictionary, resolving typed values
//!    ([value]) through the CiA 301 data-type tables ([data_type]), and
//!    reconstructs the logical PDOs ([pdo]).
//! 4. [sdo] encodes concise-SDO download scripts for boot-time slave
//!    configuration.
//!
//! Network-level configuration (slave/master overlays) lives in the
//! `candcf-gen` crate.

pub mod data_type;
pub mod device;
pub mod diag;
pub mod ini;
pub mod lint;
pub mod pdo;
pub mod sdo;
pub mod value;

pub use data_type::DataType;
pub use device::{AccessType, Device, ModelError, NodeId, Object, ObjectCode, SubObject};
pub use diag::Diagnostics;
pub use ini::{IniStore, ParseError};
pub use lint::lint;
pub use pdo::Pdo;
pub use value::{Env, TypedValue, Value, ValueError};
