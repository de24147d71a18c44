//! Object dictionary model built from a parsed DCF
//!
//! [Device] is the validated, in-memory form of an EDS/DCF document: the
//! dictionary objects with their sub-objects, the identity fields, the error
//! behavior table, and the reconstructed PDOs. It is immutable after
//! construction; the network configurators (in `candcf-gen`) layer their
//! changes on top.

use snafu::{IntoError as _, ResultExt as _, Snafu};
use std::collections::BTreeMap;
use std::path::Path;

use crate::data_type::DataType;
use crate::diag::Diagnostics;
use crate::ini::{IniSection, IniStore, ParseError};
use crate::lint::lint;
use crate::pdo::Pdo;
use crate::value::{parse_int, Env, Value, ValueError};

/// Error raised while building a [Device] from a DCF
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ModelError {
    #[snafu(display("{source}"))]
    Parse { source: ParseError },
    #[snafu(display("invalid DCF: {path}"))]
    InvalidDcf { path: String },
    #[snafu(display("missing section [{section}]"))]
    MissingSection { section: String },
    #[snafu(display("{key} not specified in [{section}]"))]
    MissingEntry { section: String, key: String },
    #[snafu(display("invalid {key} in [{section}]: {source}"))]
    InvalidEntry {
        section: String,
        key: String,
        source: ValueError,
    },
    #[snafu(display("invalid AccessType in [{section}]: {value}"))]
    InvalidAccessType { section: String, value: String },
    #[snafu(display("object 0x{index:04X} does not exist"))]
    NoSuchObject { index: u16 },
    #[snafu(display("sub-object 0x{index:04X}/{sub_index} does not exist"))]
    NoSuchSubObject { index: u16, sub_index: u8 },
}

impl From<ParseError> for ModelError {
    fn from(source: ParseError) -> Self {
        ModelError::Parse { source }
    }
}

/// Access permissions of a sub-object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccessType {
    /// Read-only
    #[default]
    Ro,
    /// Write-only
    Wo,
    /// Read-write
    Rw,
    /// Read-write on process input (may be mapped into a TPDO)
    Rwr,
    /// Read-write on process output (may be mapped into an RPDO)
    Rww,
    /// Read-only, and never changed by the device itself
    Const,
}

impl AccessType {
    pub fn parse(s: &str) -> Option<AccessType> {
        match s.to_lowercase().as_str() {
            "ro" => Some(AccessType::Ro),
            "wo" => Some(AccessType::Wo),
            "rw" => Some(AccessType::Rw),
            "rwr" => Some(AccessType::Rwr),
            "rww" => Some(AccessType::Rww),
            "const" => Some(AccessType::Const),
            _ => None,
        }
    }

    pub fn is_readable(self) -> bool {
        !matches!(self, AccessType::Wo)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, AccessType::Wo | AccessType::Rw | AccessType::Rwr | AccessType::Rww)
    }

    /// May appear in a TPDO mapping
    pub fn supports_tpdo(self) -> bool {
        matches!(self, AccessType::Rwr)
    }

    /// May appear in an RPDO mapping
    pub fn supports_rpdo(self) -> bool {
        matches!(self, AccessType::Rww)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessType::Ro => "ro",
            AccessType::Wo => "wo",
            AccessType::Rw => "rw",
            AccessType::Rwr => "rwr",
            AccessType::Rww => "rww",
            AccessType::Const => "const",
        }
    }
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The object code (`ObjectType` entry) of a dictionary object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectCode {
    Null = 0,
    Domain = 2,
    DefType = 5,
    DefStruct = 6,
    #[default]
    Var = 7,
    Array = 8,
    Record = 9,
}

impl TryFrom<u8> for ObjectCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ObjectCode::Null),
            2 => Ok(ObjectCode::Domain),
            5 => Ok(ObjectCode::DefType),
            6 => Ok(ObjectCode::DefStruct),
            7 => Ok(ObjectCode::Var),
            8 => Ok(ObjectCode::Array),
            9 => Ok(ObjectCode::Record),
            _ => Err(()),
        }
    }
}

/// A CANopen node ID: 1..=127 for configured devices, 255 for unconfigured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeId {
    Unconfigured,
    Configured(u8),
}

impl NodeId {
    pub fn new(value: u8) -> Option<Self> {
        match value {
            255 => Some(NodeId::Unconfigured),
            1..=127 => Some(NodeId::Configured(value)),
            _ => None,
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            NodeId::Unconfigured => 255,
            NodeId::Configured(id) => *id,
        }
    }
}

/// One sub-object of a dictionary object
#[derive(Clone, Debug)]
pub struct SubObject {
    /// Index of the parent object
    pub index: u16,
    pub sub_index: u8,
    pub name: String,
    pub access_type: AccessType,
    pub data_type: DataType,
    pub default_value: Value,
    /// The effective value: `ParameterValue` when present, otherwise the
    /// default
    pub value: Value,
    /// Explicit `LowLimit`, if the file carries one
    pub low_limit: Option<Value>,
    pub high_limit: Option<Value>,
    /// True if this sub-object can be mapped into a PDO
    pub pdo_mapping: bool,
    pub upload_file: Option<String>,
    pub download_file: Option<String>,
    pub has_parameter_value: bool,
}

impl SubObject {
    fn from_section(
        section: &IniSection,
        index: u16,
        sub_index: u8,
    ) -> Result<SubObject, ModelError> {
        let name = section
            .get("Denotation")
            .or(section.get("ParameterName"))
            .ok_or_else(|| {
                MissingEntrySnafu {
                    section: section.name(),
                    key: "ParameterName",
                }
                .build()
            })?
            .to_string();
        let access_type = parse_access_type(section)?;
        let data_type = parse_data_type(section)?;

        let default_value = entry_value(section, data_type, "DefaultValue")?
            .unwrap_or_else(|| Value::empty(data_type));
        let has_parameter_value = section.get_non_empty("ParameterValue").is_some();
        let value = entry_value(section, data_type, "ParameterValue")?
            .unwrap_or_else(|| default_value.clone());

        // Limits only apply to the numeric types
        let (low_limit, high_limit) = if data_type.is_basic() {
            (
                entry_value(section, data_type, "LowLimit")?,
                entry_value(section, data_type, "HighLimit")?,
            )
        } else {
            (None, None)
        };

        Ok(SubObject {
            index,
            sub_index,
            name,
            access_type,
            data_type,
            default_value,
            value,
            low_limit,
            high_limit,
            pdo_mapping: parse_pdo_mapping(section)?,
            upload_file: section.get_non_empty("UploadFile").map(String::from),
            download_file: section.get_non_empty("DownloadFile").map(String::from),
            has_parameter_value,
        })
    }

    fn from_compact_sub_obj(
        cfg: &IniStore,
        index: u16,
        sub_index: u8,
    ) -> Result<SubObject, ModelError> {
        let obj_name = format!("{:04X}", index);
        // Unwrap safety: callers have already resolved the object section
        let section = cfg.get(&obj_name).unwrap();

        let parent_name = section
            .get("Denotation")
            .or(section.get("ParameterName"))
            .ok_or_else(|| {
                MissingEntrySnafu {
                    section: section.name(),
                    key: "ParameterName",
                }
                .build()
            })?;
        let name = cfg
            .get(&format!("{}Name", obj_name))
            .and_then(|s| s.get(&sub_index.to_string()))
            .map(String::from)
            .unwrap_or_else(|| format!("{}{}", parent_name, sub_index));

        let access_type = parse_access_type(section)?;
        let data_type = parse_data_type(section)?;

        let default_value = entry_value(section, data_type, "DefaultValue")?
            .unwrap_or_else(|| Value::empty(data_type));
        let inherited = entry_value(section, data_type, "ParameterValue")?
            .unwrap_or_else(|| default_value.clone());
        let value = match cfg
            .get(&format!("{}Value", obj_name))
            .and_then(|s| s.get_non_empty(&sub_index.to_string()))
        {
            Some(literal) => Value::new(data_type, literal).context(InvalidEntrySnafu {
                section: format!("{}Value", obj_name),
                key: sub_index.to_string(),
            })?,
            None => inherited,
        };

        Ok(SubObject {
            index,
            sub_index,
            name,
            access_type,
            data_type,
            default_value,
            value,
            low_limit: None,
            high_limit: None,
            pdo_mapping: parse_pdo_mapping(section)?,
            upload_file: None,
            download_file: None,
            has_parameter_value: false,
        })
    }

    /// The effective low limit: the explicit one, or the type minimum
    pub fn effective_low_limit(&self) -> Option<i128> {
        match &self.low_limit {
            Some(limit) => limit.resolve(&Env::new()).ok().and_then(|v| v.as_integer()),
            None => self.data_type.min(),
        }
    }

    /// The effective high limit: the explicit one, or the type maximum
    pub fn effective_high_limit(&self) -> Option<i128> {
        match &self.high_limit {
            Some(limit) => limit.resolve(&Env::new()).ok().and_then(|v| v.as_integer()),
            None => self.data_type.max(),
        }
    }
}

fn parse_access_type(section: &IniSection) -> Result<AccessType, ModelError> {
    let raw = section.get_non_empty("AccessType").ok_or_else(|| {
        MissingEntrySnafu {
            section: section.name(),
            key: "AccessType",
        }
        .build()
    })?;
    AccessType::parse(raw).ok_or_else(|| {
        InvalidAccessTypeSnafu {
            section: section.name(),
            value: raw,
        }
        .build()
    })
}

fn parse_data_type(section: &IniSection) -> Result<DataType, ModelError> {
    let raw = section.get_non_empty("DataType").ok_or_else(|| {
        MissingEntrySnafu {
            section: section.name(),
            key: "DataType",
        }
        .build()
    })?;
    let index = parse_int(raw).context(InvalidEntrySnafu {
        section: section.name(),
        key: "DataType",
    })?;
    Ok(DataType(index as u16))
}

fn parse_pdo_mapping(section: &IniSection) -> Result<bool, ModelError> {
    match section.get_non_empty("PDOMapping") {
        // The entry is a binary literal, "0" or "1"
        Some(raw) => i128::from_str_radix(raw.trim(), 2)
            .map(|v| v != 0)
            .map_err(|_| {
                InvalidEntrySnafu {
                    section: section.name(),
                    key: "PDOMapping",
                }
                .into_error(ValueError::InvalidInteger {
                    literal: raw.to_string(),
                })
            }),
        None => Ok(false),
    }
}

fn entry_value(
    section: &IniSection,
    data_type: DataType,
    key: &str,
) -> Result<Option<Value>, ModelError> {
    match section.get_non_empty(key) {
        Some(literal) => Value::new(data_type, literal)
            .context(InvalidEntrySnafu {
                section: section.name(),
                key,
            })
            .map(Some),
        None => Ok(None),
    }
}

/// A dictionary object: an index plus its sub-objects
#[derive(Clone, Debug)]
pub struct Object {
    pub index: u16,
    pub name: String,
    pub object_type: ObjectCode,
    pub subs: BTreeMap<u8, SubObject>,
}

impl Object {
    /// Build an object from its `[XXXX]` section (and sub / compact sections)
    pub fn from_config(cfg: &IniStore, index: u16) -> Result<Object, ModelError> {
        let name = format!("{:04X}", index);
        let section = cfg
            .get(&name)
            .ok_or_else(|| MissingSectionSnafu { section: name.as_str() }.build())?;

        let obj_name = section
            .get("Denotation")
            .or(section.get("ParameterName"))
            .ok_or_else(|| {
                MissingEntrySnafu {
                    section: name.as_str(),
                    key: "ParameterName",
                }
                .build()
            })?
            .to_string();

        let object_type = match section.get_non_empty("ObjectType") {
            Some(raw) => {
                let code = parse_int(raw).context(InvalidEntrySnafu {
                    section: name.as_str(),
                    key: "ObjectType",
                })?;
                ObjectCode::try_from(code as u8).map_err(|_| {
                    InvalidEntrySnafu {
                        section: name.as_str(),
                        key: "ObjectType",
                    }
                    .into_error(ValueError::InvalidInteger {
                        literal: raw.to_string(),
                    })
                })?
            }
            None => ObjectCode::Var,
        };

        let sub_number = match section.get_non_empty("SubNumber") {
            Some(raw) => parse_int(raw).context(InvalidEntrySnafu {
                section: name.as_str(),
                key: "SubNumber",
            })?,
            None => 0,
        };
        let compact_sub_obj = match section.get_non_empty("CompactSubObj") {
            Some(raw) => parse_int(raw).context(InvalidEntrySnafu {
                section: name.as_str(),
                key: "CompactSubObj",
            })?,
            None => 0,
        };

        let mut subs = BTreeMap::new();
        if sub_number != 0 {
            for sub_index in 0..=254u8 {
                let sub_name = format!("{}sub{:X}", name, sub_index);
                if let Some(sub_section) = cfg.get(&sub_name) {
                    subs.insert(
                        sub_index,
                        SubObject::from_section(sub_section, index, sub_index)?,
                    );
                }
            }
        } else if compact_sub_obj != 0 {
            let count = compact_sub_obj as u8;
            subs.insert(0, Self::compact_sub0(section, index, count)?);
            for sub_index in 1..=count {
                subs.insert(
                    sub_index,
                    SubObject::from_compact_sub_obj(cfg, index, sub_index)?,
                );
            }
        } else {
            subs.insert(0, SubObject::from_section(section, index, 0)?);
        }

        Ok(Object {
            index,
            name: obj_name,
            object_type,
            subs,
        })
    }

    /// The synthesized sub-index 0 of a compact object, holding the entry
    /// count
    fn compact_sub0(
        section: &IniSection,
        index: u16,
        count: u8,
    ) -> Result<SubObject, ModelError> {
        let literal = count.to_string();
        let value = Value::new(DataType::UNSIGNED8, &literal).context(InvalidEntrySnafu {
            section: section.name(),
            key: "CompactSubObj",
        })?;
        Ok(SubObject {
            index,
            sub_index: 0,
            name: "NrOfObjects".to_string(),
            access_type: AccessType::Ro,
            data_type: DataType::UNSIGNED8,
            default_value: value.clone(),
            value,
            low_limit: None,
            high_limit: None,
            pdo_mapping: false,
            upload_file: None,
            download_file: None,
            has_parameter_value: false,
        })
    }

    /// Fabricate a placeholder object for a data-type index used as a PDO
    /// mapping dummy entry
    ///
    /// The DataType is set to the object's own index rather than UNSIGNED32,
    /// so dummy mapping slots resolve exactly like regular ones.
    pub fn from_dummy(index: u16) -> Object {
        let data_type = DataType(index);
        let value = Value::empty(data_type);
        let mut subs = BTreeMap::new();
        subs.insert(
            0,
            SubObject {
                index,
                sub_index: 0,
                name: data_type.name(),
                access_type: AccessType::Rw,
                data_type,
                default_value: value.clone(),
                value,
                low_limit: None,
                high_limit: None,
                pdo_mapping: true,
                upload_file: None,
                download_file: None,
                has_parameter_value: false,
            },
        );
        Object {
            index,
            name: data_type.name(),
            object_type: ObjectCode::DefType,
            subs,
        }
    }

    pub fn sub(&self, sub_index: u8) -> Option<&SubObject> {
        self.subs.get(&sub_index)
    }
}

/// A CANopen device: the validated object dictionary plus derived state
#[derive(Clone, Debug)]
pub struct Device {
    /// The underlying (expanded) INI document
    pub cfg: IniStore,
    /// Variable environment used for value resolution
    pub env: Env,
    /// 1..=127, or 255 when unconfigured
    pub node_id: u8,
    pub device_type: u32,
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision_number: u32,
    pub serial_number: u32,
    /// Error behavior entries from object 0x1029 (sub-index > 0)
    pub error_behavior: BTreeMap<u8, u8>,
    /// Receive-PDOs keyed by PDO number (1-based)
    pub rpdo: BTreeMap<u16, Pdo>,
    /// Transmit-PDOs keyed by PDO number (1-based)
    pub tpdo: BTreeMap<u16, Pdo>,
    /// The dictionary objects, keyed by index
    pub objects: BTreeMap<u16, Object>,
    /// Placeholder objects fabricated for dummy PDO mapping entries; kept
    /// out of `objects` so dictionary iteration only sees real entries
    pub dummy_objects: BTreeMap<u16, Object>,
}

impl Device {
    /// Build a device from a parsed (and expanded) DCF document
    pub fn new(cfg: IniStore, mut env: Env, diag: &mut Diagnostics) -> Result<Device, ModelError> {
        if !env.contains_key("NODEID") {
            if let Some(raw) = cfg
                .get("DeviceComissioning")
                .and_then(|s| s.get_non_empty("NodeID"))
            {
                let id = parse_int(raw).context(InvalidEntrySnafu {
                    section: "DeviceComissioning",
                    key: "NodeID",
                })?;
                env.insert("NODEID".to_string(), id as u8);
            }
        }
        let node_id = env.get("NODEID").copied().unwrap_or(255);
        if NodeId::new(node_id).is_none() {
            diag.warn(2, format!("invalid node-ID specified: {}", node_id));
        }

        let mut objects = BTreeMap::new();
        for group in ["MandatoryObjects", "OptionalObjects", "ManufacturerObjects"] {
            let Some(section) = cfg.get(group) else {
                continue;
            };
            let count = match section.get_non_empty("SupportedObjects") {
                Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                    InvalidEntrySnafu {
                        section: group,
                        key: "SupportedObjects",
                    }
                    .into_error(ValueError::InvalidInteger {
                        literal: raw.to_string(),
                    })
                })?,
                None => 0,
            };
            for i in 1..=count {
                let key = i.to_string();
                let raw = section.get_non_empty(&key).ok_or_else(|| {
                    MissingEntrySnafu {
                        section: group,
                        key: key.as_str(),
                    }
                    .build()
                })?;
                let index = parse_int(raw).context(InvalidEntrySnafu {
                    section: group,
                    key: key.as_str(),
                })? as u16;
                objects.insert(index, Object::from_config(&cfg, index)?);
            }
        }

        let device_type = required_value(&objects, &env, 0x1000, 0)? as u32;
        let mut vendor_id = required_value(&objects, &env, 0x1018, 1)? as u32;
        let mut product_code = optional_value(&objects, &env, 0x1018, 2)?.unwrap_or(0) as u32;
        let mut revision_number = optional_value(&objects, &env, 0x1018, 3)?.unwrap_or(0) as u32;
        let mut serial_number = optional_value(&objects, &env, 0x1018, 4)?.unwrap_or(0) as u32;

        if let Some(section) = cfg.get("DeviceInfo") {
            let mut check = |key: &str,
                             current: &mut u32,
                             what: &str,
                             diag: &mut Diagnostics|
             -> Result<(), ModelError> {
                if let Some(raw) = section.get_non_empty(key) {
                    let value = parse_int(raw).context(InvalidEntrySnafu {
                        section: "DeviceInfo",
                        key,
                    })? as u32;
                    if *current != 0 && *current != value {
                        diag.warn(
                            2,
                            format!(
                                "{} in [DeviceInfo] differs from {} in identity object",
                                key, what
                            ),
                        );
                    }
                    *current = value;
                }
                Ok(())
            };
            check("VendorNumber", &mut vendor_id, "vendor-ID", diag)?;
            check("ProductNumber", &mut product_code, "product code", diag)?;
            check("RevisionNumber", &mut revision_number, "revision number", diag)?;
        }
        if let Some(section) = cfg.get("DeviceComissioning") {
            if let Some(raw) = section.get_non_empty("LSS_SerialNumber") {
                let value = parse_int(raw).context(InvalidEntrySnafu {
                    section: "DeviceComissioning",
                    key: "LSS_SerialNumber",
                })? as u32;
                if serial_number != 0 && serial_number != value {
                    diag.warn(
                        2,
                        "LSS_SerialNumber in [DeviceComissioning] differs from serial number \
                         in identity object",
                    );
                }
                serial_number = value;
            }
        }

        let mut error_behavior = BTreeMap::new();
        if let Some(object) = objects.get(&0x1029) {
            for (sub_index, subobj) in &object.subs {
                if *sub_index == 0 {
                    continue;
                }
                let value = subobj.value.resolve_int(&env).context(InvalidEntrySnafu {
                    section: format!("1029sub{:X}", sub_index),
                    key: "ParameterValue",
                })?;
                error_behavior.insert(*sub_index, value as u8);
            }
        }

        let mut dummy_objects = BTreeMap::new();
        let mut rpdo = BTreeMap::new();
        let mut tpdo = BTreeMap::new();
        for i in 0..512u16 {
            if objects.contains_key(&(0x1400 + i)) {
                let pdo = Pdo::from_objects(&objects, &mut dummy_objects, &env, 0x1400 + i)?;
                rpdo.insert(i + 1, pdo);
            }
        }
        for i in 0..512u16 {
            if objects.contains_key(&(0x1800 + i)) {
                let pdo = Pdo::from_objects(&objects, &mut dummy_objects, &env, 0x1800 + i)?;
                tpdo.insert(i + 1, pdo);
            }
        }

        Ok(Device {
            cfg,
            env,
            node_id,
            device_type,
            vendor_id,
            product_code,
            revision_number,
            serial_number,
            error_behavior,
            rpdo,
            tpdo,
            objects,
            dummy_objects,
        })
    }

    /// Parse, expand, lint, and build a device from a DCF file
    ///
    /// With `strict` set, lint findings abort the build.
    pub fn from_dcf(
        path: impl AsRef<Path>,
        env: Env,
        diag: &mut Diagnostics,
        strict: bool,
    ) -> Result<Device, ModelError> {
        let path = path.as_ref();
        let cfg = crate::ini::load_dcf(path)?;
        if !lint(&cfg, diag) && strict {
            return InvalidDcfSnafu {
                path: path.display().to_string(),
            }
            .fail();
        }
        Self::new(cfg, env, diag)
    }

    /// Like [Device::from_dcf], for an in-memory document
    pub fn from_dcf_str(
        text: &str,
        env: Env,
        diag: &mut Diagnostics,
        strict: bool,
    ) -> Result<Device, ModelError> {
        let cfg = crate::ini::parse_dcf(text)?;
        if !lint(&cfg, diag) && strict {
            return InvalidDcfSnafu { path: "<string>" }.fail();
        }
        Self::new(cfg, env, diag)
    }

    pub fn object(&self, index: u16) -> Option<&Object> {
        self.objects.get(&index)
    }

    pub fn contains_object(&self, index: u16) -> bool {
        self.objects.contains_key(&index)
    }

    /// Look up a sub-object, falling back to the dummy table so PDO mapping
    /// handles resolve uniformly
    pub fn sub_object(&self, index: u16, sub_index: u8) -> Option<&SubObject> {
        self.objects
            .get(&index)
            .or_else(|| self.dummy_objects.get(&index))
            .and_then(|obj| obj.sub(sub_index))
    }
}

fn required_value(
    objects: &BTreeMap<u16, Object>,
    env: &Env,
    index: u16,
    sub_index: u8,
) -> Result<i128, ModelError> {
    optional_value(objects, env, index, sub_index)?.ok_or_else(|| {
        if objects.contains_key(&index) {
            NoSuchSubObjectSnafu { index, sub_index }.build()
        } else {
            NoSuchObjectSnafu { index }.build()
        }
    })
}

fn optional_value(
    objects: &BTreeMap<u16, Object>,
    env: &Env,
    index: u16,
    sub_index: u8,
) -> Result<Option<i128>, ModelError> {
    let Some(subobj) = objects.get(&index).and_then(|obj| obj.sub(sub_index)) else {
        return Ok(None);
    };
    subobj
        .value
        .resolve_int(env)
        .context(InvalidEntrySnafu {
            section: format!("{:04X}sub{:X}", index, sub_index),
            key: "ParameterValue",
        })
        .map(Some)
}
