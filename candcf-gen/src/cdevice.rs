//! Template context for the static C device descriptor
//!
//! `dcf2dev` renders a C source file describing a device's object dictionary.
//! The renderer itself is a thin writer in the CLI crate; this module
//! prepares the values it consumes: `CO_*` token strings for types, access,
//! object codes and flags, plus the rendered value initializers. The context
//! is `Serialize` so external template engines can consume it as data.

use serde::Serialize;
use snafu::Snafu;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use candcf_core::data_type::DataType;
use candcf_core::device::{Device, Object, ObjectCode, SubObject};
use candcf_core::value::{Env, TypedValue, Value, ValueError};

/// Error raised while preparing the descriptor context
#[derive(Debug, Snafu)]
pub enum EmitError {
    #[snafu(display("rendering value for 0x{index:04X}/{sub_index}: {source}"))]
    RenderValue {
        index: u16,
        sub_index: u8,
        source: ValueError,
    },
    #[snafu(display("data type 0x{index:04X} has no C representation"))]
    UnknownDataType { index: u16 },
}

/// C initializer formatter for a custom time-like data type
pub type CFormatFn = fn(&[i64]) -> String;

struct CCustomType {
    member: String,
    format: CFormatFn,
}

fn c_custom_types() -> &'static RwLock<HashMap<u16, CCustomType>> {
    static REGISTRY: OnceLock<RwLock<HashMap<u16, CCustomType>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register the C emission rules for a custom data type index
///
/// `member` is the union member name in `co_val_t`; `format` renders a parsed
/// tick list as a C initializer.
pub fn add_custom_format(index: u16, member: &str, format: CFormatFn) {
    c_custom_types().write().unwrap().insert(
        index,
        CCustomType {
            member: member.to_string(),
            format,
        },
    );
}

/// The device-level template context
#[derive(Clone, Debug, Serialize)]
pub struct CDevice {
    /// Node name from `[DeviceComissioning]`
    pub name: String,
    pub vendor_name: String,
    pub product_name: String,
    pub order_code: String,
    /// OR-ed `CO_BAUD_*` token string
    pub baud: String,
    /// Highest supported baud rate in kbit/s
    pub rate: u32,
    pub lss: bool,
    /// Bitmask over `[DummyUsage].DummyXXXX`
    pub dummy: u32,
    pub objects: Vec<CObject>,
}

/// Per-object template context
#[derive(Clone, Debug, Serialize)]
pub struct CObject {
    pub index: u16,
    pub name: String,
    /// Enumerant name, e.g. `CO_OBJECT_ARRAY`
    pub code: &'static str,
    pub subs: Vec<CSubObject>,
}

/// Per-sub-object template context
#[derive(Clone, Debug, Serialize)]
pub struct CSubObject {
    pub sub_index: u8,
    pub name: String,
    /// `CO_DEFTYPE_*` token
    pub type_name: String,
    /// `co_val_t` union member, e.g. `u16`
    pub member: String,
    /// C value typename, e.g. `co_unsigned16_t`
    pub c_type: String,
    /// `CO_ACCESS_*` token
    pub access: String,
    /// OR-ed `CO_OBJ_FLAGS_*` token string, `"0"` when none apply
    pub flags: String,
    pub low_limit: String,
    pub high_limit: String,
    pub default_value: String,
    pub value: String,
}

impl CDevice {
    /// Prepare the full context for a parsed device
    pub fn from_device(dev: &Device) -> Result<CDevice, EmitError> {
        let mut cdev = CDevice {
            name: String::new(),
            vendor_name: String::new(),
            product_name: String::new(),
            order_code: String::new(),
            baud: "0".to_string(),
            rate: 0,
            lss: false,
            dummy: 0,
            objects: Vec::new(),
        };

        if let Some(section) = dev.cfg.get("DeviceInfo") {
            cdev.vendor_name = section.get("VendorName").unwrap_or("").to_string();
            cdev.product_name = section.get("ProductName").unwrap_or("").to_string();
            cdev.order_code = section.get("OrderCode").unwrap_or("").to_string();
            for (token, rate) in [
                ("CO_BAUD_10", 10),
                ("CO_BAUD_20", 20),
                ("CO_BAUD_50", 50),
                ("CO_BAUD_125", 125),
                ("CO_BAUD_250", 250),
                ("CO_BAUD_500", 500),
                ("CO_BAUD_800", 800),
                ("CO_BAUD_1000", 1000),
            ] {
                let key = format!("BaudRate_{}", rate);
                if binary_flag(section.get(&key)) {
                    cdev.baud.push_str(" | ");
                    cdev.baud.push_str(token);
                    cdev.rate = rate;
                }
            }
            cdev.lss = binary_flag(section.get("LSS_Supported"));
        }
        if let Some(section) = dev.cfg.get("DeviceComissioning") {
            cdev.name = section.get("NodeName").unwrap_or("").to_string();
        }
        if let Some(section) = dev.cfg.get("DummyUsage") {
            for i in 0..0x20 {
                if binary_flag(section.get(&format!("Dummy{:04X}", i))) {
                    cdev.dummy |= 1 << i;
                }
            }
        }

        for object in dev.objects.values() {
            cdev.objects.push(CObject::from_object(object, &dev.env)?);
        }

        Ok(cdev)
    }
}

fn binary_flag(value: Option<&str>) -> bool {
    value
        .and_then(|v| i128::from_str_radix(v.trim(), 2).ok())
        .is_some_and(|v| v != 0)
}

impl CObject {
    fn from_object(object: &Object, env: &Env) -> Result<CObject, EmitError> {
        let code = match object.object_type {
            ObjectCode::Null => "CO_OBJECT_NULL",
            ObjectCode::Domain => "CO_OBJECT_DOMAIN",
            ObjectCode::DefType => "CO_OBJECT_DEFTYPE",
            ObjectCode::DefStruct => "CO_OBJECT_DEFSTRUCT",
            ObjectCode::Var => "CO_OBJECT_VAR",
            ObjectCode::Array => "CO_OBJECT_ARRAY",
            ObjectCode::Record => "CO_OBJECT_RECORD",
        };
        let mut subs = Vec::new();
        for subobj in object.subs.values() {
            subs.push(CSubObject::from_sub_object(subobj, env)?);
        }
        Ok(CObject {
            index: object.index,
            name: object.name.clone(),
            code,
            subs,
        })
    }
}

impl CSubObject {
    fn from_sub_object(subobj: &SubObject, env: &Env) -> Result<CSubObject, EmitError> {
        let data_type = subobj.data_type;
        let type_name = format!("CO_DEFTYPE_{}", data_type.name());
        let c_type = format!("co_{}_t", data_type.name().to_lowercase());
        let member = member_name(data_type)?;
        let access = format!("CO_ACCESS_{}", subobj.access_type.as_str().to_uppercase());

        let mut flags = "0".to_string();
        let mut add_flag = |token: &str| {
            flags.push_str(" | ");
            flags.push_str(token);
        };
        if subobj.upload_file.is_some() {
            add_flag("CO_OBJ_FLAGS_UPLOAD_FILE");
        }
        if subobj.download_file.is_some() {
            add_flag("CO_OBJ_FLAGS_DOWNLOAD_FILE");
        }
        if subobj.low_limit.as_ref().is_some_and(Value::has_nodeid) {
            add_flag("CO_OBJ_FLAGS_MIN_NODEID");
        }
        if subobj.high_limit.as_ref().is_some_and(Value::has_nodeid) {
            add_flag("CO_OBJ_FLAGS_MAX_NODEID");
        }

        let low_limit = match &subobj.low_limit {
            Some(limit) => render_value(limit, env, subobj)?,
            None => format!("CO_{}_MIN", data_type.name()),
        };
        let high_limit = match &subobj.high_limit {
            Some(limit) => render_value(limit, env, subobj)?,
            None => format!("CO_{}_MAX", data_type.name()),
        };

        let (default_value, value) = if let Some(file) = &subobj.upload_file {
            ("NULL".to_string(), visible_string_literal(file))
        } else if let Some(file) = &subobj.download_file {
            ("NULL".to_string(), visible_string_literal(file))
        } else {
            if subobj.default_value.has_nodeid() {
                add_flag("CO_OBJ_FLAGS_DEF_NODEID");
            }
            if subobj.value.has_nodeid() {
                add_flag("CO_OBJ_FLAGS_VAL_NODEID");
            }
            (
                render_value(&subobj.default_value, env, subobj)?,
                render_value(&subobj.value, env, subobj)?,
            )
        };
        if subobj.has_parameter_value {
            add_flag("CO_OBJ_FLAGS_PARAMETER_VALUE");
        }

        Ok(CSubObject {
            sub_index: subobj.sub_index,
            name: subobj.name.clone(),
            type_name,
            member,
            c_type,
            access,
            flags,
            low_limit,
            high_limit,
            default_value,
            value,
        })
    }
}

fn member_name(data_type: DataType) -> Result<String, EmitError> {
    Ok(match data_type {
        DataType::BOOLEAN => "b",
        DataType::INTEGER8 => "i8",
        DataType::INTEGER16 => "i16",
        DataType::INTEGER32 => "i32",
        DataType::UNSIGNED8 => "u8",
        DataType::UNSIGNED16 => "u16",
        DataType::UNSIGNED32 => "u32",
        DataType::REAL32 => "r32",
        DataType::VISIBLE_STRING => "vs",
        DataType::OCTET_STRING => "os",
        DataType::UNICODE_STRING => "us",
        DataType::TIME_OF_DAY => "t",
        DataType::TIME_DIFF => "td",
        DataType::DOMAIN => "dom",
        DataType::INTEGER24 => "i24",
        DataType::REAL64 => "r64",
        DataType::INTEGER40 => "i40",
        DataType::INTEGER48 => "i48",
        DataType::INTEGER56 => "i56",
        DataType::INTEGER64 => "i64",
        DataType::UNSIGNED24 => "u24",
        DataType::UNSIGNED40 => "u40",
        DataType::UNSIGNED48 => "u48",
        DataType::UNSIGNED56 => "u56",
        DataType::UNSIGNED64 => "u64",
        _ => {
            return match c_custom_types().read().unwrap().get(&data_type.index()) {
                Some(custom) => Ok(custom.member.clone()),
                None => UnknownDataTypeSnafu {
                    index: data_type.index(),
                }
                .fail(),
            }
        }
    }
    .to_string())
}

fn visible_string_literal(s: &str) -> String {
    format!("CO_VISIBLE_STRING_C(\"{}\")", escape_c(s))
}

fn escape_c(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7E => {
                out.push_str(&format!("\\x{:02x}", c as u32))
            }
            c => out.push(c),
        }
    }
    out
}

/// Render a resolved value as a C initializer
///
/// Basic values matching their type's extreme collapse to the `CO_*_MIN` /
/// `CO_*_MAX` tokens; empty array values collapse to `CO_ARRAY_C`.
fn render_value(value: &Value, env: &Env, subobj: &SubObject) -> Result<String, EmitError> {
    let data_type = value.data_type();
    let resolved = value
        .resolve(env)
        .map_err(|source| EmitError::RenderValue {
            index: subobj.index,
            sub_index: subobj.sub_index,
            source,
        })?;

    if let TypedValue::Integer(v) = resolved {
        if data_type.min() == Some(v) && v != 0 {
            return Ok(format!("CO_{}_MIN", data_type.name()));
        }
        if data_type.max() == Some(v) {
            return Ok(format!("CO_{}_MAX", data_type.name()));
        }
    }

    Ok(match resolved {
        TypedValue::Integer(v) => match data_type {
            DataType::UNSIGNED8 => format!("0x{:02X}", v),
            DataType::UNSIGNED16 => format!("0x{:04X}", v),
            DataType::UNSIGNED24 => format!("0x{:06X}", v),
            DataType::UNSIGNED32 => format!("0x{:08X}", v),
            DataType::UNSIGNED40 => format!("0x{:010X}", v),
            DataType::UNSIGNED48 => format!("0x{:012X}", v),
            DataType::UNSIGNED56 => format!("0x{:014X}", v),
            DataType::UNSIGNED64 => format!("0x{:016X}", v),
            _ => format!("{}", v),
        },
        TypedValue::Real(v) => format!("{}", v),
        TypedValue::Str(s) => match data_type {
            DataType::UNICODE_STRING => {
                if s.is_empty() {
                    "CO_ARRAY_C".to_string()
                } else {
                    let units: Vec<String> = s
                        .encode_utf16()
                        .chain(std::iter::once(0))
                        .map(|u| format!("0x{:04x}", u))
                        .collect();
                    format!("CO_UNICODE_STRING_C({{ {} }})", units.join(", "))
                }
            }
            _ => {
                if s.is_empty() {
                    "CO_ARRAY_C".to_string()
                } else {
                    visible_string_literal(&s)
                }
            }
        },
        TypedValue::Bytes(bytes) => {
            if bytes.is_empty() {
                "CO_ARRAY_C".to_string()
            } else if data_type == DataType::DOMAIN {
                let items: Vec<String> =
                    bytes.iter().map(|b| format!("0x{:02x}", b)).collect();
                format!("CO_DOMAIN_C(co_unsigned8_t, {{ {} }})", items.join(", "))
            } else {
                let items: Vec<String> = bytes.iter().map(|b| format!("\\x{:02x}", b)).collect();
                format!("CO_OCTET_STRING_C(\"{}\")", items.join(""))
            }
        }
        TypedValue::Ticks(ticks) => {
            if let Some(custom) = c_custom_types().read().unwrap().get(&data_type.index()) {
                (custom.format)(&ticks)
            } else {
                let days = ticks.first().copied().unwrap_or(0);
                let ms = ticks.get(1).copied().unwrap_or(0);
                format!("{{ .ms = {}, .days = {} }}", ms, days)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candcf_core::device::AccessType;
    use candcf_core::diag::Diagnostics;

    const DCF: &str = "\
[DeviceComissioning]
NodeName=io-module

[DeviceInfo]
VendorName=Acme
ProductName=IO-16
BaudRate_125=1
BaudRate_1000=1
LSS_Supported=1

[DummyUsage]
Dummy0005=1
Dummy0007=1

[MandatoryObjects]
SupportedObjects=2
1=0x1000
2=0x1018

[OptionalObjects]
SupportedObjects=2
1=0x1005
2=0x1008

[1000]
ParameterName=Device type
DataType=0x0007
AccessType=ro
DefaultValue=0x00000191

[1005]
ParameterName=COB-ID SYNC
DataType=0x0007
AccessType=rw
DefaultValue=$NODEID+0x80
LowLimit=0x1
HighLimit=$NODEID+0x77F

[1008]
ParameterName=Manufacturer device name
DataType=0x0009
AccessType=const
DefaultValue=io \"one six\"

[1018]
ParameterName=Identity object
ObjectType=0x09
SubNumber=2

[1018sub0]
ParameterName=Highest sub-index supported
DataType=0x0005
AccessType=const
DefaultValue=4

[1018sub1]
ParameterName=Vendor-ID
DataType=0x0007
AccessType=ro
DefaultValue=0x360
";

    fn build() -> CDevice {
        let mut diag = Diagnostics::new();
        let env = Env::from([("NODEID".to_string(), 255)]);
        let dev = Device::from_dcf_str(DCF, env, &mut diag, true).unwrap();
        CDevice::from_device(&dev).unwrap()
    }

    fn sub<'a>(cdev: &'a CDevice, index: u16, sub_index: u8) -> &'a CSubObject {
        cdev.objects
            .iter()
            .find(|o| o.index == index)
            .unwrap()
            .subs
            .iter()
            .find(|s| s.sub_index == sub_index)
            .unwrap()
    }

    #[test]
    fn test_device_level_fields() {
        let cdev = build();
        assert_eq!(cdev.name, "io-module");
        assert_eq!(cdev.vendor_name, "Acme");
        assert_eq!(cdev.baud, "0 | CO_BAUD_125 | CO_BAUD_1000");
        assert_eq!(cdev.rate, 1000);
        assert!(cdev.lss);
        assert_eq!(cdev.dummy, (1 << 5) | (1 << 7));
    }

    #[test]
    fn test_object_and_sub_tokens() {
        let cdev = build();
        let identity = cdev.objects.iter().find(|o| o.index == 0x1018).unwrap();
        assert_eq!(identity.code, "CO_OBJECT_RECORD");

        let vendor = sub(&cdev, 0x1018, 1);
        assert_eq!(vendor.type_name, "CO_DEFTYPE_UNSIGNED32");
        assert_eq!(vendor.c_type, "co_unsigned32_t");
        assert_eq!(vendor.member, "u32");
        assert_eq!(vendor.access, "CO_ACCESS_RO");
        assert_eq!(vendor.flags, "0");
        assert_eq!(vendor.value, "0x00000360");
        assert_eq!(vendor.low_limit, "CO_UNSIGNED32_MIN");
        assert_eq!(vendor.high_limit, "CO_UNSIGNED32_MAX");
    }

    #[test]
    fn test_nodeid_flags_and_limits() {
        let cdev = build();
        let sync = sub(&cdev, 0x1005, 0);
        assert_eq!(
            sync.flags,
            "0 | CO_OBJ_FLAGS_MAX_NODEID | CO_OBJ_FLAGS_DEF_NODEID | CO_OBJ_FLAGS_VAL_NODEID"
        );
        assert_eq!(sync.low_limit, "0x00000001");
        // Rendered with NODEID = 255
        assert_eq!(sync.high_limit, "0x0000087E");
        assert_eq!(sync.default_value, "0x0000017F");
    }

    #[test]
    fn test_string_rendering() {
        let cdev = build();
        let name = sub(&cdev, 0x1008, 0);
        assert_eq!(name.member, "vs");
        assert_eq!(name.value, "CO_VISIBLE_STRING_C(\"io \\\"one six\\\"\")");
    }

    #[test]
    fn test_access_type_tokens() {
        let access = AccessType::Rww;
        assert_eq!(
            format!("CO_ACCESS_{}", access.as_str().to_uppercase()),
            "CO_ACCESS_RWW"
        );
    }

    #[test]
    fn test_custom_format_registry() {
        add_custom_format(0x00C1, "scet", |t| {
            format!("{{ .subseconds = {}, .seconds = {} }}", t[1], t[0])
        });
        let registry = c_custom_types().read().unwrap();
        let custom = registry.get(&0x00C1).unwrap();
        assert_eq!(custom.member, "scet");
        assert_eq!(
            (custom.format)(&[5, 100]),
            "{ .subseconds = 100, .seconds = 5 }"
        );
    }
}
