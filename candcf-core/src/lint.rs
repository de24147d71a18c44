//! Validity checks for EDS/DCF documents
//!
//! [lint] is a pure predicate over a parsed [IniStore]: it walks every
//! section, reports each finding through the [Diagnostics] sink, and returns
//! whether the document is clean. Callers decide how strict to be; the model
//! builder aborts on a dirty document unless told otherwise.

use regex::Regex;
use std::sync::OnceLock;

use crate::data_type::DataType;
use crate::diag::Diagnostics;
use crate::ini::{IniSection, IniStore};
use crate::value::{parse_int, split_nodeid};

const FILE_INFO_KEYS: &[&str] = &[
    "filename",
    "fileversion",
    "filerevision",
    "edsversion",
    "description",
    "creationtime",
    "creationdate",
    "createdby",
    "modificationtime",
    "modificationdate",
    "modifiedby",
    "lasteds",
];

const DEVICE_COMISSIONING_KEYS: &[&str] = &[
    "nodeid",
    "nodename",
    "noderefd",
    "baudrate",
    "netnumber",
    "networkname",
    "netrefd",
    "canopenmanager",
    "lss_serialnumber",
];

const DEVICE_INFO_KEYS: &[&str] = &[
    "vendorname",
    "vendornumber",
    "productname",
    "productnumber",
    "revisionnumber",
    "ordercode",
    "baudrate_10",
    "baudrate_20",
    "baudrate_50",
    "baudrate_125",
    "baudrate_250",
    "baudrate_500",
    "baudrate_800",
    "baudrate_1000",
    "simplebootupmaster",
    "simplebootupslave",
    "granularity",
    "dynamicchannelssupported",
    "groupmessaging",
    "nrofrxpdo",
    "nroftxpdo",
    "lss_supported",
    "compactpdo",
];

const OBJECT_KEYS: &[&str] = &[
    "subnumber",
    "parametername",
    "objecttype",
    "datatype",
    "accesstype",
    "lowlimit",
    "highlimit",
    "defaultvalue",
    "pdomapping",
    "objflags",
    "compactsubobj",
    "parametervalue",
    "uploadfile",
    "downloadfile",
    "denotation",
    "paramrefd",
];

const ACCESS_TYPES: &[&str] = &["ro", "wo", "rw", "rwr", "rww", "const"];

fn object_section_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^([0-9A-F]{4})(Name|Value|sub([0-9A-F]+))?$").unwrap()
    })
}

fn dummy_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Dummy([0-9A-F]{4})$").unwrap())
}

/// Check a DCF document, reporting every finding; true means clean
pub fn lint(cfg: &IniStore, diag: &mut Diagnostics) -> bool {
    let mut ok = true;
    for section in cfg.sections() {
        let name = section.name();
        let lower = name.to_lowercase();
        match lower.as_str() {
            "fileinfo" => ok &= check_fixed_section(section, FILE_INFO_KEYS, diag),
            "devicecomissioning" => {
                ok &= check_fixed_section(section, DEVICE_COMISSIONING_KEYS, diag)
            }
            "deviceinfo" => ok &= check_fixed_section(section, DEVICE_INFO_KEYS, diag),
            "dummyusage" => ok &= check_dummy_usage(section, diag),
            "comments" => {}
            "mandatoryobjects" | "optionalobjects" | "manufacturerobjects" => {
                ok &= check_object_list(cfg, section, &lower, diag)
            }
            _ => {
                if let Some(caps) = object_section_regex().captures(name) {
                    // Unwrap safety: group 1 is four hex digits
                    let index = u16::from_str_radix(caps.get(1).unwrap().as_str(), 16).unwrap();
                    if caps.get(2).is_none() {
                        ok &= check_object(cfg, section, index, diag);
                    } else if let Some(sub) = caps.get(3) {
                        let sub_index = u32::from_str_radix(sub.as_str(), 16).unwrap_or(u32::MAX);
                        ok &= check_sub_object(cfg, section, index, sub_index, diag);
                    } else {
                        ok &= check_compact_section(cfg, section, index, diag);
                    }
                } else {
                    diag.warn(2, format!("unknown section in DCF: {}", name));
                    ok = false;
                }
            }
        }
    }
    ok
}

fn check_fixed_section(section: &IniSection, allowed: &[&str], diag: &mut Diagnostics) -> bool {
    let mut ok = true;
    for key in section.keys() {
        if !allowed.contains(&key.to_lowercase().as_str()) {
            diag.warn(
                2,
                format!("invalid entry in [{}]: {}", section.name(), key),
            );
            ok = false;
        }
    }
    ok
}

fn check_dummy_usage(section: &IniSection, diag: &mut Diagnostics) -> bool {
    let mut ok = true;
    for (key, value) in section.iter() {
        if dummy_regex().is_match(key) {
            if i128::from_str_radix(value.trim(), 2).is_err() {
                diag.warn(
                    3,
                    format!(
                        "invalid value for {} in [{}]: {}",
                        key,
                        section.name(),
                        value
                    ),
                );
                ok = false;
            }
        } else {
            diag.warn(
                3,
                format!("invalid entry in [{}]: {}", section.name(), key),
            );
            ok = false;
        }
    }
    ok
}

fn check_object_list(
    cfg: &IniStore,
    section: &IniSection,
    kind: &str,
    diag: &mut Diagnostics,
) -> bool {
    let mut ok = true;
    let name = section.name();

    let mut supported_objects = None;
    for (key, value) in section.iter() {
        if key.eq_ignore_ascii_case("SupportedObjects") {
            match value.trim().parse::<u32>() {
                Ok(n) => supported_objects = Some(n),
                Err(_) => {
                    diag.warn(
                        3,
                        format!("invalid value for SupportedObjects in [{}]: {}", name, value),
                    );
                    ok = false;
                }
            }
        } else if key.trim().parse::<u32>().is_err() {
            diag.warn(3, format!("invalid entry in [{}]: {}", name, key));
            ok = false;
        }
    }

    let Some(supported_objects) = supported_objects else {
        diag.warn(3, format!("SupportedObjects entry missing in [{}]", name));
        return false;
    };

    if (supported_objects as usize) < section.len() - 1 {
        diag.warn(3, format!("too many entries in [{}]", name));
        ok = false;
    }

    for i in 1..=supported_objects {
        let Some(value) = section.get(&i.to_string()) else {
            diag.warn(3, format!("entry {} missing in [{}]", i, name));
            ok = false;
            continue;
        };
        let index = match parse_int(value) {
            Ok(index) if (0..=0xFFFF).contains(&index) => index as u16,
            _ => {
                diag.warn(
                    3,
                    format!("invalid object index for entry {} in [{}]: {}", i, name, value),
                );
                ok = false;
                continue;
            }
        };
        if !cfg.contains(&format!("{:04X}", index)) {
            diag.warn(3, format!("object 0x{:04X} not found", index));
            ok = false;
        }
        if index < 0x1000 {
            diag.warn(
                3,
                format!("data type objects are not supported: 0x{:04X}", index),
            );
            ok = false;
        } else if kind == "mandatoryobjects" && !matches!(index, 0x1000 | 0x1001 | 0x1018) {
            diag.warn(3, format!("object 0x{:04X} is not mandatory", index));
            ok = false;
        } else if kind == "optionalobjects" && (0x2000..0x6000).contains(&index) {
            diag.warn(3, format!("object 0x{:04X} is manufacturer-specific", index));
            ok = false;
        } else if kind == "manufacturerobjects" && !(0x2000..0x6000).contains(&index) {
            diag.warn(
                3,
                format!("object 0x{:04X} is not manufacturer-specific", index),
            );
            ok = false;
        }
    }

    ok
}

fn check_entries(section: &IniSection, diag: &mut Diagnostics) -> bool {
    let mut ok = true;
    for (key, value) in section.iter() {
        if OBJECT_KEYS.contains(&key.to_lowercase().as_str()) {
            if key.eq_ignore_ascii_case("AccessType")
                && !ACCESS_TYPES.contains(&value.to_lowercase().as_str())
            {
                diag.warn(
                    3,
                    format!(
                        "invalid value for {} in [{}]: {}",
                        key,
                        section.name(),
                        value
                    ),
                );
                ok = false;
            }
        } else {
            diag.warn(
                3,
                format!("invalid entry in [{}]: {}", section.name(), key),
            );
            ok = false;
        }
    }
    ok
}

fn int_entry(section: &IniSection, key: &str) -> Option<i128> {
    section.get_non_empty(key).and_then(|v| parse_int(v).ok())
}

fn check_object(
    cfg: &IniStore,
    section: &IniSection,
    index: u16,
    diag: &mut Diagnostics,
) -> bool {
    let mut ok = check_entries(section, diag);
    let name = section.name();

    if !section.contains_key("ParameterName") {
        diag.warn(3, format!("ParameterName not specified in [{}]", name));
        ok = false;
    }

    let object_type = match section.get_non_empty("ObjectType") {
        Some(raw) => match parse_int(raw) {
            Ok(code) => code,
            Err(_) => {
                diag.warn(
                    3,
                    format!("invalid value for ObjectType in [{}]: {}", name, raw),
                );
                return false;
            }
        },
        None => 0x07,
    };

    if matches!(object_type, 0x05 | 0x07) && section.get_non_empty("DataType").is_none() {
        diag.warn(3, format!("DataType not specified in [{}]", name));
        ok = false;
    }

    let sub_number = int_entry(section, "SubNumber").unwrap_or(0);
    let compact_sub_obj = int_entry(section, "CompactSubObj").unwrap_or(0);

    if section.get_non_empty("AccessType").is_some() {
        if matches!(object_type, 0x06 | 0x08 | 0x09) && compact_sub_obj == 0 {
            diag.warn(3, format!("AccessType not supported in [{}]", name));
            ok = false;
        }
    } else if object_type != 0x02 && compact_sub_obj != 0 {
        diag.warn(3, format!("AccessType not specified in [{}]", name));
        ok = false;
    }

    if sub_number != 0 && compact_sub_obj != 0 {
        diag.warn(
            3,
            format!("SubNumber and CompactSubObj specified in [{}]", name),
        );
        ok = false;
    } else if sub_number != 0 {
        if !matches!(object_type, 0x08 | 0x09) {
            diag.warn(
                3,
                format!(
                    "ObjectType should be 0x08 (ARRAY) or 0x09 (RECORD) in [{}]",
                    name
                ),
            );
            ok = false;
        }
        let mut n = 0i128;
        for sub_index in 0..=254u32 {
            let sub_name = format!("{:04X}sub{:X}", index, sub_index);
            let Some(sub_section) = cfg.get(&sub_name) else {
                continue;
            };
            n += 1;
            if sub_index == 0 {
                let data_type = int_entry(sub_section, "DataType").unwrap_or(0);
                if data_type != 0x0005 {
                    diag.warn(
                        3,
                        format!("DataType should be UNSIGNED8 in [{}]", sub_section.name()),
                    );
                    ok = false;
                }
            }
        }
        if n < sub_number {
            diag.warn(
                3,
                format!(
                    "{} missing sub-object(s) for object 0x{:04X}",
                    sub_number - n,
                    index
                ),
            );
            ok = false;
        } else if n > sub_number {
            diag.warn(
                3,
                format!(
                    "{} extra sub-object(s) for object 0x{:04X}",
                    n - sub_number,
                    index
                ),
            );
            ok = false;
        }
    } else if compact_sub_obj != 0 && !matches!(object_type, 0x08 | 0x09) {
        diag.warn(
            3,
            format!(
                "ObjectType should be 0x08 (ARRAY) or 0x09 (RECORD) in [{}]",
                name
            ),
        );
        ok = false;
    }

    if sub_number == 0 {
        ok &= check_values_against_type(section, diag);
    }

    ok
}

fn check_sub_object(
    cfg: &IniStore,
    section: &IniSection,
    index: u16,
    sub_index: u32,
    diag: &mut Diagnostics,
) -> bool {
    let mut ok = true;
    let name = format!("{:04X}", index);

    if !cfg.contains(&name) {
        diag.warn(
            3,
            format!("object 0x{} not defined: {}", name, section.name()),
        );
        ok = false;
    }

    if sub_index > 254 {
        diag.warn(3, format!("invalid sub-index: {}", section.name()));
        return false;
    }

    ok &= check_entries(section, diag);

    if !section.contains_key("ParameterName") {
        diag.warn(
            3,
            format!("ParameterName not specified in [{}]", section.name()),
        );
        ok = false;
    }

    ok &= check_values_against_type(section, diag);

    if section.get_non_empty("AccessType").is_none() {
        diag.warn(
            3,
            format!("AccessType not specified in [{}]", section.name()),
        );
        ok = false;
    }

    ok
}

fn check_compact_section(
    cfg: &IniStore,
    section: &IniSection,
    index: u16,
    diag: &mut Diagnostics,
) -> bool {
    let mut ok = true;
    let name = format!("{:04X}", index);

    let mut compact_sub_obj = 0;
    match cfg.get(&name) {
        Some(obj_section) => {
            match int_entry(obj_section, "CompactSubObj") {
                Some(n) => compact_sub_obj = n,
                None => {
                    diag.warn(
                        3,
                        format!("object 0x{} does not support compact storage", name),
                    );
                    ok = false;
                }
            }
            ok &= check_data_type_limits(obj_section, diag);
        }
        None => {
            diag.warn(
                3,
                format!("object 0x{} not defined: {}", name, section.name()),
            );
            ok = false;
        }
    }

    let mut nr_of_entries = None;
    for (key, value) in section.iter() {
        if key.eq_ignore_ascii_case("NrOfEntries") {
            match value.trim().parse::<u32>() {
                Ok(n) => nr_of_entries = Some(n),
                Err(_) => {
                    diag.warn(
                        3,
                        format!(
                            "invalid value for NrOfEntries in [{}]: {}",
                            section.name(),
                            value
                        ),
                    );
                    ok = false;
                }
            }
        } else {
            match key.trim().parse::<i128>() {
                Ok(i) => {
                    if i > compact_sub_obj {
                        diag.warn(
                            3,
                            format!("invalid sub-index in [{}]: {}", section.name(), i),
                        );
                        ok = false;
                    }
                }
                Err(_) => {
                    diag.warn(
                        3,
                        format!("invalid entry in [{}]: {}", section.name(), key),
                    );
                    ok = false;
                }
            }
        }
    }

    let Some(nr_of_entries) = nr_of_entries else {
        diag.warn(
            3,
            format!("NrOfEntries entry missing in [{}]", section.name()),
        );
        return false;
    };

    if (nr_of_entries as usize) < section.len() - 1 {
        diag.warn(3, format!("too many entries in [{}]", section.name()));
        ok = false;
    } else if (nr_of_entries as usize) > section.len() - 1 {
        diag.warn(3, format!("too few entries in [{}]", section.name()));
        ok = false;
    }

    if ok && section.name().to_lowercase().ends_with("value") {
        // Unwrap safety: `ok` implies the object section was found above
        let obj_section = cfg.get(&name).unwrap();
        for (key, value) in section.iter() {
            if key.eq_ignore_ascii_case("NrOfEntries") {
                continue;
            }
            if !check_value(
                obj_section,
                section.name(),
                &format!("entry {}", key),
                value,
                diag,
            ) {
                ok = false;
            }
        }
    }

    ok
}

/// Validate DefaultValue/ParameterValue of a section against its own
/// declared DataType and limits
fn check_values_against_type(section: &IniSection, diag: &mut Diagnostics) -> bool {
    if !check_data_type_limits(section, diag) {
        return false;
    }
    let mut ok = true;
    for entry in ["DefaultValue", "ParameterValue"] {
        if let Some(literal) = section.get_non_empty(entry) {
            if !check_value(section, section.name(), entry, literal, diag) {
                ok = false;
            }
        }
    }
    ok
}

/// Validate the DataType entry and any explicit limits against the type's
/// own range
fn check_data_type_limits(section: &IniSection, diag: &mut Diagnostics) -> bool {
    let Some(raw) = section.get_non_empty("DataType") else {
        return true;
    };
    let data_type = match parse_int(raw) {
        Ok(index) => DataType(index as u16),
        Err(_) => {
            diag.warn(
                4,
                format!("invalid DataType in [{}]: {}", section.name(), raw),
            );
            return false;
        }
    };

    let mut ok = true;
    if data_type.is_basic() {
        if !check_limit(section, "LowLimit", data_type, diag)
            || !check_limit(section, "HighLimit", data_type, diag)
        {
            ok = false;
        }
    } else {
        for entry in ["LowLimit", "HighLimit"] {
            if section.get_non_empty(entry).is_some() {
                diag.warn(
                    4,
                    format!("{} not supported in [{}]", entry, section.name()),
                );
                ok = false;
            }
        }
    }
    ok
}

fn parse_float_bits(literal: &str, data_type: DataType) -> Option<f64> {
    let bits = parse_int(literal).ok()?;
    match data_type {
        DataType::REAL32 => Some(f32::from_bits(bits as u32) as f64),
        DataType::REAL64 => Some(f64::from_bits(bits as u64)),
        _ => None,
    }
}

/// Check an explicit limit entry against the type's own range
fn check_limit(
    section: &IniSection,
    entry: &str,
    data_type: DataType,
    diag: &mut Diagnostics,
) -> bool {
    let Some(literal) = section.get_non_empty(entry) else {
        return true;
    };

    if let Some((low, high)) = data_type.float_limits() {
        let Some(value) = parse_float_bits(literal, data_type) else {
            diag.warn(
                5,
                format!("invalid {} in [{}]: {}", entry, section.name(), literal),
            );
            return false;
        };
        if value < low {
            diag.warn(5, format!("{} underflow in [{}]", entry, section.name()));
            return false;
        }
        if value > high {
            diag.warn(5, format!("{} overflow in [{}]", entry, section.name()));
            return false;
        }
        return true;
    }

    let Ok((value, has_nodeid)) = split_nodeid(literal) else {
        diag.warn(
            5,
            format!("invalid {} in [{}]: {}", entry, section.name(), literal),
        );
        return false;
    };

    // Unwrap safety: float types were handled above, so the type is integer
    let low_limit = data_type.min().unwrap();
    if value < low_limit {
        diag.warn(5, format!("{} underflow in [{}]", entry, section.name()));
        return false;
    }

    let mut high_limit = data_type.max().unwrap();
    if has_nodeid {
        high_limit -= 127;
    }
    if value > high_limit {
        diag.warn(5, format!("{} overflow in [{}]", entry, section.name()));
        return false;
    }

    true
}

/// Range-check a value literal against the declared data type, honoring the
/// `$NODEID` marker on either side
///
/// When exactly one side of a comparison carries the marker, the bound is
/// shifted so the check holds for every node-ID assignment: a plain value
/// against a `$NODEID` bound moves the bound by +1 (low) / +127 (high); a
/// `$NODEID` value against a plain high bound moves it by -127, while a
/// plain low bound is compared against the value's base offset directly.
fn check_value(
    section: &IniSection,
    display_section: &str,
    entry: &str,
    literal: &str,
    diag: &mut Diagnostics,
) -> bool {
    let Some(raw) = section.get_non_empty("DataType") else {
        return true;
    };
    let Ok(index) = parse_int(raw) else {
        return true;
    };
    let data_type = DataType(index as u16);
    if !data_type.is_basic() {
        return true;
    }

    if let Some((type_low, type_high)) = data_type.float_limits() {
        let mut low = type_low;
        let mut high = type_high;
        if let Some(limit) = section.get_non_empty("LowLimit") {
            if let Some(v) = parse_float_bits(limit, data_type) {
                low = v;
            }
        }
        if let Some(limit) = section.get_non_empty("HighLimit") {
            if let Some(v) = parse_float_bits(limit, data_type) {
                high = v;
            }
        }
        let Some(value) = parse_float_bits(literal, data_type) else {
            diag.warn(
                5,
                format!("invalid {} in [{}]: {}", entry, display_section, literal),
            );
            return false;
        };
        if value < low {
            diag.warn(5, format!("{} underflow in [{}]", entry, display_section));
            return false;
        }
        if value > high {
            diag.warn(5, format!("{} overflow in [{}]", entry, display_section));
            return false;
        }
        return true;
    }

    // Unwrap safety: float types were handled above
    let mut low_limit = data_type.min().unwrap();
    let mut low_has_nodeid = false;
    let mut high_limit = data_type.max().unwrap();
    let mut high_has_nodeid = false;

    if let Some(limit) = section.get_non_empty("LowLimit") {
        match split_nodeid(limit) {
            Ok((v, nodeid)) => {
                low_limit = v;
                low_has_nodeid = nodeid;
            }
            Err(_) => {
                diag.warn(
                    5,
                    format!("invalid LowLimit in [{}]: {}", display_section, limit),
                );
                return false;
            }
        }
    }
    if let Some(limit) = section.get_non_empty("HighLimit") {
        match split_nodeid(limit) {
            Ok((v, nodeid)) => {
                high_limit = v;
                high_has_nodeid = nodeid;
            }
            Err(_) => {
                diag.warn(
                    5,
                    format!("invalid HighLimit in [{}]: {}", display_section, limit),
                );
                return false;
            }
        }
    }

    let (value, value_has_nodeid) = match split_nodeid(literal) {
        Ok(parsed) => parsed,
        Err(_) => {
            diag.warn(
                5,
                format!("invalid {} in [{}]: {}", entry, display_section, literal),
            );
            return false;
        }
    };

    if !value_has_nodeid && low_has_nodeid {
        low_limit += 1;
    }
    if value < low_limit {
        diag.warn(5, format!("{} underflow in [{}]", entry, display_section));
        return false;
    }

    if !value_has_nodeid && high_has_nodeid {
        high_limit += 127;
    } else if value_has_nodeid && !high_has_nodeid {
        high_limit -= 127;
    }
    if value > high_limit {
        diag.warn(5, format!("{} overflow in [{}]", entry, display_section));
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ini::parse_dcf;

    fn lint_str(text: &str) -> (bool, Diagnostics) {
        let cfg = parse_dcf(text).unwrap();
        let mut diag = Diagnostics::new();
        let ok = lint(&cfg, &mut diag);
        (ok, diag)
    }

    const MINIMAL: &str = "\
[FileInfo]
FileName=minimal.eds

[MandatoryObjects]
SupportedObjects=2
1=0x1000
2=0x1018

[1000]
ParameterName=Device type
ObjectType=0x07
DataType=0x0007
AccessType=ro
DefaultValue=0x00000000

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
";

    #[test]
    fn test_minimal_document_is_clean() {
        let (ok, diag) = lint_str(MINIMAL);
        assert!(ok, "{:?}", diag.warnings());
        assert!(diag.is_empty());
    }

    #[test]
    fn test_unknown_section_is_flagged() {
        let text = format!("{}\n[Bogus]\nx=1\n", MINIMAL);
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("unknown section in DCF: Bogus"));
    }

    #[test]
    fn test_unknown_entry_in_fixed_section_is_flagged() {
        let text = format!("{}\n[DeviceInfo]\nNotAThing=1\n", MINIMAL);
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("invalid entry in [DeviceInfo]: NotAThing"));
    }

    #[test]
    fn test_non_mandatory_object_in_mandatory_list() {
        let text = MINIMAL.replace("2=0x1018", "2=0x1005").replace(
            "[1018]\nParameterName=Identity object\nObjectType=0x09\nSubNumber=2\n",
            "[1005]\nParameterName=COB-ID SYNC\nDataType=0x0007\nAccessType=rw\n",
        );
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("object 0x1005 is not mandatory"));
    }

    #[test]
    fn test_enumerated_object_must_exist() {
        let text = MINIMAL.replace("SupportedObjects=2", "SupportedObjects=3\n3=0x1001");
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("object 0x1001 not found"));
    }

    #[test]
    fn test_data_type_object_is_rejected() {
        let text = format!(
            "{}\n[OptionalObjects]\nSupportedObjects=1\n1=0x0007\n\n[0007]\nParameterName=U32\nDataType=0x0007\nAccessType=ro\n",
            MINIMAL
        );
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("data type objects are not supported: 0x0007"));
    }

    #[test]
    fn test_sub0_must_be_unsigned8() {
        let text = MINIMAL.replace("[1018sub0]\nParameterName=Highest sub-index supported\nDataType=0x0005", "[1018sub0]\nParameterName=Highest sub-index supported\nDataType=0x0006");
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("DataType should be UNSIGNED8 in [1018sub0]"));
    }

    #[test]
    fn test_subnumber_and_compactsubobj_are_exclusive() {
        let text = MINIMAL.replace("SubNumber=2", "SubNumber=2\nCompactSubObj=2");
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("SubNumber and CompactSubObj specified in [1018]"));
    }

    #[test]
    fn test_missing_sub_objects_are_counted() {
        let text = MINIMAL.replace("SubNumber=2", "SubNumber=3");
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("1 missing sub-object(s) for object 0x1018"));
    }

    #[test]
    fn test_default_value_overflow() {
        let text = MINIMAL.replace(
            "DataType=0x0007\nAccessType=ro\nDefaultValue=0x360",
            "DataType=0x0005\nAccessType=ro\nDefaultValue=0x100",
        );
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("DefaultValue overflow in [1018sub1]"));
    }

    fn with_limit_case(default_value: &str, low_limit: &str) -> String {
        MINIMAL.replace(
            "DataType=0x0007\nAccessType=ro\nDefaultValue=0x360",
            &format!(
                "DataType=0x0007\nAccessType=ro\nDefaultValue={}\nLowLimit={}",
                default_value, low_limit
            ),
        )
    }

    #[test]
    fn test_nodeid_value_against_plain_low_limit() {
        // $NODEID+1 resolves to at least 2, so a plain bound of 1 is met for
        // every node-ID
        let (ok, diag) = lint_str(&with_limit_case("$NODEID+1", "1"));
        assert!(ok, "{:?}", diag.warnings());

        // A plain bound of 2 can be violated by node-ID 1
        let (ok, diag) = lint_str(&with_limit_case("$NODEID+1", "2"));
        assert!(!ok);
        assert!(diag.any_contains("DefaultValue underflow in [1018sub1]"));
    }

    #[test]
    fn test_nodeid_value_against_nodeid_low_limit() {
        // Both sides shift together, so no margin is needed
        let (ok, diag) = lint_str(&with_limit_case("$NODEID+1", "$NODEID+1"));
        assert!(ok, "{:?}", diag.warnings());
    }

    #[test]
    fn test_plain_value_against_nodeid_high_limit() {
        let text = MINIMAL.replace(
            "DataType=0x0007\nAccessType=ro\nDefaultValue=0x360",
            "DataType=0x0005\nAccessType=ro\nDefaultValue=0x80\nHighLimit=$NODEID+0x7F",
        );
        // The bound shifts by +127 for a plain value, so 0x80 <= 0x7F+127
        let (ok, diag) = lint_str(&text);
        assert!(ok, "{:?}", diag.warnings());
    }

    #[test]
    fn test_dummy_usage_values_are_binary() {
        let text = format!("{}\n[DummyUsage]\nDummy0005=2\n", MINIMAL);
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("invalid value for Dummy0005 in [DummyUsage]: 2"));
    }

    #[test]
    fn test_compact_value_section_counts() {
        let text = format!(
            "{}\n[ManufacturerObjects]\nSupportedObjects=1\n1=0x2000\n\n\
             [2000]\nParameterName=Array\nObjectType=0x08\nDataType=0x0005\nAccessType=rw\nCompactSubObj=2\n\n\
             [2000Value]\nNrOfEntries=2\n1=1\n",
            MINIMAL
        );
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("too few entries in [2000Value]"));
    }

    #[test]
    fn test_compact_value_section_range_check() {
        let text = format!(
            "{}\n[ManufacturerObjects]\nSupportedObjects=1\n1=0x2000\n\n\
             [2000]\nParameterName=Array\nObjectType=0x08\nDataType=0x0005\nAccessType=rw\nCompactSubObj=1\n\n\
             [2000Value]\nNrOfEntries=1\n1=0x300\n",
            MINIMAL
        );
        let (ok, diag) = lint_str(&text);
        assert!(!ok);
        assert!(diag.any_contains("entry 1 overflow in [2000Value]"));
    }
}
