//! Case-insensitive, insertion-ordered INI store for EDS/DCF files
//!
//! EDS files are INI documents with case-insensitive section and key lookup,
//! but tools are expected to report names with the casing used in the file.
//! The store therefore hashes on the lowercased name and keeps the original
//! casing alongside the value.
//!
//! After parsing a DCF, the CompactPDO expansion pass must run (see
//! [expand_compact_pdos]); [parse_dcf] performs both steps.

use indexmap::IndexMap;
use snafu::{ResultExt as _, Snafu};
use std::path::Path;

/// Error returned when an INI document cannot be parsed
#[derive(Debug, Snafu)]
pub enum ParseError {
    #[snafu(display("IO error reading {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("line {line}: malformed section header"))]
    MalformedSection { line: usize },
    #[snafu(display("line {line}: duplicate section [{section}]"))]
    DuplicateSection { line: usize, section: String },
    #[snafu(display("line {line}: entry outside of any section"))]
    EntryOutsideSection { line: usize },
    #[snafu(display("line {line}: duplicate key '{key}' in [{section}]"))]
    DuplicateKey {
        line: usize,
        section: String,
        key: String,
    },
}

/// One `[section]` of an INI document
///
/// Keys compare case-insensitively; the casing of the first insertion is kept
/// for display. Iteration follows insertion order.
#[derive(Clone, Debug, Default)]
pub struct IniSection {
    name: String,
    entries: IndexMap<String, (String, String)>,
}

impl IniSection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: IndexMap::new(),
        }
    }

    /// The section name with its original casing
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_lowercase())
            .map(|(_, v)| v.as_str())
    }

    /// Like [get], but treats an empty value the same as a missing key
    ///
    /// DCF files routinely carry entries like `VendorNumber=` to mark a field
    /// as present but unset.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    /// Insert or update an entry; the original casing of the first insertion
    /// wins for display
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.get_mut(&key.to_lowercase()) {
            Some((_, v)) => *v = value,
            None => {
                self.entries
                    .insert(key.to_lowercase(), (key.to_string(), value));
            }
        }
    }

    /// Keys in insertion order, with their original casing
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(k, _)| k.as_str())
    }

    /// (key, value) pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An INI document: sections in insertion order, case-insensitive lookup
#[derive(Clone, Debug, Default)]
pub struct IniStore {
    sections: IndexMap<String, IniSection>,
}

impl IniStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, section: &str) -> Option<&IniSection> {
        self.sections.get(&section.to_lowercase())
    }

    pub fn get_mut(&mut self, section: &str) -> Option<&mut IniSection> {
        self.sections.get_mut(&section.to_lowercase())
    }

    pub fn contains(&self, section: &str) -> bool {
        self.sections.contains_key(&section.to_lowercase())
    }

    /// Convenience lookup of a single value
    pub fn get_value(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section).and_then(|s| s.get(key))
    }

    /// Get a section, creating it at the end of the document if absent
    pub fn ensure_section(&mut self, name: &str) -> &mut IniSection {
        self.sections
            .entry(name.to_lowercase())
            .or_insert_with(|| IniSection::new(name))
    }

    /// Sections in insertion order
    pub fn sections(&self) -> impl Iterator<Item = &IniSection> {
        self.sections.values()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Parse a raw INI document
    ///
    /// Accepts `[section]` headers, `key = value`, `key : value`, and bare
    /// `key` lines. `#` and `;` introduce comments, either on their own line
    /// or after whitespace. Values are kept verbatim.
    pub fn parse_str(text: &str) -> Result<Self, ParseError> {
        let mut store = IniStore::new();
        let mut current: Option<String> = None;

        for (i, raw_line) in text.lines().enumerate() {
            let line = i + 1;
            let stripped = strip_comment(raw_line).trim();
            if stripped.is_empty() {
                continue;
            }

            if let Some(rest) = stripped.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or(ParseError::MalformedSection { line })?;
                if store.contains(name) {
                    return DuplicateSectionSnafu {
                        line,
                        section: name,
                    }
                    .fail();
                }
                store.ensure_section(name);
                current = Some(name.to_lowercase());
                continue;
            }

            let section_key = current
                .as_ref()
                .ok_or(ParseError::EntryOutsideSection { line })?;

            let (key, value) = match stripped.find(|c| c == '=' || c == ':') {
                Some(pos) => (stripped[..pos].trim_end(), stripped[pos + 1..].trim()),
                None => (stripped, ""),
            };
            // Unwrap safety: `current` only holds keys of existing sections
            let section = store.sections.get_mut(section_key).unwrap();
            if section.contains_key(key) {
                return DuplicateKeySnafu {
                    line,
                    section: section.name(),
                    key,
                }
                .fail();
            }
            section.set(key, value);
        }

        Ok(store)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Self::parse_str(&text)
    }
}

/// Parse a DCF document and run the CompactPDO expansion pass
pub fn parse_dcf(text: &str) -> Result<IniStore, ParseError> {
    let mut store = IniStore::parse_str(text)?;
    expand_compact_pdos(&mut store);
    Ok(store)
}

/// Load a DCF file and run the CompactPDO expansion pass
pub fn load_dcf(path: impl AsRef<Path>) -> Result<IniStore, ParseError> {
    let mut store = IniStore::load(path)?;
    expand_compact_pdos(&mut store);
    Ok(store)
}

fn strip_comment(line: &str) -> &str {
    let mut prev_is_space = true;
    for (pos, c) in line.char_indices() {
        if (c == '#' || c == ';') && prev_is_space {
            return &line[..pos];
        }
        prev_is_space = c.is_whitespace();
    }
    line
}

/// Best-effort base-aware integer read of an INI value, for the expansion pass
fn read_int(store: &IniStore, section: &str, key: &str) -> i128 {
    store
        .get(section)
        .and_then(|s| s.get_non_empty(key))
        .and_then(|v| crate::value::parse_int(v).ok())
        .unwrap_or(0)
}

/// Expand the implicit PDO objects described by `[DeviceInfo].CompactPDO`
///
/// `CompactPDO` is a bit-mask over the communication parameter sub-indices
/// 1..=6. For every Receive/Transmit-PDO counted by `NrOfRxPDO`/`NrOfTxPDO`
/// but not described by an explicit `[14xx]`/`[18xx]` section, this
/// synthesizes the communication parameter record with the masked sub-entries
/// and a compact `[16xx]`/`[1Axx]` mapping record, and accounts for both in
/// `[OptionalObjects]`. Running the pass twice is a no-op.
pub fn expand_compact_pdos(store: &mut IniStore) {
    expand_compact(store, false);
    expand_compact(store, true);
}

struct CompactSub {
    sub: u8,
    name: &'static str,
    data_type: &'static str,
}

const COMPACT_SUBS: [CompactSub; 5] = [
    CompactSub {
        sub: 2,
        name: "transmission type",
        data_type: "0x0005",
    },
    CompactSub {
        sub: 3,
        name: "inhibit time",
        data_type: "0x0006",
    },
    CompactSub {
        sub: 4,
        // Sub-index 4 is reserved for TPDOs; RPDOs name it the compatibility
        // entry
        name: "compatibility entry",
        data_type: "0x0005",
    },
    CompactSub {
        sub: 5,
        name: "event-timer",
        data_type: "0x0006",
    },
    CompactSub {
        sub: 6,
        name: "SYNC start value",
        data_type: "0x0005",
    },
];

fn expand_compact(store: &mut IniStore, tx: bool) {
    if !store.contains("DeviceInfo") {
        return;
    }
    let compact_pdo = read_int(store, "DeviceInfo", "CompactPDO");
    if compact_pdo == 0 {
        return;
    }

    let comm_base: u16 = if tx { 0x1800 } else { 0x1400 };
    let map_base: u16 = if tx { 0x1A00 } else { 0x1600 };
    let pdo_kind = if tx { "TPDO" } else { "RPDO" };
    let count_key = if tx { "NrOfTxPDO" } else { "NrOfRxPDO" };
    let cob_offset: u32 = if tx { 0x80 } else { 0x100 };

    let mut npdo = (0..512u16)
        .filter(|i| store.contains(&format!("{:04X}", comm_base + i)))
        .count() as i128;
    let nr_of_pdo = read_int(store, "DeviceInfo", count_key);

    for i in 0..512u16 {
        if nr_of_pdo <= npdo {
            break;
        }
        let name = format!("{:04X}", comm_base + i);
        if store.contains(&name) {
            continue;
        }
        npdo += 1;

        let n = read_int(store, "OptionalObjects", "SupportedObjects");
        {
            let optional = store.ensure_section("OptionalObjects");
            optional.set("SupportedObjects", (n + 1).to_string());
            optional.set(&(n + 1).to_string(), format!("0x{}", name));
        }

        {
            let obj = store.ensure_section(&name);
            obj.set(
                "ParameterName",
                format!("{} communication parameter", pdo_kind),
            );
            obj.set("ObjectType", "0x09");
        }

        let mut sub_number = 1;
        let mut highest_sub = 0;

        if compact_pdo & 0x01 != 0 {
            sub_number += 1;
            highest_sub = 1;
            let sub = store.ensure_section(&format!("{}sub1", name));
            sub.set("ParameterName", format!("COB-ID used by {}", pdo_kind));
            sub.set("DataType", "0x0007");
            sub.set("AccessType", "rw");
            if i < 4 {
                sub.set(
                    "DefaultValue",
                    format!("$NODEID+0x{:X}", (i as u32 + 1) * 0x100 + cob_offset),
                );
            } else {
                sub.set("DefaultValue", "0x80000000");
            }
        }
        for entry in &COMPACT_SUBS {
            if compact_pdo & (1 << (entry.sub - 1)) != 0 {
                sub_number += 1;
                highest_sub = entry.sub;
                let name_for_sub = if tx && entry.sub == 4 {
                    "reserved"
                } else {
                    entry.name
                };
                let sub = store.ensure_section(&format!("{}sub{}", name, entry.sub));
                sub.set("ParameterName", name_for_sub);
                sub.set("DataType", entry.data_type);
                sub.set("AccessType", "rw");
            }
        }

        {
            let sub0 = store.ensure_section(&format!("{}sub0", name));
            sub0.set("ParameterName", "highest sub-index supported");
            sub0.set("DataType", "0x0005");
            sub0.set("AccessType", "const");
            sub0.set("DefaultValue", highest_sub.to_string());
        }
        store
            .ensure_section(&name)
            .set("SubNumber", sub_number.to_string());

        // Add the mapping parameters, if necessary.
        let map_name = format!("{:04X}", map_base + i);
        if !store.contains(&map_name) {
            let optional = store.ensure_section("OptionalObjects");
            optional.set("SupportedObjects", (n + 2).to_string());
            optional.set(&(n + 2).to_string(), format!("0x{}", map_name));

            let obj = store.ensure_section(&map_name);
            obj.set("ParameterName", format!("{} mapping parameter", pdo_kind));
            obj.set("ObjectType", "0x09");
            obj.set("DataType", "0x0007");
            obj.set("AccessType", "rw");
            obj.set("CompactSubObj", "0x40");
        }
    }
}
