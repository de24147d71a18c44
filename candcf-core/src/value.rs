//! Typed DCF values with deferred `$NODEID` resolution
//!
//! A DCF value literal is validated when the [Value] is constructed, but the
//! `$NODEID` offset cannot be applied until the node-ID is known -- a slave
//! configured by a master gets its node-ID from the network config, not from
//! the file. [Value::resolve] applies the environment and yields the final
//! [TypedValue].

use regex::Regex;
use snafu::Snafu;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::data_type::DataType;

/// Variable environment for value resolution, e.g. `{"NODEID": 5}`
pub type Env = HashMap<String, u8>;

/// Error produced when parsing or resolving a value
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ValueError {
    #[snafu(display("invalid value for {type_name}: '{literal}'"))]
    InvalidLiteral { type_name: String, literal: String },
    #[snafu(display("invalid integer: '{literal}'"))]
    InvalidInteger { literal: String },
    #[snafu(display("${variable} not defined"))]
    UndefinedVariable { variable: String },
    #[snafu(display("data type 0x{index:04X} has no concise encoding"))]
    NotPackable { index: u16 },
    #[snafu(display("{type_name} cannot encode {value:?}"))]
    TypeMismatch {
        type_name: String,
        value: TypedValue,
    },
}

/// A fully resolved runtime value
#[derive(Clone, Debug, PartialEq)]
pub enum TypedValue {
    /// All integer types, including BOOLEAN; i128 holds the full
    /// INTEGER64/UNSIGNED64 range
    Integer(i128),
    /// REAL32 / REAL64
    Real(f64),
    /// VISIBLE_STRING / UNICODE_STRING
    Str(String),
    /// OCTET_STRING / DOMAIN
    Bytes(Vec<u8>),
    /// TIME_OF_DAY / TIME_DIFF and custom time types: a list of integer
    /// fields, e.g. `[days, ms]`
    Ticks(Vec<i64>),
}

impl TypedValue {
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            TypedValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

/// Parse an integer literal with a base prefix (`0x`/`0X` hex, `0b` binary,
/// `0o` octal, otherwise decimal), allowing a leading sign
pub fn parse_int(literal: &str) -> Result<i128, ValueError> {
    let s = literal.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or(digits.strip_prefix("0X")) {
        i128::from_str_radix(hex, 16)
    } else if let Some(bin) = digits.strip_prefix("0b").or(digits.strip_prefix("0B")) {
        i128::from_str_radix(bin, 2)
    } else if let Some(oct) = digits.strip_prefix("0o").or(digits.strip_prefix("0O")) {
        i128::from_str_radix(oct, 8)
    } else {
        digits.parse::<i128>()
    }
    .map_err(|_| ValueError::InvalidInteger {
        literal: literal.to_string(),
    })?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// The `$NODEID+<int>` grammar shared by values and limits
pub(crate) fn value_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\$(?P<variable>NODEID)\s*\+\s*)?(?P<value>-?0x[0-9A-F]+|-?[0-9]+)\s*$")
            .unwrap()
    })
}

/// Split a basic-type literal into its numeric part and `$NODEID` marker
///
/// A standalone `$NODEID` is accepted as offset 0.
pub(crate) fn split_nodeid(literal: &str) -> Result<(i128, bool), ValueError> {
    if literal.trim().eq_ignore_ascii_case("$NODEID") {
        return Ok((0, true));
    }
    let caps = value_regex()
        .captures(literal)
        .ok_or(ValueError::InvalidInteger {
            literal: literal.to_string(),
        })?;
    let value = parse_int(caps.name("value").unwrap().as_str())?;
    Ok((value, caps.name("variable").is_some()))
}

/// A lazily resolved DCF value
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    data_type: DataType,
    raw: String,
    base: TypedValue,
    nodeid: bool,
}

impl Value {
    /// Parse a literal for the given data type
    pub fn new(data_type: DataType, literal: &str) -> Result<Self, ValueError> {
        let (base, nodeid) = parse_literal(data_type, literal)?;
        Ok(Self {
            data_type,
            raw: literal.to_string(),
            base,
            nodeid,
        })
    }

    /// The default value of a data type, used when a DCF leaves one out
    pub fn empty(data_type: DataType) -> Self {
        let base = if data_type == DataType::REAL32 || data_type == DataType::REAL64 {
            TypedValue::Real(0.0)
        } else if data_type == DataType::VISIBLE_STRING || data_type == DataType::UNICODE_STRING {
            TypedValue::Str(String::new())
        } else if data_type == DataType::OCTET_STRING || data_type == DataType::DOMAIN {
            TypedValue::Bytes(Vec::new())
        } else if data_type == DataType::TIME_OF_DAY || data_type == DataType::TIME_DIFF {
            TypedValue::Ticks(vec![0, 0])
        } else {
            TypedValue::Integer(0)
        };
        Self {
            data_type,
            raw: String::new(),
            base,
            nodeid: false,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The literal as it appeared in the file
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// True if the literal carried the `$NODEID` marker
    pub fn has_nodeid(&self) -> bool {
        self.nodeid
    }

    /// Apply the environment and produce the runtime value
    ///
    /// Fails if the literal used `$NODEID` and the environment does not
    /// define it.
    pub fn resolve(&self, env: &Env) -> Result<TypedValue, ValueError> {
        if !self.nodeid {
            return Ok(self.base.clone());
        }
        let offset = env
            .get("NODEID")
            .copied()
            .ok_or(ValueError::UndefinedVariable {
                variable: "NODEID".to_string(),
            })?;
        match &self.base {
            TypedValue::Integer(v) => Ok(TypedValue::Integer(v + offset as i128)),
            // The marker is only legal on integer literals
            other => Ok(other.clone()),
        }
    }

    /// Resolve to an integer, for the common case of basic-typed entries
    pub fn resolve_int(&self, env: &Env) -> Result<i128, ValueError> {
        match self.resolve(env)? {
            TypedValue::Integer(v) => Ok(v),
            other => TypeMismatchSnafu {
                type_name: self.data_type.name(),
                value: other,
            }
            .fail(),
        }
    }
}

fn parse_literal(data_type: DataType, literal: &str) -> Result<(TypedValue, bool), ValueError> {
    if let Some(parser) = data_type.custom_parser() {
        return parser(literal).map(|v| (v, false));
    }
    match data_type {
        DataType::REAL32 => {
            let bits = parse_int(literal)? as u32;
            Ok((TypedValue::Real(f32::from_bits(bits) as f64), false))
        }
        DataType::REAL64 => {
            let bits = parse_int(literal)? as u64;
            Ok((TypedValue::Real(f64::from_bits(bits)), false))
        }
        DataType::VISIBLE_STRING | DataType::UNICODE_STRING => Ok((
            TypedValue::Str(unescape_string(data_type, literal)?),
            false,
        )),
        DataType::OCTET_STRING | DataType::DOMAIN => {
            Ok((TypedValue::Bytes(parse_hex_bytes(data_type, literal)?), false))
        }
        DataType::TIME_OF_DAY | DataType::TIME_DIFF => {
            Ok((TypedValue::Ticks(parse_ticks(literal, 2)?), false))
        }
        // Everything else, including unrecognized DEFTYPE indices, follows
        // the integer grammar
        _ => {
            let (value, nodeid) = split_nodeid(literal)?;
            Ok((TypedValue::Integer(value), nodeid))
        }
    }
}

/// Parse `days ms` style literals: `n` whitespace-separated base-aware
/// integers; an empty literal reads as all zeros
pub fn parse_ticks(literal: &str, n: usize) -> Result<Vec<i64>, ValueError> {
    if literal.trim().is_empty() {
        return Ok(vec![0; n]);
    }
    let fields: Vec<&str> = literal.split_whitespace().collect();
    if fields.len() != n {
        return InvalidLiteralSnafu {
            type_name: "time",
            literal,
        }
        .fail();
    }
    fields
        .iter()
        .map(|f| parse_int(f).map(|v| v as i64))
        .collect()
}

fn parse_hex_bytes(data_type: DataType, literal: &str) -> Result<Vec<u8>, ValueError> {
    let digits: String = literal.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return InvalidLiteralSnafu {
            type_name: data_type.name(),
            literal,
        }
        .fail();
    }
    Ok(digits
        .as_bytes()
        .chunks(2)
        // Unwrap safety: chunks are two validated hex digits
        .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
        .collect())
}

fn unescape_string(data_type: DataType, literal: &str) -> Result<String, ValueError> {
    let trimmed = literal.trim();
    let inner = match trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => inner,
        // Unquoted string values are taken verbatim
        None => return Ok(trimmed.to_string()),
    };

    let bad_escape = || {
        InvalidLiteralSnafu {
            type_name: data_type.name(),
            literal,
        }
        .fail()
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) => out.push(byte as char),
                    Err(_) => return bad_escape(),
                }
            }
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                {
                    Some(ch) => out.push(ch),
                    None => return bad_escape(),
                }
            }
            _ => return bad_escape(),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;

    fn env(node_id: u8) -> Env {
        Env::from([("NODEID".to_string(), node_id)])
    }

    #[test]
    fn test_nodeid_offset() {
        let value = Value::new(DataType::UNSIGNED32, "$NODEID+0x10").unwrap();
        assert!(value.has_nodeid());
        assert_eq!(value.resolve_int(&env(0x20)).unwrap(), 0x30);
    }

    #[test]
    fn test_nodeid_requires_environment() {
        let value = Value::new(DataType::UNSIGNED32, "$NODEID+0x10").unwrap();
        let err = value.resolve(&Env::new()).unwrap_err();
        assert!(matches!(err, ValueError::UndefinedVariable { .. }));
    }

    #[test]
    fn test_standalone_nodeid() {
        let value = Value::new(DataType::UNSIGNED8, "$NODEID").unwrap();
        assert_eq!(value.resolve_int(&env(7)).unwrap(), 7);
    }

    #[test]
    fn test_plain_values_ignore_environment() {
        let value = Value::new(DataType::INTEGER16, "-0x10").unwrap();
        assert!(!value.has_nodeid());
        assert_eq!(value.resolve_int(&Env::new()).unwrap(), -16);
    }

    #[test]
    fn test_invalid_basic_literal_is_rejected_eagerly() {
        assert!(Value::new(DataType::UNSIGNED8, "ten").is_err());
        assert!(Value::new(DataType::UNSIGNED8, "$SPEED+1").is_err());
    }

    #[test]
    fn test_real32_bit_pattern() {
        let value = Value::new(DataType::REAL32, "0x3F800000").unwrap();
        assert_eq!(value.resolve(&Env::new()).unwrap(), TypedValue::Real(1.0));
    }

    #[test]
    fn test_visible_string_escapes() {
        let value = Value::new(DataType::VISIBLE_STRING, r#""a\tb\x21A\"""#).unwrap();
        assert_eq!(
            value.resolve(&Env::new()).unwrap(),
            TypedValue::Str("a\tb!A\"".to_string())
        );
    }

    #[test]
    fn test_octet_string_hex_pairs() {
        let value = Value::new(DataType::OCTET_STRING, "de ad BE ef").unwrap();
        assert_eq!(
            value.resolve(&Env::new()).unwrap(),
            TypedValue::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF])
        );
        assert!(Value::new(DataType::OCTET_STRING, "abc").is_err());
    }

    #[test]
    fn test_time_of_day() {
        let value = Value::new(DataType::TIME_OF_DAY, "10 0x20").unwrap();
        assert_eq!(
            value.resolve(&Env::new()).unwrap(),
            TypedValue::Ticks(vec![10, 32])
        );
        let empty = Value::new(DataType::TIME_OF_DAY, "").unwrap();
        assert_eq!(
            empty.resolve(&Env::new()).unwrap(),
            TypedValue::Ticks(vec![0, 0])
        );
    }
}
