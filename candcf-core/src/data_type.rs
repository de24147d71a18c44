//! CiA 301 data types and their concise-SDO packing rules
//!
//! Data types are identified by their 16-bit object dictionary index. The
//! standard types are built in; applications may register additional DEFTYPE
//! indices (e.g. the ECSS SCET/SUTC time types) before building a device.

use snafu::Snafu;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::value::{NotPackableSnafu, TypeMismatchSnafu, TypedValue, ValueError};

/// Parser for literals of a custom data type
pub type ValueParser = fn(&str) -> Result<TypedValue, ValueError>;

#[derive(Clone)]
struct CustomType {
    name: String,
    parser: ValueParser,
}

fn custom_types() -> &'static RwLock<HashMap<u16, CustomType>> {
    static REGISTRY: OnceLock<RwLock<HashMap<u16, CustomType>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Error returned when registering a custom data type fails
#[derive(Debug, Snafu)]
#[snafu(display("data type 0x{index:04X} is already defined"))]
pub struct DuplicateDataTypeError {
    pub index: u16,
}

/// A CANopen data type, identified by its object dictionary index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataType(pub u16);

impl DataType {
    pub const BOOLEAN: DataType = DataType(0x0001);
    pub const INTEGER8: DataType = DataType(0x0002);
    pub const INTEGER16: DataType = DataType(0x0003);
    pub const INTEGER32: DataType = DataType(0x0004);
    pub const UNSIGNED8: DataType = DataType(0x0005);
    pub const UNSIGNED16: DataType = DataType(0x0006);
    pub const UNSIGNED32: DataType = DataType(0x0007);
    pub const REAL32: DataType = DataType(0x0008);
    pub const VISIBLE_STRING: DataType = DataType(0x0009);
    pub const OCTET_STRING: DataType = DataType(0x000A);
    pub const UNICODE_STRING: DataType = DataType(0x000B);
    pub const TIME_OF_DAY: DataType = DataType(0x000C);
    pub const TIME_DIFF: DataType = DataType(0x000D);
    pub const DOMAIN: DataType = DataType(0x000F);
    pub const INTEGER24: DataType = DataType(0x0010);
    pub const REAL64: DataType = DataType(0x0011);
    pub const INTEGER40: DataType = DataType(0x0012);
    pub const INTEGER48: DataType = DataType(0x0013);
    pub const INTEGER56: DataType = DataType(0x0014);
    pub const INTEGER64: DataType = DataType(0x0015);
    pub const UNSIGNED24: DataType = DataType(0x0016);
    pub const UNSIGNED40: DataType = DataType(0x0018);
    pub const UNSIGNED48: DataType = DataType(0x0019);
    pub const UNSIGNED56: DataType = DataType(0x001A);
    pub const UNSIGNED64: DataType = DataType(0x001B);

    /// Register a custom DEFTYPE index with a literal parser
    ///
    /// The registry is process wide; populate it before constructing devices.
    /// Registering an index that is already defined (built in or custom) is
    /// an error.
    pub fn add_custom(
        index: u16,
        name: &str,
        parser: ValueParser,
    ) -> Result<(), DuplicateDataTypeError> {
        if DataType(index).builtin_name().is_some() {
            return Err(DuplicateDataTypeError { index });
        }
        // Unwrap safety: the registry lock is never poisoned by a panic while
        // held
        let mut registry = custom_types().write().unwrap();
        if registry.contains_key(&index) {
            return Err(DuplicateDataTypeError { index });
        }
        registry.insert(
            index,
            CustomType {
                name: name.to_string(),
                parser,
            },
        );
        Ok(())
    }

    pub(crate) fn custom_parser(self) -> Option<ValueParser> {
        custom_types()
            .read()
            .unwrap()
            .get(&self.0)
            .map(|t| t.parser)
    }

    pub fn index(self) -> u16 {
        self.0
    }

    fn builtin_name(self) -> Option<&'static str> {
        Some(match self {
            Self::BOOLEAN => "BOOLEAN",
            Self::INTEGER8 => "INTEGER8",
            Self::INTEGER16 => "INTEGER16",
            Self::INTEGER32 => "INTEGER32",
            Self::UNSIGNED8 => "UNSIGNED8",
            Self::UNSIGNED16 => "UNSIGNED16",
            Self::UNSIGNED32 => "UNSIGNED32",
            Self::REAL32 => "REAL32",
            Self::VISIBLE_STRING => "VISIBLE_STRING",
            Self::OCTET_STRING => "OCTET_STRING",
            Self::UNICODE_STRING => "UNICODE_STRING",
            Self::TIME_OF_DAY => "TIME_OF_DAY",
            Self::TIME_DIFF => "TIME_DIFF",
            Self::DOMAIN => "DOMAIN",
            Self::INTEGER24 => "INTEGER24",
            Self::REAL64 => "REAL64",
            Self::INTEGER40 => "INTEGER40",
            Self::INTEGER48 => "INTEGER48",
            Self::INTEGER56 => "INTEGER56",
            Self::INTEGER64 => "INTEGER64",
            Self::UNSIGNED24 => "UNSIGNED24",
            Self::UNSIGNED40 => "UNSIGNED40",
            Self::UNSIGNED48 => "UNSIGNED48",
            Self::UNSIGNED56 => "UNSIGNED56",
            Self::UNSIGNED64 => "UNSIGNED64",
            _ => return None,
        })
    }

    /// Display name, e.g. `UNSIGNED16`; unknown indices print as hex
    pub fn name(self) -> String {
        if let Some(name) = self.builtin_name() {
            return name.to_string();
        }
        if let Some(custom) = custom_types().read().unwrap().get(&self.0) {
            return custom.name.clone();
        }
        format!("0x{:04X}", self.0)
    }

    /// Bit width of a basic (packable numeric) type
    pub fn bits(self) -> Option<u32> {
        Some(match self {
            Self::BOOLEAN => 1,
            Self::INTEGER8 | Self::UNSIGNED8 => 8,
            Self::INTEGER16 | Self::UNSIGNED16 => 16,
            Self::INTEGER24 | Self::UNSIGNED24 => 24,
            Self::INTEGER32 | Self::UNSIGNED32 | Self::REAL32 => 32,
            Self::INTEGER40 | Self::UNSIGNED40 => 40,
            Self::INTEGER48 | Self::UNSIGNED48 => 48,
            Self::INTEGER56 | Self::UNSIGNED56 => 56,
            Self::INTEGER64 | Self::UNSIGNED64 | Self::REAL64 => 64,
            _ => return None,
        })
    }

    /// True for the packable numeric types
    pub fn is_basic(self) -> bool {
        self.bits().is_some()
    }

    /// True for the types stored as byte/character arrays
    pub fn is_array(self) -> bool {
        matches!(
            self,
            Self::VISIBLE_STRING | Self::OCTET_STRING | Self::UNICODE_STRING | Self::DOMAIN
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Self::INTEGER8
                | Self::INTEGER16
                | Self::INTEGER24
                | Self::INTEGER32
                | Self::INTEGER40
                | Self::INTEGER48
                | Self::INTEGER56
                | Self::INTEGER64
        )
    }

    /// Smallest representable value of a basic integer type (floats report
    /// their negative extreme via [DataType::float_limits])
    pub fn min(self) -> Option<i128> {
        let bits = self.bits()?;
        Some(match self {
            Self::REAL32 | Self::REAL64 => return None,
            _ if self.is_signed() => -(1i128 << (bits - 1)),
            _ => 0,
        })
    }

    /// Largest representable value of a basic integer type
    pub fn max(self) -> Option<i128> {
        let bits = self.bits()?;
        Some(match self {
            Self::REAL32 | Self::REAL64 => return None,
            Self::BOOLEAN => 1,
            _ if self.is_signed() => (1i128 << (bits - 1)) - 1,
            _ => (1i128 << bits) - 1,
        })
    }

    /// (min, max) of the REAL32/REAL64 types
    pub fn float_limits(self) -> Option<(f64, f64)> {
        match self {
            Self::REAL32 => Some((-f32::MAX as f64, f32::MAX as f64)),
            Self::REAL64 => Some((f64::MIN, f64::MAX)),
            _ => None,
        }
    }

    /// Encode one concise-SDO record: u16-LE index, u8 sub-index, u32-LE byte
    /// length, then the value in its native width, little-endian
    ///
    /// Only basic types are packable. 24/40/48/56-bit values are serialized
    /// in their declared width, not their storage container.
    pub fn concise_value(
        self,
        index: u16,
        sub_index: u8,
        value: &TypedValue,
    ) -> Result<Vec<u8>, ValueError> {
        let bits = self
            .bits()
            .ok_or_else(|| NotPackableSnafu { index: self.0 }.build())?;
        let n = bits.div_ceil(8) as usize;

        let mut out = Vec::with_capacity(7 + n);
        out.extend_from_slice(&index.to_le_bytes());
        out.push(sub_index);
        out.extend_from_slice(&(n as u32).to_le_bytes());

        match (self, value) {
            (Self::REAL32, TypedValue::Real(v)) => {
                out.extend_from_slice(&(*v as f32).to_le_bytes())
            }
            (Self::REAL32, TypedValue::Integer(v)) => {
                out.extend_from_slice(&(*v as f32).to_le_bytes())
            }
            (Self::REAL64, TypedValue::Real(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (Self::REAL64, TypedValue::Integer(v)) => {
                out.extend_from_slice(&(*v as f64).to_le_bytes())
            }
            (_, TypedValue::Integer(v)) => out.extend_from_slice(&v.to_le_bytes()[..n]),
            (_, other) => {
                return TypeMismatchSnafu {
                    type_name: self.name(),
                    value: other.clone(),
                }
                .fail()
            }
        }
        Ok(out)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{parse_ticks, Value};

    #[test]
    fn test_concise_value_unsigned16() {
        let bytes = DataType::UNSIGNED16
            .concise_value(0x1017, 0, &TypedValue::Integer(500))
            .unwrap();
        assert_eq!(
            bytes,
            vec![0x17, 0x10, 0x00, 0x02, 0x00, 0x00, 0x00, 0xF4, 0x01]
        );
    }

    #[test]
    fn test_concise_value_widths() {
        for (dt, value, len) in [
            (DataType::BOOLEAN, 1, 1),
            (DataType::UNSIGNED24, 0xABCDEF, 3),
            (DataType::INTEGER40, -2, 5),
            (DataType::UNSIGNED64, u64::MAX as i128, 8),
        ] {
            let bytes = dt
                .concise_value(0x2000, 1, &TypedValue::Integer(value))
                .unwrap();
            assert_eq!(bytes.len(), 7 + len, "{}", dt);
            assert_eq!(u32::from_le_bytes(bytes[3..7].try_into().unwrap()), len as u32);
        }
    }

    #[test]
    fn test_signed_truncation() {
        // -2 as 24-bit two's complement
        let bytes = DataType::INTEGER24
            .concise_value(0x2000, 0, &TypedValue::Integer(-2))
            .unwrap();
        assert_eq!(&bytes[7..], &[0xFE, 0xFF, 0xFF]);
    }

    #[test]
    fn test_real32_payload() {
        let bytes = DataType::REAL32
            .concise_value(0x2000, 0, &TypedValue::Real(1.0))
            .unwrap();
        assert_eq!(&bytes[7..], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_strings_are_not_packable() {
        let err = DataType::VISIBLE_STRING
            .concise_value(0x1008, 0, &TypedValue::Str("x".into()))
            .unwrap_err();
        assert!(matches!(err, ValueError::NotPackable { index: 0x0009 }));
    }

    #[test]
    fn test_round_trip_extremes() {
        for dt in [
            DataType::INTEGER8,
            DataType::INTEGER16,
            DataType::INTEGER32,
            DataType::INTEGER64,
            DataType::UNSIGNED8,
            DataType::UNSIGNED32,
            DataType::UNSIGNED56,
        ] {
            for value in [dt.min().unwrap(), 0, dt.max().unwrap()] {
                let bytes = dt
                    .concise_value(0x2000, 3, &TypedValue::Integer(value))
                    .unwrap();
                let n = bytes.len() - 7;
                let mut buf = [0u8; 16];
                buf[..n].copy_from_slice(&bytes[7..]);
                // Sign-extend the declared width back into an i128
                let raw = i128::from_le_bytes(buf);
                let shift = 128 - 8 * n as u32;
                let decoded = if dt.is_signed() {
                    (raw << shift) >> shift
                } else {
                    raw
                };
                assert_eq!(decoded, value, "{} {}", dt, value);
            }
        }
    }

    #[test]
    fn test_type_ranges() {
        assert_eq!(DataType::UNSIGNED64.max(), Some(u64::MAX as i128));
        assert_eq!(DataType::INTEGER24.min(), Some(-0x800000));
        assert_eq!(DataType::INTEGER24.max(), Some(0x7FFFFF));
        assert_eq!(DataType::BOOLEAN.max(), Some(1));
        assert!(DataType::VISIBLE_STRING.min().is_none());
    }

    #[test]
    fn test_add_custom_type() {
        fn parse_scet(literal: &str) -> Result<TypedValue, ValueError> {
            parse_ticks(literal, 2).map(TypedValue::Ticks)
        }

        DataType::add_custom(0x00C0, "TIME_SCET", parse_scet).unwrap();
        assert_eq!(DataType(0x00C0).name(), "TIME_SCET");
        let value = Value::new(DataType(0x00C0), "5 100").unwrap();
        assert_eq!(
            value.resolve(&Default::default()).unwrap(),
            TypedValue::Ticks(vec![5, 100])
        );

        // The registry is write-once per index
        assert!(DataType::add_custom(0x00C0, "TIME_SCET", parse_scet).is_err());
        assert!(DataType::add_custom(0x0007, "CLASH", parse_scet).is_err());
    }
}
