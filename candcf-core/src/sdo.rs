//! Concise-SDO record streams
//!
//! A concise DCF is a flat binary script of SDO downloads. Each record is a
//! 7-byte header (u16-LE index, u8 sub-index, u32-LE payload length) followed
//! by the little-endian payload. A stream file starts with a u32-LE record
//! count. Records are produced by [crate::data_type::DataType::concise_value]
//! and consumed by a master during slave boot-up.

use snafu::Snafu;
use std::io::{self, Read, Write};

/// Error returned when decoding a concise-SDO stream
#[derive(Debug, Snafu)]
pub enum SdoError {
    #[snafu(display("IO error: {source}"))]
    Io { source: io::Error },
    #[snafu(display("truncated concise-SDO record"))]
    Truncated,
}

impl From<io::Error> for SdoError {
    fn from(source: io::Error) -> Self {
        SdoError::Io { source }
    }
}

/// A decoded concise-SDO record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdoRecord {
    pub index: u16,
    pub sub_index: u8,
    pub data: Vec<u8>,
}

/// Split an encoded record into its header fields and payload
///
/// Returns `None` when the slice is shorter than its header declares.
pub fn decode_record(record: &[u8]) -> Option<SdoRecord> {
    if record.len() < 7 {
        return None;
    }
    // Unwrap safety: lengths checked above
    let index = u16::from_le_bytes(record[0..2].try_into().unwrap());
    let sub_index = record[2];
    let len = u32::from_le_bytes(record[3..7].try_into().unwrap()) as usize;
    if record.len() < 7 + len {
        return None;
    }
    Some(SdoRecord {
        index,
        sub_index,
        data: record[7..7 + len].to_vec(),
    })
}

/// Human readable form of one record, used for verbose output
pub fn format_record(name: &str, record: &[u8]) -> String {
    match decode_record(record) {
        Some(rec) => {
            let bytes = rec
                .data
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" ");
            format!(
                "{}: writing {} bytes to 0x{:04X}/{}: {}",
                name,
                rec.data.len(),
                rec.index,
                rec.sub_index,
                bytes
            )
        }
        None => format!("{}: malformed record", name),
    }
}

/// Write a concise-SDO stream: u32-LE record count, then the records
pub fn write_bin<W: Write>(writer: &mut W, records: &[Vec<u8>]) -> io::Result<()> {
    writer.write_all(&(records.len() as u32).to_le_bytes())?;
    for record in records {
        writer.write_all(record)?;
    }
    Ok(())
}

/// Read back a concise-SDO stream written by [write_bin]
pub fn read_bin<R: Read>(reader: &mut R) -> Result<Vec<SdoRecord>, SdoError> {
    let mut count_buf = [0u8; 4];
    reader.read_exact(&mut count_buf)?;
    let count = u32::from_le_bytes(count_buf);

    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut header = [0u8; 7];
        reader.read_exact(&mut header)?;
        let len = u32::from_le_bytes(header[3..7].try_into().unwrap()) as usize;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        records.push(SdoRecord {
            index: u16::from_le_bytes(header[0..2].try_into().unwrap()),
            sub_index: header[2],
            data,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::value::TypedValue;
    use assertables::assert_contains;

    #[test]
    fn test_stream_round_trip() {
        let records = vec![
            DataType::UNSIGNED16
                .concise_value(0x1017, 0, &TypedValue::Integer(500))
                .unwrap(),
            DataType::UNSIGNED32
                .concise_value(0x1400, 1, &TypedValue::Integer(0x80000200))
                .unwrap(),
        ];
        let mut buf = Vec::new();
        write_bin(&mut buf, &records).unwrap();

        assert_eq!(&buf[0..4], &2u32.to_le_bytes());
        let decoded = read_bin(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].index, 0x1017);
        assert_eq!(decoded[0].data, vec![0xF4, 0x01]);
        assert_eq!(decoded[1].sub_index, 1);
        assert_eq!(decoded[1].data, vec![0x00, 0x02, 0x00, 0x80]);
    }

    #[test]
    fn test_format_record() {
        let record = DataType::UNSIGNED16
            .concise_value(0x1017, 0, &TypedValue::Integer(500))
            .unwrap();
        let line = format_record("drive", &record);
        assert_contains!(line, "drive: writing 2 bytes to 0x1017/0");
        assert_contains!(line, "F4 01");
    }

    #[test]
    fn test_decode_record_rejects_truncation() {
        let mut record = DataType::UNSIGNED32
            .concise_value(0x1000, 0, &TypedValue::Integer(1))
            .unwrap();
        record.pop();
        assert!(decode_record(&record).is_none());
    }
}
