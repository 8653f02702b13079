//! Log record types and their on-disk envelope.
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers every byte before it.

use crate::error::{StorageError, StorageResult};
use crate::types::TableId;

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"HLOG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Offset of the value bytes inside a `Put` payload, before the key bytes.
/// txid (8) + table (4) + key_len (4) + value_len (4)
const PUT_FIXED_PREFIX: usize = 20;

/// Type of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Start of a transaction frame.
    Begin = 1,
    /// Insert or overwrite a key.
    Put = 2,
    /// Remove a key.
    Delete = 3,
    /// Drop every key of a table.
    Truncate = 4,
    /// End of a committed transaction frame.
    Commit = 5,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Truncate),
            5 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Start of a transaction frame.
    Begin {
        /// Transaction id.
        txid: u64,
    },
    /// Insert or overwrite a key.
    Put {
        /// Transaction id.
        txid: u64,
        /// Target table.
        table: TableId,
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Transaction id.
        txid: u64,
        /// Target table.
        table: TableId,
        /// Key bytes.
        key: Vec<u8>,
    },
    /// Drop every key of a table.
    Truncate {
        /// Transaction id.
        txid: u64,
        /// Target table.
        table: TableId,
    },
    /// End of a committed transaction frame.
    Commit {
        /// Transaction id.
        txid: u64,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Begin { .. } => RecordType::Begin,
            Self::Put { .. } => RecordType::Put,
            Self::Delete { .. } => RecordType::Delete,
            Self::Truncate { .. } => RecordType::Truncate,
            Self::Commit { .. } => RecordType::Commit,
        }
    }

    /// Returns the transaction id of this record.
    #[must_use]
    pub fn txid(&self) -> u64 {
        match self {
            Self::Begin { txid }
            | Self::Put { txid, .. }
            | Self::Delete { txid, .. }
            | Self::Truncate { txid, .. }
            | Self::Commit { txid } => *txid,
        }
    }

    /// Appends the full record (envelope included) to `buf`.
    ///
    /// Returns the offset within `buf` at which the record starts.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> StorageResult<usize> {
        let start = buf.len();
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::invalid_operation("log record payload too large"))?;

        buf.extend_from_slice(&LOG_MAGIC);
        buf.extend_from_slice(&LOG_VERSION.to_le_bytes());
        buf.push(self.record_type().as_byte());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);

        let crc = compute_crc32(&buf[start..]);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(start)
    }

    /// Offset of the value bytes of a `Put` record, relative to the record start.
    #[must_use]
    pub(crate) fn put_value_offset(key_len: usize) -> usize {
        HEADER_SIZE + PUT_FIXED_PREFIX + key_len
    }

    fn encode_payload(&self) -> StorageResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Begin { txid } | Self::Commit { txid } => {
                buf.extend_from_slice(&txid.to_le_bytes());
            }
            Self::Put {
                txid,
                table,
                key,
                value,
            } => {
                buf.extend_from_slice(&txid.to_le_bytes());
                buf.extend_from_slice(&table.as_u32().to_le_bytes());
                buf.extend_from_slice(&len_u32(key.len())?.to_le_bytes());
                buf.extend_from_slice(&len_u32(value.len())?.to_le_bytes());
                buf.extend_from_slice(key);
                buf.extend_from_slice(value);
            }
            Self::Delete { txid, table, key } => {
                buf.extend_from_slice(&txid.to_le_bytes());
                buf.extend_from_slice(&table.as_u32().to_le_bytes());
                buf.extend_from_slice(&len_u32(key.len())?.to_le_bytes());
                buf.extend_from_slice(key);
            }
            Self::Truncate { txid, table } => {
                buf.extend_from_slice(&txid.to_le_bytes());
                buf.extend_from_slice(&table.as_u32().to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: RecordType, payload: &[u8]) -> StorageResult<Self> {
        let mut reader = PayloadReader { payload, pos: 0 };
        let record = match record_type {
            RecordType::Begin => Self::Begin {
                txid: reader.u64()?,
            },
            RecordType::Commit => Self::Commit {
                txid: reader.u64()?,
            },
            RecordType::Put => {
                let txid = reader.u64()?;
                let table = TableId::new(reader.u32()?);
                let key_len = reader.u32()? as usize;
                let value_len = reader.u32()? as usize;
                let key = reader.bytes(key_len)?;
                let value = reader.bytes(value_len)?;
                Self::Put {
                    txid,
                    table,
                    key,
                    value,
                }
            }
            RecordType::Delete => {
                let txid = reader.u64()?;
                let table = TableId::new(reader.u32()?);
                let key_len = reader.u32()? as usize;
                let key = reader.bytes(key_len)?;
                Self::Delete { txid, table, key }
            }
            RecordType::Truncate => Self::Truncate {
                txid: reader.u64()?,
                table: TableId::new(reader.u32()?),
            },
        };

        if reader.pos != payload.len() {
            return Err(StorageError::corrupted(format!(
                "trailing bytes in {:?} record: expected {} bytes, got {}",
                record_type,
                reader.pos,
                payload.len()
            )));
        }
        Ok(record)
    }
}

/// Outcome of decoding the record at a given position.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A complete, verified record and its total encoded length.
    Record(LogRecord, usize),
    /// The bytes end mid-record (torn write); treat as end of log.
    Truncated,
}

/// Decodes the record starting at `pos` in `data`.
///
/// A short header or payload yields [`Decoded::Truncated`]. Bad magic, an
/// unsupported version, an unknown type or a CRC mismatch are fatal.
pub(crate) fn decode_at(data: &[u8], pos: usize, segment: u64) -> StorageResult<Decoded> {
    let remaining = &data[pos..];
    if remaining.len() < HEADER_SIZE {
        return Ok(Decoded::Truncated);
    }

    if remaining[0..4] != LOG_MAGIC {
        return Err(StorageError::corrupted(format!(
            "bad magic in segment {segment} at offset {pos}"
        )));
    }

    let version = u16::from_le_bytes([remaining[4], remaining[5]]);
    if version != LOG_VERSION {
        return Err(StorageError::corrupted(format!(
            "unsupported log version {version} in segment {segment}"
        )));
    }

    let record_type = RecordType::from_byte(remaining[6]).ok_or_else(|| {
        StorageError::corrupted(format!(
            "unknown record type {} in segment {segment} at offset {pos}",
            remaining[6]
        ))
    })?;

    let payload_len =
        u32::from_le_bytes([remaining[7], remaining[8], remaining[9], remaining[10]]) as usize;
    let total = HEADER_SIZE + payload_len + CRC_SIZE;
    if remaining.len() < total {
        return Ok(Decoded::Truncated);
    }

    let body_end = HEADER_SIZE + payload_len;
    let expected = u32::from_le_bytes([
        remaining[body_end],
        remaining[body_end + 1],
        remaining[body_end + 2],
        remaining[body_end + 3],
    ]);
    let actual = compute_crc32(&remaining[..body_end]);
    if expected != actual {
        return Err(StorageError::ChecksumMismatch {
            segment,
            offset: pos as u64,
            expected,
            actual,
        });
    }

    let record = LogRecord::decode_payload(record_type, &remaining[HEADER_SIZE..body_end])?;
    Ok(Decoded::Record(record, total))
}

fn len_u32(len: usize) -> StorageResult<u32> {
    u32::try_from(len).map_err(|_| StorageError::invalid_operation("key or value exceeds 4 GiB"))
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl PayloadReader<'_> {
    fn take(&mut self, n: usize) -> StorageResult<&[u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.payload.len())
            .ok_or_else(|| StorageError::corrupted("unexpected end of payload"))?;
        let slice = &self.payload[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> StorageResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn u32(&mut self) -> StorageResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bytes(&mut self, n: usize) -> StorageResult<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(record: &LogRecord) -> Vec<u8> {
        let mut buf = Vec::new();
        record.encode_into(&mut buf).unwrap();
        buf
    }

    #[test]
    fn put_record_decodes() {
        let record = LogRecord::Put {
            txid: 9,
            table: TableId::new(3),
            key: b"role:12".to_vec(),
            value: vec![0xCA, 0xFE],
        };
        let buf = encode(&record);
        match decode_at(&buf, 0, 0).unwrap() {
            Decoded::Record(decoded, len) => {
                assert_eq!(decoded, record);
                assert_eq!(len, buf.len());
            }
            Decoded::Truncated => panic!("expected a record"),
        }
    }

    #[test]
    fn put_value_offset_points_at_value() {
        let key = b"k1".to_vec();
        let value = b"payload".to_vec();
        let buf = encode(&LogRecord::Put {
            txid: 1,
            table: TableId::new(1),
            key: key.clone(),
            value: value.clone(),
        });
        let off = LogRecord::put_value_offset(key.len());
        assert_eq!(&buf[off..off + value.len()], value.as_slice());
    }

    #[test]
    fn short_buffer_is_truncated() {
        let buf = encode(&LogRecord::Commit { txid: 4 });
        assert!(matches!(
            decode_at(&buf[..buf.len() - 1], 0, 0).unwrap(),
            Decoded::Truncated
        ));
        assert!(matches!(decode_at(&buf[..5], 0, 0).unwrap(), Decoded::Truncated));
    }

    #[test]
    fn flipped_bit_is_checksum_mismatch() {
        let mut buf = encode(&LogRecord::Delete {
            txid: 2,
            table: TableId::new(1),
            key: b"gone".to_vec(),
        });
        buf[HEADER_SIZE + 2] ^= 0x01;
        assert!(matches!(
            decode_at(&buf, 0, 7),
            Err(StorageError::ChecksumMismatch { segment: 7, .. })
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut buf = encode(&LogRecord::Begin { txid: 1 });
        buf[0] = b'X';
        assert!(matches!(
            decode_at(&buf, 0, 0),
            Err(StorageError::Corrupted { .. })
        ));
    }

    #[test]
    fn unknown_type_is_corruption() {
        let mut buf = encode(&LogRecord::Begin { txid: 1 });
        buf[6] = 99;
        assert!(decode_at(&buf, 0, 0).is_err());
    }

    #[test]
    fn trailing_payload_bytes_rejected() {
        let result = LogRecord::decode_payload(RecordType::Commit, &[0; 9]);
        assert!(matches!(result, Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn truncate_record_decodes() {
        let record = LogRecord::Truncate {
            txid: 5,
            table: TableId::new(8),
        };
        let buf = encode(&record);
        assert!(matches!(
            decode_at(&buf, 0, 0).unwrap(),
            Decoded::Record(r, _) if r == record
        ));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    proptest::proptest! {
        #[test]
        fn every_strict_prefix_reads_as_torn(
            key in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64),
            value in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..256),
            cut in 0usize..1024,
        ) {
            let buf = encode(&LogRecord::Put {
                txid: 11,
                table: TableId::new(2),
                key,
                value,
            });
            let cut = cut % buf.len();
            proptest::prop_assert!(matches!(
                decode_at(&buf[..cut], 0, 0),
                Ok(Decoded::Truncated)
            ));
        }
    }
}
