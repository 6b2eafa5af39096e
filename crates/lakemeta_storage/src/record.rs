//! Batch record framing for the log engine.
//!
//! ```text
//! | magic (4) | version (2) | body_len (4) | body (N) | crc32 (4) |
//!
//! body  = | op_count (4) | op ... |
//! op    = | tag (1) | key_len (4) | key | [ value_len (4) | value ] |
//! ```
//!
//! All integers are little-endian. The CRC covers header and body.

use crate::backend::BatchOp;
use crate::error::{StorageError, StorageResult};

/// Magic bytes identifying a batch record.
pub const BATCH_MAGIC: [u8; 4] = *b"LKVB";

/// Current batch record format version.
pub const BATCH_VERSION: u16 = 1;

/// magic (4) + version (2) + body_len (4)
pub(crate) const HEADER_SIZE: usize = 10;

/// CRC size.
pub(crate) const CRC_SIZE: usize = 4;

const TAG_PUT: u8 = 1;
const TAG_DELETE: u8 = 2;

/// Outcome of decoding the bytes at some offset of the log.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decoded {
    /// A complete, checksum-verified record and its encoded length.
    Record {
        /// The batch operations.
        ops: Vec<BatchOp>,
        /// Total encoded size including header and CRC.
        len: usize,
    },
    /// Not enough bytes for a complete record: a torn tail write.
    Truncated,
}

/// Encodes a batch into a framed record.
pub(crate) fn encode_batch(ops: &[BatchOp]) -> StorageResult<Vec<u8>> {
    let mut body = Vec::new();
    body.extend_from_slice(&len_u32(ops.len())?.to_le_bytes());

    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                body.push(TAG_PUT);
                body.extend_from_slice(&len_u32(key.len())?.to_le_bytes());
                body.extend_from_slice(key);
                body.extend_from_slice(&len_u32(value.len())?.to_le_bytes());
                body.extend_from_slice(value);
            }
            BatchOp::Delete { key } => {
                body.push(TAG_DELETE);
                body.extend_from_slice(&len_u32(key.len())?.to_le_bytes());
                body.extend_from_slice(key);
            }
        }
    }

    let mut data = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
    data.extend_from_slice(&BATCH_MAGIC);
    data.extend_from_slice(&BATCH_VERSION.to_le_bytes());
    data.extend_from_slice(&len_u32(body.len())?.to_le_bytes());
    data.extend_from_slice(&body);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());

    Ok(data)
}

/// Decodes the record starting at the beginning of `data`.
///
/// A short header or a body that extends past the end of `data` is a torn
/// tail and yields [`Decoded::Truncated`]. A bad magic, unknown version or
/// CRC mismatch in a complete record is corruption.
pub(crate) fn decode_batch(data: &[u8]) -> StorageResult<Decoded> {
    if data.len() < HEADER_SIZE {
        return Ok(Decoded::Truncated);
    }

    if data[0..4] != BATCH_MAGIC {
        return Err(StorageError::corrupted("invalid batch record magic"));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != BATCH_VERSION {
        return Err(StorageError::corrupted(format!(
            "unsupported batch record version {version}"
        )));
    }

    let body_len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let total = HEADER_SIZE + body_len + CRC_SIZE;
    if data.len() < total {
        return Ok(Decoded::Truncated);
    }

    let crc_offset = HEADER_SIZE + body_len;
    let stored_crc = u32::from_le_bytes([
        data[crc_offset],
        data[crc_offset + 1],
        data[crc_offset + 2],
        data[crc_offset + 3],
    ]);
    let computed_crc = compute_crc32(&data[..crc_offset]);
    if stored_crc != computed_crc {
        return Err(StorageError::corrupted(format!(
            "checksum mismatch: expected {stored_crc:08x}, got {computed_crc:08x}"
        )));
    }

    let ops = decode_body(&data[HEADER_SIZE..crc_offset])?;
    Ok(Decoded::Record { ops, len: total })
}

fn decode_body(body: &[u8]) -> StorageResult<Vec<BatchOp>> {
    let mut cursor = 0usize;

    let read_u32 = |cursor: &mut usize| -> StorageResult<u32> {
        let bytes: [u8; 4] = body
            .get(*cursor..*cursor + 4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| StorageError::corrupted("unexpected end of batch body"))?;
        *cursor += 4;
        Ok(u32::from_le_bytes(bytes))
    };

    let read_bytes = |cursor: &mut usize, len: usize| -> StorageResult<Vec<u8>> {
        let bytes = body
            .get(*cursor..*cursor + len)
            .ok_or_else(|| StorageError::corrupted("unexpected end of batch body"))?
            .to_vec();
        *cursor += len;
        Ok(bytes)
    };

    let count = read_u32(&mut cursor)? as usize;
    let mut ops = Vec::with_capacity(count.min(1024));

    for _ in 0..count {
        let tag = *body
            .get(cursor)
            .ok_or_else(|| StorageError::corrupted("unexpected end of batch body"))?;
        cursor += 1;

        let key_len = read_u32(&mut cursor)? as usize;
        let key = read_bytes(&mut cursor, key_len)?;

        match tag {
            TAG_PUT => {
                let value_len = read_u32(&mut cursor)? as usize;
                let value = read_bytes(&mut cursor, value_len)?;
                ops.push(BatchOp::Put { key, value });
            }
            TAG_DELETE => ops.push(BatchOp::Delete { key }),
            other => {
                return Err(StorageError::corrupted(format!(
                    "unknown batch op tag {other}"
                )))
            }
        }
    }

    if cursor != body.len() {
        return Err(StorageError::corrupted("trailing bytes in batch body"));
    }

    Ok(ops)
}

fn len_u32(len: usize) -> StorageResult<u32> {
    u32::try_from(len)
        .map_err(|_| StorageError::InvalidOptions(format!("batch element too large: {len} bytes")))
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
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
