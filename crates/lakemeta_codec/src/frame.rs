//! Frame encoding and decoding.
//!
//! ```text
//! | magic "LM" (2) | frame version (1) | format (1) | body (N) |
//! ```

use crate::error::{CodecError, CodecResult};
use crate::format::Format;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes at the start of every frame.
pub const FRAME_MAGIC: [u8; 2] = *b"LM";

/// Current frame version.
pub const FRAME_VERSION: u8 = 1;

/// Size of the frame header.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Encodes `value` as a frame whose body uses `format`.
///
/// # Errors
///
/// Returns `EncodingFailed` if the value cannot be represented in the
/// chosen format.
pub fn encode<T>(format: Format, value: &T) -> CodecResult<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&FRAME_MAGIC);
    out.push(FRAME_VERSION);
    out.push(format.code());

    match format {
        Format::Cbor => ciborium::ser::into_writer(value, &mut out)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?,
        Format::Json => serde_json::to_writer(&mut out, value)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?,
    }

    Ok(out)
}

/// Decodes a frame, dispatching on the format recorded in its header.
///
/// # Errors
///
/// Returns an error if the header is missing or unknown, the body does not
/// decode as `T`, or bytes remain after the body.
pub fn decode<T>(bytes: &[u8]) -> CodecResult<T>
where
    T: DeserializeOwned,
{
    let format = peek_format(bytes)?;
    let body = &bytes[FRAME_HEADER_SIZE..];

    match format {
        Format::Cbor => {
            let mut reader = body;
            let value = ciborium::de::from_reader(&mut reader)
                .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
            if !reader.is_empty() {
                return Err(CodecError::TrailingBytes {
                    count: reader.len(),
                });
            }
            Ok(value)
        }
        Format::Json => {
            let mut de = serde_json::Deserializer::from_slice(body);
            let value: T = serde::Deserialize::deserialize(&mut de)
                .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
            de.end().map_err(|_| CodecError::TrailingBytes {
                count: body.len().saturating_sub(de_offset(body)),
            })?;
            Ok(value)
        }
    }
}

/// Returns the body format of a frame without decoding the body.
///
/// # Errors
///
/// Returns an error if the header is truncated, has the wrong magic, or
/// names an unknown version or format.
pub fn peek_format(bytes: &[u8]) -> CodecResult<Format> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(CodecError::invalid_frame(format!(
            "frame too short: {} bytes",
            bytes.len()
        )));
    }
    if bytes[0..2] != FRAME_MAGIC {
        return Err(CodecError::invalid_frame("bad magic"));
    }
    if bytes[2] != FRAME_VERSION {
        return Err(CodecError::UnsupportedVersion { version: bytes[2] });
    }
    Format::from_code(bytes[3])
}

/// Offset just past the first JSON value, ignoring trailing whitespace.
fn de_offset(body: &[u8]) -> usize {
    let mut stream = serde_json::Deserializer::from_slice(body).into_iter::<serde_json::Value>();
    match stream.next() {
        Some(Ok(_)) => stream.byte_offset(),
        _ => body.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        size: u64,
        #[serde(default)]
        tags: BTreeMap<String, String>,
        #[serde(default)]
        note: Option<String>,
    }

    #[derive(Debug, Serialize)]
    struct OldRecord {
        name: String,
        size: u64,
    }

    fn sample() -> Record {
        let mut tags = BTreeMap::new();
        tags.insert("owner".to_string(), "alice".to_string());
        Record {
            name: "fileset22".into(),
            size: 42,
            tags,
            note: Some("primary".into()),
        }
    }

    #[test]
    fn roundtrip_every_format() {
        for format in Format::ALL {
            let bytes = encode(format, &sample()).unwrap();
            assert_eq!(peek_format(&bytes).unwrap(), format);
            let decoded: Record = decode(&bytes).unwrap();
            assert_eq!(decoded, sample());
        }
    }

    #[test]
    fn older_payload_missing_optional_fields_decodes() {
        let old = OldRecord {
            name: "schema11".into(),
            size: 7,
        };
        for format in Format::ALL {
            let bytes = encode(format, &old).unwrap();
            let decoded: Record = decode(&bytes).unwrap();
            assert_eq!(decoded.name, "schema11");
            assert!(decoded.tags.is_empty());
            assert_eq!(decoded.note, None);
        }
    }

    #[test]
    fn short_frame_is_invalid() {
        let err = decode::<Record>(b"LM").unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrame { .. }));
    }

    #[test]
    fn bad_magic_is_invalid() {
        let mut bytes = encode(Format::Cbor, &sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            decode::<Record>(&bytes),
            Err(CodecError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn unknown_version_and_format_are_rejected() {
        let mut bytes = encode(Format::Json, &sample()).unwrap();
        bytes[2] = 9;
        assert_eq!(
            decode::<Record>(&bytes).unwrap_err(),
            CodecError::UnsupportedVersion { version: 9 }
        );

        let mut bytes = encode(Format::Json, &sample()).unwrap();
        bytes[3] = 7;
        assert_eq!(
            decode::<Record>(&bytes).unwrap_err(),
            CodecError::UnsupportedFormat { code: 7 }
        );
    }

    #[test]
    fn truncated_body_fails() {
        for format in Format::ALL {
            let bytes = encode(format, &sample()).unwrap();
            let cut = &bytes[..bytes.len() - 3];
            assert!(
                matches!(
                    decode::<Record>(cut),
                    Err(CodecError::DecodingFailed { .. })
                ),
                "{format}"
            );
        }
    }

    #[test]
    fn trailing_garbage_fails() {
        for format in Format::ALL {
            let mut bytes = encode(format, &sample()).unwrap();
            bytes.extend_from_slice(b"zz");
            assert!(
                matches!(
                    decode::<Record>(&bytes),
                    Err(CodecError::TrailingBytes { count: 2 })
                ),
                "{format}"
            );
        }
    }
}
