//! # LakeMeta Codec
//!
//! Framed payload encoding for the LakeMeta entity store.
//!
//! Every payload is wrapped in a small self-describing frame:
//!
//! ```text
//! | magic "LM" (2) | frame version (1) | format (1) | body (N) |
//! ```
//!
//! Decoding dispatches on the format byte, so a store may hold CBOR and
//! JSON payloads side by side while it migrates from one to the other.
//!
//! ## Rules
//!
//! - Unknown magic, version or format is an error
//! - A body that fails to decode is an error, never a partial value
//! - Trailing bytes after the body are an error
//! - Missing optional fields are left to `#[serde(default)]`
//!
//! ## Usage
//!
//! ```
//! use lakemeta_codec::{decode, encode, Format};
//!
//! let bytes = encode(Format::Cbor, &vec![1u32, 2, 3]).unwrap();
//! let decoded: Vec<u32> = decode(&bytes).unwrap();
//! assert_eq!(decoded, vec![1, 2, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod format;
mod frame;

pub use error::{CodecError, CodecResult};
pub use format::Format;
pub use frame::{decode, encode, peek_format, FRAME_HEADER_SIZE, FRAME_MAGIC, FRAME_VERSION};
