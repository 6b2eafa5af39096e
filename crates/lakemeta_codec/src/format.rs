//! Payload body formats.

use crate::error::CodecError;
use std::fmt;
use std::str::FromStr;

/// Encoding used for a frame body.
///
/// The format is recorded in every frame, so stores may hold payloads of
/// both formats at once while migrating from one to the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Format {
    /// Compact binary CBOR (RFC 8949).
    #[default]
    Cbor,
    /// UTF-8 JSON.
    Json,
}

impl Format {
    /// Every supported format.
    pub const ALL: [Format; 2] = [Format::Cbor, Format::Json];

    /// Returns the byte stored in the frame header.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Cbor => 1,
            Self::Json => 2,
        }
    }

    /// Returns the format for a frame header byte.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFormat` for an unknown byte.
    pub const fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            1 => Ok(Self::Cbor),
            2 => Ok(Self::Json),
            _ => Err(CodecError::UnsupportedFormat { code }),
        }
    }

    /// Returns the lowercase configuration name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cbor => "cbor",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cbor" => Ok(Self::Cbor),
            "json" => Ok(Self::Json),
            _ => Err(CodecError::UnknownFormatName {
                name: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip() {
        for format in Format::ALL {
            assert_eq!(Format::from_code(format.code()).unwrap(), format);
        }
        assert_eq!(
            Format::from_code(0),
            Err(CodecError::UnsupportedFormat { code: 0 })
        );
    }

    #[test]
    fn parse_names() {
        assert_eq!("cbor".parse::<Format>().unwrap(), Format::Cbor);
        assert_eq!(" JSON ".parse::<Format>().unwrap(), Format::Json);
        assert!("protobuf".parse::<Format>().is_err());
        assert_eq!(Format::Json.to_string(), "json");
    }
}
