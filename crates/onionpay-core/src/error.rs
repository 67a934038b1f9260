//! Error types for the onion wire format

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Wire and crypto errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Remaining buffer is smaller than the field or layer being read
    #[error("{field}: buffer too short, {available} bytes available, {required} required")]
    TooShort {
        available: usize,
        required: usize,
        field: &'static str,
    },

    /// Unrecognized 2-byte layer tag
    #[error("unknown layer magic {0:?}")]
    UnknownMagic([u8; 2]),

    /// Address family byte is neither 4 nor 6
    #[error("invalid address family: {0}")]
    InvalidAddress(u8),

    /// A Crypt layer was encoded without sender key material
    #[error("crypt layer has no sender keys")]
    MissingKeys,

    /// HKDF expansion failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// Signature over an introduction did not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// Routing header does not have the expected shape
    #[error("malformed routing header: {0}")]
    MalformedHeader(&'static str),
}
