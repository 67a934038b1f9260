//! onionpay core library
//!
//! Wire format, cryptography and onion construction for a relay network
//! where every hop is paid for in advance through per-hop sessions.
//!
//! # Modules
//!
//! - [`types`]: Identifiers and wire length constants
//! - [`codec`]: Cursor-based little-endian codec and buffer budging
//! - [`crypto`]: Key agreement, layer ciphers, cloaks, noise, signatures
//! - [`layer`]: The layer variants and the peeler
//! - [`builder`]: Append-only onion builder and reply paths
//! - [`error`]: Error types

pub mod builder;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod layer;
pub mod types;

#[cfg(test)]
mod wire_vectors;

pub use builder::{Builder, ReplyPath, ReturnHop};
pub use codec::{budge_up, Splice};
pub use error::{Error, Result};
pub use layer::{peel, Layer, Wire, REVERSE_HEADER_LEN, REVERSE_PAIR_LEN};
pub use types::*;
