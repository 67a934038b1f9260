//! Core protocol types
//!
//! Fixed-size identifiers and the length constants that make up the
//! compatibility surface of the wire format.

use rand::Rng;
use std::fmt;

// =============================================================================
// SIZES
// =============================================================================

/// Length of a layer magic tag
pub const MAGIC_LEN: usize = 2;
/// Length of a random identifier
pub const ID_LEN: usize = 16;
/// Length of a hash
pub const HASH_LEN: usize = 32;
/// Length of an x25519 public or private key
pub const KEY_LEN: usize = 32;
/// Length of a stream cipher nonce
pub const NONCE_LEN: usize = 12;
/// Length of a cloaked public key hint
pub const CLOAK_LEN: usize = 8;
/// Length of the blinding factor prefix inside a cloak
pub const BLINDER_LEN: usize = 3;
/// Length of an encoded socket address (family, 16 address bytes, port)
pub const ADDR_LEN: usize = 1 + 16 + 2;
/// Length of an ed25519 signature
pub const SIGNATURE_LEN: usize = 64;

/// Number of relays in a circuit
pub const CIRCUIT_LEN: usize = 5;
/// Hop index of the client's own return session
pub const RETURN_HOP: u8 = 5;
/// Number of Reverse+Crypt pairs in a reply routing header
pub const REVERSE_HOPS: usize = 3;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// 2-byte ASCII layer tag
pub type Magic = [u8; MAGIC_LEN];

/// 128-bit random nonce identifying sessions, sends and replies
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Id(pub [u8; ID_LEN]);

impl Id {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        let mut id = [0u8; ID_LEN];
        rand::thread_rng().fill(&mut id);
        Self(id)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

/// 256-bit hash (pre-image hashes, symmetric cipher keys)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

/// Stream cipher nonce
pub type Nonce = [u8; NONCE_LEN];

/// Generate a random nonce
pub fn new_nonce() -> Nonce {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_random() {
        assert_ne!(Id::new(), Id::new());
        assert_ne!(new_nonce(), new_nonce());
    }

    #[test]
    fn test_id_display_is_short_hex() {
        let id = Id([0xab; ID_LEN]);
        assert_eq!(id.to_string(), "abababababababab");
    }
}
