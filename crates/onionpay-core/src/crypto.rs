//! Cryptographic primitives for onion layers
//!
//! x25519 key agreement, HKDF-derived ChaCha20 layer ciphers, blinded
//! public-key cloaks, pre-image hashes and the hash-chain noise used to
//! re-pad budged buffers.

use crate::error::{Error, Result};
use crate::types::*;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::Sha256;
use std::cell::RefCell;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

/// HKDF salt for layer cipher derivation
const CIPHER_SALT: &[u8] = b"onionpay-layer-v1";
/// HKDF info for layer cipher derivation
const CIPHER_INFO: &[u8] = b"cipher";

// =============================================================================
// KEYS
// =============================================================================

/// x25519 private key
#[derive(Clone)]
pub struct PrivKey(StaticSecret);

impl PrivKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Get the raw key bytes
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0.to_bytes()
    }

    /// Derive the matching public key
    pub fn public(&self) -> PubKey {
        PubKey(PublicKey::from(&self.0).to_bytes())
    }

    /// ECDH with a peer public key, expanded into a symmetric layer cipher
    pub fn cipher_with(&self, their: &PubKey) -> Result<Hash> {
        let shared = self.0.diffie_hellman(&PublicKey::from(their.0));
        derive_cipher(shared.as_bytes())
    }
}

impl PartialEq for PrivKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PrivKey {}

impl fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivKey(..)")
    }
}

/// x25519 public key in its wire form
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PubKey(pub [u8; KEY_LEN]);

impl PubKey {
    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", hex::encode(&self.0[..8]))
    }
}

/// A private key together with its cached public form
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keys {
    pub private: PrivKey,
    pub public: PubKey,
}

impl Keys {
    /// Generate a fresh keypair
    pub fn generate() -> Self {
        Self::from_private(PrivKey::generate())
    }

    /// Wrap an existing private key
    pub fn from_private(private: PrivKey) -> Self {
        let public = private.public();
        Self { private, public }
    }
}

// =============================================================================
// CLOAK
// =============================================================================

/// Blinded hint of a recipient public key.
///
/// `cloak = blinder || BLAKE3(blinder || pubkey)[..5]`. The blinder is fresh
/// per layer so two cloaks of the same key are unlinkable, yet a holder of
/// candidate keys can test each one.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Cloak(pub [u8; CLOAK_LEN]);

impl Cloak {
    /// Cloak a public key with a random blinding factor
    pub fn new(key: &PubKey) -> Self {
        let mut blinder = [0u8; BLINDER_LEN];
        rand::thread_rng().fill(&mut blinder);
        Self::with_blinder(blinder, key)
    }

    fn with_blinder(blinder: [u8; BLINDER_LEN], key: &PubKey) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&blinder);
        hasher.update(&key.0);
        let hash = hasher.finalize();

        let mut cloak = [0u8; CLOAK_LEN];
        cloak[..BLINDER_LEN].copy_from_slice(&blinder);
        cloak[BLINDER_LEN..].copy_from_slice(&hash.as_bytes()[..CLOAK_LEN - BLINDER_LEN]);
        Self(cloak)
    }

    /// Test whether this cloak was made from `key`
    pub fn matches(&self, key: &PubKey) -> bool {
        let mut blinder = [0u8; BLINDER_LEN];
        blinder.copy_from_slice(&self.0[..BLINDER_LEN]);
        Self::with_blinder(blinder, key) == *self
    }
}

impl fmt::Debug for Cloak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cloak({})", hex::encode(self.0))
    }
}

// =============================================================================
// CIPHERS
// =============================================================================

/// Expand an ECDH shared secret into a 256-bit stream cipher key
pub fn derive_cipher(shared_secret: &[u8; 32]) -> Result<Hash> {
    let hkdf = Hkdf::<Sha256>::new(Some(CIPHER_SALT), shared_secret);
    let mut key = [0u8; HASH_LEN];
    hkdf.expand(CIPHER_INFO, &mut key)
        .map_err(|_| Error::KeyDerivation)?;
    Ok(Hash(key))
}

/// XOR `data` in place with the ChaCha20 keystream for `key` and `nonce`.
///
/// Applying it twice restores the input; the length never changes.
pub fn encipher(key: &Hash, nonce: &Nonce, data: &mut [u8]) {
    let mut cipher = ChaCha20::new(
        chacha20::Key::from_slice(&key.0),
        chacha20::Nonce::from_slice(nonce),
    );
    cipher.apply_keystream(data);
}

/// Derive the reply ciphers a sender hands to an exit for the three
/// reverse hops: one per (ephemeral private, hop payload public) pair.
pub fn gen_ciphers(
    from: &[PrivKey; REVERSE_HOPS],
    to_payload: &[PubKey; REVERSE_HOPS],
) -> Result<[Hash; REVERSE_HOPS]> {
    let mut ciphers = [Hash::default(); REVERSE_HOPS];
    for i in 0..REVERSE_HOPS {
        ciphers[i] = from[i].cipher_with(&to_payload[i])?;
    }
    Ok(ciphers)
}

/// Encipher a reply payload with every reverse hop cipher
pub fn encipher_all(
    ciphers: &[Hash; REVERSE_HOPS],
    nonces: &[Nonce; REVERSE_HOPS],
    data: &mut [u8],
) {
    for (cipher, nonce) in ciphers.iter().zip(nonces.iter()) {
        encipher(cipher, nonce, data);
    }
}

/// Pre-image hash gating a session: `BLAKE3(header_priv || payload_priv)`
pub fn preimage_hash(header: &PrivKey, payload: &PrivKey) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&header.to_bytes());
    hasher.update(&payload.to_bytes());
    Hash(*hasher.finalize().as_bytes())
}

// =============================================================================
// NOISE
// =============================================================================

thread_local! {
    static NOISE_CHAIN: RefCell<[u8; 32]> = RefCell::new(rand::random());
}

/// Fill `buf` with hash-chain noise.
///
/// Each call advances the chain state with BLAKE3 and keys an XOF read with
/// the new state, so padding never comes from the transport's randomness.
pub fn fill_noise(buf: &mut [u8]) {
    NOISE_CHAIN.with(|state| {
        let mut state = state.borrow_mut();
        *state = *blake3::hash(&*state).as_bytes();
        blake3::Hasher::new_keyed(&state)
            .finalize_xof()
            .fill(buf);
    });
}

// =============================================================================
// SIGNING (hidden service introductions)
// =============================================================================

/// Ed25519 keypair a hidden service signs its introductions with
#[derive(Clone)]
pub struct IntroKey {
    signing_key: SigningKey,
}

impl IntroKey {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from seed bytes (for deterministic testing)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Get the public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify a signature
    pub fn verify(
        public_key: &[u8; 32],
        message: &[u8],
        signature: &[u8; SIGNATURE_LEN],
    ) -> Result<()> {
        let verifying_key =
            VerifyingKey::from_bytes(public_key).map_err(|_| Error::InvalidSignature)?;
        let sig = Signature::from_bytes(signature);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| Error::InvalidSignature)
    }
}

impl fmt::Debug for IntroKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntroKey({})", hex::encode(&self.public_key()[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecdh_ciphers_agree() {
        let alice = PrivKey::generate();
        let bob = PrivKey::generate();

        let a = alice.cipher_with(&bob.public()).unwrap();
        let b = bob.cipher_with(&alice.public()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_encipher_is_involution() {
        let key = Hash([7u8; 32]);
        let nonce = new_nonce();
        let mut data = b"attack at dawn".to_vec();

        encipher(&key, &nonce, &mut data);
        assert_ne!(&data[..], b"attack at dawn");
        encipher(&key, &nonce, &mut data);
        assert_eq!(&data[..], b"attack at dawn");
    }

    #[test]
    fn test_stacked_ciphers_commute() {
        let ciphers = [Hash([1u8; 32]), Hash([2u8; 32]), Hash([3u8; 32])];
        let nonces = [new_nonce(), new_nonce(), new_nonce()];
        let mut data = b"reply payload".to_vec();

        encipher_all(&ciphers, &nonces, &mut data);
        // peel in a different order than applied
        encipher(&ciphers[1], &nonces[1], &mut data);
        encipher(&ciphers[0], &nonces[0], &mut data);
        encipher(&ciphers[2], &nonces[2], &mut data);
        assert_eq!(&data[..], b"reply payload");
    }

    #[test]
    fn test_cloak_matches_only_its_key() {
        let key = PrivKey::generate().public();
        let other = PrivKey::generate().public();

        let cloak = Cloak::new(&key);
        assert!(cloak.matches(&key));
        assert!(!cloak.matches(&other));
    }

    #[test]
    fn test_cloaks_are_unlinkable() {
        let key = PrivKey::generate().public();
        // 24-bit blinder; a collision here is astronomically unlikely
        assert_ne!(Cloak::new(&key), Cloak::new(&key));
    }

    #[test]
    fn test_preimage_depends_on_both_keys() {
        let h = PrivKey::generate();
        let p = PrivKey::generate();
        let other = PrivKey::generate();

        assert_eq!(preimage_hash(&h, &p), preimage_hash(&h, &p));
        assert_ne!(preimage_hash(&h, &p), preimage_hash(&h, &other));
    }

    #[test]
    fn test_noise_changes_every_call() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        fill_noise(&mut a);
        fill_noise(&mut b);
        assert_ne!(a, b);
        assert_ne!(a, [0u8; 64]);
    }

    #[test]
    fn test_intro_key_sign_verify() {
        let key = IntroKey::generate();
        let sig = key.sign(b"hello");

        assert!(IntroKey::verify(&key.public_key(), b"hello", &sig).is_ok());
        assert_eq!(
            IntroKey::verify(&key.public_key(), b"hellp", &sig),
            Err(Error::InvalidSignature)
        );
    }
}
