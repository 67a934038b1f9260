//! Signed hidden service introduction

use super::{require_header, Wire};
use crate::codec::Splice;
use crate::crypto::IntroKey;
use crate::error::Result;
use crate::types::*;
use std::net::SocketAddr;

/// Bytes covered by the signature: id, key, addr, rate, port, expiry
const SIGNED_LEN: usize = ID_LEN + KEY_LEN + ADDR_LEN + 4 + 2 + 8;

/// Introduction advertising a service reachable through `addr`, signed by
/// the service's ed25519 key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HiddenService {
    pub id: Id,
    /// ed25519 public key of the service
    pub key: [u8; KEY_LEN],
    /// Introducer address
    pub addr: SocketAddr,
    pub rate: u32,
    pub port: u16,
    /// Unix seconds
    pub expiry: u64,
    pub signature: [u8; SIGNATURE_LEN],
}

impl HiddenService {
    /// Build and sign an introduction
    pub fn sign(
        key: &IntroKey,
        id: Id,
        addr: SocketAddr,
        port: u16,
        rate: u32,
        expiry: u64,
    ) -> Self {
        let mut intro = Self {
            id,
            key: key.public_key(),
            addr,
            rate,
            port,
            expiry,
            signature: [0u8; SIGNATURE_LEN],
        };
        intro.signature = key.sign(&intro.signed_bytes());
        intro
    }

    /// Check the signature against the embedded key
    pub fn verify(&self) -> Result<()> {
        IntroKey::verify(&self.key, &self.signed_bytes(), &self.signature)
    }

    fn signed_bytes(&self) -> [u8; SIGNED_LEN] {
        let mut buf = [0u8; SIGNED_LEN];
        // sized exactly for these fields; the writes cannot run short
        let _ = self.write_fields(&mut Splice::new(&mut buf));
        buf
    }

    fn write_fields(&self, s: &mut Splice) -> Result<()> {
        s.write_bytes(&self.id.0, "intro id")?;
        s.write_bytes(&self.key, "intro key")?;
        s.write_addr(&self.addr, "intro addr")?;
        s.write_u32(self.rate, "intro rate")?;
        s.write_u16(self.port, "intro port")?;
        s.write_u64(self.expiry, "intro expiry")
    }
}

impl Wire for HiddenService {
    const MAGIC: Magic = *b"hs";
    const LEN: usize = MAGIC_LEN + SIGNED_LEN + SIGNATURE_LEN;

    fn len(&self) -> usize {
        Self::LEN
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        self.write_fields(s)?;
        s.write_bytes(&self.signature, "intro signature")
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "hiddenservice")?;
        Ok(Self {
            id: Id(s.read_array("intro id")?),
            key: s.read_array("intro key")?,
            addr: s.read_addr("intro addr")?,
            rate: s.read_u32("intro rate")?,
            port: s.read_u16("intro port")?,
            expiry: s.read_u64("intro expiry")?,
            signature: s.read_array("intro signature")?,
        })
    }
}
