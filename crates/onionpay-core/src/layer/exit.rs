//! Exit request to a local service

use super::{require_header, Layer, Wire};
use crate::codec::Splice;
use crate::error::Result;
use crate::types::*;

/// Deliver `payload` to the local service on `port` and route the reply
/// back along the routing header that follows.
///
/// `ciphers` and `nonces` let the exit encrypt the reply for each of the
/// three reverse hops without knowing their keys.
#[derive(Clone, Debug, PartialEq)]
pub struct Exit {
    pub port: u16,
    pub ciphers: [Hash; REVERSE_HOPS],
    pub nonces: [Nonce; REVERSE_HOPS],
    pub id: Id,
    pub payload: Vec<u8>,
    pub inner: Box<Layer>,
}

impl Exit {
    pub fn new(
        port: u16,
        ciphers: [Hash; REVERSE_HOPS],
        nonces: [Nonce; REVERSE_HOPS],
        id: Id,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            port,
            ciphers,
            nonces,
            id,
            payload,
            inner: Box::default(),
        }
    }
}

impl Wire for Exit {
    const MAGIC: Magic = *b"ex";
    const LEN: usize = MAGIC_LEN
        + 2
        + REVERSE_HOPS * HASH_LEN
        + REVERSE_HOPS * NONCE_LEN
        + ID_LEN
        + 4;

    fn len(&self) -> usize {
        Self::LEN + self.payload.len() + self.inner.len()
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        s.write_u16(self.port, "exit port")?;
        for cipher in &self.ciphers {
            s.write_bytes(&cipher.0, "exit cipher")?;
        }
        for nonce in &self.nonces {
            s.write_bytes(nonce, "exit nonce")?;
        }
        s.write_bytes(&self.id.0, "exit id")?;
        s.write_prefixed(&self.payload, "exit payload")?;
        self.inner.encode(s)
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "exit")?;
        let port = s.read_u16("exit port")?;
        let mut ciphers = [Hash::default(); REVERSE_HOPS];
        for cipher in ciphers.iter_mut() {
            *cipher = Hash(s.read_array("exit cipher")?);
        }
        let mut nonces = [[0u8; NONCE_LEN]; REVERSE_HOPS];
        for nonce in nonces.iter_mut() {
            *nonce = s.read_array("exit nonce")?;
        }
        let id = Id(s.read_array("exit id")?);
        let payload = s.read_prefixed("exit payload")?;
        Ok(Self::new(port, ciphers, nonces, id, payload))
    }
}
