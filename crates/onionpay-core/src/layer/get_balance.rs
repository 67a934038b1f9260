//! Balance query

use super::{require_header, Layer, Wire};
use crate::codec::Splice;
use crate::error::Result;
use crate::types::*;

/// Ask the relay holding session `id` for its remaining credit. The reply
/// travels back on the routing header nested inside, enciphered like an
/// exit reply.
#[derive(Clone, Debug, PartialEq)]
pub struct GetBalance {
    pub id: Id,
    pub conf_id: Id,
    pub ciphers: [Hash; REVERSE_HOPS],
    pub nonces: [Nonce; REVERSE_HOPS],
    pub inner: Box<Layer>,
}

impl GetBalance {
    pub fn new(
        id: Id,
        conf_id: Id,
        ciphers: [Hash; REVERSE_HOPS],
        nonces: [Nonce; REVERSE_HOPS],
    ) -> Self {
        Self {
            id,
            conf_id,
            ciphers,
            nonces,
            inner: Box::default(),
        }
    }
}

impl Wire for GetBalance {
    const MAGIC: Magic = *b"gb";
    const LEN: usize =
        MAGIC_LEN + 2 * ID_LEN + REVERSE_HOPS * HASH_LEN + REVERSE_HOPS * NONCE_LEN;

    fn len(&self) -> usize {
        Self::LEN + self.inner.len()
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        s.write_bytes(&self.id.0, "getbalance id")?;
        s.write_bytes(&self.conf_id.0, "getbalance conf id")?;
        for cipher in &self.ciphers {
            s.write_bytes(&cipher.0, "getbalance cipher")?;
        }
        for nonce in &self.nonces {
            s.write_bytes(nonce, "getbalance nonce")?;
        }
        self.inner.encode(s)
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "getbalance")?;
        let id = Id(s.read_array("getbalance id")?);
        let conf_id = Id(s.read_array("getbalance conf id")?);
        let mut ciphers = [Hash::default(); REVERSE_HOPS];
        for cipher in ciphers.iter_mut() {
            *cipher = Hash(s.read_array("getbalance cipher")?);
        }
        let mut nonces = [[0u8; NONCE_LEN]; REVERSE_HOPS];
        for nonce in nonces.iter_mut() {
            *nonce = s.read_array("getbalance nonce")?;
        }
        Ok(Self::new(id, conf_id, ciphers, nonces))
    }
}
