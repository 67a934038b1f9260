//! Introduction lookup

use super::{require_header, Wire};
use crate::codec::Splice;
use crate::error::Result;
use crate::types::*;

/// Ask a relay whether it holds an introduction for `key`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntroQuery {
    pub id: Id,
    pub key: [u8; KEY_LEN],
}

impl IntroQuery {
    pub fn new(id: Id, key: [u8; KEY_LEN]) -> Self {
        Self { id, key }
    }
}

impl Wire for IntroQuery {
    const MAGIC: Magic = *b"iq";
    const LEN: usize = MAGIC_LEN + ID_LEN + KEY_LEN;

    fn len(&self) -> usize {
        Self::LEN
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        s.write_bytes(&self.id.0, "introquery id")?;
        s.write_bytes(&self.key, "introquery key")
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "introquery")?;
        Ok(Self {
            id: Id(s.read_array("introquery id")?),
            key: s.read_array("introquery key")?,
        })
    }
}
