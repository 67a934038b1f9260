//! Service reply

use super::{require_header, Wire};
use crate::codec::Splice;
use crate::error::Result;
use crate::types::*;

/// Reply from an exit's local service, correlated by `id`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub id: Id,
    pub port: u16,
    pub load: u8,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn new(id: Id, port: u16, load: u8, payload: Vec<u8>) -> Self {
        Self {
            id,
            port,
            load,
            payload,
        }
    }
}

impl Wire for Response {
    const MAGIC: Magic = *b"rs";
    const LEN: usize = MAGIC_LEN + ID_LEN + 2 + 1 + 4;

    fn len(&self) -> usize {
        Self::LEN + self.payload.len()
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        s.write_bytes(&self.id.0, "response id")?;
        s.write_u16(self.port, "response port")?;
        s.write_u8(self.load, "response load")?;
        s.write_prefixed(&self.payload, "response payload")
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "response")?;
        Ok(Self {
            id: Id(s.read_array("response id")?),
            port: s.read_u16("response port")?,
            load: s.read_u8("response load")?,
            payload: s.read_prefixed("response payload")?,
        })
    }
}
