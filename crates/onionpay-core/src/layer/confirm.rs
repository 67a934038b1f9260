//! Delivery confirmation

use super::{require_header, Wire};
use crate::codec::Splice;
use crate::error::Result;
use crate::types::*;

/// Terminal acknowledgement correlating with a pending send
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirm {
    pub id: Id,
    /// Sender's load at the time of confirmation, 0-255
    pub load: u8,
}

impl Confirm {
    pub fn new(id: Id, load: u8) -> Self {
        Self { id, load }
    }
}

impl Wire for Confirm {
    const MAGIC: Magic = *b"cf";
    const LEN: usize = MAGIC_LEN + ID_LEN + 1;

    fn len(&self) -> usize {
        Self::LEN
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        s.write_bytes(&self.id.0, "confirm id")?;
        s.write_u8(self.load, "confirm load")
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "confirm")?;
        Ok(Self {
            id: Id(s.read_array("confirm id")?),
            load: s.read_u8("confirm load")?,
        })
    }
}
