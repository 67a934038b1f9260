//! Balance report

use super::{require_header, Wire};
use crate::codec::Splice;
use crate::error::Result;
use crate::types::*;

/// A relay's answer to [`GetBalance`](super::GetBalance)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Balance {
    /// Session the balance belongs to
    pub id: Id,
    /// Correlation id of the query
    pub conf_id: Id,
    pub amount: u64,
}

impl Balance {
    pub fn new(id: Id, conf_id: Id, amount: u64) -> Self {
        Self {
            id,
            conf_id,
            amount,
        }
    }
}

impl Wire for Balance {
    const MAGIC: Magic = *b"ba";
    const LEN: usize = MAGIC_LEN + 2 * ID_LEN + 8;

    fn len(&self) -> usize {
        Self::LEN
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        s.write_bytes(&self.id.0, "balance id")?;
        s.write_bytes(&self.conf_id.0, "balance conf id")?;
        s.write_u64(self.amount, "balance amount")
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "balance")?;
        Ok(Self {
            id: Id(s.read_array("balance id")?),
            conf_id: Id(s.read_array("balance conf id")?),
            amount: s.read_u64("balance amount")?,
        })
    }
}
