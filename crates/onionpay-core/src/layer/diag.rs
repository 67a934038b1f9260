//! Diagnostic marker

use super::{require_header, Layer, Wire};
use crate::codec::Splice;
use crate::error::Result;
use crate::types::*;

/// Logged and counted by the relay that peels it; processing continues
/// with the inner layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Diag {
    pub id: Id,
    pub inner: Box<Layer>,
}

impl Diag {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            inner: Box::default(),
        }
    }
}

impl Wire for Diag {
    const MAGIC: Magic = *b"dg";
    const LEN: usize = MAGIC_LEN + ID_LEN;

    fn len(&self) -> usize {
        Self::LEN + self.inner.len()
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        s.write_bytes(&self.id.0, "diag id")?;
        self.inner.encode(s)
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "diag")?;
        Ok(Self::new(Id(s.read_array("diag id")?)))
    }
}
