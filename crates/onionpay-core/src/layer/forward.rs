//! Forward routing instruction

use super::{require_header, Layer, Wire};
use crate::codec::Splice;
use crate::error::Result;
use crate::types::*;
use std::net::SocketAddr;

/// Send the rest of the message to `addr`
#[derive(Clone, Debug, PartialEq)]
pub struct Forward {
    pub addr: SocketAddr,
    pub inner: Box<Layer>,
}

impl Forward {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            inner: Box::default(),
        }
    }
}

impl Wire for Forward {
    const MAGIC: Magic = *b"fw";
    const LEN: usize = MAGIC_LEN + ADDR_LEN;

    fn len(&self) -> usize {
        Self::LEN + self.inner.len()
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        s.write_addr(&self.addr, "forward addr")?;
        self.inner.encode(s)
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "forward")?;
        Ok(Self::new(s.read_addr("forward addr")?))
    }
}
