//! Reply routing instruction

use super::{require_header, Layer, Wire};
use crate::codec::Splice;
use crate::error::Result;
use crate::types::*;
use std::net::SocketAddr;

/// One hop of a reply routing header.
///
/// Same shape as [`Forward`](super::Forward), but the relay reading it must
/// be `addr` itself, and what follows is a header-keyed Crypt whose payload
/// lies past the routing header.
#[derive(Clone, Debug, PartialEq)]
pub struct Reverse {
    pub addr: SocketAddr,
    pub inner: Box<Layer>,
}

impl Reverse {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            inner: Box::default(),
        }
    }
}

impl Wire for Reverse {
    const MAGIC: Magic = *b"rv";
    const LEN: usize = MAGIC_LEN + ADDR_LEN;

    fn len(&self) -> usize {
        Self::LEN + self.inner.len()
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        s.write_addr(&self.addr, "reverse addr")?;
        self.inner.encode(s)
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "reverse")?;
        Ok(Self::new(s.read_addr("reverse addr")?))
    }
}
