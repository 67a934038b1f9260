//! Hold-then-forward instruction

use super::{require_header, Layer, Wire};
use crate::codec::Splice;
use crate::error::Result;
use crate::types::*;
use std::time::Duration;

/// Hold the rest of the message for `duration` before processing it.
/// Millisecond resolution on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct Delay {
    pub duration: Duration,
    pub inner: Box<Layer>,
}

impl Delay {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            inner: Box::default(),
        }
    }
}

impl Wire for Delay {
    const MAGIC: Magic = *b"dl";
    const LEN: usize = MAGIC_LEN + 8;

    fn len(&self) -> usize {
        Self::LEN + self.inner.len()
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        let millis = u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX);
        s.write_u64(millis, "delay millis")?;
        self.inner.encode(s)
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "delay")?;
        Ok(Self::new(Duration::from_millis(s.read_u64("delay millis")?)))
    }
}
