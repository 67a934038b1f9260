//! Session key delivery

use super::{require_header, Layer, Wire};
use crate::codec::Splice;
use crate::crypto::{preimage_hash, PrivKey};
use crate::error::Result;
use crate::types::*;

/// Hands a relay the two private keys of a purchased session.
///
/// The relay matches `preimage()` against a payment it has already
/// received; without a matching payment the message is dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    /// Position of the session in the client's circuit
    pub hop: u8,
    pub header: PrivKey,
    pub payload: PrivKey,
    pub inner: Box<Layer>,
}

impl Session {
    pub fn new(hop: u8, header: PrivKey, payload: PrivKey) -> Self {
        Self {
            hop,
            header,
            payload,
            inner: Box::default(),
        }
    }

    /// Hash the payment must have been made against
    pub fn preimage(&self) -> Hash {
        preimage_hash(&self.header, &self.payload)
    }
}

impl Wire for Session {
    const MAGIC: Magic = *b"ss";
    const LEN: usize = MAGIC_LEN + 1 + 2 * KEY_LEN;

    fn len(&self) -> usize {
        Self::LEN + self.inner.len()
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        s.write_magic(&Self::MAGIC)?;
        s.write_u8(self.hop, "session hop")?;
        s.write_bytes(&self.header.to_bytes(), "session header key")?;
        s.write_bytes(&self.payload.to_bytes(), "session payload key")?;
        self.inner.encode(s)
    }

    /// Reads the keys and scrubs them from the buffer
    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "session")?;
        let hop = s.read_u8("session hop")?;
        let start = s.cursor();
        let header = PrivKey::from_bytes(s.read_array("session header key")?);
        let payload = PrivKey::from_bytes(s.read_array("session payload key")?);
        s.zero(start, s.cursor());
        Ok(Self::new(hop, header, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::peel;

    #[test]
    fn test_decode_scrubs_private_keys() {
        let session = Session::new(1, PrivKey::generate(), PrivKey::generate());
        let preimage = session.preimage();
        let mut buf = Layer::Session(session).to_bytes().unwrap();

        let mut s = Splice::new(&mut buf);
        let Layer::Session(decoded) = peel(&mut s).unwrap() else {
            panic!("expected session");
        };
        assert_eq!(decoded.hop, 1);
        assert_eq!(decoded.preimage(), preimage);
        assert!(buf[MAGIC_LEN + 1..].iter().all(|b| *b == 0));
    }
}
