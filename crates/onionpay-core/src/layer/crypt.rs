//! Encryption envelope

use super::{require_header, Layer, Wire};
use crate::codec::Splice;
use crate::crypto::{encipher, Cloak, PrivKey, PubKey};
use crate::error::{Error, Result};
use crate::types::*;

/// Sender-side key material; never on the wire
#[derive(Clone, Debug)]
pub struct CryptKeys {
    /// Recipient header public key
    pub to_header: PubKey,
    /// Recipient payload public key, when the envelope carries a reply
    pub to_payload: Option<PubKey>,
    /// Ephemeral private key of this envelope
    pub from: PrivKey,
}

/// Encrypts everything nested inside it for one recipient.
///
/// The recipient finds which of its keys the envelope is for by testing the
/// cloak, then derives the cipher from its private key and `from`.
#[derive(Clone, Debug)]
pub struct Crypt {
    pub cloak: Cloak,
    /// Sender's ephemeral public key
    pub from: PubKey,
    pub nonce: Nonce,
    pub keys: Option<CryptKeys>,
    pub inner: Box<Layer>,
}

impl Crypt {
    /// Envelope for `to_header` using the ephemeral key `from`
    pub fn new(to_header: PubKey, to_payload: Option<PubKey>, from: PrivKey, nonce: Nonce) -> Self {
        Self {
            cloak: Cloak::new(&to_header),
            from: from.public(),
            nonce,
            keys: Some(CryptKeys {
                to_header,
                to_payload,
                from,
            }),
            inner: Box::default(),
        }
    }

    /// Envelope with a fresh ephemeral key and nonce
    pub fn ephemeral(to_header: PubKey, to_payload: Option<PubKey>) -> Self {
        Self::new(to_header, to_payload, PrivKey::generate(), new_nonce())
    }

    /// Recipient header key, if this envelope was built locally
    pub fn to_header(&self) -> Option<&PubKey> {
        self.keys.as_ref().map(|k| &k.to_header)
    }
}

impl PartialEq for Crypt {
    // sender keys never leave the sender, so only the wire form is compared
    fn eq(&self, other: &Self) -> bool {
        self.cloak == other.cloak
            && self.from == other.from
            && self.nonce == other.nonce
            && self.inner == other.inner
    }
}

impl Wire for Crypt {
    const MAGIC: Magic = *b"cr";
    const LEN: usize = MAGIC_LEN + CLOAK_LEN + KEY_LEN + NONCE_LEN;

    fn len(&self) -> usize {
        Self::LEN + self.inner.len()
    }

    fn encode(&self, s: &mut Splice) -> Result<()> {
        let keys = self.keys.as_ref().ok_or(Error::MissingKeys)?;
        let cipher = keys.from.cipher_with(&keys.to_header)?;

        s.write_magic(&Self::MAGIC)?;
        s.write_bytes(&self.cloak.0, "cloak")?;
        s.write_bytes(&self.from.0, "from")?;
        s.write_bytes(&self.nonce, "nonce")?;

        let start = s.cursor();
        self.inner.encode(s)?;
        let end = s.cursor();
        encipher(&cipher, &self.nonce, s.range_mut(start, end)?);
        Ok(())
    }

    fn decode(s: &mut Splice) -> Result<Self> {
        require_header::<Self>(s, "crypt")?;
        Ok(Self {
            cloak: Cloak(s.read_array("cloak")?),
            from: PubKey(s.read_array("from")?),
            nonce: s.read_array("nonce")?,
            keys: None,
            inner: Box::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keys;
    use crate::layer::{peel, Confirm};

    #[test]
    fn test_inner_is_enciphered_and_recoverable() {
        let recipient = Keys::generate();
        let id = Id::new();

        let mut crypt = Crypt::ephemeral(recipient.public, None);
        crypt.inner = Box::new(Layer::Confirm(Confirm::new(id, 3)));
        let mut buf = Layer::Crypt(crypt).to_bytes().unwrap();

        // inner magic is not visible in the clear
        assert_ne!(&buf[Crypt::LEN..Crypt::LEN + 2], b"cf");

        let mut s = Splice::new(&mut buf);
        let Layer::Crypt(received) = peel(&mut s).unwrap() else {
            panic!("expected crypt");
        };
        assert!(received.cloak.matches(&recipient.public));

        let cipher = recipient.private.cipher_with(&received.from).unwrap();
        let start = s.cursor();
        encipher(&cipher, &received.nonce, s.tail_mut(start));

        assert_eq!(
            peel(&mut s).unwrap(),
            Layer::Confirm(Confirm::new(id, 3))
        );
    }

    #[test]
    fn test_encode_without_keys_fails() {
        let mut crypt = Crypt::ephemeral(Keys::generate().public, None);
        crypt.keys = None;
        assert_eq!(Layer::Crypt(crypt).to_bytes(), Err(Error::MissingKeys));
    }
}
