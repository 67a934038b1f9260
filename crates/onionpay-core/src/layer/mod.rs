//! Onion layer variants and the peeler
//!
//! Every variant is a fixed header (magic tag + typed fields), optionally
//! followed by a variable payload and, for non-terminal variants, an inner
//! layer. Encoding writes the whole nest; decoding reads exactly one header
//! and leaves the remainder for the caller.

mod balance;
mod confirm;
mod crypt;
mod delay;
mod diag;
mod exit;
mod forward;
mod get_balance;
mod hidden_service;
mod intro_query;
mod response;
mod reverse;
mod session;

pub use balance::Balance;
pub use confirm::Confirm;
pub use crypt::{Crypt, CryptKeys};
pub use delay::Delay;
pub use diag::Diag;
pub use exit::Exit;
pub use forward::Forward;
pub use get_balance::GetBalance;
pub use hidden_service::HiddenService;
pub use intro_query::IntroQuery;
pub use response::Response;
pub use reverse::Reverse;
pub use session::Session;

use crate::codec::Splice;
use crate::error::{Error, Result};
use crate::types::*;

/// Length of one Reverse+Crypt pair in a reply routing header
pub const REVERSE_PAIR_LEN: usize = Reverse::LEN + Crypt::LEN;
/// Length of the complete reply routing header
pub const REVERSE_HEADER_LEN: usize = REVERSE_HOPS * REVERSE_PAIR_LEN;

/// Encode/decode contract shared by every variant
pub trait Wire: Sized {
    /// Globally unique 2-byte tag
    const MAGIC: Magic;
    /// Fixed header length, magic included, payload and inner layer excluded
    const LEN: usize;

    /// Total encoded length including variable payload and inner layer
    fn len(&self) -> usize;

    /// Write this layer's fields, then the inner layer if any
    fn encode(&self, s: &mut Splice) -> Result<()>;

    /// Read this layer's fields (the magic has already been consumed)
    fn decode(s: &mut Splice) -> Result<Self>;
}

/// Fail with `TooShort` if the rest of a fixed header is not present
pub(crate) fn require_header<W: Wire>(s: &Splice, name: &'static str) -> Result<()> {
    s.require(W::LEN - MAGIC_LEN, name)
}

/// One onion layer
#[derive(Clone, Debug, PartialEq)]
pub enum Layer {
    Crypt(Crypt),
    Forward(Forward),
    Reverse(Reverse),
    Exit(Exit),
    Session(Session),
    Balance(Balance),
    GetBalance(GetBalance),
    Confirm(Confirm),
    Delay(Delay),
    Diag(Diag),
    HiddenService(HiddenService),
    IntroQuery(IntroQuery),
    Response(Response),
    /// Zero-length terminal closing an otherwise open chain
    NoOp,
}

impl Default for Layer {
    fn default() -> Self {
        Layer::NoOp
    }
}

impl Layer {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Crypt(_) => "crypt",
            Layer::Forward(_) => "forward",
            Layer::Reverse(_) => "reverse",
            Layer::Exit(_) => "exit",
            Layer::Session(_) => "session",
            Layer::Balance(_) => "balance",
            Layer::GetBalance(_) => "getbalance",
            Layer::Confirm(_) => "confirm",
            Layer::Delay(_) => "delay",
            Layer::Diag(_) => "diag",
            Layer::HiddenService(_) => "hiddenservice",
            Layer::IntroQuery(_) => "introquery",
            Layer::Response(_) => "response",
            Layer::NoOp => "noop",
        }
    }

    /// Total encoded length of this layer and everything nested in it
    pub fn len(&self) -> usize {
        match self {
            Layer::Crypt(l) => l.len(),
            Layer::Forward(l) => l.len(),
            Layer::Reverse(l) => l.len(),
            Layer::Exit(l) => l.len(),
            Layer::Session(l) => l.len(),
            Layer::Balance(l) => l.len(),
            Layer::GetBalance(l) => l.len(),
            Layer::Confirm(l) => l.len(),
            Layer::Delay(l) => l.len(),
            Layer::Diag(l) => l.len(),
            Layer::HiddenService(l) => l.len(),
            Layer::IntroQuery(l) => l.len(),
            Layer::Response(l) => l.len(),
            Layer::NoOp => 0,
        }
    }

    /// Is this the zero-length terminal
    pub fn is_empty(&self) -> bool {
        matches!(self, Layer::NoOp)
    }

    /// Encode this layer (and its inner layers) at the cursor
    pub fn encode(&self, s: &mut Splice) -> Result<()> {
        match self {
            Layer::Crypt(l) => l.encode(s),
            Layer::Forward(l) => l.encode(s),
            Layer::Reverse(l) => l.encode(s),
            Layer::Exit(l) => l.encode(s),
            Layer::Session(l) => l.encode(s),
            Layer::Balance(l) => l.encode(s),
            Layer::GetBalance(l) => l.encode(s),
            Layer::Confirm(l) => l.encode(s),
            Layer::Delay(l) => l.encode(s),
            Layer::Diag(l) => l.encode(s),
            Layer::HiddenService(l) => l.encode(s),
            Layer::IntroQuery(l) => l.encode(s),
            Layer::Response(l) => l.encode(s),
            Layer::NoOp => Ok(()),
        }
    }

    /// Encode into a freshly allocated buffer of exactly `len()` bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.len()];
        self.encode(&mut Splice::new(&mut buf))?;
        Ok(buf)
    }

    /// Terminal variants never carry an inner layer
    pub fn is_terminal(&self) -> bool {
        self.inner().is_none()
    }

    /// The nested layer, if this variant can carry one
    pub fn inner(&self) -> Option<&Layer> {
        match self {
            Layer::Crypt(l) => Some(&l.inner),
            Layer::Forward(l) => Some(&l.inner),
            Layer::Reverse(l) => Some(&l.inner),
            Layer::Exit(l) => Some(&l.inner),
            Layer::Session(l) => Some(&l.inner),
            Layer::GetBalance(l) => Some(&l.inner),
            Layer::Delay(l) => Some(&l.inner),
            Layer::Diag(l) => Some(&l.inner),
            Layer::Balance(_)
            | Layer::Confirm(_)
            | Layer::HiddenService(_)
            | Layer::IntroQuery(_)
            | Layer::Response(_)
            | Layer::NoOp => None,
        }
    }

    /// Nest `inner` inside this layer. Returns false for terminal variants.
    pub fn set_inner(&mut self, inner: Layer) -> bool {
        let slot = match self {
            Layer::Crypt(l) => &mut l.inner,
            Layer::Forward(l) => &mut l.inner,
            Layer::Reverse(l) => &mut l.inner,
            Layer::Exit(l) => &mut l.inner,
            Layer::Session(l) => &mut l.inner,
            Layer::GetBalance(l) => &mut l.inner,
            Layer::Delay(l) => &mut l.inner,
            Layer::Diag(l) => &mut l.inner,
            _ => return false,
        };
        **slot = inner;
        true
    }
}

/// Decode the outermost layer at the cursor.
///
/// Reads the magic tag, dispatches to the variant's decoder and leaves the
/// cursor just past that layer's header (and payload, where it has one).
/// Unknown tags are fatal for the message.
pub fn peel(s: &mut Splice) -> Result<Layer> {
    let magic = s.read_magic()?;
    let layer = match magic {
        Crypt::MAGIC => Layer::Crypt(Crypt::decode(s)?),
        Forward::MAGIC => Layer::Forward(Forward::decode(s)?),
        Reverse::MAGIC => Layer::Reverse(Reverse::decode(s)?),
        Exit::MAGIC => Layer::Exit(Exit::decode(s)?),
        Session::MAGIC => Layer::Session(Session::decode(s)?),
        Balance::MAGIC => Layer::Balance(Balance::decode(s)?),
        GetBalance::MAGIC => Layer::GetBalance(GetBalance::decode(s)?),
        Confirm::MAGIC => Layer::Confirm(Confirm::decode(s)?),
        Delay::MAGIC => Layer::Delay(Delay::decode(s)?),
        Diag::MAGIC => Layer::Diag(Diag::decode(s)?),
        HiddenService::MAGIC => Layer::HiddenService(HiddenService::decode(s)?),
        IntroQuery::MAGIC => Layer::IntroQuery(IntroQuery::decode(s)?),
        Response::MAGIC => Layer::Response(Response::decode(s)?),
        other => return Err(Error::UnknownMagic(other)),
    };
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{IntroKey, Keys, PrivKey};
    use std::time::Duration;

    fn samples() -> Vec<Layer> {
        let addr = "127.0.0.1:4000".parse().unwrap();
        let id = Id::new();
        vec![
            Layer::Forward(Forward::new(addr)),
            Layer::Reverse(Reverse::new(addr)),
            Layer::Exit(Exit::new(
                3455,
                [Hash([1; 32]), Hash([2; 32]), Hash([3; 32])],
                [new_nonce(), new_nonce(), new_nonce()],
                id,
                b"request".to_vec(),
            )),
            Layer::Session(Session::new(2, PrivKey::generate(), PrivKey::generate())),
            Layer::Balance(Balance::new(id, Id::new(), 1_000_000)),
            Layer::GetBalance(GetBalance::new(
                id,
                Id::new(),
                [Hash([4; 32]), Hash([5; 32]), Hash([6; 32])],
                [new_nonce(), new_nonce(), new_nonce()],
            )),
            Layer::Confirm(Confirm::new(id, 7)),
            Layer::Delay(Delay::new(Duration::from_millis(250))),
            Layer::Diag(Diag::new(id)),
            Layer::HiddenService(HiddenService::sign(
                &IntroKey::generate(),
                id,
                addr,
                3455,
                10,
                1_700_000_000,
            )),
            Layer::IntroQuery(IntroQuery::new(id, [9; 32])),
            Layer::Response(Response::new(id, 3455, 1, b"response".to_vec())),
        ]
    }

    #[test]
    fn test_decode_inverts_encode() {
        for layer in samples() {
            let mut buf = layer.to_bytes().unwrap();
            assert_eq!(buf.len(), layer.len(), "{}", layer.name());

            let mut s = Splice::new(&mut buf);
            let decoded = peel(&mut s).unwrap();
            assert_eq!(decoded, layer, "{}", layer.name());
            assert_eq!(s.remaining(), 0, "{}", layer.name());
        }
    }

    #[test]
    fn test_len_counts_inner_layer() {
        let keys = Keys::generate();
        let mut outer = Layer::Forward(Forward::new("10.0.0.1:1".parse().unwrap()));
        let inner = Layer::Crypt(Crypt::new(keys.public, None, PrivKey::generate(), new_nonce()));
        let inner_len = inner.len();
        assert!(outer.set_inner(inner));

        assert_eq!(outer.len(), Forward::LEN + inner_len);
        assert_eq!(outer.to_bytes().unwrap().len(), outer.len());
    }

    #[test]
    fn test_terminals_refuse_inner() {
        let mut confirm = Layer::Confirm(Confirm::new(Id::new(), 0));
        assert!(confirm.is_terminal());
        assert!(!confirm.set_inner(Layer::NoOp));
        assert!(!Layer::Forward(Forward::new("10.0.0.1:1".parse().unwrap())).is_terminal());
    }

    #[test]
    fn test_magic_tags_are_unique() {
        let mut tags = vec![
            Crypt::MAGIC,
            Forward::MAGIC,
            Reverse::MAGIC,
            Exit::MAGIC,
            Session::MAGIC,
            Balance::MAGIC,
            GetBalance::MAGIC,
            Confirm::MAGIC,
            Delay::MAGIC,
            Diag::MAGIC,
            HiddenService::MAGIC,
            IntroQuery::MAGIC,
            Response::MAGIC,
        ];
        let count = tags.len();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), count);
    }

    #[test]
    fn test_unknown_magic() {
        let mut buf = b"zz-rest".to_vec();
        let mut s = Splice::new(&mut buf);
        assert_eq!(peel(&mut s), Err(Error::UnknownMagic(*b"zz")));
    }

    #[test]
    fn test_short_header_reports_exact_sizes() {
        // session magic followed by 10 of the 65 header bytes
        let mut buf = b"ss".to_vec();
        buf.extend_from_slice(&[0u8; 10]);
        let mut s = Splice::new(&mut buf);
        assert_eq!(
            peel(&mut s),
            Err(Error::TooShort {
                available: 10,
                required: Session::LEN - MAGIC_LEN,
                field: "session"
            })
        );
    }

    #[test]
    fn test_every_variant_rejects_truncation() {
        for layer in samples() {
            let full = layer.to_bytes().unwrap();
            let mut truncated = full[..full.len() - 1].to_vec();
            let mut s = Splice::new(&mut truncated);
            assert!(
                matches!(peel(&mut s), Err(Error::TooShort { .. })),
                "{}",
                layer.name()
            );
        }
    }
}
