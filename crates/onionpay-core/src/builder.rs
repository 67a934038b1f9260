//! Onion construction
//!
//! A [`Builder`] is an append-only list of layers, outermost first.
//! [`Builder::assemble`] folds the list from the back so each layer becomes
//! the inner of the one before it.

use crate::crypto::{gen_ciphers, PrivKey, PubKey};
use crate::error::{Error, Result};
use crate::layer::*;
use crate::types::*;
use std::net::SocketAddr;
use std::time::Duration;

/// One relay on a reply path
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnHop {
    pub addr: SocketAddr,
    /// Session header public key at that relay
    pub header: PubKey,
    /// Session payload public key at that relay
    pub payload: PubKey,
}

/// Ephemeral key material for a three-hop reply path.
///
/// The same keys produce the routing header and the reply ciphers handed to
/// the exit, so they must come from one `ReplyPath`.
#[derive(Clone, Debug)]
pub struct ReplyPath {
    pub hops: [ReturnHop; REVERSE_HOPS],
    from: [PrivKey; REVERSE_HOPS],
    nonces: [Nonce; REVERSE_HOPS],
}

impl ReplyPath {
    pub fn new(hops: [ReturnHop; REVERSE_HOPS]) -> Self {
        Self {
            hops,
            from: [PrivKey::generate(), PrivKey::generate(), PrivKey::generate()],
            nonces: [new_nonce(), new_nonce(), new_nonce()],
        }
    }

    /// Ciphers the exit applies to the reply, one per reverse hop
    pub fn ciphers(&self) -> Result<[Hash; REVERSE_HOPS]> {
        let payload_keys = [
            self.hops[0].payload,
            self.hops[1].payload,
            self.hops[2].payload,
        ];
        gen_ciphers(&self.from, &payload_keys)
    }

    pub fn nonces(&self) -> [Nonce; REVERSE_HOPS] {
        self.nonces
    }
}

/// Append-only onion builder
#[derive(Clone, Debug, Default)]
pub struct Builder {
    layers: Vec<Layer>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers pushed so far, outermost first
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Push any layer
    pub fn push(&mut self, layer: Layer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn crypt(
        &mut self,
        to_header: PubKey,
        to_payload: Option<PubKey>,
        from: PrivKey,
        nonce: Nonce,
    ) -> &mut Self {
        self.push(Layer::Crypt(Crypt::new(to_header, to_payload, from, nonce)))
    }

    pub fn forward(&mut self, addr: SocketAddr) -> &mut Self {
        self.push(Layer::Forward(Forward::new(addr)))
    }

    pub fn reverse(&mut self, addr: SocketAddr) -> &mut Self {
        self.push(Layer::Reverse(Reverse::new(addr)))
    }

    pub fn exit(
        &mut self,
        port: u16,
        ciphers: [Hash; REVERSE_HOPS],
        nonces: [Nonce; REVERSE_HOPS],
        id: Id,
        payload: Vec<u8>,
    ) -> &mut Self {
        self.push(Layer::Exit(Exit::new(port, ciphers, nonces, id, payload)))
    }

    pub fn session(&mut self, hop: u8, header: PrivKey, payload: PrivKey) -> &mut Self {
        self.push(Layer::Session(Session::new(hop, header, payload)))
    }

    pub fn balance(&mut self, id: Id, conf_id: Id, amount: u64) -> &mut Self {
        self.push(Layer::Balance(Balance::new(id, conf_id, amount)))
    }

    pub fn get_balance(
        &mut self,
        id: Id,
        conf_id: Id,
        ciphers: [Hash; REVERSE_HOPS],
        nonces: [Nonce; REVERSE_HOPS],
    ) -> &mut Self {
        self.push(Layer::GetBalance(GetBalance::new(id, conf_id, ciphers, nonces)))
    }

    pub fn confirm(&mut self, id: Id, load: u8) -> &mut Self {
        self.push(Layer::Confirm(Confirm::new(id, load)))
    }

    pub fn delay(&mut self, duration: Duration) -> &mut Self {
        self.push(Layer::Delay(Delay::new(duration)))
    }

    pub fn diag(&mut self, id: Id) -> &mut Self {
        self.push(Layer::Diag(Diag::new(id)))
    }

    pub fn hidden_service(&mut self, intro: HiddenService) -> &mut Self {
        self.push(Layer::HiddenService(intro))
    }

    pub fn intro_query(&mut self, id: Id, key: [u8; KEY_LEN]) -> &mut Self {
        self.push(Layer::IntroQuery(IntroQuery::new(id, key)))
    }

    pub fn response(&mut self, id: Id, port: u16, load: u8, payload: Vec<u8>) -> &mut Self {
        self.push(Layer::Response(Response::new(id, port, load, payload)))
    }

    /// Forward to `addr`, then encrypt for the session header key there
    pub fn forward_crypt(&mut self, addr: SocketAddr, to_header: PubKey) -> &mut Self {
        self.forward(addr)
            .crypt(to_header, None, PrivKey::generate(), new_nonce())
    }

    /// Reverse to `hop`, then encrypt for its header and payload keys
    pub fn reverse_crypt(&mut self, hop: &ReturnHop, from: PrivKey, nonce: Nonce) -> &mut Self {
        self.reverse(hop.addr)
            .crypt(hop.header, Some(hop.payload), from, nonce)
    }

    /// The three Reverse+Crypt pairs of a reply path
    pub fn routing_header(&mut self, path: &ReplyPath) -> &mut Self {
        for i in 0..REVERSE_HOPS {
            self.reverse_crypt(&path.hops[i], path.from[i].clone(), path.nonces[i]);
        }
        self
    }

    /// Nest the layers, last pushed innermost
    pub fn assemble(&self) -> Result<Layer> {
        let mut onion = Layer::NoOp;
        for layer in self.layers.iter().rev() {
            let mut layer = layer.clone();
            if !onion.is_empty() && !layer.set_inner(onion) {
                return Err(Error::MalformedHeader("terminal layer before end of onion"));
            }
            onion = layer;
        }
        Ok(onion)
    }

    /// Assemble and encode
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.assemble()?.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{budge_up, Splice};
    use crate::crypto::{encipher, encipher_all, Keys};

    fn hop(port: u16) -> (ReturnHop, Keys, Keys) {
        let header = Keys::generate();
        let payload = Keys::generate();
        let hop = ReturnHop {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            header: header.public,
            payload: payload.public,
        };
        (hop, header, payload)
    }

    #[test]
    fn test_assemble_nests_in_order() {
        let id = Id::new();
        let addr: SocketAddr = "10.0.0.2:9".parse().unwrap();
        let mut b = Builder::new();
        b.forward(addr).diag(id).confirm(id, 0);
        assert_eq!(b.layers().len(), 3);

        let onion = b.assemble().unwrap();
        let Layer::Forward(fw) = &onion else {
            panic!("expected forward");
        };
        assert_eq!(fw.addr, addr);
        let Layer::Diag(diag) = fw.inner.as_ref() else {
            panic!("expected diag");
        };
        assert_eq!(*diag.inner, Layer::Confirm(Confirm::new(id, 0)));
        assert_eq!(onion.len(), Forward::LEN + Diag::LEN + Confirm::LEN);
    }

    #[test]
    fn test_terminal_in_the_middle_is_rejected() {
        let mut b = Builder::new();
        b.confirm(Id::new(), 0).forward("10.0.0.2:9".parse().unwrap());
        assert!(matches!(b.assemble(), Err(Error::MalformedHeader(_))));
    }

    #[test]
    fn test_routing_header_has_fixed_length() {
        let path = ReplyPath::new([hop(1).0, hop(2).0, hop(3).0]);
        let mut b = Builder::new();
        b.routing_header(&path);
        assert_eq!(b.to_bytes().unwrap().len(), REVERSE_HEADER_LEN);
    }

    /// Walk a reply through its three hops by hand and check each relay can
    /// read its Reverse and the reply comes out clean.
    #[test]
    fn test_reply_path_unwraps_hop_by_hop() {
        let hops = [hop(1), hop(2), hop(3)];
        let path = ReplyPath::new([hops[0].0.clone(), hops[1].0.clone(), hops[2].0.clone()]);

        let mut header = Builder::new();
        header.routing_header(&path);
        let mut buf = header.to_bytes().unwrap();

        let id = Id::new();
        let mut reply = Layer::Response(Response::new(id, 3455, 0, b"pong".to_vec()))
            .to_bytes()
            .unwrap();
        encipher_all(&path.ciphers().unwrap(), &path.nonces(), &mut reply);
        buf.extend_from_slice(&reply);

        for (i, (expected, header_keys, payload_keys)) in hops.iter().enumerate() {
            let mut s = Splice::new(&mut buf);
            let Layer::Reverse(rv) = peel(&mut s).unwrap() else {
                panic!("hop {i}: expected reverse");
            };
            assert_eq!(rv.addr, expected.addr);
            let Layer::Crypt(cr) = peel(&mut s).unwrap() else {
                panic!("hop {i}: expected crypt");
            };
            assert!(cr.cloak.matches(&header_keys.public));

            let start = s.cursor();
            let header_cipher = header_keys.private.cipher_with(&cr.from).unwrap();
            let payload_cipher = payload_keys.private.cipher_with(&cr.from).unwrap();
            encipher(&header_cipher, &cr.nonce, s.range_mut(start, REVERSE_HEADER_LEN).unwrap());
            encipher(&payload_cipher, &cr.nonce, s.tail_mut(REVERSE_HEADER_LEN));

            budge_up(&mut buf[..REVERSE_HEADER_LEN], REVERSE_PAIR_LEN);
        }

        let mut s = Splice::at(&mut buf, REVERSE_HEADER_LEN);
        assert_eq!(
            peel(&mut s).unwrap(),
            Layer::Response(Response::new(id, 3455, 0, b"pong".to_vec()))
        );
    }
}
