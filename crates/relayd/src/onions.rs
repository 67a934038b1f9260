//! Onion recipes
//!
//! Each recipe lays out the layer sequence for one kind of send. The engine
//! encodes the builder and walks `Builder::layers` to plan its billing.
//!
//! ```text
//! purchase:  Cr(id0) Ss0 Fw Cr(id1) Ss1 ... Fw(self) Cr(ret) Cf
//! exit:      Cr0 Fw Cr1 Fw Cr2 Ex [Rv Cr3 Rv Cr4 Rv Crr]
//! balance:   Cr0 Fw Cr1 Fw Cr2 Gb [Rv Cr3 Rv Cr4 Rv Crr]
//! ```

use crate::session::{Circuit, Session};
use onionpay_core::crypto::{PrivKey, PubKey};
use onionpay_core::{new_nonce, Builder, Id, Result, CIRCUIT_LEN};
use std::net::SocketAddr;

/// Keys delivered to one relay in a purchase onion
#[derive(Clone, Debug)]
pub struct Purchase {
    pub addr: SocketAddr,
    pub identity: PubKey,
    pub header: PrivKey,
    pub payload: PrivKey,
}

/// Deliver session keys to five relays in turn, then confirm back to the
/// return session on this relay
pub fn purchase(
    hops: &[Purchase; CIRCUIT_LEN],
    local: SocketAddr,
    ret: &Session,
    conf: Id,
) -> Builder {
    let mut b = Builder::new();
    for (i, hop) in hops.iter().enumerate() {
        if i > 0 {
            b.forward(hop.addr);
        }
        b.crypt(hop.identity, None, PrivKey::generate(), new_nonce())
            .session(i as u8, hop.header.clone(), hop.payload.clone());
    }
    b.forward_crypt(local, ret.header.public).confirm(conf, 0);
    b
}

/// First three hops of a circuit, ending encrypted for hop 2
fn forward_leg(circuit: &Circuit) -> Builder {
    let hops = &circuit.hops;
    let mut b = Builder::new();
    b.crypt(hops[0].header.public, None, PrivKey::generate(), new_nonce())
        .forward_crypt(hops[1].node.addr, hops[1].header.public)
        .forward_crypt(hops[2].node.addr, hops[2].header.public);
    b
}

/// Request to the service on `port` behind hop 2, answered along hops 3,
/// 4 and the return session
pub fn exit(circuit: &Circuit, port: u16, payload: Vec<u8>, id: Id) -> Result<Builder> {
    let path = circuit.reply_path();
    let mut b = forward_leg(circuit);
    b.exit(port, path.ciphers()?, path.nonces(), id, payload)
        .routing_header(&path);
    Ok(b)
}

/// Balance query for the session at hop 2
pub fn get_balance(circuit: &Circuit, conf: Id) -> Result<Builder> {
    let path = circuit.reply_path();
    let mut b = forward_leg(circuit);
    b.get_balance(circuit.hops[2].id, conf, path.ciphers()?, path.nonces())
        .routing_header(&path);
    Ok(b)
}
