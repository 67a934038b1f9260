//! Sends started by the local client

use super::Engine;
use crate::error::{EngineError, Result};
use crate::onions::{self, Purchase};
use crate::pending::{Callback, PendingResponse, PostAcct, Receipt};
use crate::session::{Circuit, Session};
use onionpay_core::crypto::{preimage_hash, PrivKey};
use onionpay_core::{Id, Layer, CIRCUIT_LEN};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

impl Engine {
    /// Buy a session worth `amount` on each of five fresh relays.
    ///
    /// Every relay is paid and must acknowledge before the purchase onion
    /// leaves. `hook` receives the sessions, in hop order, once the onion's
    /// Confirm comes back; they are already registered by then.
    pub async fn buy_new_sessions<F>(&self, amount: u64, hook: F) -> Result<Id>
    where
        F: FnOnce(Vec<Session>) + Send + 'static,
    {
        let mut nodes = Vec::with_capacity(CIRCUIT_LEN);
        for (hop, node) in self.sessions.select_unused_circuit().into_iter().enumerate() {
            nodes.push(node.ok_or(EngineError::NoCircuit(hop))?);
        }

        let mut purchases = Vec::with_capacity(CIRCUIT_LEN);
        let mut acks = Vec::with_capacity(CIRCUIT_LEN);
        let mut ids = Vec::with_capacity(CIRCUIT_LEN);
        for node in &nodes {
            let header = PrivKey::generate();
            let payload = PrivKey::generate();
            let id = Id::new();
            let ack = self
                .payer
                .pay(node, id, preimage_hash(&header, &payload), amount)?;
            acks.push((node.id, ack));
            ids.push(id);
            purchases.push(Purchase {
                addr: node.addr,
                identity: node.identity,
                header,
                payload,
            });
        }

        for (node, ack) in acks {
            match timeout(self.config.payment_timeout, ack).await {
                Ok(Ok(true)) => {}
                _ => return Err(EngineError::PaymentRefused(node)),
            }
        }

        let purchases: [Purchase; CIRCUIT_LEN] = purchases
            .try_into()
            .map_err(|_| EngineError::NoCircuit(CIRCUIT_LEN))?;
        let ret = self.sessions.return_session();
        let conf = Id::new();
        let bytes = onions::purchase(&purchases, self.local.addr, &ret, conf).to_bytes()?;

        let sessions: Vec<Session> = purchases
            .into_iter()
            .zip(nodes.iter().zip(ids))
            .enumerate()
            .map(|(hop, (p, (node, id)))| {
                Session::new(id, node.clone(), hop as u8, p.header, p.payload, amount)
            })
            .collect();
        let manager = Arc::clone(&self.sessions);
        let callback: Callback = Box::new(move |_: Id, _: Vec<u8>| {
            for session in &sessions {
                manager.add_session(session.clone());
            }
            hook(sessions);
        });

        let added = self.pending.add(PendingResponse::new(
            conf,
            bytes.len(),
            Vec::new(),
            ret.id,
            None,
            callback,
            Vec::new(),
        ));
        if !added {
            return Err(EngineError::DuplicateSend(conf));
        }
        info!("Buying sessions worth {} through {}", amount, nodes[0].addr);
        self.transport.send(nodes[0].addr, bytes)?;
        Ok(conf)
    }

    /// Send `payload` to the service on `port` behind the relay holding
    /// `exit`. `hook` receives the correlation id and the service reply.
    pub fn send_exit<F>(&self, port: u16, payload: Vec<u8>, exit: &Session, hook: F) -> Result<Id>
    where
        F: FnOnce(Id, Vec<u8>) + Send + 'static,
    {
        let circuit = self.circuit_through(exit)?;
        let id = Id::new();
        let request = payload.len();
        let onion = onions::exit(&circuit, port, payload, id)?;
        let bytes = onion.to_bytes()?;
        let post = self.post_acct_onion(onion.layers(), bytes.len(), request);

        self.dispatch(id, bytes, &circuit, Some(port), Box::new(hook), post)?;
        Ok(id)
    }

    /// Ask the relay holding `target` for its remaining credit. `hook`
    /// receives the relay's figure, which also replaces the local one.
    pub fn send_get_balance<F>(&self, target: &Session, hook: F) -> Result<Id>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let circuit = self.circuit_through(target)?;
        let conf = Id::new();
        let onion = onions::get_balance(&circuit, conf)?;
        let bytes = onion.to_bytes()?;
        let post = self.post_acct_onion(onion.layers(), bytes.len(), 0);

        let callback: Callback = Box::new(move |_: Id, reply: Vec<u8>| {
            let amount = <[u8; 8]>::try_from(reply.as_slice())
                .map(u64::from_le_bytes)
                .unwrap_or(0);
            hook(amount);
        });
        self.dispatch(conf, bytes, &circuit, None, callback, post)?;
        Ok(conf)
    }

    /// Circuit with `session` at hop 2
    pub(super) fn circuit_through(&self, session: &Session) -> Result<Circuit> {
        let mut preset = [None; CIRCUIT_LEN];
        preset[2] = Some(session.id);
        self.sessions.select_hops(preset)
    }

    /// Register the send under `id`, then hand the onion to the first hop
    pub(super) fn dispatch(
        &self,
        id: Id,
        bytes: Vec<u8>,
        circuit: &Circuit,
        port: Option<u16>,
        callback: Callback,
        post: Vec<PostAcct>,
    ) -> Result<()> {
        let first = circuit.hops[0].node.addr;
        let added = self.pending.add(PendingResponse::new(
            id,
            bytes.len(),
            circuit.billable(),
            circuit.ret.id,
            port,
            callback,
            post,
        ));
        if !added {
            return Err(EngineError::DuplicateSend(id));
        }
        debug!("Sending {} ({} bytes) via {}", id, bytes.len(), first);
        self.transport.send(first, bytes)?;
        Ok(())
    }

    /// Plan the debits the relays on an onion's path will make, so the local
    /// copies of the sessions track them. Each Crypt names the paying session
    /// and the layer after it names the work:
    ///
    /// - Forward: relay rate × bytes sent
    /// - Reverse: relay rate × bytes received
    /// - Exit: service rate × (request/2 + reply/2)
    ///
    /// Debits run when the reply arrives, after the callback.
    pub(crate) fn post_acct_onion(
        &self,
        layers: &[Layer],
        sent: usize,
        request: usize,
    ) -> Vec<PostAcct> {
        let mut post: Vec<PostAcct> = Vec::new();
        for (i, layer) in layers.iter().enumerate() {
            let Layer::Crypt(cr) = layer else {
                continue;
            };
            let Some(session) = cr.to_header().and_then(|k| self.sessions.find_by_header(k)) else {
                continue;
            };
            if session.node.id == self.local.id {
                continue;
            }

            let id = session.id;
            let manager = Arc::clone(&self.sessions);
            let debit = move |amount: u64| {
                if !manager.dec_session(&id, amount) {
                    warn!("Session {} cannot cover {}", id, amount);
                }
            };
            let relay_rate = session.node.relay_rate;
            match layers.get(i + 1) {
                Some(Layer::Forward(_)) => {
                    let amount = relay_rate.saturating_mul(sent as u64);
                    post.push(Box::new(move |_: &Receipt| debit(amount)));
                }
                Some(Layer::Reverse(_)) => {
                    post.push(Box::new(move |r: &Receipt| {
                        debit(relay_rate.saturating_mul(r.received as u64))
                    }));
                }
                Some(Layer::Exit(ex)) => {
                    let rate = session.node.service_rate(ex.port).unwrap_or(0);
                    post.push(Box::new(move |r: &Receipt| {
                        debit(rate.saturating_mul((request / 2 + r.payload / 2) as u64))
                    }));
                }
                _ => {}
            }
        }
        post
    }
}
