//! Per-layer handlers
//!
//! `process` peels the outermost layer of a buffer and dispatches it. A
//! handler either finishes the message, hands it to the transport, or budges
//! the peeled bytes off and returns the rest with what it learned in `prev`
//! for the next round. A message gets at most [`MAX_PEEL_DEPTH`] rounds.
//!
//! Buffers keep their length on every hop: budging refills the tail with
//! noise, and replies are budged inside the routing header only.

use super::{Deferred, Engine, ExitReply, Prev};
use crate::error::{EngineError, Result};
use crate::session::{Cloaked, Session};
use onionpay_core::crypto::{encipher, encipher_all};
use onionpay_core::layer::{
    self, Balance, Confirm, Crypt, Delay, Diag, Exit, Forward, GetBalance, HiddenService,
    IntroQuery, Response, Reverse,
};
use onionpay_core::{
    budge_up, peel, Hash, Id, Layer, Nonce, Splice, REVERSE_HEADER_LEN, REVERSE_HOPS,
    REVERSE_PAIR_LEN, RETURN_HOP,
};
use tracing::{debug, info, trace, warn};

/// Layers one relay may peel from a single message. A purchase onion's
/// final hop peels the most, well under this.
const MAX_PEEL_DEPTH: usize = 32;

/// What is left of a message after one layer, if anything
type Next = Option<(Vec<u8>, Option<Prev>)>;

impl Engine {
    /// Peel and dispatch layers until a handler finishes the message. `prev`
    /// is `None` for bytes that just arrived from the network.
    pub(super) fn process(&self, buf: Vec<u8>, prev: Option<Prev>) -> Result<()> {
        let mut next = Some((buf, prev));
        for _ in 0..MAX_PEEL_DEPTH {
            let Some((buf, prev)) = next else {
                return Ok(());
            };
            next = self.peel_one(buf, prev)?;
        }
        match next {
            None => Ok(()),
            Some(_) => Err(EngineError::MalformedSequence("too many layers")),
        }
    }

    fn peel_one(&self, mut buf: Vec<u8>, prev: Option<Prev>) -> Result<Next> {
        let (layer, consumed) = {
            let mut s = Splice::new(&mut buf);
            let layer = peel(&mut s)?;
            (layer, s.cursor())
        };
        self.stats.write().layers_peeled += 1;
        trace!("Peeled {} ({} of {} bytes)", layer.name(), consumed, buf.len());

        match (&prev, &layer) {
            (None, Layer::Crypt(_) | Layer::Forward(_) | Layer::Reverse(_)) => {}
            (None, other) => return Err(EngineError::Unsolicited(other.name())),
            (Some(Prev::Identity), Layer::Session(_)) => {}
            (Some(Prev::Identity), _) => {
                return Err(EngineError::MalformedSequence(
                    "identity key opened something other than a session",
                ))
            }
            _ => {}
        }

        match layer {
            Layer::Crypt(cr) => self.on_crypt(cr, buf, consumed),
            Layer::Forward(fw) => self.on_forward(fw, buf, consumed, prev),
            Layer::Session(ss) => self.on_session(ss, buf, consumed),
            Layer::Diag(dg) => self.on_diag(dg, buf, consumed, prev),
            Layer::Reverse(rv) => self.on_reverse(rv, buf, consumed).map(|_| None),
            Layer::Exit(ex) => self.on_exit(ex, buf, consumed, prev).map(|_| None),
            Layer::Balance(ba) => self.on_balance(ba, buf.len()).map(|_| None),
            Layer::GetBalance(gb) => self
                .on_get_balance(gb, buf, consumed, prev)
                .map(|_| None),
            Layer::Confirm(cf) => self.on_confirm(cf, buf.len()).map(|_| None),
            Layer::Delay(dl) => self.on_delay(dl, buf, consumed, prev).map(|_| None),
            Layer::HiddenService(hs) => self.on_hidden_service(hs).map(|_| None),
            Layer::IntroQuery(iq) => self.on_intro_query(iq).map(|_| None),
            Layer::Response(r) => self.on_response(r, buf.len()).map(|_| None),
            Layer::NoOp => Ok(None),
        }
    }

    /// Debit a session for work done on its behalf. The local return
    /// session is never billed.
    fn bill(&self, session: &Session, amount: u64) -> Result<()> {
        if self.sessions.is_return_session(&session.id) {
            return Ok(());
        }
        if !self.sessions.dec_session(&session.id, amount) {
            return Err(EngineError::InsufficientCredit(session.id));
        }
        trace!("Billed {} to session {}", amount, session.id);
        Ok(())
    }

    fn relay_cost(&self, len: usize) -> u64 {
        self.local.relay_rate.saturating_mul(len as u64)
    }

    // =========================================================================
    // FORWARD PATH
    // =========================================================================

    fn on_crypt(&self, cr: Crypt, mut buf: Vec<u8>, consumed: usize) -> Result<Next> {
        let (key, prev) = match self
            .sessions
            .find_cloaked(&cr.cloak)
            .ok_or(EngineError::NoMatchingKey)?
        {
            Cloaked::Identity(key) => (key, Prev::Identity),
            Cloaked::Session(session) => (session.header.private.clone(), Prev::Session(session)),
        };
        let cipher = key.cipher_with(&cr.from)?;
        encipher(&cipher, &cr.nonce, &mut buf[consumed..]);
        budge_up(&mut buf, consumed);
        Ok(Some((buf, Some(prev))))
    }

    fn on_forward(
        &self,
        fw: Forward,
        mut buf: Vec<u8>,
        consumed: usize,
        prev: Option<Prev>,
    ) -> Result<Next> {
        if fw.addr == self.local.addr {
            budge_up(&mut buf, consumed);
            return Ok(Some((buf, prev)));
        }

        match &prev {
            Some(Prev::Session(session)) => self.bill(session, self.relay_cost(buf.len()))?,
            Some(Prev::Purchased) => {}
            _ => return Err(EngineError::Unsolicited("forward without a session")),
        }

        budge_up(&mut buf, consumed);
        debug!("Forwarding {} bytes to {}", buf.len(), fw.addr);
        self.transport.send(fw.addr, buf)?;
        self.stats.write().forwarded += 1;
        Ok(None)
    }

    /// Create the session a payment was held for. Only circuit positions
    /// can be sold; the return position belongs to the buyer.
    fn on_session(&self, ss: layer::Session, mut buf: Vec<u8>, consumed: usize) -> Result<Next> {
        if ss.hop >= RETURN_HOP {
            return Err(EngineError::MalformedSequence("session hop outside the circuit"));
        }
        let preimage = ss.preimage();
        let payment = self
            .sessions
            .delete_pending_payment(&preimage)
            .ok_or(EngineError::NoPendingPayment(preimage))?;

        let session = Session::new(
            payment.id,
            self.local.clone(),
            ss.hop,
            ss.header,
            ss.payload,
            payment.amount,
        );
        info!(
            "Sold session {} at hop {} for {}",
            session.id, session.hop, session.remaining
        );
        self.sessions.add_session(session);
        self.stats.write().sessions_created += 1;

        budge_up(&mut buf, consumed);
        Ok(Some((buf, Some(Prev::Purchased))))
    }

    fn on_delay(
        &self,
        dl: Delay,
        mut buf: Vec<u8>,
        consumed: usize,
        prev: Option<Prev>,
    ) -> Result<()> {
        if dl.duration > self.config.max_delay {
            return Err(EngineError::MalformedSequence("delay beyond the relay's limit"));
        }
        // TODO: bill the holding session once a per-millisecond hold price is agreed
        budge_up(&mut buf, consumed);
        debug!("Holding {} bytes for {:?}", buf.len(), dl.duration);
        let deferred = self.deferred_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(dl.duration).await;
            let _ = deferred.send(Deferred::Inject { buf, prev });
        });
        Ok(())
    }

    fn on_diag(
        &self,
        dg: Diag,
        mut buf: Vec<u8>,
        consumed: usize,
        prev: Option<Prev>,
    ) -> Result<Next> {
        info!("Diagnostic {} passed {}", dg.id, self.local.addr);
        self.stats.write().diagnostics += 1;
        budge_up(&mut buf, consumed);
        Ok(Some((buf, prev)))
    }

    // =========================================================================
    // EXIT
    // =========================================================================

    /// Call the local service off-loop; the reply comes back as deferred work
    fn on_exit(&self, ex: Exit, buf: Vec<u8>, consumed: usize, prev: Option<Prev>) -> Result<()> {
        let Some(Prev::Session(session)) = prev else {
            return Err(EngineError::MalformedSequence("exit without a session"));
        };
        let link = self
            .services
            .read()
            .get(&ex.port)
            .cloned()
            .ok_or(EngineError::NoService(ex.port))?;
        let rate = self.local.service_rate(ex.port).unwrap_or(0);
        let header = routing_header(&buf, consumed)?;

        let Exit {
            port,
            ciphers,
            nonces,
            id,
            payload,
            ..
        } = ex;
        let request = payload.len();
        let timeout = self.config.exit_timeout;
        let deferred = self.deferred_tx.clone();

        tokio::spawn(async move {
            let reply = match tokio::time::timeout(timeout, link.call(payload)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    warn!("Service on port {} failed: {}", port, e);
                    Vec::new()
                }
                Err(_) => {
                    warn!("Service on port {} timed out after {:?}", port, timeout);
                    Vec::new()
                }
            };
            let _ = deferred.send(Deferred::ExitReply(Box::new(ExitReply {
                session,
                rate,
                port,
                id,
                request,
                ciphers,
                nonces,
                header,
                reply,
            })));
        });
        Ok(())
    }

    /// Bill the exit session for the service and send the reply back
    pub(super) fn on_exit_reply(&self, r: ExitReply) -> Result<()> {
        let units = r.request / 2 + r.reply.len() / 2;
        self.bill(&r.session, r.rate.saturating_mul(units as u64))?;

        let response = Layer::Response(Response::new(r.id, r.port, self.load(), r.reply));
        self.send_reply(r.header, &response, &r.ciphers, &r.nonces)?;
        self.stats.write().exits_served += 1;
        Ok(())
    }

    fn on_get_balance(
        &self,
        gb: GetBalance,
        buf: Vec<u8>,
        consumed: usize,
        prev: Option<Prev>,
    ) -> Result<()> {
        let Some(Prev::Session(_)) = prev else {
            return Err(EngineError::MalformedSequence("balance query without a session"));
        };
        let session = self
            .sessions
            .find(&gb.id)
            .filter(|s| s.node.id == self.local.id)
            .ok_or(EngineError::UnknownSession(gb.id))?;

        let header = routing_header(&buf, consumed)?;
        let balance = Layer::Balance(Balance::new(gb.id, gb.conf_id, session.remaining));
        self.send_reply(header, &balance, &gb.ciphers, &gb.nonces)
    }

    /// Append `reply` to a routing header, encipher it for every reverse hop
    /// and send it to the first one
    fn send_reply(
        &self,
        header: Vec<u8>,
        reply: &Layer,
        ciphers: &[Hash; REVERSE_HOPS],
        nonces: &[Nonce; REVERSE_HOPS],
    ) -> Result<()> {
        let mut buf = header;
        buf.extend_from_slice(&reply.to_bytes()?);
        encipher_all(ciphers, nonces, &mut buf[REVERSE_HEADER_LEN..]);

        let next = next_reverse(&mut buf)?;
        debug!("Replying {} bytes via {}", buf.len(), next);
        self.transport.send(next, buf)?;
        Ok(())
    }

    /// Load hint carried in responses
    fn load(&self) -> u8 {
        self.pending.len().min(u8::MAX as usize) as u8
    }

    // =========================================================================
    // REPLY PATH
    // =========================================================================

    fn on_reverse(&self, rv: Reverse, mut buf: Vec<u8>, consumed: usize) -> Result<()> {
        if rv.addr != self.local.addr {
            return Err(EngineError::MalformedSequence("reverse addressed to another relay"));
        }
        if buf.len() < REVERSE_HEADER_LEN {
            return Err(EngineError::MalformedSequence("reply shorter than its routing header"));
        }

        let (cr, crypt_end) = {
            let mut s = Splice::at(&mut buf, consumed);
            match peel(&mut s)? {
                Layer::Crypt(cr) => (cr, s.cursor()),
                _ => return Err(EngineError::MalformedSequence("reverse not followed by crypt")),
            }
        };
        let session = match self
            .sessions
            .find_cloaked(&cr.cloak)
            .ok_or(EngineError::NoMatchingKey)?
        {
            Cloaked::Session(session) => session,
            Cloaked::Identity(_) => {
                return Err(EngineError::MalformedSequence("reply encrypted to identity key"))
            }
        };

        let header = session.header.private.cipher_with(&cr.from)?;
        let payload = session.payload.private.cipher_with(&cr.from)?;
        encipher(&header, &cr.nonce, &mut buf[crypt_end..REVERSE_HEADER_LEN]);
        encipher(&payload, &cr.nonce, &mut buf[REVERSE_HEADER_LEN..]);

        if self.sessions.is_return_session(&session.id) {
            let received = buf.len();
            let mut s = Splice::at(&mut buf, REVERSE_HEADER_LEN);
            return match peel(&mut s)? {
                Layer::Response(r) => self.on_response(r, received),
                Layer::Balance(ba) => self.on_balance(ba, received),
                _ => Err(EngineError::MalformedSequence("reply carries no response")),
            };
        }

        self.bill(&session, self.relay_cost(buf.len()))?;
        budge_up(&mut buf[..REVERSE_HEADER_LEN], REVERSE_PAIR_LEN);
        let next = next_reverse(&mut buf)?;
        debug!("Relaying {} byte reply to {}", buf.len(), next);
        self.transport.send(next, buf)?;
        self.stats.write().replies_relayed += 1;
        Ok(())
    }

    fn on_confirm(&self, cf: Confirm, received: usize) -> Result<()> {
        if !self.pending.delete(&cf.id, Vec::new(), received) {
            return Err(EngineError::NoPendingResponse(cf.id));
        }
        debug!("Confirmed {}", cf.id);
        self.stats.write().responses_matched += 1;
        Ok(())
    }

    fn on_response(&self, r: Response, received: usize) -> Result<()> {
        self.record_success(&r.id)?;
        debug!("Response {} from port {} ({} bytes)", r.id, r.port, r.payload.len());
        self.pending.delete(&r.id, r.payload, received);
        self.stats.write().responses_matched += 1;
        Ok(())
    }

    /// Take the relay's figure for a session's balance
    fn on_balance(&self, ba: Balance, received: usize) -> Result<()> {
        self.record_success(&ba.conf_id)?;
        if !self.sessions.set_remaining(&ba.id, ba.amount) {
            debug!("Balance for unknown session {}", ba.id);
        }
        self.pending
            .delete(&ba.conf_id, ba.amount.to_le_bytes().to_vec(), received);
        self.stats.write().responses_matched += 1;
        Ok(())
    }

    /// Clear the failure count of every node on an answered send's path
    fn record_success(&self, id: &Id) -> Result<()> {
        let pending = self
            .pending
            .find(id)
            .ok_or(EngineError::NoPendingResponse(*id))?;
        for session in pending.billable.iter().filter_map(|s| self.sessions.find(s)) {
            session.node.record_success();
        }
        Ok(())
    }

    // =========================================================================
    // INTRODUCTIONS
    // =========================================================================

    fn on_hidden_service(&self, hs: HiddenService) -> Result<()> {
        hs.verify()?;
        if hs.expiry <= super::unix_now() {
            return Err(EngineError::IntroExpired);
        }
        info!(
            "Introduction {} for port {} at {}",
            hs.id, hs.port, hs.addr
        );
        self.intros.add(hs);
        Ok(())
    }

    fn on_intro_query(&self, iq: IntroQuery) -> Result<()> {
        match self.intros.find(&iq.key) {
            Some(hs) => info!("Query {}: service at {} port {}", iq.id, hs.addr, hs.port),
            None => info!("Query {}: no introduction held", iq.id),
        }
        Ok(())
    }
}

/// Copy the routing header that follows a layer ending at `consumed`
fn routing_header(buf: &[u8], consumed: usize) -> Result<Vec<u8>> {
    buf.get(consumed..consumed + REVERSE_HEADER_LEN)
        .map(<[u8]>::to_vec)
        .ok_or(EngineError::MalformedSequence("no routing header after request"))
}

/// Address of the Reverse layer at the front of a reply
fn next_reverse(buf: &mut [u8]) -> Result<std::net::SocketAddr> {
    match peel(&mut Splice::new(buf))? {
        Layer::Reverse(rv) => Ok(rv.addr),
        _ => Err(EngineError::MalformedSequence("routing header does not start with reverse")),
    }
}
