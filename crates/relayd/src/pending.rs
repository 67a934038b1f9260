//! Pending-response ledger
//!
//! Every send that expects an answer is registered here under the id of the
//! onion's final layer. The matching Confirm, Response or Balance removes
//! the entry exactly once, then runs its callback and its deferred billing.

use onionpay_core::Id;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

/// Completion callback: correlation id and reply payload
pub type Callback = Box<dyn FnOnce(Id, Vec<u8>) + Send>;

/// Billing deferred until the reply size is known
pub type PostAcct = Box<dyn FnOnce(&Receipt) + Send>;

/// Sizes of a received reply
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Whole reply buffer as it arrived
    pub received: usize,
    /// Reply payload carried by the terminal layer
    pub payload: usize,
}

/// An outstanding send
pub struct PendingResponse {
    pub id: Id,
    pub sent: usize,
    /// Billable sessions in hop order
    pub billable: Vec<Id>,
    pub ret: Id,
    pub port: Option<u16>,
    pub created: Instant,
    callback: Callback,
    post: Vec<PostAcct>,
}

impl PendingResponse {
    pub fn new(
        id: Id,
        sent: usize,
        billable: Vec<Id>,
        ret: Id,
        port: Option<u16>,
        callback: Callback,
        post: Vec<PostAcct>,
    ) -> Self {
        Self {
            id,
            sent,
            billable,
            ret,
            port,
            created: Instant::now(),
            callback,
            post,
        }
    }

    /// Summary without the closures
    pub fn summary(&self) -> PendingSummary {
        PendingSummary {
            id: self.id,
            sent: self.sent,
            billable: self.billable.clone(),
            ret: self.ret,
            port: self.port,
            created: self.created,
        }
    }

    /// Run the callback, then every billing closure
    fn complete(self, payload: Vec<u8>, received: usize) {
        let receipt = Receipt {
            received,
            payload: payload.len(),
        };
        (self.callback)(self.id, payload);
        for post in self.post {
            post(&receipt);
        }
    }
}

/// Inspectable view of a [`PendingResponse`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingSummary {
    pub id: Id,
    pub sent: usize,
    pub billable: Vec<Id>,
    pub ret: Id,
    pub port: Option<u16>,
    pub created: Instant,
}

/// Outstanding sends keyed by correlation id
#[derive(Default)]
pub struct PendingResponses {
    inner: Mutex<HashMap<Id, PendingResponse>>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a send; false if the id is already outstanding
    pub fn add(&self, response: PendingResponse) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains_key(&response.id) {
            return false;
        }
        inner.insert(response.id, response);
        true
    }

    pub fn find(&self, id: &Id) -> Option<PendingSummary> {
        self.inner.lock().get(id).map(PendingResponse::summary)
    }

    /// Complete the send for `id`. The entry leaves the ledger before the
    /// callback runs, so a second delete for the same id finds nothing.
    pub fn delete(&self, id: &Id, payload: Vec<u8>, received: usize) -> bool {
        let Some(response) = self.take(id) else {
            debug!("No pending response for {}", id);
            return false;
        };
        response.complete(payload, received);
        true
    }

    /// Remove an entry without completing it
    pub fn take(&self, id: &Id) -> Option<PendingResponse> {
        self.inner.lock().remove(id)
    }

    /// Sends created before `cutoff`
    pub fn find_older(&self, cutoff: Instant) -> Vec<PendingSummary> {
        self.inner
            .lock()
            .values()
            .filter(|r| r.created < cutoff)
            .map(PendingResponse::summary)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
