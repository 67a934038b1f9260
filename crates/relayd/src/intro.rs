//! Hidden service introductions

use onionpay_core::layer::HiddenService;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Verified introductions keyed by service key
#[derive(Default)]
pub struct Introductions {
    intros: RwLock<HashMap<[u8; 32], HiddenService>>,
}

impl Introductions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an introduction unless a later-expiring one is already held.
    /// The caller verifies the signature.
    pub fn add(&self, intro: HiddenService) -> bool {
        let mut intros = self.intros.write();
        if let Some(existing) = intros.get(&intro.key) {
            if existing.expiry >= intro.expiry {
                return false;
            }
        }
        debug!("Introduction for {} via {}", hex::encode(&intro.key[..8]), intro.addr);
        intros.insert(intro.key, intro);
        true
    }

    pub fn find(&self, key: &[u8; 32]) -> Option<HiddenService> {
        self.intros.read().get(key).cloned()
    }

    /// Drop introductions expired at `now` (unix seconds)
    pub fn prune(&self, now: u64) -> usize {
        let mut intros = self.intros.write();
        let before = intros.len();
        intros.retain(|_, i| i.expiry > now);
        before - intros.len()
    }

    pub fn len(&self) -> usize {
        self.intros.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.intros.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onionpay_core::crypto::IntroKey;
    use onionpay_core::Id;

    fn intro(key: &IntroKey, expiry: u64) -> HiddenService {
        HiddenService::sign(key, Id::new(), "127.0.0.1:7000".parse().unwrap(), 80, 1, expiry)
    }

    #[test]
    fn test_later_expiry_wins() {
        let intros = Introductions::new();
        let key = IntroKey::generate();

        assert!(intros.add(intro(&key, 100)));
        assert!(!intros.add(intro(&key, 50)));
        assert!(intros.add(intro(&key, 200)));
        assert_eq!(intros.find(&key.public_key()).unwrap().expiry, 200);
        assert_eq!(intros.len(), 1);
    }

    #[test]
    fn test_prune() {
        let intros = Introductions::new();
        intros.add(intro(&IntroKey::generate(), 10));
        intros.add(intro(&IntroKey::generate(), 1_000));

        assert_eq!(intros.prune(500), 1);
        assert_eq!(intros.len(), 1);
    }
}
