//! In-flight request tracking.
//!
//! Every registered request holds one capacity slot until it is removed,
//! either by its matching response ([`PendingLedger::resolve`]) or by the
//! reaper ([`PendingLedger::reap_expired`]). Removal happens under a single
//! lock, so the two paths can never both claim the same entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::StemError;
use crate::message::Message;

// ── PendingRequest ────────────────────────────────────────────────

/// A request waiting for its response.
#[derive(Debug)]
pub struct PendingRequest {
    /// The request as it was sent.
    pub message: Message,
    /// When the request was registered.
    pub sent_at: Instant,
    // Dropping the entry frees the slot.
    _slot: OwnedSemaphorePermit,
}

impl PendingRequest {
    /// How long this request has been in flight as of `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.sent_at)
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.age(now) > timeout
    }
}

// ── PendingLedger ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct PendingLedger {
    entries: Mutex<HashMap<u64, PendingRequest>>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl PendingLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for a free slot, then record `message` as in flight.
    ///
    /// Fails with [`StemError::NotConnected`] once the ledger is closed,
    /// including for callers already waiting.
    pub async fn register(&self, message: Message) -> Result<(), StemError> {
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StemError::NotConnected)?;

        let id = message.id;
        // A duplicate id keeps the original entry; the new slot is returned.
        self.entries().entry(id).or_insert_with(|| PendingRequest {
            message,
            sent_at: Instant::now(),
            _slot: slot,
        });
        Ok(())
    }

    /// Remove and return the entry for `id`, freeing its slot.
    ///
    /// `None` means the request is unknown or was already reaped.
    pub fn resolve(&self, id: u64) -> Option<PendingRequest> {
        self.entries().remove(&id)
    }

    /// Remove every entry older than `timeout` as of `now`.
    pub fn reap_expired(&self, now: Instant, timeout: Duration) -> Vec<PendingRequest> {
        let mut entries = self.entries();
        let expired: Vec<u64> = entries
            .iter()
            .filter(|(_, req)| req.is_expired(now, timeout))
            .map(|(&id, _)| id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id))
            .collect()
    }

    /// Refuse further registrations and wake blocked callers.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries().contains_key(&id)
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    fn request(id: u64) -> Message {
        Message::new(MessageType::Request, id, "game.test.ping", b"x".to_vec())
    }

    #[tokio::test]
    async fn register_and_resolve() {
        let ledger = PendingLedger::new(4);
        ledger.register(request(1)).await.unwrap();

        assert!(ledger.contains(1));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.available(), 3);

        let resolved = ledger.resolve(1).unwrap();
        assert_eq!(resolved.message.id, 1);
        drop(resolved);
        assert!(ledger.is_empty());
        assert_eq!(ledger.available(), 4);
    }

    #[tokio::test]
    async fn resolve_unknown_is_a_no_op() {
        let ledger = PendingLedger::new(2);
        ledger.register(request(1)).await.unwrap();
        assert!(ledger.resolve(99).is_none());
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.available(), 1);
    }

    #[tokio::test]
    async fn second_resolve_finds_nothing() {
        let ledger = PendingLedger::new(2);
        ledger.register(request(5)).await.unwrap();
        assert!(ledger.resolve(5).is_some());
        assert!(ledger.resolve(5).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reap_only_removes_expired() {
        let ledger = PendingLedger::new(4);
        ledger.register(request(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        ledger.register(request(2)).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        let timeout = Duration::from_secs(5);
        let reaped = ledger.reap_expired(Instant::now(), timeout);
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].message.id, 1);
        drop(reaped);

        assert!(ledger.contains(2));
        assert_eq!(ledger.available(), 3);

        // a reaped id can no longer be resolved
        assert!(ledger.resolve(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn age_equal_to_timeout_is_not_expired() {
        let ledger = PendingLedger::new(1);
        ledger.register(request(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(ledger.reap_expired(Instant::now(), Duration::from_secs(5)).is_empty());
    }

    #[tokio::test]
    async fn full_ledger_blocks_until_a_slot_frees() {
        let ledger = Arc::new(PendingLedger::new(2));
        ledger.register(request(1)).await.unwrap();
        ledger.register(request(2)).await.unwrap();
        assert_eq!(ledger.available(), 0);

        let blocked = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.register(request(3)).await }
        });
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        ledger.resolve(1);
        blocked.await.unwrap().unwrap();
        assert!(ledger.contains(3));
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn close_wakes_blocked_registrations() {
        let ledger = Arc::new(PendingLedger::new(1));
        ledger.register(request(1)).await.unwrap();

        let blocked = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.register(request(2)).await }
        });
        tokio::task::yield_now().await;

        ledger.close();
        assert!(ledger.is_closed());
        assert!(matches!(
            blocked.await.unwrap(),
            Err(StemError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn duplicate_id_keeps_original_entry() {
        let ledger = PendingLedger::new(3);
        ledger.register(request(7)).await.unwrap();
        let mut dup = request(7);
        dup.route = "other".into();
        ledger.register(dup).await.unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.available(), 2);
        assert_eq!(ledger.resolve(7).unwrap().message.route, "game.test.ping");
    }
}
