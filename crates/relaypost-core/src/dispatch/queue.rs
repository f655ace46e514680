//! Recipient queue
//!
//! A per-run copy of the persisted recipient list. Consuming it never
//! touches the store.

use relaypost_common::Recipient;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub struct RecipientQueue {
    pending: Mutex<VecDeque<Recipient>>,
    remaining: AtomicUsize,
}

impl RecipientQueue {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self {
            remaining: AtomicUsize::new(recipients.len()),
            pending: Mutex::new(recipients.into()),
        }
    }

    /// Claim the head record. Each record is handed out at most once.
    pub async fn take_next(&self) -> Option<Recipient> {
        let mut pending = self.pending.lock().await;
        let next = pending.pop_front();
        if next.is_some() {
            self.remaining.store(pending.len(), Ordering::SeqCst);
        }
        next
    }

    /// Lock-free count of unclaimed records
    pub fn remaining_count(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }
}
