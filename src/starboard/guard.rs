use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{OwnedMutexGuard, watch};

use crate::platform::MessageKey;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation on {0} was cancelled")]
pub struct Cancelled(pub MessageKey);

struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    epoch: watch::Sender<u64>,
}

impl Slot {
    fn new() -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            lock: Arc::new(tokio::sync::Mutex::new(())),
            epoch,
        }
    }
}

type SlotMap = Arc<Mutex<HashMap<MessageKey, Arc<Slot>>>>;

/// Per-message serialization with cancellation.
///
/// Each key has a slot holding a lock and an epoch counter. A token remembers
/// the epoch it was issued under; `cancel` bumps the epoch, which invalidates
/// the holder and every waiter at once. Slots are removed when the last
/// token or waiter for a key goes away.
#[derive(Clone, Default)]
pub struct ConcurrencyGuard {
    slots: SlotMap,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`. Fails if `key` is cancelled while waiting.
    pub async fn acquire(&self, key: MessageKey) -> Result<GuardToken, Cancelled> {
        let (slot, epoch, mut changes) = {
            let mut slots = self.slots.lock();
            let slot = slots
                .entry(key)
                .or_insert_with(|| Arc::new(Slot::new()))
                .clone();
            let epoch = *slot.epoch.borrow();
            let changes = slot.epoch.subscribe();
            (slot, epoch, changes)
        };

        let lock = slot.lock.clone();
        tokio::select! {
            permit = lock.lock_owned() => Ok(GuardToken {
                key,
                epoch,
                permit: Some(permit),
                slot,
                slots: self.slots.clone(),
            }),
            _ = changes.changed() => {
                release_slot(&self.slots, key, &slot);
                Err(Cancelled(key))
            }
        }
    }

    /// Invalidates the current holder of `key` and everyone queued behind it.
    pub fn cancel(&self, key: MessageKey) {
        if let Some(slot) = self.slots.lock().get(&key) {
            slot.epoch.send_modify(|epoch| *epoch += 1);
        }
    }

    pub fn active_keys(&self) -> usize {
        self.slots.lock().len()
    }
}

fn release_slot(slots: &SlotMap, key: MessageKey, slot: &Arc<Slot>) {
    let mut slots = slots.lock();
    // the map's reference plus the caller's
    if Arc::strong_count(slot) == 2 {
        slots.remove(&key);
    }
}

/// Exclusive access to one message. Released on drop.
pub struct GuardToken {
    key: MessageKey,
    epoch: u64,
    permit: Option<OwnedMutexGuard<()>>,
    slot: Arc<Slot>,
    slots: SlotMap,
}

impl GuardToken {
    pub fn key(&self) -> MessageKey {
        self.key
    }

    pub fn is_cancelled(&self) -> bool {
        *self.slot.epoch.borrow() != self.epoch
    }

    pub fn ensure_active(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled(self.key))
        } else {
            Ok(())
        }
    }

    pub fn release(self) {}
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        drop(self.permit.take());
        release_slot(&self.slots, self.key, &self.slot);
    }
}
