//! Latest-only delivery: a single-slot overwrite mailbox
//!
//! The telemetry discipline from the relay design: the writer never blocks,
//! a newer sample replaces any older undelivered one, and a dedicated
//! forwarder task drains the slot. Ordered delivery needs no type of its
//! own; it is the bounded action queue inside each session handle.

use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug)]
struct Shared<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

/// Create a connected sender/receiver pair around one slot.
pub fn latest_slot<T>() -> (SlotSender<T>, SlotReceiver<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        notify: Notify::new(),
    });
    (
        SlotSender {
            shared: shared.clone(),
        },
        SlotReceiver { shared },
    )
}

/// Write side. Cloneable; writes never block.
#[derive(Debug, Clone)]
pub struct SlotSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> SlotSender<T> {
    /// Store a value, displacing any undelivered one.
    /// Returns true when an undelivered value was overwritten.
    pub fn put(&self, value: T) -> bool {
        let replaced = {
            let mut slot = match self.shared.slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.replace(value).is_some()
        };
        self.shared.notify.notify_one();
        replaced
    }
}

/// Read side, owned by the destination session's outbound task.
#[derive(Debug)]
pub struct SlotReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> SlotReceiver<T> {
    fn take(&self) -> Option<T> {
        let mut slot = match self.shared.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }

    /// Wait for the next value. Pends forever once all senders are gone;
    /// callers select against their shutdown signal.
    pub async fn recv(&mut self) -> T {
        loop {
            if let Some(value) = self.take() {
                return value;
            }
            self.shared.notify.notified().await;
        }
    }
}
