//! Pending transaction table
//!
//! Maps a correlation key to either a parked waiter or a payload that
//! arrived before anyone asked for it. Events and waits race in either
//! order; whichever comes second completes the hand-off.
//!
//! # Blocking Lock Usage
//!
//! One `parking_lot::Mutex` guards the map. It is held only to insert,
//! remove or swap a slot and never across an `.await`; waiters block on a
//! per-key `oneshot` receiver outside the lock.

use crate::errors::{EventError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

enum Slot {
    Waiting {
        waiter: u64,
        tx: oneshot::Sender<Value>,
    },
    Arrived {
        payload: Value,
        at: Instant,
    },
}

/// What happened to a published payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A parked waiter received it
    Woke,
    /// Stored for a future waiter
    Stored,
    /// Stored, replacing an earlier unclaimed payload for the same key
    Replaced,
    /// Discarded because the table is closed
    Dropped,
}

/// Correlation key to waiter/payload table
///
/// `closed` is only read or written with the slots lock held, so a close
/// cannot interleave with a waiter parking or a payload being stored.
pub struct PendingTable {
    slots: Mutex<HashMap<String, Slot>>,
    next_waiter: AtomicU64,
    closed: AtomicBool,
    unclaimed_ttl: Duration,
}

impl PendingTable {
    /// Create a table that drops unclaimed payloads after `unclaimed_ttl`
    pub fn new(unclaimed_ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_waiter: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            unclaimed_ttl,
        }
    }

    /// Hand `payload` to the waiter parked on `key`, or store it.
    ///
    /// Unclaimed slots are last-write-wins.
    pub fn publish(&self, key: &str, payload: Value) -> Delivery {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        if self.closed.load(Ordering::Acquire) {
            debug!(key, "table closed, dropping event");
            return Delivery::Dropped;
        }
        self.prune_locked(&mut slots, now);

        match slots.remove(key) {
            Some(Slot::Waiting { tx, .. }) => match tx.send(payload) {
                Ok(()) => Delivery::Woke,
                Err(payload) => {
                    slots.insert(key.to_string(), Slot::Arrived { payload, at: now });
                    Delivery::Stored
                }
            },
            Some(Slot::Arrived { .. }) => {
                slots.insert(key.to_string(), Slot::Arrived { payload, at: now });
                Delivery::Replaced
            }
            None => {
                slots.insert(key.to_string(), Slot::Arrived { payload, at: now });
                Delivery::Stored
            }
        }
    }

    /// Wait for the payload published under `key`, consuming it.
    ///
    /// `None` waits without bound. On timeout or cancellation the slot is
    /// released, so a later event for the key is stored rather than handed
    /// to a waiter that no longer exists.
    pub async fn wait(&self, key: &str, timeout: Option<Duration>) -> Result<Value> {
        let (waiter, mut rx) = {
            let mut slots = self.slots.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(EventError::Closed);
            }
            match slots.remove(key) {
                Some(Slot::Arrived { payload, .. }) => {
                    debug!(key, "event already arrived");
                    return Ok(payload);
                }
                Some(waiting @ Slot::Waiting { .. }) => {
                    slots.insert(key.to_string(), waiting);
                    return Err(EventError::WaiterConflict {
                        key: key.to_string(),
                    });
                }
                None => {}
            }
            let waiter = self.next_waiter.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            slots.insert(key.to_string(), Slot::Waiting { waiter, tx });
            (waiter, rx)
        };
        let _guard = ReleaseOnDrop {
            table: self,
            key,
            waiter,
        };
        debug!(key, ?timeout, "waiting for event");

        let outcome = match timeout {
            Some(bound) => tokio::time::timeout(bound, &mut rx).await.ok(),
            None => Some((&mut rx).await),
        };

        match outcome {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(_)) => Err(EventError::Closed),
            None => {
                self.release(key, waiter);
                // a publish may have landed between the deadline and the release
                match rx.try_recv() {
                    Ok(payload) => Ok(payload),
                    Err(_) => {
                        debug!(key, "wait timed out");
                        Err(EventError::CorrelationTimeout {
                            key: key.to_string(),
                            timeout: timeout.unwrap_or_default(),
                        })
                    }
                }
            }
        }
    }

    /// Fail every parked waiter and refuse new waits
    pub fn close(&self) {
        let mut slots = self.slots.lock();
        self.closed.store(true, Ordering::Release);
        slots.clear();
    }

    /// Number of occupied slots, parked or unclaimed
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a waiter is currently parked on `key`
    pub fn has_waiter(&self, key: &str) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Waiting { .. }))
    }

    /// Whether an unclaimed payload is stored under `key`
    pub fn has_unclaimed(&self, key: &str) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Arrived { .. }))
    }

    fn release(&self, key: &str, waiter: u64) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(key), Some(Slot::Waiting { waiter: w, .. }) if *w == waiter) {
            slots.remove(key);
        }
    }

    fn prune_locked(&self, slots: &mut HashMap<String, Slot>, now: Instant) {
        let ttl = self.unclaimed_ttl;
        slots.retain(|key, slot| match slot {
            Slot::Arrived { at, .. } if now.duration_since(*at) >= ttl => {
                debug!(key = %key, "dropping unclaimed event");
                false
            }
            _ => true,
        });
    }
}

struct ReleaseOnDrop<'a> {
    table: &'a PendingTable,
    key: &'a str,
    waiter: u64,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.table.release(self.key, self.waiter);
    }
}
