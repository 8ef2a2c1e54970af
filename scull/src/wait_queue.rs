//! Wait queue
//!
//! Keyed sleep/wake primitive shared by the pipe channel, the blocking
//! access policy and the event devices, plus broadcast subscriptions used
//! for asynchronous readiness notification.
//!
//! # 1) Sleeping on a condition
//!
//! 10. Task: lock the state guarded by the condition, check it
//! 20. Task: register itself as a waiter for the condition's handle
//! 30. Task: release the state lock and sleep
//!
//! 40. Other task: change the state, release the state lock
//! 50. Other task: call `notify` (or `notify_one`) for the handle
//! 60. Queue: wake the registered waiter(s)
//!
//! 70. Task: wake up, lock the state again and re-check the condition
//!
//! Step 50 may run on another thread between 10 and 20. To avoid losing the
//! wakeup, [`WaitQueue::wait`] registers at the moment it is called, while
//! the task still holds the state lock; only awaiting the returned
//! [`Wakeup`] sleeps. Lock order is always state -> queue.
//!
//! ```ignore
//! loop {
//!     let wakeup = {
//!         let mut state = self.state.lock();
//!         if state.ready() {
//!             break;
//!         }
//!         queue.wait(handle)
//!     };
//!     if wakeup.await == RETIRED {
//!         return Err(DeviceError::NoDevice);
//!     }
//! }
//! ```
//!
//! A wakeup never means that the condition holds. Waiters always loop.
//!
//! # 2) Subscribing to a handle
//!
//! `subscribe` returns a broadcast receiver which gets the argument of every
//! notification. Drop the receiver to unsubscribe.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::idgen::Handle;

/// Value passed to waiters and subscribers on notification.
///
/// Positive values carry a byte count, `-1` means the handle was retired.
pub type Notification = i64;

/// Notification sent when a handle is retired
pub const RETIRED: Notification = -1;

/// Everything the queue knows about one registered handle
struct Slot {
    hint: String,
    /// Oldest first
    sleepers: VecDeque<oneshot::Sender<Notification>>,
    listeners: Option<broadcast::Sender<Notification>>,
}

impl Slot {
    fn new(hint: &str) -> Self {
        Self {
            hint: hint.to_string(),
            sleepers: VecDeque::new(),
            listeners: None,
        }
    }

    fn inform_listeners(&self, arg: Notification) {
        if let Some(listeners) = &self.listeners {
            // No receiver left is fine, they come and go
            let _ = listeners.send(arg);
        }
    }
}

/// Thread-safe wait queue keyed by handles
#[derive(Clone, Default)]
pub struct WaitQueue {
    slots: Arc<Mutex<HashMap<Handle, Slot>>>,
}

impl WaitQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a handle available for waiting and subscribing
    pub fn register(&self, handle: Handle, debug_hint: &str) {
        let mut slots = self.slots.lock();
        if let Some(old) = slots.insert(handle, Slot::new(debug_hint)) {
            log::warn!(
                "wait_queue: {handle:?} registered twice ('{}' replaced by '{debug_hint}')",
                old.hint
            );
        }
    }

    #[must_use]
    pub fn is_registered(&self, handle: Handle) -> bool {
        self.slots.lock().contains_key(&handle)
    }

    /// Retire a handle
    ///
    /// Wakes all sleepers and listeners with [`RETIRED`] and forgets the
    /// listeners. Later waits on the handle resolve immediately.
    pub fn retire(&self, handle: Handle) {
        let Some(mut slot) = self.slots.lock().remove(&handle) else {
            log::warn!("wait_queue: retiring unknown {handle:?}");
            return;
        };
        log::debug!(
            "wait_queue: retiring '{}', {} sleeper(s)",
            slot.hint,
            slot.sleepers.len()
        );
        for sleeper in std::mem::take(&mut slot.sleepers) {
            let _ = sleeper.send(RETIRED);
        }
        slot.inform_listeners(RETIRED);
    }

    /// Wake every task sleeping on the handle and inform its listeners
    pub fn notify(&self, handle: Handle, arg: Notification) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&handle) else {
            return;
        };
        let sleepers = std::mem::take(&mut slot.sleepers);
        log::debug!(
            "wait_queue: notify '{}' arg={arg}, {} sleeper(s)",
            slot.hint,
            sleepers.len()
        );
        for sleeper in sleepers {
            let _ = sleeper.send(arg);
        }
        slot.inform_listeners(arg);
    }

    /// Wake the oldest task still sleeping on the handle and inform the
    /// listeners. Returns whether a task was woken.
    pub fn notify_one(&self, handle: Handle, arg: Notification) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&handle) else {
            return false;
        };
        slot.inform_listeners(arg);
        // Senders of cancelled waits fail; skip them
        while let Some(sleeper) = slot.sleepers.pop_front() {
            if sleeper.send(arg).is_ok() {
                log::debug!("wait_queue: notify_one '{}' arg={arg}", slot.hint);
                return true;
            }
        }
        false
    }

    /// Number of tasks currently sleeping on the handle
    ///
    /// Sleepers whose wait was cancelled are not counted.
    #[must_use]
    pub fn sleeper_count(&self, handle: Handle) -> usize {
        self.slots.lock().get(&handle).map_or(0, |slot| {
            slot.sleepers.iter().filter(|s| !s.is_closed()).count()
        })
    }

    /// Register as a sleeper on the handle now; await the result to sleep.
    ///
    /// Call it while holding the lock of the state the condition lives in
    /// (see the module documentation). On a retired or unknown handle the
    /// wakeup resolves at once with [`RETIRED`].
    pub fn wait(&self, handle: Handle) -> Wakeup {
        let (tx, rx) = oneshot::channel();
        {
            let mut slots = self.slots.lock();
            match slots.get_mut(&handle) {
                Some(slot) => {
                    slot.sleepers.retain(|s| !s.is_closed());
                    slot.sleepers.push_back(tx);
                }
                None => {
                    let _ = tx.send(RETIRED);
                }
            }
        }
        Wakeup {
            rx,
            queue: self.clone(),
            handle,
            observed: false,
        }
    }

    /// Subscribe to notifications of a handle
    ///
    /// All subscribers receive all notifications. Drop the receiver to
    /// unsubscribe. Returns `None` for a handle that is not registered.
    #[must_use]
    pub fn subscribe(
        &self,
        handle: Handle,
        capacity: usize,
    ) -> Option<broadcast::Receiver<Notification>> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&handle) else {
            log::warn!("wait_queue: subscribe to unknown {handle:?}");
            return None;
        };
        let listeners = slot
            .listeners
            .get_or_insert_with(|| broadcast::channel(capacity.max(1)).0);
        Some(listeners.subscribe())
    }
}

/// Pending wakeup of one sleeper, see [`WaitQueue::wait`]
///
/// Dropping it unregisters the sleeper. If a notification had already been
/// delivered but was never observed, it is passed on to the next sleeper
/// so that a wake-one notification is not lost.
#[must_use = "a wakeup does nothing unless awaited"]
pub struct Wakeup {
    rx: oneshot::Receiver<Notification>,
    queue: WaitQueue,
    handle: Handle,
    observed: bool,
}

impl Future for Wakeup {
    type Output = Notification;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Notification> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(arg) => {
                this.observed = true;
                // The sender only goes away with the slot
                Poll::Ready(arg.unwrap_or(RETIRED))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Wakeup {
    fn drop(&mut self) {
        if self.observed {
            return;
        }
        if let Ok(arg) = self.rx.try_recv() {
            if arg != RETIRED {
                self.queue.notify_one(self.handle, arg);
            }
        }
    }
}
