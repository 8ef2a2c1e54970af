//! Event devices: reads sleep, writes wake
//!
//! Neither device stores data. A read returns 0 bytes once it has consumed
//! an event; a write raises an event and reports the whole buffer as
//! written.
//!
//! | device     | write                               | woken readers                     |
//! |------------|-------------------------------------|-----------------------------------|
//! | `sleepy`   | sets the flag (at most one pending) | all, the first to re-check wins   |
//! | `complete` | adds one completion                 | exactly one                       |

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::access::{AccessPolicy, Binding, OpenFlags, OpenFuture};
use crate::caller::{Caller, Credentials, Interrupt};
use crate::error::DeviceError;
use crate::idgen::{Handle, IdGen};
use crate::store::SegmentedStore;
use crate::wait_queue::{WaitQueue, RETIRED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A flag: writes set it and wake every reader
    Sleepy,
    /// A counter: every write completes exactly one read
    Completion,
}

/// Pending events plus the sleepers waiting for them
pub struct Event {
    kind: EventKind,
    pending: Mutex<u64>,
    queue: WaitQueue,
    raised: Handle,
    debug_hint: String,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind, queue: WaitQueue, idgen: &IdGen, debug_hint: &str) -> Self {
        let raised = idgen.next_handle();
        queue.register(raised, &format!("{debug_hint} raised"));
        Self {
            kind,
            pending: Mutex::new(0),
            queue,
            raised,
            debug_hint: debug_hint.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Events raised and not consumed yet
    #[must_use]
    pub fn pending(&self) -> u64 {
        *self.pending.lock()
    }

    /// Readers currently sleeping
    #[must_use]
    pub fn sleepers(&self) -> usize {
        self.queue.sleeper_count(self.raised)
    }

    /// Consume one event, sleeping until there is one.
    ///
    /// # Errors
    /// `WouldBlock` if nonblocking and nothing is pending, `Interrupted` if
    /// the sleep is interrupted (nothing consumed), `NoDevice` after
    /// teardown
    pub async fn wait(&self, nonblocking: bool, interrupt: &Interrupt) -> Result<(), DeviceError> {
        loop {
            let wakeup = {
                let mut pending = self.pending.lock();
                if *pending > 0 {
                    *pending -= 1;
                    return Ok(());
                }
                if nonblocking {
                    return Err(DeviceError::WouldBlock);
                }
                self.queue.wait(self.raised)
            };
            trace!(device = %self.debug_hint, "reader going to sleep");
            if interrupt.guard(wakeup).await? == RETIRED {
                return Err(DeviceError::NoDevice);
            }
        }
    }

    /// Raise an event and wake the reader(s) it is meant for
    pub fn signal(&self) {
        let pending = {
            let mut pending = self.pending.lock();
            *pending = match self.kind {
                EventKind::Sleepy => 1,
                EventKind::Completion => pending.saturating_add(1),
            };
            *pending
        };
        debug!(device = %self.debug_hint, pending, "event raised");
        match self.kind {
            EventKind::Sleepy => self.queue.notify(self.raised, 0),
            EventKind::Completion => {
                self.queue.notify_one(self.raised, 0);
            }
        }
    }

    /// Teardown: sleepers and later sleeps fail with `NoDevice`
    pub fn retire(&self) {
        if self.queue.is_registered(self.raised) {
            self.queue.retire(self.raised);
        }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        self.retire();
    }
}

/// Device front of an [`Event`]. Any number of sessions, no access rules.
pub struct EventDevice {
    name: String,
    event: Arc<Event>,
}

impl EventDevice {
    #[must_use]
    pub fn new(name: &str, kind: EventKind, queue: WaitQueue, idgen: &IdGen) -> Self {
        Self {
            name: name.to_string(),
            event: Arc::new(Event::new(kind, queue, idgen, name)),
        }
    }

    #[must_use]
    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }
}

impl AccessPolicy for EventDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open<'a>(&'a self, _caller: &'a Caller, _flags: OpenFlags) -> OpenFuture<'a> {
        Box::pin(async move { Ok(Binding::Event(Arc::clone(&self.event))) })
    }

    fn release(&self, _creds: &Credentials, _flags: OpenFlags) {}

    fn stores(&self) -> Vec<Arc<SegmentedStore>> {
        Vec::new()
    }

    fn retire(&self) {
        self.event.retire();
    }
}
