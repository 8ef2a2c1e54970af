//! Access policies
//!
//! A policy decides whether an open may proceed and which backing object the
//! new session is bound to. The close side undoes what open recorded.
//!
//! | device      | policy                  | on conflict                  |
//! |-------------|-------------------------|------------------------------|
//! | scullN      | [`Unrestricted`]        | never                        |
//! | scullsingle | [`ExclusiveSingleton`]  | `Busy`                       |
//! | sculluid    | [`OwnerScopedShared`]   | `Busy`                       |
//! | scullwuid   | [`BlockingExclusive`]   | sleep, or `WouldBlock`       |
//! | scullpriv   | [`SessionCloned`]       | never, one store per session |
//! | scullpipeN  | [`PipeDevice`](crate::channel::PipeDevice) | never      |
//! | sleepy, complete | [`EventDevice`](crate::event::EventDevice) | never |
//!
//! Every store-backed policy truncates the store when a session is opened
//! write-only. If the truncation is interrupted, the open is rolled back.

mod cloned;
mod exclusive;
mod owner;

pub use cloned::SessionCloned;
pub use exclusive::ExclusiveSingleton;
pub use owner::{BlockingExclusive, OwnerScopedShared};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::caller::{Caller, Credentials};
use crate::channel::ChannelBuffer;
use crate::error::DeviceError;
use crate::event::Event;
use crate::store::SegmentedStore;

/// Direction(s) a session was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenMode {
    #[must_use]
    pub fn readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    #[must_use]
    pub fn writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub mode: OpenMode,
    pub nonblocking: bool,
}

impl OpenFlags {
    #[must_use]
    pub fn new(mode: OpenMode) -> Self {
        Self {
            mode,
            nonblocking: false,
        }
    }

    #[must_use]
    pub fn read_only() -> Self {
        Self::new(OpenMode::ReadOnly)
    }

    #[must_use]
    pub fn write_only() -> Self {
        Self::new(OpenMode::WriteOnly)
    }

    #[must_use]
    pub fn read_write() -> Self {
        Self::new(OpenMode::ReadWrite)
    }

    #[must_use]
    pub fn nonblocking(mut self) -> Self {
        self.nonblocking = true;
        self
    }
}

/// Backing object of a session
#[derive(Clone)]
pub enum Binding {
    Store(Arc<SegmentedStore>),
    Channel(Arc<ChannelBuffer>),
    Event(Arc<Event>),
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(_) => f.write_str("Binding::Store"),
            Self::Channel(_) => f.write_str("Binding::Channel"),
            Self::Event(event) => write!(f, "Binding::Event({:?})", event.kind()),
        }
    }
}

/// Future returned by [`AccessPolicy::open`]
pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = Result<Binding, DeviceError>> + Send + 'a>>;

/// Open/close rules of one device
pub trait AccessPolicy: Send + Sync {
    /// Device name, as registered with the driver
    fn name(&self) -> &str;

    /// Admit the caller and bind a backing object.
    ///
    /// A policy that sleeps does so interruptibly through
    /// `caller.interrupt`. Dropping the future before it resolves leaves
    /// the policy unchanged.
    fn open<'a>(&'a self, caller: &'a Caller, flags: OpenFlags) -> OpenFuture<'a>;

    /// Undo the bookkeeping of a successful `open`. Called exactly once
    /// per session.
    fn release(&self, creds: &Credentials, flags: OpenFlags);

    /// Stores owned by this device, for teardown
    fn stores(&self) -> Vec<Arc<SegmentedStore>>;

    /// Teardown: wake every sleeper of this device for good. Sleepers and
    /// later sleeps fail with `NoDevice`.
    fn retire(&self) {}
}

/// Runs the rollback unless disarmed, also when the open future is dropped
struct Rollback<U: FnOnce()>(Option<U>);

impl<U: FnOnce()> Rollback<U> {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl<U: FnOnce()> Drop for Rollback<U> {
    fn drop(&mut self) {
        if let Some(undo) = self.0.take() {
            undo();
        }
    }
}

/// Finish a store-backed open: truncate on write-only, roll back the grant
/// with `undo` if that fails or is cancelled.
pub(crate) async fn bind_store<U: FnOnce()>(
    store: &Arc<SegmentedStore>,
    caller: &Caller,
    flags: OpenFlags,
    undo: U,
) -> Result<Binding, DeviceError> {
    let rollback = Rollback(Some(undo));
    if flags.mode == OpenMode::WriteOnly {
        store.trim(&caller.interrupt).await?;
    }
    rollback.disarm();
    Ok(Binding::Store(Arc::clone(store)))
}

/// Any number of concurrent sessions, one shared store
pub struct Unrestricted {
    name: String,
    store: Arc<SegmentedStore>,
}

impl Unrestricted {
    #[must_use]
    pub fn new(name: &str, store: Arc<SegmentedStore>) -> Self {
        Self {
            name: name.to_string(),
            store,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SegmentedStore> {
        &self.store
    }
}

impl AccessPolicy for Unrestricted {
    fn name(&self) -> &str {
        &self.name
    }

    fn open<'a>(&'a self, caller: &'a Caller, flags: OpenFlags) -> OpenFuture<'a> {
        Box::pin(bind_store(&self.store, caller, flags, || {}))
    }

    fn release(&self, _creds: &Credentials, _flags: OpenFlags) {}

    fn stores(&self) -> Vec<Arc<SegmentedStore>> {
        vec![Arc::clone(&self.store)]
    }
}
