//! Owner-scoped policies
//!
//! Both policies let one user share the device among any number of sessions
//! and turn everybody else away while that user has it open. They differ in
//! how they turn away: [`OwnerScopedShared`] fails with `Busy`,
//! [`BlockingExclusive`] puts the opener to sleep until the device is free.
//!
//! The owner is recorded when the count goes from 0 to 1 and is never
//! cleared. With the count back at 0 any caller is admitted and becomes the
//! new owner, so a stale owner only shows up in [`OwnerScopedShared::owner`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{bind_store, AccessPolicy, OpenFlags, OpenFuture};
use crate::caller::{Caller, Capability, Credentials};
use crate::error::DeviceError;
use crate::idgen::{Handle, IdGen};
use crate::store::SegmentedStore;
use crate::wait_queue::{WaitQueue, RETIRED};

#[derive(Debug, Default)]
struct OwnerState {
    count: usize,
    owner: Option<u32>,
}

impl OwnerState {
    fn admits(&self, creds: &Credentials) -> bool {
        self.count == 0
            || self.owner == Some(creds.uid)
            || self.owner == Some(creds.euid)
            || creds.capable(Capability::DacOverride)
    }

    fn grant(&mut self, creds: &Credentials) {
        if self.count == 0 {
            self.owner = Some(creds.uid);
        }
        self.count += 1;
    }

    /// Returns the remaining count
    fn drop_one(&mut self) -> usize {
        self.count = self.count.saturating_sub(1);
        self.count
    }
}

/// Shared by the owner's sessions, `Busy` for everyone else
pub struct OwnerScopedShared {
    name: String,
    store: Arc<SegmentedStore>,
    state: Mutex<OwnerState>,
}

impl OwnerScopedShared {
    #[must_use]
    pub fn new(name: &str, store: Arc<SegmentedStore>) -> Self {
        Self {
            name: name.to_string(),
            store,
            state: Mutex::new(OwnerState::default()),
        }
    }

    /// User recorded by the most recent first opener
    #[must_use]
    pub fn owner(&self) -> Option<u32> {
        self.state.lock().owner
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().count
    }
}

impl AccessPolicy for OwnerScopedShared {
    fn name(&self) -> &str {
        &self.name
    }

    fn open<'a>(&'a self, caller: &'a Caller, flags: OpenFlags) -> OpenFuture<'a> {
        Box::pin(async move {
            {
                let mut state = self.state.lock();
                if !state.admits(&caller.creds) {
                    debug!(
                        device = %self.name,
                        uid = caller.creds.uid,
                        owner = ?state.owner,
                        "busy"
                    );
                    return Err(DeviceError::Busy);
                }
                state.grant(&caller.creds);
            }
            bind_store(&self.store, caller, flags, || {
                self.state.lock().drop_one();
            })
            .await
        })
    }

    fn release(&self, _creds: &Credentials, _flags: OpenFlags) {
        self.state.lock().drop_one();
    }

    fn stores(&self) -> Vec<Arc<SegmentedStore>> {
        vec![Arc::clone(&self.store)]
    }
}

/// Like [`OwnerScopedShared`], but other users wait for the device
///
/// Openers that are not admitted sleep until the count drops to 0, then all
/// of them wake up and race: the first to re-lock becomes the owner, the
/// others (unless they are the same user) go back to sleep.
pub struct BlockingExclusive {
    name: String,
    store: Arc<SegmentedStore>,
    state: Mutex<OwnerState>,
    queue: WaitQueue,
    released: Handle,
}

impl BlockingExclusive {
    #[must_use]
    pub fn new(name: &str, store: Arc<SegmentedStore>, queue: WaitQueue, idgen: &IdGen) -> Self {
        let released = idgen.next_handle();
        queue.register(released, &format!("{name} released"));
        Self {
            name: name.to_string(),
            store,
            state: Mutex::new(OwnerState::default()),
            queue,
            released,
        }
    }

    #[must_use]
    pub fn owner(&self) -> Option<u32> {
        self.state.lock().owner
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().count
    }

    /// Openers currently sleeping for the device
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.queue.sleeper_count(self.released)
    }

    fn drop_one(&self) {
        let remaining = self.state.lock().drop_one();
        if remaining == 0 {
            self.queue.notify(self.released, 0);
        }
    }
}

impl AccessPolicy for BlockingExclusive {
    fn name(&self) -> &str {
        &self.name
    }

    fn open<'a>(&'a self, caller: &'a Caller, flags: OpenFlags) -> OpenFuture<'a> {
        Box::pin(async move {
            loop {
                let wakeup = {
                    let mut state = self.state.lock();
                    if state.admits(&caller.creds) {
                        state.grant(&caller.creds);
                        break;
                    }
                    if flags.nonblocking {
                        return Err(DeviceError::WouldBlock);
                    }
                    self.queue.wait(self.released)
                };
                trace!(device = %self.name, uid = caller.creds.uid, "waiting for device");
                if caller.interrupt.guard(wakeup).await? == RETIRED {
                    return Err(DeviceError::NoDevice);
                }
            }
            bind_store(&self.store, caller, flags, || self.drop_one()).await
        })
    }

    fn release(&self, _creds: &Credentials, _flags: OpenFlags) {
        self.drop_one();
    }

    fn stores(&self) -> Vec<Arc<SegmentedStore>> {
        vec![Arc::clone(&self.store)]
    }

    fn retire(&self) {
        if self.queue.is_registered(self.released) {
            self.queue.retire(self.released);
        }
    }
}

impl Drop for BlockingExclusive {
    fn drop(&mut self) {
        AccessPolicy::retire(self);
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::tunables::Tunables;

    fn shared() -> OwnerScopedShared {
        let store = Arc::new(SegmentedStore::new(Arc::new(Tunables::default())));
        OwnerScopedShared::new("sculluid", store)
    }

    #[test]
    fn owner_admits_itself_by_uid_or_euid() {
        let mut state = OwnerState::default();
        state.grant(&Credentials::user(1000));

        assert!(state.admits(&Credentials::user(1000)));
        assert!(state.admits(&Credentials::user(2000).with_euid(1000)));
        assert!(!state.admits(&Credentials::user(2000)));
        assert!(state.admits(&Credentials::user(2000).with_capability(Capability::DacOverride)));
    }

    #[test]
    fn stale_owner_does_not_block_next_first_opener() {
        let mut state = OwnerState::default();
        state.grant(&Credentials::user(1000));
        assert_eq!(state.drop_one(), 0);
        assert_eq!(state.owner, Some(1000));

        assert!(state.admits(&Credentials::user(2000)));
        state.grant(&Credentials::user(2000));
        assert_eq!(state.owner, Some(2000));
    }

    #[tokio::test]
    async fn interrupted_trim_leaves_count_and_owner() {
        let device = shared();
        let first = Caller::user(1000);
        let _session = device.open(&first, OpenFlags::read_only()).await.unwrap();
        assert_eq!(device.open_count(), 1);

        let held = device.store.hold().await;
        let caller = Caller::user(1000);
        let mut open = device.open(&caller, OpenFlags::write_only());
        assert!((&mut open).now_or_never().is_none());
        assert_eq!(device.open_count(), 2);

        caller.interrupt.raise();
        assert_eq!(open.await.err(), Some(DeviceError::Interrupted));
        drop(held);

        assert_eq!(device.open_count(), 1);
        assert_eq!(device.owner(), Some(1000));
    }

    #[tokio::test]
    async fn dropped_first_open_frees_the_device() {
        let device = shared();
        let held = device.store.hold().await;

        let caller = Caller::user(1000);
        let mut open = device.open(&caller, OpenFlags::write_only());
        assert!((&mut open).now_or_never().is_none());
        drop(open);
        drop(held);

        assert_eq!(device.open_count(), 0);
        let other = Caller::user(2000);
        assert!(device.open(&other, OpenFlags::read_only()).await.is_ok());
        assert_eq!(device.owner(), Some(2000));
    }
}
