//! Single-open device

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::{bind_store, AccessPolicy, OpenFlags, OpenFuture};
use crate::caller::{Caller, Credentials};
use crate::error::DeviceError;
use crate::store::SegmentedStore;

/// At most one session at a time, regardless of who asks
pub struct ExclusiveSingleton {
    name: String,
    store: Arc<SegmentedStore>,
    available: AtomicBool,
}

impl ExclusiveSingleton {
    #[must_use]
    pub fn new(name: &str, store: Arc<SegmentedStore>) -> Self {
        Self {
            name: name.to_string(),
            store,
            available: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn give_back(&self) {
        self.available.store(true, Ordering::SeqCst);
    }
}

impl AccessPolicy for ExclusiveSingleton {
    fn name(&self) -> &str {
        &self.name
    }

    fn open<'a>(&'a self, caller: &'a Caller, flags: OpenFlags) -> OpenFuture<'a> {
        Box::pin(async move {
            if self
                .available
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!(device = %self.name, uid = caller.creds.uid, "already open");
                return Err(DeviceError::Busy);
            }
            bind_store(&self.store, caller, flags, || self.give_back()).await
        })
    }

    fn release(&self, _creds: &Credentials, _flags: OpenFlags) {
        self.give_back();
    }

    fn stores(&self) -> Vec<Arc<SegmentedStore>> {
        vec![Arc::clone(&self.store)]
    }
}
