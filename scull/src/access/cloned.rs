//! Per-session stores

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{bind_store, AccessPolicy, OpenFlags, OpenFuture};
use crate::caller::{Caller, Credentials};
use crate::error::DeviceError;
use crate::store::SegmentedStore;
use crate::tunables::Tunables;

/// One private store per controlling session
///
/// Sessions opened from the same controlling session share a store, other
/// sessions never see it. Stores are created on first open and kept until
/// the device is torn down.
pub struct SessionCloned {
    name: String,
    tunables: Arc<Tunables>,
    stores: Mutex<HashMap<u32, Arc<SegmentedStore>>>,
}

impl SessionCloned {
    #[must_use]
    pub fn new(name: &str, tunables: Arc<Tunables>) -> Self {
        Self {
            name: name.to_string(),
            tunables,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Store of a controlling session, if it was ever opened
    #[must_use]
    pub fn store_for(&self, session: u32) -> Option<Arc<SegmentedStore>> {
        self.stores.lock().get(&session).cloned()
    }

    /// Number of controlling sessions with a store
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.stores.lock().len()
    }

    fn lookup_or_create(&self, key: u32) -> Result<Arc<SegmentedStore>, DeviceError> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(&key) {
            return Ok(Arc::clone(store));
        }
        stores
            .try_reserve(1)
            .map_err(|_| DeviceError::OutOfMemory)?;
        let store = Arc::new(SegmentedStore::new(Arc::clone(&self.tunables)));
        stores.insert(key, Arc::clone(&store));
        debug!(device = %self.name, session = key, "created private store");
        Ok(store)
    }
}

impl AccessPolicy for SessionCloned {
    fn name(&self) -> &str {
        &self.name
    }

    fn open<'a>(&'a self, caller: &'a Caller, flags: OpenFlags) -> OpenFuture<'a> {
        Box::pin(async move {
            let key = caller
                .creds
                .controlling_session
                .ok_or(DeviceError::NoControllingSession)?;
            let store = self.lookup_or_create(key)?;
            bind_store(&store, caller, flags, || {}).await
        })
    }

    fn release(&self, _creds: &Credentials, _flags: OpenFlags) {}

    fn stores(&self) -> Vec<Arc<SegmentedStore>> {
        self.stores.lock().values().cloned().collect()
    }
}
