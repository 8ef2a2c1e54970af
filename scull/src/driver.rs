//! Device registry
//!
//! [`Driver::load`] builds every device the configuration asks for:
//!
//! - `scull0` .. `scullN-1`: shared stores without access restriction
//! - `scullpipe0` .. `scullpipeM-1`: pipes
//! - `scullsingle`: one session at a time
//! - `sculluid`: one user at a time, others get `Busy`
//! - `scullwuid`: one user at a time, others wait
//! - `scullpriv`: one store per controlling session
//! - `sleepy`: reads sleep until a write, which wakes all of them
//! - `complete`: every write completes exactly one read

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::access::{
    AccessPolicy, BlockingExclusive, ExclusiveSingleton, OpenFlags, OwnerScopedShared,
    SessionCloned, Unrestricted,
};
use crate::caller::Caller;
use crate::channel::PipeDevice;
use crate::config::{ConfigError, DriverConfig};
use crate::error::DeviceError;
use crate::event::{EventDevice, EventKind};
use crate::idgen::IdGen;
use crate::session::Session;
use crate::store::SegmentedStore;
use crate::tunables::Tunables;
use crate::wait_queue::WaitQueue;

pub struct Driver {
    config: DriverConfig,
    tunables: Arc<Tunables>,
    queue: WaitQueue,
    idgen: Arc<IdGen>,
    devices: BTreeMap<String, Arc<dyn AccessPolicy>>,
}

impl Driver {
    /// Validate `config` and register all devices
    ///
    /// # Errors
    /// Returns the validation error of the configuration
    pub fn load(config: DriverConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let tunables = Arc::new(Tunables::new(&config));
        let queue = WaitQueue::new();
        let idgen = Arc::new(IdGen::new());
        let mut devices: BTreeMap<String, Arc<dyn AccessPolicy>> = BTreeMap::new();

        let new_store = || Arc::new(SegmentedStore::new(Arc::clone(&tunables)));

        for i in 0..config.store_devices {
            let name = format!("scull{i}");
            devices.insert(name.clone(), Arc::new(Unrestricted::new(&name, new_store())));
        }
        for i in 0..config.pipe_devices {
            let name = format!("scullpipe{i}");
            let pipe = PipeDevice::new(&name, Arc::clone(&tunables), queue.clone(), &idgen);
            devices.insert(name, Arc::new(pipe));
        }

        let single: Arc<dyn AccessPolicy> =
            Arc::new(ExclusiveSingleton::new("scullsingle", new_store()));
        let uid: Arc<dyn AccessPolicy> =
            Arc::new(OwnerScopedShared::new("sculluid", new_store()));
        let wuid: Arc<dyn AccessPolicy> = Arc::new(BlockingExclusive::new(
            "scullwuid",
            new_store(),
            queue.clone(),
            &idgen,
        ));
        let private: Arc<dyn AccessPolicy> =
            Arc::new(SessionCloned::new("scullpriv", Arc::clone(&tunables)));
        let sleepy: Arc<dyn AccessPolicy> = Arc::new(EventDevice::new(
            "sleepy",
            EventKind::Sleepy,
            queue.clone(),
            &idgen,
        ));
        let complete: Arc<dyn AccessPolicy> = Arc::new(EventDevice::new(
            "complete",
            EventKind::Completion,
            queue.clone(),
            &idgen,
        ));
        for device in [single, uid, wuid, private, sleepy, complete] {
            devices.insert(device.name().to_string(), device);
        }

        info!(
            devices = devices.len(),
            segment_size = config.segment_size,
            set_size = config.set_size,
            "driver loaded"
        );
        Ok(Self {
            config,
            tunables,
            queue,
            idgen,
            devices,
        })
    }

    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    #[must_use]
    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.tunables
    }

    #[must_use]
    pub fn queue(&self) -> &WaitQueue {
        &self.queue
    }

    /// Registered device names, sorted
    #[must_use]
    pub fn device_names(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    #[must_use]
    pub fn device(&self, name: &str) -> Option<Arc<dyn AccessPolicy>> {
        self.devices.get(name).cloned()
    }

    /// Open a device by name
    ///
    /// # Errors
    /// `NoDevice` for an unknown name, otherwise what the device's access
    /// policy reports
    pub async fn open(
        &self,
        name: &str,
        caller: &Caller,
        flags: OpenFlags,
    ) -> Result<Session, DeviceError> {
        let Some(device) = self.device(name) else {
            debug!(device = name, "no such device");
            return Err(DeviceError::NoDevice);
        };
        Session::open(
            self.idgen.next_handle(),
            device,
            Arc::clone(&self.tunables),
            caller.clone(),
            flags,
        )
        .await
    }

    /// Tear down: wake all sleepers for good and release every store.
    ///
    /// Sessions still open keep working on empty stores; their close
    /// effects still run.
    pub async fn unload(self) {
        for device in self.devices.values() {
            device.retire();
        }
        let mut released = 0;
        for device in self.devices.values() {
            for store in device.stores() {
                store.release().await;
                released += 1;
            }
        }
        info!(stores = released, "driver unloaded");
    }
}
