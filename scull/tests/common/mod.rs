#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use scull::config::DriverConfig;
use scull::error::DeviceError;
use scull::tunables::Tunables;
use scull::user::{Access, UserSink, UserSource, UserWord};

/// Tunables with the given store dimensions
pub fn tunables(segment_size: usize, set_size: usize) -> Arc<Tunables> {
    Arc::new(Tunables::new(&DriverConfig {
        segment_size,
        set_size,
        ..DriverConfig::default()
    }))
}

/// Yield until `cond` holds; fail the test after a few seconds
pub async fn until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Caller memory that is never accessible
pub struct Unmapped(pub usize);

impl UserSink for Unmapped {
    fn capacity(&self) -> usize {
        self.0
    }

    fn copy_to_user(&mut self, _at: usize, _src: &[u8]) -> Result<(), DeviceError> {
        Err(DeviceError::Fault)
    }
}

impl UserSource for Unmapped {
    fn len(&self) -> usize {
        self.0
    }

    fn copy_from_user(&self, _at: usize, _dst: &mut [u8]) -> Result<(), DeviceError> {
        Err(DeviceError::Fault)
    }
}

/// An `int` the caller may only access in one direction
pub struct OneWayWord {
    pub value: i32,
    pub allowed: Access,
}

impl UserWord for OneWayWord {
    fn access_ok(&self, access: Access) -> bool {
        access == self.allowed
    }

    fn get_user(&self) -> Result<i32, DeviceError> {
        if self.allowed == Access::Read {
            Ok(self.value)
        } else {
            Err(DeviceError::Fault)
        }
    }

    fn put_user(&mut self, value: i32) -> Result<(), DeviceError> {
        if self.allowed == Access::Write {
            self.value = value;
            Ok(())
        } else {
            Err(DeviceError::Fault)
        }
    }
}
