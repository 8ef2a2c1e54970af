//! Pipe device: a [`ChannelBuffer`] shared by readers and writers
//!
//! The ring is allocated by the first open, sized from the `pipe_buffer`
//! tunable at that moment, and released when the last reader and the last
//! writer are gone. Releasing it retires the channel's wait-queue handles,
//! which informs and drops every readiness listener.

use std::sync::Arc;

use parking_lot::Mutex;

use super::ChannelBuffer;
use crate::access::{AccessPolicy, Binding, OpenFlags, OpenFuture};
use crate::caller::{Caller, Credentials};
use crate::idgen::IdGen;
use crate::store::SegmentedStore;
use crate::tunables::Tunables;
use crate::wait_queue::WaitQueue;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Users {
    readers: usize,
    writers: usize,
}

pub struct PipeDevice {
    name: String,
    channel: Arc<ChannelBuffer>,
    tunables: Arc<Tunables>,
    users: Mutex<Users>,
}

impl PipeDevice {
    #[must_use]
    pub fn new(name: &str, tunables: Arc<Tunables>, queue: WaitQueue, idgen: &IdGen) -> Self {
        Self {
            name: name.to_string(),
            channel: Arc::new(ChannelBuffer::unallocated(queue, idgen, name)),
            tunables,
            users: Mutex::new(Users::default()),
        }
    }

    #[must_use]
    pub fn channel(&self) -> &Arc<ChannelBuffer> {
        &self.channel
    }

    #[must_use]
    pub fn readers(&self) -> usize {
        self.users.lock().readers
    }

    #[must_use]
    pub fn writers(&self) -> usize {
        self.users.lock().writers
    }
}

impl AccessPolicy for PipeDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open<'a>(&'a self, caller: &'a Caller, flags: OpenFlags) -> OpenFuture<'a> {
        Box::pin(async move {
            let capacity = self.tunables.pipe_buffer();
            self.channel
                .attach(capacity, &caller.interrupt, || {
                    let mut users = self.users.lock();
                    if flags.mode.readable() {
                        users.readers += 1;
                    }
                    if flags.mode.writable() {
                        users.writers += 1;
                    }
                })
                .await?;
            Ok(Binding::Channel(Arc::clone(&self.channel)))
        })
    }

    fn release(&self, _creds: &Credentials, flags: OpenFlags) {
        let mut users = self.users.lock();
        if flags.mode.readable() {
            users.readers = users.readers.saturating_sub(1);
        }
        if flags.mode.writable() {
            users.writers = users.writers.saturating_sub(1);
        }
        if users.readers == 0 && users.writers == 0 && !self.channel.try_free() {
            // An opener holds the ring lock and is about to count itself in
            log::debug!("{}: ring in use by an opener, kept", self.name);
        }
    }

    fn stores(&self) -> Vec<Arc<SegmentedStore>> {
        Vec::new()
    }

    fn retire(&self) {
        self.channel.retire();
    }
}

