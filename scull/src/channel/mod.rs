//! Bounded circular byte channel
//!
//! Producer/consumer transfer through a fixed ring with blocking and
//! nonblocking semantics:
//!
//! - Readers sleep on `not_empty` while the ring is empty.
//! - Writers sleep on `not_full` while there is no free space.
//! - A successful write also informs asynchronous-readiness listeners.
//!
//! One slot of the ring is never used, so `read_cursor == write_cursor`
//! always means empty:
//!
//! ```text
//!  0                 rp             wp                 capacity
//!  ├─────────────────┼──────────────┼──────────────────┤
//!  │      free       │     data     │   free (- 1)     │
//! ```
//!
//! Both sleeping steps follow the protocol from [`crate::wait_queue`]:
//! register while holding the ring lock, sleep without it, re-check after
//! waking.

mod device;

pub use device::PipeDevice;

use tokio::sync::{broadcast, Mutex, MutexGuard};

use crate::caller::Interrupt;
use crate::error::DeviceError;
use crate::idgen::{Handle, IdGen};
use crate::user::{UserSink, UserSource};
use crate::wait_queue::{Notification, WaitQueue, RETIRED};

/// Ring storage and cursors
struct Ring {
    buffer: Vec<u8>,
    rp: usize,
    wp: usize,
}

impl Ring {
    fn unallocated() -> Self {
        Self {
            buffer: Vec::new(),
            rp: 0,
            wp: 0,
        }
    }

    fn with_capacity(capacity: usize) -> Result<Self, DeviceError> {
        if capacity < 2 {
            return Err(DeviceError::InvalidArgument);
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| DeviceError::OutOfMemory)?;
        buffer.resize(capacity, 0);
        Ok(Self {
            buffer,
            rp: 0,
            wp: 0,
        })
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn is_allocated(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn is_empty(&self) -> bool {
        self.rp == self.wp
    }

    /// Bytes that can be written before the ring is full
    fn space_free(&self) -> usize {
        let capacity = self.capacity();
        if capacity == 0 {
            return 0;
        }
        if self.rp == self.wp {
            capacity - 1
        } else {
            (self.rp + capacity - self.wp) % capacity - 1
        }
    }

    /// Contiguous bytes readable from `rp` without wrapping
    fn readable_run(&self) -> usize {
        if self.wp > self.rp {
            self.wp - self.rp
        } else {
            self.capacity() - self.rp
        }
    }

    /// Contiguous bytes writable at `wp` without wrapping or reaching `rp`
    fn writable_run(&self) -> usize {
        if self.wp >= self.rp {
            self.capacity() - self.wp
        } else {
            self.rp - self.wp - 1
        }
    }

    fn advance(cursor: &mut usize, count: usize, capacity: usize) {
        *cursor += count;
        if *cursor == capacity {
            *cursor = 0;
        }
    }
}

/// What a nonblocking caller could do right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Fixed-capacity circular buffer with blocking transfer
pub struct ChannelBuffer {
    ring: Mutex<Ring>,
    queue: WaitQueue,
    not_empty: Handle,
    not_full: Handle,
    debug_hint: String,
}

impl ChannelBuffer {
    /// Create a channel with `capacity` bytes of ring (`capacity - 1` usable)
    ///
    /// # Errors
    /// `InvalidArgument` if `capacity < 2`, `OutOfMemory` if the ring cannot
    /// be allocated
    pub fn new(
        capacity: usize,
        queue: WaitQueue,
        idgen: &IdGen,
        debug_hint: &str,
    ) -> Result<Self, DeviceError> {
        let mut channel = Self::unallocated(queue, idgen, debug_hint);
        *channel.ring.get_mut() = Ring::with_capacity(capacity)?;
        channel.register_handles();
        Ok(channel)
    }

    /// Create a channel without storage. Storage is attached by the owner
    /// (see [`PipeDevice`]) before the first transfer.
    pub(crate) fn unallocated(queue: WaitQueue, idgen: &IdGen, debug_hint: &str) -> Self {
        Self {
            ring: Mutex::new(Ring::unallocated()),
            queue,
            not_empty: idgen.next_handle(),
            not_full: idgen.next_handle(),
            debug_hint: debug_hint.to_string(),
        }
    }

    fn register_handles(&self) {
        self.queue
            .register(self.not_empty, &format!("{} not_empty", self.debug_hint));
        self.queue
            .register(self.not_full, &format!("{} not_full", self.debug_hint));
    }

    /// Allocate the ring if needed, then run `attached` under the ring lock
    pub(crate) async fn attach<F: FnOnce()>(
        &self,
        capacity: usize,
        interrupt: &Interrupt,
        attached: F,
    ) -> Result<(), DeviceError> {
        let mut ring = self.lock(interrupt).await?;
        if !ring.is_allocated() {
            *ring = Ring::with_capacity(capacity)?;
            self.register_handles();
            log::debug!("{}: allocated {capacity} byte ring", self.debug_hint);
        }
        attached();
        Ok(())
    }

    /// Release the ring unless someone holds the lock right now.
    ///
    /// Listeners get [`RETIRED`](crate::wait_queue::RETIRED) and are dropped.
    pub(crate) fn try_free(&self) -> bool {
        let Ok(mut ring) = self.ring.try_lock() else {
            return false;
        };
        if ring.is_allocated() {
            *ring = Ring::unallocated();
            self.retire();
            log::debug!("{}: released ring", self.debug_hint);
        }
        true
    }

    async fn lock(&self, interrupt: &Interrupt) -> Result<MutexGuard<'_, Ring>, DeviceError> {
        interrupt.guard(self.ring.lock()).await
    }

    /// Ring size in bytes, 0 while unallocated
    pub async fn capacity(&self) -> usize {
        self.ring.lock().await.capacity()
    }

    /// Wait until the ring holds data. Returns the re-acquired lock.
    async fn wait_for_data<'a>(
        &'a self,
        mut ring: MutexGuard<'a, Ring>,
        nonblocking: bool,
        interrupt: &Interrupt,
    ) -> Result<MutexGuard<'a, Ring>, DeviceError> {
        while ring.is_empty() {
            if !ring.is_allocated() {
                return Err(DeviceError::BadDescriptor);
            }
            if nonblocking {
                return Err(DeviceError::WouldBlock);
            }
            let wakeup = self.queue.wait(self.not_empty);
            drop(ring);

            log::debug!("{}: reader going to sleep", self.debug_hint);
            if interrupt.guard(wakeup).await? == RETIRED {
                return Err(DeviceError::NoDevice);
            }
            ring = self.lock(interrupt).await?;
        }
        Ok(ring)
    }

    /// Wait until the ring has free space. Returns the re-acquired lock.
    async fn wait_for_space<'a>(
        &'a self,
        mut ring: MutexGuard<'a, Ring>,
        nonblocking: bool,
        interrupt: &Interrupt,
    ) -> Result<MutexGuard<'a, Ring>, DeviceError> {
        while ring.space_free() == 0 {
            if !ring.is_allocated() {
                return Err(DeviceError::BadDescriptor);
            }
            if nonblocking {
                return Err(DeviceError::WouldBlock);
            }
            let wakeup = self.queue.wait(self.not_full);
            drop(ring);

            log::debug!("{}: writer going to sleep", self.debug_hint);
            if interrupt.guard(wakeup).await? == RETIRED {
                return Err(DeviceError::NoDevice);
            }
            ring = self.lock(interrupt).await?;
        }
        Ok(ring)
    }

    /// Read up to `dst.capacity()` bytes, sleeping while the ring is empty.
    ///
    /// Returns at most the contiguous run up to the wrap point; the next
    /// call continues from the start of the ring.
    ///
    /// # Errors
    /// `WouldBlock` if empty and `nonblocking`, `Interrupted` if the sleep
    /// or lock wait is interrupted, `Fault` if `dst` refuses the copy. The
    /// read cursor does not move on error.
    pub async fn read<B: UserSink + ?Sized>(
        &self,
        dst: &mut B,
        nonblocking: bool,
        interrupt: &Interrupt,
    ) -> Result<usize, DeviceError> {
        if dst.capacity() == 0 {
            return Ok(0);
        }
        let ring = self.lock(interrupt).await?;
        let mut ring = self.wait_for_data(ring, nonblocking, interrupt).await?;

        let count = dst.capacity().min(ring.readable_run());
        let rp = ring.rp;
        #[allow(clippy::indexing_slicing)] // rp + count <= capacity
        dst.copy_to_user(0, &ring.buffer[rp..rp + count])?;
        let capacity = ring.capacity();
        Ring::advance(&mut ring.rp, count, capacity);
        drop(ring);

        self.queue.notify(self.not_full, count as Notification);
        log::debug!("{}: read {count} bytes", self.debug_hint);
        Ok(count)
    }

    /// Write up to `src.len()` bytes, sleeping while the ring is full.
    ///
    /// Writes at most the contiguous free run; callers loop for the rest.
    ///
    /// # Errors
    /// `WouldBlock` if full and `nonblocking`, `Interrupted` if the sleep
    /// or lock wait is interrupted, `Fault` if `src` refuses the copy. The
    /// write cursor does not move on error.
    pub async fn write<B: UserSource + ?Sized>(
        &self,
        src: &B,
        nonblocking: bool,
        interrupt: &Interrupt,
    ) -> Result<usize, DeviceError> {
        if src.is_empty() {
            return Ok(0);
        }
        let ring = self.lock(interrupt).await?;
        let mut ring = self.wait_for_space(ring, nonblocking, interrupt).await?;

        let count = src
            .len()
            .min(ring.space_free())
            .min(ring.writable_run());
        let wp = ring.wp;
        #[allow(clippy::indexing_slicing)] // wp + count <= capacity
        src.copy_from_user(0, &mut ring.buffer[wp..wp + count])?;
        let capacity = ring.capacity();
        Ring::advance(&mut ring.wp, count, capacity);
        drop(ring);

        // Wakes sleeping readers and readiness listeners alike
        self.queue.notify(self.not_empty, count as Notification);
        log::debug!("{}: wrote {count} bytes", self.debug_hint);
        Ok(count)
    }

    /// Current readiness, without sleeping on the ring's conditions
    ///
    /// # Errors
    /// `Interrupted` while waiting for the lock
    pub async fn poll(&self, interrupt: &Interrupt) -> Result<Readiness, DeviceError> {
        let ring = self.lock(interrupt).await?;
        Ok(Readiness {
            readable: ring.is_allocated() && !ring.is_empty(),
            writable: ring.space_free() > 0,
        })
    }

    /// Wake every sleeper for good and drop the listeners. Later sleeps
    /// fail with `NoDevice`.
    pub fn retire(&self) {
        for handle in [self.not_empty, self.not_full] {
            if self.queue.is_registered(handle) {
                self.queue.retire(handle);
            }
        }
    }

    /// Bytes currently buffered
    pub async fn buffered(&self) -> usize {
        let ring = self.ring.lock().await;
        let capacity = ring.capacity();
        if capacity == 0 {
            0
        } else {
            (ring.wp + capacity - ring.rp) % capacity
        }
    }

    /// Register an asynchronous-readiness listener.
    ///
    /// The receiver gets the byte count of every successful write, and
    /// [`RETIRED`](crate::wait_queue::RETIRED) when the ring is released.
    /// Drop it to unregister.
    ///
    /// # Errors
    /// `BadDescriptor` if the ring is not allocated
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Notification>, DeviceError> {
        self.queue
            .subscribe(self.not_empty, 16)
            .ok_or(DeviceError::BadDescriptor)
    }

    /// Tasks sleeping for data
    #[must_use]
    pub fn sleeping_readers(&self) -> usize {
        self.queue.sleeper_count(self.not_empty)
    }

    /// Tasks sleeping for space
    #[must_use]
    pub fn sleeping_writers(&self) -> usize {
        self.queue.sleeper_count(self.not_full)
    }
}

impl Drop for ChannelBuffer {
    fn drop(&mut self) {
        self.retire();
    }
}
