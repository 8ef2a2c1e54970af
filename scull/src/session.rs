//! Sessions: one per successful open
//!
//! A session binds a caller to a store or a channel and carries the file
//! position, the open mode and the nonblocking flag. Closing it (explicitly
//! or by dropping it) runs the device's close effect exactly once.

use std::sync::Arc;

use embedded_io_async::{ErrorType, Read, Seek, SeekFrom, Write};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::access::{AccessPolicy, Binding, OpenFlags};
use crate::caller::Caller;
use crate::channel::Readiness;
use crate::control::{self, ControlArg};
use crate::error::DeviceError;
use crate::idgen::Handle;
use crate::store::Whence;
use crate::tunables::Tunables;
use crate::user::{UserSink, UserSource};
use crate::wait_queue::Notification;

pub struct Session {
    id: Handle,
    device: Arc<dyn AccessPolicy>,
    binding: Binding,
    caller: Caller,
    flags: OpenFlags,
    tunables: Arc<Tunables>,
    pos: u64,
    closed: bool,
}

impl Session {
    /// Open `device` for `caller`.
    ///
    /// # Errors
    /// Whatever the device's access policy reports
    pub async fn open(
        id: Handle,
        device: Arc<dyn AccessPolicy>,
        tunables: Arc<Tunables>,
        caller: Caller,
        flags: OpenFlags,
    ) -> Result<Self, DeviceError> {
        let binding = device.open(&caller, flags).await?;
        debug!(session = ?id, device = device.name(), uid = caller.creds.uid, ?flags, "opened");
        Ok(Self {
            id,
            device,
            binding,
            caller,
            flags,
            tunables,
            pos: 0,
            closed: false,
        })
    }

    #[must_use]
    pub fn id(&self) -> Handle {
        self.id
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    #[must_use]
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    #[must_use]
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    #[must_use]
    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Switch between blocking and nonblocking transfers
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.flags.nonblocking = nonblocking;
    }

    fn check_open(&self) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::BadDescriptor);
        }
        Ok(())
    }

    /// Read into `buf` at the current position.
    ///
    /// A store read returns at most one segment's worth; 0 means end of
    /// data. A channel read sleeps while the channel is empty unless the
    /// session is nonblocking. An event read sleeps for one event and
    /// returns 0.
    ///
    /// # Errors
    /// `BadDescriptor` on a closed or write-only session, otherwise what the
    /// store or channel reports
    pub async fn read<B: UserSink + ?Sized>(&mut self, buf: &mut B) -> Result<usize, DeviceError> {
        self.check_open()?;
        if !self.flags.mode.readable() {
            return Err(DeviceError::BadDescriptor);
        }
        let interrupt = &self.caller.interrupt;
        let n = match &self.binding {
            Binding::Store(store) => {
                let n = store.read(self.pos, buf, interrupt).await?;
                self.pos += n as u64;
                n
            }
            Binding::Channel(channel) => {
                channel
                    .read(buf, self.flags.nonblocking, interrupt)
                    .await?
            }
            Binding::Event(event) => {
                event.wait(self.flags.nonblocking, interrupt).await?;
                0
            }
        };
        trace!(session = ?self.id, bytes = n, "read");
        Ok(n)
    }

    /// Write `buf` at the current position.
    ///
    /// Transfers at most one segment (store) or one contiguous run
    /// (channel); see [`write_all`](Self::write_all) for the loop. An event
    /// write raises the event and consumes the whole buffer.
    ///
    /// # Errors
    /// `BadDescriptor` on a closed or read-only session, otherwise what the
    /// store or channel reports
    pub async fn write<B: UserSource + ?Sized>(&mut self, buf: &B) -> Result<usize, DeviceError> {
        self.check_open()?;
        if !self.flags.mode.writable() {
            return Err(DeviceError::BadDescriptor);
        }
        let interrupt = &self.caller.interrupt;
        let n = match &self.binding {
            Binding::Store(store) => {
                let n = store.write(self.pos, buf, interrupt).await?;
                self.pos += n as u64;
                n
            }
            Binding::Channel(channel) => {
                channel
                    .write(buf, self.flags.nonblocking, interrupt)
                    .await?
            }
            Binding::Event(event) => {
                event.signal();
                buf.len()
            }
        };
        trace!(session = ?self.id, bytes = n, "write");
        Ok(n)
    }

    /// Write all of `data`, one transfer at a time.
    ///
    /// # Errors
    /// The first error of a transfer; earlier transfers stay written
    pub async fn write_all(&mut self, mut data: &[u8]) -> Result<(), DeviceError> {
        while !data.is_empty() {
            let n = self.write(data).await?;
            if n == 0 {
                return Err(DeviceError::WouldBlock);
            }
            data = data.get(n..).unwrap_or_default();
        }
        Ok(())
    }

    /// Move the position. Only stores have one.
    ///
    /// # Errors
    /// `IllegalSeek` on a channel or event, `InvalidArgument` for a negative
    /// result
    pub async fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, DeviceError> {
        self.check_open()?;
        match &self.binding {
            Binding::Store(store) => {
                self.pos = store
                    .seek(self.pos, offset, whence, &self.caller.interrupt)
                    .await?;
                Ok(self.pos)
            }
            Binding::Channel(_) | Binding::Event(_) => Err(DeviceError::IllegalSeek),
        }
    }

    /// Move to an absolute position; the whole `u64` range is accepted.
    ///
    /// # Errors
    /// `IllegalSeek` on a channel or event
    pub fn seek_to(&mut self, pos: u64) -> Result<u64, DeviceError> {
        self.check_open()?;
        match &self.binding {
            Binding::Store(_) => {
                self.pos = pos;
                Ok(pos)
            }
            Binding::Channel(_) | Binding::Event(_) => Err(DeviceError::IllegalSeek),
        }
    }

    /// Run a control command with this session's credentials
    ///
    /// # Errors
    /// See [`control::dispatch`]
    pub fn control(&self, command: u32, arg: ControlArg<'_>) -> Result<i64, DeviceError> {
        self.check_open()?;
        control::dispatch(&self.tunables, &self.caller.creds, command, arg)
    }

    /// What a nonblocking transfer could do now. Stores are always ready,
    /// events are readable while one is pending.
    ///
    /// # Errors
    /// `BadDescriptor` on a closed session, `Interrupted` while waiting
    /// for the channel lock
    pub async fn poll(&self) -> Result<Readiness, DeviceError> {
        self.check_open()?;
        match &self.binding {
            Binding::Store(_) => Ok(Readiness {
                readable: true,
                writable: true,
            }),
            Binding::Channel(channel) => channel.poll(&self.caller.interrupt).await,
            Binding::Event(event) => Ok(Readiness {
                readable: event.pending() > 0,
                writable: true,
            }),
        }
    }

    /// Register for asynchronous readiness notification (channels only)
    ///
    /// # Errors
    /// `NotSupported` on a store or event session
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Notification>, DeviceError> {
        self.check_open()?;
        match &self.binding {
            Binding::Store(_) | Binding::Event(_) => Err(DeviceError::NotSupported),
            Binding::Channel(channel) => channel.subscribe(),
        }
    }

    /// Run the device's close effect
    ///
    /// # Errors
    /// `BadDescriptor` if the session is already closed
    pub fn close(&mut self) -> Result<(), DeviceError> {
        self.check_open()?;
        self.closed = true;
        self.device.release(&self.caller.creds, self.flags);
        debug!(session = ?self.id, device = self.device.name(), "closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("device", &self.device.name())
            .field("flags", &self.flags)
            .field("pos", &self.pos)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ErrorType for Session {
    type Error = DeviceError;
}

impl Read for Session {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Session::read(self, buf).await
    }
}

impl Write for Session {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Session::write(self, buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Seek for Session {
    async fn seek(&mut self, pos: SeekFrom) -> Result<u64, Self::Error> {
        match pos {
            SeekFrom::Start(offset) => self.seek_to(offset),
            SeekFrom::Current(offset) => Session::seek(self, offset, Whence::Current).await,
            SeekFrom::End(offset) => Session::seek(self, offset, Whence::End).await,
        }
    }
}
