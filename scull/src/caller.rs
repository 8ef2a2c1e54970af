//! Caller identity and cancellation
//!
//! A [`Caller`] is what the identity provider hands to every operation: who
//! is calling ([`Credentials`]) and a way to cancel a suspended call
//! ([`Interrupt`]).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::DeviceError;

/// Privileged credentials a caller may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Needed by privileged control verbs
    SysAdmin,
    /// Bypasses owner and exclusivity checks of owner-scoped policies
    DacOverride,
}

impl Capability {
    fn bit(self) -> u8 {
        match self {
            Self::SysAdmin => 0b01,
            Self::DacOverride => 0b10,
        }
    }
}

/// Who is calling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub euid: u32,
    /// Controlling-terminal identity, if the caller has one
    pub controlling_session: Option<u32>,
    caps: u8,
}

impl Credentials {
    /// Unprivileged user with `uid == euid` and no controlling session
    #[must_use]
    pub fn user(uid: u32) -> Self {
        Self {
            uid,
            euid: uid,
            controlling_session: None,
            caps: 0,
        }
    }

    /// Root: uid 0 with every capability
    #[must_use]
    pub fn root() -> Self {
        Self::user(0)
            .with_capability(Capability::SysAdmin)
            .with_capability(Capability::DacOverride)
    }

    #[must_use]
    pub fn with_euid(mut self, euid: u32) -> Self {
        self.euid = euid;
        self
    }

    #[must_use]
    pub fn with_controlling_session(mut self, session: u32) -> Self {
        self.controlling_session = Some(session);
        self
    }

    #[must_use]
    pub fn with_capability(mut self, cap: Capability) -> Self {
        self.caps |= cap.bit();
        self
    }

    #[must_use]
    pub fn capable(&self, cap: Capability) -> bool {
        self.caps & cap.bit() != 0
    }
}

/// Cancellation signal of a caller.
///
/// Raising it makes every suspended call of the caller return
/// [`DeviceError::Interrupted`]. The signal stays raised until cleared, like
/// a pending signal. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is raised
    pub async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` only returns once raised
        let _ = rx.wait_for(|raised| *raised).await;
    }

    /// Run `fut` unless the signal interrupts it first.
    ///
    /// `fut` gets the first chance on every poll, so a step that can complete
    /// without sleeping is never reported as interrupted. `fut` must be
    /// cancel-safe: when interrupted it is dropped mid-flight.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, DeviceError> {
        tokio::select! {
            biased;
            out = fut => Ok(out),
            () = self.raised() => Err(DeviceError::Interrupted),
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

/// Credentials plus cancellation signal of one execution context
#[derive(Debug, Clone)]
pub struct Caller {
    pub creds: Credentials,
    pub interrupt: Interrupt,
}

impl Caller {
    #[must_use]
    pub fn new(creds: Credentials) -> Self {
        Self {
            creds,
            interrupt: Interrupt::new(),
        }
    }

    #[must_use]
    pub fn user(uid: u32) -> Self {
        Self::new(Credentials::user(uid))
    }

    #[must_use]
    pub fn root() -> Self {
        Self::new(Credentials::root())
    }
}
