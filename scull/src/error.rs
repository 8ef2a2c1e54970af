//! Error taxonomy for device operations.
//!
//! Every operation on a store, channel, policy or session reports one of the
//! variants below. None of them is retried internally; retry policy belongs
//! to the caller.

use core::ffi::c_int;

/// Error type for device operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// Access policy denied the open; no state changed
    #[error("device or resource busy")]
    Busy,

    /// A nonblocking call would otherwise suspend; no state changed
    #[error("operation would block")]
    WouldBlock,

    /// A suspended wait was cancelled; no state changed
    #[error("interrupted while waiting")]
    Interrupted,

    /// Caller-supplied memory is inaccessible; offset/cursor not advanced
    #[error("bad address")]
    Fault,

    /// Allocation failed; growth committed earlier in the same call is kept
    #[error("out of memory")]
    OutOfMemory,

    /// Malformed seek target or control argument
    #[error("invalid argument")]
    InvalidArgument,

    /// Privileged command issued without the required capability
    #[error("operation not permitted")]
    PermissionDenied,

    /// Unrecognized command identifier
    #[error("inappropriate control command")]
    NotSupported,

    /// Session-cloned open attempted without a controlling session
    #[error("no controlling session")]
    NoControllingSession,

    /// Seek on a device without a position (pipes)
    #[error("illegal seek")]
    IllegalSeek,

    /// Operation on a closed session or in a direction the open mode forbids
    #[error("bad descriptor")]
    BadDescriptor,

    /// No device registered under the requested name
    #[error("no such device")]
    NoDevice,
}

impl DeviceError {
    /// Classic positive errno value for this error
    #[must_use]
    pub fn errno(self) -> c_int {
        match self {
            Self::PermissionDenied => 1,  // EPERM
            Self::Interrupted => 4,       // EINTR
            Self::NoControllingSession => 6, // ENXIO
            Self::BadDescriptor => 9,     // EBADF
            Self::WouldBlock => 11,       // EAGAIN
            Self::OutOfMemory => 12,      // ENOMEM
            Self::Fault => 14,            // EFAULT
            Self::Busy => 16,             // EBUSY
            Self::NoDevice => 19,         // ENODEV
            Self::InvalidArgument => 22,  // EINVAL
            Self::NotSupported => 25,     // ENOTTY
            Self::IllegalSeek => 29,      // ESPIPE
        }
    }
}

impl embedded_io::Error for DeviceError {
    fn kind(&self) -> embedded_io::ErrorKind {
        errno_to_error_kind(self.errno())
    }
}

/// Convert errno to `embedded_io::ErrorKind`
#[must_use]
#[allow(clippy::match_same_arms)] // We explicitly list common errno values for documentation
pub fn errno_to_error_kind(errno: c_int) -> embedded_io::ErrorKind {
    match errno {
        1 | 13 => embedded_io::ErrorKind::PermissionDenied, // EPERM, EACCES
        4 => embedded_io::ErrorKind::Interrupted,           // EINTR
        6 | 19 => embedded_io::ErrorKind::NotFound,         // ENXIO, ENODEV
        9 | 14 | 22 | 29 => embedded_io::ErrorKind::InvalidInput, // EBADF, EFAULT, EINVAL, ESPIPE
        12 => embedded_io::ErrorKind::OutOfMemory,          // ENOMEM
        25 => embedded_io::ErrorKind::Unsupported,          // ENOTTY
        // EAGAIN, EBUSY
        11 | 16 => embedded_io::ErrorKind::Other,
        _ => embedded_io::ErrorKind::Other,
    }
}

/// Convert error kind to a static string description
#[must_use]
pub fn error_kind_to_str(kind: embedded_io::ErrorKind) -> &'static str {
    match kind {
        embedded_io::ErrorKind::NotFound => "not found",
        embedded_io::ErrorKind::PermissionDenied => "permission denied",
        embedded_io::ErrorKind::InvalidInput => "invalid input",
        embedded_io::ErrorKind::Interrupted => "interrupted",
        embedded_io::ErrorKind::Unsupported => "unsupported",
        embedded_io::ErrorKind::OutOfMemory => "out of memory",
        embedded_io::ErrorKind::Other => "other error",
        _ => "unknown error",
    }
}
