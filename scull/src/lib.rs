//! Character-device teaching examples as an async library
//!
//! - [`store::SegmentedStore`]: sparse byte store in a chain of segment-sets
//! - [`channel::ChannelBuffer`]: bounded ring with blocking transfer
//! - [`access`]: open/close policies gating sessions
//! - [`control`]: command catalog on the process-wide tunables
//! - [`event`]: devices whose reads sleep until a write wakes them
//! - [`driver::Driver`]: named devices, opened into [`session::Session`]s

pub mod access;
pub mod caller;
pub mod channel;
pub mod config;
pub mod control;
pub mod driver;
pub mod error;
pub mod event;
pub mod idgen;
pub mod session;
pub mod store;
pub mod tunables;
pub mod user;
pub mod wait_queue;

pub use access::{AccessPolicy, Binding, OpenFlags, OpenMode};
pub use caller::{Caller, Capability, Credentials, Interrupt};
pub use channel::{ChannelBuffer, PipeDevice, Readiness};
pub use config::{ConfigError, DriverConfig};
pub use control::{ControlArg, ControlCommand, Tunable};
pub use driver::Driver;
pub use error::DeviceError;
pub use event::{Event, EventDevice, EventKind};
pub use idgen::{Handle, IdGen};
pub use session::Session;
pub use store::{SegmentedStore, StoreLayout, Whence};
pub use tunables::Tunables;
pub use wait_queue::{Notification, WaitQueue, Wakeup, RETIRED};
