//! Control commands
//!
//! A fixed catalog of commands on the process-wide tunables. Command
//! identifiers carry direction, argument size, type and number:
//!
//! ```text
//!  31 30 29             16 15      8 7       0
//! ┌─────┬─────────────────┬─────────┬─────────┐
//! │ dir │      size       │  type   │   nr    │
//! └─────┴─────────────────┴─────────┴─────────┘
//! ```
//!
//! `dir` is seen from the caller: [`IOC_READ`] means the device writes into
//! caller memory, [`IOC_WRITE`] means it reads from it.
//!
//! Verbs per tunable (S = set, T = tell, G = get, Q = query, X = exchange,
//! H = shift):
//!
//! | verb     | argument             | result              | privileged |
//! |----------|----------------------|---------------------|------------|
//! | Set      | value in caller word | 0                   | yes        |
//! | Tell     | inline value         | 0                   | yes        |
//! | Get      | caller word receives | 0                   | no         |
//! | Query    | none                 | current value       | no         |
//! | Exchange | caller word in/out   | 0, old value in word| yes        |
//! | Shift    | inline value         | old value           | yes        |

mod ioc;

pub use ioc::*;

use tracing::debug;

use crate::caller::{Capability, Credentials};
use crate::error::DeviceError;
use crate::tunables::Tunables;
use crate::user::{Access, UserWord};

pub const SCULL_IOC_MAGIC: u8 = b'k';
pub const SCULL_IOC_MAXNR: u32 = 14;

const INT_SIZE: u32 = std::mem::size_of::<i32>() as u32;

pub const SCULL_IOCRESET: u32 = io(SCULL_IOC_MAGIC, 0);
pub const SCULL_IOCSQUANTUM: u32 = iow(SCULL_IOC_MAGIC, 1, INT_SIZE);
pub const SCULL_IOCSQSET: u32 = iow(SCULL_IOC_MAGIC, 2, INT_SIZE);
pub const SCULL_IOCTQUANTUM: u32 = io(SCULL_IOC_MAGIC, 3);
pub const SCULL_IOCTQSET: u32 = io(SCULL_IOC_MAGIC, 4);
pub const SCULL_IOCGQUANTUM: u32 = ior(SCULL_IOC_MAGIC, 5, INT_SIZE);
pub const SCULL_IOCGQSET: u32 = ior(SCULL_IOC_MAGIC, 6, INT_SIZE);
pub const SCULL_IOCQQUANTUM: u32 = io(SCULL_IOC_MAGIC, 7);
pub const SCULL_IOCQQSET: u32 = io(SCULL_IOC_MAGIC, 8);
pub const SCULL_IOCXQUANTUM: u32 = iowr(SCULL_IOC_MAGIC, 9, INT_SIZE);
pub const SCULL_IOCXQSET: u32 = iowr(SCULL_IOC_MAGIC, 10, INT_SIZE);
pub const SCULL_IOCHQUANTUM: u32 = io(SCULL_IOC_MAGIC, 11);
pub const SCULL_IOCHQSET: u32 = io(SCULL_IOC_MAGIC, 12);
pub const SCULL_P_IOCTSIZE: u32 = io(SCULL_IOC_MAGIC, 13);
pub const SCULL_P_IOCQSIZE: u32 = io(SCULL_IOC_MAGIC, 14);

/// Store dimension a verb operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tunable {
    SegmentSize,
    SetSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Reset,
    Set(Tunable),
    Tell(Tunable),
    Get(Tunable),
    Query(Tunable),
    Exchange(Tunable),
    Shift(Tunable),
    TellPipeSize,
    QueryPipeSize,
}

impl ControlCommand {
    const CATALOG: [(u32, ControlCommand); 15] = [
        (SCULL_IOCRESET, Self::Reset),
        (SCULL_IOCSQUANTUM, Self::Set(Tunable::SegmentSize)),
        (SCULL_IOCSQSET, Self::Set(Tunable::SetSize)),
        (SCULL_IOCTQUANTUM, Self::Tell(Tunable::SegmentSize)),
        (SCULL_IOCTQSET, Self::Tell(Tunable::SetSize)),
        (SCULL_IOCGQUANTUM, Self::Get(Tunable::SegmentSize)),
        (SCULL_IOCGQSET, Self::Get(Tunable::SetSize)),
        (SCULL_IOCQQUANTUM, Self::Query(Tunable::SegmentSize)),
        (SCULL_IOCQQSET, Self::Query(Tunable::SetSize)),
        (SCULL_IOCXQUANTUM, Self::Exchange(Tunable::SegmentSize)),
        (SCULL_IOCXQSET, Self::Exchange(Tunable::SetSize)),
        (SCULL_IOCHQUANTUM, Self::Shift(Tunable::SegmentSize)),
        (SCULL_IOCHQSET, Self::Shift(Tunable::SetSize)),
        (SCULL_P_IOCTSIZE, Self::TellPipeSize),
        (SCULL_P_IOCQSIZE, Self::QueryPipeSize),
    ];

    /// Identifier of the command
    #[must_use]
    pub fn id(self) -> u32 {
        Self::CATALOG
            .iter()
            .find(|(_, cmd)| *cmd == self)
            .map_or(0, |(id, _)| *id)
    }

    /// Look up an identifier. Anything outside the catalog, including a
    /// known number with the wrong direction or size, is `NotSupported`.
    ///
    /// # Errors
    /// `NotSupported` for unknown identifiers
    pub fn from_id(id: u32) -> Result<Self, DeviceError> {
        Self::CATALOG
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, cmd)| *cmd)
            .ok_or(DeviceError::NotSupported)
    }

    /// Whether the caller needs [`Capability::SysAdmin`]
    #[must_use]
    pub fn privileged(self) -> bool {
        matches!(
            self,
            Self::Set(_) | Self::Tell(_) | Self::Exchange(_) | Self::Shift(_)
        )
    }
}

/// Argument of a control call
pub enum ControlArg<'a> {
    None,
    /// Passed inline
    Value(u64),
    /// An `int` in caller memory
    User(&'a mut dyn UserWord),
}

impl std::fmt::Debug for ControlArg<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Value(v) => write!(f, "Value({v})"),
            Self::User(_) => f.write_str("User(..)"),
        }
    }
}

/// Check that the caller word may be accessed as the identifier's
/// direction bits demand
fn check_access(id: u32, arg: &ControlArg<'_>) -> Result<(), DeviceError> {
    let dir = ioc_dir(id);
    let needed = [
        (IOC_READ, Access::Write),
        (IOC_WRITE, Access::Read),
    ];
    for (bit, access) in needed {
        if dir & bit == 0 {
            continue;
        }
        match arg {
            ControlArg::User(word) if word.access_ok(access) => {}
            _ => return Err(DeviceError::Fault),
        }
    }
    Ok(())
}

/// A new tunable value: positive and representable as `int`
fn positive(value: i64) -> Result<usize, DeviceError> {
    if value <= 0 || value > i64::from(i32::MAX) {
        return Err(DeviceError::InvalidArgument);
    }
    usize::try_from(value).map_err(|_| DeviceError::InvalidArgument)
}

fn inline(arg: &ControlArg<'_>) -> Result<usize, DeviceError> {
    match arg {
        ControlArg::Value(v) => positive(i64::try_from(*v).unwrap_or(i64::MAX)),
        _ => Err(DeviceError::InvalidArgument),
    }
}

fn user_word<'b>(arg: &'b mut ControlArg<'_>) -> Result<&'b mut dyn UserWord, DeviceError> {
    match arg {
        ControlArg::User(word) => Ok(&mut **word),
        _ => Err(DeviceError::Fault),
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)] // tunables fit in i32
fn as_int(value: usize) -> i32 {
    value as i32
}

fn current(tunables: &Tunables, which: Tunable) -> usize {
    match which {
        Tunable::SegmentSize => tunables.segment_size(),
        Tunable::SetSize => tunables.set_size(),
    }
}

fn swap(tunables: &Tunables, which: Tunable, value: usize) -> usize {
    match which {
        Tunable::SegmentSize => tunables.swap_segment_size(value),
        Tunable::SetSize => tunables.swap_set_size(value),
    }
}

/// Execute a control command against the process-wide tunables.
///
/// Checks run in this order: identifier (`NotSupported`), caller memory
/// (`Fault`), capability (`PermissionDenied`), value (`InvalidArgument`).
/// A failed check leaves the tunables unchanged.
///
/// # Errors
/// See above
pub fn dispatch(
    tunables: &Tunables,
    creds: &Credentials,
    id: u32,
    mut arg: ControlArg<'_>,
) -> Result<i64, DeviceError> {
    if ioc_type(id) != u32::from(SCULL_IOC_MAGIC) || ioc_nr(id) > SCULL_IOC_MAXNR {
        return Err(DeviceError::NotSupported);
    }
    check_access(id, &arg)?;
    let command = ControlCommand::from_id(id)?;
    if command.privileged() && !creds.capable(Capability::SysAdmin) {
        debug!(command = ?command, uid = creds.uid, "not permitted");
        return Err(DeviceError::PermissionDenied);
    }
    debug!(command = ?command, arg = ?arg, uid = creds.uid, "control");

    match command {
        ControlCommand::Reset => {
            tunables.reset();
            Ok(0)
        }
        ControlCommand::Set(which) => {
            let value = positive(i64::from(user_word(&mut arg)?.get_user()?))?;
            swap(tunables, which, value);
            Ok(0)
        }
        ControlCommand::Tell(which) => {
            swap(tunables, which, inline(&arg)?);
            Ok(0)
        }
        ControlCommand::Get(which) => {
            user_word(&mut arg)?.put_user(as_int(current(tunables, which)))?;
            Ok(0)
        }
        ControlCommand::Query(which) => Ok(current(tunables, which) as i64),
        ControlCommand::Exchange(which) => {
            let word = user_word(&mut arg)?;
            let value = positive(i64::from(word.get_user()?))?;
            let old = swap(tunables, which, value);
            if let Err(e) = word.put_user(as_int(old)) {
                swap(tunables, which, old);
                return Err(e);
            }
            Ok(0)
        }
        ControlCommand::Shift(which) => {
            let old = swap(tunables, which, inline(&arg)?);
            Ok(old as i64)
        }
        ControlCommand::TellPipeSize => {
            let value = inline(&arg)?;
            if value < 2 {
                return Err(DeviceError::InvalidArgument);
            }
            tunables.set_pipe_buffer(value);
            Ok(0)
        }
        ControlCommand::QueryPipeSize => Ok(tunables.pipe_buffer() as i64),
    }
}
