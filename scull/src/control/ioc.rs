//! Command identifier encoding

pub const IOC_NRBITS: u32 = 8;
pub const IOC_TYPEBITS: u32 = 8;
pub const IOC_SIZEBITS: u32 = 14;
pub const IOC_DIRBITS: u32 = 2;

pub const IOC_NRSHIFT: u32 = 0;
pub const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
pub const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
pub const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

const fn mask(bits: u32) -> u32 {
    (1 << bits) - 1
}

/// No data transfer
pub const IOC_NONE: u32 = 0;
/// Caller memory is read by the device
pub const IOC_WRITE: u32 = 1;
/// Caller memory is written by the device
pub const IOC_READ: u32 = 2;

#[must_use]
pub const fn ioc(dir: u32, ty: u8, nr: u32, size: u32) -> u32 {
    ((dir & mask(IOC_DIRBITS)) << IOC_DIRSHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr & mask(IOC_NRBITS)) << IOC_NRSHIFT)
        | ((size & mask(IOC_SIZEBITS)) << IOC_SIZESHIFT)
}

#[must_use]
pub const fn io(ty: u8, nr: u32) -> u32 {
    ioc(IOC_NONE, ty, nr, 0)
}

#[must_use]
pub const fn ior(ty: u8, nr: u32, size: u32) -> u32 {
    ioc(IOC_READ, ty, nr, size)
}

#[must_use]
pub const fn iow(ty: u8, nr: u32, size: u32) -> u32 {
    ioc(IOC_WRITE, ty, nr, size)
}

#[must_use]
pub const fn iowr(ty: u8, nr: u32, size: u32) -> u32 {
    ioc(IOC_READ | IOC_WRITE, ty, nr, size)
}

#[must_use]
pub const fn ioc_dir(id: u32) -> u32 {
    (id >> IOC_DIRSHIFT) & mask(IOC_DIRBITS)
}

#[must_use]
pub const fn ioc_type(id: u32) -> u32 {
    (id >> IOC_TYPESHIFT) & mask(IOC_TYPEBITS)
}

#[must_use]
pub const fn ioc_nr(id: u32) -> u32 {
    (id >> IOC_NRSHIFT) & mask(IOC_NRBITS)
}

#[must_use]
pub const fn ioc_size(id: u32) -> u32 {
    (id >> IOC_SIZESHIFT) & mask(IOC_SIZEBITS)
}
