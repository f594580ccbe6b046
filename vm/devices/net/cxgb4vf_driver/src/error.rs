// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types.

use t4vf_defs::mac::MacAddress;
use thiserror::Error;

/// An errno value reported by a collaborator (firmware mailbox, SGE or the
/// host interrupt layer). Always positive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Errno(pub i32);

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // io::Error appends "(os error N)".
        std::fmt::Display::fmt(&std::io::Error::from_raw_os_error(self.0), f)
    }
}

impl std::error::Error for Errno {}

impl Errno {
    pub const ENOMEM: Self = Self(libc::ENOMEM);
    pub const EINVAL: Self = Self(libc::EINVAL);
    pub const EBUSY: Self = Self(libc::EBUSY);
    pub const ENXIO: Self = Self(libc::ENXIO);
    pub const ENOSPC: Self = Self(libc::ENOSPC);
    pub const ETIMEDOUT: Self = Self(libc::ETIMEDOUT);
    pub const EIO: Self = Self(libc::EIO);
}

/// An error returned by adapter operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The adapter failed firmware initialization and only supports
    /// enumeration.
    #[error("no firmware connection, adapter is in debug mode")]
    NoFirmware,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("queue geometry cannot change after the adapter has been brought up")]
    Busy,
    #[error("{0} cannot be used as an interface address")]
    AddrNotAvail(MacAddress),
    #[error("no such port {0}")]
    NoSuchPort(usize),
    #[error("firmware command {op} failed")]
    Firmware {
        op: &'static str,
        #[source]
        err: Errno,
    },
    #[error("failed to allocate {what}")]
    QueueAlloc {
        what: &'static str,
        #[source]
        err: Errno,
    },
    #[error("failed to request interrupt vector {vector} ({name})")]
    RequestIrq {
        vector: u32,
        name: String,
        #[source]
        err: Errno,
    },
    #[error("no interrupts could be allocated")]
    NoInterrupts(#[source] Errno),
    #[error("could not register any net devices")]
    NoNetDevices,
}

impl Error {
    pub(crate) fn firmware(op: &'static str) -> impl FnOnce(Errno) -> Self {
        move |err| Self::Firmware { op, err }
    }

    /// Returns the negative errno equivalent of this error.
    pub fn errno(&self) -> i32 {
        -match self {
            Error::NoFirmware => libc::ENXIO,
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::Busy => libc::EBUSY,
            Error::AddrNotAvail(_) => libc::EADDRNOTAVAIL,
            Error::NoSuchPort(_) | Error::NoNetDevices => libc::ENODEV,
            Error::Firmware { err, .. }
            | Error::QueueAlloc { err, .. }
            | Error::RequestIrq { err, .. }
            | Error::NoInterrupts(err) => err.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(Error::NoFirmware.errno(), -libc::ENXIO);
        assert_eq!(Error::Busy.errno(), -libc::EBUSY);
        assert_eq!(
            Error::AddrNotAvail(MacAddress::ZERO).errno(),
            -libc::EADDRNOTAVAIL
        );
        assert_eq!(
            Error::firmware("set_rxmode")(Errno::ETIMEDOUT).errno(),
            -libc::ETIMEDOUT
        );
    }
}
