//! # Loader Errors

use crate::addresses::{PhysRange, PhysicalAddress};
use crate::filetype::FileType;

/// Failure of a single loading attempt.
///
/// Every variant up to [`BootError::EntryReturned`] is returned to the caller
/// after all reservations and scratch files of the attempt have been released.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("{format}: malformed header: {reason}")]
    MalformedHeader { format: &'static str, reason: String },
    #[error("unrecognized image format ({0})")]
    UnrecognizedFormat(FileType),
    #[error(transparent)]
    RegionConflict(#[from] RegionError),
    #[error("short read from {source_name} at offset {offset:#x}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        source_name: String,
        offset: u64,
        wanted: u64,
        got: u64,
    },
    #[error("I/O failure on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("verification of {component} failed: {reason}")]
    VerificationFailed { component: String, reason: String },
    #[error("invalid boot descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("entry point {0} returned control to the loader")]
    EntryReturned(PhysicalAddress),
}

impl BootError {
    pub(crate) fn malformed(format: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedHeader {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to reserve a physical range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    #[error("cannot reserve {name} at {requested}: overlaps {existing_name} at {existing}")]
    Busy {
        name: String,
        requested: PhysRange,
        existing_name: String,
        existing: PhysRange,
    },
    #[error("cannot reserve {name} at {requested}: outside all known memory banks")]
    OutsideBanks { name: String, requested: PhysRange },
    #[error("cannot reserve {name}: no free space for {size:#x} bytes")]
    NoSpace { name: String, size: u64 },
    #[error("cannot reserve {name}: {start} + {size:#x} overflows the address space")]
    Overflow {
        name: String,
        start: PhysicalAddress,
        size: u64,
    },
    #[error("cannot reserve {name}: zero-sized request")]
    Empty { name: String },
}
