//! # Boot Descriptor
//!
//! Everything a caller decides about one boot attempt. The descriptor is
//! built once, passed by shared reference through every stage and never
//! modified; results come back as a [`LoadedImage`](crate::component::LoadedImage).

use crate::addresses::PhysicalAddress;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Where an image's bytes come from.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageLocator {
    /// A file on a mounted filesystem.
    Path(PathBuf),
    /// A buffer supplied by the caller.
    Buffer { name: String, bytes: Arc<[u8]> },
    /// An image already lying in physical memory.
    Resident { addr: PhysicalAddress, len: u64 },
}

impl ImageLocator {
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    #[must_use]
    pub fn buffer(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Buffer {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for ImageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Buffer { name, bytes } => f
                .debug_struct("Buffer")
                .field("name", name)
                .field("len", &bytes.len())
                .finish(),
            Self::Resident { addr, len } => f
                .debug_struct("Resident")
                .field("addr", addr)
                .field("len", len)
                .finish(),
        }
    }
}

impl fmt::Display for ImageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Buffer { name, .. } => f.write_str(name),
            Self::Resident { addr, .. } => write!(f, "memory@{addr}"),
        }
    }
}

/// How hash mismatches are treated.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum VerifyPolicy {
    /// Mismatches abort the load unless forced.
    #[default]
    Enforce,
    /// Mismatches are logged and the payload is accepted.
    Warn,
    /// Hashes are not computed.
    Skip,
}

/// Caller-supplied parameters of one boot attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootDescriptor {
    pub os: ImageLocator,
    pub os_address: Option<PhysicalAddress>,
    pub initrd: Option<ImageLocator>,
    pub initrd_address: Option<PhysicalAddress>,
    pub oftree: Option<ImageLocator>,
    pub oftree_address: Option<PhysicalAddress>,
    pub tee: Option<ImageLocator>,
    pub verify: VerifyPolicy,
    /// Accept payloads that fail verification under [`VerifyPolicy::Enforce`].
    pub force: bool,
    /// Stop after placement; never quiesce or jump.
    pub dry_run: bool,
    pub verbosity: u8,
    /// Slot the previous boot stage ran from, for multi-slot containers.
    pub boot_slot: Option<u8>,
}

impl BootDescriptor {
    #[must_use]
    pub const fn new(os: ImageLocator) -> Self {
        Self {
            os,
            os_address: None,
            initrd: None,
            initrd_address: None,
            oftree: None,
            oftree_address: None,
            tee: None,
            verify: VerifyPolicy::Enforce,
            force: false,
            dry_run: false,
            verbosity: 0,
            boot_slot: None,
        }
    }

    #[must_use]
    pub fn with_os_address(mut self, addr: u64) -> Self {
        self.os_address = Some(PhysicalAddress::new(addr));
        self
    }

    #[must_use]
    pub fn with_initrd(mut self, initrd: ImageLocator) -> Self {
        self.initrd = Some(initrd);
        self
    }

    #[must_use]
    pub fn with_initrd_address(mut self, addr: u64) -> Self {
        self.initrd_address = Some(PhysicalAddress::new(addr));
        self
    }

    #[must_use]
    pub fn with_oftree(mut self, oftree: ImageLocator) -> Self {
        self.oftree = Some(oftree);
        self
    }

    #[must_use]
    pub fn with_oftree_address(mut self, addr: u64) -> Self {
        self.oftree_address = Some(PhysicalAddress::new(addr));
        self
    }

    #[must_use]
    pub fn with_tee(mut self, tee: ImageLocator) -> Self {
        self.tee = Some(tee);
        self
    }

    #[must_use]
    pub fn with_verify(mut self, verify: VerifyPolicy) -> Self {
        self.verify = verify;
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_boot_slot(mut self, slot: u8) -> Self {
        self.boot_slot = Some(slot);
        self
    }
}
