//! # Placed Components
//!
//! A successful load yields a [`LoadedImage`]: the entry address plus every
//! payload fragment that was placed in RAM. Each [`Component`] owns the
//! [`Region`] backing it, so dropping a `LoadedImage` returns all of its
//! memory to the allocator.

use crate::addresses::{PhysRange, PhysicalAddress};
use crate::filetype::FileType;
use crate::region::Region;
use core::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// The kernel or secondary-stage loader itself.
    Primary,
    Ramdisk,
    /// Flattened device tree.
    DeviceTree,
    /// Trusted firmware.
    Firmware,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Ramdisk => "ramdisk",
            Self::DeviceTree => "device tree",
            Self::Firmware => "firmware",
        })
    }
}

/// What kind of program the primary component is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// An operating system kernel; entered with the configured convention.
    Kernel,
    /// Another boot stage; entered without arguments.
    Bootloader,
}

#[derive(Debug)]
pub struct Component {
    kind: ComponentKind,
    region: Region,
}

impl Component {
    #[must_use]
    pub const fn new(kind: ComponentKind, region: Region) -> Self {
        Self { kind, region }
    }

    #[must_use]
    pub const fn kind(&self) -> ComponentKind {
        self.kind
    }

    #[must_use]
    pub const fn range(&self) -> PhysRange {
        self.region.range()
    }

    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.region.start()
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.region.size()
    }
}

/// Result of loading one boot descriptor.
#[derive(Debug)]
pub struct LoadedImage {
    file_type: FileType,
    handler: &'static str,
    payload: PayloadKind,
    entry: PhysicalAddress,
    components: Vec<Component>,
    appended_oftree: Option<Vec<u8>>,
    cmdline: Option<String>,
    tags_address: Option<PhysicalAddress>,
    extras_placed: bool,
}

impl LoadedImage {
    /// Starts a loaded image from its placed primary component.
    #[must_use]
    pub fn new(
        file_type: FileType,
        handler: &'static str,
        payload: PayloadKind,
        entry: PhysicalAddress,
        primary: Region,
    ) -> Self {
        Self {
            file_type,
            handler,
            payload,
            entry,
            components: vec![Component::new(ComponentKind::Primary, primary)],
            appended_oftree: None,
            cmdline: None,
            tags_address: None,
            extras_placed: false,
        }
    }

    /// Attaches a device tree found directly behind the primary payload.
    #[must_use]
    pub fn with_appended_oftree(mut self, blob: Vec<u8>) -> Self {
        self.appended_oftree = Some(blob);
        self
    }

    /// Records the kernel command line and boot tag address a container
    /// carried. They are reported to the caller only; the hand-off passes
    /// neither, since kernels are booted with a device tree.
    #[must_use]
    pub fn with_boot_arguments(
        mut self,
        cmdline: Option<String>,
        tags_address: Option<PhysicalAddress>,
    ) -> Self {
        self.cmdline = cmdline;
        self.tags_address = tags_address;
        self
    }

    #[must_use]
    pub const fn file_type(&self) -> FileType {
        self.file_type
    }

    #[must_use]
    pub const fn handler(&self) -> &'static str {
        self.handler
    }

    #[must_use]
    pub const fn payload(&self) -> PayloadKind {
        self.payload
    }

    #[must_use]
    pub const fn entry(&self) -> PhysicalAddress {
        self.entry
    }

    #[must_use]
    pub fn cmdline(&self) -> Option<&str> {
        self.cmdline.as_deref()
    }

    #[must_use]
    pub const fn tags_address(&self) -> Option<PhysicalAddress> {
        self.tags_address
    }

    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// The first component of the given kind.
    #[must_use]
    pub fn component(&self, kind: ComponentKind) -> Option<&Component> {
        self.components.iter().find(|c| c.kind == kind)
    }

    /// The primary payload. Always present.
    #[must_use]
    pub fn primary(&self) -> &Component {
        &self.components[0]
    }

    pub(crate) fn push(&mut self, component: Component) {
        debug_assert!(
            self.components
                .iter()
                .all(|c| !c.range().overlaps(&component.range())),
            "components must not overlap"
        );
        self.components.push(component);
    }

    pub(crate) const fn take_appended_oftree(&mut self) -> Option<Vec<u8>> {
        self.appended_oftree.take()
    }

    pub(crate) const fn extras_placed(&self) -> bool {
        self.extras_placed
    }

    pub(crate) const fn mark_extras_placed(&mut self) {
        self.extras_placed = true;
    }
}
