//! # Hand-off
//!
//! Once every component is in place the loader gives up the machine in two
//! steps that can only happen in this order:
//!
//! ```text
//!   Validated ──load──▶ Placed ──quiesce──▶ Quiesced ──transfer──▶ Transferred
//!                          │                                      (never returns)
//!                          └── dry run stops here
//! ```
//!
//! [`PlacedImage`] and [`QuiescedImage`] encode the two intermediate states so
//! that the jump cannot be requested before the platform has been quiesced.
//! The argument vector is fixed at four machine words; its meaning depends on
//! the target's [`HandoffConvention`] and on whether the payload is a kernel
//! or another boot stage.

use crate::addresses::PhysicalAddress;
use crate::component::{ComponentKind, LoadedImage, PayloadKind};
use crate::tracing;
use core::fmt;
use log::{debug, info};

/// Machine id telling a 32-bit ARM kernel to look for a device tree.
pub const ARM_DT_MACHINE_ID: u32 = 0xFFFF_FFFF;

/// Number of argument words passed to the entry point.
pub const HANDOFF_WORDS: usize = 4;

/// Register convention a kernel is entered with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HandoffConvention {
    /// `r0 = 0`, `r1 = machine id`, `r2 = device tree`, `r3 = trusted firmware`.
    Arm32 { machine_id: u32 },
    /// `x0 = device tree`.
    Arm64,
    /// `a0 = hart id`, `a1 = device tree`.
    RiscV { hart_id: u64 },
}

impl Default for HandoffConvention {
    fn default() -> Self {
        Self::Arm32 {
            machine_id: ARM_DT_MACHINE_ID,
        }
    }
}

impl fmt::Display for HandoffConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arm32 { machine_id } => write!(f, "arm32 (machine {machine_id:#x})"),
            Self::Arm64 => f.write_str("arm64"),
            Self::RiscV { hart_id } => write!(f, "riscv (hart {hart_id})"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandoffState {
    Validated,
    Placed,
    Quiesced,
    Transferred,
}

impl fmt::Display for HandoffState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validated => "validated",
            Self::Placed => "placed",
            Self::Quiesced => "quiesced",
            Self::Transferred => "transferred",
        })
    }
}

/// Entry address plus the words passed to it, in argument order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArgumentVector {
    pub entry: PhysicalAddress,
    pub words: [u64; HANDOFF_WORDS],
}

impl ArgumentVector {
    #[must_use]
    pub fn build(convention: HandoffConvention, image: &LoadedImage) -> Self {
        let address = |kind| image.component(kind).map(|c| c.start().as_u64());
        let fdt = address(ComponentKind::DeviceTree);
        let tee = address(ComponentKind::Firmware);

        let words = match (image.payload(), convention) {
            (PayloadKind::Bootloader, _) => [0; HANDOFF_WORDS],
            (PayloadKind::Kernel, HandoffConvention::Arm32 { machine_id }) => {
                let machine = if fdt.is_some() {
                    ARM_DT_MACHINE_ID
                } else {
                    machine_id
                };
                [
                    0,
                    u64::from(machine),
                    fdt.unwrap_or_default(),
                    tee.unwrap_or_default(),
                ]
            }
            (PayloadKind::Kernel, HandoffConvention::Arm64) => [fdt.unwrap_or_default(), 0, 0, 0],
            (PayloadKind::Kernel, HandoffConvention::RiscV { hart_id }) => {
                [hart_id, fdt.unwrap_or_default(), 0, 0]
            }
        };

        Self {
            entry: image.entry(),
            words,
        }
    }
}

/// Machine services needed to leave the loader.
///
/// The quiesce steps are infallible; a platform that cannot perform one must
/// not offer itself for hand-off.
pub trait Platform {
    /// Writes back every dirty data cache line.
    fn flush_dcache(&mut self);

    /// Discards instruction cache contents and prefetched instructions.
    fn invalidate_icache(&mut self);

    /// Stops all registered devices and unmounts filesystems.
    fn shutdown(&mut self);

    fn disable_interrupts(&mut self);

    /// Jumps to `argv.entry`.
    ///
    /// # Safety
    /// The entry address must hold executable code for this CPU that follows
    /// the convention `argv` was built for.
    unsafe fn transfer(&mut self, argv: &ArgumentVector) -> ! {
        unsafe { crate::arch::call_entry(argv) }
    }
}

/// A fully placed image, ready to be quiesced or inspected.
#[derive(Debug)]
pub struct PlacedImage {
    image: LoadedImage,
    convention: HandoffConvention,
}

impl PlacedImage {
    #[must_use]
    pub const fn new(image: LoadedImage, convention: HandoffConvention) -> Self {
        Self { image, convention }
    }

    #[must_use]
    pub const fn image(&self) -> &LoadedImage {
        &self.image
    }

    /// Gives the image back; dropping it releases all of its memory.
    #[must_use]
    pub fn into_image(self) -> LoadedImage {
        self.image
    }

    #[must_use]
    pub const fn convention(&self) -> HandoffConvention {
        self.convention
    }

    #[must_use]
    pub fn argument_vector(&self) -> ArgumentVector {
        ArgumentVector::build(self.convention, &self.image)
    }

    /// Brings the platform into the state the payload expects.
    pub fn quiesce<P: Platform>(self, platform: &mut P) -> QuiescedImage<'_, P> {
        debug!("quiescing the platform");
        platform.flush_dcache();
        platform.invalidate_icache();
        platform.shutdown();
        platform.disable_interrupts();
        info!("{}: {}", self.image.handler(), HandoffState::Quiesced);

        QuiescedImage {
            image: self.image,
            convention: self.convention,
            platform,
        }
    }
}

/// An image whose platform has been quiesced. The only way forward is the jump.
pub struct QuiescedImage<'p, P: Platform> {
    image: LoadedImage,
    convention: HandoffConvention,
    platform: &'p mut P,
}

impl<P: Platform> QuiescedImage<'_, P> {
    #[must_use]
    pub const fn image(&self) -> &LoadedImage {
        &self.image
    }

    /// Enters the payload.
    ///
    /// # Safety
    /// See [`Platform::transfer`].
    ///
    /// # Panics
    /// If the entry point returns.
    pub unsafe fn transfer(self) -> ! {
        let argv = ArgumentVector::build(self.convention, &self.image);
        tracing::trace_handoff(&self.image, &argv);
        info!("{}: {} to {}", self.image.handler(), HandoffState::Transferred, argv.entry);
        unsafe { self.platform.transfer(&argv) }
    }
}

impl<P: Platform> fmt::Debug for QuiescedImage<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuiescedImage")
            .field("image", &self.image)
            .field("convention", &self.convention)
            .finish_non_exhaustive()
    }
}
