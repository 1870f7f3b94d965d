//! # Boot Image Loading and Hand-off
//!
//! Detects the format of a boot image, places its components in physical
//! memory without letting them collide, and passes control to the loaded
//! payload.
//!
//! ## Overview
//!
//! ```text
//!  BootDescriptor ─▶ detect ─▶ HandlerRegistry ─▶ ImageHandler::load
//!                                                      │  ▲
//!                              container formats ──────┘  │ load_nested (depth ≤ 1)
//!                                                      ▼
//!                     RegionAllocator ◀── place ── primary, ramdisk, oftree, tee
//!                                                      │
//!                                                      ▼
//!                              PlacedImage ─▶ QuiescedImage ─▶ entry (never returns)
//! ```
//!
//! | Format | Handler | Payload |
//! |--------|---------|---------|
//! | ARM zImage | [`ZImageHandler`](formats::ZImageHandler) | kernel |
//! | U-Boot uImage | [`UImageHandler`](formats::UImageHandler) | kernel |
//! | barebox | [`BareboxHandler`](formats::BareboxHandler) | boot loader |
//! | Android boot image | [`AndroidImageHandler`](formats::AndroidImageHandler) | nested image |
//! | Rockchip RKNS | [`RockchipImageHandler`](formats::RockchipImageHandler) | boot loader |
//! | ELF executable | [`ElfHandler`](formats::ElfHandler) | kernel |
//!
//! Every reservation is a [`Region`] that releases itself when dropped, so a
//! failed or abandoned load leaves the allocator as it found it.
//!
//! ## Typical Usage
//!
//! ```rust
//! use bootm::banks::{BankCatalogue, MemoryBank};
//! use bootm::{BootDescriptor, HandlerRegistry, ImageLocator, LoadContext, LoaderConfig, SimulatedRam};
//!
//! let banks = BankCatalogue::new()
//!     .with_bank(MemoryBank::new("ram0", 0x8000_0000, 64 << 20).unwrap());
//! let mut ram = SimulatedRam::new(banks.clone());
//! let mut ctx = LoadContext::new(HandlerRegistry::global(), &banks, &mut ram, LoaderConfig::default());
//!
//! let mut kernel = vec![0u8; 4096];
//! kernel[0x24..0x28].copy_from_slice(&0x016F_2818u32.to_le_bytes());
//! kernel[0x2C..0x30].copy_from_slice(&4096u32.to_le_bytes());
//!
//! let desc = BootDescriptor::new(ImageLocator::buffer("zImage", kernel));
//! let image = ctx.load(&desc).unwrap();
//! assert_eq!(image.entry().as_u64(), 0x8000_0000 + (32 << 20));
//! ```

pub mod addresses;
pub mod arch;
pub mod banks;
pub mod component;
pub mod config;
pub mod descriptor;
pub mod error;
mod extras;
pub mod filetype;
pub mod formats;
pub mod handoff;
pub mod loader;
pub mod logger;
pub mod memory;
pub mod region;
pub mod registry;
pub mod source;
pub mod tracing;
pub mod verify;

pub use addresses::{PhysRange, PhysicalAddress};
pub use component::{Component, ComponentKind, LoadedImage, PayloadKind};
pub use config::LoaderConfig;
pub use descriptor::{BootDescriptor, ImageLocator, VerifyPolicy};
pub use error::{BootError, RegionError};
pub use filetype::FileType;
pub use handoff::{ArgumentVector, HandoffConvention, HandoffState, Platform, PlacedImage};
pub use loader::LoadContext;
pub use memory::{PhysicalMemory, SimulatedRam};
pub use region::{Region, RegionAllocator};
pub use registry::{HandlerRegistry, ImageHandler};

use log::info;

/// Loads `desc` and, unless it is a dry run, boots it.
///
/// A dry run returns the placed image; dropping it releases every
/// reservation. Otherwise this call only comes back with an error.
///
/// # Errors
/// Any [`BootError`] raised before the platform is quiesced.
///
/// # Safety
/// Outside a dry run the loaded payload is executed; see
/// [`Platform::transfer`].
pub unsafe fn bootm<P: Platform>(
    ctx: &mut LoadContext<'_>,
    desc: &BootDescriptor,
    platform: &mut P,
) -> Result<PlacedImage, BootError> {
    let image = ctx.load(desc)?;
    info!("{}: {} at {}", image.handler(), HandoffState::Placed, image.entry());

    let placed = PlacedImage::new(image, ctx.config().convention);
    if desc.dry_run {
        info!("dry run, not booting");
        return Ok(placed);
    }

    let quiesced = placed.quiesce(platform);
    unsafe { quiesced.transfer() }
}
