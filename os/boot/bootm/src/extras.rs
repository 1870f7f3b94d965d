//! # Ramdisk, Device Tree and Trusted Firmware
//!
//! Placed after the primary component, each one above the previous unless
//! the descriptor pins its address. Trusted firmware always goes to the
//! address its own header names.

use crate::addresses::PhysicalAddress;
use crate::component::{Component, ComponentKind, LoadedImage};
use crate::descriptor::{BootDescriptor, ImageLocator};
use crate::error::BootError;
use crate::filetype::{FDT_MAGIC, read_u32_be};
use crate::formats::optee::{OPTEE_HEADER_SIZE, OpteeHeader};
use crate::formats::zimage::FDT_HEADER_SIZE;
use crate::loader::LoadContext;
use crate::region::Region;
use log::{info, warn};

/// Places every extra named by `desc` next to `image`'s primary component.
///
/// # Errors
/// Any [`BootError`]. Extras already pushed onto `image` stay owned by it and
/// are released with it.
pub fn place(
    ctx: &mut LoadContext<'_>,
    desc: &BootDescriptor,
    image: &mut LoadedImage,
) -> Result<(), BootError> {
    let mut floor = next_floor(image.primary().range().end())?;

    if let Some(initrd) = &desc.initrd {
        let region = place_ramdisk(ctx, desc, initrd, floor)?;
        floor = next_floor(region.range().end())?;
        image.push(Component::new(ComponentKind::Ramdisk, region));
    }

    let blob = match (image.take_appended_oftree(), &desc.oftree) {
        (Some(blob), Some(oftree)) => {
            warn!("using the device tree appended to the kernel, ignoring {oftree}");
            Some(blob)
        }
        (Some(blob), None) => Some(blob),
        (None, Some(oftree)) => Some(read_oftree(ctx, oftree)?),
        (None, None) => None,
    };
    if let Some(blob) = blob {
        let region = ctx.place("oftree", desc.oftree_address, blob.len() as u64, floor, desc)?;
        ctx.memory().write(region.start(), &blob)?;
        image.push(Component::new(ComponentKind::DeviceTree, region));
    }

    if let Some(tee) = &desc.tee {
        let region = place_tee(ctx, tee)?;
        image.push(Component::new(ComponentKind::Firmware, region));
    }

    Ok(())
}

fn next_floor(end: u64) -> Result<PhysicalAddress, BootError> {
    PhysicalAddress::new(end)
        .page_align_up()
        .ok_or_else(|| BootError::InvalidDescriptor(format!("no room above {end:#x}")))
}

fn place_ramdisk(
    ctx: &mut LoadContext<'_>,
    desc: &BootDescriptor,
    initrd: &ImageLocator,
    floor: PhysicalAddress,
) -> Result<Region, BootError> {
    let mut source = ctx.open(initrd)?;
    if source.is_empty() {
        return Err(BootError::InvalidDescriptor(format!("ramdisk {initrd} is empty")));
    }
    let size = source.len();
    let region = ctx.place("initrd", desc.initrd_address, size, floor, desc)?;
    ctx.copy_in(&mut *source, 0, region.start(), size)?;
    Ok(region)
}

/// Reads a device tree blob, trimmed to the size its header declares.
fn read_oftree(ctx: &LoadContext<'_>, oftree: &ImageLocator) -> Result<Vec<u8>, BootError> {
    let mut source = ctx.open(oftree)?;
    let mut head = [0u8; 8];
    source
        .read_exact_at(0, &mut head)
        .map_err(|_| BootError::malformed("device tree", "header truncated"))?;
    if read_u32_be(&head, 0) != Some(FDT_MAGIC) {
        return Err(BootError::malformed("device tree", "invalid magic"));
    }

    let total = u64::from(read_u32_be(&head, 4).unwrap_or_default());
    if total < FDT_HEADER_SIZE {
        return Err(BootError::malformed(
            "device tree",
            format!("declared size {total:#x} smaller than its header"),
        ));
    }
    source.read_vec(0, total)
}

fn place_tee(ctx: &mut LoadContext<'_>, tee: &ImageLocator) -> Result<Region, BootError> {
    let mut source = ctx.open(tee)?;
    let mut head = [0u8; OPTEE_HEADER_SIZE];
    source.read_exact_at(0, &mut head)?;
    let header = OpteeHeader::parse(&head)?;

    let size = u64::from(header.init_size);
    let region = ctx.allocator().reserve("tee", header.load_addr, size)?;
    ctx.copy_in(&mut *source, OPTEE_HEADER_SIZE as u64, region.start(), size)?;
    info!("tee: {} ({size} bytes)", region.range());
    Ok(region)
}
