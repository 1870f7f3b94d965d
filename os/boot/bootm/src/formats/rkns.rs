//! # Rockchip Multi-Slot Boot Image
//!
//! Mask ROM picks one of up to four slots and tells the next stage which one
//! it ran. The slot table order and the boot order are independent, so the
//! handler scans every slot, starting at the reported one and wrapping
//! around, for the first one holding a secondary-stage loader.
//!
//! ```text
//! 0x000 "RKNS"
//! 0x008 n_files       bits 16..31: slot count
//! 0x00C hash type     0 none, 1 SHA-256, 2 SHA-512
//! 0x078 slot[0..4]    88 bytes each:
//!       +0x00 sector  bits 0..15 offset, bits 16..31 count (512 byte sectors)
//!       +0x04 reserved
//!       +0x08 reserved
//!       +0x0C image number
//!       +0x10 reserved[8]
//!       +0x18 hash[64]
//! ```

use crate::addresses::PhysicalAddress;
use crate::component::{LoadedImage, PayloadKind};
use crate::config::{RKNS_MAX_SLOTS, RKNS_SECTOR_SIZE};
use crate::descriptor::BootDescriptor;
use crate::error::BootError;
use crate::filetype::{FileType, RKNS_MAGIC, detect, read_u32_le};
use crate::loader::LoadContext;
use crate::registry::ImageHandler;
use crate::source::ImageSource;
use crate::verify::{self, HashAlgorithm};
use log::{debug, info, warn};

const N_FILES_OFFSET: usize = 0x08;
const HASH_TYPE_OFFSET: usize = 0x0C;
const SLOTS_OFFSET: usize = 0x78;
const SLOT_SIZE: usize = 88;
const SLOT_HASH_OFFSET: usize = 0x18;
const SLOT_HASH_SIZE: usize = 64;

pub const RKNS_HEADER_SIZE: usize = SLOTS_OFFSET + RKNS_MAX_SLOTS * SLOT_SIZE;

const FORMAT: &str = "Rockchip image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub sector_offset: u16,
    pub sector_count: u16,
    pub image_number: u32,
    pub hash: [u8; SLOT_HASH_SIZE],
}

impl SlotDescriptor {
    #[must_use]
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.sector_offset) * RKNS_SECTOR_SIZE
    }

    #[must_use]
    pub fn byte_len(&self) -> u64 {
        u64::from(self.sector_count) * RKNS_SECTOR_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RknsHeader {
    pub hash: Option<HashAlgorithm>,
    pub slots: Vec<SlotDescriptor>,
}

impl RknsHeader {
    /// Validates the header and reads the used slot descriptors.
    ///
    /// # Errors
    /// [`BootError::MalformedHeader`] on a bad magic, a slot count outside
    /// `1..=4` or an unknown hash type.
    pub fn parse(buf: &[u8]) -> Result<Self, BootError> {
        if buf.len() < RKNS_HEADER_SIZE {
            return Err(BootError::malformed(FORMAT, "header truncated"));
        }
        if !buf.starts_with(RKNS_MAGIC) {
            return Err(BootError::malformed(FORMAT, "invalid magic"));
        }

        let word = |off| read_u32_le(buf, off).unwrap_or_default();

        let count = (word(N_FILES_OFFSET) >> 16) as usize;
        if count == 0 || count > RKNS_MAX_SLOTS {
            return Err(BootError::malformed(
                FORMAT,
                format!("slot count {count} outside 1..={RKNS_MAX_SLOTS}"),
            ));
        }

        let hash = match word(HASH_TYPE_OFFSET) {
            0 => None,
            1 => Some(HashAlgorithm::Sha256),
            2 => Some(HashAlgorithm::Sha512),
            other => {
                return Err(BootError::malformed(
                    FORMAT,
                    format!("unknown hash type {other}"),
                ));
            }
        };

        let slots = (0..count)
            .map(|i| {
                let base = SLOTS_OFFSET + i * SLOT_SIZE;
                let sector = word(base);
                let mut hash = [0u8; SLOT_HASH_SIZE];
                hash.copy_from_slice(
                    &buf[base + SLOT_HASH_OFFSET..base + SLOT_HASH_OFFSET + SLOT_HASH_SIZE],
                );
                #[allow(clippy::cast_possible_truncation)]
                let (sector_offset, sector_count) =
                    ((sector & 0xFFFF) as u16, (sector >> 16) as u16);
                SlotDescriptor {
                    sector_offset,
                    sector_count,
                    image_number: word(base + 0x0C),
                    hash,
                }
            })
            .collect();

        Ok(Self { hash, slots })
    }
}

/// Slot indices in scan order: `selected` first, then the rest wrapping around.
pub fn scan_order(selected: usize, count: usize) -> impl Iterator<Item = usize> {
    (0..count).map(move |i| (selected + i) % count)
}

pub struct RockchipImageHandler;

impl ImageHandler for RockchipImageHandler {
    fn file_type(&self) -> FileType {
        FileType::RockchipImage
    }

    fn name(&self) -> &'static str {
        "Rockchip boot image"
    }

    fn load(
        &self,
        ctx: &mut LoadContext<'_>,
        desc: &BootDescriptor,
        mut source: Box<dyn ImageSource>,
    ) -> Result<LoadedImage, BootError> {
        let mut buf = [0u8; RKNS_HEADER_SIZE];
        source.read_exact_at(0, &mut buf)?;
        let header = RknsHeader::parse(&buf)?;

        let count = header.slots.len();
        let selected = usize::from(desc.boot_slot.unwrap_or(0));
        if selected >= count {
            return Err(BootError::InvalidDescriptor(format!(
                "boot slot {selected} but the image has {count} slot(s)"
            )));
        }
        debug!("{count} slot(s), boot slot {selected}");

        for index in scan_order(selected, count) {
            let slot = &header.slots[index];
            let (offset, len) = (slot.byte_offset(), slot.byte_len());
            if len == 0 {
                debug!("slot {index}: empty");
                continue;
            }
            if offset.saturating_add(len) > source.len() {
                warn!(
                    "slot {index}: {len:#x} bytes at {offset:#x} extend past the end of {}, skipping",
                    source.name()
                );
                continue;
            }

            let data = source.read_vec(offset, len)?;
            let file_type = detect(&data);
            if file_type != FileType::ArmBarebox {
                debug!("slot {index}: {file_type}, not a boot loader");
                continue;
            }

            let component = format!("slot {index}");
            match header.hash {
                Some(algorithm) => verify::apply(desc.verify, desc.force, &component, || {
                    algorithm.check(&data, &slot.hash)
                })?,
                None => warn!("{component}: image carries no hash, not verified"),
            }

            info!("booting slot {index} (image {})", slot.image_number);
            let region =
                ctx.place("bootloader", desc.os_address, len, PhysicalAddress::zero(), desc)?;
            ctx.memory().write(region.start(), &data)?;

            let entry = region.start();
            return Ok(LoadedImage::new(
                FileType::RockchipImage,
                self.name(),
                PayloadKind::Bootloader,
                entry,
                region,
            ));
        }

        Err(BootError::malformed(
            FORMAT,
            "no slot holds a secondary-stage loader",
        ))
    }
}
