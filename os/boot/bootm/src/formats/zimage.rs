//! # ARM zImage
//!
//! A self-decompressing kernel with a fixed header in its first `0x30` bytes:
//!
//! ```text
//! 0x00 ┌───────────────────────────┐
//!      │ 9 words of entry code     │
//! 0x24 ├───────────────────────────┤
//!      │ magic  0x016F2818         │  byte-swapped ⇒ foreign byte order
//! 0x28 ├───────────────────────────┤
//!      │ start  (load offset)      │
//! 0x2C ├───────────────────────────┤
//!      │ end    (image end)        │
//! 0x30 └───────────────────────────┘
//! ```
//!
//! A flattened device tree may follow the image directly ("appended DTB").

use crate::addresses::{PhysRange, PhysicalAddress};
use crate::component::{LoadedImage, PayloadKind};
use crate::config::COPY_CHUNK;
use crate::descriptor::BootDescriptor;
use crate::error::BootError;
use crate::filetype::{
    FDT_MAGIC, FileType, ZIMAGE_MAGIC, ZIMAGE_MAGIC_OFFSET, read_u32_be, read_u32_le,
};
use crate::loader::LoadContext;
use crate::memory::PhysicalMemory;
use crate::registry::ImageHandler;
use crate::source::ImageSource;
use log::{debug, info};

pub const ZIMAGE_HEADER_SIZE: usize = 0x30;
const START_OFFSET: usize = 0x28;
const END_OFFSET: usize = 0x2C;

/// Size of the fixed part of a flattened device tree header.
pub(crate) const FDT_HEADER_SIZE: u64 = 40;

const FORMAT: &str = "zImage";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ZImageHeader {
    pub start: u32,
    pub end: u32,
    /// The image was built for the opposite byte order.
    pub swapped: bool,
}

impl ZImageHeader {
    /// Validates the fixed header.
    ///
    /// # Errors
    /// [`BootError::MalformedHeader`] on a bad magic, an inverted or
    /// undersized image range, or a swapped image that is not word-sized.
    pub fn parse(buf: &[u8]) -> Result<Self, BootError> {
        let field = |off| {
            read_u32_le(buf, off).ok_or_else(|| BootError::malformed(FORMAT, "header truncated"))
        };

        let magic = field(ZIMAGE_MAGIC_OFFSET)?;
        let swapped = if magic == ZIMAGE_MAGIC {
            false
        } else if magic == ZIMAGE_MAGIC.swap_bytes() {
            true
        } else {
            return Err(BootError::malformed(
                FORMAT,
                format!("invalid magic {magic:#010x}"),
            ));
        };

        let fix = |v: u32| if swapped { v.swap_bytes() } else { v };
        let start = fix(field(START_OFFSET)?);
        let end = fix(field(END_OFFSET)?);

        if end <= start {
            return Err(BootError::malformed(
                FORMAT,
                format!("end {end:#x} not above start {start:#x}"),
            ));
        }
        let size = end - start;
        if (size as usize) < ZIMAGE_HEADER_SIZE {
            return Err(BootError::malformed(
                FORMAT,
                format!("image size {size:#x} smaller than its header"),
            ));
        }
        if swapped && size % 4 != 0 {
            return Err(BootError::malformed(
                FORMAT,
                format!("byte-swapped image size {size:#x} is not a whole number of words"),
            ));
        }

        Ok(Self {
            start,
            end,
            swapped,
        })
    }

    #[must_use]
    pub fn image_size(&self) -> u64 {
        u64::from(self.end - self.start)
    }
}

/// Swaps the byte order of every 32-bit word in `buf`. A trailing partial
/// word is left untouched.
pub fn swap_words(buf: &mut [u8]) {
    for word in buf.chunks_exact_mut(4) {
        word.reverse();
    }
}

/// Swaps every word of `range` in place.
fn swap_words_in_memory(
    memory: &mut dyn PhysicalMemory,
    range: PhysRange,
) -> Result<(), BootError> {
    let mut chunk = vec![0u8; COPY_CHUNK];
    let mut done = 0u64;
    while done < range.size() {
        #[allow(clippy::cast_possible_truncation)]
        let n = (range.size() - done).min(chunk.len() as u64) as usize;
        let buf = &mut chunk[..n];
        let at = PhysicalAddress::new(range.start().as_u64() + done);
        memory.read(at, buf)?;
        swap_words(buf);
        memory.write(at, buf)?;
        done += n as u64;
    }
    Ok(())
}

/// Reads a device tree stored directly behind the image, if there is one.
fn appended_oftree(
    source: &mut dyn ImageSource,
    image_size: u64,
) -> Result<Option<Vec<u8>>, BootError> {
    if source.len() < image_size + FDT_HEADER_SIZE {
        return Ok(None);
    }

    let mut head = [0u8; 8];
    source.read_exact_at(image_size, &mut head)?;
    if read_u32_be(&head, 0) != Some(FDT_MAGIC) {
        return Ok(None);
    }

    let total = u64::from(read_u32_be(&head, 4).unwrap_or_default());
    if total < FDT_HEADER_SIZE {
        return Err(BootError::malformed(
            FORMAT,
            format!("appended device tree declares size {total:#x}"),
        ));
    }
    source.read_vec(image_size, total).map(Some)
}

fn read_header(source: &mut dyn ImageSource) -> Result<ZImageHeader, BootError> {
    let mut header = [0u8; ZIMAGE_HEADER_SIZE];
    source.read_exact_at(0, &mut header)?;
    ZImageHeader::parse(&header)
}

pub struct ZImageHandler;

impl ImageHandler for ZImageHandler {
    fn file_type(&self) -> FileType {
        FileType::ArmZimage
    }

    fn name(&self) -> &'static str {
        "ARM zImage"
    }

    fn placement_size(&self, source: &mut dyn ImageSource) -> Result<u64, BootError> {
        read_header(source).map(|header| header.image_size())
    }

    fn load(
        &self,
        ctx: &mut LoadContext<'_>,
        desc: &BootDescriptor,
        mut source: Box<dyn ImageSource>,
    ) -> Result<LoadedImage, BootError> {
        let header = read_header(&mut *source)?;
        let size = header.image_size();
        debug!(
            "zImage start {:#x}, end {:#x}, swapped {}",
            header.start, header.end, header.swapped
        );

        let (region, needs_copy) = ctx.place_primary("zImage", desc, &*source, size)?;
        if needs_copy {
            ctx.copy_in(&mut *source, 0, region.start(), size)?;
        }
        if header.swapped {
            swap_words_in_memory(ctx.memory(), region.range())?;
            info!("byte-swapped the kernel image to native order");
        }

        let entry = region.start();
        let mut image = LoadedImage::new(
            FileType::ArmZimage,
            self.name(),
            PayloadKind::Kernel,
            entry,
            region,
        );
        if let Some(blob) = appended_oftree(&mut *source, size)? {
            info!("found a {} byte device tree appended to the kernel", blob.len());
            image = image.with_appended_oftree(blob);
        }
        Ok(image)
    }
}
