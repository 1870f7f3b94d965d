//! # Android Boot Image
//!
//! A page-aligned container bundling a kernel, a ramdisk and an optional
//! second stage behind a 608-byte header:
//!
//! ```text
//! 0          page_size         page_size + align(K)      ...
//! ┌─────────┬─────────────────┬─────────────────────────┬───────────┐
//! │ header  │ kernel (K)  pad │ ramdisk (R)         pad │ second    │
//! └─────────┴─────────────────┴─────────────────────────┴───────────┘
//! ```
//!
//! The kernel and ramdisk are split into scratch files and the loading
//! pipeline is re-entered with a descriptor pointing at them, so the kernel
//! is handled by whatever handler recognizes it. The scratch files are
//! removed once the nested load returns, whatever its outcome.

use crate::addresses::{PhysicalAddress, align_up_u64};
use crate::component::LoadedImage;
use crate::config::{COPY_CHUNK, MAX_NESTING_DEPTH};
use crate::descriptor::{BootDescriptor, ImageLocator};
use crate::error::BootError;
use crate::filetype::{ANDROID_MAGIC, FileType, read_u32_le};
use crate::loader::LoadContext;
use crate::registry::ImageHandler;
use crate::source::{FileSource, ImageSource};
use log::{debug, info, warn};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub const ANDROID_HEADER_SIZE: usize = 608;
const NAME_OFFSET: usize = 48;
const NAME_SIZE: usize = 16;
const CMDLINE_OFFSET: usize = 64;
const CMDLINE_SIZE: usize = 512;

const FORMAT: &str = "Android image";

/// Size and requested load address of one section.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub size: u32,
    pub load_addr: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidHeader {
    pub kernel: Section,
    pub ramdisk: Section,
    pub second: Section,
    pub tags_addr: u32,
    pub page_size: u32,
    pub name: String,
    pub cmdline: String,
}

impl AndroidHeader {
    /// Validates the header.
    ///
    /// # Errors
    /// [`BootError::MalformedHeader`] on a bad magic, a page size that is not
    /// a power of two at least as large as the header, or an empty kernel.
    pub fn parse(buf: &[u8]) -> Result<Self, BootError> {
        if buf.len() < ANDROID_HEADER_SIZE {
            return Err(BootError::malformed(FORMAT, "header truncated"));
        }
        if !buf.starts_with(ANDROID_MAGIC) {
            return Err(BootError::malformed(FORMAT, "invalid magic"));
        }

        let word = |off| read_u32_le(buf, off).unwrap_or_default();
        let section = |off| Section {
            size: word(off),
            load_addr: word(off + 4),
        };

        let header = Self {
            kernel: section(8),
            ramdisk: section(16),
            second: section(24),
            tags_addr: word(32),
            page_size: word(36),
            name: c_string(&buf[NAME_OFFSET..NAME_OFFSET + NAME_SIZE]),
            cmdline: c_string(&buf[CMDLINE_OFFSET..CMDLINE_OFFSET + CMDLINE_SIZE]),
        };

        let page_size = header.page_size as usize;
        if !page_size.is_power_of_two() || page_size < ANDROID_HEADER_SIZE {
            return Err(BootError::malformed(
                FORMAT,
                format!("invalid page size {}", header.page_size),
            ));
        }
        if header.kernel.size == 0 {
            return Err(BootError::malformed(FORMAT, "no kernel"));
        }

        Ok(header)
    }

    /// File offset of the kernel.
    #[must_use]
    pub fn kernel_offset(&self) -> u64 {
        u64::from(self.page_size)
    }

    /// File offset of the ramdisk.
    #[must_use]
    pub fn ramdisk_offset(&self) -> u64 {
        self.section_end(self.kernel_offset(), self.kernel.size)
    }

    /// File offset of the second stage.
    #[must_use]
    pub fn second_offset(&self) -> u64 {
        self.section_end(self.ramdisk_offset(), self.ramdisk.size)
    }

    fn section_end(&self, offset: u64, size: u32) -> u64 {
        // u32 sizes and a u32 page size cannot overflow a u64.
        let padded =
            align_up_u64(u64::from(size), u64::from(self.page_size)).unwrap_or(u64::MAX);
        offset.saturating_add(padded)
    }
}

fn c_string(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

/// The sections of one container, each in its own scratch file.
///
/// Dropping the split removes the files.
#[derive(Debug)]
pub struct VendorSplit {
    pub kernel: NamedTempFile,
    pub ramdisk: Option<NamedTempFile>,
}

/// Copies the kernel and ramdisk of `source` into fresh scratch files.
///
/// # Errors
/// A short read if a section extends past the end of the source, or an I/O
/// error from the scratch directory. Files created before the failure are
/// removed.
pub fn split(
    source: &mut dyn ImageSource,
    header: &AndroidHeader,
    scratch_dir: Option<&Path>,
) -> Result<VendorSplit, BootError> {
    let kernel = to_scratch(
        source,
        header.kernel_offset(),
        u64::from(header.kernel.size),
        "aimage-kernel-",
        scratch_dir,
    )?;

    let ramdisk = if header.ramdisk.size == 0 {
        None
    } else {
        Some(to_scratch(
            source,
            header.ramdisk_offset(),
            u64::from(header.ramdisk.size),
            "aimage-ramdisk-",
            scratch_dir,
        )?)
    };

    Ok(VendorSplit { kernel, ramdisk })
}

fn to_scratch(
    source: &mut dyn ImageSource,
    offset: u64,
    len: u64,
    prefix: &str,
    scratch_dir: Option<&Path>,
) -> Result<NamedTempFile, BootError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    let created = match scratch_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    };
    let mut file = created.map_err(|e| BootError::io(prefix.trim_end_matches('-'), e))?;

    let mut chunk = vec![0u8; COPY_CHUNK];
    let mut done = 0u64;
    while done < len {
        #[allow(clippy::cast_possible_truncation)]
        let n = (len - done).min(chunk.len() as u64) as usize;
        source.read_exact_at(offset + done, &mut chunk[..n])?;
        file.write_all(&chunk[..n])
            .map_err(|e| BootError::io(file.path().display().to_string(), e))?;
        done += n as u64;
    }
    file.flush()
        .map_err(|e| BootError::io(file.path().display().to_string(), e))?;

    debug!(
        "{prefix}: {len:#x} bytes at offset {offset:#x} -> {}",
        file.path().display()
    );
    Ok(file)
}

pub struct AndroidImageHandler;

impl AndroidImageHandler {
    /// `load_addr` from the header, if `size` bytes fit there right now.
    fn header_address(
        ctx: &LoadContext<'_>,
        load_addr: u32,
        size: u64,
    ) -> Option<PhysicalAddress> {
        let addr = u64::from(load_addr);
        ctx.is_available(addr, size).then_some(PhysicalAddress::new(addr))
    }

    /// What the nested handler will reserve for the unpacked kernel, which
    /// differs from the section size when the kernel header declares its own.
    fn kernel_placement_size(
        ctx: &LoadContext<'_>,
        scratch: &VendorSplit,
    ) -> Result<u64, BootError> {
        let mut kernel = FileSource::open(scratch.kernel.path())?;
        ctx.placement_size(&mut kernel)
    }
}

impl ImageHandler for AndroidImageHandler {
    fn file_type(&self) -> FileType {
        FileType::AndroidImage
    }

    fn name(&self) -> &'static str {
        "Android boot image"
    }

    fn load(
        &self,
        ctx: &mut LoadContext<'_>,
        desc: &BootDescriptor,
        mut source: Box<dyn ImageSource>,
    ) -> Result<LoadedImage, BootError> {
        if ctx.depth() >= MAX_NESTING_DEPTH {
            return Err(BootError::malformed(
                FORMAT,
                "Android image nested inside another container",
            ));
        }

        let mut buf = [0u8; ANDROID_HEADER_SIZE];
        source.read_exact_at(0, &mut buf)?;
        let header = AndroidHeader::parse(&buf)?;

        info!(
            "Android image '{}': kernel {:#x} bytes, ramdisk {:#x} bytes",
            header.name, header.kernel.size, header.ramdisk.size
        );
        if !header.cmdline.is_empty() {
            info!("command line: {}", header.cmdline);
        }
        if header.second.size != 0 {
            warn!(
                "ignoring {:#x} byte second stage at offset {:#x}",
                header.second.size,
                header.second_offset()
            );
        }

        let scratch = split(&mut *source, &header, ctx.config().scratch_dir.as_deref())?;
        drop(source);

        let mut nested = desc.clone();
        nested.os = ImageLocator::path(scratch.kernel.path());
        if desc.os_address.is_none() {
            let size = Self::kernel_placement_size(ctx, &scratch)?;
            nested.os_address = Self::header_address(ctx, header.kernel.load_addr, size);
        }
        if let Some(ramdisk) = &scratch.ramdisk {
            nested.initrd = Some(ImageLocator::path(ramdisk.path()));
            nested.initrd_address = desc.initrd_address.or_else(|| {
                let size = u64::from(header.ramdisk.size);
                Self::header_address(ctx, header.ramdisk.load_addr, size)
            });
        }

        let result = ctx.load_nested(&nested);
        drop(scratch);
        result.map(|image| {
            image.with_boot_arguments(
                (!header.cmdline.is_empty()).then(|| header.cmdline.clone()),
                (header.tags_addr != 0).then(|| PhysicalAddress::new(u64::from(header.tags_addr))),
            )
        })
    }
}
