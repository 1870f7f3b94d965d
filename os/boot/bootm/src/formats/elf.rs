//! # ELF Executables
//!
//! All `PT_LOAD` segments are placed as one contiguous block that keeps
//! their relative layout. The block starts at the lowest segment address
//! rounded down to a page, or at the requested load address, in which case
//! the entry point moves with it:
//!
//! ```text
//!  link view    base ─┬─ .text ─┬── gap ──┬─ .data ─┬─ .bss ─┬─ top
//!                     │         │         │         │ zeroed │
//!  load view    load ─┴─────────┴─────────┴─────────┴────────┴─ load + (top - base)
//! ```

pub mod parser;

use crate::addresses::{PhysicalAddress, align_down_u64, align_up_u64};
use crate::component::{LoadedImage, PayloadKind};
use crate::config::PAGE_SIZE;
use crate::descriptor::BootDescriptor;
use crate::error::BootError;
use crate::filetype::FileType;
use crate::loader::LoadContext;
use crate::registry::ImageHandler;
use crate::source::ImageSource;
use log::{debug, info};
use parser::{ELF_HEADER_MAX, ElfHeader, LoadSegment};

pub use parser::PFlags;

const FORMAT: &str = "ELF";

/// Where the segment block lives when linked and when loaded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Lowest segment address, page aligned.
    pub link_base: u64,
    /// Address the block is copied to.
    pub load_base: u64,
    /// Page-rounded size of the block.
    pub span: u64,
}

impl Layout {
    /// Computes the block covering `segments`.
    ///
    /// # Errors
    /// [`BootError::MalformedHeader`] without segments or if the block end
    /// overflows; [`BootError::InvalidDescriptor`] for an unaligned request.
    pub fn compute(
        segments: &[LoadSegment],
        requested: Option<PhysicalAddress>,
    ) -> Result<Self, BootError> {
        let (Some(low), Some(high)) = (
            segments.iter().map(|s| s.vaddr).min(),
            segments.iter().map(LoadSegment::end).max(),
        ) else {
            return Err(BootError::malformed(FORMAT, "no loadable segments"));
        };

        let link_base = align_down_u64(low, PAGE_SIZE);
        let top = align_up_u64(high, PAGE_SIZE)
            .ok_or_else(|| BootError::malformed(FORMAT, "segment end overflows"))?;
        let span = top - link_base;

        let load_base = match requested {
            Some(addr) if !addr.is_page_aligned() => {
                return Err(BootError::InvalidDescriptor(format!(
                    "ELF load address {addr} is not page aligned"
                )));
            }
            Some(addr) => addr.as_u64(),
            None => link_base,
        };
        if load_base.checked_add(span).is_none() {
            return Err(BootError::malformed(
                FORMAT,
                format!("image of {span:#x} bytes does not fit at {load_base:#x}"),
            ));
        }

        Ok(Self {
            link_base,
            load_base,
            span,
        })
    }

    /// Moves a link-time address inside the block to its load address.
    #[must_use]
    pub const fn relocate(&self, vaddr: u64) -> Option<u64> {
        if vaddr < self.link_base || vaddr - self.link_base >= self.span {
            return None;
        }
        Some(self.load_base + (vaddr - self.link_base))
    }
}

/// Parses the headers and checks every loadable segment against the file.
fn read_segments(
    source: &mut dyn ImageSource,
) -> Result<(ElfHeader, Vec<LoadSegment>), BootError> {
    #[allow(clippy::cast_possible_truncation)]
    let head_len = source.len().min(ELF_HEADER_MAX as u64) as usize;
    let mut head = vec![0u8; head_len];
    source.read_exact_at(0, &mut head)?;
    let header = ElfHeader::parse(&head)?;

    let (phoff, table_len) = header.program_table()?;
    if phoff + table_len > source.len() {
        return Err(BootError::malformed(
            FORMAT,
            "program header table beyond end of file",
        ));
    }
    let table = source.read_vec(phoff, table_len)?;
    let segments = header.load_segments(&table)?;

    for (i, seg) in segments.iter().enumerate() {
        if seg.offset + seg.filesz > source.len() {
            return Err(BootError::malformed(
                FORMAT,
                format!("segment {i} data beyond end of file"),
            ));
        }
        debug!(
            "segment {i}: vaddr {:#x} file {:#x} mem {:#x} {}",
            seg.vaddr,
            seg.filesz,
            seg.memsz,
            seg.flags.permissions()
        );
    }

    Ok((header, segments))
}

pub struct ElfHandler;

impl ImageHandler for ElfHandler {
    fn file_type(&self) -> FileType {
        FileType::Elf
    }

    fn name(&self) -> &'static str {
        "ELF"
    }

    fn placement_size(&self, source: &mut dyn ImageSource) -> Result<u64, BootError> {
        let (_, segments) = read_segments(source)?;
        Ok(Layout::compute(&segments, None)?.span)
    }

    fn load(
        &self,
        ctx: &mut LoadContext<'_>,
        desc: &BootDescriptor,
        mut source: Box<dyn ImageSource>,
    ) -> Result<LoadedImage, BootError> {
        let (header, segments) = read_segments(&mut *source)?;
        let layout = Layout::compute(&segments, desc.os_address)?;
        let entry = layout.relocate(header.entry).ok_or_else(|| {
            BootError::malformed(
                FORMAT,
                format!("entry {:#x} outside the loadable segments", header.entry),
            )
        })?;

        let region = ctx.place(
            "ELF image",
            Some(PhysicalAddress::new(layout.load_base)),
            layout.span,
            PhysicalAddress::zero(),
            desc,
        )?;

        for seg in &segments {
            let Some(dst) = layout.relocate(seg.vaddr) else {
                continue;
            };
            let dst = PhysicalAddress::new(dst);
            ctx.copy_in(&mut *source, seg.offset, dst, seg.filesz)?;
            if seg.memsz > seg.filesz {
                let bss = PhysicalAddress::new(dst.as_u64() + seg.filesz);
                ctx.memory().fill(bss, seg.memsz - seg.filesz, 0)?;
            }
        }

        if layout.load_base != layout.link_base {
            info!(
                "relocated ELF image from {:#x} to {:#x}",
                layout.link_base, layout.load_base
            );
        }

        Ok(LoadedImage::new(
            FileType::Elf,
            self.name(),
            PayloadKind::Kernel,
            PhysicalAddress::new(entry),
            region,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(vaddr: u64, memsz: u64) -> LoadSegment {
        LoadSegment {
            vaddr,
            offset: 0,
            filesz: 0,
            memsz,
            flags: PFlags::new().with_read(true),
        }
    }

    #[test]
    fn layout_spans_all_segments() {
        let segs = [segment(0x8010_0100, 0x100), segment(0x8010_3000, 0x1800)];
        let layout = Layout::compute(&segs, None).unwrap();
        assert_eq!(layout.link_base, 0x8010_0000);
        assert_eq!(layout.load_base, 0x8010_0000);
        assert_eq!(layout.span, 0x5000);
    }

    #[test]
    fn requested_address_relocates_entry() {
        let segs = [segment(0x1000, 0x2000)];
        let layout = Layout::compute(&segs, Some(PhysicalAddress::new(0x8000_0000))).unwrap();
        assert_eq!(layout.relocate(0x1800), Some(0x8000_0800));
        assert_eq!(layout.relocate(0x3000), None);
        assert_eq!(layout.relocate(0x0FFF), None);
    }

    #[test]
    fn unaligned_request_is_rejected() {
        let segs = [segment(0x1000, 0x2000)];
        let err = Layout::compute(&segs, Some(PhysicalAddress::new(0x8000_0010))).unwrap_err();
        assert!(matches!(err, BootError::InvalidDescriptor(_)));
    }

    #[test]
    fn overflowing_layouts_are_rejected() {
        let segs = [segment(u64::MAX - 0x10, 0x10)];
        assert!(matches!(
            Layout::compute(&segs, None),
            Err(BootError::MalformedHeader { .. })
        ));

        let segs = [segment(0x1000, 0x2000)];
        assert!(
            Layout::compute(&segs, Some(PhysicalAddress::new(u64::MAX & !0xFFF))).is_err()
        );
    }

    #[test]
    fn empty_segment_list_is_malformed() {
        assert!(matches!(
            Layout::compute(&[], None),
            Err(BootError::MalformedHeader { .. })
        ));
    }
}
