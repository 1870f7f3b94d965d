//! # Legacy U-Boot Image
//!
//! A single payload behind a 64-byte big-endian header:
//!
//! ```text
//! 0x00 magic 0x27051956        0x18 data CRC32
//! 0x04 header CRC32            0x1C os
//! 0x08 timestamp               0x1D architecture
//! 0x0C payload size            0x1E image type
//! 0x10 load address            0x1F compression
//! 0x14 entry point             0x20 name[32]
//! ```
//!
//! The header checksum covers the header with its own field zeroed and is
//! always checked. The payload checksum is subject to the verification
//! policy.

use crate::addresses::PhysicalAddress;
use crate::component::{LoadedImage, PayloadKind};
use crate::config::COPY_CHUNK;
use crate::descriptor::{BootDescriptor, VerifyPolicy};
use crate::error::BootError;
use crate::filetype::{FileType, UIMAGE_MAGIC, read_u32_be};
use crate::handoff::HandoffConvention;
use crate::loader::LoadContext;
use crate::registry::ImageHandler;
use crate::source::ImageSource;
use crate::verify;
use log::{debug, info};

pub const UIMAGE_HEADER_SIZE: usize = 64;
const HEADER_CRC_OFFSET: usize = 0x04;
const NAME_OFFSET: usize = 0x20;
const NAME_SIZE: usize = 32;

pub const IH_OS_LINUX: u8 = 5;
pub const IH_ARCH_ARM: u8 = 2;
pub const IH_ARCH_ARM64: u8 = 22;
pub const IH_ARCH_RISCV: u8 = 26;
pub const IH_TYPE_KERNEL: u8 = 2;
pub const IH_COMP_NONE: u8 = 0;

const FORMAT: &str = "uImage";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UImageHeader {
    pub timestamp: u32,
    pub size: u32,
    pub load: u32,
    pub entry: u32,
    pub data_crc: u32,
    pub os: u8,
    pub arch: u8,
    pub image_type: u8,
    pub compression: u8,
    pub name: String,
}

impl UImageHeader {
    /// Validates the magic and header checksum.
    ///
    /// # Errors
    /// [`BootError::MalformedHeader`] on a bad magic, a header checksum
    /// mismatch or an empty payload.
    pub fn parse(buf: &[u8]) -> Result<Self, BootError> {
        let Some(raw) = buf.get(..UIMAGE_HEADER_SIZE) else {
            return Err(BootError::malformed(FORMAT, "header truncated"));
        };
        let word = |off| read_u32_be(raw, off).unwrap_or_default();
        if word(0) != UIMAGE_MAGIC {
            return Err(BootError::malformed(FORMAT, "invalid magic"));
        }

        let stored = word(HEADER_CRC_OFFSET);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&raw[..HEADER_CRC_OFFSET]);
        hasher.update(&[0; 4]);
        hasher.update(&raw[HEADER_CRC_OFFSET + 4..]);
        let actual = hasher.finalize();
        if actual != stored {
            return Err(BootError::malformed(
                FORMAT,
                format!("header checksum {actual:#010x}, expected {stored:#010x}"),
            ));
        }

        let name = &raw[NAME_OFFSET..NAME_OFFSET + NAME_SIZE];
        let name_len = name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        let header = Self {
            timestamp: word(0x08),
            size: word(0x0C),
            load: word(0x10),
            entry: word(0x14),
            data_crc: word(0x18),
            os: raw[0x1C],
            arch: raw[0x1D],
            image_type: raw[0x1E],
            compression: raw[0x1F],
            name: String::from_utf8_lossy(&name[..name_len]).into_owned(),
        };
        if header.size == 0 {
            return Err(BootError::malformed(FORMAT, "empty payload"));
        }
        Ok(header)
    }

    /// Offset of the entry point into the payload.
    #[must_use]
    pub const fn entry_offset(&self) -> Option<u32> {
        match self.entry.checked_sub(self.load) {
            Some(offset) if offset < self.size => Some(offset),
            _ => None,
        }
    }
}

/// The architecture byte a kernel for `convention` carries.
#[must_use]
pub const fn architecture(convention: HandoffConvention) -> u8 {
    match convention {
        HandoffConvention::Arm32 { .. } => IH_ARCH_ARM,
        HandoffConvention::Arm64 => IH_ARCH_ARM64,
        HandoffConvention::RiscV { .. } => IH_ARCH_RISCV,
    }
}

fn payload_crc(source: &mut dyn ImageSource, len: u64) -> Result<u32, BootError> {
    let mut hasher = crc32fast::Hasher::new();
    let mut chunk = vec![0u8; COPY_CHUNK];
    let mut done = 0u64;
    while done < len {
        #[allow(clippy::cast_possible_truncation)]
        let n = (len - done).min(COPY_CHUNK as u64) as usize;
        source.read_exact_at(UIMAGE_HEADER_SIZE as u64 + done, &mut chunk[..n])?;
        hasher.update(&chunk[..n]);
        done += n as u64;
    }
    Ok(hasher.finalize())
}

fn read_header(source: &mut dyn ImageSource) -> Result<UImageHeader, BootError> {
    let mut buf = [0u8; UIMAGE_HEADER_SIZE];
    source.read_exact_at(0, &mut buf)?;
    UImageHeader::parse(&buf)
}

pub struct UImageHandler;

impl ImageHandler for UImageHandler {
    fn file_type(&self) -> FileType {
        FileType::UImage
    }

    fn name(&self) -> &'static str {
        "Linux uImage"
    }

    fn placement_size(&self, source: &mut dyn ImageSource) -> Result<u64, BootError> {
        read_header(source).map(|header| u64::from(header.size))
    }

    fn load(
        &self,
        ctx: &mut LoadContext<'_>,
        desc: &BootDescriptor,
        mut source: Box<dyn ImageSource>,
    ) -> Result<LoadedImage, BootError> {
        let header = read_header(&mut *source)?;
        debug!(
            "uImage '{}': {:#x} bytes, load {:#x}, entry {:#x}, os {} arch {} type {} comp {}",
            header.name,
            header.size,
            header.load,
            header.entry,
            header.os,
            header.arch,
            header.image_type,
            header.compression
        );

        let convention = ctx.config().convention;
        if header.os != IH_OS_LINUX {
            return Err(BootError::malformed(
                FORMAT,
                format!("unsupported operating system {}", header.os),
            ));
        }
        if header.arch != architecture(convention) {
            return Err(BootError::malformed(
                FORMAT,
                format!("built for architecture {}, booting {convention}", header.arch),
            ));
        }
        if header.image_type != IH_TYPE_KERNEL {
            return Err(BootError::malformed(
                FORMAT,
                format!("image type {} is not a kernel", header.image_type),
            ));
        }
        if header.compression != IH_COMP_NONE {
            return Err(BootError::malformed(
                FORMAT,
                format!("unsupported compression {}", header.compression),
            ));
        }
        let entry_offset = header.entry_offset().ok_or_else(|| {
            BootError::malformed(
                FORMAT,
                format!("entry {:#x} outside the payload", header.entry),
            )
        })?;

        let size = u64::from(header.size);
        let actual = match desc.verify {
            VerifyPolicy::Skip => None,
            VerifyPolicy::Enforce | VerifyPolicy::Warn => {
                Some(payload_crc(&mut *source, size)?)
            }
        };
        verify::apply(desc.verify, desc.force, "uImage data", || match actual {
            Some(crc) if crc != header.data_crc => Err(format!(
                "data checksum {crc:#010x}, expected {:#010x}",
                header.data_crc
            )),
            _ => Ok(()),
        })?;

        let requested = desc
            .os_address
            .unwrap_or_else(|| PhysicalAddress::new(u64::from(header.load)));
        let region = ctx.place("uImage", Some(requested), size, PhysicalAddress::zero(), desc)?;
        ctx.copy_in(&mut *source, UIMAGE_HEADER_SIZE as u64, region.start(), size)?;

        let entry = PhysicalAddress::new(region.start().as_u64() + u64::from(entry_offset));
        info!("uImage '{}' entered at {entry}", header.name);
        Ok(LoadedImage::new(
            FileType::UImage,
            self.name(),
            PayloadKind::Kernel,
            entry,
            region,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(size: u32, load: u32, entry: u32) -> Vec<u8> {
        let mut buf = vec![0u8; UIMAGE_HEADER_SIZE];
        buf[..4].copy_from_slice(&UIMAGE_MAGIC.to_be_bytes());
        buf[0x0C..0x10].copy_from_slice(&size.to_be_bytes());
        buf[0x10..0x14].copy_from_slice(&load.to_be_bytes());
        buf[0x14..0x18].copy_from_slice(&entry.to_be_bytes());
        buf[0x1C..0x20].copy_from_slice(&[IH_OS_LINUX, IH_ARCH_ARM, IH_TYPE_KERNEL, 0]);
        buf[0x20..0x25].copy_from_slice(b"linux");
        let crc = crc32fast::hash(&buf);
        buf[4..8].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    #[test]
    fn parses_a_valid_header() {
        let h = UImageHeader::parse(&header(0x1000, 0x8200_0000, 0x8200_0040)).unwrap();
        assert_eq!(h.size, 0x1000);
        assert_eq!(h.name, "linux");
        assert_eq!(h.arch, IH_ARCH_ARM);
        assert_eq!(h.entry_offset(), Some(0x40));
    }

    #[test]
    fn any_header_change_breaks_the_checksum() {
        let mut buf = header(0x1000, 0x8200_0000, 0x8200_0000);
        buf[0x10] ^= 1;
        assert!(matches!(
            UImageHeader::parse(&buf),
            Err(BootError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn entry_must_lie_in_the_payload() {
        let h = UImageHeader::parse(&header(0x1000, 0x8200_0000, 0x8100_0000)).unwrap();
        assert_eq!(h.entry_offset(), None);
        let h = UImageHeader::parse(&header(0x1000, 0x8200_0000, 0x8200_1000)).unwrap();
        assert_eq!(h.entry_offset(), None);
    }

    #[test]
    fn architecture_follows_the_convention() {
        assert_eq!(architecture(HandoffConvention::default()), IH_ARCH_ARM);
        assert_eq!(architecture(HandoffConvention::Arm64), IH_ARCH_ARM64);
        assert_eq!(
            architecture(HandoffConvention::RiscV { hart_id: 0 }),
            IH_ARCH_RISCV
        );
    }
}
