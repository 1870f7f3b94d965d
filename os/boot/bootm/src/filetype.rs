//! # File Type Detection
//!
//! Classifies an image by the magic numbers in its first bytes. Names and
//! extensions are never consulted.

use core::fmt;

pub const FDT_MAGIC: u32 = 0xD00D_FEED;
pub const ANDROID_MAGIC: &[u8; 8] = b"ANDROID!";
pub const RKNS_MAGIC: &[u8; 4] = b"RKNS";
pub const OPTEE_MAGIC: u32 = 0x4554_504F;
pub const UIMAGE_MAGIC: u32 = 0x2705_1956;
pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
pub const BAREBOX_MAGIC: &[u8; 7] = b"barebox";
pub const BAREBOX_MAGIC_OFFSET: usize = 0x20;
pub const ZIMAGE_MAGIC: u32 = 0x016F_2818;
pub const ZIMAGE_MAGIC_OFFSET: usize = 0x24;

/// Bytes needed before the offset-based magics are looked at.
const MIN_ARM_HEADER: usize = 64;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileType {
    Unknown,
    /// Flattened device tree.
    Oftree,
    /// Android boot image.
    AndroidImage,
    /// Rockchip multi-slot boot image.
    RockchipImage,
    /// OP-TEE trusted firmware.
    Optee,
    /// Legacy U-Boot image.
    UImage,
    Elf,
    /// Raw barebox image for ARM.
    ArmBarebox,
    /// ARM Linux compressed kernel image.
    ArmZimage,
}

impl FileType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Oftree => "open firmware flat device tree",
            Self::AndroidImage => "Android boot image",
            Self::RockchipImage => "Rockchip boot image",
            Self::Optee => "OP-TEE trusted OS",
            Self::UImage => "U-Boot uImage",
            Self::Elf => "ELF",
            Self::ArmBarebox => "ARM barebox image",
            Self::ArmZimage => "ARM Linux zImage",
        }
    }

    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Oftree => "dtb",
            Self::AndroidImage => "android",
            Self::RockchipImage => "rockchip",
            Self::Optee => "optee",
            Self::UImage => "u-boot",
            Self::Elf => "elf",
            Self::ArmBarebox => "arm-barebox",
            Self::ArmZimage => "arm-zimage",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sniffs the type of an image from its leading bytes.
#[must_use]
pub fn detect(buf: &[u8]) -> FileType {
    if read_u32_be(buf, 0) == Some(FDT_MAGIC) {
        return FileType::Oftree;
    }
    if buf.starts_with(ANDROID_MAGIC) {
        return FileType::AndroidImage;
    }
    if buf.starts_with(RKNS_MAGIC) {
        return FileType::RockchipImage;
    }
    if read_u32_le(buf, 0) == Some(OPTEE_MAGIC) {
        return FileType::Optee;
    }
    if read_u32_be(buf, 0) == Some(UIMAGE_MAGIC) {
        return FileType::UImage;
    }
    if buf.starts_with(ELF_MAGIC) {
        return FileType::Elf;
    }

    if buf.len() < MIN_ARM_HEADER {
        return FileType::Unknown;
    }
    if buf[BAREBOX_MAGIC_OFFSET..].starts_with(BAREBOX_MAGIC) {
        return FileType::ArmBarebox;
    }
    match read_u32_le(buf, ZIMAGE_MAGIC_OFFSET) {
        Some(ZIMAGE_MAGIC) => FileType::ArmZimage,
        Some(m) if m == ZIMAGE_MAGIC.swap_bytes() => FileType::ArmZimage,
        _ => FileType::Unknown,
    }
}

#[inline]
pub(crate) fn read_u16_le(buf: &[u8], off: usize) -> Option<u16> {
    let s = buf.get(off..off.checked_add(2)?)?;
    Some(u16::from_le_bytes([s[0], s[1]]))
}

#[inline]
pub(crate) fn read_u32_le(buf: &[u8], off: usize) -> Option<u32> {
    let s = buf.get(off..off.checked_add(4)?)?;
    Some(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

#[inline]
pub(crate) fn read_u32_be(buf: &[u8], off: usize) -> Option<u32> {
    let s = buf.get(off..off.checked_add(4)?)?;
    Some(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_at(len: usize, off: usize, bytes: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        buf[off..off + bytes.len()].copy_from_slice(bytes);
        buf
    }

    #[test]
    fn detects_prefix_magics() {
        assert_eq!(detect(&FDT_MAGIC.to_be_bytes()), FileType::Oftree);
        assert_eq!(detect(b"ANDROID!\0\0\0\0"), FileType::AndroidImage);
        assert_eq!(detect(b"RKNS\0\0\0\0"), FileType::RockchipImage);
        assert_eq!(detect(b"OPTE\x01\0\0\0"), FileType::Optee);
        assert_eq!(detect(b"\x7fELF\x02\x01\x01"), FileType::Elf);
        assert_eq!(detect(&UIMAGE_MAGIC.to_be_bytes()), FileType::UImage);
        assert_eq!(detect(&UIMAGE_MAGIC.to_le_bytes()), FileType::Unknown);
    }

    #[test]
    fn detects_zimage_in_both_byte_orders() {
        let native = with_at(64, ZIMAGE_MAGIC_OFFSET, &ZIMAGE_MAGIC.to_le_bytes());
        let swapped = with_at(64, ZIMAGE_MAGIC_OFFSET, &ZIMAGE_MAGIC.to_be_bytes());
        assert_eq!(detect(&native), FileType::ArmZimage);
        assert_eq!(detect(&swapped), FileType::ArmZimage);
    }

    #[test]
    fn offset_magics_need_a_full_header() {
        let short = with_at(48, ZIMAGE_MAGIC_OFFSET, &ZIMAGE_MAGIC.to_le_bytes());
        assert_eq!(detect(&short), FileType::Unknown);
    }

    #[test]
    fn detects_barebox() {
        let buf = with_at(64, BAREBOX_MAGIC_OFFSET, BAREBOX_MAGIC);
        assert_eq!(detect(&buf), FileType::ArmBarebox);
    }

    #[test]
    fn unknown_and_empty() {
        assert_eq!(detect(&[]), FileType::Unknown);
        assert_eq!(detect(&[0u8; 512]), FileType::Unknown);
    }
}
