//! # ELF Header Parsing
//!
//! 32- and 64-bit little-endian executables. Only the file header and the
//! program header table are read; sections are ignored.

use crate::error::BootError;
use core::mem::size_of;
use core::ptr::read_unaligned;

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct Elf32Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct Elf64Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct Elf32Phdr {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct Elf64Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

const PT_LOAD: u32 = 1;
const ET_EXEC: u16 = 2;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;

const FORMAT: &str = "ELF";

/// Bytes needed to parse the file header of either class.
pub const ELF_HEADER_MAX: usize = size_of::<Elf64Ehdr>();

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    const fn phentsize(self) -> usize {
        match self {
            Self::Elf32 => size_of::<Elf32Phdr>(),
            Self::Elf64 => size_of::<Elf64Phdr>(),
        }
    }
}

/// One `PT_LOAD` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment {
    pub vaddr: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub flags: PFlags,
}

impl LoadSegment {
    /// Exclusive end of the segment in memory. Checked during parsing.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.vaddr + self.memsz
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfHeader {
    pub class: ElfClass,
    pub machine: u16,
    pub entry: u64,
    pub phoff: u64,
    pub phnum: u16,
}

impl ElfHeader {
    const EI_MAGIC_BYTES: [u8; 4] = [0x7F, b'E', b'L', b'F'];

    /// Parses and validates the file header.
    ///
    /// # Errors
    /// [`BootError::MalformedHeader`] for anything but a little-endian
    /// `ET_EXEC` image with a standard program header entry size.
    pub fn parse(bytes: &[u8]) -> Result<Self, BootError> {
        if bytes.len() < 16 || bytes[0..4] != Self::EI_MAGIC_BYTES {
            return Err(BootError::malformed(FORMAT, "invalid magic"));
        }
        if bytes[5] != ELFDATA2LSB || bytes[6] != EV_CURRENT {
            return Err(BootError::malformed(FORMAT, "not a little-endian version 1 image"));
        }

        let (class, e_type, machine, entry, phoff, phentsize, phnum) = match bytes[4] {
            ELFCLASS32 if bytes.len() >= size_of::<Elf32Ehdr>() => {
                // SAFETY: bounds checked above; read_unaligned has no alignment requirement.
                let h = unsafe { read_unaligned(bytes.as_ptr().cast::<Elf32Ehdr>()) };
                (
                    ElfClass::Elf32,
                    h.e_type,
                    h.e_machine,
                    u64::from(h.e_entry),
                    u64::from(h.e_phoff),
                    h.e_phentsize,
                    h.e_phnum,
                )
            }
            ELFCLASS64 if bytes.len() >= size_of::<Elf64Ehdr>() => {
                // SAFETY: bounds checked above; read_unaligned has no alignment requirement.
                let h = unsafe { read_unaligned(bytes.as_ptr().cast::<Elf64Ehdr>()) };
                (
                    ElfClass::Elf64,
                    h.e_type,
                    h.e_machine,
                    h.e_entry,
                    h.e_phoff,
                    h.e_phentsize,
                    h.e_phnum,
                )
            }
            ELFCLASS32 | ELFCLASS64 => {
                return Err(BootError::malformed(FORMAT, "header truncated"));
            }
            other => {
                return Err(BootError::malformed(FORMAT, format!("invalid class {other}")));
            }
        };

        if e_type != ET_EXEC {
            return Err(BootError::malformed(
                FORMAT,
                format!("type {e_type} is not an executable"),
            ));
        }
        if usize::from(phentsize) != class.phentsize() {
            return Err(BootError::malformed(
                FORMAT,
                format!("program header entry size {phentsize}"),
            ));
        }

        Ok(Self {
            class,
            machine,
            entry,
            phoff,
            phnum,
        })
    }

    /// File offset and length of the program header table.
    ///
    /// # Errors
    /// [`BootError::MalformedHeader`] if the table end overflows.
    pub fn program_table(&self) -> Result<(u64, u64), BootError> {
        let len = (self.class.phentsize() as u64) * u64::from(self.phnum);
        self.phoff
            .checked_add(len)
            .map(|_| (self.phoff, len))
            .ok_or_else(|| BootError::malformed(FORMAT, "program header table overflows"))
    }

    /// Collects the non-empty `PT_LOAD` entries of `table`.
    ///
    /// # Errors
    /// [`BootError::MalformedHeader`] if the table is short, a segment is
    /// larger on disk than in memory, or a segment end overflows.
    pub fn load_segments(&self, table: &[u8]) -> Result<Vec<LoadSegment>, BootError> {
        let phentsize = self.class.phentsize();
        let phnum = usize::from(self.phnum);
        if table.len() < phentsize * phnum {
            return Err(BootError::malformed(FORMAT, "program header table truncated"));
        }

        let mut segments = Vec::new();
        for i in 0..phnum {
            let at = table[i * phentsize..].as_ptr();
            let (p_type, segment) = match self.class {
                ElfClass::Elf32 => {
                    // SAFETY: i * phentsize + phentsize is within the table by the check above.
                    let ph = unsafe { read_unaligned(at.cast::<Elf32Phdr>()) };
                    (
                        ph.p_type,
                        LoadSegment {
                            vaddr: u64::from(ph.p_vaddr),
                            offset: u64::from(ph.p_offset),
                            filesz: u64::from(ph.p_filesz),
                            memsz: u64::from(ph.p_memsz),
                            flags: PFlags::from_bits(ph.p_flags),
                        },
                    )
                }
                ElfClass::Elf64 => {
                    // SAFETY: i * phentsize + phentsize is within the table by the check above.
                    let ph = unsafe { read_unaligned(at.cast::<Elf64Phdr>()) };
                    (
                        ph.p_type,
                        LoadSegment {
                            vaddr: ph.p_vaddr,
                            offset: ph.p_offset,
                            filesz: ph.p_filesz,
                            memsz: ph.p_memsz,
                            flags: PFlags::from_bits(ph.p_flags),
                        },
                    )
                }
            };

            if p_type != PT_LOAD || segment.memsz == 0 {
                continue;
            }
            if segment.filesz > segment.memsz {
                return Err(BootError::malformed(
                    FORMAT,
                    format!("segment {i}: file size exceeds memory size"),
                ));
            }
            if segment.vaddr.checked_add(segment.memsz).is_none()
                || segment.offset.checked_add(segment.filesz).is_none()
            {
                return Err(BootError::malformed(
                    FORMAT,
                    format!("segment {i}: end overflows"),
                ));
            }
            segments.push(segment);
        }

        Ok(segments)
    }
}

/// Bitfield wrapper for `p_flags`.
///
/// Layout (LSB→MSB):
/// - bit 0: execute
/// - bit 1: write
/// - bit 2: read
/// - bits 3..31: OS and processor specific
#[bitfield_struct::bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PFlags {
    #[bits(1)]
    pub execute: bool,
    #[bits(1)]
    pub write: bool,
    #[bits(1)]
    pub read: bool,
    #[bits(29)]
    __: u32,
}

impl PFlags {
    /// `rwx`-style permission string.
    #[must_use]
    pub fn permissions(self) -> String {
        [
            if self.read() { 'r' } else { '-' },
            if self.write() { 'w' } else { '-' },
            if self.execute() { 'x' } else { '-' },
        ]
        .iter()
        .collect()
    }
}
