//! Synthetic images and a recording platform shared by the integration tests.

#![allow(dead_code)]

use bootm::banks::{BankCatalogue, MemoryBank};
use bootm::formats::zimage::swap_words;
use bootm::verify::HashAlgorithm;
use bootm::{ArgumentVector, HandlerRegistry, LoadContext, LoaderConfig, Platform, SimulatedRam};

pub const RAM_BASE: u64 = 0x8000_0000;
pub const RAM_SIZE: u64 = 64 << 20;
pub const MARGIN: u64 = 32 << 20;

pub fn banks() -> BankCatalogue {
    BankCatalogue::new().with_bank(MemoryBank::new("ram0", RAM_BASE, RAM_SIZE).unwrap())
}

pub fn context<'a>(banks: &BankCatalogue, ram: &'a mut SimulatedRam) -> LoadContext<'a> {
    context_with(banks, ram, LoaderConfig::default())
}

pub fn context_with<'a>(
    banks: &BankCatalogue,
    ram: &'a mut SimulatedRam,
    config: LoaderConfig,
) -> LoadContext<'a> {
    LoadContext::new(HandlerRegistry::global(), banks, ram, config)
}

/// Recognizable filler so copies can be checked byte for byte.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// A zImage of `size` bytes (header included) with start 0.
pub fn zimage(size: u32) -> Vec<u8> {
    let mut buf = vec![0u8; size as usize];
    buf[0x30..].copy_from_slice(&pattern(size as usize - 0x30, 7));
    buf[0x24..0x28].copy_from_slice(&0x016F_2818u32.to_le_bytes());
    buf[0x28..0x2C].copy_from_slice(&0u32.to_le_bytes());
    buf[0x2C..0x30].copy_from_slice(&size.to_le_bytes());
    buf
}

/// The same image as built for the opposite byte order.
pub fn swapped_zimage(size: u32) -> Vec<u8> {
    let mut buf = zimage(size);
    swap_words(&mut buf);
    buf
}

/// A flattened device tree of `total` bytes.
pub fn fdt(total: u32) -> Vec<u8> {
    let mut buf = vec![0u8; total as usize];
    buf[..4].copy_from_slice(&0xD00D_FEEDu32.to_be_bytes());
    buf[4..8].copy_from_slice(&total.to_be_bytes());
    buf[40..].copy_from_slice(&pattern(total as usize - 40, 3));
    buf
}

/// An OP-TEE image whose payload goes to `load_addr`.
pub fn optee(load_addr: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 28];
    buf[..4].copy_from_slice(&0x4554_504Fu32.to_le_bytes());
    buf[4] = 1;
    buf[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    buf[12..16].copy_from_slice(&((load_addr >> 32) as u32).to_le_bytes());
    buf[16..20].copy_from_slice(&(load_addr as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// A barebox image of `len` bytes whose body is derived from `seed`.
pub fn barebox(len: usize, seed: u8) -> Vec<u8> {
    let mut buf = pattern(len, seed);
    buf[0x20..0x27].copy_from_slice(b"barebox");
    buf
}

/// Header load addresses of an Android image.
#[derive(Default, Clone, Copy)]
pub struct AndroidAddresses {
    pub kernel: u32,
    pub ramdisk: u32,
    pub tags: u32,
}

pub fn aimage(kernel: &[u8], ramdisk: &[u8], page_size: u32, addrs: AndroidAddresses) -> Vec<u8> {
    let page = page_size as usize;
    let padded = |n: usize| n.div_ceil(page) * page;

    let mut buf = vec![0u8; page];
    buf[..8].copy_from_slice(b"ANDROID!");
    buf[8..12].copy_from_slice(&(kernel.len() as u32).to_le_bytes());
    buf[12..16].copy_from_slice(&addrs.kernel.to_le_bytes());
    buf[16..20].copy_from_slice(&(ramdisk.len() as u32).to_le_bytes());
    buf[20..24].copy_from_slice(&addrs.ramdisk.to_le_bytes());
    buf[32..36].copy_from_slice(&addrs.tags.to_le_bytes());
    buf[36..40].copy_from_slice(&page_size.to_le_bytes());
    buf[48..54].copy_from_slice(b"tester");
    buf[64..79].copy_from_slice(b"console=ttyS0,1");

    for section in [kernel, ramdisk] {
        let start = buf.len();
        buf.extend_from_slice(section);
        buf.resize(start + padded(section.len()), 0);
    }
    buf
}

/// A Linux ARM uImage with valid header and data checksums. `arch` is the
/// header's architecture byte.
pub fn uimage(payload: &[u8], load: u32, entry: u32, arch: u8) -> Vec<u8> {
    let mut buf = vec![0u8; 64];
    buf[..4].copy_from_slice(&0x2705_1956u32.to_be_bytes());
    buf[0x0C..0x10].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    buf[0x10..0x14].copy_from_slice(&load.to_be_bytes());
    buf[0x14..0x18].copy_from_slice(&entry.to_be_bytes());
    buf[0x18..0x1C].copy_from_slice(&crc32fast::hash(payload).to_be_bytes());
    // Linux, kernel, uncompressed
    buf[0x1C..0x20].copy_from_slice(&[5, arch, 2, 0]);
    buf[0x20..0x25].copy_from_slice(b"linux");
    let header_crc = crc32fast::hash(&buf);
    buf[4..8].copy_from_slice(&header_crc.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// A Rockchip container with one slot per entry of `slots`, each padded to
/// whole sectors and starting right after the header sector.
///
/// `hash_type` 0 stores no hashes, 1 SHA-256 and 2 SHA-512.
pub fn rkns(slots: &[Vec<u8>], hash_type: u32) -> Vec<u8> {
    const SECTOR: usize = 512;
    const SLOTS: usize = 0x78;
    const SLOT_SIZE: usize = 88;

    let mut buf = vec![0u8; SECTOR];
    buf[..4].copy_from_slice(b"RKNS");
    buf[8..12].copy_from_slice(&((slots.len() as u32) << 16).to_le_bytes());
    buf[12..16].copy_from_slice(&hash_type.to_le_bytes());

    for (i, slot) in slots.iter().enumerate() {
        let sectors = slot.len().div_ceil(SECTOR);
        let offset = buf.len() / SECTOR;
        let mut data = slot.clone();
        data.resize(sectors * SECTOR, 0);

        let base = SLOTS + i * SLOT_SIZE;
        let word = ((sectors as u32) << 16) | offset as u32;
        buf[base..base + 4].copy_from_slice(&word.to_le_bytes());
        buf[base + 0x0C..base + 0x10].copy_from_slice(&(i as u32 + 1).to_le_bytes());

        let digest = match hash_type {
            1 => HashAlgorithm::Sha256.digest(&data),
            2 => HashAlgorithm::Sha512.digest(&data),
            _ => Vec::new(),
        };
        buf[base + 0x18..base + 0x18 + digest.len()].copy_from_slice(&digest);

        buf.extend_from_slice(&data);
    }
    buf
}

/// One `PT_LOAD` entry of an ELF fixture.
#[derive(Clone)]
pub struct ElfSegment {
    pub vaddr: u64,
    pub data: Vec<u8>,
    pub memsz: u64,
    pub flags: u32,
}

/// A little-endian `ET_EXEC` image. Segment data is laid out page by page
/// after the program header table.
pub fn elf64(entry: u64, segments: &[ElfSegment]) -> Vec<u8> {
    let phoff = 64usize;
    let mut buf = vec![0u8; 0x1000];
    buf[..4].copy_from_slice(b"\x7fELF");
    buf[4] = 2;
    buf[5] = 1;
    buf[6] = 1;
    buf[16..18].copy_from_slice(&2u16.to_le_bytes());
    buf[18..20].copy_from_slice(&0xB7u16.to_le_bytes());
    buf[20..24].copy_from_slice(&1u32.to_le_bytes());
    buf[24..32].copy_from_slice(&entry.to_le_bytes());
    buf[32..40].copy_from_slice(&(phoff as u64).to_le_bytes());
    buf[52..54].copy_from_slice(&64u16.to_le_bytes());
    buf[54..56].copy_from_slice(&56u16.to_le_bytes());
    buf[56..58].copy_from_slice(&(segments.len() as u16).to_le_bytes());

    for (i, seg) in segments.iter().enumerate() {
        let offset = buf.len();
        buf.extend_from_slice(&seg.data);
        buf.resize(offset + seg.data.len().div_ceil(0x1000) * 0x1000, 0);

        let ph = phoff + i * 56;
        buf[ph..ph + 4].copy_from_slice(&1u32.to_le_bytes());
        buf[ph + 4..ph + 8].copy_from_slice(&seg.flags.to_le_bytes());
        buf[ph + 8..ph + 16].copy_from_slice(&(offset as u64).to_le_bytes());
        buf[ph + 16..ph + 24].copy_from_slice(&seg.vaddr.to_le_bytes());
        buf[ph + 24..ph + 32].copy_from_slice(&seg.vaddr.to_le_bytes());
        buf[ph + 32..ph + 40].copy_from_slice(&(seg.data.len() as u64).to_le_bytes());
        buf[ph + 40..ph + 48].copy_from_slice(&seg.memsz.to_le_bytes());
        buf[ph + 48..ph + 56].copy_from_slice(&0x1000u64.to_le_bytes());
    }
    buf
}

pub fn elf32(entry: u32, segments: &[ElfSegment]) -> Vec<u8> {
    let phoff = 52usize;
    let mut buf = vec![0u8; 0x1000];
    buf[..4].copy_from_slice(b"\x7fELF");
    buf[4] = 1;
    buf[5] = 1;
    buf[6] = 1;
    buf[16..18].copy_from_slice(&2u16.to_le_bytes());
    buf[18..20].copy_from_slice(&0x28u16.to_le_bytes());
    buf[20..24].copy_from_slice(&1u32.to_le_bytes());
    buf[24..28].copy_from_slice(&entry.to_le_bytes());
    buf[28..32].copy_from_slice(&(phoff as u32).to_le_bytes());
    buf[40..42].copy_from_slice(&52u16.to_le_bytes());
    buf[42..44].copy_from_slice(&32u16.to_le_bytes());
    buf[44..46].copy_from_slice(&(segments.len() as u16).to_le_bytes());

    for (i, seg) in segments.iter().enumerate() {
        let offset = buf.len();
        buf.extend_from_slice(&seg.data);
        buf.resize(offset + seg.data.len().div_ceil(0x1000) * 0x1000, 0);

        let ph = phoff + i * 32;
        let words = [
            1,
            offset as u32,
            seg.vaddr as u32,
            seg.vaddr as u32,
            seg.data.len() as u32,
            seg.memsz as u32,
            seg.flags,
            0x1000,
        ];
        for (j, w) in words.iter().enumerate() {
            buf[ph + j * 4..ph + j * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
    }
    buf
}

/// Records every platform call; the jump panics instead of leaving.
#[derive(Debug, Default)]
pub struct MockPlatform {
    pub calls: Vec<&'static str>,
}

impl Platform for MockPlatform {
    fn flush_dcache(&mut self) {
        self.calls.push("flush_dcache");
    }

    fn invalidate_icache(&mut self) {
        self.calls.push("invalidate_icache");
    }

    fn shutdown(&mut self) {
        self.calls.push("shutdown");
    }

    fn disable_interrupts(&mut self) {
        self.calls.push("disable_interrupts");
    }

    unsafe fn transfer(&mut self, argv: &ArgumentVector) -> ! {
        panic!("transferred to {} after {:?}", argv.entry, self.calls);
    }
}
