//! # Physical Memory Access
//!
//! Loaders write placed components through [`PhysicalMemory`].
//! [`SimulatedRam`] backs the address space with sparse 4 KiB pages and
//! rejects any access that leaves the memory banks.

use crate::addresses::{PhysRange, PhysicalAddress};
use crate::banks::BankCatalogue;
use crate::config::PAGE_SIZE;
use crate::error::RegionError;
use std::collections::BTreeMap;

#[allow(clippy::cast_possible_truncation)]
const PAGE: usize = PAGE_SIZE as usize;

/// Byte access to physical memory.
pub trait PhysicalMemory {
    /// Checks that `len` bytes from `addr` are backed by RAM, without touching them.
    ///
    /// # Errors
    /// [`RegionError::OutsideBanks`] or [`RegionError::Overflow`].
    fn check(&self, addr: PhysicalAddress, len: u64) -> Result<(), RegionError>;

    /// Writes `bytes` starting at `addr`.
    ///
    /// # Errors
    /// Fails if the target range is not backed by RAM.
    fn write(&mut self, addr: PhysicalAddress, bytes: &[u8]) -> Result<(), RegionError>;

    /// Fills `buf` from memory starting at `addr`.
    ///
    /// # Errors
    /// Fails if the source range is not backed by RAM.
    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) -> Result<(), RegionError>;

    /// Sets `len` bytes starting at `addr` to `value`.
    ///
    /// # Errors
    /// Fails if the target range is not backed by RAM.
    fn fill(&mut self, addr: PhysicalAddress, len: u64, value: u8) -> Result<(), RegionError> {
        self.check(addr, len)?;
        let chunk = [value; PAGE];
        let mut done = 0u64;
        while done < len {
            let n = (len - done).min(PAGE_SIZE);
            let at = addr.checked_add(done).ok_or_else(|| RegionError::Overflow {
                name: "memory fill".into(),
                start: addr,
                size: len,
            })?;
            #[allow(clippy::cast_possible_truncation)]
            let n_bytes = n as usize;
            self.write(at, &chunk[..n_bytes])?;
            done += n;
        }
        Ok(())
    }
}

/// Sparse, bank-checked RAM for hosted runs.
#[derive(Debug, Default)]
pub struct SimulatedRam {
    banks: BankCatalogue,
    pages: BTreeMap<u64, Box<[u8; PAGE]>>,
}

impl SimulatedRam {
    #[must_use]
    pub fn new(banks: BankCatalogue) -> Self {
        Self {
            banks,
            pages: BTreeMap::new(),
        }
    }

    /// Number of pages that have been written at least once.
    #[must_use]
    pub fn touched_pages(&self) -> usize {
        self.pages.len()
    }
}

impl PhysicalMemory for SimulatedRam {
    fn check(&self, addr: PhysicalAddress, len: u64) -> Result<(), RegionError> {
        let requested = PhysRange::new(addr, len).ok_or_else(|| RegionError::Overflow {
            name: "memory access".into(),
            start: addr,
            size: len,
        })?;
        if requested.is_empty() || self.banks.contains(&requested) {
            Ok(())
        } else {
            Err(RegionError::OutsideBanks {
                name: "memory access".into(),
                requested,
            })
        }
    }

    fn write(&mut self, addr: PhysicalAddress, bytes: &[u8]) -> Result<(), RegionError> {
        self.check(addr, bytes.len() as u64)?;

        let mut cursor = addr.as_u64();
        let mut rest = bytes;
        while !rest.is_empty() {
            let page = cursor / PAGE_SIZE;
            #[allow(clippy::cast_possible_truncation)]
            let offset = (cursor % PAGE_SIZE) as usize;
            let n = rest.len().min(PAGE - offset);

            let frame = self.pages.entry(page).or_insert_with(|| Box::new([0; PAGE]));
            frame[offset..offset + n].copy_from_slice(&rest[..n]);

            rest = &rest[n..];
            cursor += n as u64;
        }
        Ok(())
    }

    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) -> Result<(), RegionError> {
        self.check(addr, buf.len() as u64)?;

        let mut cursor = addr.as_u64();
        let mut filled = 0;
        while filled < buf.len() {
            let page = cursor / PAGE_SIZE;
            #[allow(clippy::cast_possible_truncation)]
            let offset = (cursor % PAGE_SIZE) as usize;
            let n = (buf.len() - filled).min(PAGE - offset);

            let dst = &mut buf[filled..filled + n];
            match self.pages.get(&page) {
                Some(frame) => dst.copy_from_slice(&frame[offset..offset + n]),
                None => dst.fill(0),
            }

            filled += n;
            cursor += n as u64;
        }
        Ok(())
    }
}
