//! # Region Allocator
//!
//! Tracks the physical ranges claimed by the current loading attempt and hands
//! out conflict-free placements.
//!
//! ```text
//!   bank base                                                 bank end
//!   │◄── safety margin ──►│                                         │
//!   ├─────────────────────┼──────────┬─────┬──────────┬─────────────┤
//!   │ loader runtime      │ kernel   │ gap │ ramdisk  │   free      │
//!   └─────────────────────┴──────────┴─────┴──────────┴─────────────┘
//!                         ▲ lowest free page-aligned range wins
//! ```
//!
//! The allocator is advisory: it keeps the loader's own components apart from
//! each other, it does not protect against unrelated code. A [`Region`] owns
//! its reservation and gives it back when dropped, so any early return during
//! loading unwinds every range claimed so far.

use crate::addresses::{PhysRange, PhysicalAddress, align_up_u64};
use crate::banks::BankCatalogue;
use crate::config::PAGE_SIZE;
use crate::error::RegionError;
use log::{debug, trace};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

#[derive(Debug)]
struct Reservation {
    id: u64,
    name: String,
    range: PhysRange,
}

#[derive(Debug, Default)]
struct ReservationTable {
    next_id: u64,
    entries: Vec<Reservation>,
}

/// Hands out non-overlapping physical ranges inside known memory banks.
#[derive(Debug, Clone)]
pub struct RegionAllocator {
    banks: BankCatalogue,
    safety_margin: u64,
    table: Rc<RefCell<ReservationTable>>,
}

impl RegionAllocator {
    #[must_use]
    pub fn new(banks: BankCatalogue, safety_margin: u64) -> Self {
        Self {
            banks,
            safety_margin,
            table: Rc::default(),
        }
    }

    #[must_use]
    pub const fn banks(&self) -> &BankCatalogue {
        &self.banks
    }

    /// Reserves exactly `[start, start + size)`.
    ///
    /// # Errors
    /// - [`RegionError::Empty`] for a zero-sized request
    /// - [`RegionError::Overflow`] if the range end does not fit the address type
    /// - [`RegionError::OutsideBanks`] if no single bank contains the range
    /// - [`RegionError::Busy`] if the range intersects a live reservation
    pub fn reserve(
        &self,
        name: &str,
        start: PhysicalAddress,
        size: u64,
    ) -> Result<Region, RegionError> {
        let requested = Self::checked_range(name, start, size)?;

        if !self.banks.contains(&requested) {
            return Err(RegionError::OutsideBanks {
                name: name.to_owned(),
                requested,
            });
        }

        let mut table = self.table.borrow_mut();
        if let Some(existing) = table.entries.iter().find(|r| r.range.overlaps(&requested)) {
            return Err(RegionError::Busy {
                name: name.to_owned(),
                requested,
                existing_name: existing.name.clone(),
                existing: existing.range,
            });
        }

        let id = table.next_id;
        table.next_id += 1;
        table.entries.push(Reservation {
            id,
            name: name.to_owned(),
            range: requested,
        });
        debug!("reserved {name} at {requested}");

        Ok(Region {
            id,
            name: name.to_owned(),
            range: requested,
            table: Rc::downgrade(&self.table),
        })
    }

    /// Reserves the lowest free page-aligned range of `size` bytes at or above
    /// `floor`, searching banks in catalogue order. Within each bank the first
    /// `safety_margin` bytes are never used.
    ///
    /// # Errors
    /// [`RegionError::Empty`] for a zero-sized request and
    /// [`RegionError::NoSpace`] if no bank has a large enough free range.
    pub fn reserve_lowest(
        &self,
        name: &str,
        size: u64,
        floor: PhysicalAddress,
    ) -> Result<Region, RegionError> {
        if size == 0 {
            return Err(RegionError::Empty {
                name: name.to_owned(),
            });
        }

        for bank in self.banks.iter() {
            let Some(lowest) = bank.base().as_u64().checked_add(self.safety_margin) else {
                continue;
            };
            let mut candidate = lowest.max(floor.as_u64());

            loop {
                let Some(aligned) = align_up_u64(candidate, PAGE_SIZE) else {
                    break;
                };
                let Some(range) = PhysRange::new(PhysicalAddress::new(aligned), size) else {
                    break;
                };
                if !bank.range().contains_range(&range) {
                    break;
                }

                let blocker_end = self
                    .table
                    .borrow()
                    .entries
                    .iter()
                    .filter(|r| r.range.overlaps(&range))
                    .map(|r| r.range.end())
                    .max();

                match blocker_end {
                    Some(end) => candidate = end,
                    None => return self.reserve(name, range.start(), size),
                }
            }
            trace!("bank {} has no room for {name} ({size:#x} bytes)", bank.name());
        }

        Err(RegionError::NoSpace {
            name: name.to_owned(),
            size,
        })
    }

    /// Whether `range` lies inside a bank and intersects no live reservation.
    #[must_use]
    pub fn is_available(&self, range: &PhysRange) -> bool {
        self.banks.contains(range)
            && !self
                .table
                .borrow()
                .entries
                .iter()
                .any(|r| r.range.overlaps(range))
    }

    /// Gives a region back. Equivalent to dropping it.
    pub fn release(&self, region: Region) {
        drop(region);
    }

    /// Snapshot of the live reservations in reservation order.
    #[must_use]
    pub fn reservations(&self) -> Vec<(String, PhysRange)> {
        self.table
            .borrow()
            .entries
            .iter()
            .map(|r| (r.name.clone(), r.range))
            .collect()
    }

    fn checked_range(
        name: &str,
        start: PhysicalAddress,
        size: u64,
    ) -> Result<PhysRange, RegionError> {
        if size == 0 {
            return Err(RegionError::Empty {
                name: name.to_owned(),
            });
        }
        PhysRange::new(start, size).ok_or_else(|| RegionError::Overflow {
            name: name.to_owned(),
            start,
            size,
        })
    }
}

/// A live reservation. Released when dropped.
#[derive(Debug)]
pub struct Region {
    id: u64,
    name: String,
    range: PhysRange,
    table: Weak<RefCell<ReservationTable>>,
}

impl Region {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn range(&self) -> PhysRange {
        self.range
    }

    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.range.start()
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.range.size()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.borrow_mut().entries.retain(|r| r.id != self.id);
            trace!("released {} at {}", self.name, self.range);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::banks::MemoryBank;
    use crate::config::{SZ_1M, SZ_32M, SZ_64M};

    const BASE: u64 = 0x8000_0000;

    fn allocator() -> RegionAllocator {
        let banks =
            BankCatalogue::new().with_bank(MemoryBank::new("ram0", BASE, SZ_64M).unwrap());
        RegionAllocator::new(banks, SZ_32M)
    }

    #[test]
    fn default_placement_respects_margin() {
        let alloc = allocator();
        let region = alloc
            .reserve_lowest("kernel", 4096, PhysicalAddress::zero())
            .unwrap();
        assert_eq!(region.start().as_u64(), BASE + SZ_32M);
        assert_eq!(region.size(), 4096);
    }

    #[test]
    fn default_placement_skips_reservations() {
        let alloc = allocator();
        let _pinned = alloc
            .reserve("pinned", PhysicalAddress::new(BASE + SZ_32M), 0x1800)
            .unwrap();
        let next = alloc
            .reserve_lowest("next", 0x1000, PhysicalAddress::zero())
            .unwrap();
        assert_eq!(next.start().as_u64(), BASE + SZ_32M + 0x2000);
    }

    #[test]
    fn default_placement_honours_floor() {
        let alloc = allocator();
        let floor = PhysicalAddress::new(BASE + SZ_32M + SZ_1M + 1);
        let region = alloc.reserve_lowest("initrd", 0x1000, floor).unwrap();
        assert_eq!(region.start().as_u64(), BASE + SZ_32M + SZ_1M + 0x1000);
    }

    #[test]
    fn conflict_reports_both_ranges() {
        let alloc = allocator();
        let _a = alloc
            .reserve("a", PhysicalAddress::new(BASE + 0x1000), 0x2000)
            .unwrap();
        let err = alloc
            .reserve("b", PhysicalAddress::new(BASE + 0x2000), 0x1000)
            .unwrap_err();
        match err {
            RegionError::Busy {
                name,
                requested,
                existing_name,
                existing,
            } => {
                assert_eq!(name, "b");
                assert_eq!(requested.start().as_u64(), BASE + 0x2000);
                assert_eq!(existing_name, "a");
                assert_eq!(existing.start().as_u64(), BASE + 0x1000);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn adjacent_ranges_do_not_conflict() {
        let alloc = allocator();
        let _a = alloc.reserve("a", PhysicalAddress::new(BASE), 0x1000).unwrap();
        let _b = alloc
            .reserve("b", PhysicalAddress::new(BASE + 0x1000), 0x1000)
            .unwrap();
        assert_eq!(alloc.reservations().len(), 2);
    }

    #[test]
    fn outside_banks_is_rejected() {
        let alloc = allocator();
        let err = alloc
            .reserve("a", PhysicalAddress::new(BASE + SZ_64M - 0x800), 0x1000)
            .unwrap_err();
        assert!(matches!(err, RegionError::OutsideBanks { .. }));
    }

    #[test]
    fn drop_releases() {
        let alloc = allocator();
        {
            let _a = alloc.reserve("a", PhysicalAddress::new(BASE), 0x1000).unwrap();
            assert_eq!(alloc.reservations().len(), 1);
        }
        assert!(alloc.reservations().is_empty());

        let b = alloc.reserve("b", PhysicalAddress::new(BASE), 0x1000).unwrap();
        alloc.release(b);
        assert!(alloc.reservations().is_empty());
    }

    #[test]
    fn no_space() {
        let alloc = allocator();
        let err = alloc
            .reserve_lowest("huge", SZ_64M, PhysicalAddress::zero())
            .unwrap_err();
        assert!(matches!(err, RegionError::NoSpace { .. }));
    }

    #[test]
    fn zero_and_overflowing_requests() {
        let alloc = allocator();
        assert!(matches!(
            alloc.reserve("z", PhysicalAddress::new(BASE), 0),
            Err(RegionError::Empty { .. })
        ));
        assert!(matches!(
            alloc.reserve("o", PhysicalAddress::new(u64::MAX), 2),
            Err(RegionError::Overflow { .. })
        ));
    }
}
