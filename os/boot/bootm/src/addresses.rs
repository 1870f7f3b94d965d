//! # Physical Addresses and Ranges
//!
//! Strongly typed wrappers for physical addresses and the half-open ranges
//! that describe placed components, reservations and memory banks.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A raw 64-bit physical address. |
//! | [`PhysRange`] | A half-open range `[start, start + size)` whose end is known not to overflow. |
//!
//! All arithmetic is checked. A [`PhysRange`] can only be constructed when
//! `start + size` fits in a `u64`, so code holding one never has to re-check
//! the end address.

use crate::config::PAGE_SIZE;
use core::fmt;

/// A physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Adds a byte offset, returning `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// Rounds up to the next page boundary, `None` if that overflows.
    #[inline]
    #[must_use]
    pub const fn page_align_up(self) -> Option<Self> {
        match align_up_u64(self.0, PAGE_SIZE) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl From<u64> for PhysicalAddress {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:08X})", self.0)
    }
}

/// Half-open physical range `[start, end)`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PhysRange {
    start: PhysicalAddress,
    size: u64,
}

impl PhysRange {
    /// Creates a range, or `None` if its end would overflow the address type.
    #[must_use]
    pub const fn new(start: PhysicalAddress, size: u64) -> Option<Self> {
        if start.as_u64().checked_add(size).is_none() {
            return None;
        }
        Some(Self { start, size })
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Exclusive end address.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        // Cannot overflow, checked in `new`.
        self.start.as_u64() + self.size
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Half-open intersection test. Empty ranges never overlap anything.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start.as_u64() < other.end()
            && other.start.as_u64() < self.end()
    }

    /// Whether `other` lies entirely inside `self`.
    #[inline]
    #[must_use]
    pub const fn contains_range(&self, other: &Self) -> bool {
        other.start.as_u64() >= self.start.as_u64() && other.end() <= self.end()
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: PhysicalAddress) -> bool {
        addr.as_u64() >= self.start.as_u64() && addr.as_u64() < self.end()
    }
}

impl fmt::Display for PhysRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:08X}, 0x{:08X})", self.start.as_u64(), self.end())
    }
}

impl fmt::Debug for PhysRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Align `x` up to `align` (a power of two), `None` on overflow.
#[inline]
#[must_use]
pub const fn align_up_u64(x: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match x.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Align `x` down to `align` (a power of two).
#[inline]
#[must_use]
pub const fn align_down_u64(x: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    x & !(align - 1)
}
