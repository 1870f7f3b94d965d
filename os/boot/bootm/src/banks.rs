//! # Memory Banks
//!
//! The catalogue of physical ranges known to be usable RAM. It is filled once
//! during bring-up and afterwards only read; carve-outs are tracked by the
//! [`RegionAllocator`](crate::region::RegionAllocator), never here.

use crate::addresses::{PhysRange, PhysicalAddress};
use std::sync::OnceLock;

/// A named range of usable RAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBank {
    name: String,
    range: PhysRange,
}

impl MemoryBank {
    /// Creates a bank, or `None` if `base + size` overflows.
    #[must_use]
    pub fn new(name: impl Into<String>, base: u64, size: u64) -> Option<Self> {
        let range = PhysRange::new(PhysicalAddress::new(base), size)?;
        Some(Self {
            name: name.into(),
            range,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn range(&self) -> PhysRange {
        self.range
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.range.start()
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.range.size()
    }
}

/// Ordered list of memory banks; the first bank is the one the loader runs from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BankCatalogue {
    banks: Vec<MemoryBank>,
}

impl BankCatalogue {
    #[must_use]
    pub const fn new() -> Self {
        Self { banks: Vec::new() }
    }

    #[must_use]
    pub fn with_bank(mut self, bank: MemoryBank) -> Self {
        self.add(bank);
        self
    }

    /// Appends a bank. Banks are never removed.
    pub fn add(&mut self, bank: MemoryBank) {
        log::debug!("memory bank {}: {}", bank.name, bank.range);
        self.banks.push(bank);
    }

    #[must_use]
    pub fn first(&self) -> Option<&MemoryBank> {
        self.banks.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryBank> {
        self.banks.iter()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }

    /// The bank that wholly contains `range`, if any.
    #[must_use]
    pub fn bank_containing(&self, range: &PhysRange) -> Option<&MemoryBank> {
        self.banks.iter().find(|b| b.range.contains_range(range))
    }

    #[must_use]
    pub fn contains(&self, range: &PhysRange) -> bool {
        self.bank_containing(range).is_some()
    }
}

static CATALOGUE: OnceLock<BankCatalogue> = OnceLock::new();

/// Installs the process-wide catalogue. Returns the rejected catalogue if one
/// was already installed.
#[allow(clippy::missing_errors_doc)]
pub fn install(catalogue: BankCatalogue) -> Result<&'static BankCatalogue, BankCatalogue> {
    CATALOGUE.set(catalogue)?;
    Ok(global().unwrap_or_else(|| unreachable!("catalogue was just installed")))
}

/// The process-wide catalogue, if installed.
#[must_use]
pub fn global() -> Option<&'static BankCatalogue> {
    CATALOGUE.get()
}
