//! # Loader Configuration
//!
//! Compile-time layout constants and the runtime [`LoaderConfig`].

use crate::handoff::HandoffConvention;
use std::path::PathBuf;

/// Placement granularity for every component.
pub const PAGE_SIZE: u64 = 4096;

pub const SZ_1M: u64 = 1024 * 1024;
pub const SZ_32M: u64 = 32 * SZ_1M;
pub const SZ_64M: u64 = 64 * SZ_1M;
pub const SZ_128M: u64 = 128 * SZ_1M;

/// Space kept free above each bank base for the loader's own runtime state
/// when no load address was requested.
pub const DEFAULT_SAFETY_MARGIN: u64 = SZ_32M;

/// An image already resident this far above the base of the first bank is
/// run in place instead of being copied.
pub const IN_PLACE_WINDOW: u64 = SZ_128M;

/// How deep a container may re-enter the loading pipeline.
pub const MAX_NESTING_DEPTH: u8 = 1;

/// Number of bytes handed to format detection.
pub const DETECT_PREFIX: usize = 512;

/// Chunk size for streaming copies from a source into physical memory.
pub const COPY_CHUNK: usize = 64 * 1024;

/// Sector size used by slot descriptors of multi-slot containers.
pub const RKNS_SECTOR_SIZE: u64 = 512;

/// Slot table capacity of multi-slot containers.
pub const RKNS_MAX_SLOTS: usize = 4;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(DEFAULT_SAFETY_MARGIN.is_multiple_of(PAGE_SIZE));
    assert!(IN_PLACE_WINDOW > DEFAULT_SAFETY_MARGIN);
    assert!(DETECT_PREFIX >= 64);
    assert!(COPY_CHUNK.is_multiple_of(4));
};

/// Runtime knobs of a loading attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Distance from each bank base below which default placement never goes.
    pub safety_margin: u64,
    /// Size of the low-address window in which resident images run in place.
    pub in_place_window: u64,
    /// Calling convention used for kernels.
    pub convention: HandoffConvention,
    /// Directory for scratch files; the system temporary directory if unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            safety_margin: DEFAULT_SAFETY_MARGIN,
            in_place_window: IN_PLACE_WINDOW,
            convention: HandoffConvention::default(),
            scratch_dir: None,
        }
    }
}

impl LoaderConfig {
    #[must_use]
    pub fn with_safety_margin(mut self, margin: u64) -> Self {
        self.safety_margin = margin;
        self
    }

    #[must_use]
    pub fn with_in_place_window(mut self, window: u64) -> Self {
        self.in_place_window = window;
        self
    }

    #[must_use]
    pub fn with_convention(mut self, convention: HandoffConvention) -> Self {
        self.convention = convention;
        self
    }

    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }
}
