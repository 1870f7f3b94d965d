//! # Loading Pipeline
//!
//! [`LoadContext`] carries the collaborators of one boot attempt (banks,
//! allocator, physical memory, handler registry) and drives the
//! detect → dispatch → place sequence. Container formats that wrap another
//! bootable image re-enter the pipeline through [`LoadContext::load_nested`],
//! which is bounded to [`MAX_NESTING_DEPTH`].

use crate::addresses::{PhysRange, PhysicalAddress};
use crate::banks::BankCatalogue;
use crate::component::LoadedImage;
use crate::config::{COPY_CHUNK, DETECT_PREFIX, LoaderConfig, MAX_NESTING_DEPTH};
use crate::descriptor::{BootDescriptor, ImageLocator};
use crate::error::BootError;
use crate::extras;
use crate::filetype::{FileType, detect};
use crate::memory::PhysicalMemory;
use crate::region::{Region, RegionAllocator};
use crate::registry::HandlerRegistry;
use crate::source::{self, ImageSource};
use log::{debug, info};

pub struct LoadContext<'a> {
    registry: &'a HandlerRegistry,
    allocator: RegionAllocator,
    memory: &'a mut dyn PhysicalMemory,
    config: LoaderConfig,
    depth: u8,
}

impl<'a> LoadContext<'a> {
    #[must_use]
    pub fn new(
        registry: &'a HandlerRegistry,
        banks: &BankCatalogue,
        memory: &'a mut dyn PhysicalMemory,
        config: LoaderConfig,
    ) -> Self {
        Self {
            registry,
            allocator: RegionAllocator::new(banks.clone(), config.safety_margin),
            memory,
            config,
            depth: 0,
        }
    }

    #[must_use]
    pub const fn allocator(&self) -> &RegionAllocator {
        &self.allocator
    }

    #[must_use]
    pub const fn banks(&self) -> &BankCatalogue {
        self.allocator.banks()
    }

    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn memory(&mut self) -> &mut dyn PhysicalMemory {
        &mut *self.memory
    }

    /// Current re-entry depth; `0` for the outermost image.
    #[must_use]
    pub const fn depth(&self) -> u8 {
        self.depth
    }

    /// Loads the primary image of `desc` and places its ramdisk, device tree
    /// and trusted firmware.
    ///
    /// # Errors
    /// Any [`BootError`]; all reservations made by this call are released.
    pub fn load(&mut self, desc: &BootDescriptor) -> Result<LoadedImage, BootError> {
        let mut image = self.load_primary(desc)?;
        if !image.extras_placed() {
            extras::place(self, desc, &mut image)?;
            image.mark_extras_placed();
        }
        Ok(image)
    }

    /// Re-enters the pipeline for an image unpacked from a container.
    ///
    /// # Errors
    /// Fails without loading anything if the nesting bound is exhausted.
    pub fn load_nested(&mut self, desc: &BootDescriptor) -> Result<LoadedImage, BootError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(BootError::InvalidDescriptor(format!(
                "{} is nested more than {MAX_NESTING_DEPTH} level(s) deep",
                desc.os
            )));
        }

        self.depth += 1;
        debug!("entering nested load of {} at depth {}", desc.os, self.depth);
        let result = self.load(desc);
        self.depth -= 1;
        result
    }

    fn load_primary(&mut self, desc: &BootDescriptor) -> Result<LoadedImage, BootError> {
        let mut source = self.open(&desc.os)?;
        let file_type = sniff(&mut *source)?;
        info!("{}: {}", source.name(), file_type);

        let registry = self.registry;
        let handler = registry
            .dispatch(file_type)
            .ok_or(BootError::UnrecognizedFormat(file_type))?;
        debug!("loading {} with handler {}", source.name(), handler.name());
        handler.load(self, desc, source)
    }

    /// Bytes the handler for `source` would reserve for its primary payload.
    /// Unrecognized images report their length.
    ///
    /// # Errors
    /// I/O errors, or a malformed header of a recognized image.
    pub fn placement_size(&self, source: &mut dyn ImageSource) -> Result<u64, BootError> {
        match self.registry.dispatch(sniff(source)?) {
            Some(handler) => handler.placement_size(source),
            None => Ok(source.len()),
        }
    }

    /// Opens any locator against this context's memory.
    ///
    /// # Errors
    /// As [`source::open`].
    pub fn open(&self, locator: &ImageLocator) -> Result<Box<dyn ImageSource>, BootError> {
        source::open(locator, &*self.memory)
    }

    /// Reserves the primary payload of `size` bytes.
    ///
    /// A resident image inside the in-place window of the first bank is
    /// reserved where it lies. Otherwise the requested address or the lowest
    /// free range is reserved. The returned flag tells whether the payload
    /// still has to be copied into the region.
    ///
    /// # Errors
    /// [`BootError::RegionConflict`] or a short read if the resident image is
    /// shorter than `size`.
    pub fn place_primary(
        &self,
        name: &str,
        desc: &BootDescriptor,
        source: &dyn ImageSource,
        size: u64,
    ) -> Result<(Region, bool), BootError> {
        if let Some(resident) = source.resident_at()
            && desc.os_address.is_none_or(|addr| addr == resident)
            && self.in_place_window_contains(resident, size)
        {
            if source.len() < size {
                return Err(BootError::ShortRead {
                    source_name: source.name().to_owned(),
                    offset: 0,
                    wanted: size,
                    got: source.len(),
                });
            }
            let region = self.allocator.reserve(name, resident, size)?;
            info!("{name}: running in place at {resident}");
            return Ok((region, false));
        }

        let region = self.place(name, desc.os_address, size, PhysicalAddress::zero(), desc)?;
        Ok((region, true))
    }

    /// Reserves `size` bytes at `requested`, or at the lowest free address
    /// at or above `floor`.
    ///
    /// # Errors
    /// [`BootError::RegionConflict`] if the range cannot be reserved.
    pub fn place(
        &self,
        name: &str,
        requested: Option<PhysicalAddress>,
        size: u64,
        floor: PhysicalAddress,
        desc: &BootDescriptor,
    ) -> Result<Region, BootError> {
        let region = match requested {
            Some(addr) => self.allocator.reserve(name, addr, size)?,
            None => {
                let region = self.allocator.reserve_lowest(name, size, floor)?;
                if desc.verbosity > 0 {
                    info!("no {name} load address given, defaulting to {}", region.start());
                }
                region
            }
        };
        info!("{name}: {} ({} bytes)", region.range(), region.size());
        Ok(region)
    }

    /// Streams `len` bytes from `source` at `offset` into memory at `dst`.
    ///
    /// # Errors
    /// [`BootError::ShortRead`] if the source ends early.
    pub fn copy_in(
        &mut self,
        source: &mut dyn ImageSource,
        offset: u64,
        dst: PhysicalAddress,
        len: u64,
    ) -> Result<(), BootError> {
        let mut chunk = vec![0u8; COPY_CHUNK];
        let mut done = 0u64;
        while done < len {
            #[allow(clippy::cast_possible_truncation)]
            let n = (len - done).min(COPY_CHUNK as u64) as usize;
            let buf = &mut chunk[..n];
            source.read_exact_at(offset + done, buf)?;
            let at = dst.checked_add(done).ok_or_else(|| {
                BootError::InvalidDescriptor(format!("copy to {dst} overflows"))
            })?;
            self.memory.write(at, buf)?;
            done += n as u64;
        }
        debug!("copied {len:#x} bytes from {} to {dst}", source.name());
        Ok(())
    }

    /// Whether the header-suggested `addr` can take `size` bytes right now.
    #[must_use]
    pub fn is_available(&self, addr: u64, size: u64) -> bool {
        PhysRange::new(PhysicalAddress::new(addr), size)
            .is_some_and(|r| size > 0 && self.allocator.is_available(&r))
    }

    fn in_place_window_contains(&self, addr: PhysicalAddress, size: u64) -> bool {
        let Some(first) = self.banks().first() else {
            return false;
        };
        let window_size = self.config.in_place_window.min(first.size());
        let Some(window) = PhysRange::new(first.base(), window_size) else {
            return false;
        };
        PhysRange::new(addr, size).is_some_and(|r| window.contains_range(&r))
    }
}

/// Detects the type of `source` from its first bytes.
fn sniff(source: &mut dyn ImageSource) -> Result<FileType, BootError> {
    let mut prefix = vec![0; DETECT_PREFIX];
    let n = source.read_at(0, &mut prefix)?;
    prefix.truncate(n);
    Ok(detect(&prefix))
}
