//! # Image Sources
//!
//! Byte-range readers over the places an image can come from. Reads past the
//! end of a source come back short; [`ImageSource::read_exact_at`] turns a
//! short read into [`BootError::ShortRead`].

use crate::addresses::PhysicalAddress;
use crate::descriptor::ImageLocator;
use crate::error::BootError;
use crate::memory::PhysicalMemory;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

pub trait ImageSource {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Total length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads up to `buf.len()` bytes at `offset`, returning how many were read.
    /// Returns `0` at or beyond the end.
    ///
    /// # Errors
    /// Propagates I/O failures of the underlying storage.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, BootError>;

    /// Fills `buf` from `offset` or fails with [`BootError::ShortRead`].
    ///
    /// # Errors
    /// [`BootError::ShortRead`] if the source ends early, I/O errors otherwise.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), BootError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(BootError::ShortRead {
                    source_name: self.name().to_owned(),
                    offset,
                    wanted: buf.len() as u64,
                    got: filled as u64,
                });
            }
            filled += n;
        }
        Ok(())
    }

    /// Reads `len` bytes at `offset` into a fresh buffer.
    ///
    /// # Errors
    /// As [`ImageSource::read_exact_at`].
    fn read_vec(&mut self, offset: u64, len: u64) -> Result<Vec<u8>, BootError> {
        let available = self.len().saturating_sub(offset);
        if len > available {
            return Err(BootError::ShortRead {
                source_name: self.name().to_owned(),
                offset,
                wanted: len,
                got: available,
            });
        }
        let len = usize::try_from(len).map_err(|_| {
            BootError::InvalidDescriptor(format!("{len:#x} bytes do not fit in memory"))
        })?;
        let mut buf = vec![0; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Physical address of the image if it already lies in RAM.
    fn resident_at(&self) -> Option<PhysicalAddress> {
        None
    }
}

/// A file on a mounted filesystem.
#[derive(Debug)]
pub struct FileSource {
    name: String,
    file: File,
    len: u64,
}

impl FileSource {
    /// # Errors
    /// Fails if the file cannot be opened or its size queried.
    pub fn open(path: &Path) -> Result<Self, BootError> {
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| BootError::io(&name, e))?;
        let len = file.metadata().map_err(|e| BootError::io(&name, e))?.len();
        Ok(Self { name, file, len })
    }
}

impl ImageSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, BootError> {
        if offset >= self.len {
            return Ok(0);
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| BootError::io(&self.name, e))?;
        loop {
            match self.file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(BootError::io(&self.name, e)),
            }
        }
    }
}

/// An in-memory buffer, optionally marked as resident at a physical address.
#[derive(Debug, Clone)]
pub struct BytesSource {
    name: String,
    bytes: Arc<[u8]>,
    resident: Option<PhysicalAddress>,
}

impl BytesSource {
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            resident: None,
        }
    }

    /// Marks the buffer as a snapshot of RAM at `addr`.
    #[must_use]
    pub fn resident(mut self, addr: PhysicalAddress) -> Self {
        self.resident = Some(addr);
        self
    }
}

impl ImageSource for BytesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, BootError> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(rest) = self.bytes.get(start..) else {
            return Ok(0);
        };
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }

    fn resident_at(&self) -> Option<PhysicalAddress> {
        self.resident
    }
}

/// Opens the source a locator refers to.
///
/// # Errors
/// Fails if a file cannot be opened or a resident range cannot be read.
pub fn open(
    locator: &ImageLocator,
    memory: &dyn PhysicalMemory,
) -> Result<Box<dyn ImageSource>, BootError> {
    match locator {
        ImageLocator::Path(path) => Ok(Box::new(FileSource::open(path)?)),
        ImageLocator::Buffer { name, bytes } => {
            Ok(Box::new(BytesSource::new(name.clone(), Arc::clone(bytes))))
        }
        ImageLocator::Resident { addr, len } => {
            memory.check(*addr, *len)?;
            let len = usize::try_from(*len).map_err(|_| {
                BootError::InvalidDescriptor(format!("resident image length {len:#x} too large"))
            })?;
            let mut snapshot = vec![0; len];
            memory.read(*addr, &mut snapshot)?;
            Ok(Box::new(
                BytesSource::new(format!("memory@{addr}"), snapshot).resident(*addr),
            ))
        }
    }
}
