//! # OP-TEE Trusted Firmware
//!
//! A 28-byte header in front of the trusted OS payload, which must be placed
//! at the address the header names.

use crate::addresses::PhysicalAddress;
use crate::error::BootError;
use crate::filetype::{OPTEE_MAGIC, read_u16_le, read_u32_le};

pub const OPTEE_HEADER_SIZE: usize = 28;
const OPTEE_VERSION: u8 = 1;

const FORMAT: &str = "OP-TEE";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OpteeHeader {
    pub version: u8,
    pub arch: u8,
    pub flags: u16,
    pub init_size: u32,
    pub load_addr: PhysicalAddress,
    pub init_mem_usage: u32,
    pub paged_size: u32,
}

impl OpteeHeader {
    /// # Errors
    /// [`BootError::MalformedHeader`] on a bad magic, an unsupported version
    /// or an empty payload.
    pub fn parse(buf: &[u8]) -> Result<Self, BootError> {
        if buf.len() < OPTEE_HEADER_SIZE {
            return Err(BootError::malformed(FORMAT, "header truncated"));
        }
        let word = |off| read_u32_le(buf, off).unwrap_or_default();

        if word(0) != OPTEE_MAGIC {
            return Err(BootError::malformed(FORMAT, "invalid magic"));
        }

        let header = Self {
            version: buf[4],
            arch: buf[5],
            flags: read_u16_le(buf, 6).unwrap_or_default(),
            init_size: word(8),
            load_addr: PhysicalAddress::new((u64::from(word(12)) << 32) | u64::from(word(16))),
            init_mem_usage: word(20),
            paged_size: word(24),
        };

        if header.version != OPTEE_VERSION {
            return Err(BootError::malformed(
                FORMAT,
                format!("unsupported header version {}", header.version),
            ));
        }
        if header.init_size == 0 {
            return Err(BootError::malformed(FORMAT, "empty payload"));
        }
        Ok(header)
    }
}
