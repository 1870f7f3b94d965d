//! # Container Formats
//!
//! One handler per bootable container family:
//!
//! | Handler | File type | Payload |
//! |---------|-----------|---------|
//! | [`BareboxHandler`] | [`ArmBarebox`](crate::filetype::FileType::ArmBarebox) | secondary-stage loader, placed as is |
//! | [`ZImageHandler`] | [`ArmZimage`](crate::filetype::FileType::ArmZimage) | self-decompressing kernel |
//! | [`UImageHandler`] | [`UImage`](crate::filetype::FileType::UImage) | CRC-protected kernel at its header load address |
//! | [`AndroidImageHandler`] | [`AndroidImage`](crate::filetype::FileType::AndroidImage) | kernel + ramdisk, re-entered as separate images |
//! | [`RockchipImageHandler`] | [`RockchipImage`](crate::filetype::FileType::RockchipImage) | secondary-stage loader picked from up to four slots |
//! | [`ElfHandler`] | [`Elf`](crate::filetype::FileType::Elf) | `PT_LOAD` segments laid out contiguously |

pub mod aimage;
pub mod barebox;
pub mod elf;
pub mod optee;
pub mod rkns;
pub mod uimage;
pub mod zimage;

pub use aimage::AndroidImageHandler;
pub use barebox::BareboxHandler;
pub use elf::ElfHandler;
pub use rkns::RockchipImageHandler;
pub use uimage::UImageHandler;
pub use zimage::ZImageHandler;
