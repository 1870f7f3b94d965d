//! # Raw Secondary-Stage Loader
//!
//! A barebox image is position independent and entered at its first byte.

use crate::component::{LoadedImage, PayloadKind};
use crate::descriptor::BootDescriptor;
use crate::error::BootError;
use crate::filetype::{BAREBOX_MAGIC, BAREBOX_MAGIC_OFFSET, FileType};
use crate::loader::LoadContext;
use crate::registry::ImageHandler;
use crate::source::ImageSource;

const HEADER_SIZE: usize = 64;

pub struct BareboxHandler;

impl ImageHandler for BareboxHandler {
    fn file_type(&self) -> FileType {
        FileType::ArmBarebox
    }

    fn name(&self) -> &'static str {
        "ARM barebox"
    }

    fn load(
        &self,
        ctx: &mut LoadContext<'_>,
        desc: &BootDescriptor,
        mut source: Box<dyn ImageSource>,
    ) -> Result<LoadedImage, BootError> {
        let mut header = [0u8; HEADER_SIZE];
        source.read_exact_at(0, &mut header)?;
        if !header[BAREBOX_MAGIC_OFFSET..].starts_with(BAREBOX_MAGIC) {
            return Err(BootError::malformed("barebox", "invalid magic"));
        }

        let size = source.len();
        let (region, needs_copy) = ctx.place_primary("barebox", desc, &*source, size)?;
        if needs_copy {
            ctx.copy_in(&mut *source, 0, region.start(), size)?;
        }

        let entry = region.start();
        Ok(LoadedImage::new(
            FileType::ArmBarebox,
            self.name(),
            PayloadKind::Bootloader,
            entry,
            region,
        ))
    }
}
