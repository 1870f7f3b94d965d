//! # Handler Registry
//!
//! Maps detected file types to the handlers that load them. Handlers are
//! appended once at start-up and looked up by type tag only; when several
//! handlers claim the same tag, the first one registered wins.

use crate::component::LoadedImage;
use crate::descriptor::BootDescriptor;
use crate::error::BootError;
use crate::filetype::FileType;
use crate::formats::{
    AndroidImageHandler, BareboxHandler, ElfHandler, RockchipImageHandler, UImageHandler,
    ZImageHandler,
};
use crate::loader::LoadContext;
use crate::source::ImageSource;
use std::sync::OnceLock;

/// A loader for one container format.
pub trait ImageHandler: Send + Sync {
    /// The type tag this handler accepts.
    fn file_type(&self) -> FileType;

    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Bytes [`ImageHandler::load`] reserves for the primary payload of the
    /// image in `source`. Defaults to the whole source.
    ///
    /// # Errors
    /// Header errors [`ImageHandler::load`] would report.
    fn placement_size(&self, source: &mut dyn ImageSource) -> Result<u64, BootError> {
        Ok(source.len())
    }

    /// Validates the container in `source` and places its payload.
    ///
    /// On failure every region reserved by this call has been released.
    ///
    /// # Errors
    /// Any [`BootError`] raised while parsing, placing or copying.
    fn load(
        &self,
        ctx: &mut LoadContext<'_>,
        desc: &BootDescriptor,
        source: Box<dyn ImageSource>,
    ) -> Result<LoadedImage, BootError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn ImageHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// A registry holding every built-in handler.
    #[must_use]
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(BareboxHandler));
        registry.register(Box::new(UImageHandler));
        registry.register(Box::new(ZImageHandler));
        registry.register(Box::new(AndroidImageHandler));
        registry.register(Box::new(RockchipImageHandler));
        registry.register(Box::new(ElfHandler));
        registry
    }

    /// The process-wide registry of built-in handlers, built on first use.
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<HandlerRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::with_default_handlers)
    }

    pub fn register(&mut self, handler: Box<dyn ImageHandler>) {
        log::trace!(
            "registered handler {} for {}",
            handler.name(),
            handler.file_type()
        );
        self.handlers.push(handler);
    }

    /// The first handler registered for `file_type`.
    #[must_use]
    pub fn dispatch(&self, file_type: FileType) -> Option<&dyn ImageHandler> {
        self.handlers
            .iter()
            .find(|h| h.file_type() == file_type)
            .map(Box::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ImageHandler> {
        self.handlers.iter().map(Box::as_ref)
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}
