//! # Trace output

use crate::component::LoadedImage;
use crate::handoff::ArgumentVector;
use log::trace;

pub fn trace_handoff(image: &LoadedImage, argv: &ArgumentVector) {
    trace!(
        "{} image via {}, {:?} payload",
        image.file_type(),
        image.handler(),
        image.payload()
    );
    for component in image.components() {
        trace!(
            "  {:<12} {} ({} bytes)",
            component.kind().to_string(),
            component.range(),
            component.size()
        );
    }
    if let Some(cmdline) = image.cmdline() {
        trace!("cmdline = {cmdline}");
    }
    if let Some(tags) = image.tags_address() {
        trace!("tags = {tags}");
    }
    trace!("entry = {}", argv.entry);
    for (i, word) in argv.words.iter().enumerate() {
        trace!("  arg{i} = {word:#018x}");
    }
}
