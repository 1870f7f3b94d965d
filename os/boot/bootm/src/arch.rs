//! # Entry Call
//!
//! Jumps to a loaded payload through a plain `extern "C"` call, which puts
//! the four argument words in the first four argument registers on every
//! supported target.

use crate::error::BootError;
use crate::handoff::ArgumentVector;

type EntryFn = extern "C" fn(usize, usize, usize, usize);

/// Calls `argv.entry` with `argv.words`.
///
/// # Safety
/// `argv.entry` must be the address of executable code taking four
/// word-sized arguments.
///
/// # Panics
/// If the entry address is null or not addressable, and whenever the entry
/// point returns.
pub unsafe fn call_entry(argv: &ArgumentVector) -> ! {
    let Ok(addr) = usize::try_from(argv.entry.as_u64()) else {
        panic!("entry point {} is not addressable", argv.entry);
    };
    assert!(addr != 0, "entry point is null");

    #[allow(clippy::cast_possible_truncation)]
    let [a0, a1, a2, a3] = argv.words.map(|w| w as usize);

    // SAFETY: non-null and code per the caller's contract.
    let entry = unsafe { core::mem::transmute::<usize, EntryFn>(addr) };
    entry(a0, a1, a2, a3);

    panic!("{}", BootError::EntryReturned(argv.entry));
}
