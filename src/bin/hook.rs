// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hook image itself.
//!
//! This is linked at a fixed address (see `hook.ld` and `cargo xtask
//! package`) and spliced into the ROM's DFU upload handler, which calls
//! `_start` with the address of its buffer pointer once per upload request.
//! Everything interesting happens in the lib crate; the code here binds it to
//! the selected SoC.

#![no_std]
#![no_main]

use core::sync::atomic::{compiler_fence, Ordering};

use dfuhook::romapi::{FixedRom, RawBus};
use dfuhook::soc::Soc;
use dfuhook::staging::{FixedWindow, Staging};
use dfuhook::{Hook, MAX_COMMAND_LEN};

// Select the appropriate SoC type as `Chip`
cfg_if::cfg_if! {
    if #[cfg(feature = "target-soc-s5l8443")] {
        use dfuhook::soc::s5l8443::Chip;
    } else if #[cfg(feature = "target-soc-s5l8723")] {
        use dfuhook::soc::s5l8723::Chip;
    }
}

/// Hook entry point, placed first in the image by the linker script.
///
/// Returns 0 if the request was handled and -1 if the ROM should fall back to
/// its normal upload behaviour. Reset and image boot don't return at all.
///
/// # Safety
///
/// `state` must point at the ROM's pointer to its DFU buffer, which must be
/// at least `MAX_COMMAND_LEN` bytes and not otherwise in use for the duration
/// of the call.
#[no_mangle]
#[link_section = ".text.start"]
pub unsafe extern "C" fn _start(state: *mut *mut u8) -> i32 {
    // Safety: per the contract above. The ROM's buffer is much larger than any
    // command, so a slice of the largest command size is always in bounds.
    let buffer = unsafe { core::slice::from_raw_parts_mut(*state, MAX_COMMAND_LEN) };

    // Safety: the addresses come from the support package for the SoC we were
    // built for, and handing arbitrary memory access to the host is exactly
    // what this image is for.
    let mut hook = unsafe {
        Hook::new(
            FixedRom::new(&Chip::ROM),
            RawBus,
            Staging::new(FixedWindow::new(Chip::STAGING_BASE), Chip::BOOT_FORMAT),
        )
    };

    hook.interpret(buffer).code()
}

#[panic_handler]
fn panic_handler(_: &core::panic::PanicInfo) -> ! {
    // Nothing to report to and nowhere to go. Park the core; the host will
    // notice the request timing out.
    loop {
        // Keeps LLVM from turning the empty loop into a UDF.
        compiler_fence(Ordering::SeqCst);
    }
}
