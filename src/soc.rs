// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types and hooks for describing the SoCs the hook can be patched into.
//!
//! The hook itself doesn't care much about the part it runs on. All it needs
//! is where the ROM keeps a handful of routines, where DFU downloads land, and
//! what a bootable image looks like there. Those are the properties of the
//! `Soc` trait below.
//!
//! To add a SoC:
//!
//! 1. Create a module within `dfuhook::soc` named after the part.
//! 2. Define a type in the module called `Chip`. It is never instantiated, so
//!    a unit struct is fine.
//! 3. Implement `dfuhook::soc::Soc` for `Chip`.
//! 4. Add a `target-soc-*` feature to `Cargo.toml`.
//! 5. Add a branch to the `cfg_if` in `src/bin/hook.rs` selecting your `Chip`.

// As with board support in general, every SoC is always compiled, whichever
// one is selected, so that they all keep building.
pub mod s5l8443;
pub mod s5l8723;

use crate::staging::BootFormat;

/// Entry points of the ROM routines the hook calls.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RomAddresses {
    pub usb_shutdown: u32,
    pub state_set: u32,
    pub reboot: u32,
    pub aes_encrypt: u32,
    pub aes_decrypt: u32,
    pub jump: u32,
}

/// Base of SRAM on the S5L parts, which is where DFU downloads are staged.
pub const SRAM_BASE: u32 = 0x2200_0000;

/// Requirements placed upon a SoC type.
pub trait Soc {
    /// Part name, for humans.
    const NAME: &'static str;

    /// Where the ROM routines live in this part's ROM revision.
    const ROM: RomAddresses;

    /// Start of the staging region, which is also where a staged image is
    /// entered.
    const STAGING_BASE: u32 = SRAM_BASE;

    /// What a bootable image looks like on this part.
    const BOOT_FORMAT: BootFormat;
}
