// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! S5L8723.
//!
//! This ROM boots EFI firmware volumes. It is also the part with the cipher
//! erratum: output through the non-default IV path comes back with a garbage
//! first block, which is why requests carry an `iv_hack` flag.

use super::{RomAddresses, Soc};
use crate::staging::BootFormat;

pub struct Chip;

impl Soc for Chip {
    const NAME: &'static str = "s5l8723";

    const ROM: RomAddresses = RomAddresses {
        usb_shutdown: 0x2000_9F14,
        state_set: 0x2000_3ACC,
        reboot: 0x2000_3ABC,
        aes_encrypt: 0x2000_23E8,
        aes_decrypt: 0x2000_2304,
        jump: 0x2000_3AF8,
    };

    const BOOT_FORMAT: BootFormat = BootFormat::Efi;
}
