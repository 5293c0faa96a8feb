// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::{RomAddresses, Soc};
use crate::staging::BootFormat;

// The shuffle-class parts don't use EFI; a staged image is a bare ARM program
// starting with its vector table.
pub struct Chip;

impl Soc for Chip {
    const NAME: &'static str = "s5l8443";

    const ROM: RomAddresses = RomAddresses {
        usb_shutdown: 0x2000_8BBC,
        state_set: 0x2000_31C8,
        reboot: 0x2000_31B8,
        aes_encrypt: 0x2000_1C3C,
        aes_decrypt: 0x2000_1BC4,
        jump: 0x2000_31F4,
    };

    const BOOT_FORMAT: BootFormat = BootFormat::ResetVector;
}
