// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The staging region, where the ROM's DFU download path leaves whatever the
//! host sent, and what the hook does with it when it doesn't recognise a
//! command.
//!
//! Booting a staged image is split into three steps so each can be looked at
//! on its own: read the image's marker word, check it against what this SoC
//! boots, and hand over control.

use core::mem::{offset_of, size_of};

use static_assertions::{assert_eq_size, const_assert_eq};
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

use crate::romapi::{Diverged, RomApi};

/// Signature of an EFI firmware volume header.
pub const FVH_SIGNATURE: [u8; 4] = *b"_FVH";

/// `b 0x38`, the branch over the exception vectors that starts a bare ARM
/// image.
pub const ARM_RESET_VECTOR: u32 = 0xEA00_000B;

/// Mode passed to the ROM's state machine just before jumping into a staged
/// image.
pub const BOOT_STATE_MODE: u32 = 1;

/// What a bootable image looks like on a given SoC.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootFormat {
    /// An EFI firmware volume, recognised by its header signature.
    Efi,
    /// A bare ARM program, recognised by the branch instruction in its reset
    /// vector.
    ResetVector,
}

impl BootFormat {
    /// The marker word a bootable image carries.
    pub const fn expected_marker(self) -> u32 {
        match self {
            BootFormat::Efi => u32::from_le_bytes(FVH_SIGNATURE),
            BootFormat::ResetVector => ARM_RESET_VECTOR,
        }
    }
}

/// Fixed part of an EFI firmware volume header. The block map follows it.
#[derive(Copy, Clone, Debug, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct FirmwareVolumeHeader {
    pub zero_vector: [u8; 16],
    pub file_system_guid: [u8; 16],
    pub fv_length: U64<LittleEndian>,
    pub signature: [u8; 4],
    pub attributes: U32<LittleEndian>,
    pub header_length: U16<LittleEndian>,
    pub checksum: U16<LittleEndian>,
    pub ext_header_offset: U16<LittleEndian>,
    _reserved: u8,
    pub revision: u8,
}

assert_eq_size!(FirmwareVolumeHeader, [u8; 56]);
const_assert_eq!(offset_of!(FirmwareVolumeHeader, signature), 0x28);

/// A window onto the memory where images are staged.
pub trait Window {
    /// Address of the start of the window.
    fn base(&self) -> u32;

    /// Copies `out.len()` bytes starting `offset` bytes into the window.
    fn read(&self, offset: u32, out: &mut [u8]);
}

/// The real staging region, at a fixed address.
pub struct FixedWindow {
    base: u32,
}

impl FixedWindow {
    /// # Safety
    ///
    /// Enough memory at `base` to hold an image header must be readable for
    /// as long as the window exists.
    pub const unsafe fn new(base: u32) -> Self {
        Self { base }
    }
}

impl Window for FixedWindow {
    fn base(&self) -> u32 {
        self.base
    }

    fn read(&self, offset: u32, out: &mut [u8]) {
        let src = self.base.wrapping_add(offset) as usize as *const u8;
        // The download path writes here behind our back, so don't let the
        // compiler assume anything about the contents.
        for (i, dest) in out.iter_mut().enumerate() {
            // Safety: in bounds per the contract of `FixedWindow::new`.
            *dest = unsafe { src.add(i).read_volatile() };
        }
    }
}

/// The staging region together with the format this SoC boots.
pub struct Staging<W> {
    window: W,
    format: BootFormat,
}

impl<W: Window> Staging<W> {
    pub fn new(window: W, format: BootFormat) -> Self {
        Self { window, format }
    }

    /// Reads the marker word of whatever is sitting in the region.
    pub fn read_marker(&self) -> u32 {
        match self.format {
            BootFormat::Efi => {
                let mut raw = [0; size_of::<FirmwareVolumeHeader>()];
                self.window.read(0, &mut raw);
                // Can't fail: the buffer is exactly one header long and the
                // header has no alignment requirement.
                match LayoutVerified::<_, FirmwareVolumeHeader>::new_unaligned(&raw[..]) {
                    Some(header) => u32::from_le_bytes(header.signature),
                    None => 0,
                }
            }
            BootFormat::ResetVector => {
                let mut word = [0; 4];
                self.window.read(0, &mut word);
                u32::from_le_bytes(word)
            }
        }
    }

    /// Checks whether the region holds something that looks bootable.
    ///
    /// This is a sniff, not a verification: only the marker is looked at.
    // TODO: an image whose header has landed but whose body is still being
    // downloaded passes this check.
    pub fn is_bootable(&self) -> bool {
        self.read_marker() == self.format.expected_marker()
    }

    /// Shuts down USB, tells the ROM we're booting, and jumps to the start of
    /// the region.
    pub fn boot(&self, rom: &mut impl RomApi) -> Diverged {
        rom.usb_shutdown();
        rom.state_set(BOOT_STATE_MODE, 0);
        rom.jump(self.window.base())
    }

    /// Boots the staged image if it looks bootable; otherwise returns `None`
    /// having touched nothing.
    pub fn try_boot(&self, rom: &mut impl RomApi) -> Option<Diverged> {
        if self.is_bootable() {
            Some(self.boot(rom))
        } else {
            None
        }
    }
}
