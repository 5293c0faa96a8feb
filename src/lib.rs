// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A command interpreter for the DFU upload path of S5L boot ROMs.
//!
//! The ROM's DFU upload handler is patched to call into the hook before
//! returning its buffer to the host. The hook reads a command out of that
//! buffer (see [`command`] for the format), acts on it, and leaves up to
//! [`MAX_OUT_LEN`] bytes of result at the start of the same buffer for the ROM
//! to send back. If the buffer doesn't hold a command, the hook checks whether
//! the host has staged a bootable image and, if so, boots it.
//!
//! This is a debugging and bring-up tool. `dump` reads any address and `func`
//! calls any address, on purpose; there is no authentication of any kind.

#![cfg_attr(not(test), no_std)]

pub mod command;
pub mod romapi;
pub mod soc;
pub mod staging;

use core::mem::size_of;

use static_assertions::const_assert;

use command::{Command, Direction, KeyClass, AES_DATA_OFFSET, CALL_COMMAND_LEN};
use romapi::{Bus, Diverged, RomApi, CALL_ARGS};
use staging::{Staging, Window};

/// Most bytes we can hand back per upload request. Longer transfers don't
/// come back intact on the S5L8442, so this applies everywhere.
pub const MAX_OUT_LEN: usize = 0x40;

/// Block size of the ROM's cipher engine.
pub const CIPHER_BLOCK_LEN: usize = 16;

/// How much of the shared buffer a command can occupy: a full AES request.
pub const MAX_COMMAND_LEN: usize = AES_DATA_OFFSET + MAX_OUT_LEN;

const_assert!(MAX_COMMAND_LEN >= CALL_COMMAND_LEN);
const_assert!(MAX_OUT_LEN >= size_of::<u32>());

/// Why the hook declined a request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Refusal {
    /// Asked for more than [`MAX_OUT_LEN`] bytes.
    TooLong { len: u32 },
    /// The buffer ended before the command's arguments did.
    Truncated,
    /// Key class word wasn't one the engine has.
    UnknownKeyClass(u32),
    /// IV workaround requested on less than one cipher block, which would
    /// leave nothing to return.
    ShortIvHack { len: u32 },
    /// Not a command, and nothing bootable is staged.
    NoImage,
}

/// Outcome of one request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    /// Done. The first `len` bytes of the buffer are the result.
    Handled { len: usize },
    /// Nothing was done and the buffer is untouched; the ROM should carry on
    /// as it would have without us.
    NotHandled(Refusal),
    /// Control was handed elsewhere for good (reset, or a staged image).
    Diverged(Diverged),
}

impl Status {
    /// The value handed back to the patched ROM: zero when handled, `-1`
    /// otherwise.
    pub fn code(&self) -> i32 {
        match self {
            Status::Handled { .. } | Status::Diverged(_) => 0,
            Status::NotHandled(_) => -1,
        }
    }
}

/// The interpreter, holding the capabilities it acts through.
pub struct Hook<R, B, W> {
    rom: R,
    bus: B,
    staging: Staging<W>,
}

impl<R: RomApi, B: Bus, W: Window> Hook<R, B, W> {
    /// # Safety
    ///
    /// `dump` and `func` commands pass host-chosen addresses straight to
    /// `bus`, whose methods are only safe for valid addresses. By creating a
    /// hook, the caller accepts that whoever is on the other end of the USB
    /// cable gets to read and run whatever they like.
    pub unsafe fn new(rom: R, bus: B, staging: Staging<W>) -> Self {
        Self { rom, bus, staging }
    }

    pub fn into_parts(self) -> (R, B, Staging<W>) {
        (self.rom, self.bus, self.staging)
    }

    /// Interprets the command at the start of `buf`, leaving any result at
    /// the start of `buf`.
    ///
    /// Requests are refused before anything happens: a refused request never
    /// writes to `buf` or calls into the ROM.
    pub fn interpret(&mut self, buf: &mut [u8]) -> Status {
        let command = match Command::decode(buf) {
            Ok(c) => c,
            Err(why) => return Status::NotHandled(why),
        };

        let result = match command {
            Command::Reset => return Status::Diverged(self.reset()),
            Command::Dump { addr, len } => self.dump(buf, addr, len),
            Command::Aes {
                direction,
                len,
                key,
                iv_hack,
            } => self.crypt(buf, direction, len, key, iv_hack),
            Command::Call { func, args } => self.call(buf, func, &args),
            Command::Unrecognized(_) => {
                return match self.staging.try_boot(&mut self.rom) {
                    Some(gone) => Status::Diverged(gone),
                    None => Status::NotHandled(Refusal::NoImage),
                };
            }
        };

        match result {
            Ok(len) => Status::Handled { len },
            Err(why) => Status::NotHandled(why),
        }
    }

    // This reliably comes back up in DFU mode, even on the nanos.
    fn reset(&mut self) -> Diverged {
        self.rom.usb_shutdown();
        self.rom.reboot()
    }

    fn dump(&mut self, buf: &mut [u8], addr: u32, len: u32) -> Result<usize, Refusal> {
        let len = check_len(len)?;
        let out = buf.get_mut(..len).ok_or(Refusal::Truncated)?;
        // Safety: the caller of `Hook::new` signed up for this.
        unsafe { self.bus.read(addr, out) };
        Ok(len)
    }

    fn crypt(
        &mut self,
        buf: &mut [u8],
        direction: Direction,
        len: u32,
        key: KeyClass,
        iv_hack: bool,
    ) -> Result<usize, Refusal> {
        let len = check_len(len)?;

        // Hardware erratum: the S5L8723 (at least) corrupts the first block
        // of output when the engine isn't on its default IV path. Hosts work
        // around it by prepending a sacrificial block and setting `iv_hack`,
        // and we drop that block instead of sending garbage back.
        let skip = if iv_hack { CIPHER_BLOCK_LEN } else { 0 };
        if len < skip {
            return Err(Refusal::ShortIvHack { len: len as u32 });
        }

        let data = buf
            .get_mut(AES_DATA_OFFSET..AES_DATA_OFFSET + len)
            .ok_or(Refusal::Truncated)?;
        self.rom.aes(direction, data, key);

        buf.copy_within(AES_DATA_OFFSET + skip..AES_DATA_OFFSET + len, 0);
        Ok(len - skip)
    }

    fn call(&mut self, buf: &mut [u8], func: u32, args: &[u32; CALL_ARGS]) -> Result<usize, Refusal> {
        let out = buf.get_mut(..size_of::<u32>()).ok_or(Refusal::Truncated)?;
        // Safety: the caller of `Hook::new` signed up for this.
        let ret = unsafe { self.bus.call(func, args) };
        out.copy_from_slice(&ret.to_le_bytes());
        Ok(out.len())
    }
}

fn check_len(len: u32) -> Result<usize, Refusal> {
    if len as usize > MAX_OUT_LEN {
        Err(Refusal::TooLong { len })
    } else {
        Ok(len as usize)
    }
}
