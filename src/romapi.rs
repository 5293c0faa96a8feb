// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Everything the hook borrows from the world around it.
//!
//! The interpreter only talks to the ROM and to raw memory through the
//! [`RomApi`] and [`Bus`] traits. The concrete types at the bottom of this
//! file, [`FixedRom`] and [`RawBus`], are what the hook image actually uses:
//! function pointers at addresses taken from a [`Soc`](crate::soc::Soc), and
//! plain pointer accesses.

use core::ptr;

use crate::command::{Direction, KeyClass};
use crate::soc::RomAddresses;

/// Number of argument words handed to the target of a `func` command. Extra
/// words are simply ignored by callees that take fewer.
pub const CALL_ARGS: usize = 8;

/// Evidence that control has left the hook and will not come back.
///
/// The ROM routines that produce one of these never return on real hardware,
/// so a `Diverged` is never actually observed there. Stand-ins for the ROM
/// return one instead, which lets the caller show that nothing further ran.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Diverged;

/// Routines provided by the boot ROM.
pub trait RomApi {
    /// Tears down the USB controller.
    fn usb_shutdown(&mut self);

    /// Moves the ROM's boot state machine. The hook only ever uses
    /// `(1, 0)`, right before booting a staged image.
    fn state_set(&mut self, mode: u32, reserved: u32);

    /// Resets the part. Does not return.
    fn reboot(&mut self) -> Diverged;

    /// Runs the cipher engine over `data` in place, using the built-in key
    /// selected by `key` and the engine's default IV. No key material or IV
    /// is ever supplied from here.
    fn aes(&mut self, direction: Direction, data: &mut [u8], key: KeyClass);

    /// Prepares the part for, and transfers control to, an image at `addr`.
    /// Does not return.
    fn jump(&mut self, addr: u32) -> Diverged;
}

/// Arbitrary memory access on behalf of the operator.
///
/// This is the whole point of the `dump` and `func` commands, so nothing here
/// checks its addresses.
pub trait Bus {
    /// Copies `out.len()` bytes starting at `addr` into `out`.
    ///
    /// # Safety
    ///
    /// `addr .. addr + out.len()` must be readable.
    unsafe fn read(&self, addr: u32, out: &mut [u8]);

    /// Calls the routine at `func` with `args` in the native calling
    /// convention and returns its result word.
    ///
    /// # Safety
    ///
    /// `func` must be the entry point of a routine taking up to
    /// [`CALL_ARGS`] word arguments and returning a word. Anything it does
    /// from there is its own business.
    unsafe fn call(&mut self, func: u32, args: &[u32; CALL_ARGS]) -> u32;
}

type AesFn = unsafe extern "C" fn(
    input: *const u8,
    output: *mut u8,
    len: usize,
    key: i32,
    user_key: *const u8,
    user_iv: *const u8,
);

type CallFn = unsafe extern "C" fn(u32, u32, u32, u32, u32, u32, u32, u32) -> u32;

/// The ROM routines, bound to fixed addresses.
#[repr(C)]
pub struct FixedRom {
    usb_shutdown: unsafe extern "C" fn(),
    state_set: unsafe extern "C" fn(mode: i32, reserved: i32),
    reboot: unsafe extern "C" fn() -> !,
    aes_encrypt: AesFn,
    aes_decrypt: AesFn,
    jump: unsafe extern "C" fn(addr: usize) -> !,
}

impl FixedRom {
    /// Binds each routine to its address in `addrs`.
    ///
    /// # Safety
    ///
    /// Every address in `addrs` must be the entry point of the named routine,
    /// with the signature given above, on the part we are running on. Getting
    /// this wrong means jumping into the middle of some other function.
    pub unsafe fn new(addrs: &RomAddresses) -> Self {
        unsafe {
            Self {
                usb_shutdown: core::mem::transmute::<usize, unsafe extern "C" fn()>(
                    addrs.usb_shutdown as usize,
                ),
                state_set: core::mem::transmute::<usize, unsafe extern "C" fn(i32, i32)>(
                    addrs.state_set as usize,
                ),
                reboot: core::mem::transmute::<usize, unsafe extern "C" fn() -> !>(
                    addrs.reboot as usize,
                ),
                aes_encrypt: core::mem::transmute::<usize, AesFn>(addrs.aes_encrypt as usize),
                aes_decrypt: core::mem::transmute::<usize, AesFn>(addrs.aes_decrypt as usize),
                jump: core::mem::transmute::<usize, unsafe extern "C" fn(usize) -> !>(
                    addrs.jump as usize,
                ),
            }
        }
    }
}

// Safety, for all of the below: the routines were bound by `FixedRom::new`,
// whose caller vouched for the addresses. Beyond that we are trusting the ROM
// to do what it says on the tin, which is the premise of this whole exercise.
impl RomApi for FixedRom {
    fn usb_shutdown(&mut self) {
        unsafe { (self.usb_shutdown)() }
    }

    fn state_set(&mut self, mode: u32, reserved: u32) {
        unsafe { (self.state_set)(mode as i32, reserved as i32) }
    }

    fn reboot(&mut self) -> Diverged {
        unsafe { (self.reboot)() }
    }

    fn aes(&mut self, direction: Direction, data: &mut [u8], key: KeyClass) {
        let routine = match direction {
            Direction::Encrypt => self.aes_encrypt,
            Direction::Decrypt => self.aes_decrypt,
        };
        // The engine is happy to work in place, so input and output are the
        // same buffer. Null user key and IV select the built-in ones.
        let data_ptr = data.as_mut_ptr();
        unsafe {
            routine(
                data_ptr,
                data_ptr,
                data.len(),
                key as i32,
                ptr::null(),
                ptr::null(),
            )
        }
    }

    fn jump(&mut self, addr: u32) -> Diverged {
        unsafe { (self.jump)(addr as usize) }
    }
}

/// Direct access to the address space we're running in.
pub struct RawBus;

impl Bus for RawBus {
    unsafe fn read(&self, addr: u32, out: &mut [u8]) {
        let src = addr as usize as *const u8;
        let dst = out.as_mut_ptr();

        // The source may well overlap the shared buffer we're writing into.
        // Copy from the far end when the destination is above the source, so
        // that every byte is read before it gets overwritten.
        //
        // Reads are volatile, a byte at a time, so that dumping a peripheral
        // window touches each register exactly once and at its natural width.
        unsafe {
            if (dst as usize) > (src as usize) {
                for i in (0..out.len()).rev() {
                    dst.add(i).write(src.add(i).read_volatile());
                }
            } else {
                for i in 0..out.len() {
                    dst.add(i).write(src.add(i).read_volatile());
                }
            }
        }
    }

    unsafe fn call(&mut self, func: u32, args: &[u32; CALL_ARGS]) -> u32 {
        unsafe {
            let tramp = core::mem::transmute::<usize, CallFn>(func as usize);
            tramp(
                args[0], args[1], args[2], args[3], args[4], args[5], args[6], args[7],
            )
        }
    }
}
