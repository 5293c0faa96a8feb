// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drives the interpreter against stand-ins for the ROM, the address space,
//! and the staging region, which record everything asked of them.

use dfuhook::command::{Command, Direction, KeyClass, AES_DATA_OFFSET};
use dfuhook::romapi::{Bus, Diverged, RomApi, CALL_ARGS};
use dfuhook::staging::{BootFormat, Staging, Window};
use dfuhook::{Hook, Refusal, Status, MAX_COMMAND_LEN, MAX_OUT_LEN};
use hex_literal::hex;

const MEM_BASE: u32 = 0x2000_0000;
const STAGING_BASE: u32 = 0x2200_0000;

/// A routine that adds up its arguments.
const SUM_ROUTINE: u32 = 0x2000_1235;

#[derive(Clone, Debug, Eq, PartialEq)]
enum RomEvent {
    UsbShutdown,
    StateSet(u32, u32),
    Reboot,
    Aes(Direction, KeyClass, usize),
    Jump(u32),
}

#[derive(Default)]
struct FakeRom {
    events: Vec<RomEvent>,
}

/// Stand-in cipher: a position- and key-dependent byte transform, different
/// in each direction, and inverted by the other direction.
fn keystream(key: KeyClass, i: usize) -> u8 {
    (key as u8 + 1).wrapping_mul(0x3B).wrapping_add((i as u8).wrapping_mul(7))
}

fn fake_encrypt(key: KeyClass, data: &mut [u8]) {
    for (i, b) in data.iter_mut().enumerate() {
        *b = b.wrapping_add(keystream(key, i)).rotate_left(3);
    }
}

fn fake_decrypt(key: KeyClass, data: &mut [u8]) {
    for (i, b) in data.iter_mut().enumerate() {
        *b = b.rotate_right(3).wrapping_sub(keystream(key, i));
    }
}

impl RomApi for FakeRom {
    fn usb_shutdown(&mut self) {
        self.events.push(RomEvent::UsbShutdown);
    }

    fn state_set(&mut self, mode: u32, reserved: u32) {
        self.events.push(RomEvent::StateSet(mode, reserved));
    }

    fn reboot(&mut self) -> Diverged {
        self.events.push(RomEvent::Reboot);
        Diverged
    }

    fn aes(&mut self, direction: Direction, data: &mut [u8], key: KeyClass) {
        self.events.push(RomEvent::Aes(direction, key, data.len()));
        match direction {
            Direction::Encrypt => fake_encrypt(key, data),
            Direction::Decrypt => fake_decrypt(key, data),
        }
    }

    fn jump(&mut self, addr: u32) -> Diverged {
        self.events.push(RomEvent::Jump(addr));
        Diverged
    }
}

struct FakeBus {
    mem: Vec<u8>,
    calls: Vec<(u32, [u32; CALL_ARGS])>,
}

impl FakeBus {
    fn new() -> Self {
        Self {
            mem: (0..=255).collect(),
            calls: vec![],
        }
    }
}

impl Bus for FakeBus {
    unsafe fn read(&self, addr: u32, out: &mut [u8]) {
        let start = (addr - MEM_BASE) as usize;
        out.copy_from_slice(&self.mem[start..start + out.len()]);
    }

    unsafe fn call(&mut self, func: u32, args: &[u32; CALL_ARGS]) -> u32 {
        self.calls.push((func, *args));
        match func {
            SUM_ROUTINE => args.iter().fold(0u32, |acc, a| acc.wrapping_add(*a)),
            _ => 0xDEAD_BEEF,
        }
    }
}

struct FakeWindow {
    bytes: [u8; 64],
}

impl Window for FakeWindow {
    fn base(&self) -> u32 {
        STAGING_BASE
    }

    fn read(&self, offset: u32, out: &mut [u8]) {
        let start = offset as usize;
        out.copy_from_slice(&self.bytes[start..start + out.len()]);
    }
}

type TestHook = Hook<FakeRom, FakeBus, FakeWindow>;

fn hook_with(staged: [u8; 64], format: BootFormat) -> TestHook {
    // Safety: the fake bus only ever touches its own memory.
    unsafe {
        Hook::new(
            FakeRom::default(),
            FakeBus::new(),
            Staging::new(FakeWindow { bytes: staged }, format),
        )
    }
}

fn hook() -> TestHook {
    hook_with([0; 64], BootFormat::Efi)
}

fn efi_image() -> [u8; 64] {
    let mut bytes = [0x5A; 64];
    bytes[0x28..0x2C].copy_from_slice(b"_FVH");
    bytes
}

/// Builds a request the way the host would, in a buffer whose spare bytes are
/// filled with a recognisable pattern.
fn request(command: Command, payload: &[u8]) -> [u8; MAX_COMMAND_LEN] {
    let mut buf = [0xC3; MAX_COMMAND_LEN];
    command.encode(&mut buf).unwrap();
    buf[AES_DATA_OFFSET..AES_DATA_OFFSET + payload.len()].copy_from_slice(payload);
    buf
}

fn aes(direction: Direction, key: KeyClass, iv_hack: bool, data: &[u8]) -> [u8; MAX_COMMAND_LEN] {
    request(
        Command::Aes {
            direction,
            len: data.len() as u32,
            key,
            iv_hack,
        },
        data,
    )
}

const PLAINTEXT: [u8; 64] = hex!(
    "00112233445566778899aabbccddeeff"
    "6bc1bee22e409f96e93d7e117393172a"
    "ae2d8a571e03ac9c9eb76fac45af8e51"
    "30c81c46a35ce411e5fbc1191a0a52ef"
);

#[test]
fn dump_returns_exactly_len_bytes() {
    for len in [0, 1, 4, 17, 63, 64] {
        let mut h = hook();
        let mut buf = request(Command::Dump { addr: MEM_BASE + 5, len }, &[]);
        let before = buf;

        assert_eq!(h.interpret(&mut buf), Status::Handled { len: len as usize });

        let len = len as usize;
        let bus = h.into_parts().1;
        assert_eq!(&buf[..len], &bus.mem[5..5 + len]);
        assert_eq!(&buf[len..], &before[len..], "bytes past len were touched");
    }
}

#[test]
fn dump_over_limit_is_refused() {
    let mut h = hook();
    let mut buf = request(Command::Dump { addr: MEM_BASE, len: 65 }, &[]);
    let before = buf;

    assert_eq!(h.interpret(&mut buf), Status::NotHandled(Refusal::TooLong { len: 65 }));
    assert_eq!(buf, before);

    let mut buf = request(
        Command::Dump {
            addr: MEM_BASE,
            len: u32::MAX,
        },
        &[],
    );
    assert_eq!(
        h.interpret(&mut buf),
        Status::NotHandled(Refusal::TooLong { len: u32::MAX })
    );
}

#[test]
fn aes_returns_full_transform() {
    for (direction, key) in [
        (Direction::Encrypt, KeyClass::User),
        (Direction::Encrypt, KeyClass::Gid),
        (Direction::Decrypt, KeyClass::Uid),
    ] {
        let mut h = hook();
        let mut buf = aes(direction, key, false, &PLAINTEXT);

        assert_eq!(h.interpret(&mut buf), Status::Handled { len: 64 });

        let mut expected = PLAINTEXT;
        match direction {
            Direction::Encrypt => fake_encrypt(key, &mut expected),
            Direction::Decrypt => fake_decrypt(key, &mut expected),
        }
        assert_eq!(buf[..64], expected);
        assert_eq!(h.into_parts().0.events, [RomEvent::Aes(direction, key, 64)]);
    }
}

#[test]
fn aes_iv_hack_drops_first_block() {
    let mut h = hook();
    let mut buf = aes(Direction::Encrypt, KeyClass::Gid, true, &PLAINTEXT[..48]);

    assert_eq!(h.interpret(&mut buf), Status::Handled { len: 32 });

    let mut expected = [0; 48];
    expected.copy_from_slice(&PLAINTEXT[..48]);
    fake_encrypt(KeyClass::Gid, &mut expected);
    assert_eq!(buf[..32], expected[16..]);
    // The engine still saw the whole thing.
    assert_eq!(
        h.into_parts().0.events,
        [RomEvent::Aes(Direction::Encrypt, KeyClass::Gid, 48)]
    );
}

#[test]
fn aes_iv_hack_on_exactly_one_block_returns_nothing() {
    let mut h = hook();
    let mut buf = aes(Direction::Decrypt, KeyClass::Uid, true, &PLAINTEXT[..16]);
    assert_eq!(h.interpret(&mut buf), Status::Handled { len: 0 });
}

#[test]
fn aes_round_trip() {
    for key in [KeyClass::User, KeyClass::Gid, KeyClass::Uid] {
        let mut h = hook();

        let mut buf = aes(Direction::Encrypt, key, false, &PLAINTEXT[..32]);
        assert_eq!(h.interpret(&mut buf), Status::Handled { len: 32 });
        let ciphertext = buf[..32].to_vec();
        assert_ne!(ciphertext, PLAINTEXT[..32]);

        let mut buf = aes(Direction::Decrypt, key, false, &ciphertext);
        assert_eq!(h.interpret(&mut buf), Status::Handled { len: 32 });
        assert_eq!(buf[..32], PLAINTEXT[..32]);
    }
}

#[test]
fn aes_over_limit_is_refused() {
    let mut h = hook();
    let mut buf = request(
        Command::Aes {
            direction: Direction::Encrypt,
            len: 65,
            key: KeyClass::Gid,
            iv_hack: false,
        },
        &PLAINTEXT,
    );
    let before = buf;

    assert_eq!(h.interpret(&mut buf), Status::NotHandled(Refusal::TooLong { len: 65 }));
    assert_eq!(buf, before);
    assert!(h.into_parts().0.events.is_empty());
}

#[test]
fn aes_iv_hack_needs_a_whole_block() {
    let mut h = hook();
    let mut buf = aes(Direction::Encrypt, KeyClass::Gid, true, &PLAINTEXT[..8]);
    let before = buf;

    assert_eq!(
        h.interpret(&mut buf),
        Status::NotHandled(Refusal::ShortIvHack { len: 8 })
    );
    assert_eq!(buf, before);
    assert!(h.into_parts().0.events.is_empty());
}

#[test]
fn aes_unknown_key_class_is_refused() {
    let mut h = hook();
    let mut buf = aes(Direction::Encrypt, KeyClass::Gid, false, &PLAINTEXT[..16]);
    buf[8..12].copy_from_slice(&7u32.to_le_bytes());
    let before = buf;

    assert_eq!(
        h.interpret(&mut buf),
        Status::NotHandled(Refusal::UnknownKeyClass(7))
    );
    assert_eq!(buf, before);
    assert!(h.into_parts().0.events.is_empty());
}

#[test]
fn aes_payload_must_fit_in_buffer() {
    let mut h = hook();
    let mut buf = aes(Direction::Encrypt, KeyClass::Gid, false, &PLAINTEXT[..32]);

    assert_eq!(
        h.interpret(&mut buf[..AES_DATA_OFFSET + 16]),
        Status::NotHandled(Refusal::Truncated)
    );
    assert!(h.into_parts().0.events.is_empty());
}

#[test]
fn call_returns_result_word() {
    let mut h = hook();
    let args = [1, 2, 3, 4, 5, 6, 7, 8];
    let mut buf = request(
        Command::Call {
            func: SUM_ROUTINE,
            args,
        },
        &[],
    );
    let before = buf;

    assert_eq!(h.interpret(&mut buf), Status::Handled { len: 4 });
    assert_eq!(buf[..4], 36u32.to_le_bytes());
    assert_eq!(buf[4..], before[4..]);

    let (rom, bus, _) = h.into_parts();
    assert_eq!(bus.calls, [(SUM_ROUTINE, args)]);
    assert!(rom.events.is_empty());
}

#[test]
fn call_with_missing_argument_words() {
    let mut h = hook();
    // func, target, and two arguments; the rest of the buffer is gone.
    let mut buf = hex!("636e7566 35120020 0a000000 0b000000");

    assert_eq!(h.interpret(&mut buf), Status::Handled { len: 4 });
    assert_eq!(buf[..4], 21u32.to_le_bytes());
    assert_eq!(
        h.into_parts().1.calls,
        [(SUM_ROUTINE, [10, 11, 0, 0, 0, 0, 0, 0])]
    );
}

#[test]
fn reset_shuts_down_then_reboots() {
    let mut h = hook_with(efi_image(), BootFormat::Efi);
    let mut buf = request(Command::Reset, &[]);
    let before = buf;

    assert_eq!(h.interpret(&mut buf), Status::Diverged(Diverged));
    assert_eq!(buf, before);
    assert_eq!(
        h.into_parts().0.events,
        [RomEvent::UsbShutdown, RomEvent::Reboot]
    );
}

#[test]
fn unrecognized_without_image_is_refused() {
    let mut h = hook();
    let mut buf = [0u8; MAX_COMMAND_LEN];
    buf[..4].copy_from_slice(b"hi!!");
    let before = buf;

    assert_eq!(h.interpret(&mut buf), Status::NotHandled(Refusal::NoImage));
    assert_eq!(buf, before);

    let (rom, bus, _) = h.into_parts();
    assert!(rom.events.is_empty());
    assert!(bus.calls.is_empty());
}

#[test]
fn unrecognized_boots_staged_efi_image() {
    let mut h = hook_with(efi_image(), BootFormat::Efi);
    let mut buf = [0u8; MAX_COMMAND_LEN];

    assert_eq!(h.interpret(&mut buf), Status::Diverged(Diverged));
    assert_eq!(
        h.into_parts().0.events,
        [
            RomEvent::UsbShutdown,
            RomEvent::StateSet(1, 0),
            RomEvent::Jump(STAGING_BASE),
        ]
    );
}

#[test]
fn unrecognized_boots_staged_arm_image() {
    let mut image = [0; 64];
    image[..4].copy_from_slice(&hex!("0b0000ea"));

    let mut h = hook_with(image, BootFormat::ResetVector);
    let mut buf = request(Command::Unrecognized(0x1234_5678), &[]);
    assert_eq!(h.interpret(&mut buf), Status::Diverged(Diverged));
    assert_eq!(
        h.into_parts().0.events,
        [
            RomEvent::UsbShutdown,
            RomEvent::StateSet(1, 0),
            RomEvent::Jump(STAGING_BASE),
        ]
    );

    // An EFI volume means nothing to a part that boots bare ARM images.
    let mut h = hook_with(efi_image(), BootFormat::ResetVector);
    let mut buf = request(Command::Unrecognized(0x1234_5678), &[]);
    assert_eq!(h.interpret(&mut buf), Status::NotHandled(Refusal::NoImage));
    assert!(h.into_parts().0.events.is_empty());
}

#[test]
fn boundary_is_inclusive() {
    let mut h = hook();
    let mut buf = request(
        Command::Dump {
            addr: MEM_BASE,
            len: MAX_OUT_LEN as u32,
        },
        &[],
    );
    assert_eq!(h.interpret(&mut buf), Status::Handled { len: MAX_OUT_LEN });

    let mut buf = aes(Direction::Decrypt, KeyClass::Gid, false, &PLAINTEXT);
    assert_eq!(h.interpret(&mut buf), Status::Handled { len: MAX_OUT_LEN });
}

#[test]
fn codes_seen_by_the_rom() {
    let mut h = hook();
    let mut buf = request(Command::Dump { addr: MEM_BASE, len: 4 }, &[]);
    assert_eq!(h.interpret(&mut buf).code(), 0);
    let mut buf = request(Command::Dump { addr: MEM_BASE, len: 65 }, &[]);
    assert_eq!(h.interpret(&mut buf).code(), -1);
}
