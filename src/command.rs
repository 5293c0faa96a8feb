// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The command format carried in DFU upload requests.
//!
//! A command is a four-character tag followed by argument words, all
//! little-endian, with no length field: each tag has a fixed set of
//! arguments. The tags are ASCII packed the way a C multi-character constant
//! is, first character in the most significant byte, so `rest` goes over the
//! wire as the bytes `t s e r`.
//!
//! ```text
//! offset  0     4       8        12        16
//!         rest
//!         dump  addr    len
//!         aes?  len     key      iv_hack   data[len]...
//!         func  addr    arg0     arg1 ...  arg7
//! ```

use core::mem::size_of;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

use crate::romapi::CALL_ARGS;
use crate::Refusal;

type Word = U32<LittleEndian>;

#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum Tag {
    Reset = 0x7265_7374,
    Dump = 0x6475_6D70,
    AesEncrypt = 0x6165_7365,
    AesDecrypt = 0x6165_7364,
    Call = 0x6675_6E63,
}

const_assert_eq!(Tag::Reset as u32, u32::from_be_bytes(*b"rest"));
const_assert_eq!(Tag::Dump as u32, u32::from_be_bytes(*b"dump"));
const_assert_eq!(Tag::AesEncrypt as u32, u32::from_be_bytes(*b"aese"));
const_assert_eq!(Tag::AesDecrypt as u32, u32::from_be_bytes(*b"aesd"));
const_assert_eq!(Tag::Call as u32, u32::from_be_bytes(*b"func"));

/// Which of the cipher engine's built-in keys to use. The key material itself
/// never leaves the engine.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum KeyClass {
    User = 0,
    /// Shared by every device in a product group.
    Gid = 1,
    /// Unique to this device.
    Uid = 2,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

#[derive(Copy, Clone, Debug, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct DumpArgs {
    addr: Word,
    len: Word,
}

#[derive(Copy, Clone, Debug, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct AesArgs {
    len: Word,
    key: Word,
    iv_hack: Word,
}

#[derive(Copy, Clone, Debug, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct CallArgs {
    func: Word,
    args: [Word; CALL_ARGS],
}

/// Size of the tag at the start of every command.
pub const TAG_LEN: usize = size_of::<Word>();

/// Offset of the inline payload of an AES command.
pub const AES_DATA_OFFSET: usize = TAG_LEN + size_of::<AesArgs>();

const_assert_eq!(AES_DATA_OFFSET, 16);

/// Largest command that isn't an AES command (whose size depends on its
/// payload).
pub const CALL_COMMAND_LEN: usize = TAG_LEN + size_of::<CallArgs>();

/// A decoded command. Only the fixed argument words are held here; the AES
/// payload stays where it is in the buffer, at [`AES_DATA_OFFSET`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Reset,
    Dump {
        addr: u32,
        len: u32,
    },
    Aes {
        direction: Direction,
        len: u32,
        key: KeyClass,
        iv_hack: bool,
    },
    Call {
        func: u32,
        args: [u32; CALL_ARGS],
    },
    /// Any other tag. This is what a plain DFU upload looks like.
    Unrecognized(u32),
}

impl Command {
    /// Decodes the command at the start of `buf`, reading only the argument
    /// words its tag calls for.
    pub fn decode(buf: &[u8]) -> Result<Self, Refusal> {
        let (tag, args) = LayoutVerified::<_, Word>::new_unaligned_from_prefix(buf)
            .ok_or(Refusal::Truncated)?;
        let tag = tag.get();

        let tag = match Tag::from_u32(tag) {
            Some(t) => t,
            None => return Ok(Command::Unrecognized(tag)),
        };

        match tag {
            Tag::Reset => Ok(Command::Reset),
            Tag::Dump => {
                let a = prefix::<DumpArgs>(args)?;
                Ok(Command::Dump {
                    addr: a.addr.get(),
                    len: a.len.get(),
                })
            }
            Tag::AesEncrypt | Tag::AesDecrypt => {
                let a = prefix::<AesArgs>(args)?;
                let key = a.key.get();
                Ok(Command::Aes {
                    direction: if tag == Tag::AesEncrypt {
                        Direction::Encrypt
                    } else {
                        Direction::Decrypt
                    },
                    len: a.len.get(),
                    key: KeyClass::from_u32(key).ok_or(Refusal::UnknownKeyClass(key))?,
                    iv_hack: a.iv_hack.get() != 0,
                })
            }
            Tag::Call => {
                // The target address has to be there. Argument words that run
                // off the end of the buffer are passed as zero.
                if args.len() < size_of::<Word>() {
                    return Err(Refusal::Truncated);
                }
                let mut padded = [0u8; size_of::<CallArgs>()];
                let n = args.len().min(padded.len());
                padded[..n].copy_from_slice(&args[..n]);

                let a = prefix::<CallArgs>(&padded)?;
                let mut words = [0; CALL_ARGS];
                for (dest, src) in words.iter_mut().zip(&a.args) {
                    *dest = src.get();
                }
                Ok(Command::Call {
                    func: a.func.get(),
                    args: words,
                })
            }
        }
    }

    /// The raw tag value for this command.
    pub fn tag(&self) -> u32 {
        match self {
            Command::Reset => Tag::Reset as u32,
            Command::Dump { .. } => Tag::Dump as u32,
            Command::Aes {
                direction: Direction::Encrypt,
                ..
            } => Tag::AesEncrypt as u32,
            Command::Aes {
                direction: Direction::Decrypt,
                ..
            } => Tag::AesDecrypt as u32,
            Command::Call { .. } => Tag::Call as u32,
            Command::Unrecognized(tag) => *tag,
        }
    }

    /// Writes the tag and argument words of this command to the start of
    /// `out`, returning how many bytes that took, or `None` if `out` is too
    /// small.
    ///
    /// For AES commands the payload is not written; put it at
    /// [`AES_DATA_OFFSET`].
    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        let at = put(out, 0, Word::new(self.tag()).as_bytes())?;
        match *self {
            Command::Reset | Command::Unrecognized(_) => Some(at),
            Command::Dump { addr, len } => {
                let args = DumpArgs {
                    addr: Word::new(addr),
                    len: Word::new(len),
                };
                put(out, at, args.as_bytes())
            }
            Command::Aes {
                len, key, iv_hack, ..
            } => {
                let args = AesArgs {
                    len: Word::new(len),
                    key: Word::new(key as u32),
                    iv_hack: Word::new(iv_hack as u32),
                };
                put(out, at, args.as_bytes())
            }
            Command::Call { func, args } => {
                let mut words = [Word::new(0); CALL_ARGS];
                for (dest, &src) in words.iter_mut().zip(&args) {
                    *dest = Word::new(src);
                }
                let args = CallArgs {
                    func: Word::new(func),
                    args: words,
                };
                put(out, at, args.as_bytes())
            }
        }
    }
}

/// Puns the front of `bytes` as a `T`.
fn prefix<T: FromBytes + Unaligned>(bytes: &[u8]) -> Result<&T, Refusal> {
    LayoutVerified::<_, T>::new_unaligned_from_prefix(bytes)
        .map(|(args, _)| args.into_ref())
        .ok_or(Refusal::Truncated)
}

fn put(out: &mut [u8], at: usize, bytes: &[u8]) -> Option<usize> {
    let end = at.checked_add(bytes.len())?;
    out.get_mut(at..end)?.copy_from_slice(bytes);
    Some(end)
}
