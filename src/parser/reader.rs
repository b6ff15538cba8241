//! Positioned byte cursor over a Wasm binary.
//!
//! All reads are bounds-checked. LEB128 decoding enforces the encoding's
//! width ceilings: a `u32` may occupy at most 5 bytes and the final byte's
//! unused bits must be zero; signed forms additionally require the final
//! byte's unused bits to be a sign extension.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),
    #[error("LEB128 integer too long at offset {0}")]
    LebTooLong(usize),
    #[error("LEB128 integer out of range at offset {0}")]
    LebOutOfRange(usize),
    #[error("invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),
}

pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.bytes.len());
    }

    pub fn read_u8(&mut self) -> Result<u8, ReadError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(ReadError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        if self.remaining() < len {
            return Err(ReadError::UnexpectedEof(self.pos));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32, ReadError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    /// IEEE-754 single, returned as raw bits.
    pub fn read_f32_bits(&mut self) -> Result<u32, ReadError> {
        self.read_u32()
    }

    /// IEEE-754 double, returned as raw bits.
    pub fn read_f64_bits(&mut self) -> Result<u64, ReadError> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }

    pub fn read_var_u32(&mut self) -> Result<u32, ReadError> {
        let start = self.pos;
        let mut result: u32 = 0;
        for i in 0..5 {
            let byte = self.read_u8()?;
            let low = (byte & 0x7f) as u32;
            if i == 4 && (byte & 0xf0) != 0 {
                // Only 4 value bits fit in the final byte of a 5-byte u32.
                return Err(ReadError::LebOutOfRange(start));
            }
            result |= low << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(ReadError::LebTooLong(start))
    }

    pub fn read_var_u64(&mut self) -> Result<u64, ReadError> {
        let start = self.pos;
        let mut result: u64 = 0;
        for i in 0..10 {
            let byte = self.read_u8()?;
            let low = (byte & 0x7f) as u64;
            if i == 9 && (byte & 0xfe) != 0 {
                return Err(ReadError::LebOutOfRange(start));
            }
            result |= low << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(ReadError::LebTooLong(start))
    }

    pub fn read_var_s32(&mut self) -> Result<i32, ReadError> {
        let start = self.pos;
        let mut result: i32 = 0;
        let mut shift = 0u32;
        for i in 0..5 {
            let byte = self.read_u8()?;
            if i == 4 {
                // The final byte carries 4 value bits; the rest must be a
                // sign extension of bit 3.
                let extra = byte & 0x78;
                if extra != 0 && extra != 0x78 {
                    return Err(ReadError::LebOutOfRange(start));
                }
            }
            result |= ((byte & 0x7f) as i32) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 32 && byte & 0x40 != 0 {
                    result |= -1i32 << shift;
                }
                return Ok(result);
            }
        }
        Err(ReadError::LebTooLong(start))
    }

    pub fn read_var_s64(&mut self) -> Result<i64, ReadError> {
        let start = self.pos;
        let mut result: i64 = 0;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = self.read_u8()?;
            if i == 9 {
                // One value bit left; the rest must be a sign extension.
                let extra = byte & 0x7e;
                if extra != 0 && extra != 0x7e {
                    return Err(ReadError::LebOutOfRange(start));
                }
            }
            result |= ((byte & 0x7f) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }
        Err(ReadError::LebTooLong(start))
    }

    /// Length-prefixed name. Rejects overlong encodings, surrogate halves
    /// and code points past U+10FFFF.
    pub fn read_string(&mut self) -> Result<String, ReadError> {
        let len = self.read_var_u32()? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ReadError::InvalidUtf8(start))
    }
}
