//! Helper functions for woff2 variable length types: 255UInt16 and UIntBase128

use arrayvec::ArrayVec;
use bytes::{Buf, BufMut};

use crate::error::{Woff2Error, bail, bail_if};

/// Extension trait adding bounds-checked reads of the WOFF2 variable-length
/// integer encodings to any [`Buf`].
pub(crate) trait BufVariableExt: Buf {
    /// Read a 255UInt16 value.
    ///
    /// Based on section 6.1.1 of the MicroType Express draft spec.
    fn try_get_variable_255_u16(&mut self) -> Result<u16, Woff2Error> {
        const WORD_CODE: u8 = 253;
        const ONE_MORE_BYTE_CODE_2: u8 = 254;
        const ONE_MORE_BYTE_CODE_1: u8 = 255;
        const LOWEST_U_CODE: u16 = 253;

        let code = self.try_get_u8()?;
        Ok(match code {
            WORD_CODE => self.try_get_u16()?,
            ONE_MORE_BYTE_CODE_1 => (self.try_get_u8()? as u16) + LOWEST_U_CODE,
            ONE_MORE_BYTE_CODE_2 => (self.try_get_u8()? as u16) + LOWEST_U_CODE * 2,
            _ => code as u16,
        })
    }

    /// Read a UIntBase128 value: a big-endian base-128 integer with
    /// continuation bits, at most 5 encoded bytes.
    ///
    /// A leading zero byte (0x80) and values that would overflow a u32 are
    /// malformed rather than silently wrapped.
    fn try_get_variable_128_u32(&mut self) -> Result<u32, Woff2Error> {
        let mut result: u32 = 0;
        for i in 0..5 {
            let code = self.try_get_u8()?;
            // Leading zeros are invalid.
            bail_if!(i == 0 && code == 0x80);
            // If any of the top seven bits are set then we're about to overflow.
            bail_if!((result & 0xfe000000) != 0);
            result = (result << 7) | ((code & 0x7f) as u32);
            if (code & 0x80) == 0 {
                return Ok(result);
            }
        }
        // Make sure not to exceed the size bound
        bail!()
    }

    /// Copy `n_bytes` from the front of this buffer into `out`,
    /// failing rather than reading past the end.
    fn try_read_bytes_into(&mut self, n_bytes: usize, out: &mut Vec<u8>) -> Result<(), Woff2Error> {
        bail_if!(n_bytes > self.remaining(), OutOfBounds);
        let mut remaining = n_bytes;
        while remaining > 0 {
            let chunk = self.chunk();
            let take = chunk.len().min(remaining);
            out.extend_from_slice(&chunk[..take]);
            self.advance(take);
            remaining -= take;
        }
        Ok(())
    }
}

impl<B: Buf> BufVariableExt for B {}

/// Write-side duals of [`BufVariableExt`]
pub(crate) trait BufMutVariableExt: BufMut {
    fn put_variable_255_u16(&mut self, value: u16) {
        for byte in pack_255_u16(value) {
            self.put_u8(byte);
        }
    }

    fn put_variable_128_u32(&mut self, value: u32) {
        let size = base128_size(value);
        for i in 0..size {
            let mut b: u8 = ((value >> (7 * (size - i - 1))) & 0x7f) as u8;
            if i < size - 1 {
                b |= 0x80;
            }
            self.put_u8(b);
        }
    }
}

impl<B: BufMut> BufMutVariableExt for B {}

fn pack_255_u16(value: u16) -> ArrayVec<u8, 3> {
    let mut packed: ArrayVec<u8, 3> = ArrayVec::new();
    if value < 253 {
        packed.push(value as u8);
    } else if value < 506 {
        packed.push(255);
        packed.push((value - 253) as u8);
    } else if value < 762 {
        packed.push(254);
        packed.push((value - 506) as u8);
    } else {
        packed.push(253);
        packed.push((value >> 8) as u8);
        packed.push((value & 0xff) as u8);
    }
    packed
}

/// Number of bytes a UIntBase128 encoding of `value` occupies
pub(crate) fn base128_size(value: u32) -> usize {
    let mut size: usize = 1;
    let mut n = value >> 7;
    while n > 0 {
        n >>= 7;
        size += 1;
    }
    size
}
