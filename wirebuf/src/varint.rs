//! Base-128 varints.  Each byte carries seven bits of the value, least-significant group first,
//! and the high bit of every byte but the last is set.

use super::{Error, Packable, Unpackable};

/// The longest a varint can be.  Ten groups of seven bits cover all sixty-four bits.
pub const MAX_VARINT_BYTES: usize = 10;

/// v64 is the wire representation of an unsigned 64-bit varint.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct v64 {
    x: u64,
}

impl v64 {
    /// The number of bytes `x` occupies as a varint, between 1 and [MAX_VARINT_BYTES].
    pub const fn size_of(x: u64) -> usize {
        // bits needed, rounded up to groups of seven; zero still takes one byte
        let bits = 64 - (x | 1).leading_zeros() as usize;
        (bits + 6) / 7
    }
}

impl Packable for v64 {
    fn pack_sz(&self) -> usize {
        v64::size_of(self.x)
    }

    fn pack(&self, out: &mut [u8]) {
        let mut x = self.x;
        let mut idx = 0;
        while x >= 0x80 {
            out[idx] = (x as u8) | 0x80;
            x >>= 7;
            idx += 1;
        }
        out[idx] = x as u8;
        assert_eq!(idx + 1, out.len(), "varint was given the wrong amount of space");
    }
}

impl<'a> Unpackable<'a> for v64 {
    type Error = Error;

    fn unpack<'b: 'a>(buf: &'b [u8]) -> Result<(Self, &'b [u8]), Error> {
        let mut x: u64 = 0;
        for (idx, byte) in buf.iter().take(MAX_VARINT_BYTES).enumerate() {
            // the tenth byte contributes only the top bit; anything above it is discarded
            x |= ((byte & 0x7f) as u64).wrapping_shl(7 * idx as u32);
            if byte & 0x80 == 0 {
                return Ok((v64 { x }, &buf[idx + 1..]));
            }
        }
        if buf.len() >= MAX_VARINT_BYTES {
            Err(Error::varint_overflow(MAX_VARINT_BYTES))
        } else {
            Err(Error::buffer_too_short(buf.len() + 1, buf.len()))
        }
    }
}

impl From<u64> for v64 {
    fn from(x: u64) -> Self {
        Self { x }
    }
}

impl From<u32> for v64 {
    fn from(x: u32) -> Self {
        Self { x: x as u64 }
    }
}

impl From<usize> for v64 {
    fn from(x: usize) -> Self {
        Self { x: x as u64 }
    }
}

impl From<i64> for v64 {
    fn from(x: i64) -> Self {
        Self { x: x as u64 }
    }
}

/// Negative int32 values are sign-extended to ten bytes, exactly as an int64 would be.
impl From<i32> for v64 {
    fn from(x: i32) -> Self {
        Self { x: x as i64 as u64 }
    }
}

impl From<bool> for v64 {
    fn from(b: bool) -> Self {
        Self { x: b as u64 }
    }
}

impl From<v64> for u64 {
    fn from(v: v64) -> u64 {
        v.x
    }
}

impl TryFrom<v64> for usize {
    type Error = Error;

    fn try_from(v: v64) -> Result<usize, Error> {
        usize::try_from(v.x).map_err(|_| Error::UnsignedOverflow { value: v.x })
    }
}

#[cfg(test)]
mod tests {
    use super::super::stack_pack;
    use super::*;

    fn check(x: u64, expect: &[u8]) {
        let buf = stack_pack(v64::from(x)).to_vec();
        assert_eq!(expect, buf.as_slice(), "human got encoding of {} wrong?", x);
        assert_eq!(expect.len(), v64::size_of(x), "human got size_of {} wrong?", x);
        let (got, rem) = v64::unpack(&buf).expect("encoded varint should decode");
        assert_eq!(x, u64::from(got));
        assert!(rem.is_empty());
    }

    #[test]
    fn one_byte() {
        check(0, &[0x00]);
        check(1, &[0x01]);
        check(127, &[0x7f]);
    }

    #[test]
    fn two_bytes() {
        check(128, &[0x80, 0x01]);
        check(150, &[0x96, 0x01]);
        check(300, &[0xac, 0x02]);
        check(16383, &[0xff, 0x7f]);
    }

    #[test]
    fn boundaries() {
        check(16384, &[0x80, 0x80, 0x01]);
        check((1 << 28) - 1, &[0xff, 0xff, 0xff, 0x7f]);
        check(1 << 28, &[0x80, 0x80, 0x80, 0x80, 0x01]);
        check(
            u64::MAX,
            &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01],
        );
    }

    #[test]
    fn negative_int32_takes_ten_bytes() {
        let buf = stack_pack(v64::from(-1i32)).to_vec();
        assert_eq!(10, buf.len(), "int32 must sign extend");
        assert_eq!(u64::MAX, u64::from(v64::unpack(&buf).unwrap().0));
    }

    #[test]
    fn leaves_the_suffix() {
        let buf: &[u8] = &[0x96, 0x01, 0x42];
        let (v, rem) = v64::unpack(buf).unwrap();
        assert_eq!(150, u64::from(v));
        assert_eq!(&[0x42], rem);
    }

    #[test]
    fn empty_buffer() {
        assert_eq!(
            Err(Error::BufferTooShort {
                required: 1,
                had: 0
            }),
            v64::unpack(&[])
        );
    }

    #[test]
    fn unterminated() {
        assert_eq!(
            Err(Error::BufferTooShort {
                required: 3,
                had: 2
            }),
            v64::unpack(&[0x80, 0x80])
        );
    }

    #[test]
    fn eleven_bytes_is_malformed() {
        let buf = [0xffu8; 11];
        assert_eq!(
            Err(Error::VarintOverflow { bytes: 10 }),
            v64::unpack(&buf)
        );
    }

    #[test]
    fn usize_conversion() {
        assert_eq!(Ok(42usize), usize::try_from(v64::from(42u64)));
    }

    proptest::proptest! {
        #[test]
        fn any_u64(x: u64) {
            let buf = stack_pack(v64::from(x)).to_vec();
            proptest::prop_assert_eq!(v64::size_of(x), buf.len());
            let (got, rem) = v64::unpack(&buf).unwrap();
            proptest::prop_assert_eq!(x, u64::from(got));
            proptest::prop_assert!(rem.is_empty());
        }
    }
}
