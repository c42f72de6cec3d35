//! wirebuf is the byte-level layer underneath protowire.  It knows nothing of tags or fields.  It
//! provides the varint encoding, the zig-zag mapping for signed integers, the [Packable] and
//! [Unpackable] traits that every wire object implements, and [CodedInput], the bounded cursor the
//! message parser uses to walk nested length-delimited ranges.
//!
//! The write side is deliberately position-free:  an object reports its exact size with
//! [Packable::pack_sz] and then fills a slice of exactly that size.  Because callers allocate
//! from `pack_sz`, an object whose `pack_sz` disagrees with what `pack` writes is a bug, and the
//! helpers here assert on it.

use std::fmt::Debug;

mod cursor;
mod varint;
mod zigzag;

pub use cursor::{CodedInput, Limit, DEFAULT_RECURSION_LIMIT};
pub use varint::{v64, MAX_VARINT_BYTES};
pub use zigzag::{unzigzag, zigzag};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static BUFFER_TOO_SHORT: biometrics::Counter = biometrics::Counter::new("wirebuf.buffer_too_short");
static VARINT_OVERFLOW: biometrics::Counter = biometrics::Counter::new("wirebuf.varint_overflow");
static RECURSION_LIMIT: biometrics::Counter = biometrics::Counter::new("wirebuf.recursion_limit");

/// Register this crate's counters with the provided collector.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&BUFFER_TOO_SHORT);
    collector.register_counter(&VARINT_OVERFLOW);
    collector.register_counter(&RECURSION_LIMIT);
}

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// All error conditions within `wirebuf`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// BufferTooShort indicates a read past the end of the buffer or the current limit.
    BufferTooShort {
        /// Number of bytes the read needed.
        required: usize,
        /// Number of bytes that remained.
        had: usize,
    },
    /// VarintOverflow indicates that ten bytes were consumed without a terminating byte.
    VarintOverflow {
        /// Number of bytes examined.
        bytes: usize,
    },
    /// UnsignedOverflow indicates that a value will not fit its intended (unsigned) target.
    UnsignedOverflow {
        /// The value that did not fit.
        value: u64,
    },
    /// RecursionLimitExceeded indicates that nested reads went deeper than the cursor allows.
    RecursionLimitExceeded {
        /// The configured limit.
        limit: usize,
    },
}

impl Error {
    pub(crate) fn buffer_too_short(required: usize, had: usize) -> Self {
        BUFFER_TOO_SHORT.click();
        Error::BufferTooShort { required, had }
    }

    pub(crate) fn varint_overflow(bytes: usize) -> Self {
        VARINT_OVERFLOW.click();
        Error::VarintOverflow { bytes }
    }

    pub(crate) fn recursion_limit_exceeded(limit: usize) -> Self {
        RECURSION_LIMIT.click();
        Error::RecursionLimitExceeded { limit }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BufferTooShort { required, had } => {
                write!(f, "buffer too short: required {} bytes, had {}", required, had)
            }
            Error::VarintOverflow { bytes } => {
                write!(f, "varint did not terminate within {} bytes", bytes)
            }
            Error::UnsignedOverflow { value } => {
                write!(f, "unsigned integer cannot hold value={}", value)
            }
            Error::RecursionLimitExceeded { limit } => {
                write!(f, "nesting exceeds recursion limit={}", limit)
            }
        }
    }
}

impl std::error::Error for Error {}

///////////////////////////////////////////// Packable /////////////////////////////////////////////

/// Packable objects serialize into an `&mut [u8]` whose length they report up front.
///
/// Packable objects should avoid interior mutability so that anyone holding an immutable
/// reference can rely on `pack_sz` and `pack` agreeing for the life of the reference.
pub trait Packable {
    /// The exact number of bytes `pack` will write.
    fn pack_sz(&self) -> usize;

    /// Fill `out` with the packed representation.  Packing never fails; a value that cannot be
    /// represented should be rejected when it is constructed.
    ///
    /// # Panics
    ///
    /// - When `out.len() != self.pack_sz()`
    fn pack(&self, out: &mut [u8]);

    /// Write the packed representation to `writer`, returning the number of bytes written.
    fn stream<W: std::io::Write>(&self, writer: &mut W) -> Result<usize, std::io::Error>
    where
        Self: Sized,
    {
        let buf = stack_pack(self).to_vec();
        writer.write_all(&buf)?;
        Ok(buf.len())
    }
}

//////////////////////////////////////////// Unpackable ////////////////////////////////////////////

/// Unpackable objects deserialize from a prefix of an `&[u8]`.  The format understood by
/// `T: Unpackable` must be the format written by `T: Packable`.
pub trait Unpackable<'a>: Sized {
    /// The error this unpackable returns.
    type Error: Debug;

    /// Parse an object from a prefix of `buf`, returning it and the unconsumed suffix.
    fn unpack<'b: 'a>(buf: &'b [u8]) -> Result<(Self, &'b [u8]), Self::Error>;
}

//////////////////////////////////////////// pack_helper ///////////////////////////////////////////

/// Pack `t` into a prefix of `buf` and return the unfilled remainder.
pub fn pack_helper<T: Packable>(t: T, buf: &mut [u8]) -> &mut [u8] {
    let sz = t.pack_sz();
    assert!(sz <= buf.len(), "packers should never be given short space");
    let (head, tail) = buf.split_at_mut(sz);
    t.pack(head);
    tail
}

//////////////////////////////////////////// StackPacker ///////////////////////////////////////////

const EMPTY: () = ();

/// Begin a chain of packable values on the stack.  Nothing is written until the chain is turned
/// into bytes with `to_vec` or streamed with [Packable::stream].
pub fn stack_pack<'a, T: Packable + 'a>(t: T) -> StackPacker<'a, (), T> {
    StackPacker { prefix: &EMPTY, t }
}

/// A deferred concatenation of a prefix chain and one more packable value.
pub struct StackPacker<'a, P, T>
where
    P: Packable + 'a,
    T: Packable + 'a,
{
    prefix: &'a P,
    t: T,
}

impl<'a, P, T> StackPacker<'a, P, T>
where
    P: Packable + 'a,
    T: Packable + 'a,
{
    /// Extend the chain with `u`.
    pub fn pack<'b, U: Packable + 'b>(&'b self, u: U) -> StackPacker<'b, Self, U> {
        StackPacker { prefix: self, t: u }
    }

    /// Pack the chain into a freshly allocated vector of exactly the right size.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.pack_sz()];
        Packable::pack(self, &mut buf);
        buf
    }
}

impl<'a, P, T> Packable for StackPacker<'a, P, T>
where
    P: Packable + 'a,
    T: Packable + 'a,
{
    fn pack_sz(&self) -> usize {
        self.prefix.pack_sz() + self.t.pack_sz()
    }

    fn pack(&self, out: &mut [u8]) {
        let (prefix, suffix) = out.split_at_mut(self.prefix.pack_sz());
        self.prefix.pack(prefix);
        self.t.pack(suffix);
    }
}

///////////////////////////////////////////// Unpacker /////////////////////////////////////////////

/// Unpacker parses a buffer front to back, one [Unpackable] at a time.
#[derive(Clone, Default)]
pub struct Unpacker<'a> {
    buf: &'a [u8],
}

impl<'a> Unpacker<'a> {
    /// Create a new [Unpacker] over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Unpack the next `T` and advance past it.
    pub fn unpack<'b, E, T: Unpackable<'b, Error = E>>(&mut self) -> Result<T, E>
    where
        'a: 'b,
    {
        let (t, buf): (T, &'a [u8]) = Unpackable::unpack(self.buf)?;
        self.buf = buf;
        Ok(t)
    }

    /// True if and only if the whole buffer has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The unconsumed portion of the buffer.
    pub fn remain(&self) -> &'a [u8] {
        self.buf
    }
}

////////////////////////////////////////// Packable for &P /////////////////////////////////////////

impl<P: Packable> Packable for &P {
    fn pack_sz(&self) -> usize {
        (*self).pack_sz()
    }

    fn pack(&self, out: &mut [u8]) {
        (*self).pack(out)
    }
}

impl Packable for () {
    fn pack_sz(&self) -> usize {
        0
    }

    fn pack(&self, _: &mut [u8]) {}
}

/////////////////////////////////// fixed-width little-endian values ///////////////////////////////////

// fixed32, fixed64, sfixed32, sfixed64, float, and double all travel as little-endian words.
macro_rules! packable_little_endian {
    ($what:ty) => {
        impl Packable for $what {
            fn pack_sz(&self) -> usize {
                std::mem::size_of::<$what>()
            }

            fn pack(&self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }
        }

        impl<'a> Unpackable<'a> for $what {
            type Error = Error;

            fn unpack<'b: 'a>(buf: &'b [u8]) -> Result<(Self, &'b [u8]), Error> {
                const SZ: usize = std::mem::size_of::<$what>();
                if buf.len() < SZ {
                    return Err(Error::buffer_too_short(SZ, buf.len()));
                }
                let (head, tail) = buf.split_at(SZ);
                let mut word = [0u8; SZ];
                word.copy_from_slice(head);
                Ok((<$what>::from_le_bytes(word), tail))
            }
        }
    };
}

packable_little_endian!(u32);
packable_little_endian!(i32);
packable_little_endian!(u64);
packable_little_endian!(i64);
packable_little_endian!(f32);
packable_little_endian!(f64);

////////////////////////////////////////// length_prefixed /////////////////////////////////////////

/// Wrap `body` so that it packs as `<varint length><body>`.  The body's size is computed once.
pub fn length_prefixed<P: Packable>(body: P) -> LengthPrefixed<P> {
    LengthPrefixed {
        size: body.pack_sz(),
        body,
    }
}

/// The type returned by [length_prefixed].
pub struct LengthPrefixed<P: Packable> {
    // memoized body.pack_sz()
    size: usize,
    body: P,
}

impl<P: Packable> LengthPrefixed<P> {
    /// Size of the body, excluding the length prefix.
    pub fn body_sz(&self) -> usize {
        self.size
    }
}

impl<P: Packable> Packable for LengthPrefixed<P> {
    fn pack_sz(&self) -> usize {
        v64::from(self.size).pack_sz() + self.size
    }

    fn pack(&self, out: &mut [u8]) {
        let prefix = v64::from(self.size);
        let out = pack_helper(prefix, out);
        self.body.pack(out);
    }
}

/////////////////////////////////////////////// &[u8] //////////////////////////////////////////////

/// Byte slices pack with a varint length prefix, which is how every length-delimited payload
/// travels on the wire.
impl Packable for &[u8] {
    fn pack_sz(&self) -> usize {
        v64::from(self.len()).pack_sz() + self.len()
    }

    fn pack(&self, out: &mut [u8]) {
        let out = pack_helper(v64::from(self.len()), out);
        out.copy_from_slice(self);
    }
}

impl<'a> Unpackable<'a> for &'a [u8] {
    type Error = Error;

    fn unpack<'b: 'a>(buf: &'b [u8]) -> Result<(Self, &'b [u8]), Error> {
        let (len, buf) = v64::unpack(buf)?;
        let len = usize::try_from(len)?;
        if len > buf.len() {
            return Err(Error::buffer_too_short(len, buf.len()));
        }
        Ok(buf.split_at(len))
    }
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_little_endian() {
        let buf = stack_pack(0xc0ffeedau32)
            .pack(-2i32)
            .pack(0x0102030405060708u64)
            .to_vec();
        assert_eq!(
            &[
                0xda, 0xee, 0xff, 0xc0, 0xfe, 0xff, 0xff, 0xff, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03,
                0x02, 0x01
            ],
            buf.as_slice(),
            "human got little-endian packing wrong?"
        );
        let mut up = Unpacker::new(&buf);
        assert_eq!(Ok(0xc0ffeedau32), up.unpack());
        assert_eq!(Ok(-2i32), up.unpack());
        assert_eq!(Ok(0x0102030405060708u64), up.unpack());
        assert!(up.is_empty(), "human got remainder wrong?");
    }

    #[test]
    fn floats_keep_their_bits() {
        let buf = stack_pack(1.0f32).pack(-0.5f64).to_vec();
        assert_eq!(&[0x00, 0x00, 0x80, 0x3f], &buf[..4]);
        assert_eq!(&[0, 0, 0, 0, 0, 0, 0xe0, 0xbf], &buf[4..]);
        let mut up = Unpacker::new(&buf);
        assert_eq!(Ok(1.0f32), up.unpack());
        assert_eq!(Ok(-0.5f64), up.unpack());
    }

    #[test]
    fn short_fixed_width() {
        let buf: &[u8] = &[1, 2, 3];
        let got: Result<(u32, &[u8]), Error> = Unpackable::unpack(buf);
        assert_eq!(Err(Error::BufferTooShort { required: 4, had: 3 }), got);
    }

    #[test]
    fn byte_slices_are_length_prefixed() {
        let body: &[u8] = b"bar";
        let buf = stack_pack(body).to_vec();
        assert_eq!(&[3, b'b', b'a', b'r'], buf.as_slice());
        let mut up = Unpacker::new(&buf);
        let got: &[u8] = up.unpack().expect("slice should unpack");
        assert_eq!(body, got);
    }

    #[test]
    fn byte_slice_longer_than_buffer() {
        let buf: &[u8] = &[5, 1, 2];
        let got: Result<(&[u8], &[u8]), Error> = Unpackable::unpack(buf);
        assert_eq!(Err(Error::BufferTooShort { required: 5, had: 2 }), got);
    }

    #[test]
    fn length_prefixed_memoizes_body() {
        let sp = stack_pack(7u32);
        let lp = length_prefixed(sp.pack(9u32));
        assert_eq!(8, lp.body_sz());
        assert_eq!(9, lp.pack_sz());
        let buf = stack_pack(&lp).to_vec();
        assert_eq!(&[8, 7, 0, 0, 0, 9, 0, 0, 0], buf.as_slice());
    }

    #[test]
    fn stream_matches_to_vec() {
        let sp = stack_pack(v64::from(1u64 << 40));
        let pa = sp.pack(3u32);
        let mut out = Vec::new();
        let written = (&pa).stream(&mut out).expect("writing to a vec cannot fail");
        assert_eq!(pa.pack_sz(), written);
        assert_eq!(pa.to_vec(), out);
    }
}
