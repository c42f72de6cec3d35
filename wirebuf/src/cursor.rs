//! A bounded, forward-only cursor over a byte slice.
//!
//! Nested length-delimited ranges are handled with a stack of limits that lives on the caller's
//! stack:  [CodedInput::push_limit] narrows the readable range and hands back a [Limit] token that
//! [CodedInput::pop_limit] consumes to restore the enclosing range.  Reads never cross the current
//! limit, so a nested parser cannot consume its parent's bytes.

use super::{v64, Error, Unpackable};

/// Nesting depth permitted unless the caller asks for something else.
pub const DEFAULT_RECURSION_LIMIT: usize = 64;

/// The enclosing limit, saved by [CodedInput::push_limit].
#[must_use]
#[derive(Debug, Eq, PartialEq)]
pub struct Limit {
    prev: usize,
}

/// CodedInput reads wire primitives from a slice it borrows.
#[derive(Clone, Debug)]
pub struct CodedInput<'a> {
    buf: &'a [u8],
    pos: usize,
    limit: usize,
    depth: usize,
    recursion_limit: usize,
}

impl<'a> CodedInput<'a> {
    /// Read `buf` with the default recursion limit.
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_recursion_limit(buf, DEFAULT_RECURSION_LIMIT)
    }

    /// Read `buf`, refusing to nest deeper than `recursion_limit`.
    pub fn with_recursion_limit(buf: &'a [u8], recursion_limit: usize) -> Self {
        Self {
            buf,
            pos: 0,
            limit: buf.len(),
            depth: 0,
            recursion_limit,
        }
    }

    /// Offset of the next unread byte from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// True when the current limit has been reached.
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.limit
    }

    /// Bytes readable before the current limit.
    pub fn bytes_until_limit(&self) -> usize {
        self.limit - self.pos
    }

    /// The unread bytes up to the current limit.
    pub fn remain(&self) -> &'a [u8] {
        &self.buf[self.pos..self.limit]
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The configured maximum nesting depth.
    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    /// Start reading an unrelated buffer at the current nesting depth.  Used when a payload was
    /// captured as bytes and is decoded after the fact, so the nesting it adds still counts.
    pub fn fork<'b>(&self, buf: &'b [u8]) -> CodedInput<'b> {
        CodedInput {
            buf,
            pos: 0,
            limit: buf.len(),
            depth: self.depth,
            recursion_limit: self.recursion_limit,
        }
    }

    /// Consume exactly `n` bytes.
    pub fn read_raw_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let had = self.bytes_until_limit();
        if n > had {
            return Err(Error::buffer_too_short(n, had));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Consume one byte.
    pub fn read_byte(&mut self) -> Result<u8, Error> {
        Ok(self.read_raw_bytes(1)?[0])
    }

    /// Consume a varint of at most ten bytes.
    pub fn read_varint(&mut self) -> Result<u64, Error> {
        let remain = self.remain();
        let (v, rest) = v64::unpack(remain)?;
        self.pos += remain.len() - rest.len();
        Ok(v.into())
    }

    /// Consume a little-endian 32-bit word.
    pub fn read_fixed32(&mut self) -> Result<u32, Error> {
        let (x, _) = u32::unpack(self.read_raw_bytes(4)?)?;
        Ok(x)
    }

    /// Consume a little-endian 64-bit word.
    pub fn read_fixed64(&mut self) -> Result<u64, Error> {
        let (x, _) = u64::unpack(self.read_raw_bytes(8)?)?;
        Ok(x)
    }

    /// Consume a varint length and then that many bytes.
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_length()?;
        self.read_raw_bytes(len)
    }

    /// Consume a varint length without consuming the bytes it describes.
    pub fn read_length(&mut self) -> Result<usize, Error> {
        let len = self.read_varint()?;
        usize::try_from(v64::from(len))
    }

    /// Narrow the readable range to the next `len` bytes.  Fails if that would extend past the
    /// range already in force.
    pub fn push_limit(&mut self, len: usize) -> Result<Limit, Error> {
        let had = self.bytes_until_limit();
        if len > had {
            return Err(Error::buffer_too_short(len, had));
        }
        let prev = self.limit;
        self.limit = self.pos + len;
        Ok(Limit { prev })
    }

    /// Restore the range that was in force before the matching `push_limit`.
    pub fn pop_limit(&mut self, limit: Limit) {
        debug_assert!(limit.prev >= self.limit);
        self.limit = limit.prev;
    }

    /// Discard whatever remains before the current limit.
    pub fn skip_to_limit(&mut self) {
        self.pos = self.limit;
    }

    /// Note one more level of nesting, failing when the recursion limit would be exceeded.
    pub fn enter_recursion(&mut self) -> Result<(), Error> {
        if self.depth >= self.recursion_limit {
            return Err(Error::recursion_limit_exceeded(self.recursion_limit));
        }
        self.depth += 1;
        Ok(())
    }

    /// Undo one `enter_recursion`.
    pub fn leave_recursion(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_in_order() {
        let buf: &[u8] = &[0x96, 0x01, 0x01, 0x00, 0x00, 0x00, 2, 0, 0, 0, 0, 0, 0, 0, 3, b'f', b'o', b'o'];
        let mut input = CodedInput::new(buf);
        assert_eq!(Ok(150), input.read_varint());
        assert_eq!(Ok(1), input.read_fixed32());
        assert_eq!(Ok(2), input.read_fixed64());
        assert_eq!(Ok(&b"foo"[..]), input.read_length_delimited());
        assert!(input.is_at_end());
        assert_eq!(buf.len(), input.position());
    }

    #[test]
    fn limits_nest() {
        let buf: &[u8] = &[1, 2, 3, 4, 5, 6];
        let mut input = CodedInput::new(buf);
        assert_eq!(Ok(1), input.read_byte());
        let outer = input.push_limit(4).unwrap();
        assert_eq!(4, input.bytes_until_limit());
        assert_eq!(Ok(2), input.read_byte());
        let inner = input.push_limit(2).unwrap();
        assert_eq!(&[3, 4], input.remain());
        assert_eq!(
            Err(Error::BufferTooShort {
                required: 3,
                had: 2
            }),
            input.read_raw_bytes(3)
        );
        input.skip_to_limit();
        assert!(input.is_at_end());
        input.pop_limit(inner);
        assert_eq!(Ok(5), input.read_byte());
        assert!(input.is_at_end());
        input.pop_limit(outer);
        assert_eq!(Ok(6), input.read_byte());
        assert!(input.is_at_end());
    }

    #[test]
    fn limit_cannot_grow() {
        let buf: &[u8] = &[1, 2, 3];
        let mut input = CodedInput::new(buf);
        let limit = input.push_limit(2).unwrap();
        assert_eq!(
            Err(Error::BufferTooShort {
                required: 3,
                had: 2
            }),
            input.push_limit(3)
        );
        input.pop_limit(limit);
    }

    #[test]
    fn length_past_end() {
        let buf: &[u8] = &[10, 1, 2];
        let mut input = CodedInput::new(buf);
        assert_eq!(
            Err(Error::BufferTooShort {
                required: 10,
                had: 2
            }),
            input.read_length_delimited()
        );
    }

    #[test]
    fn varint_respects_limit() {
        // the varint continues past the limit, so it must not be read
        let buf: &[u8] = &[0x96, 0x01];
        let mut input = CodedInput::new(buf);
        let _limit = input.push_limit(1).unwrap();
        assert_eq!(
            Err(Error::BufferTooShort {
                required: 2,
                had: 1
            }),
            input.read_varint()
        );
    }

    #[test]
    fn recursion() {
        let mut input = CodedInput::with_recursion_limit(&[], 2);
        assert_eq!(Ok(()), input.enter_recursion());
        assert_eq!(Ok(()), input.enter_recursion());
        assert_eq!(
            Err(Error::RecursionLimitExceeded { limit: 2 }),
            input.enter_recursion()
        );
        input.leave_recursion();
        assert_eq!(1, input.depth());
        assert_eq!(Ok(()), input.enter_recursion());
    }

    #[test]
    fn fork_keeps_depth() {
        let mut input = CodedInput::with_recursion_limit(&[], 2);
        input.enter_recursion().unwrap();
        let mut forked = input.fork(&[7, 8]);
        assert_eq!(1, forked.depth());
        assert_eq!(2, forked.bytes_until_limit());
        assert_eq!(Ok(()), forked.enter_recursion());
        assert_eq!(
            Err(Error::RecursionLimitExceeded { limit: 2 }),
            forked.enter_recursion()
        );
    }

    #[test]
    fn default_recursion_limit() {
        let input = CodedInput::new(&[]);
        assert_eq!(DEFAULT_RECURSION_LIMIT, input.recursion_limit());
    }
}
