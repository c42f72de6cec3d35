//! Zig-zag maps signed integers onto unsigned ones so that small magnitudes of either sign become
//! small varints:  0 -> 0, -1 -> 1, 1 -> 2, -2 -> 3, and in general i -> 2i for i >= 0 and
//! i -> -2i - 1 for i < 0.
//!
//! sint32 values use the same mapping.  For any value that fits in 32 bits the 64-bit mapping of
//! the sign-extended value is identical to the 32-bit mapping.

/// Map a signed integer onto the unsigned integers.
pub fn zigzag(x: i64) -> u64 {
    ((x << 1) ^ (x >> 63)) as u64
}

/// Invert [zigzag].
pub fn unzigzag(x: u64) -> i64 {
    ((x >> 1) as i64) ^ (-((x & 1) as i64))
}
