//! Byte-filling and numeric-source capabilities.
//!
//! Two small traits that a source can implement side by side:
//!
//! - [`ByteFiller`]: fallible "fill this buffer" entropy input.
//! - [`NumericSource`]: 63-bit integer draws in the shape of a classic
//!   `Int63` / `Uint64` / `Seed` pseudo-random source.
//!
//! [`uniform_below`] connects them: unbiased integers from any byte filler by
//! rejection sampling.

use std::num::NonZeroU64;

use crate::error::Result;

/// A fallible source of bytes.
///
/// A successful fill returns `buf.len()`. There is no partial success.
pub trait ByteFiller {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize>;
}

impl<F: ByteFiller + ?Sized> ByteFiller for &mut F {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).fill(buf)
    }
}

/// A 64-bit numeric pseudo-random source.
///
/// The `try_*` methods report failures of the underlying entropy input. The
/// plain methods cannot report errors and panic instead: a degraded source
/// must never yield a made-up value.
pub trait NumericSource {
    /// Uniform value in `[0, 2^63 - 1)`.
    fn try_next_int63(&mut self) -> Result<i64>;

    /// Uniform unsigned value. Implementations may draw from a narrower
    /// range than the full `u64` domain and must document it;
    /// [`RandomByteSource`](crate::RandomByteSource) stays in `[0, 2^63 - 1)`.
    fn try_next_uint64(&mut self) -> Result<u64>;

    /// Accepted for compatibility. Implementations backed by external
    /// entropy ignore it.
    fn reseed(&mut self, seed: i64);

    /// Infallible [`try_next_int63`](Self::try_next_int63).
    ///
    /// # Panics
    /// Panics if the underlying source fails.
    fn next_int63(&mut self) -> i64 {
        match self.try_next_int63() {
            Ok(n) => n,
            Err(e) => panic!("random byte source failed: {e}"),
        }
    }

    /// Infallible [`try_next_uint64`](Self::try_next_uint64).
    ///
    /// # Panics
    /// Panics if the underlying source fails.
    fn next_uint64(&mut self) -> u64 {
        match self.try_next_uint64() {
            Ok(n) => n,
            Err(e) => panic!("random byte source failed: {e}"),
        }
    }
}

/// Uniform integer in `[0, bound)` drawn from `filler`.
///
/// Reads the minimal number of big-endian bytes covering `bound - 1`, masks
/// off the excess high bits, and rejects values at or above `bound`. Each
/// attempt is one fill; the expected number of attempts is below 2. A bound
/// of 1 returns 0 without touching the filler.
pub fn uniform_below<F: ByteFiller + ?Sized>(filler: &mut F, bound: NonZeroU64) -> Result<u64> {
    let max = bound.get() - 1;
    if max == 0 {
        return Ok(0);
    }

    let bits = u64::BITS - max.leading_zeros();
    let len = bits.div_ceil(8) as usize;
    let top_bits = match bits % 8 {
        0 => 8,
        b => b,
    };
    let top_mask = (0xFFu16 >> (8 - top_bits)) as u8;

    let mut bytes = [0u8; 8];
    loop {
        let buf = &mut bytes[8 - len..];
        filler.fill(buf)?;
        buf[0] &= top_mask;
        let n = u64::from_be_bytes(bytes);
        if n < bound.get() {
            return Ok(n);
        }
    }
}
