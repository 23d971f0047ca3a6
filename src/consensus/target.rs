//! Compact difficulty encoding
//!
//! `nBits` style: one size byte followed by a 23-bit mantissa and a sign bit.

use primitive_types::{U256, U512};

const SIGN_BIT: u32 = 0x0080_0000;
const MANTISSA_MASK: u32 = 0x007f_ffff;

/// Expand a compact target into a 256-bit integer.
///
/// Negative encodings decode to zero; encodings that do not fit in 256 bits
/// saturate to `U256::MAX` so that any ceiling clamp still applies.
pub fn compact_to_target(compact: u32) -> U256 {
    let size = compact >> 24;
    let word = compact & MANTISSA_MASK;

    if word == 0 || compact & SIGN_BIT != 0 {
        return U256::zero();
    }

    if size <= 3 {
        return U256::from(word >> (8 * (3 - size)));
    }

    let overflows = size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
    if overflows {
        return U256::MAX;
    }

    U256::from(word) << (8 * (size as usize - 3))
}

/// Compress a 256-bit target; the result never decodes above the input.
pub fn target_to_compact(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u32()
    };

    // Keep the sign bit clear by moving a byte into the exponent
    if compact & SIGN_BIT != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | ((size as u32) << 24)
}

/// `target * numerator / denominator` without intermediate overflow.
///
/// Results above 256 bits saturate to `U256::MAX`; a zero denominator is
/// treated as one.
pub fn scale_target(target: U256, numerator: u64, denominator: u64) -> U256 {
    let wide = U512::from(target) * U512::from(numerator) / U512::from(denominator.max(1));
    U256::try_from(wide).unwrap_or(U256::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_compact_roundtrip() {
        for compact in [0x1d00ffffu32, 0x1b0404cb, 0x1f03ffff, 0x1e0fffff, 0x03123456] {
            assert_eq!(target_to_compact(compact_to_target(compact)), compact);
        }
    }

    #[test]
    fn test_bitcoin_genesis_target() {
        let target = compact_to_target(0x1d00ffff);
        assert_eq!(target, U256::from(0xffffu64) << 208);
    }

    #[test]
    fn test_negative_and_zero_decode_to_zero() {
        assert_eq!(compact_to_target(0x04923456), U256::zero());
        assert_eq!(compact_to_target(0x1d000000), U256::zero());
    }

    #[test]
    fn test_overflow_saturates() {
        assert_eq!(compact_to_target(0xff123456), U256::MAX);
    }

    #[test]
    fn test_compact_never_rounds_up() {
        let limit = U256::MAX >> 14;
        assert!(compact_to_target(target_to_compact(limit)) <= limit);
    }

    #[test]
    fn test_scale_target_preserves_identity() {
        let target = compact_to_target(0x1d00ffff);
        assert_eq!(scale_target(target, 10_000, 10_000), target);
        assert_eq!(scale_target(target, 10_000, 5_000), target * U256::from(2u64));
    }

    #[test]
    fn test_scale_target_saturates() {
        assert_eq!(scale_target(U256::MAX, 10_000, 1), U256::MAX);
        assert_eq!(scale_target(U256::one(), 3, 0), U256::from(3u64));
    }
}
