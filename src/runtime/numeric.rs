//! Bit-level IEEE-754 helpers for the interpreter.
//!
//! Floats are handled as raw bit patterns so that Wasm's NaN rules hold
//! exactly: any operation that produces a NaN sets the quiet bit,
//! `min`/`max` propagate a quieted input NaN, `min(+0,-0) == -0` and
//! `max(+0,-0) == +0`, and float→int truncation traps on NaN and on
//! out-of-range finite input using exact bit-pattern boundaries.

use crate::runtime::Trap;

pub mod f32b {
    pub const MAX: u32 = 0x7f7f_ffff;
    pub const NEG_MAX: u32 = 0xff7f_ffff;
    pub const INF: u32 = 0x7f80_0000;
    pub const NEG_INF: u32 = 0xff80_0000;
    pub const NEG_ONE: u32 = 0xbf80_0000;
    pub const NEG_ZERO: u32 = 0x8000_0000;
    pub const QUIET_NAN: u32 = 0x7fc0_0000;
    pub const QUIET_NEG_NAN: u32 = 0xffc0_0000;
    pub const QUIET_NAN_BIT: u32 = 0x0040_0000;
    pub const SIG_BITS: u32 = 23;
    pub const SIG_MASK: u32 = 0x007f_ffff;
    pub const SIGN_MASK: u32 = 0x8000_0000;

    pub fn is_nan(bits: u32) -> bool {
        (bits > INF && bits < NEG_ZERO) || bits > NEG_INF
    }

    pub fn is_zero(bits: u32) -> bool {
        bits == 0 || bits == NEG_ZERO
    }

    pub fn is_canonical_nan(bits: u32) -> bool {
        bits == QUIET_NAN || bits == QUIET_NEG_NAN
    }

    pub fn is_arithmetic_nan(bits: u32) -> bool {
        bits & QUIET_NAN == QUIET_NAN
    }
}

pub mod f64b {
    pub const INF: u64 = 0x7ff0_0000_0000_0000;
    pub const NEG_INF: u64 = 0xfff0_0000_0000_0000;
    pub const NEG_ONE: u64 = 0xbff0_0000_0000_0000;
    pub const NEG_ZERO: u64 = 0x8000_0000_0000_0000;
    pub const QUIET_NAN: u64 = 0x7ff8_0000_0000_0000;
    pub const QUIET_NEG_NAN: u64 = 0xfff8_0000_0000_0000;
    pub const QUIET_NAN_BIT: u64 = 0x0008_0000_0000_0000;
    pub const SIG_BITS: u32 = 52;
    pub const SIGN_MASK: u64 = 0x8000_0000_0000_0000;

    pub fn is_nan(bits: u64) -> bool {
        (bits > INF && bits < NEG_ZERO) || bits > NEG_INF
    }

    pub fn is_zero(bits: u64) -> bool {
        bits == 0 || bits == NEG_ZERO
    }

    pub fn is_canonical_nan(bits: u64) -> bool {
        bits == QUIET_NAN || bits == QUIET_NEG_NAN
    }

    pub fn is_arithmetic_nan(bits: u64) -> bool {
        bits & QUIET_NAN == QUIET_NAN
    }
}

// --- float arithmetic on bit patterns ------------------------------------

pub fn f32_unop(bits: u32, op: impl Fn(f32) -> f32) -> u32 {
    let result = op(f32::from_bits(bits)).to_bits();
    if f32b::is_nan(result) {
        result | f32b::QUIET_NAN_BIT
    } else {
        result
    }
}

pub fn f64_unop(bits: u64, op: impl Fn(f64) -> f64) -> u64 {
    let result = op(f64::from_bits(bits)).to_bits();
    if f64b::is_nan(result) {
        result | f64b::QUIET_NAN_BIT
    } else {
        result
    }
}

pub fn f32_binop(lhs: u32, rhs: u32, op: impl Fn(f32, f32) -> f32) -> u32 {
    let result = op(f32::from_bits(lhs), f32::from_bits(rhs)).to_bits();
    if f32b::is_nan(result) {
        result | f32b::QUIET_NAN_BIT
    } else {
        result
    }
}

pub fn f64_binop(lhs: u64, rhs: u64, op: impl Fn(f64, f64) -> f64) -> u64 {
    let result = op(f64::from_bits(lhs), f64::from_bits(rhs)).to_bits();
    if f64b::is_nan(result) {
        result | f64b::QUIET_NAN_BIT
    } else {
        result
    }
}

/// Division by zero follows the sign rules: nonzero/0 is a signed infinity,
/// 0/0 is the canonical quiet NaN.
pub fn f32_div(lhs: u32, rhs: u32) -> u32 {
    if f32b::is_zero(rhs) {
        if f32b::is_nan(lhs) {
            lhs | f32b::QUIET_NAN
        } else if f32b::is_zero(lhs) {
            f32b::QUIET_NAN
        } else {
            let sign = (lhs & f32b::SIGN_MASK) ^ (rhs & f32b::SIGN_MASK);
            sign | f32b::INF
        }
    } else {
        f32_binop(lhs, rhs, |a, b| a / b)
    }
}

pub fn f64_div(lhs: u64, rhs: u64) -> u64 {
    if f64b::is_zero(rhs) {
        if f64b::is_nan(lhs) {
            lhs | f64b::QUIET_NAN
        } else if f64b::is_zero(lhs) {
            f64b::QUIET_NAN
        } else {
            let sign = (lhs & f64b::SIGN_MASK) ^ (rhs & f64b::SIGN_MASK);
            sign | f64b::INF
        }
    } else {
        f64_binop(lhs, rhs, |a, b| a / b)
    }
}

pub fn f32_min(lhs: u32, rhs: u32) -> u32 {
    if f32b::is_nan(lhs) {
        lhs | f32b::QUIET_NAN_BIT
    } else if f32b::is_nan(rhs) {
        rhs | f32b::QUIET_NAN_BIT
    } else if f32b::is_zero(lhs) && f32b::is_zero(rhs) {
        // min(+0,-0) is -0; the sign bit makes -0 the larger bit pattern.
        lhs.max(rhs)
    } else {
        let (a, b) = (f32::from_bits(lhs), f32::from_bits(rhs));
        if a < b {
            lhs
        } else {
            rhs
        }
    }
}

pub fn f32_max(lhs: u32, rhs: u32) -> u32 {
    if f32b::is_nan(lhs) {
        lhs | f32b::QUIET_NAN_BIT
    } else if f32b::is_nan(rhs) {
        rhs | f32b::QUIET_NAN_BIT
    } else if f32b::is_zero(lhs) && f32b::is_zero(rhs) {
        lhs.min(rhs)
    } else {
        let (a, b) = (f32::from_bits(lhs), f32::from_bits(rhs));
        if a > b {
            lhs
        } else {
            rhs
        }
    }
}

pub fn f64_min(lhs: u64, rhs: u64) -> u64 {
    if f64b::is_nan(lhs) {
        lhs | f64b::QUIET_NAN_BIT
    } else if f64b::is_nan(rhs) {
        rhs | f64b::QUIET_NAN_BIT
    } else if f64b::is_zero(lhs) && f64b::is_zero(rhs) {
        lhs.max(rhs)
    } else {
        let (a, b) = (f64::from_bits(lhs), f64::from_bits(rhs));
        if a < b {
            lhs
        } else {
            rhs
        }
    }
}

pub fn f64_max(lhs: u64, rhs: u64) -> u64 {
    if f64b::is_nan(lhs) {
        lhs | f64b::QUIET_NAN_BIT
    } else if f64b::is_nan(rhs) {
        rhs | f64b::QUIET_NAN_BIT
    } else if f64b::is_zero(lhs) && f64b::is_zero(rhs) {
        lhs.min(rhs)
    } else {
        let (a, b) = (f64::from_bits(lhs), f64::from_bits(rhs));
        if a > b {
            lhs
        } else {
            rhs
        }
    }
}

// --- float -> int truncation ----------------------------------------------
//
// The in-range predicates compare bit patterns against the exact boundary
// encodings; see the IEEE-754 layout tables in the Wasm spec appendix.

fn in_range_i32_f32(bits: u32) -> bool {
    bits < 0x4f00_0000 || (bits >= f32b::NEG_ZERO && bits <= 0xcf00_0000)
}

fn in_range_i64_f32(bits: u32) -> bool {
    bits < 0x5f00_0000 || (bits >= f32b::NEG_ZERO && bits <= 0xdf00_0000)
}

fn in_range_u32_f32(bits: u32) -> bool {
    bits < 0x4f80_0000 || (bits >= f32b::NEG_ZERO && bits < f32b::NEG_ONE)
}

fn in_range_u64_f32(bits: u32) -> bool {
    bits < 0x5f80_0000 || (bits >= f32b::NEG_ZERO && bits < f32b::NEG_ONE)
}

fn in_range_i32_f64(bits: u64) -> bool {
    bits <= 0x41df_ffff_ffc0_0000 || (bits >= f64b::NEG_ZERO && bits <= 0xc1e0_0000_0000_0000)
}

fn in_range_i64_f64(bits: u64) -> bool {
    bits < 0x43e0_0000_0000_0000 || (bits >= f64b::NEG_ZERO && bits <= 0xc3e0_0000_0000_0000)
}

fn in_range_u32_f64(bits: u64) -> bool {
    bits <= 0x41ef_ffff_ffe0_0000 || (bits >= f64b::NEG_ZERO && bits < f64b::NEG_ONE)
}

fn in_range_u64_f64(bits: u64) -> bool {
    bits < 0x43f0_0000_0000_0000 || (bits >= f64b::NEG_ZERO && bits < f64b::NEG_ONE)
}

macro_rules! trunc_fns {
    ($checked:ident, $sat:ident, $src_bits:ty, $from:ty, $dst:ty, $rep:ty, $is_nan:path, $in_range:ident, $sign_mask:expr) => {
        pub fn $checked(bits: $src_bits) -> Result<$rep, Trap> {
            if $is_nan(bits) {
                return Err(Trap::InvalidConversionToInteger);
            }
            if !$in_range(bits) {
                return Err(Trap::IntegerOverflow);
            }
            Ok(<$from>::from_bits(bits) as $dst as $rep)
        }

        pub fn $sat(bits: $src_bits) -> $rep {
            if $is_nan(bits) {
                0
            } else if !$in_range(bits) {
                if bits & $sign_mask != 0 {
                    <$dst>::MIN as $rep
                } else {
                    <$dst>::MAX as $rep
                }
            } else {
                <$from>::from_bits(bits) as $dst as $rep
            }
        }
    };
}

trunc_fns!(i32_trunc_f32, i32_trunc_sat_f32, u32, f32, i32, u32, f32b::is_nan, in_range_i32_f32, f32b::SIGN_MASK);
trunc_fns!(u32_trunc_f32, u32_trunc_sat_f32, u32, f32, u32, u32, f32b::is_nan, in_range_u32_f32, f32b::SIGN_MASK);
trunc_fns!(i64_trunc_f32, i64_trunc_sat_f32, u32, f32, i64, u64, f32b::is_nan, in_range_i64_f32, f32b::SIGN_MASK);
trunc_fns!(u64_trunc_f32, u64_trunc_sat_f32, u32, f32, u64, u64, f32b::is_nan, in_range_u64_f32, f32b::SIGN_MASK);
trunc_fns!(i32_trunc_f64, i32_trunc_sat_f64, u64, f64, i32, u32, f64b::is_nan, in_range_i32_f64, f64b::SIGN_MASK);
trunc_fns!(u32_trunc_f64, u32_trunc_sat_f64, u64, f64, u32, u32, f64b::is_nan, in_range_u32_f64, f64b::SIGN_MASK);
trunc_fns!(i64_trunc_f64, i64_trunc_sat_f64, u64, f64, i64, u64, f64b::is_nan, in_range_i64_f64, f64b::SIGN_MASK);
trunc_fns!(u64_trunc_f64, u64_trunc_sat_f64, u64, f64, u64, u64, f64b::is_nan, in_range_u64_f64, f64b::SIGN_MASK);

// --- demote / promote -----------------------------------------------------

fn in_range_demote(bits: u64) -> bool {
    bits <= 0x47ef_ffff_e000_0000 || (bits >= f64b::NEG_ZERO && bits <= 0xc7ef_ffff_e000_0000)
}

// Values just past ±F32_MAX that round-to-nearest maps back onto ±F32_MAX
// rather than infinity.
fn rounds_to_f32_max(bits: u64) -> bool {
    bits > 0x47ef_ffff_e000_0000 && bits < 0x47ef_ffff_f000_0000
}

fn rounds_to_neg_f32_max(bits: u64) -> bool {
    bits > 0xc7ef_ffff_e000_0000 && bits < 0xc7ef_ffff_f000_0000
}

pub fn f32_demote_f64(bits: u64) -> u32 {
    if in_range_demote(bits) {
        (f64::from_bits(bits) as f32).to_bits()
    } else if rounds_to_f32_max(bits) {
        f32b::MAX
    } else if rounds_to_neg_f32_max(bits) {
        f32b::NEG_MAX
    } else {
        let sign = ((bits >> 32) as u32) & f32b::SIGN_MASK;
        let tag = if f64b::is_nan(bits) {
            f32b::QUIET_NAN_BIT
                | (((bits >> (f64b::SIG_BITS - f32b::SIG_BITS)) as u32) & f32b::SIG_MASK)
        } else {
            0
        };
        sign | f32b::INF | tag
    }
}

pub fn f64_promote_f32(bits: u32) -> u64 {
    let result = (f32::from_bits(bits) as f64).to_bits();
    if f64b::is_nan(result) {
        result | f64b::QUIET_NAN_BIT
    } else {
        result
    }
}
