//! Integer and floating-point semantics
//!
//! Pure functions shared by the interpreter and by anything that needs to
//! reproduce its results bit for bit (constant folding, native backends).
//! Checked operations return the [`TrapKind`] they raise instead of a value.
//!
//! Storage is always 64-bit two's complement. Operations with a declared
//! narrower width first truncate their operands to that width and sign
//! extend the result back to 64 bits.

use crate::TrapKind;
use il::IntWidth;

pub type ArithResult<T> = Result<T, TrapKind>;

/// Truncate to `width` and sign-extend back to 64 bits
#[inline]
pub fn sext(value: i64, width: IntWidth) -> i64 {
    let shift = 64 - width.bits();
    (value << shift) >> shift
}

#[inline]
fn fits_signed(value: i128, width: IntWidth) -> bool {
    value >= width.signed_min() as i128 && value <= width.signed_max() as i128
}

// ============================================================================
// Wrapping arithmetic
// ============================================================================

#[inline]
pub fn add(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}

#[inline]
pub fn sub(a: i64, b: i64) -> i64 {
    a.wrapping_sub(b)
}

#[inline]
pub fn mul(a: i64, b: i64) -> i64 {
    a.wrapping_mul(b)
}

// ============================================================================
// Overflow-checked arithmetic
// ============================================================================

pub fn add_ovf(a: i64, b: i64, width: IntWidth) -> ArithResult<i64> {
    let wide = sext(a, width) as i128 + sext(b, width) as i128;
    if fits_signed(wide, width) {
        Ok(wide as i64)
    } else {
        Err(TrapKind::Overflow)
    }
}

pub fn sub_ovf(a: i64, b: i64, width: IntWidth) -> ArithResult<i64> {
    let wide = sext(a, width) as i128 - sext(b, width) as i128;
    if fits_signed(wide, width) {
        Ok(wide as i64)
    } else {
        Err(TrapKind::Overflow)
    }
}

pub fn mul_ovf(a: i64, b: i64, width: IntWidth) -> ArithResult<i64> {
    let wide = sext(a, width) as i128 * sext(b, width) as i128;
    if fits_signed(wide, width) {
        Ok(wide as i64)
    } else {
        Err(TrapKind::Overflow)
    }
}

// ============================================================================
// Division
// ============================================================================

/// Signed division truncating toward zero
pub fn sdiv(a: i64, b: i64, width: IntWidth) -> ArithResult<i64> {
    let (a, b) = (sext(a, width), sext(b, width));
    if b == 0 {
        return Err(TrapKind::DivideByZero);
    }
    if a == width.signed_min() && b == -1 {
        return Err(TrapKind::Overflow);
    }
    Ok(a / b)
}

/// Signed remainder; the result takes the dividend's sign and `MIN % -1` is 0
pub fn srem(a: i64, b: i64, width: IntWidth) -> ArithResult<i64> {
    let (a, b) = (sext(a, width), sext(b, width));
    if b == 0 {
        return Err(TrapKind::DivideByZero);
    }
    if b == -1 {
        return Ok(0);
    }
    Ok(a % b)
}

pub fn udiv(a: i64, b: i64) -> ArithResult<i64> {
    let (a, b) = (a as u64, b as u64);
    if b == 0 {
        return Err(TrapKind::DivideByZero);
    }
    Ok((a / b) as i64)
}

pub fn urem(a: i64, b: i64) -> ArithResult<i64> {
    let (a, b) = (a as u64, b as u64);
    if b == 0 {
        return Err(TrapKind::DivideByZero);
    }
    Ok((a % b) as i64)
}

// ============================================================================
// Shifts (amount masked to [0, 63])
// ============================================================================

#[inline]
pub fn shl(a: i64, amount: i64) -> i64 {
    a.wrapping_shl((amount & 63) as u32)
}

#[inline]
pub fn lshr(a: i64, amount: i64) -> i64 {
    ((a as u64) >> (amount & 63)) as i64
}

#[inline]
pub fn ashr(a: i64, amount: i64) -> i64 {
    a >> (amount & 63)
}

// ============================================================================
// Float comparisons
// ============================================================================

/// Float comparison predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Ord,
    Uno,
}

/// Ordered predicates are false when either side is NaN; `Ne` and `Uno` are true
pub fn fcmp(pred: FloatPredicate, a: f64, b: f64) -> bool {
    match pred {
        FloatPredicate::Eq => a == b,
        FloatPredicate::Ne => a != b,
        FloatPredicate::Lt => a < b,
        FloatPredicate::Le => a <= b,
        FloatPredicate::Gt => a > b,
        FloatPredicate::Ge => a >= b,
        FloatPredicate::Ord => !a.is_nan() && !b.is_nan(),
        FloatPredicate::Uno => a.is_nan() || b.is_nan(),
    }
}

// ============================================================================
// Conversions
// ============================================================================

// 2^63 and 2^64 are exact in binary64; the valid range is half-open above.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

fn float_to_signed(value: f64, width: IntWidth) -> ArithResult<i64> {
    if value.is_nan() || value < -TWO_POW_63 || value >= TWO_POW_63 {
        return Err(TrapKind::Overflow);
    }
    let int = value as i64;
    if int < width.signed_min() || int > width.signed_max() {
        return Err(TrapKind::Overflow);
    }
    Ok(int)
}

/// `fptosi`: truncate toward zero
pub fn fptosi(value: f64, width: IntWidth) -> ArithResult<i64> {
    float_to_signed(value.trunc(), width)
}

/// `cast.fp_to_si.rte.chk`: round half to even, then range check
pub fn fp_to_si_rte(value: f64, width: IntWidth) -> ArithResult<i64> {
    float_to_signed(value.round_ties_even(), width)
}

/// `cast.fp_to_ui.rte.chk`: round half to even, then unsigned range check.
/// The result is the unsigned value's bit pattern.
pub fn fp_to_ui_rte(value: f64, width: IntWidth) -> ArithResult<i64> {
    let rounded = value.round_ties_even();
    if rounded.is_nan() || rounded < 0.0 || rounded >= TWO_POW_64 {
        return Err(TrapKind::Overflow);
    }
    let int = rounded as u64;
    if int > width.unsigned_max() {
        return Err(TrapKind::Overflow);
    }
    Ok(int as i64)
}

#[inline]
pub fn sitofp(value: i64) -> f64 {
    value as f64
}

#[inline]
pub fn uitofp(value: i64) -> f64 {
    value as u64 as f64
}

/// `cast.si_narrow.chk`: value must be exactly representable as signed `width`
pub fn si_narrow(value: i64, width: IntWidth) -> ArithResult<i64> {
    if value < width.signed_min() || value > width.signed_max() {
        return Err(TrapKind::Overflow);
    }
    Ok(value)
}

/// `cast.ui_narrow.chk`: value, read as unsigned, must fit unsigned `width`
pub fn ui_narrow(value: i64, width: IntWidth) -> ArithResult<i64> {
    if (value as u64) > width.unsigned_max() {
        return Err(TrapKind::Overflow);
    }
    Ok(value)
}

/// `idx.chk index, lo, hi`: `index` when `lo <= index < hi`
pub fn idx_chk(index: i64, lo: i64, hi: i64, width: IntWidth) -> ArithResult<i64> {
    let (index, lo, hi) = (sext(index, width), sext(lo, width), sext(hi, width));
    if index < lo || index >= hi {
        return Err(TrapKind::Bounds);
    }
    Ok(index)
}
