//! Register slots
//!
//! Every register of a frame holds one [`Slot`]. Slots are `Copy` and have a
//! fixed 16-byte layout: a one-byte tag followed by an 8-byte payload.
//! Strings, errors and resume tokens are referenced by handle into tables
//! owned by the engine, so a slot never owns heap memory.
//!
//! Reads through the wrong accessor reinterpret the payload bits (an `F64`
//! read as an integer yields its IEEE bit pattern), which keeps evaluation
//! total and deterministic for well-typed and ill-typed IL alike.

use std::fmt;

/// Handle into the engine's string table
pub type StrHandle = u32;
/// Handle into the engine's error table
pub type ErrorHandle = u32;
/// Handle into the engine's resume-token table
pub type TokenHandle = u32;

/// Tagged register value
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[repr(u8)]
pub enum Slot {
    #[default]
    Void,
    I64(i64),
    F64(f64),
    Bool(bool),
    Ptr(u64),
    Str(StrHandle),
    Error(ErrorHandle),
    ResumeTok(TokenHandle),
}

const _: () = assert!(std::mem::size_of::<Slot>() == 16);

impl Slot {
    /// Integer view of the payload
    #[inline(always)]
    pub fn as_i64(self) -> i64 {
        match self {
            Slot::Void => 0,
            Slot::I64(v) => v,
            Slot::F64(v) => v.to_bits() as i64,
            Slot::Bool(b) => b as i64,
            Slot::Ptr(p) => p as i64,
            Slot::Str(h) | Slot::Error(h) | Slot::ResumeTok(h) => h as i64,
        }
    }

    /// Float view of the payload
    #[inline(always)]
    pub fn as_f64(self) -> f64 {
        match self {
            Slot::F64(v) => v,
            other => f64::from_bits(other.as_i64() as u64),
        }
    }

    #[inline(always)]
    pub fn as_bool(self) -> bool {
        match self {
            Slot::Bool(b) => b,
            other => other.as_i64() != 0,
        }
    }

    #[inline(always)]
    pub fn as_ptr(self) -> u64 {
        self.as_i64() as u64
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Slot::Void => "void",
            Slot::I64(_) => "i64",
            Slot::F64(_) => "f64",
            Slot::Bool(_) => "i1",
            Slot::Ptr(_) => "ptr",
            Slot::Str(_) => "str",
            Slot::Error(_) => "error",
            Slot::ResumeTok(_) => "resume_tok",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Void => write!(f, "void"),
            Slot::I64(v) => write!(f, "{}", v),
            Slot::F64(v) => write!(f, "{:?}", v),
            Slot::Bool(b) => write!(f, "{}", b),
            Slot::Ptr(p) => write!(f, "{:#x}", p),
            Slot::Str(h) => write!(f, "str#{}", h),
            Slot::Error(h) => write!(f, "error#{}", h),
            Slot::ResumeTok(h) => write!(f, "tok#{}", h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_layout() {
        assert_eq!(std::mem::size_of::<Slot>(), 16);
        assert_eq!(Slot::default(), Slot::Void);
    }

    #[test]
    fn test_reinterpretation() {
        let f = Slot::F64(1.5);
        assert_eq!(f.as_i64(), 1.5f64.to_bits() as i64);
        assert_eq!(Slot::I64(1.5f64.to_bits() as i64).as_f64(), 1.5);
        assert_eq!(Slot::Bool(true).as_i64(), 1);
        assert!(Slot::I64(7).as_bool());
        assert!(!Slot::Void.as_bool());
    }

    #[test]
    fn test_ptr_roundtrip() {
        let p = Slot::Ptr(0x1008);
        assert_eq!(p.as_ptr(), 0x1008);
        assert_eq!(p.to_string(), "0x1008");
    }
}
