//! IL Type System
//!
//! IL types are deliberately flat: every value fits a single register slot,
//! and integer types exist mainly to declare the width that checked
//! arithmetic and narrowing casts validate against.

use serde::{Deserialize, Serialize};
use std::fmt;

/// IL type representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// No value
    Void,
    /// Boolean (`i1`)
    I1,
    I8,
    I16,
    I32,
    I64,
    F64,
    /// Untyped pointer
    Ptr,
    /// Runtime string handle
    Str,
    /// Structured trap payload bound to a handler's first parameter
    Error,
    /// Single-use resume token bound to a handler's second parameter
    ResumeTok,
}

/// Declared width of an integer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }

    /// Smallest signed value representable at this width
    pub fn signed_min(self) -> i64 {
        match self {
            IntWidth::W8 => i8::MIN as i64,
            IntWidth::W16 => i16::MIN as i64,
            IntWidth::W32 => i32::MIN as i64,
            IntWidth::W64 => i64::MIN,
        }
    }

    /// Largest signed value representable at this width
    pub fn signed_max(self) -> i64 {
        match self {
            IntWidth::W8 => i8::MAX as i64,
            IntWidth::W16 => i16::MAX as i64,
            IntWidth::W32 => i32::MAX as i64,
            IntWidth::W64 => i64::MAX,
        }
    }

    /// Largest unsigned value representable at this width
    pub fn unsigned_max(self) -> u64 {
        match self {
            IntWidth::W8 => u8::MAX as u64,
            IntWidth::W16 => u16::MAX as u64,
            IntWidth::W32 => u32::MAX as u64,
            IntWidth::W64 => u64::MAX,
        }
    }
}

impl Type {
    /// Integer width for integer types; `None` for everything else.
    ///
    /// `i1` has no arithmetic width and is excluded.
    pub fn int_width(&self) -> Option<IntWidth> {
        match self {
            Type::I8 => Some(IntWidth::W8),
            Type::I16 => Some(IntWidth::W16),
            Type::I32 => Some(IntWidth::W32),
            Type::I64 => Some(IntWidth::W64),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F64)
    }

    /// Size in bytes when stored to memory
    pub fn size(&self) -> usize {
        match self {
            Type::Void => 0,
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 => 4,
            Type::I64 | Type::F64 | Type::Ptr | Type::Str => 8,
            Type::Error | Type::ResumeTok => 8,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Void => "void",
            Type::I1 => "i1",
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F64 => "f64",
            Type::Ptr => "ptr",
            Type::Str => "str",
            Type::Error => "error",
            Type::ResumeTok => "resume_tok",
        };
        f.write_str(name)
    }
}
