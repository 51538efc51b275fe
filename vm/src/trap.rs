//! Trap taxonomy and engine errors
//!
//! [`TrapKind`] is the closed set of trap categories shared with native
//! backends and the runtime. [`VmError`] is the structured payload a handler
//! receives; [`ExecError`] is what the engine reports to its embedder when
//! execution cannot continue.

use serde::{Deserialize, Serialize};
use std::fmt;
use viper_runtime::Err;

/// Trap categories with stable discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TrapKind {
    DivideByZero = 0,
    Overflow = 1,
    InvalidCast = 2,
    DomainError = 3,
    Bounds = 4,
    FileNotFound = 5,
    EOF = 6,
    IOError = 7,
    InvalidOperation = 8,
    RuntimeError = 9,
}

impl TrapKind {
    pub const ALL: [TrapKind; 10] = [
        TrapKind::DivideByZero,
        TrapKind::Overflow,
        TrapKind::InvalidCast,
        TrapKind::DomainError,
        TrapKind::Bounds,
        TrapKind::FileNotFound,
        TrapKind::EOF,
        TrapKind::IOError,
        TrapKind::InvalidOperation,
        TrapKind::RuntimeError,
    ];

    pub fn from_i32(value: i32) -> Option<TrapKind> {
        Self::ALL.get(usize::try_from(value).ok()?).copied()
    }

    /// Map a raw runtime error code; unknown codes become `RuntimeError`
    pub fn from_err_code(code: i32) -> TrapKind {
        Err::from_code(code).map(TrapKind::from).unwrap_or(TrapKind::RuntimeError)
    }

    pub fn name(self) -> &'static str {
        match self {
            TrapKind::DivideByZero => "DivideByZero",
            TrapKind::Overflow => "Overflow",
            TrapKind::InvalidCast => "InvalidCast",
            TrapKind::DomainError => "DomainError",
            TrapKind::Bounds => "Bounds",
            TrapKind::FileNotFound => "FileNotFound",
            TrapKind::EOF => "EOF",
            TrapKind::IOError => "IOError",
            TrapKind::InvalidOperation => "InvalidOperation",
            TrapKind::RuntimeError => "RuntimeError",
        }
    }
}

impl From<Err> for TrapKind {
    fn from(err: Err) -> Self {
        match err {
            Err::DivideByZero => TrapKind::DivideByZero,
            Err::Overflow => TrapKind::Overflow,
            Err::InvalidCast => TrapKind::InvalidCast,
            Err::DomainError => TrapKind::DomainError,
            Err::Bounds => TrapKind::Bounds,
            Err::FileNotFound => TrapKind::FileNotFound,
            Err::EOF => TrapKind::EOF,
            Err::IOError => TrapKind::IOError,
            Err::InvalidOperation => TrapKind::InvalidOperation,
            Err::RuntimeError => TrapKind::RuntimeError,
            Err::None
            | Err::HostNotFound
            | Err::ConnectionRefused
            | Err::ConnectionReset
            | Err::Timeout
            | Err::NetworkError
            | Err::ConnectionClosed => TrapKind::RuntimeError,
        }
    }
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured error value bound to a handler's first parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmError {
    pub kind: TrapKind,
    /// Runtime error code, 0 when the trap carried none
    pub code: i32,
    /// Instruction offset of the fault within its block
    pub ip: u64,
    pub line: Option<u32>,
}

impl VmError {
    /// Source line as seen by `err.get_line`: -1 when unknown
    pub fn line_or_unknown(&self) -> i64 {
        self.line.map(i64::from).unwrap_or(-1)
    }
}

/// Diagnostic for a trap no handler caught
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledTrap {
    pub kind: TrapKind,
    pub code: i32,
    pub function: String,
    pub block: String,
    pub ip: usize,
    pub line: Option<u32>,
}

impl fmt::Display for UnhandledTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Trap: {}", self.kind)?;
        writeln!(f, "Function: {}", self.function)?;
        writeln!(f, "IL Location: {}#{}", self.block, self.ip)?;
        match self.line {
            Some(line) => write!(f, "Source Line: {}", line),
            None => write!(f, "Source Line: unknown"),
        }
    }
}

/// Reasons execution stops without producing a value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    #[error("{0}")]
    Trap(Box<UnhandledTrap>),
    #[error("step limit of {limit} instructions exceeded")]
    StepLimitExceeded { limit: u64 },
    #[error("call depth limit of {depth} frames exceeded")]
    StackOverflow { depth: usize },
    #[error("function not found: {0}")]
    FunctionNotFound(String),
    #[error("extern not registered: {0}")]
    UnknownExtern(String),
    #[error("extern {name} does not match its registration: {message}")]
    ExternSignature { name: String, message: String },
    #[error("malformed IL in {function}: {message}")]
    Malformed { function: String, message: String },
    #[error("no frame to execute")]
    Halted,
}

impl ExecError {
    /// The unhandled trap, if that is why execution stopped
    pub fn as_trap(&self) -> Option<&UnhandledTrap> {
        match self {
            ExecError::Trap(trap) => Some(trap),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_are_stable() {
        for (i, kind) in TrapKind::ALL.iter().enumerate() {
            assert_eq!(*kind as i32, i as i32);
            assert_eq!(TrapKind::from_i32(i as i32), Some(*kind));
        }
        assert_eq!(TrapKind::from_i32(10), None);
        assert_eq!(TrapKind::from_i32(-1), None);
    }

    #[test]
    fn test_err_mapping_is_total() {
        for err in Err::ALL {
            let kind = TrapKind::from(err);
            assert_eq!(TrapKind::from_err_code(err.code()), kind);
        }
        assert_eq!(TrapKind::from(Err::Bounds), TrapKind::Bounds);
        assert_eq!(TrapKind::from(Err::Timeout), TrapKind::RuntimeError);
        assert_eq!(TrapKind::from_err_code(12345), TrapKind::RuntimeError);
        assert_eq!(TrapKind::from_err_code(-7), TrapKind::RuntimeError);
    }

    #[test]
    fn test_unhandled_diagnostic_format() {
        let trap = UnhandledTrap {
            kind: TrapKind::DivideByZero,
            code: 0,
            function: "main".to_string(),
            block: "entry".to_string(),
            ip: 3,
            line: None,
        };
        assert_eq!(
            trap.to_string(),
            "Trap: DivideByZero\nFunction: main\nIL Location: entry#3\nSource Line: unknown"
        );
    }

    #[test]
    fn test_line_or_unknown() {
        let err = VmError {
            kind: TrapKind::Bounds,
            code: 0,
            ip: 1,
            line: None,
        };
        assert_eq!(err.line_or_unknown(), -1);
        let err = VmError { line: Some(9), ..err };
        assert_eq!(err.line_or_unknown(), 9);
    }
}
