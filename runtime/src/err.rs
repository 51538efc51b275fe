//! Runtime error codes
//!
//! Codes are part of the ABI: compiled code and the interpreter both pass
//! them as plain `i32`s, so discriminants must never be renumbered.

use std::fmt;

/// Closed runtime error enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Err {
    None = 0,
    FileNotFound = 1,
    EOF = 2,
    IOError = 3,
    Overflow = 4,
    InvalidCast = 5,
    DomainError = 6,
    Bounds = 7,
    InvalidOperation = 8,
    RuntimeError = 9,
    DivideByZero = 10,

    // Network errors
    HostNotFound = 20,
    ConnectionRefused = 21,
    ConnectionReset = 22,
    Timeout = 23,
    NetworkError = 24,
    ConnectionClosed = 25,
}

impl Err {
    pub const ALL: [Err; 17] = [
        Err::None,
        Err::FileNotFound,
        Err::EOF,
        Err::IOError,
        Err::Overflow,
        Err::InvalidCast,
        Err::DomainError,
        Err::Bounds,
        Err::InvalidOperation,
        Err::RuntimeError,
        Err::DivideByZero,
        Err::HostNotFound,
        Err::ConnectionRefused,
        Err::ConnectionReset,
        Err::Timeout,
        Err::NetworkError,
        Err::ConnectionClosed,
    ];

    /// Decode an integer error code
    pub fn from_code(code: i32) -> Option<Err> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a host I/O error onto the runtime vocabulary
    pub fn from_io(error: &std::io::Error) -> Err {
        match error.kind() {
            std::io::ErrorKind::NotFound => Err::FileNotFound,
            std::io::ErrorKind::UnexpectedEof => Err::EOF,
            std::io::ErrorKind::TimedOut => Err::Timeout,
            std::io::ErrorKind::ConnectionRefused => Err::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset => Err::ConnectionReset,
            _ => Err::IOError,
        }
    }
}

impl fmt::Display for Err {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
