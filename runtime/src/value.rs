//! Values exchanged across the extern ABI

use crate::Err;
use std::fmt;
use std::sync::Arc;

/// Reference-counted runtime string
///
/// Cloning retains, dropping releases. Both are atomic, so handles may be
/// shared between engines running on different threads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RtString(Arc<str>);

impl RtString {
    pub fn new(text: &str) -> Self {
        Self(Arc::from(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Current number of live handles
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl From<&str> for RtString {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for RtString {
    fn from(text: String) -> Self {
        Self(Arc::from(text))
    }
}

impl fmt::Display for RtString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameter/return kinds of extern signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtType {
    Void,
    I1,
    I64,
    F64,
    Ptr,
    Str,
}

/// Native representation of a value passed to or returned from an extern
#[derive(Debug, Clone, PartialEq)]
pub enum RtValue {
    Void,
    Bool(bool),
    I64(i64),
    F64(f64),
    Ptr(u64),
    Str(RtString),
}

impl RtValue {
    pub fn rt_type(&self) -> RtType {
        match self {
            RtValue::Void => RtType::Void,
            RtValue::Bool(_) => RtType::I1,
            RtValue::I64(_) => RtType::I64,
            RtValue::F64(_) => RtType::F64,
            RtValue::Ptr(_) => RtType::Ptr,
            RtValue::Str(_) => RtType::Str,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RtValue::I64(v) => Some(*v),
            RtValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RtValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RtValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Failure reported by an extern function
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{err}: {message}")]
pub struct RtError {
    pub err: Err,
    pub message: String,
}

impl RtError {
    pub fn new(err: Err, message: impl Into<String>) -> Self {
        Self {
            err,
            message: message.into(),
        }
    }

    pub fn invalid_argument(func: &str, index: usize) -> Self {
        Self::new(
            Err::InvalidOperation,
            format!("{}: bad argument #{}", func, index),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_retain_release() {
        let s = RtString::new("hello");
        assert_eq!(s.ref_count(), 1);
        let t = s.clone();
        assert_eq!(s.ref_count(), 2);
        drop(t);
        assert_eq!(s.ref_count(), 1);
    }

    #[test]
    fn test_string_shared_across_threads() {
        let s = RtString::new("shared");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let local = s.clone();
                std::thread::spawn(move || local.as_str().len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 6);
        }
        assert_eq!(s.ref_count(), 1);
    }

    #[test]
    fn test_error_display() {
        let e = RtError::new(Err::FileNotFound, "missing.txt");
        assert_eq!(e.to_string(), "FileNotFound: missing.txt");
    }
}
