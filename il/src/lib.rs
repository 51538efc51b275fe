//! Intermediate Language (IL) for the Viper toolchain
//!
//! This crate defines the in-memory form of IL programs handed to the
//! execution core. Frontends lower to it, optimizers rewrite it and the
//! interpreter executes it. The representation is:
//! - Block structured: functions own labelled basic blocks with parameters
//! - SSA-style: every result is a fresh [`ValueId`] temp
//! - Typed: checked operations carry their declared width in [`Instr::ty`]
//! - Serializable: modules round-trip through serde so tools can exchange them

pub mod blocks;
pub mod builder;
pub mod functions;
pub mod instructions;
pub mod modules;
pub mod types;

pub use blocks::*;
pub use builder::*;
pub use functions::*;
pub use instructions::*;
pub use modules::*;
pub use types::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// SSA temp identifier. Also the register index inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Source location information for diagnostics
///
/// A `line` of 0 means the location is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceLoc {
    pub file_id: u32,
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn at_line(line: u32) -> Self {
        Self {
            file_id: 0,
            line,
            column: 0,
        }
    }

    pub fn is_known(&self) -> bool {
        self.line != 0
    }

    /// Line number when known
    pub fn line(&self) -> Option<u32> {
        self.is_known().then_some(self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_id() {
        let id = ValueId::new(42);
        assert_eq!(format!("{}", id), "%42");
        assert_eq!(id.index(), 42);
    }

    #[test]
    fn test_source_loc() {
        assert_eq!(SourceLoc::unknown().line(), None);
        assert_eq!(SourceLoc::at_line(12).line(), Some(12));
    }
}
