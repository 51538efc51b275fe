//! Stepping, breakpoints and execution statistics

use crate::slot::Slot;
use serde::Serialize;
use std::fmt;

/// Where `run_until_pause` should stop
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Breakpoint {
    /// Entry of a block, on every arrival
    Block { function: String, label: String },
    /// First instruction of a source line
    Line(u32),
}

impl Breakpoint {
    pub fn block(function: impl Into<String>, label: impl Into<String>) -> Self {
        Breakpoint::Block {
            function: function.into(),
            label: label.into(),
        }
    }
}

/// Location execution stopped at; the instruction there has not run yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PausePoint {
    pub function: String,
    pub block: String,
    pub ip: usize,
    pub line: Option<u32>,
}

impl fmt::Display for PausePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.function, self.block, self.ip)?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

/// Result of executing exactly one instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// More instructions remain
    Running,
    /// The outermost frame returned this value
    Returned(Slot),
}

/// Result of `run_until_pause`
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished(Slot),
    Paused(PausePoint),
}

/// Counters collected while executing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VmStats {
    pub instructions: u64,
    pub calls: u64,
    pub extern_calls: u64,
    pub traps_raised: u64,
    pub traps_handled: u64,
    pub switch_builds: u64,
    pub switch_hits: u64,
    pub max_frames: usize,
}
