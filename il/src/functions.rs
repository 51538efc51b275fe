//! IL Functions
//!
//! A function is a signature plus an ordered list of blocks. The first block
//! is the entry block; parameters are bound to registers by position when
//! the function is called.

use super::{BasicBlock, Param, Type};
use serde::{Deserialize, Serialize};

/// IL function representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub ret_type: Type,
    pub params: Vec<Param>,
    /// Body; `blocks[0]` is the entry block
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_type: Type) -> Self {
        Self {
            name: name.into(),
            ret_type,
            params: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Number of registers a frame for this function needs
    ///
    /// One past the highest temp id defined by a parameter, a block
    /// parameter or an instruction result.
    pub fn register_count(&self) -> usize {
        let params = self.params.iter().map(|p| p.id.index() + 1);
        let block_params = self
            .blocks
            .iter()
            .flat_map(|b| b.params.iter().map(|p| p.id.index() + 1));
        let results = self
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .filter_map(|i| i.result.map(|r| r.index() + 1));
        params.chain(block_params).chain(results).max().unwrap_or(0)
    }

    /// Total instruction count across all blocks
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }
}
