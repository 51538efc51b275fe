//! IL Basic Blocks
//!
//! A basic block is a labelled straight-line instruction sequence ending in a
//! terminator. Blocks take parameters instead of phi nodes: every branch
//! passes one argument per parameter.

use super::{Instr, Type, ValueId};
use serde::{Deserialize, Serialize};

/// Block (or function) parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    /// Register the incoming argument is bound to
    pub id: ValueId,
}

/// A basic block in the IL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Label, unique within the owning function
    pub label: String,

    /// Parameters bound by incoming branches
    pub params: Vec<Param>,

    /// Instructions executed sequentially; the last one is the terminator
    pub instructions: Vec<Instr>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            params: Vec::new(),
            instructions: Vec::new(),
        }
    }

    /// Add an instruction to this block
    pub fn push(&mut self, instr: Instr) {
        self.instructions.push(instr);
    }

    /// Check if this block ends in a terminator
    pub fn is_terminated(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|instr| instr.op.is_terminator())
    }

    /// Labels of successor blocks named by the terminator
    pub fn successors(&self) -> &[String] {
        match self.instructions.last() {
            Some(term) if term.op.is_terminator() => &term.labels,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    #[test]
    fn test_block_termination() {
        let mut block = BasicBlock::new("entry");
        assert!(!block.is_terminated());
        block.push(Instr::new(Opcode::EhPush, Type::Void));
        assert!(!block.is_terminated());

        let mut br = Instr::new(Opcode::Br, Type::Void);
        br.labels.push("body".into());
        block.push(br);
        assert!(block.is_terminated());
        assert_eq!(block.successors(), ["body".to_string()]);
    }
}
