//! Frames and per-function metadata

use crate::slot::{ErrorHandle, Slot, StrHandle, TokenHandle};
use crate::switch::SwitchCache;
use fxhash::FxHashMap;
use il::{Function, ValueId};

/// Largest register file a function may declare
pub const MAX_REGISTERS: usize = 1 << 20;

/// Owned strings a frame accumulates before the first sweep
const STRING_SWEEP_MIN: usize = 32;

/// Metadata computed once per function when the engine is created
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub blocks: FxHashMap<String, usize>,
    pub register_count: usize,
}

impl FunctionInfo {
    pub fn new(func: &Function) -> Self {
        let blocks = func
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.label.clone(), i))
            .collect();
        Self {
            name: func.name.clone(),
            blocks,
            register_count: func.register_count(),
        }
    }

    pub fn block(&self, label: &str) -> Option<usize> {
        self.blocks.get(label).copied()
    }
}

/// Trap currently being handled by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handling {
    pub error: ErrorHandle,
    pub token: TokenHandle,
}

/// One function activation
#[derive(Debug)]
pub struct Frame {
    pub func: usize,
    pub block: usize,
    pub ip: usize,
    pub regs: Vec<Slot>,
    /// This frame's segment of the handler stack (handler block indices)
    pub handlers: Vec<usize>,
    pub handling: Option<Handling>,
    pub switch_cache: SwitchCache,
    /// Arena mark to release to when the frame goes away
    pub stack_mark: usize,
    pub activation: u64,
    /// Transient strings this frame received from externs or callees
    pub owned_strings: Vec<StrHandle>,
    sweep_at: usize,
}

impl Frame {
    pub fn new(func: usize, register_count: usize, stack_mark: usize, activation: u64) -> Self {
        Self {
            func,
            block: 0,
            ip: 0,
            regs: vec![Slot::Void; register_count],
            handlers: Vec::new(),
            handling: None,
            switch_cache: SwitchCache::new(),
            stack_mark,
            activation,
            owned_strings: Vec::new(),
            sweep_at: STRING_SWEEP_MIN,
        }
    }

    #[inline(always)]
    pub fn get(&self, reg: ValueId) -> Slot {
        self.regs.get(reg.index()).copied().unwrap_or(Slot::Void)
    }

    /// Every id a function defines is below its register count, which the
    /// engine checks before running it.
    #[inline(always)]
    pub fn set(&mut self, reg: ValueId, value: Slot) {
        if let Some(slot) = self.regs.get_mut(reg.index()) {
            *slot = value;
        }
    }

    /// Take ownership of a transient string. Returns true when enough have
    /// piled up that the caller should run [`Frame::sweep_strings`].
    pub fn adopt_string(&mut self, handle: StrHandle) -> bool {
        self.owned_strings.push(handle);
        self.owned_strings.len() >= self.sweep_at
    }

    /// Give up ownership of `handle` if this frame holds it
    pub fn disown_string(&mut self, handle: StrHandle) -> bool {
        match self.owned_strings.iter().position(|&h| h == handle) {
            Some(pos) => {
                self.owned_strings.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Drop owned strings no register refers to, passing each to `release`
    pub fn sweep_strings(&mut self, mut release: impl FnMut(StrHandle)) {
        let regs = &self.regs;
        self.owned_strings.retain(|&h| {
            let live = regs.iter().any(|r| matches!(r, Slot::Str(s) if *s == h));
            if !live {
                release(h);
            }
            live
        });
        self.sweep_at = (self.owned_strings.len() * 2).max(STRING_SWEEP_MIN);
    }

    /// Jump to the start of `block`
    pub fn goto(&mut self, block: usize) {
        self.block = block;
        self.ip = 0;
    }
}
