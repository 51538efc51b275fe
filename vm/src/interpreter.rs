//! IL Interpreter
//!
//! Register-based interpreter over [`il::Module`]. Each call pushes a
//! [`Frame`] whose register file is indexed directly by `ValueId`; the loop
//! fetches one instruction from the top frame, executes it and applies the
//! resulting control-flow decision.
//!
//! ## Design
//! - **One instruction per [`Vm::step`]**: `run`, `call` and
//!   `run_until_pause` are thin loops over it, so tooling sees the same
//!   execution the batch path does.
//! - **Traps are values**: checked operations produce [`Flow::Trap`] and the
//!   trap engine (see `eh`) rewrites the frame stack. Host panics are never
//!   used for control flow.
//! - **Caller ip stays on the call** until the callee returns, which makes the
//!   call instruction the resume point for faults that escape a callee.
//! - The module is borrowed immutably, so any number of engines may run the
//!   same module on different threads.

use crate::abi;
use crate::arith::{self, FloatPredicate};
use crate::config::VmConfig;
use crate::debug::{Breakpoint, PausePoint, RunOutcome, StepOutcome, VmStats};
use crate::eh::{RaisedError, ResumeAction, ResumeToken};
use crate::frame::{Frame, FunctionInfo, MAX_REGISTERS};
use crate::memory::Arena;
use crate::slot::{Slot, StrHandle};
use crate::strings::StringTable;
use crate::switch::{self, Backend, CaseSet, SwitchCacheEntry, SwitchMode};
use crate::trap::{ExecError, TrapKind};
use fxhash::{FxHashMap, FxHashSet};
use il::{Function, Instr, IntWidth, Module, Opcode, Type, Value};
use smallvec::SmallVec;
use viper_runtime::{Console, ExternRegistry, RtContext, RtString, RtType};

/// Control-flow decision produced by one instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Flow {
    /// Fall through to the next instruction
    Next,
    /// The frame stack or location was already updated
    Jump,
    Return(Slot),
    Trap { kind: TrapKind, code: i32 },
}

/// Unwrap an arithmetic result or leave `execute` with a trap
macro_rules! checked {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(kind) => return Ok(Flow::Trap { kind, code: 0 }),
        }
    };
}

fn trap(kind: TrapKind) -> Result<Flow, ExecError> {
    Ok(Flow::Trap { kind, code: 0 })
}

fn width_of(instr: &Instr) -> IntWidth {
    instr.ty.int_width().unwrap_or(IntWidth::W64)
}

fn slot_from_bits(ty: Type, bits: i64) -> Slot {
    match ty {
        Type::Void => Slot::Void,
        Type::I1 => Slot::Bool(bits & 1 != 0),
        Type::I8 | Type::I16 | Type::I32 | Type::I64 => Slot::I64(bits),
        Type::F64 => Slot::F64(f64::from_bits(bits as u64)),
        Type::Ptr => Slot::Ptr(bits as u64),
        Type::Str => Slot::Str(bits as u32),
        Type::Error => Slot::Error(bits as u32),
        Type::ResumeTok => Slot::ResumeTok(bits as u32),
    }
}

/// Execution engine for one call stack
pub struct Vm<'m> {
    pub(crate) module: &'m Module,
    pub(crate) config: VmConfig,
    pub(crate) functions: Vec<FunctionInfo>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) strings: StringTable,
    globals: FxHashMap<String, StrHandle>,
    pub(crate) errors: Vec<RaisedError>,
    pub(crate) tokens: Vec<ResumeToken>,
    pub(crate) memory: Arena,
    externs: ExternRegistry,
    rt: RtContext,
    block_breaks: FxHashSet<(usize, usize)>,
    line_breaks: FxHashSet<u32>,
    skip_break: bool,
    last_line: Option<u32>,
    next_activation: u64,
    steps: u64,
    pub(crate) stats: VmStats,
    pub(crate) last_trap: Option<String>,
}

impl<'m> Vm<'m> {
    pub fn new(module: &'m Module, config: VmConfig) -> Self {
        let functions = module.functions.values().map(FunctionInfo::new).collect();
        let mut strings = StringTable::new();
        let globals = module
            .globals
            .iter()
            .map(|g| (g.name.clone(), strings.intern(&g.init)))
            .collect();
        log::debug!(
            "vm for module '{}': {} functions, {} instructions, switch mode {}",
            module.name,
            module.functions.len(),
            module.functions.values().map(Function::instruction_count).sum::<usize>(),
            config.switch_mode
        );
        Self {
            module,
            config,
            functions,
            frames: Vec::new(),
            strings,
            globals,
            errors: Vec::new(),
            tokens: Vec::new(),
            memory: Arena::new(),
            externs: ExternRegistry::new(),
            rt: RtContext::new(Console::stdout()),
            block_breaks: FxHashSet::default(),
            line_breaks: FxHashSet::default(),
            skip_break: false,
            last_line: None,
            next_activation: 1,
            steps: 0,
            stats: VmStats::default(),
            last_trap: None,
        }
    }

    /// Use `registry` for extern resolution (it falls back to the builtins)
    pub fn with_externs(mut self, registry: ExternRegistry) -> Self {
        self.externs = registry;
        self
    }

    /// Send runtime output to `console`
    pub fn with_console(mut self, console: Console) -> Self {
        self.rt.console = console;
        self
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn stats(&self) -> &VmStats {
        &self.stats
    }

    /// Four-line diagnostic of the most recent unhandled trap
    pub fn last_trap_message(&self) -> Option<&str> {
        self.last_trap.as_deref()
    }

    pub fn runtime(&mut self) -> &mut RtContext {
        &mut self.rt
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Text of a string slot. Strings returned by externs stay readable
    /// until the next run starts.
    pub fn string(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::Str(handle) => self.strings.get(handle).map(RtString::as_str),
            _ => None,
        }
    }

    /// Intern `text` so it can be passed as an argument
    pub fn make_string(&mut self, text: &str) -> Slot {
        Slot::Str(self.strings.intern(text))
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Run `main` to completion and return its integer result
    pub fn run(&mut self) -> Result<i64, ExecError> {
        Ok(self.call("main", &[])?.as_i64())
    }

    /// Run `name` with `args` to completion, ignoring breakpoints
    pub fn call(&mut self, name: &str, args: &[Slot]) -> Result<Slot, ExecError> {
        self.prepare(name, args)?;
        loop {
            if let StepOutcome::Returned(value) = self.step()? {
                return Ok(value);
            }
        }
    }

    /// Reset the engine and push the entry frame for `name`
    pub fn prepare(&mut self, name: &str, args: &[Slot]) -> Result<(), ExecError> {
        let index = self
            .module
            .function_index(name)
            .ok_or_else(|| ExecError::FunctionNotFound(name.to_string()))?;
        self.check_module()?;
        self.abort();
        self.strings.clear_transient();
        self.errors.clear();
        self.tokens.clear();
        self.steps = 0;
        self.skip_break = false;
        self.last_line = None;
        self.push_frame(index, args)
    }

    /// Reject register files too large to allocate and extern declarations
    /// that disagree with the registry.
    fn check_module(&self) -> Result<(), ExecError> {
        if let Some(info) = self.functions.iter().find(|f| f.register_count > MAX_REGISTERS) {
            return Err(ExecError::Malformed {
                function: info.name.clone(),
                message: format!(
                    "{} registers exceeds the limit of {}",
                    info.register_count, MAX_REGISTERS
                ),
            });
        }
        for decl in &self.module.externs {
            let desc = self
                .externs
                .lookup(&decl.name)
                .ok_or_else(|| ExecError::UnknownExtern(decl.name.clone()))?;
            abi::check_signature(decl, desc).map_err(|message| ExecError::ExternSignature {
                name: decl.name.clone(),
                message,
            })?;
        }
        Ok(())
    }

    /// Execute exactly one instruction
    pub fn step(&mut self) -> Result<StepOutcome, ExecError> {
        let outcome = self.step_inner();
        if let Err(err) = &outcome {
            if !matches!(err, ExecError::Halted) {
                self.abort();
            }
        }
        outcome
    }

    /// Run until the entry function returns or a breakpoint is reached.
    /// Calling again after a pause continues past the breakpoint.
    pub fn run_until_pause(&mut self) -> Result<RunOutcome, ExecError> {
        loop {
            if !self.skip_break {
                if let Some(point) = self.breakpoint_hit() {
                    self.skip_break = true;
                    log::debug!("paused at {}", point);
                    return Ok(RunOutcome::Paused(point));
                }
            }
            self.skip_break = false;
            if let StepOutcome::Returned(value) = self.step()? {
                return Ok(RunOutcome::Finished(value));
            }
        }
    }

    // ========================================================================
    // Breakpoints
    // ========================================================================

    pub fn add_breakpoint(&mut self, breakpoint: Breakpoint) -> Result<(), ExecError> {
        match breakpoint {
            Breakpoint::Block { function, label } => {
                let func = self
                    .module
                    .function_index(&function)
                    .ok_or_else(|| ExecError::FunctionNotFound(function.clone()))?;
                let block = self.functions[func].block(&label).ok_or_else(|| ExecError::Malformed {
                    function: function.clone(),
                    message: format!("no block '{}' for breakpoint", label),
                })?;
                self.block_breaks.insert((func, block));
            }
            Breakpoint::Line(line) => {
                self.line_breaks.insert(line);
            }
        }
        Ok(())
    }

    pub fn clear_breakpoints(&mut self) {
        self.block_breaks.clear();
        self.line_breaks.clear();
    }

    /// Location of the next instruction to execute
    pub fn location(&self) -> Option<PausePoint> {
        let frame = self.frames.last()?;
        let func = self.module.function_at(frame.func)?;
        let block = func.blocks.get(frame.block)?;
        Some(PausePoint {
            function: func.name.clone(),
            block: block.label.clone(),
            ip: frame.ip,
            line: block.instructions.get(frame.ip).and_then(|i| i.loc.line()),
        })
    }

    fn breakpoint_hit(&self) -> Option<PausePoint> {
        let frame = self.frames.last()?;
        if frame.ip == 0 && self.block_breaks.contains(&(frame.func, frame.block)) {
            return self.location();
        }
        if self.line_breaks.is_empty() {
            return None;
        }
        let point = self.location()?;
        match point.line {
            Some(line) if self.line_breaks.contains(&line) && self.last_line != Some(line) => Some(point),
            _ => None,
        }
    }

    // ========================================================================
    // Frames
    // ========================================================================

    pub(crate) fn function(&self, index: usize) -> Result<&'m Function, ExecError> {
        let module = self.module;
        module.function_at(index).ok_or_else(|| ExecError::Malformed {
            function: module.name.clone(),
            message: format!("function index {} out of range", index),
        })
    }

    pub(crate) fn malformed(&self, message: impl Into<String>) -> ExecError {
        let function = self
            .frames
            .last()
            .and_then(|f| self.functions.get(f.func))
            .map(|info| info.name.clone())
            .unwrap_or_default();
        ExecError::Malformed {
            function,
            message: message.into(),
        }
    }

    fn push_frame(&mut self, index: usize, args: &[Slot]) -> Result<(), ExecError> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(ExecError::StackOverflow {
                depth: self.config.max_call_depth,
            });
        }
        let func = self.function(index)?;
        if func.blocks.is_empty() {
            return Err(ExecError::Malformed {
                function: func.name.clone(),
                message: "function has no blocks".to_string(),
            });
        }
        if func.params.len() != args.len() {
            return Err(ExecError::Malformed {
                function: func.name.clone(),
                message: format!("expected {} arguments, got {}", func.params.len(), args.len()),
            });
        }
        let activation = self.next_activation;
        self.next_activation += 1;
        let mut frame = Frame::new(
            index,
            self.functions[index].register_count,
            self.memory.mark(),
            activation,
        );
        for (param, arg) in func.params.iter().zip(args) {
            frame.set(param.id, *arg);
        }
        self.frames.push(frame);
        self.stats.calls += 1;
        self.stats.max_frames = self.stats.max_frames.max(self.frames.len());
        log::debug!("enter {} (depth {})", func.name, self.frames.len());
        Ok(())
    }

    /// Pop the top frame and release its arena memory and strings
    pub(crate) fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        self.memory.release(frame.stack_mark);
        for &handle in &frame.owned_strings {
            self.strings.release(handle);
        }
        if !frame.handlers.is_empty() {
            log::debug!(
                "{} left with {} handler(s) still pushed",
                self.functions[frame.func].name,
                frame.handlers.len()
            );
        }
        log::debug!("leave {} (depth {})", self.functions[frame.func].name, self.frames.len());
        Some(frame)
    }

    /// Drop every frame
    pub(crate) fn abort(&mut self) {
        self.frames.clear();
        self.memory.release(0);
    }

    fn top(&self) -> Result<&Frame, ExecError> {
        self.frames.last().ok_or(ExecError::Halted)
    }

    fn top_mut(&mut self) -> Result<&mut Frame, ExecError> {
        self.frames.last_mut().ok_or(ExecError::Halted)
    }

    // ========================================================================
    // Stepping
    // ========================================================================

    fn step_inner(&mut self) -> Result<StepOutcome, ExecError> {
        let (func_index, block_index, ip) = {
            let frame = self.top()?;
            (frame.func, frame.block, frame.ip)
        };
        if let Some(limit) = self.config.max_steps {
            if self.steps >= limit {
                log::warn!("step limit {} reached", limit);
                return Err(ExecError::StepLimitExceeded { limit });
            }
        }
        self.steps += 1;
        self.stats.instructions += 1;

        let func = self.function(func_index)?;
        let block = func
            .blocks
            .get(block_index)
            .ok_or_else(|| self.malformed(format!("block index {} out of range", block_index)))?;
        let instr = block
            .instructions
            .get(ip)
            .ok_or_else(|| self.malformed(format!("execution ran off the end of block '{}'", block.label)))?;
        self.last_line = instr.loc.line();

        if self.config.trace {
            log::info!("{}:{}#{}  {}", func.name, block.label, ip, instr);
        } else {
            log::trace!("{}:{}#{}  {}", func.name, block.label, ip, instr);
        }

        match self.execute(instr)? {
            Flow::Next => {
                self.top_mut()?.ip += 1;
                Ok(StepOutcome::Running)
            }
            Flow::Jump => Ok(StepOutcome::Running),
            Flow::Trap { kind, code } => {
                self.raise(kind, code)?;
                Ok(StepOutcome::Running)
            }
            Flow::Return(value) => self.return_from_frame(value),
        }
    }

    fn return_from_frame(&mut self, value: Slot) -> Result<StepOutcome, ExecError> {
        if self.reraise_if_unresumed()? {
            return Ok(StepOutcome::Running);
        }
        // A string the callee owns moves to the caller with the value
        let moved = match value {
            Slot::Str(handle) => self.top_mut()?.disown_string(handle).then_some(handle),
            _ => None,
        };
        self.pop_frame();
        let Some(caller) = self.frames.last() else {
            log::debug!("entry function returned {}", value);
            return Ok(StepOutcome::Returned(value));
        };
        let func = self.function(caller.func)?;
        let result = func
            .blocks
            .get(caller.block)
            .and_then(|b| b.instructions.get(caller.ip))
            .and_then(|call| call.result);
        let caller = self.top_mut()?;
        if let Some(result) = result {
            caller.set(result, value);
        }
        caller.ip += 1;
        if let Some(handle) = moved {
            self.adopt_string(handle);
        }
        Ok(StepOutcome::Running)
    }

    /// Hand a transient string to the top frame, sweeping when due
    fn adopt_string(&mut self, handle: StrHandle) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        if frame.adopt_string(handle) {
            let strings = &mut self.strings;
            frame.sweep_strings(|h| strings.release(h));
            log::trace!(
                "string sweep: {} owned by frame, {} transient",
                frame.owned_strings.len(),
                strings.transient_len()
            );
        }
    }

    // ========================================================================
    // Operands
    // ========================================================================

    pub(crate) fn eval(&mut self, value: &Value) -> Result<Slot, ExecError> {
        Ok(match value {
            Value::Temp(id) => self.top()?.get(*id),
            Value::ConstInt(v) => Slot::I64(*v),
            Value::ConstFloat(v) => Slot::F64(*v),
            Value::ConstStr(text) => Slot::Str(self.strings.intern(text)),
            Value::GlobalAddr(name) => match self.globals.get(name) {
                Some(handle) => Slot::Str(*handle),
                None => return Err(self.malformed(format!("unknown global @{}", name))),
            },
            Value::Null => Slot::Ptr(0),
        })
    }

    fn operand(&mut self, instr: &Instr, index: usize) -> Result<Slot, ExecError> {
        match instr.operands.get(index) {
            Some(value) => self.eval(value),
            None => Err(self.malformed(format!("{} is missing operand {}", instr.op, index))),
        }
    }

    fn int_operands(&mut self, instr: &Instr) -> Result<(i64, i64), ExecError> {
        Ok((self.operand(instr, 0)?.as_i64(), self.operand(instr, 1)?.as_i64()))
    }

    fn float_operands(&mut self, instr: &Instr) -> Result<(f64, f64), ExecError> {
        Ok((self.operand(instr, 0)?.as_f64(), self.operand(instr, 1)?.as_f64()))
    }

    fn set_result(&mut self, instr: &Instr, value: Slot) -> Result<Flow, ExecError> {
        if let Some(result) = instr.result {
            self.top_mut()?.set(result, value);
        }
        Ok(Flow::Next)
    }

    // ========================================================================
    // Instruction execution
    // ========================================================================

    fn execute(&mut self, instr: &Instr) -> Result<Flow, ExecError> {
        match instr.op {
            // === Integer arithmetic ===
            Opcode::Add | Opcode::Sub | Opcode::Mul => {
                let (a, b) = self.int_operands(instr)?;
                let v = match instr.op {
                    Opcode::Add => arith::add(a, b),
                    Opcode::Sub => arith::sub(a, b),
                    _ => arith::mul(a, b),
                };
                self.set_result(instr, Slot::I64(v))
            }
            Opcode::IAddOvf | Opcode::ISubOvf | Opcode::IMulOvf => {
                let (a, b) = self.int_operands(instr)?;
                let w = width_of(instr);
                let v = checked!(match instr.op {
                    Opcode::IAddOvf => arith::add_ovf(a, b, w),
                    Opcode::ISubOvf => arith::sub_ovf(a, b, w),
                    _ => arith::mul_ovf(a, b, w),
                });
                self.set_result(instr, Slot::I64(v))
            }
            Opcode::SDiv | Opcode::SDivChk0 => {
                let (a, b) = self.int_operands(instr)?;
                let v = checked!(arith::sdiv(a, b, width_of(instr)));
                self.set_result(instr, Slot::I64(v))
            }
            Opcode::SRem | Opcode::SRemChk0 => {
                let (a, b) = self.int_operands(instr)?;
                let v = checked!(arith::srem(a, b, width_of(instr)));
                self.set_result(instr, Slot::I64(v))
            }
            Opcode::UDiv | Opcode::UDivChk0 => {
                let (a, b) = self.int_operands(instr)?;
                let v = checked!(arith::udiv(a, b));
                self.set_result(instr, Slot::I64(v))
            }
            Opcode::URem | Opcode::URemChk0 => {
                let (a, b) = self.int_operands(instr)?;
                let v = checked!(arith::urem(a, b));
                self.set_result(instr, Slot::I64(v))
            }

            // === Bitwise ===
            Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Shl | Opcode::LShr | Opcode::AShr => {
                let (a, b) = self.int_operands(instr)?;
                let v = match instr.op {
                    Opcode::And => a & b,
                    Opcode::Or => a | b,
                    Opcode::Xor => a ^ b,
                    Opcode::Shl => arith::shl(a, b),
                    Opcode::LShr => arith::lshr(a, b),
                    _ => arith::ashr(a, b),
                };
                self.set_result(instr, Slot::I64(v))
            }

            // === Integer comparisons ===
            Opcode::ICmpEq
            | Opcode::ICmpNe
            | Opcode::SCmpLT
            | Opcode::SCmpLE
            | Opcode::SCmpGT
            | Opcode::SCmpGE
            | Opcode::UCmpLT
            | Opcode::UCmpLE
            | Opcode::UCmpGT
            | Opcode::UCmpGE => {
                let (a, b) = self.int_operands(instr)?;
                let (ua, ub) = (a as u64, b as u64);
                let v = match instr.op {
                    Opcode::ICmpEq => a == b,
                    Opcode::ICmpNe => a != b,
                    Opcode::SCmpLT => a < b,
                    Opcode::SCmpLE => a <= b,
                    Opcode::SCmpGT => a > b,
                    Opcode::SCmpGE => a >= b,
                    Opcode::UCmpLT => ua < ub,
                    Opcode::UCmpLE => ua <= ub,
                    Opcode::UCmpGT => ua > ub,
                    _ => ua >= ub,
                };
                self.set_result(instr, Slot::Bool(v))
            }

            // === Floating point ===
            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv => {
                let (a, b) = self.float_operands(instr)?;
                let v = match instr.op {
                    Opcode::FAdd => a + b,
                    Opcode::FSub => a - b,
                    Opcode::FMul => a * b,
                    _ => a / b,
                };
                self.set_result(instr, Slot::F64(v))
            }
            Opcode::FCmpEQ
            | Opcode::FCmpNE
            | Opcode::FCmpLT
            | Opcode::FCmpLE
            | Opcode::FCmpGT
            | Opcode::FCmpGE
            | Opcode::FCmpOrd
            | Opcode::FCmpUno => {
                let (a, b) = self.float_operands(instr)?;
                let pred = match instr.op {
                    Opcode::FCmpEQ => FloatPredicate::Eq,
                    Opcode::FCmpNE => FloatPredicate::Ne,
                    Opcode::FCmpLT => FloatPredicate::Lt,
                    Opcode::FCmpLE => FloatPredicate::Le,
                    Opcode::FCmpGT => FloatPredicate::Gt,
                    Opcode::FCmpGE => FloatPredicate::Ge,
                    Opcode::FCmpOrd => FloatPredicate::Ord,
                    _ => FloatPredicate::Uno,
                };
                self.set_result(instr, Slot::Bool(arith::fcmp(pred, a, b)))
            }

            // === Conversions ===
            Opcode::Sitofp => {
                let a = self.operand(instr, 0)?.as_i64();
                self.set_result(instr, Slot::F64(arith::sitofp(a)))
            }
            Opcode::CastUiToFp => {
                let a = self.operand(instr, 0)?.as_i64();
                self.set_result(instr, Slot::F64(arith::uitofp(a)))
            }
            Opcode::Fptosi | Opcode::CastFpToSiRteChk | Opcode::CastFpToUiRteChk => {
                let a = self.operand(instr, 0)?.as_f64();
                let w = width_of(instr);
                let v = checked!(match instr.op {
                    Opcode::Fptosi => arith::fptosi(a, w),
                    Opcode::CastFpToSiRteChk => arith::fp_to_si_rte(a, w),
                    _ => arith::fp_to_ui_rte(a, w),
                });
                self.set_result(instr, Slot::I64(v))
            }
            Opcode::CastSiNarrowChk | Opcode::CastUiNarrowChk => {
                let a = self.operand(instr, 0)?.as_i64();
                let w = width_of(instr);
                let v = checked!(if instr.op == Opcode::CastSiNarrowChk {
                    arith::si_narrow(a, w)
                } else {
                    arith::ui_narrow(a, w)
                });
                self.set_result(instr, Slot::I64(v))
            }
            Opcode::Zext1 => {
                let a = self.operand(instr, 0)?.as_i64();
                self.set_result(instr, Slot::I64(a & 1))
            }
            Opcode::Trunc1 => {
                let a = self.operand(instr, 0)?.as_i64();
                self.set_result(instr, Slot::Bool(a & 1 != 0))
            }
            Opcode::IdxChk => {
                let index = self.operand(instr, 0)?.as_i64();
                let lo = self.operand(instr, 1)?.as_i64();
                let hi = self.operand(instr, 2)?.as_i64();
                let v = checked!(arith::idx_chk(index, lo, hi, width_of(instr)));
                self.set_result(instr, Slot::I64(v))
            }

            // === Memory ===
            Opcode::Alloca => {
                let size = self.operand(instr, 0)?.as_i64();
                let Ok(size) = usize::try_from(size) else {
                    return trap(TrapKind::InvalidOperation);
                };
                match self.memory.alloc(size) {
                    Some(addr) => self.set_result(instr, Slot::Ptr(addr)),
                    None => trap(TrapKind::InvalidOperation),
                }
            }
            Opcode::Gep => {
                let base = self.operand(instr, 0)?.as_ptr();
                let offset = self.operand(instr, 1)?.as_i64();
                self.set_result(instr, Slot::Ptr(base.wrapping_add(offset as u64)))
            }
            Opcode::Load => {
                let addr = self.operand(instr, 0)?.as_ptr();
                match self.memory.load(instr.ty, addr) {
                    Ok(bits) => self.set_result(instr, slot_from_bits(instr.ty, bits)),
                    Err(bad) => {
                        log::debug!("bad load of {} bytes at {:#x}", bad.size, bad.addr);
                        trap(TrapKind::InvalidOperation)
                    }
                }
            }
            Opcode::Store => {
                let addr = self.operand(instr, 0)?.as_ptr();
                let value = self.operand(instr, 1)?;
                match self.memory.store(instr.ty, addr, value.as_i64()) {
                    Ok(()) => {
                        // Stored strings outlive register tracking; keep them
                        // until the run ends
                        if let Slot::Str(handle) = value {
                            for frame in &mut self.frames {
                                frame.disown_string(handle);
                            }
                        }
                        Ok(Flow::Next)
                    }
                    Err(bad) => {
                        log::debug!("bad store of {} bytes at {:#x}", bad.size, bad.addr);
                        trap(TrapKind::InvalidOperation)
                    }
                }
            }
            Opcode::ConstStr => {
                let value = self.operand(instr, 0)?;
                self.set_result(instr, value)
            }
            Opcode::ConstNull => self.set_result(instr, Slot::Ptr(0)),

            // === Control flow ===
            Opcode::Call => self.execute_call(instr),
            Opcode::Ret => {
                let value = match instr.operands.first() {
                    Some(v) => self.eval(v)?,
                    None => Slot::Void,
                };
                Ok(Flow::Return(value))
            }
            Opcode::Br => self.jump_to_target(instr, 0),
            Opcode::CBr => {
                let cond = self.operand(instr, 0)?.as_bool();
                self.jump_to_target(instr, if cond { 0 } else { 1 })
            }
            Opcode::SwitchI32 => self.execute_switch(instr),

            // === Errors and handlers ===
            Opcode::Trap => trap(TrapKind::RuntimeError),
            Opcode::TrapFromErr => {
                let code = self.operand(instr, 0)?.as_i64() as i32;
                Ok(Flow::Trap {
                    kind: TrapKind::from_err_code(code),
                    code,
                })
            }
            Opcode::TrapKind => {
                let handling = self.top()?.handling;
                match handling {
                    Some(handling) => {
                        let kind = self.errors[handling.error as usize].error.kind;
                        self.set_result(instr, Slot::I64(kind as i64))
                    }
                    None => trap(TrapKind::InvalidOperation),
                }
            }
            Opcode::ErrGetKind | Opcode::ErrGetCode | Opcode::ErrGetIp | Opcode::ErrGetLine => {
                let Slot::Error(handle) = self.operand(instr, 0)? else {
                    return trap(TrapKind::InvalidOperation);
                };
                let Some(raised) = self.errors.get(handle as usize) else {
                    return trap(TrapKind::InvalidOperation);
                };
                let err = raised.error;
                let v = match instr.op {
                    Opcode::ErrGetKind => err.kind as i64,
                    Opcode::ErrGetCode => err.code as i64,
                    Opcode::ErrGetIp => err.ip as i64,
                    _ => err.line_or_unknown(),
                };
                self.set_result(instr, Slot::I64(v))
            }
            Opcode::EhPush => {
                let label = instr
                    .labels
                    .first()
                    .ok_or_else(|| self.malformed("eh.push without a handler label"))?;
                let handler = self.resolve_label(label)?;
                self.top_mut()?.handlers.push(handler);
                Ok(Flow::Next)
            }
            Opcode::EhPop => match self.top_mut()?.handlers.pop() {
                Some(_) => Ok(Flow::Next),
                None => {
                    log::warn!("eh.pop with no handler pushed in this frame");
                    trap(TrapKind::InvalidOperation)
                }
            },
            Opcode::EhEntry => Ok(Flow::Next),
            Opcode::ResumeSame => self.resume(instr, ResumeAction::Retry),
            Opcode::ResumeNext => self.resume(instr, ResumeAction::AdvancePastFault),
            Opcode::ResumeLabel => {
                let label = instr
                    .labels
                    .first()
                    .ok_or_else(|| self.malformed("resume.label without a target"))?;
                let target = self.resolve_label(label)?;
                self.resume(instr, ResumeAction::GotoLabel(target))
            }
        }
    }

    // ========================================================================
    // Branches
    // ========================================================================

    pub(crate) fn resolve_label(&self, label: &str) -> Result<usize, ExecError> {
        let frame = self.top()?;
        self.functions[frame.func]
            .block(label)
            .ok_or_else(|| self.malformed(format!("unknown block label '{}'", label)))
    }

    fn jump_to_target(&mut self, instr: &Instr, target: usize) -> Result<Flow, ExecError> {
        let label = instr
            .labels
            .get(target)
            .ok_or_else(|| self.malformed(format!("{} has no target {}", instr.op, target)))?;
        let block = self.resolve_label(label)?;
        self.jump(block, instr.target_args(target))
    }

    /// Enter `block`, binding `args` to its parameters. All arguments are
    /// evaluated before any parameter is written.
    pub(crate) fn jump(&mut self, block: usize, args: &[Value]) -> Result<Flow, ExecError> {
        let func = self.function(self.top()?.func)?;
        let params = &func
            .blocks
            .get(block)
            .ok_or_else(|| self.malformed(format!("block index {} out of range", block)))?
            .params;
        if params.len() != args.len() {
            return Err(self.malformed(format!(
                "block '{}' takes {} arguments, got {}",
                func.blocks[block].label,
                params.len(),
                args.len()
            )));
        }
        let values = args
            .iter()
            .map(|a| self.eval(a))
            .collect::<Result<SmallVec<[Slot; 4]>, _>>()?;
        let frame = self.top_mut()?;
        for (param, value) in params.iter().zip(values) {
            frame.set(param.id, value);
        }
        frame.goto(block);
        Ok(Flow::Jump)
    }

    fn execute_switch(&mut self, instr: &Instr) -> Result<Flow, ExecError> {
        let scrutinee = self.operand(instr, 0)?.as_i64() as i32;
        let mode = self.config.switch_mode;
        let target = if mode == SwitchMode::Linear {
            switch::linear_lookup(instr, scrutinee)
        } else {
            let frame = self.frames.last_mut().ok_or(ExecError::Halted)?;
            let key = (frame.block, frame.ip);
            match frame.switch_cache.get(key.0, key.1) {
                Some(entry) => {
                    self.stats.switch_hits += 1;
                    entry.lookup(scrutinee)
                }
                None => {
                    let cases = CaseSet::from_instr(instr);
                    let backend = switch::select_backend(mode, &cases).unwrap_or(Backend::Sorted);
                    let entry = SwitchCacheEntry::build(&cases, backend);
                    log::debug!(
                        "switch at {}#{}: {:?} backend for {} cases (range {})",
                        key.0,
                        key.1,
                        entry.backend,
                        cases.len(),
                        cases.range()
                    );
                    let target = entry.lookup(scrutinee);
                    frame.switch_cache.insert(key.0, key.1, entry);
                    self.stats.switch_builds += 1;
                    target
                }
            }
        };
        self.jump_to_target(instr, target)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn execute_call(&mut self, instr: &Instr) -> Result<Flow, ExecError> {
        let name = instr
            .callee
            .as_deref()
            .ok_or_else(|| self.malformed("call without a callee"))?;
        let args = instr
            .operands
            .iter()
            .map(|v| self.eval(v))
            .collect::<Result<SmallVec<[Slot; 8]>, _>>()?;
        if let Some(index) = self.module.function_index(name) {
            self.push_frame(index, &args)?;
            return Ok(Flow::Jump);
        }
        self.call_extern(name, instr, &args)
    }

    fn call_extern(&mut self, name: &str, instr: &Instr, args: &[Slot]) -> Result<Flow, ExecError> {
        let desc = *self
            .externs
            .lookup(name)
            .ok_or_else(|| ExecError::UnknownExtern(name.to_string()))?;
        if desc.params.len() != args.len() {
            return Err(self.malformed(format!(
                "extern {} takes {} arguments, got {}",
                name,
                desc.params.len(),
                args.len()
            )));
        }
        let rt_args = match abi::marshal_args(args, desc.params, &self.strings) {
            Ok(rt_args) => rt_args,
            Err(index) => {
                log::debug!(
                    "extern {}: argument {} is a {}, not a valid {:?}",
                    name,
                    index,
                    args[index].type_name(),
                    desc.params[index]
                );
                return trap(TrapKind::InvalidOperation);
            }
        };
        self.stats.extern_calls += 1;
        match (desc.func)(&mut self.rt, &rt_args) {
            Ok(value) => {
                let returned = value.rt_type();
                if returned != desc.ret {
                    return Err(ExecError::ExternSignature {
                        name: name.to_string(),
                        message: format!("returned {:?}, registered {:?}", returned, desc.ret),
                    });
                }
                let slot = abi::from_rt(value, &mut self.strings);
                let flow = self.set_result(instr, slot)?;
                if let Slot::Str(handle) = slot {
                    self.adopt_string(handle);
                }
                Ok(flow)
            }
            Err(err) => {
                log::debug!("extern {} failed: {}", name, err);
                Ok(Flow::Trap {
                    kind: TrapKind::from(err.err),
                    code: err.err.code(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use il::FunctionBuilder;

    fn module_with(func: Function) -> Module {
        let mut module = Module::new("test");
        module.add_function(func);
        module
    }

    #[test]
    fn test_straight_line_arithmetic() {
        let mut b = FunctionBuilder::new("main", Type::I64);
        let entry = b.block("entry");
        b.switch_to(entry);
        let x = b.binary(Opcode::Mul, Type::I64, Value::int(6), Value::int(7));
        let y = b.binary(Opcode::Sub, Type::I64, x, Value::int(2));
        b.ret(Some(y));
        let module = module_with(b.finish());

        let mut vm = Vm::new(&module, VmConfig::default());
        assert_eq!(vm.run(), Ok(40));
        assert_eq!(vm.stats().instructions, 3);
    }

    #[test]
    fn test_block_arguments_are_parallel() {
        // swap(a, b) via a self-loop must not clobber a before reading it
        let mut b = FunctionBuilder::new("main", Type::I64);
        let entry = b.block("entry");
        let body = b.block_with_params("body", &[("a", Type::I64), ("b", Type::I64)]);
        let done = b.block("done");
        b.switch_to(entry);
        b.br(body, vec![Value::int(1), Value::int(2)]);
        b.switch_to(body);
        let a = b.block_param(body, 0);
        let bb = b.block_param(body, 1);
        let is_swapped = b.binary(Opcode::ICmpEq, Type::I1, a.clone(), Value::int(2));
        let mut cbr = Instr::new(Opcode::CBr, Type::Void);
        cbr.operands = vec![is_swapped];
        cbr.labels = vec![b.label(done), b.label(body)];
        cbr.br_args = vec![vec![], vec![bb.clone(), a.clone()]];
        b.emit(cbr);
        b.switch_to(done);
        let r = b.binary(Opcode::Mul, Type::I64, a, Value::int(10));
        let r = b.binary(Opcode::Add, Type::I64, r, bb);
        b.ret(Some(r));
        let module = module_with(b.finish());

        let mut vm = Vm::new(&module, VmConfig::default());
        assert_eq!(vm.run(), Ok(21));
    }

    #[test]
    fn test_unknown_callee() {
        let mut b = FunctionBuilder::new("main", Type::I64);
        b.call("nowhere", Type::I64, vec![]);
        b.ret(Some(Value::int(0)));
        let module = module_with(b.finish());
        let mut vm = Vm::new(&module, VmConfig::default());
        assert_eq!(vm.run(), Err(ExecError::UnknownExtern("nowhere".to_string())));
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn test_fall_off_block_is_malformed() {
        let mut b = FunctionBuilder::new("main", Type::I64);
        b.binary(Opcode::Add, Type::I64, Value::int(1), Value::int(1));
        let module = module_with(b.finish());
        let mut vm = Vm::new(&module, VmConfig::default());
        assert!(matches!(vm.run(), Err(ExecError::Malformed { .. })));
    }

    #[test]
    fn test_memory_roundtrip_and_null_load() {
        let mut b = FunctionBuilder::new("main", Type::I64);
        let p = b.alloca(Value::int(16));
        let q = b.gep(p.clone(), Value::int(8));
        b.store(Type::I64, q.clone(), Value::int(99));
        let v = b.load(Type::I64, q);
        b.ret(Some(v));
        let module = module_with(b.finish());
        let mut vm = Vm::new(&module, VmConfig::default());
        assert_eq!(vm.run(), Ok(99));

        let mut b = FunctionBuilder::new("main", Type::I64);
        let v = b.load(Type::I64, Value::Null);
        b.ret(Some(v));
        let module = module_with(b.finish());
        let mut vm = Vm::new(&module, VmConfig::default());
        let err = vm.run().unwrap_err();
        assert_eq!(err.as_trap().map(|t| t.kind), Some(TrapKind::InvalidOperation));
    }

    /// `main`: append "x" to a string `n` times in one frame, return its length
    fn concat_loop(n: i64) -> Function {
        let mut b = FunctionBuilder::new("main", Type::I64);
        let entry = b.block("entry");
        let head = b.block_with_params("loop", &[("i", Type::I64), ("s", Type::Str)]);
        let body = b.block("body");
        let exit = b.block("exit");
        let i = b.block_param(head, 0);
        let text = b.block_param(head, 1);
        b.switch_to(entry);
        b.br(head, vec![Value::int(0), Value::str("")]);
        b.switch_to(head);
        let more = b.binary(Opcode::SCmpLT, Type::I1, i.clone(), Value::int(n));
        b.cbr(more, body, exit);
        b.switch_to(body);
        let longer = b.call("rt_concat", Type::Str, vec![text.clone(), Value::str("x")]).unwrap();
        let next = b.binary(Opcode::Add, Type::I64, i, Value::int(1));
        b.br(head, vec![next, longer]);
        b.switch_to(exit);
        let len = b.call("rt_len", Type::I64, vec![text]).unwrap();
        b.ret(Some(len));
        b.finish()
    }

    #[test]
    fn test_concat_loop_keeps_string_table_bounded() {
        let module = module_with(concat_loop(2000));
        let mut vm = Vm::new(&module, VmConfig::default());
        assert_eq!(vm.run(), Ok(2000));
        assert!(vm.strings.capacity() <= 40, "{} entries", vm.strings.capacity());
        assert!(vm.strings.transient_len() <= 32);

        let capacity = vm.strings.capacity();
        assert_eq!(vm.run(), Ok(2000));
        assert_eq!(vm.strings.capacity(), capacity);
    }

    #[test]
    fn test_returned_strings_move_to_the_caller() {
        let mut wrap = FunctionBuilder::new("wrap", Type::Str);
        let s = wrap.call("rt_concat", Type::Str, vec![Value::str("<"), Value::str(">")]);
        wrap.ret(s);

        let mut b = FunctionBuilder::new("main", Type::I64);
        let entry = b.block("entry");
        let head = b.block_with_params("loop", &[("i", Type::I64), ("acc", Type::I64)]);
        let body = b.block("body");
        let exit = b.block("exit");
        let i = b.block_param(head, 0);
        let acc = b.block_param(head, 1);
        b.switch_to(entry);
        b.br(head, vec![Value::int(0), Value::int(0)]);
        b.switch_to(head);
        let more = b.binary(Opcode::SCmpLT, Type::I1, i.clone(), Value::int(500));
        b.cbr(more, body, exit);
        b.switch_to(body);
        let wrapped = b.call("wrap", Type::Str, vec![]).unwrap();
        let len = b.call("rt_len", Type::I64, vec![wrapped]).unwrap();
        let acc2 = b.binary(Opcode::Add, Type::I64, acc.clone(), len);
        let next = b.binary(Opcode::Add, Type::I64, i, Value::int(1));
        b.br(head, vec![next, acc2]);
        b.switch_to(exit);
        b.ret(Some(acc));

        let mut module = module_with(b.finish());
        module.add_function(wrap.finish());
        let mut vm = Vm::new(&module, VmConfig::default());
        assert_eq!(vm.run(), Ok(1000));
        assert!(vm.strings.capacity() <= 40, "{} entries", vm.strings.capacity());

        let result = vm.call("wrap", &[]).unwrap();
        assert_eq!(vm.string(result), Some("<>"));
        assert_eq!(vm.strings.transient_len(), 1);
    }

    #[test]
    fn test_oversized_register_file_is_rejected() {
        let mut b = FunctionBuilder::new("main", Type::I64);
        b.ret(Some(Value::int(0)));
        let mut func = b.finish();
        let mut huge = Instr::new(Opcode::Add, Type::I64);
        huge.operands = vec![Value::int(1), Value::int(2)];
        huge.result = Some(il::ValueId(u32::MAX - 1));
        func.blocks[0].instructions.insert(0, huge);
        let module = module_with(func);

        let mut vm = Vm::new(&module, VmConfig::default());
        match vm.run() {
            Err(ExecError::Malformed { function, message }) => {
                assert_eq!(function, "main");
                assert!(message.contains("registers"), "{}", message);
            }
            other => panic!("expected a malformed module, got {:?}", other),
        }
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn test_globals_and_literals_are_interned() {
        let mut b = FunctionBuilder::new("main", Type::Str);
        b.const_str("hello");
        let s = b.const_str("hello");
        b.ret(Some(s));
        let mut module = module_with(b.finish());
        module.add_global("greeting", "hello");

        let mut vm = Vm::new(&module, VmConfig::default());
        let result = vm.call("main", &[]).unwrap();
        assert_eq!(vm.string(result), Some("hello"));
        assert_eq!(vm.strings.len(), 1);
    }
}
