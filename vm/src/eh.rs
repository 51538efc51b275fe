//! Trap engine
//!
//! A raised trap becomes a [`RaisedError`] and the handler search walks the
//! frame stack from the top. Each frame owns its segment of the handler
//! stack; frames without a handler are discarded (releasing their arena
//! memory) until one is found or the entry frame is exhausted.
//!
//! When a handler is entered it is popped and the frame is marked as
//! handling the error. The [`ResumeToken`] handed to the handler records the
//! resume point and a snapshot of the frame's handler segment, which the
//! resume operations restore. A token is bound to the activation that
//! received it and can be used once.
//!
//! Lifecycle of one trap:
//!
//! ```text
//! Running --raise--> Trapped --handler found--> Handling --resume.*--> Resumed
//!                       |                           |
//!                       |                           +--ret--> re-raised
//!                       +--no handler--> Unhandled
//! ```

use crate::frame::Handling;
use crate::interpreter::{Flow, Vm};
use crate::slot::{ErrorHandle, Slot, TokenHandle};
use crate::trap::{ExecError, TrapKind, UnhandledTrap, VmError};

/// What a resume operation does with its token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// `resume.same`: execute the faulting instruction again
    Retry,
    /// `resume.next`: continue after the faulting instruction
    AdvancePastFault,
    /// `resume.label`: continue at a block of the handling function
    GotoLabel(usize),
}

/// Resume capability handed to a handler
#[derive(Debug, Clone)]
pub struct ResumeToken {
    pub activation: u64,
    pub block: usize,
    pub ip: usize,
    /// Handler segment of the frame at the time of the fault
    pub handlers: Vec<usize>,
    pub consumed: bool,
}

/// Where a trap was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapSite {
    pub func: usize,
    pub block: usize,
    pub ip: usize,
}

#[derive(Debug, Clone)]
pub struct RaisedError {
    pub error: VmError,
    pub site: TrapSite,
}

impl<'m> Vm<'m> {
    /// Raise a trap at the current instruction of the top frame
    pub(crate) fn raise(&mut self, kind: TrapKind, code: i32) -> Result<(), ExecError> {
        let frame = self.frames.last().ok_or(ExecError::Halted)?;
        let site = TrapSite {
            func: frame.func,
            block: frame.block,
            ip: frame.ip,
        };
        let line = self
            .function(site.func)?
            .blocks
            .get(site.block)
            .and_then(|b| b.instructions.get(site.ip))
            .and_then(|i| i.loc.line());
        let handle = self.errors.len() as ErrorHandle;
        self.errors.push(RaisedError {
            error: VmError {
                kind,
                code,
                ip: site.ip as u64,
                line,
            },
            site,
        });
        self.stats.traps_raised += 1;
        log::debug!(
            "trap {} (code {}) at {}:{}#{}",
            kind,
            code,
            self.functions[site.func].name,
            site.block,
            site.ip
        );
        self.dispatch(handle)
    }

    /// Find the nearest handler for `error`, unwinding frames without one
    fn dispatch(&mut self, error: ErrorHandle) -> Result<(), ExecError> {
        loop {
            let depth = self.frames.len();
            let frame = self.frames.last_mut().ok_or(ExecError::Halted)?;
            if let Some(&handler) = frame.handlers.last() {
                let token = self.tokens.len() as TokenHandle;
                self.tokens.push(ResumeToken {
                    activation: frame.activation,
                    block: frame.block,
                    ip: frame.ip,
                    handlers: frame.handlers.clone(),
                    consumed: false,
                });
                frame.handlers.pop();
                frame.handling = Some(Handling { error, token });
                let func = frame.func;
                self.enter_handler(func, handler, error, token)?;
                self.stats.traps_handled += 1;
                return Ok(());
            }
            if depth == 1 {
                return Err(self.unhandled(error));
            }
            if let Some(frame) = self.pop_frame() {
                log::debug!("unwound {} looking for a handler", self.functions[frame.func].name);
            }
        }
    }

    fn enter_handler(
        &mut self,
        func: usize,
        handler: usize,
        error: ErrorHandle,
        token: TokenHandle,
    ) -> Result<(), ExecError> {
        let block = self
            .function(func)?
            .blocks
            .get(handler)
            .ok_or_else(|| self.malformed(format!("handler block {} out of range", handler)))?;
        log::debug!("entering handler '{}' in {}", block.label, self.functions[func].name);
        let frame = self.frames.last_mut().ok_or(ExecError::Halted)?;
        let bindings = [Slot::Error(error), Slot::ResumeTok(token)];
        for (param, value) in block.params.iter().zip(bindings) {
            frame.set(param.id, value);
        }
        frame.goto(handler);
        Ok(())
    }

    /// Build the diagnostic for an uncaught trap and stop execution
    fn unhandled(&mut self, error: ErrorHandle) -> ExecError {
        let raised = &self.errors[error as usize];
        let site = raised.site;
        let block = self
            .module
            .function_at(site.func)
            .and_then(|f| f.blocks.get(site.block))
            .map(|b| b.label.clone())
            .unwrap_or_default();
        let trap = UnhandledTrap {
            kind: raised.error.kind,
            code: raised.error.code,
            function: self.functions[site.func].name.clone(),
            block,
            ip: site.ip,
            line: raised.error.line,
        };
        let message = trap.to_string();
        log::error!("unhandled trap\n{}", message);
        self.last_trap = Some(message);
        self.abort();
        ExecError::Trap(Box::new(trap))
    }

    /// `resume.same`, `resume.next` and `resume.label`
    pub(crate) fn resume(&mut self, instr: &il::Instr, action: ResumeAction) -> Result<Flow, ExecError> {
        let operand = instr
            .operands
            .first()
            .ok_or_else(|| self.malformed(format!("{} without a token", instr.op)))?;
        let Slot::ResumeTok(handle) = self.eval(operand)? else {
            log::debug!("{} operand is not a resume token", instr.op);
            return Ok(Flow::Trap {
                kind: TrapKind::InvalidOperation,
                code: 0,
            });
        };
        let frame = self.frames.last().ok_or(ExecError::Halted)?;
        let (activation, func) = (frame.activation, frame.func);
        let (block, ip) = match self.tokens.get(handle as usize) {
            Some(token) if !token.consumed && token.activation == activation => (token.block, token.ip),
            Some(token) if token.consumed => {
                log::debug!("resume token {} already used", handle);
                return Ok(Flow::Trap {
                    kind: TrapKind::InvalidOperation,
                    code: 0,
                });
            }
            _ => {
                log::debug!("resume token {} does not belong to this activation", handle);
                return Ok(Flow::Trap {
                    kind: TrapKind::InvalidOperation,
                    code: 0,
                });
            }
        };
        if action == ResumeAction::AdvancePastFault {
            let len = self
                .function(func)?
                .blocks
                .get(block)
                .map_or(0, |b| b.instructions.len());
            if ip + 1 >= len {
                log::debug!("resume.next has no instruction after the fault");
                return Ok(Flow::Trap {
                    kind: TrapKind::InvalidOperation,
                    code: 0,
                });
            }
        }

        let token = &mut self.tokens[handle as usize];
        token.consumed = true;
        let handlers = std::mem::take(&mut token.handlers);
        let frame = self.frames.last_mut().ok_or(ExecError::Halted)?;
        frame.handlers = handlers;
        frame.handling = None;
        match action {
            ResumeAction::Retry => {
                frame.block = block;
                frame.ip = ip;
                Ok(Flow::Jump)
            }
            ResumeAction::AdvancePastFault => {
                frame.block = block;
                frame.ip = ip + 1;
                Ok(Flow::Jump)
            }
            ResumeAction::GotoLabel(target) => self.jump(target, instr.target_args(0)),
        }
    }

    /// Called on `ret`: a frame that is still handling a trap it never
    /// resumed passes the trap on to the next enclosing handler. Returns
    /// true when the trap was re-raised instead of returning.
    pub(crate) fn reraise_if_unresumed(&mut self) -> Result<bool, ExecError> {
        let frame = self.frames.last_mut().ok_or(ExecError::Halted)?;
        let Some(handling) = frame.handling.take() else {
            return Ok(false);
        };
        let Some(token) = self.tokens.get_mut(handling.token as usize) else {
            return Ok(false);
        };
        if token.consumed {
            return Ok(false);
        }
        token.consumed = true;
        // Back to the fault with the entered handler removed
        let mut handlers = std::mem::take(&mut token.handlers);
        handlers.pop();
        frame.handlers = handlers;
        frame.block = token.block;
        frame.ip = token.ip;
        log::debug!("handler returned without resuming; re-raising");
        self.dispatch(handling.error)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use il::{FunctionBuilder, Module, Opcode, Type, Value};

    fn single(func: il::Function) -> Module {
        let mut module = Module::new("eh");
        module.add_function(func);
        module
    }

    #[test]
    fn test_handler_receives_error_fields() {
        let mut b = FunctionBuilder::new("main", Type::I64);
        let entry = b.block("entry");
        let handler = b.handler_block("handler");
        let done = b.block_with_params("done", &[("v", Type::I64)]);
        b.switch_to(entry);
        b.eh_push(handler);
        b.set_line(12);
        b.binary(Opcode::IAddOvf, Type::I64, Value::int(i64::MAX), Value::int(1));
        b.ret(Some(Value::int(0)));
        b.switch_to(handler);
        b.set_line(0);
        let err = b.block_param(handler, 0);
        let tok = b.block_param(handler, 1);
        let kind = b.err_get(Opcode::ErrGetKind, err.clone());
        let line = b.err_get(Opcode::ErrGetLine, err.clone());
        let ip = b.err_get(Opcode::ErrGetIp, err);
        let r = b.binary(Opcode::Mul, Type::I64, kind, Value::int(10000));
        let l = b.binary(Opcode::Mul, Type::I64, line, Value::int(100));
        let r = b.binary(Opcode::Add, Type::I64, r, l);
        let r = b.binary(Opcode::Add, Type::I64, r, ip);
        b.resume_label(tok, done, vec![r]);
        b.switch_to(done);
        let v = b.block_param(done, 0);
        b.ret(Some(v));
        let module = single(b.finish());

        let mut vm = Vm::new(&module, VmConfig::default());
        // Overflow (1), line 12, ip 1
        assert_eq!(vm.run(), Ok(11201));
        assert_eq!(vm.stats().traps_raised, 1);
        assert_eq!(vm.stats().traps_handled, 1);
    }

    #[test]
    fn test_token_is_single_use() {
        let mut b = FunctionBuilder::new("main", Type::I64);
        let entry = b.block("entry");
        let handler = b.handler_block("handler");
        let again = b.block_with_params("again", &[("t", Type::ResumeTok)]);
        let outer = b.handler_block("outer");
        let finish = b.block_with_params("finish", &[("k", Type::I64)]);
        b.switch_to(entry);
        b.eh_push(outer);
        b.eh_push(handler);
        b.binary(Opcode::SDivChk0, Type::I64, Value::int(1), Value::int(0));
        b.ret(Some(Value::int(-1)));

        b.switch_to(handler);
        let tok = b.block_param(handler, 1);
        b.resume_label(tok.clone(), again, vec![tok]);

        // the resume restored [outer, handler]; drop the inner one so the
        // stale-token trap reaches `outer`
        b.switch_to(again);
        let stale = b.block_param(again, 0);
        b.eh_pop();
        b.resume_next(stale);

        b.switch_to(outer);
        let err = b.block_param(outer, 0);
        let tok = b.block_param(outer, 1);
        let kind = b.err_get(Opcode::ErrGetKind, err);
        b.resume_label(tok, finish, vec![kind]);
        b.switch_to(finish);
        let k = b.block_param(finish, 0);
        b.ret(Some(k));
        let module = single(b.finish());

        let mut vm = Vm::new(&module, VmConfig::default());
        assert_eq!(vm.run(), Ok(TrapKind::InvalidOperation as i64));
        assert_eq!(vm.stats().traps_raised, 2);
        assert!(vm.tokens.iter().all(|t| t.consumed));
    }

    #[test]
    fn test_return_without_resume_reraises_to_outer_handler() {
        let mut b = FunctionBuilder::new("main", Type::I64);
        let entry = b.block("entry");
        let inner = b.handler_block("inner");
        let outer = b.handler_block("outer");
        let finish = b.block_with_params("finish", &[("k", Type::I64)]);
        b.switch_to(entry);
        b.eh_push(outer);
        b.eh_push(inner);
        b.idx_chk(Value::int(9), Value::int(0), Value::int(4));
        b.ret(Some(Value::int(-1)));
        b.switch_to(inner);
        b.ret(Some(Value::int(-2)));
        b.switch_to(outer);
        let err = b.block_param(outer, 0);
        let tok = b.block_param(outer, 1);
        let kind = b.err_get(Opcode::ErrGetKind, err);
        b.resume_label(tok, finish, vec![kind]);
        b.switch_to(finish);
        let k = b.block_param(finish, 0);
        b.ret(Some(k));
        let module = single(b.finish());

        let mut vm = Vm::new(&module, VmConfig::default());
        assert_eq!(vm.run(), Ok(TrapKind::Bounds as i64));
        assert_eq!(vm.stats().traps_raised, 1);
        assert_eq!(vm.stats().traps_handled, 2);
    }
}
