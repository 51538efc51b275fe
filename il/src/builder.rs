//! IL Builder
//!
//! Builder interface for constructing IL functions by hand: tests, demo
//! programs and tools use it in place of a frontend. The builder tracks an
//! insertion block, hands out fresh temp ids and stamps every emitted
//! instruction with the current source line.

use super::{BasicBlock, Function, Instr, Opcode, Param, SourceLoc, Type, Value, ValueId};

/// Handle to a block created by a [`FunctionBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef(pub usize);

/// Builder for a single IL function
pub struct FunctionBuilder {
    func: Function,
    current: Option<usize>,
    next_id: u32,
    loc: SourceLoc,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, ret_type: Type) -> Self {
        Self {
            func: Function::new(name, ret_type),
            current: None,
            next_id: 0,
            loc: SourceLoc::unknown(),
        }
    }

    /// Declare a function parameter and return the value it is bound to
    pub fn param(&mut self, name: impl Into<String>, ty: Type) -> Value {
        let id = self.fresh_id();
        self.func.params.push(Param {
            name: name.into(),
            ty,
            id,
        });
        Value::Temp(id)
    }

    /// Reserve a fresh temp id
    pub fn fresh_id(&mut self) -> ValueId {
        let id = ValueId(self.next_id);
        self.next_id += 1;
        id
    }

    // === Block Building ===

    /// Create a block without parameters
    pub fn block(&mut self, label: impl Into<String>) -> BlockRef {
        self.block_with_params(label, &[])
    }

    /// Create a block whose parameters get fresh temp ids
    pub fn block_with_params(&mut self, label: impl Into<String>, params: &[(&str, Type)]) -> BlockRef {
        let mut block = BasicBlock::new(label);
        for (name, ty) in params {
            let id = self.fresh_id();
            block.params.push(Param {
                name: (*name).to_string(),
                ty: *ty,
                id,
            });
        }
        self.func.blocks.push(block);
        let block_ref = BlockRef(self.func.blocks.len() - 1);
        if self.current.is_none() {
            self.current = Some(block_ref.0);
        }
        block_ref
    }

    /// Create the conventional two-parameter handler block `(err, tok)`
    pub fn handler_block(&mut self, label: impl Into<String>) -> BlockRef {
        self.block_with_params(label, &[("err", Type::Error), ("tok", Type::ResumeTok)])
    }

    /// Value bound to parameter `index` of `block`
    pub fn block_param(&self, block: BlockRef, index: usize) -> Value {
        let id = self.func.blocks[block.0].params[index].id;
        Value::Temp(id)
    }

    pub fn label(&self, block: BlockRef) -> String {
        self.func.blocks[block.0].label.clone()
    }

    /// Switch to building in a different block
    pub fn switch_to(&mut self, block: BlockRef) {
        self.current = Some(block.0);
    }

    /// Source line stamped on subsequently emitted instructions (0 = unknown)
    pub fn set_line(&mut self, line: u32) {
        self.loc = SourceLoc::at_line(line);
    }

    // === Instruction Building ===

    /// Append an instruction to the current block
    pub fn emit(&mut self, mut instr: Instr) {
        if self.current.is_none() {
            self.block("entry");
        }
        if !instr.loc.is_known() {
            instr.loc = self.loc;
        }
        let idx = self.current.unwrap_or(0);
        self.func.blocks[idx].push(instr);
    }

    /// Append an instruction that produces a value
    pub fn emit_value(&mut self, mut instr: Instr) -> Value {
        let id = self.fresh_id();
        instr.result = Some(id);
        self.emit(instr);
        Value::Temp(id)
    }

    pub fn binary(&mut self, op: Opcode, ty: Type, lhs: Value, rhs: Value) -> Value {
        let mut instr = Instr::new(op, ty);
        instr.operands = vec![lhs, rhs];
        self.emit_value(instr)
    }

    pub fn unary(&mut self, op: Opcode, ty: Type, operand: Value) -> Value {
        let mut instr = Instr::new(op, ty);
        instr.operands = vec![operand];
        self.emit_value(instr)
    }

    /// `idx.chk index, lo, hi`
    pub fn idx_chk(&mut self, index: Value, lo: Value, hi: Value) -> Value {
        let mut instr = Instr::new(Opcode::IdxChk, Type::I64);
        instr.operands = vec![index, lo, hi];
        self.emit_value(instr)
    }

    pub fn const_str(&mut self, text: impl Into<String>) -> Value {
        let mut instr = Instr::new(Opcode::ConstStr, Type::Str);
        instr.operands = vec![Value::str(text)];
        self.emit_value(instr)
    }

    pub fn alloca(&mut self, bytes: Value) -> Value {
        self.unary(Opcode::Alloca, Type::Ptr, bytes)
    }

    pub fn gep(&mut self, base: Value, offset: Value) -> Value {
        self.binary(Opcode::Gep, Type::Ptr, base, offset)
    }

    pub fn load(&mut self, ty: Type, ptr: Value) -> Value {
        self.unary(Opcode::Load, ty, ptr)
    }

    pub fn store(&mut self, ty: Type, ptr: Value, value: Value) {
        let mut instr = Instr::new(Opcode::Store, ty);
        instr.operands = vec![ptr, value];
        self.emit(instr);
    }

    /// Call a function or extern; returns the result when `ret` is not void
    pub fn call(&mut self, callee: impl Into<String>, ret: Type, args: Vec<Value>) -> Option<Value> {
        let mut instr = Instr::new(Opcode::Call, ret);
        instr.callee = Some(callee.into());
        instr.operands = args;
        if ret == Type::Void {
            self.emit(instr);
            None
        } else {
            Some(self.emit_value(instr))
        }
    }

    pub fn ret(&mut self, value: Option<Value>) {
        let mut instr = Instr::new(Opcode::Ret, Type::Void);
        instr.operands = value.into_iter().collect();
        self.emit(instr);
    }

    pub fn br(&mut self, target: BlockRef, args: Vec<Value>) {
        let mut instr = Instr::new(Opcode::Br, Type::Void);
        instr.labels = vec![self.label(target)];
        instr.br_args = vec![args];
        self.emit(instr);
    }

    pub fn cbr(&mut self, cond: Value, then_block: BlockRef, else_block: BlockRef) {
        let mut instr = Instr::new(Opcode::CBr, Type::Void);
        instr.operands = vec![cond];
        instr.labels = vec![self.label(then_block), self.label(else_block)];
        instr.br_args = vec![Vec::new(), Vec::new()];
        self.emit(instr);
    }

    /// `switch.i32 scrutinee, default, [case -> target]`
    pub fn switch_i32(&mut self, scrutinee: Value, default: BlockRef, cases: &[(i64, BlockRef)]) {
        let mut instr = Instr::new(Opcode::SwitchI32, Type::Void);
        instr.operands.push(scrutinee);
        instr.labels.push(self.label(default));
        instr.br_args.push(Vec::new());
        for (value, target) in cases {
            instr.operands.push(Value::int(*value));
            instr.labels.push(self.label(*target));
            instr.br_args.push(Vec::new());
        }
        self.emit(instr);
    }

    pub fn trap(&mut self) {
        self.emit(Instr::new(Opcode::Trap, Type::Void));
    }

    /// Raise a trap from a runtime error code
    pub fn trap_from_err(&mut self, code: Value) {
        let mut instr = Instr::new(Opcode::TrapFromErr, Type::Void);
        instr.operands = vec![code];
        self.emit(instr);
    }

    /// Read a field (`err.get_kind` and friends) of an `Error` value
    pub fn err_get(&mut self, op: Opcode, err: Value) -> Value {
        self.unary(op, Type::I64, err)
    }

    pub fn trap_kind(&mut self) -> Value {
        self.emit_value(Instr::new(Opcode::TrapKind, Type::I64))
    }

    pub fn eh_push(&mut self, handler: BlockRef) {
        let mut instr = Instr::new(Opcode::EhPush, Type::Void);
        instr.labels = vec![self.label(handler)];
        self.emit(instr);
    }

    pub fn eh_pop(&mut self) {
        self.emit(Instr::new(Opcode::EhPop, Type::Void));
    }

    pub fn eh_entry(&mut self) {
        self.emit(Instr::new(Opcode::EhEntry, Type::Void));
    }

    pub fn resume_same(&mut self, tok: Value) {
        let mut instr = Instr::new(Opcode::ResumeSame, Type::Void);
        instr.operands = vec![tok];
        self.emit(instr);
    }

    pub fn resume_next(&mut self, tok: Value) {
        let mut instr = Instr::new(Opcode::ResumeNext, Type::Void);
        instr.operands = vec![tok];
        self.emit(instr);
    }

    pub fn resume_label(&mut self, tok: Value, target: BlockRef, args: Vec<Value>) {
        let mut instr = Instr::new(Opcode::ResumeLabel, Type::Void);
        instr.operands = vec![tok];
        instr.labels = vec![self.label(target)];
        instr.br_args = vec![args];
        self.emit(instr);
    }

    /// Finish building and return the function
    pub fn finish(self) -> Function {
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_basic_function() {
        let mut b = FunctionBuilder::new("add1", Type::I64);
        let x = b.param("x", Type::I64);
        let entry = b.block("entry");
        b.switch_to(entry);
        b.set_line(7);
        let sum = b.binary(Opcode::Add, Type::I64, x, Value::int(1));
        b.ret(Some(sum));
        let func = b.finish();

        assert_eq!(func.params.len(), 1);
        assert_eq!(func.blocks.len(), 1);
        assert!(func.blocks[0].is_terminated());
        assert_eq!(func.blocks[0].instructions[0].loc.line(), Some(7));
        assert_eq!(func.register_count(), 2);
    }

    #[test]
    fn test_handler_block_params() {
        let mut b = FunctionBuilder::new("main", Type::I64);
        let entry = b.block("entry");
        let handler = b.handler_block("handler");
        b.switch_to(entry);
        b.eh_push(handler);
        b.ret(Some(Value::int(0)));
        b.switch_to(handler);
        let tok = b.block_param(handler, 1);
        b.resume_next(tok);
        let func = b.finish();

        let handler = &func.blocks[1];
        assert_eq!(handler.params[0].ty, Type::Error);
        assert_eq!(handler.params[1].ty, Type::ResumeTok);
        assert_eq!(func.blocks[0].instructions[0].labels, vec!["handler".to_string()]);
    }

    #[test]
    fn test_module_serde_roundtrip_preserves_function() {
        let mut b = FunctionBuilder::new("main", Type::I64);
        b.ret(Some(Value::int(3)));
        let mut module = crate::Module::new("demo");
        module.add_function(b.finish());

        let json = serde_json::to_string(&module).unwrap();
        let back: crate::Module = serde_json::from_str(&json).unwrap();
        assert_eq!(back, module);
    }
}
