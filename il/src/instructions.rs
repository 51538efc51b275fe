//! IL Instructions
//!
//! Defines the opcode set and the instruction record. Operands are plain
//! [`Value`]s; branch targets are block labels with a parallel list of
//! block arguments per target.

use super::{SourceLoc, Type, ValueId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SSA temp produced by an earlier instruction or bound as a parameter
    Temp(ValueId),
    ConstInt(i64),
    ConstFloat(f64),
    /// Inline string literal
    ConstStr(String),
    /// Address of a module-level string global
    GlobalAddr(String),
    Null,
}

impl Value {
    pub fn temp(id: ValueId) -> Self {
        Value::Temp(id)
    }

    pub fn int(v: i64) -> Self {
        Value::ConstInt(v)
    }

    pub fn float(v: f64) -> Self {
        Value::ConstFloat(v)
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::ConstStr(s.into())
    }

    pub fn global(name: impl Into<String>) -> Self {
        Value::GlobalAddr(name.into())
    }

    /// Integer literal payload, if this is one
    pub fn as_const_int(&self) -> Option<i64> {
        match self {
            Value::ConstInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Temp(id) => write!(f, "{}", id),
            Value::ConstInt(v) => write!(f, "{}", v),
            Value::ConstFloat(v) => write!(f, "{:?}", v),
            Value::ConstStr(s) => write!(f, "{:?}", s),
            Value::GlobalAddr(name) => write!(f, "@{}", name),
            Value::Null => write!(f, "null"),
        }
    }
}

/// IL opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // === Integer arithmetic (wrapping) ===
    Add,
    Sub,
    Mul,

    // === Integer arithmetic (overflow checked at declared width) ===
    IAddOvf,
    ISubOvf,
    IMulOvf,

    // === Division (64-bit, trapping) ===
    SDiv,
    UDiv,
    SRem,
    URem,

    // === Division (declared width, trapping) ===
    SDivChk0,
    UDivChk0,
    SRemChk0,
    URemChk0,

    // === Bitwise ===
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,

    // === Integer comparisons ===
    ICmpEq,
    ICmpNe,
    SCmpLT,
    SCmpLE,
    SCmpGT,
    SCmpGE,
    UCmpLT,
    UCmpLE,
    UCmpGT,
    UCmpGE,

    // === Floating point ===
    FAdd,
    FSub,
    FMul,
    FDiv,
    FCmpEQ,
    FCmpNE,
    FCmpLT,
    FCmpLE,
    FCmpGT,
    FCmpGE,
    FCmpOrd,
    FCmpUno,

    // === Conversions ===
    Sitofp,
    CastUiToFp,
    Fptosi,
    CastFpToSiRteChk,
    CastFpToUiRteChk,
    CastSiNarrowChk,
    CastUiNarrowChk,
    Zext1,
    Trunc1,

    /// Bounds check: `idx.chk index, lo, hi`
    IdxChk,

    // === Memory ===
    Alloca,
    Gep,
    Load,
    Store,
    ConstStr,
    ConstNull,

    // === Control flow ===
    Call,
    Ret,
    Br,
    CBr,
    SwitchI32,

    // === Errors and handlers ===
    Trap,
    TrapFromErr,
    TrapKind,
    ErrGetKind,
    ErrGetCode,
    ErrGetIp,
    ErrGetLine,
    EhPush,
    EhPop,
    EhEntry,
    ResumeSame,
    ResumeNext,
    ResumeLabel,
}

impl Opcode {
    /// Textual mnemonic as it appears in IL listings
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::IAddOvf => "iadd.ovf",
            Opcode::ISubOvf => "isub.ovf",
            Opcode::IMulOvf => "imul.ovf",
            Opcode::SDiv => "sdiv",
            Opcode::UDiv => "udiv",
            Opcode::SRem => "srem",
            Opcode::URem => "urem",
            Opcode::SDivChk0 => "sdiv.chk0",
            Opcode::UDivChk0 => "udiv.chk0",
            Opcode::SRemChk0 => "srem.chk0",
            Opcode::URemChk0 => "urem.chk0",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::LShr => "lshr",
            Opcode::AShr => "ashr",
            Opcode::ICmpEq => "icmp_eq",
            Opcode::ICmpNe => "icmp_ne",
            Opcode::SCmpLT => "scmp_lt",
            Opcode::SCmpLE => "scmp_le",
            Opcode::SCmpGT => "scmp_gt",
            Opcode::SCmpGE => "scmp_ge",
            Opcode::UCmpLT => "ucmp_lt",
            Opcode::UCmpLE => "ucmp_le",
            Opcode::UCmpGT => "ucmp_gt",
            Opcode::UCmpGE => "ucmp_ge",
            Opcode::FAdd => "fadd",
            Opcode::FSub => "fsub",
            Opcode::FMul => "fmul",
            Opcode::FDiv => "fdiv",
            Opcode::FCmpEQ => "fcmp_eq",
            Opcode::FCmpNE => "fcmp_ne",
            Opcode::FCmpLT => "fcmp_lt",
            Opcode::FCmpLE => "fcmp_le",
            Opcode::FCmpGT => "fcmp_gt",
            Opcode::FCmpGE => "fcmp_ge",
            Opcode::FCmpOrd => "fcmp_ord",
            Opcode::FCmpUno => "fcmp_uno",
            Opcode::Sitofp => "sitofp",
            Opcode::CastUiToFp => "cast.ui_to_fp",
            Opcode::Fptosi => "fptosi",
            Opcode::CastFpToSiRteChk => "cast.fp_to_si.rte.chk",
            Opcode::CastFpToUiRteChk => "cast.fp_to_ui.rte.chk",
            Opcode::CastSiNarrowChk => "cast.si_narrow.chk",
            Opcode::CastUiNarrowChk => "cast.ui_narrow.chk",
            Opcode::Zext1 => "zext1",
            Opcode::Trunc1 => "trunc1",
            Opcode::IdxChk => "idx.chk",
            Opcode::Alloca => "alloca",
            Opcode::Gep => "gep",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::ConstStr => "const_str",
            Opcode::ConstNull => "const_null",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Br => "br",
            Opcode::CBr => "cbr",
            Opcode::SwitchI32 => "switch.i32",
            Opcode::Trap => "trap",
            Opcode::TrapFromErr => "trap.from_err",
            Opcode::TrapKind => "trap.kind",
            Opcode::ErrGetKind => "err.get_kind",
            Opcode::ErrGetCode => "err.get_code",
            Opcode::ErrGetIp => "err.get_ip",
            Opcode::ErrGetLine => "err.get_line",
            Opcode::EhPush => "eh.push",
            Opcode::EhPop => "eh.pop",
            Opcode::EhEntry => "eh.entry",
            Opcode::ResumeSame => "resume.same",
            Opcode::ResumeNext => "resume.next",
            Opcode::ResumeLabel => "resume.label",
        }
    }

    /// Whether this opcode ends a basic block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Ret
                | Opcode::Br
                | Opcode::CBr
                | Opcode::SwitchI32
                | Opcode::Trap
                | Opcode::TrapFromErr
                | Opcode::ResumeSame
                | Opcode::ResumeNext
                | Opcode::ResumeLabel
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// IL instruction
///
/// For `switch.i32`, `operands[0]` is the scrutinee and `operands[1..]` are
/// the case values; `labels[0]` is the default target and `labels[i]` the
/// target of case `i - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    /// Destination temp, if the instruction produces a value
    pub result: Option<ValueId>,
    pub op: Opcode,
    /// Result type, declared width for checked ops, destination type for casts
    pub ty: Type,
    pub operands: Vec<Value>,
    /// Callee name for `call`
    pub callee: Option<String>,
    /// Branch target labels
    pub labels: Vec<String>,
    /// Block arguments, one list per label
    pub br_args: Vec<Vec<Value>>,
    pub loc: SourceLoc,
}

impl Instr {
    pub fn new(op: Opcode, ty: Type) -> Self {
        Self {
            result: None,
            op,
            ty,
            operands: Vec::new(),
            callee: None,
            labels: Vec::new(),
            br_args: Vec::new(),
            loc: SourceLoc::unknown(),
        }
    }

    /// Number of cases in a `switch.i32`
    pub fn switch_case_count(&self) -> usize {
        self.operands.len().saturating_sub(1)
    }

    /// Case value `idx` of a `switch.i32`
    pub fn switch_case_value(&self, idx: usize) -> Option<i64> {
        self.operands.get(idx + 1).and_then(Value::as_const_int)
    }

    /// Block arguments passed along target `idx`
    pub fn target_args(&self, idx: usize) -> &[Value] {
        self.br_args.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = self.result {
            write!(f, "{} = ", result)?;
        }
        write!(f, "{}", self.op)?;
        if self.ty != Type::Void {
            write!(f, ".{}", self.ty)?;
        }
        if let Some(callee) = &self.callee {
            write!(f, " @{}", callee)?;
        }
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, operand)?;
        }
        for (i, label) in self.labels.iter().enumerate() {
            write!(f, " ^{}", label)?;
            let args = self.target_args(i);
            if !args.is_empty() {
                let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "({})", rendered.join(", "))?;
            }
        }
        Ok(())
    }
}
