//! Slot <-> runtime value marshalling for extern calls

use crate::slot::Slot;
use crate::strings::StringTable;
use il::{ExternDecl, Type};
use smallvec::SmallVec;
use viper_runtime::{ExternDesc, RtType, RtValue};

/// Extern arguments; most runtime calls take at most four
pub type ArgVec = SmallVec<[RtValue; 4]>;

/// Convert a slot to the runtime representation of `ty`.
/// Fails only for a string handle the table does not know.
pub fn to_rt(slot: Slot, ty: RtType, strings: &StringTable) -> Option<RtValue> {
    Some(match ty {
        RtType::Void => RtValue::Void,
        RtType::I1 => RtValue::Bool(slot.as_bool()),
        RtType::I64 => RtValue::I64(slot.as_i64()),
        RtType::F64 => RtValue::F64(slot.as_f64()),
        RtType::Ptr => RtValue::Ptr(slot.as_ptr()),
        RtType::Str => match slot {
            Slot::Str(handle) => RtValue::Str(strings.get(handle)?.clone()),
            _ => return None,
        },
    })
}

/// Marshal call operands against an extern's parameter list
pub fn marshal_args(slots: &[Slot], params: &[RtType], strings: &StringTable) -> Result<ArgVec, usize> {
    slots
        .iter()
        .zip(params)
        .enumerate()
        .map(|(i, (slot, ty))| to_rt(*slot, *ty, strings).ok_or(i))
        .collect()
}

/// Runtime kind an IL type crosses the extern boundary as
pub fn rt_type_of(ty: Type) -> Option<RtType> {
    match ty {
        Type::Void => Some(RtType::Void),
        Type::I1 => Some(RtType::I1),
        Type::I8 | Type::I16 | Type::I32 | Type::I64 => Some(RtType::I64),
        Type::F64 => Some(RtType::F64),
        Type::Ptr => Some(RtType::Ptr),
        Type::Str => Some(RtType::Str),
        Type::Error | Type::ResumeTok => None,
    }
}

/// Compare a module's extern declaration with the registered entry
pub fn check_signature(decl: &ExternDecl, desc: &ExternDesc) -> Result<(), String> {
    if decl.params.len() != desc.params.len() {
        return Err(format!(
            "declared with {} parameters, registered with {}",
            decl.params.len(),
            desc.params.len()
        ));
    }
    for (i, (ty, rt)) in decl.params.iter().zip(desc.params).enumerate() {
        if rt_type_of(*ty) != Some(*rt) {
            return Err(format!("parameter {} declared {}, registered {:?}", i, ty, rt));
        }
    }
    if rt_type_of(decl.ret) != Some(desc.ret) {
        return Err(format!("declared to return {}, registered {:?}", decl.ret, desc.ret));
    }
    Ok(())
}

/// Convert an extern result back into a slot, storing new strings
pub fn from_rt(value: RtValue, strings: &mut StringTable) -> Slot {
    match value {
        RtValue::Void => Slot::Void,
        RtValue::Bool(b) => Slot::Bool(b),
        RtValue::I64(v) => Slot::I64(v),
        RtValue::F64(v) => Slot::F64(v),
        RtValue::Ptr(p) => Slot::Ptr(p),
        RtValue::Str(s) => Slot::Str(strings.push(s)),
    }
}
