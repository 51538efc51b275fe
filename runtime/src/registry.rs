//! Extern function registration
//!
//! Builtins are submitted to a process-wide table at link time with
//! `inventory`. An [`ExternRegistry`] belongs to one engine: lookups check
//! its own entries first and fall back to the global table, so an embedder
//! can shadow a builtin without affecting other engines.

use crate::{RtContext, RtError, RtType, RtValue};
use fxhash::FxHashMap;
use std::sync::OnceLock;

/// Native signature every extern implements
pub type ExternFn = fn(&mut RtContext, &[RtValue]) -> Result<RtValue, RtError>;

/// Extern descriptor: name, signature and entry point
#[derive(Debug, Clone, Copy)]
pub struct ExternDesc {
    pub name: &'static str,
    pub params: &'static [RtType],
    pub ret: RtType,
    pub func: ExternFn,
}

inventory::collect!(ExternDesc);

/// Register a builtin extern in the process-wide table
#[macro_export]
macro_rules! register_extern {
    ($name:expr, [$($param:ident),*] -> $ret:ident, $func:path) => {
        inventory::submit! {
            $crate::ExternDesc {
                name: $name,
                params: &[$($crate::RtType::$param),*],
                ret: $crate::RtType::$ret,
                func: $func,
            }
        }
    };
}

/// Process-wide builtin table, built once on first use
pub fn global_externs() -> &'static FxHashMap<&'static str, ExternDesc> {
    static TABLE: OnceLock<FxHashMap<&'static str, ExternDesc>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = FxHashMap::default();
        for desc in inventory::iter::<ExternDesc> {
            if table.insert(desc.name, *desc).is_some() {
                log::warn!("duplicate extern registration: {}", desc.name);
            }
        }
        log::debug!("collected {} builtin externs", table.len());
        table
    })
}

/// Per-engine extern table layered over the global one
#[derive(Debug, Clone, Default)]
pub struct ExternRegistry {
    local: FxHashMap<String, ExternDesc>,
}

impl ExternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an engine-local extern
    pub fn register(&mut self, name: impl Into<String>, desc: ExternDesc) {
        let name = name.into();
        log::trace!("registering local extern {}", name);
        self.local.insert(name, desc);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.local.remove(name).is_some()
    }

    /// Resolve a name: local entries shadow global ones
    pub fn lookup(&self, name: &str) -> Option<&ExternDesc> {
        self.local.get(name).or_else(|| global_externs().get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(_: &mut RtContext, _: &[RtValue]) -> Result<RtValue, RtError> {
        Ok(RtValue::I64(42))
    }

    #[test]
    fn test_global_table_has_builtins() {
        assert!(global_externs().contains_key("rt_print_i64"));
        assert!(global_externs().contains_key("rt_concat"));
    }

    #[test]
    fn test_local_shadows_global() {
        let mut registry = ExternRegistry::new();
        registry.register(
            "rt_abs_i64",
            ExternDesc {
                name: "rt_abs_i64",
                params: &[RtType::I64],
                ret: RtType::I64,
                func: answer,
            },
        );
        let mut ctx = RtContext::default();
        let desc = registry.lookup("rt_abs_i64").unwrap();
        assert_eq!((desc.func)(&mut ctx, &[RtValue::I64(-3)]), Ok(RtValue::I64(42)));

        // The global entry is untouched
        let global = global_externs()["rt_abs_i64"];
        assert_eq!((global.func)(&mut ctx, &[RtValue::I64(-3)]), Ok(RtValue::I64(3)));

        assert!(registry.unregister("rt_abs_i64"));
        let desc = registry.lookup("rt_abs_i64").unwrap();
        assert_eq!((desc.func)(&mut ctx, &[RtValue::I64(-3)]), Ok(RtValue::I64(3)));
    }

    #[test]
    fn test_lookup_missing() {
        assert!(ExternRegistry::new().lookup("no_such_extern").is_none());
    }
}
