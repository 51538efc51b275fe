//! IL Modules
//!
//! A module is the unit handed to the execution engine: functions, string
//! globals and the signatures of extern (runtime) functions it calls.

use super::{Function, Type};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Module-level string constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub init: String,
}

/// Signature of a function implemented by the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternDecl {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
}

/// IL module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,

    /// Functions keyed by name, in definition order
    pub functions: IndexMap<String, Function>,

    pub globals: Vec<Global>,

    pub externs: Vec<ExternDecl>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a function, replacing any previous definition with the same name
    pub fn add_function(&mut self, func: Function) {
        self.functions.insert(func.name.clone(), func);
    }

    pub fn add_global(&mut self, name: impl Into<String>, init: impl Into<String>) {
        self.globals.push(Global {
            name: name.into(),
            init: init.into(),
        });
    }

    pub fn add_extern(&mut self, name: impl Into<String>, params: Vec<Type>, ret: Type) {
        self.externs.push(ExternDecl {
            name: name.into(),
            params,
            ret,
        });
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Position of a function in definition order
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.get_index_of(name)
    }

    pub fn function_at(&self, index: usize) -> Option<&Function> {
        self.functions.get_index(index).map(|(_, f)| f)
    }
}
