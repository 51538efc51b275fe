//! Viper IL execution core
//!
//! Interprets [`il::Module`]s with structured trap handling:
//! - [`Vm`]: the execution loop, calls, externs, stepping and breakpoints
//! - `eh`: raise, handler search across frames, resume tokens
//! - [`arith`]: checked integer arithmetic and float/int casts
//! - [`switch`]: `switch.i32` backend selection and per-frame caching
//!
//! ```ignore
//! let mut vm = Vm::new(&module, VmConfig::from_env()?);
//! let code = vm.run()?;
//! ```

pub mod abi;
pub mod arith;
pub mod config;
pub mod debug;
pub mod eh;
pub mod frame;
pub mod interpreter;
pub mod logging;
pub mod memory;
pub mod slot;
pub mod strings;
pub mod switch;
pub mod trap;

pub use config::{ConfigError, VmConfig};
pub use debug::{Breakpoint, PausePoint, RunOutcome, StepOutcome, VmStats};
pub use interpreter::Vm;
pub use slot::Slot;
pub use switch::{Backend, SwitchMode};
pub use trap::{ExecError, TrapKind, UnhandledTrap, VmError};
