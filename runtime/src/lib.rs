//! Viper Runtime Library
//!
//! Runtime support for IL programs, shared by the interpreter and natively
//! compiled code.
//!
//! # Architecture
//!
//! - **Error vocabulary**: [`Err`] is the closed set of runtime error codes.
//!   The execution core maps every code onto its trap taxonomy.
//! - **ABI**: extern functions exchange [`RtValue`]s; strings are
//!   reference counted ([`RtString`]) so they can cross threads.
//! - **Registration**: builtins are collected process-wide with `inventory`;
//!   each engine may layer its own [`ExternRegistry`] on top.

pub mod builtins;
pub mod context;
pub mod err;
pub mod registry;
pub mod value;

pub use context::{Console, RtContext};
pub use err::Err;
pub use registry::{global_externs, ExternDesc, ExternFn, ExternRegistry};
pub use value::{RtError, RtString, RtType, RtValue};
