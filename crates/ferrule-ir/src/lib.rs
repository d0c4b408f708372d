//! Ferrule Backend IR
//!
//! The low-level construction target that class lowering emits into.
//!
//! # Structure
//!
//! - `TypeTable` - Handle-based type registry with opaque placeholders that can
//!   be refined in place (needed for self-referential class graphs)
//! - `TargetData` - ABI sizes, alignment and struct element offsets
//! - `Constant` - Constant initializers for globals
//! - `Module` - Named globals, function declarations and named types
//! - `FunctionBuilder` - Straight-line instruction emission for lowering call sites

#![warn(rust_2018_idioms)]

pub mod builder;
pub mod constant;
pub mod error;
pub mod module;
pub mod target;
pub mod types;

pub use builder::{CastKind, FunctionBody, FunctionBuilder, Instr, Operand, Terminator, ValueId};
pub use constant::Constant;
pub use error::{IrError, IrResult};
pub use module::{FuncRef, FunctionDecl, Global, GlobalId, Linkage, Module};
pub use target::{AggregateLayout, TargetData};
pub use types::{IrType, TypeId, TypeTable};
