//! Ferrule Classes - Class ABI Lowering
//!
//! Turns the frontend's class and interface declarations into IR: object
//! layouts, vtables, interface tables, static default images and runtime
//! type descriptors, plus the call-site lowering for `new`, casts, field
//! access and virtual calls.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod decl;
pub mod error;
pub mod layout;
pub mod lower;
pub mod mangle;

pub use config::{LoweringOptions, RuntimeSymbols, TargetOptions};
pub use decl::{
    ClassDecl, ClassId, ClassKind, DeclTable, ExprId, FieldDecl, FieldInit, FuncDecl, FuncId,
    FuncKind, SourceType, StructDecl, StructId,
};
pub use error::{LowerError, LowerResult};
pub use layout::{resolve_layout, StructLayout};
pub use lower::{ClassLowering, ClassState};

use ferrule_ir::Module;

/// Lower `classes` and everything they reference into a fresh module
pub fn lower_module(
    decls: &DeclTable,
    options: LoweringOptions,
    classes: &[ClassId],
) -> LowerResult<Module> {
    let mut lowering = ClassLowering::new(decls, options)?;
    lowering.lower_classes(classes)?;
    Ok(lowering.into_module())
}
