//! IR construction errors

use thiserror::Error;

use crate::types::TypeId;

pub type IrResult<T> = Result<T, IrError>;

#[derive(Debug, Error, PartialEq)]
pub enum IrError {
    #[error("Type {ty} has no size (opaque, void or function type)")]
    Unsized { ty: String },

    #[error("Type {0:?} is not a placeholder and cannot be refined")]
    NotPlaceholder(TypeId),

    #[error("Placeholder {0:?} cannot be refined to another placeholder")]
    OpaqueRefinement(TypeId),

    #[error("Index {index} out of range for aggregate type {ty}")]
    IndexOutOfRange { ty: String, index: u64 },

    #[error("Type {ty} is not a pointer")]
    NotAPointer { ty: String },

    #[error("Type {ty} is not a function")]
    NotAFunction { ty: String },

    #[error("Call through {ty} produces no value")]
    VoidCall { ty: String },

    #[error("Symbol '{name}' already declared with a different type")]
    SymbolTypeMismatch { name: String },

    #[error("Initializer of type {found} does not match global '{name}' of type {expected}")]
    InitializerMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Unsupported pointer width: {0} (expected 32 or 64)")]
    PointerWidth(u32),
}
