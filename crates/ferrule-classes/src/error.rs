//! Class lowering errors
//!
//! Every error here is fatal for the compilation unit: the frontend and the
//! lowering core disagree about a layout or a declaration. Failed dynamic
//! casts are not errors; they produce null at run time.

use ferrule_ir::IrError;
use thiserror::Error;

pub type LowerResult<T> = Result<T, LowerError>;

#[derive(Debug, Error)]
pub enum LowerError {
    // ------------------------------------------------------------------
    // Layout invariants
    // ------------------------------------------------------------------
    #[error("{class}: no field at byte offset {offset}")]
    OffsetNotFound { class: String, offset: u64 },

    #[error("Byte offset {offset} is not a multiple of element size {element_size}")]
    MisalignedOffset { offset: u64, element_size: u64 },

    #[error(
        "{class}: field at offset {offset} (size {size}) overflows union slot at offset {slot_offset} (size {slot_size})"
    )]
    UnionOverlap {
        class: String,
        offset: u64,
        size: u64,
        slot_offset: u64,
        slot_size: u64,
    },

    #[error("{class}: vtable slot {index} has no method")]
    VtableHole { class: String, index: u32 },

    #[error("{class}: class layout is not available (cyclic inheritance?)")]
    UnresolvedClass { class: String },

    #[error("{name}: struct contains itself by value")]
    RecursiveStruct { name: String },

    #[error("{class}: field at offset {offset} overlaps the enclosing-context slot at {context}")]
    ContextOverlap {
        class: String,
        offset: u64,
        context: u64,
    },

    // ------------------------------------------------------------------
    // Missing prerequisites
    // ------------------------------------------------------------------
    #[error("{class}: no constructor designated for construction with arguments")]
    MissingConstructor { class: String },

    #[error("{method} is not a virtual method")]
    NotVirtual { method: String },

    #[error("{method} has no vtable index assigned")]
    MissingVtableIndex { method: String },

    #[error("{class} does not implement {interface}.{method}")]
    UnimplementedInterfaceMethod {
        class: String,
        interface: String,
        method: String,
    },

    #[error("{class}: abstract method {method} left in vtable of concrete class")]
    AbstractSlotInConcreteClass { class: String, method: String },

    #[error("{class}: cannot instantiate abstract class or interface")]
    AbstractInstantiation { class: String },

    #[error("{class}: nested class instantiated without an enclosing context")]
    MissingContext { class: String },

    // ------------------------------------------------------------------
    // Wrapped
    // ------------------------------------------------------------------
    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    #[error("Failed to read lowering options: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse lowering options: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid lowering options: {0}")]
    InvalidOptions(String),
}
