//! Constant initializers
//!
//! Constants carry their IR type so that global initializers can be checked
//! against the declared global type.

use crate::module::{FuncRef, GlobalId};
use crate::types::TypeId;

/// A constant value
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Integer of the given integer type
    Int { ty: TypeId, value: i64 },
    /// Floating point value of the given float type
    Float { ty: TypeId, value: f64 },
    /// Null pointer of the given pointer type
    Null(TypeId),
    /// All-zero value of any sized type
    Zero(TypeId),
    /// Raw bytes, typed as an `i8` array
    Bytes { ty: TypeId, data: Vec<u8> },
    /// Struct constant
    Struct { ty: TypeId, fields: Vec<Constant> },
    /// Array constant
    Array { ty: TypeId, elems: Vec<Constant> },
    /// Address of a global; `ty` is a pointer to the global's type
    Global { global: GlobalId, ty: TypeId },
    /// Address of a function; `ty` is a pointer to the function type
    Function { func: FuncRef, ty: TypeId },
    /// Pointer reinterpretation
    BitCast { value: Box<Constant>, to: TypeId },
    /// Address of an element inside a global (constant GEP)
    ElementAddr {
        global: GlobalId,
        indices: Vec<u64>,
        ty: TypeId,
    },
}

impl Constant {
    /// IR type of this constant
    pub fn ty(&self) -> TypeId {
        match self {
            Constant::Int { ty, .. }
            | Constant::Float { ty, .. }
            | Constant::Null(ty)
            | Constant::Zero(ty)
            | Constant::Bytes { ty, .. }
            | Constant::Struct { ty, .. }
            | Constant::Array { ty, .. }
            | Constant::Global { ty, .. }
            | Constant::Function { ty, .. }
            | Constant::ElementAddr { ty, .. } => *ty,
            Constant::BitCast { to, .. } => *to,
        }
    }

    /// Reinterpret as another type; no-op if the type already matches
    pub fn bitcast(self, to: TypeId) -> Constant {
        if self.ty() == to {
            return self;
        }
        Constant::BitCast {
            value: Box::new(self),
            to,
        }
    }

    /// Strip any pointer reinterpretations
    pub fn strip_casts(&self) -> &Constant {
        let mut c = self;
        while let Constant::BitCast { value, .. } = c {
            c = value;
        }
        c
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.strip_casts() {
            Constant::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_struct_fields(&self) -> Option<&[Constant]> {
        match self.strip_casts() {
            Constant::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn as_array_elems(&self) -> Option<&[Constant]> {
        match self.strip_casts() {
            Constant::Array { elems, .. } => Some(elems),
            _ => None,
        }
    }

    /// Global referenced by this constant, looking through casts
    pub fn as_global(&self) -> Option<GlobalId> {
        match self.strip_casts() {
            Constant::Global { global, .. } => Some(*global),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<FuncRef> {
        match self.strip_casts() {
            Constant::Function { func, .. } => Some(*func),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.strip_casts(), Constant::Null(_))
    }
}
