//! IR Types
//!
//! Types are referenced through `TypeId` handles into a `TypeTable`.
//! Structural types (pointers, arrays, literal structs, functions) are
//! interned, so two requests for the same shape return the same handle.
//! Identified types start life as opaque placeholders and are refined in
//! place exactly once; every holder of the handle observes the refinement.

use rustc_hash::FxHashMap;

use crate::error::{IrError, IrResult};

/// Handle to a type in a `TypeTable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Get the raw index
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Shape of an IR type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    /// No value
    Void,
    /// Integer of the given bit width (8, 16, 32 or 64)
    Int(u32),
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// Pointer to the given type
    Ptr(TypeId),
    /// Fixed-length array
    Array { elem: TypeId, len: u64 },
    /// Struct with the given element types, in order
    Struct(Vec<TypeId>),
    /// Function signature
    Function { ret: TypeId, params: Vec<TypeId> },
    /// Forward-declared placeholder, not yet refined
    Opaque,
}

#[derive(Debug, Clone)]
struct TypeEntry {
    ty: IrType,
    name: Option<String>,
    /// Created through `opaque()`: never interned, printed by name or handle
    identified: bool,
}

/// Registry of all types used by a module
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    entries: Vec<TypeEntry>,
    interned: FxHashMap<IrType, TypeId>,
    names: FxHashMap<String, TypeId>,
}

impl TypeTable {
    /// Create an empty type table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a structural type
    pub fn intern(&mut self, ty: IrType) -> TypeId {
        if ty == IrType::Opaque {
            return self.opaque();
        }
        if let Some(&id) = self.interned.get(&ty) {
            return id;
        }
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry {
            ty: ty.clone(),
            name: None,
            identified: false,
        });
        self.interned.insert(ty, id);
        id
    }

    /// Create a fresh placeholder type with its own identity
    pub fn opaque(&mut self) -> TypeId {
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry {
            ty: IrType::Opaque,
            name: None,
            identified: true,
        });
        id
    }

    /// Refine a placeholder to its final shape.
    ///
    /// The handle keeps its identity: types built on top of it (pointers,
    /// function signatures) see the refined shape without being rebuilt.
    pub fn refine(&mut self, id: TypeId, ty: IrType) -> IrResult<()> {
        if ty == IrType::Opaque {
            return Err(IrError::OpaqueRefinement(id));
        }
        let entry = &mut self.entries[id.0 as usize];
        if !entry.identified || entry.ty != IrType::Opaque {
            return Err(IrError::NotPlaceholder(id));
        }
        entry.ty = ty;
        Ok(())
    }

    /// Get the shape of a type
    pub fn get(&self, id: TypeId) -> &IrType {
        &self.entries[id.0 as usize].ty
    }

    /// Whether the type is a placeholder that has not been refined yet
    pub fn is_opaque(&self, id: TypeId) -> bool {
        matches!(self.get(id), IrType::Opaque)
    }

    /// Attach a module-level name to a type (ABI-visible for identified structs)
    pub fn set_name(&mut self, id: TypeId, name: impl Into<String>) {
        let name = name.into();
        self.names.insert(name.clone(), id);
        self.entries[id.0 as usize].name = Some(name);
    }

    /// Name of a type, if one was attached
    pub fn name(&self, id: TypeId) -> Option<&str> {
        self.entries[id.0 as usize].name.as_deref()
    }

    /// Look up a named type
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    /// Number of types in the table
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ========================================================================
    // Shorthand constructors
    // ========================================================================

    pub fn void(&mut self) -> TypeId {
        self.intern(IrType::Void)
    }

    pub fn int(&mut self, bits: u32) -> TypeId {
        self.intern(IrType::Int(bits))
    }

    pub fn i8(&mut self) -> TypeId {
        self.int(8)
    }

    pub fn i32(&mut self) -> TypeId {
        self.int(32)
    }

    pub fn i64(&mut self) -> TypeId {
        self.int(64)
    }

    pub fn f32(&mut self) -> TypeId {
        self.intern(IrType::F32)
    }

    pub fn f64(&mut self) -> TypeId {
        self.intern(IrType::F64)
    }

    pub fn ptr(&mut self, pointee: TypeId) -> TypeId {
        self.intern(IrType::Ptr(pointee))
    }

    /// `i8*`, the untyped byte pointer
    pub fn byte_ptr(&mut self) -> TypeId {
        let i8 = self.i8();
        self.ptr(i8)
    }

    pub fn array(&mut self, elem: TypeId, len: u64) -> TypeId {
        self.intern(IrType::Array { elem, len })
    }

    pub fn struct_of(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.intern(IrType::Struct(fields))
    }

    pub fn function(&mut self, ret: TypeId, params: Vec<TypeId>) -> TypeId {
        self.intern(IrType::Function { ret, params })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Pointee of a pointer type
    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            IrType::Ptr(inner) => Some(*inner),
            _ => None,
        }
    }

    /// Element types of a struct type
    pub fn struct_fields(&self, id: TypeId) -> Option<&[TypeId]> {
        match self.get(id) {
            IrType::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Bit width of an integer type
    pub fn int_width(&self, id: TypeId) -> Option<u32> {
        match self.get(id) {
            IrType::Int(bits) => Some(*bits),
            _ => None,
        }
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.get(id), IrType::Ptr(_))
    }

    pub fn is_float(&self, id: TypeId) -> bool {
        matches!(self.get(id), IrType::F32 | IrType::F64)
    }

    /// Type reached by indexing into an aggregate
    pub fn element_type(&self, id: TypeId, index: u64) -> IrResult<TypeId> {
        match self.get(id) {
            IrType::Struct(fields) => {
                fields
                    .get(index as usize)
                    .copied()
                    .ok_or_else(|| IrError::IndexOutOfRange {
                        ty: self.display(id),
                        index,
                    })
            }
            IrType::Array { elem, len } if index < *len => Ok(*elem),
            _ => Err(IrError::IndexOutOfRange {
                ty: self.display(id),
                index,
            }),
        }
    }

    /// Render a type for diagnostics.
    ///
    /// Identified types print by name (or handle) so self-referential
    /// types terminate.
    pub fn display(&self, id: TypeId) -> String {
        self.display_inner(id, true)
    }

    fn display_inner(&self, id: TypeId, top: bool) -> String {
        let entry = &self.entries[id.0 as usize];
        if entry.identified && !top {
            return match &entry.name {
                Some(name) => format!("%{}", name),
                None => format!("%t{}", id.0),
            };
        }
        match &entry.ty {
            IrType::Void => "void".to_string(),
            IrType::Int(bits) => format!("i{}", bits),
            IrType::F32 => "f32".to_string(),
            IrType::F64 => "f64".to_string(),
            IrType::Ptr(inner) => format!("{}*", self.display_inner(*inner, false)),
            IrType::Array { elem, len } => {
                format!("[{} x {}]", len, self.display_inner(*elem, false))
            }
            IrType::Struct(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|f| self.display_inner(*f, false))
                    .collect();
                format!("{{ {} }}", parts.join(", "))
            }
            IrType::Function { ret, params } => {
                let parts: Vec<String> = params
                    .iter()
                    .map(|p| self.display_inner(*p, false))
                    .collect();
                format!("{} ({})", self.display_inner(*ret, false), parts.join(", "))
            }
            IrType::Opaque => "opaque".to_string(),
        }
    }
}
