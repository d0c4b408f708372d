//! Frontend declaration graph
//!
//! The lowering core reads classes, interfaces, value structs and member
//! functions from a `DeclTable` built by the frontend. Declarations are
//! referenced by typed ids; the core never mutates them.

/// Class or interface id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Value struct id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(pub u32);

/// Function id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

/// Opaque handle to a frontend expression (lowered by `ValueLowering`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Source-level type
#[derive(Debug, Clone, PartialEq)]
pub enum SourceType {
    Void,
    Bool,
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Pointer(Box<SourceType>),
    StaticArray(Box<SourceType>, u64),
    /// Value struct, stored inline
    Struct(StructId),
    /// Class or interface reference
    Class(ClassId),
}

impl SourceType {
    pub fn pointer_to(inner: SourceType) -> Self {
        SourceType::Pointer(Box::new(inner))
    }

    /// Whether a value of this type holds a reference the collector must trace
    pub fn has_pointers(&self, decls: &DeclTable) -> bool {
        match self {
            SourceType::Pointer(_) | SourceType::Class(_) => true,
            SourceType::StaticArray(elem, len) => *len > 0 && elem.has_pointers(decls),
            SourceType::Struct(s) => decls
                .strukt(*s)
                .fields
                .iter()
                .any(|f| f.ty.has_pointers(decls)),
            _ => false,
        }
    }
}

/// Static default value of a field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldInit {
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

/// A data field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    /// Byte offset from the start of the object (or struct)
    pub offset: u64,
    pub ty: SourceType,
    pub init: Option<FieldInit>,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, offset: u64, ty: SourceType) -> Self {
        Self {
            name: name.into(),
            offset,
            ty,
            init: None,
        }
    }

    pub fn with_init(mut self, init: FieldInit) -> Self {
        self.init = Some(init);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Interface,
}

/// A class or interface declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    /// Dotted name of the owning module
    pub module: String,
    pub kind: ClassKind,
    pub is_abstract: bool,
    /// Declared inside a function or another class; instances carry a context pointer
    pub is_nested: bool,
    pub base: Option<ClassId>,
    /// Directly implemented (or, for interfaces, inherited) interfaces, in source order
    pub interfaces: Vec<ClassId>,
    pub fields: Vec<FieldDecl>,
    /// Member functions (virtual and final)
    pub methods: Vec<FuncId>,
    pub ctors: Vec<FuncId>,
    pub dtors: Vec<FuncId>,
    pub default_ctor: Option<FuncId>,
}

impl ClassDecl {
    pub fn class(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            kind: ClassKind::Class,
            is_abstract: false,
            is_nested: false,
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            ctors: Vec::new(),
            dtors: Vec::new(),
            default_ctor: None,
        }
    }

    pub fn interface(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            kind: ClassKind::Interface,
            ..Self::class(name, module)
        }
    }

    pub fn is_interface(&self) -> bool {
        self.kind == ClassKind::Interface
    }

    /// Concrete classes get vtable, default image and interface tables
    pub fn is_concrete(&self) -> bool {
        self.kind == ClassKind::Class && !self.is_abstract
    }

    /// `module.Name`
    pub fn qualified_name(&self) -> String {
        if self.module.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.module, self.name)
        }
    }
}

/// A value struct declaration
#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub module: String,
    /// Fields with offsets relative to the struct start
    pub fields: Vec<FieldDecl>,
}

impl StructDecl {
    pub fn new(name: impl Into<String>, module: impl Into<String>, fields: Vec<FieldDecl>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            fields,
        }
    }

    pub fn qualified_name(&self) -> String {
        if self.module.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.module, self.name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncKind {
    /// Dispatched through the vtable; index 0 is reserved for the descriptor
    Virtual { vtbl_index: Option<u32> },
    /// Statically bound member function
    Final,
    Constructor,
    Destructor,
}

/// A member function declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: String,
    /// Linker symbol
    pub symbol: String,
    pub owner: Option<ClassId>,
    /// Declared parameters, excluding the implicit `this`
    pub params: Vec<SourceType>,
    pub ret: SourceType,
    pub kind: FuncKind,
    pub is_abstract: bool,
}

impl FuncDecl {
    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, FuncKind::Virtual { .. })
    }

    pub fn vtbl_index(&self) -> Option<u32> {
        match self.kind {
            FuncKind::Virtual { vtbl_index } => vtbl_index,
            _ => None,
        }
    }

    /// Same name and parameter list
    pub fn same_signature(&self, other: &FuncDecl) -> bool {
        self.name == other.name && self.params == other.params
    }
}

/// All declarations visible to the unit being lowered
#[derive(Debug, Clone, Default)]
pub struct DeclTable {
    classes: Vec<ClassDecl>,
    structs: Vec<StructDecl>,
    funcs: Vec<FuncDecl>,
}

impl DeclTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&mut self, decl: ClassDecl) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(decl);
        id
    }

    pub fn add_struct(&mut self, decl: StructDecl) -> StructId {
        let id = StructId(self.structs.len() as u32);
        self.structs.push(decl);
        id
    }

    pub fn add_func(&mut self, decl: FuncDecl) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        self.funcs.push(decl);
        id
    }

    pub fn class(&self, id: ClassId) -> &ClassDecl {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassDecl {
        &mut self.classes[id.0 as usize]
    }

    pub fn strukt(&self, id: StructId) -> &StructDecl {
        &self.structs[id.0 as usize]
    }

    pub fn strukt_mut(&mut self, id: StructId) -> &mut StructDecl {
        &mut self.structs[id.0 as usize]
    }

    pub fn func(&self, id: FuncId) -> &FuncDecl {
        &self.funcs[id.0 as usize]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut FuncDecl {
        &mut self.funcs[id.0 as usize]
    }

    /// The class followed by its base classes, most derived first
    pub fn base_chain(&self, id: ClassId) -> Vec<ClassId> {
        let mut chain = vec![id];
        let mut current = self.class(id).base;
        while let Some(b) = current {
            if chain.contains(&b) {
                break;
            }
            chain.push(b);
            current = self.class(b).base;
        }
        chain
    }

    /// `ancestor` is `derived` or one of its base classes
    pub fn is_same_or_base_of(&self, ancestor: ClassId, derived: ClassId) -> bool {
        self.base_chain(derived).contains(&ancestor)
    }

    /// Direct bases: the base class (if any) followed by the implemented interfaces
    pub fn direct_bases(&self, id: ClassId) -> Vec<ClassId> {
        let decl = self.class(id);
        decl.base.iter().chain(decl.interfaces.iter()).copied().collect()
    }
}
