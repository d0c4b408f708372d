//! IR Module
//!
//! A module owns the type table, the target description and every named
//! global and function emitted for one compilation unit. Symbols are
//! declared once and looked up by name afterwards; redeclaring a symbol
//! with the same type returns the existing handle.

use rustc_hash::FxHashMap;

use crate::builder::FunctionBody;
use crate::constant::Constant;
use crate::error::{IrError, IrResult};
use crate::target::TargetData;
use crate::types::{IrType, TypeId, TypeTable};

/// Handle to a global variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u32);

/// Handle to a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncRef(pub u32);

/// Symbol linkage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Visible to other modules (defined here or resolved at link time)
    External,
    /// Private to this module
    Internal,
}

/// A global variable
#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    /// Type of the stored value (the symbol itself is a pointer to it)
    pub ty: TypeId,
    pub linkage: Linkage,
    /// Read-only storage
    pub constant: bool,
    /// `None` means declared only
    pub initializer: Option<Constant>,
}

impl Global {
    pub fn is_defined(&self) -> bool {
        self.initializer.is_some()
    }
}

/// A function declaration, optionally with a body
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    /// Function type
    pub ty: TypeId,
    pub linkage: Linkage,
    pub body: Option<FunctionBody>,
}

/// A compilation unit
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub types: TypeTable,
    pub target: TargetData,
    globals: Vec<Global>,
    global_names: FxHashMap<String, GlobalId>,
    functions: Vec<FunctionDecl>,
    function_names: FxHashMap<String, FuncRef>,
    string_count: u32,
}

impl Module {
    /// Create an empty module
    pub fn new(name: impl Into<String>, target: TargetData) -> Self {
        Self {
            name: name.into(),
            types: TypeTable::new(),
            target,
            globals: Vec::new(),
            global_names: FxHashMap::default(),
            functions: Vec::new(),
            function_names: FxHashMap::default(),
            string_count: 0,
        }
    }

    // ========================================================================
    // Globals
    // ========================================================================

    /// Declare a global, or return the existing one with the same name
    pub fn declare_global(
        &mut self,
        name: &str,
        ty: TypeId,
        linkage: Linkage,
        constant: bool,
    ) -> IrResult<GlobalId> {
        if let Some(&id) = self.global_names.get(name) {
            if self.globals[id.0 as usize].ty != ty {
                return Err(IrError::SymbolTypeMismatch {
                    name: name.to_string(),
                });
            }
            return Ok(id);
        }
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(Global {
            name: name.to_string(),
            ty,
            linkage,
            constant,
            initializer: None,
        });
        self.global_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Define the initializer of a global
    pub fn set_initializer(&mut self, id: GlobalId, init: Constant) -> IrResult<()> {
        let expected = self.globals[id.0 as usize].ty;
        if init.ty() != expected {
            let global = &self.globals[id.0 as usize];
            return Err(IrError::InitializerMismatch {
                name: global.name.clone(),
                expected: self.types.display(expected),
                found: self.types.display(init.ty()),
            });
        }
        self.globals[id.0 as usize].initializer = Some(init);
        Ok(())
    }

    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.0 as usize]
    }

    pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
        self.global_names.get(name).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId(i as u32), g))
    }

    /// Address of a global as a constant
    pub fn global_ref(&mut self, id: GlobalId) -> Constant {
        let ty = self.globals[id.0 as usize].ty;
        let ptr = self.types.ptr(ty);
        Constant::Global { global: id, ty: ptr }
    }

    /// Emit a private string constant and return it with its byte length
    pub fn add_string(&mut self, value: &str) -> IrResult<(GlobalId, u64)> {
        let data = value.as_bytes().to_vec();
        let len = data.len() as u64;
        let i8 = self.types.i8();
        let ty = self.types.array(i8, len);
        let name = format!(".str.{}", self.string_count);
        self.string_count += 1;
        let id = self.declare_global(&name, ty, Linkage::Internal, true)?;
        self.set_initializer(id, Constant::Bytes { ty, data })?;
        Ok((id, len))
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Declare a function, or return the existing one with the same name
    pub fn declare_function(
        &mut self,
        name: &str,
        ty: TypeId,
        linkage: Linkage,
    ) -> IrResult<FuncRef> {
        if !matches!(self.types.get(ty), IrType::Function { .. }) {
            return Err(IrError::NotAFunction {
                ty: self.types.display(ty),
            });
        }
        if let Some(&f) = self.function_names.get(name) {
            if self.functions[f.0 as usize].ty != ty {
                return Err(IrError::SymbolTypeMismatch {
                    name: name.to_string(),
                });
            }
            return Ok(f);
        }
        let f = FuncRef(self.functions.len() as u32);
        self.functions.push(FunctionDecl {
            name: name.to_string(),
            ty,
            linkage,
            body: None,
        });
        self.function_names.insert(name.to_string(), f);
        Ok(f)
    }

    /// Attach a body to a declared function
    pub fn define_function(&mut self, f: FuncRef, body: FunctionBody) {
        self.functions[f.0 as usize].body = Some(body);
    }

    pub fn function(&self, f: FuncRef) -> &FunctionDecl {
        &self.functions[f.0 as usize]
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncRef> {
        self.function_names.get(name).copied()
    }

    /// Address of a function as a constant
    pub fn function_ref(&mut self, f: FuncRef) -> Constant {
        let ty = self.functions[f.0 as usize].ty;
        let ptr = self.types.ptr(ty);
        Constant::Function { func: f, ty: ptr }
    }
}
