//! Class lowering
//!
//! `ClassLowering` owns the IR module being produced and the derived
//! per-class state. Each class moves through a fixed sequence of phases:
//!
//! ```text
//! Unresolved -> Resolved -> Declared -> ConstInitialized -> Defined
//! ```
//!
//! - **Resolved**: layout, method-resolution order, interface table and the
//!   composite/vtable types are known.
//! - **Declared**: descriptor, vtable, interface tables and default image
//!   have storage.
//! - **ConstInitialized**: the constants for that storage are built.
//! - **Defined**: the constants are written (owning module only).
//!
//! Every transition first records the new state and only then does its
//! work, so a recursive request for the same class returns immediately and
//! sees the placeholder types installed at the start of resolution.
//! Requests for later phases are queued on pending lists and drained by
//! `drain_pending`.

mod cast;
mod descriptor;
mod dispatch;
mod field_index;
mod instantiate;
mod interfaces;
mod object_type;
mod runtime;
mod typemap;
mod vtable;

pub use cast::{plan_cast, CastPlan, TypedValue};
pub use descriptor::{display_name, ClassFlags, DescriptorField, DescriptorTypes};
pub use field_index::TypedOffset;
pub use instantiate::{EnclosingFunction, NewExpr, ValueLowering};
pub use interfaces::{discover_interfaces, InterfaceEntry};
pub use runtime::RuntimeFn;
pub use vtable::VtblSlot;

use std::collections::VecDeque;

use ferrule_ir::{Constant, FuncRef, GlobalId, Module, TypeId};
use rustc_hash::FxHashMap;
use tracing::debug_span;

use crate::config::LoweringOptions;
use crate::decl::{ClassId, DeclTable, FuncId, StructId};
use crate::error::{LowerError, LowerResult};
use crate::layout::StructLayout;

/// Composite slots before the first data field: vtable pointer and sync handle
pub const HEADER_SLOTS: usize = 2;

/// Per-class compilation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassState {
    Unresolved,
    Resolved,
    Declared,
    ConstInitialized,
    Defined,
}

/// Storage emitted for a class
#[derive(Debug, Clone, Default)]
pub struct ClassGlobals {
    pub descriptor: Option<GlobalId>,
    pub vtbl: Option<GlobalId>,
    pub init: Option<GlobalId>,
    pub interface_infos: Option<GlobalId>,
    pub destructor: Option<FuncRef>,
}

/// Constants waiting to be written in the define phase
#[derive(Debug, Clone, Default)]
struct ClassConsts {
    descriptor: Option<Constant>,
    vtbl: Option<Constant>,
    init: Option<Constant>,
    interface_infos: Option<Constant>,
    interface_vtbls: Vec<(GlobalId, Constant)>,
    offset_type_info: Option<(GlobalId, Constant)>,
}

/// Derived data attached to a class declaration
#[derive(Debug, Clone)]
pub struct ClassIr {
    pub state: ClassState,
    /// Length-prefixed qualified name
    pub mangled: String,
    /// Object type (placeholder until resolved)
    pub composite: TypeId,
    /// Vtable record type (placeholder until resolved)
    pub vtbl_type: TypeId,
    pub layout: Option<StructLayout>,
    /// Method-resolution order, one entry per vtable slot
    pub mro: Vec<VtblSlot>,
    pub interfaces: Vec<InterfaceEntry>,
    /// Composite index of the enclosing-context pointer (nested classes)
    pub context_slot: Option<usize>,
    pub globals: ClassGlobals,
    consts: ClassConsts,
}

/// Derived data for a value struct
#[derive(Debug, Clone)]
pub struct StructIr {
    pub ty: TypeId,
    pub layout: StructLayout,
    pub init: Constant,
}

#[derive(Debug, Default)]
struct PendingLists {
    declare: VecDeque<ClassId>,
    const_init: VecDeque<ClassId>,
    define: VecDeque<ClassId>,
}

/// Class ABI lowering context for one compilation unit
pub struct ClassLowering<'a> {
    decls: &'a DeclTable,
    module: Module,
    options: LoweringOptions,
    classes: FxHashMap<ClassId, ClassIr>,
    structs: FxHashMap<StructId, StructIr>,
    /// Named placeholders of structs whose fields are being lowered
    structs_in_progress: FxHashMap<StructId, TypeId>,
    /// Classes whose resolution is in progress, innermost last
    class_stack: Vec<ClassId>,
    pending: PendingLists,
    descriptor_types: Option<DescriptorTypes>,
}

impl<'a> ClassLowering<'a> {
    /// Create a lowering context emitting into a fresh module
    pub fn new(decls: &'a DeclTable, options: LoweringOptions) -> LowerResult<Self> {
        options.validate()?;
        let target = options.target_data()?;
        let module = Module::new(options.module.clone(), target);
        Ok(Self {
            decls,
            module,
            options,
            classes: FxHashMap::default(),
            structs: FxHashMap::default(),
            structs_in_progress: FxHashMap::default(),
            class_stack: Vec::new(),
            pending: PendingLists::default(),
            descriptor_types: None,
        })
    }

    pub fn decls(&self) -> &'a DeclTable {
        self.decls
    }

    pub fn options(&self) -> &LoweringOptions {
        &self.options
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    /// Finish lowering and hand the module to the code generator
    pub fn into_module(self) -> Module {
        self.module
    }

    /// Current phase of a class
    pub fn state(&self, id: ClassId) -> ClassState {
        self.classes
            .get(&id)
            .map(|ir| ir.state)
            .unwrap_or(ClassState::Unresolved)
    }

    /// Derived data of a class, if lowering has touched it
    pub fn class_ir(&self, id: ClassId) -> Option<&ClassIr> {
        self.classes.get(&id)
    }

    pub fn struct_ir(&self, id: StructId) -> Option<&StructIr> {
        self.structs.get(&id)
    }

    /// Classes whose resolution is currently in progress
    pub fn resolving(&self) -> &[ClassId] {
        &self.class_stack
    }

    fn ir(&self, id: ClassId) -> LowerResult<&ClassIr> {
        self.classes.get(&id).ok_or_else(|| self.unresolved(id))
    }

    fn ir_mut(&mut self, id: ClassId) -> LowerResult<&mut ClassIr> {
        let decls = self.decls;
        self.classes
            .get_mut(&id)
            .ok_or_else(|| LowerError::UnresolvedClass {
                class: decls.class(id).qualified_name(),
            })
    }

    fn layout_of(&self, id: ClassId) -> LowerResult<&StructLayout> {
        self.ir(id)?
            .layout
            .as_ref()
            .ok_or_else(|| self.unresolved(id))
    }

    fn unresolved(&self, id: ClassId) -> LowerError {
        LowerError::UnresolvedClass {
            class: self.class_name(id),
        }
    }

    /// Module-qualified name used in diagnostics
    pub fn class_name(&self, id: ClassId) -> String {
        self.decls.class(id).qualified_name()
    }

    /// `Class.method` for diagnostics
    fn func_name(&self, id: FuncId) -> String {
        let func = self.decls.func(id);
        match func.owner {
            Some(owner) => format!("{}.{}", self.class_name(owner), func.name),
            None => func.name.clone(),
        }
    }

    /// The class is defined by the module being compiled
    pub fn owns(&self, id: ClassId) -> bool {
        self.decls.class(id).module == self.options.module
    }

    // ========================================================================
    // Phase transitions
    // ========================================================================

    /// Compute layout, method order, interface table and types
    pub fn resolve(&mut self, id: ClassId) -> LowerResult<()> {
        if self.state(id) >= ClassState::Resolved {
            return Ok(());
        }
        let span = debug_span!("resolve", class = %self.class_name(id));
        let _enter = span.enter();

        self.ensure_placeholder(id);
        self.ir_mut(id)?.state = ClassState::Resolved;

        self.class_stack.push(id);
        let result = self.resolve_class(id);
        self.class_stack.pop();
        result?;

        self.pending.declare.push_back(id);
        Ok(())
    }

    /// Allocate storage for the descriptor and, for concrete classes, the
    /// vtable, interface tables and default image
    pub fn declare(&mut self, id: ClassId) -> LowerResult<()> {
        if self.state(id) >= ClassState::Declared {
            return Ok(());
        }
        self.resolve(id)?;
        let span = debug_span!("declare", class = %self.class_name(id));
        let _enter = span.enter();

        self.ir_mut(id)?.state = ClassState::Declared;
        self.declare_class_globals(id)?;

        if self.owns(id) {
            self.pending.const_init.push_back(id);
        }
        Ok(())
    }

    /// Build the constants for the storage allocated by `declare`
    pub fn const_init(&mut self, id: ClassId) -> LowerResult<()> {
        if self.state(id) >= ClassState::ConstInitialized {
            return Ok(());
        }
        self.declare(id)?;
        let span = debug_span!("const_init", class = %self.class_name(id));
        let _enter = span.enter();

        self.ir_mut(id)?.state = ClassState::ConstInitialized;
        if !self.owns(id) {
            return Ok(());
        }
        self.build_class_constants(id)?;
        self.pending.define.push_back(id);
        Ok(())
    }

    /// Write the built constants into their storage
    pub fn define(&mut self, id: ClassId) -> LowerResult<()> {
        if self.state(id) >= ClassState::Defined {
            return Ok(());
        }
        self.const_init(id)?;
        let span = debug_span!("define", class = %self.class_name(id));
        let _enter = span.enter();

        self.ir_mut(id)?.state = ClassState::Defined;
        if !self.owns(id) {
            return Ok(());
        }

        let ir = self.ir_mut(id)?;
        let consts = std::mem::take(&mut ir.consts);
        let globals = ir.globals.clone();

        let slots = [
            (globals.descriptor, consts.descriptor),
            (globals.vtbl, consts.vtbl),
            (globals.init, consts.init),
            (globals.interface_infos, consts.interface_infos),
        ];
        for (global, constant) in slots {
            if let (Some(global), Some(constant)) = (global, constant) {
                self.module.set_initializer(global, constant)?;
            }
        }
        for (global, constant) in consts
            .interface_vtbls
            .into_iter()
            .chain(consts.offset_type_info)
        {
            self.module.set_initializer(global, constant)?;
        }
        Ok(())
    }

    /// Run every phase for one class, then finish whatever it queued.
    /// Classes first reached through its fields or methods end up defined
    /// (or declared, when foreign) as well.
    pub fn force_define(&mut self, id: ClassId) -> LowerResult<()> {
        self.define(id)?;
        self.drain_pending()
    }

    /// Process queued phase requests until none remain
    pub fn drain_pending(&mut self) -> LowerResult<()> {
        loop {
            if let Some(id) = self.pending.declare.pop_front() {
                self.declare(id)?;
            } else if let Some(id) = self.pending.const_init.pop_front() {
                self.const_init(id)?;
            } else if let Some(id) = self.pending.define.pop_front() {
                self.define(id)?;
            } else {
                return Ok(());
            }
        }
    }

    /// Lower a set of classes and everything they pull in
    pub fn lower_classes(&mut self, ids: &[ClassId]) -> LowerResult<()> {
        for &id in ids {
            self.resolve(id)?;
        }
        self.drain_pending()
    }
}
