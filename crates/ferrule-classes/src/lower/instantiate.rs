//! Instantiation protocol
//!
//! `new C(args)` lowers to: allocate (frame slot or runtime call), write
//! the vtable pointer, clear the sync handle, copy the remaining bytes from
//! the static default image, store the enclosing context of nested classes,
//! then call the designated constructor if arguments were given.

use ferrule_ir::{Constant, FunctionBuilder, Module, Operand};
use tracing::debug;

use super::typemap::coerce;
use super::{ClassLowering, RuntimeFn, HEADER_SLOTS};
use crate::decl::{ClassId, ExprId, FuncId, SourceType};
use crate::error::{LowerError, LowerResult};

/// Lowering of individual expressions, provided by the caller
pub trait ValueLowering {
    /// Lower `expr` to a value of source type `ty`
    fn lower_expr(
        &mut self,
        module: &mut Module,
        builder: &mut FunctionBuilder,
        expr: ExprId,
        ty: &SourceType,
    ) -> LowerResult<Operand>;
}

/// A `new` expression
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpr {
    pub class: ClassId,
    /// Allocate in the current frame instead of on the heap
    pub on_stack: bool,
    /// Explicit enclosing instance (`outer.new Inner()`)
    pub outer: Option<ExprId>,
    pub ctor: Option<FuncId>,
    pub args: Vec<ExprId>,
}

impl NewExpr {
    pub fn heap(class: ClassId) -> Self {
        Self {
            class,
            on_stack: false,
            outer: None,
            ctor: None,
            args: Vec::new(),
        }
    }
}

/// Context of the function containing the `new` expression
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnclosingFunction {
    /// Frame context handed to nested constructs
    pub nested_context: Option<Operand>,
    /// `this` of a member function
    pub this: Option<Operand>,
}

impl<'a> ClassLowering<'a> {
    /// Emit a `new` expression; returns the class reference
    pub fn new_instance(
        &mut self,
        builder: &mut FunctionBuilder,
        values: &mut dyn ValueLowering,
        expr: &NewExpr,
        enclosing: &EnclosingFunction,
    ) -> LowerResult<Operand> {
        let decls = self.decls;
        let id = expr.class;
        if !decls.class(id).is_concrete() {
            return Err(LowerError::AbstractInstantiation {
                class: self.class_name(id),
            });
        }
        self.declare(id)?;

        let ir = self.ir(id)?;
        let composite = ir.composite;
        let context_slot = ir.context_slot;
        let vtbl = ir.globals.vtbl.ok_or_else(|| self.unresolved(id))?;
        let init = ir.globals.init.ok_or_else(|| self.unresolved(id))?;
        let class_ty = self.module.types.ptr(composite);
        let byte_ptr = self.module.types.byte_ptr();

        let instance = if expr.on_stack {
            Operand::Value(builder.alloca(&mut self.module.types, composite))
        } else {
            let allocate = self.runtime_fn(RuntimeFn::AllocateInstance)?;
            let descriptor = self.descriptor_ref(id)?;
            let raw = builder.call_value(&self.module.types, allocate, vec![descriptor.into()])?;
            builder.bitcast(raw, class_ty)
        };

        // Header
        let vptr = builder.field_addr(&mut self.module.types, instance.clone(), &[0, 0])?;
        builder.store(self.module.global_ref(vtbl), vptr);
        let sync = builder.field_addr(&mut self.module.types, instance.clone(), &[0, 1])?;
        builder.store(Constant::Null(byte_ptr), sync);

        // Everything after the header comes from the default image
        let object = self
            .module
            .target
            .struct_layout(&self.module.types, composite)?;
        if let Some(header) = object.element_offset(HEADER_SLOTS) {
            let len = object.size - header;
            let first = self
                .module
                .types
                .element_type(composite, HEADER_SLOTS as u64)?;
            let first_ptr = self.module.types.ptr(first);
            let dst = builder.field_addr(
                &mut self.module.types,
                instance.clone(),
                &[0, HEADER_SLOTS as u64],
            )?;
            let dst = builder.bitcast(dst, byte_ptr);
            let src = Constant::ElementAddr {
                global: init,
                indices: vec![0, HEADER_SLOTS as u64],
                ty: first_ptr,
            }
            .bitcast(byte_ptr);
            builder.memcpy(dst, src, len);
        }

        if let Some(slot) = context_slot {
            let context = match expr.outer {
                Some(outer) => values.lower_expr(
                    &mut self.module,
                    builder,
                    outer,
                    &SourceType::pointer_to(SourceType::Void),
                )?,
                None => enclosing
                    .nested_context
                    .clone()
                    .or_else(|| enclosing.this.clone())
                    .ok_or_else(|| LowerError::MissingContext {
                        class: self.class_name(id),
                    })?,
            };
            let context = builder.bitcast(context, byte_ptr);
            let addr = builder.field_addr(&mut self.module.types, instance.clone(), &[0, slot as u64])?;
            builder.store(context, addr);
        }

        debug!(
            class = %self.class_name(id),
            on_stack = expr.on_stack,
            args = expr.args.len(),
            "new instance"
        );

        if expr.args.is_empty() {
            return Ok(instance);
        }
        let ctor = expr.ctor.ok_or_else(|| LowerError::MissingConstructor {
            class: self.class_name(id),
        })?;
        self.call_constructor(builder, values, ctor, instance, &expr.args, class_ty)
    }

    fn call_constructor(
        &mut self,
        builder: &mut FunctionBuilder,
        values: &mut dyn ValueLowering,
        ctor: FuncId,
        instance: Operand,
        args: &[ExprId],
        class_ty: ferrule_ir::TypeId,
    ) -> LowerResult<Operand> {
        let decls = self.decls;
        let ctor_decl = decls.func(ctor);
        let callee = self.func_ref(ctor)?;

        let mut call_args = Vec::with_capacity(args.len() + 1);
        if let Some(owner) = ctor_decl.owner {
            let this_ty = self.class_ref_type(owner);
            call_args.push(builder.bitcast(instance.clone(), this_ty));
        }
        for (&arg, param) in args.iter().zip(&ctor_decl.params) {
            let value = values.lower_expr(&mut self.module, builder, arg, param)?;
            let ty = self.ir_type(param)?;
            call_args.push(coerce(&self.module.types, builder, value, ty));
        }

        match builder.call(&self.module.types, callee, call_args)? {
            Some(result) => Ok(builder.bitcast(result, class_ty)),
            None => Ok(instance),
        }
    }

    /// Run every destructor of `id` and its bases on `this`, most derived first
    pub fn call_destructors(
        &mut self,
        builder: &mut FunctionBuilder,
        id: ClassId,
        this: Operand,
    ) -> LowerResult<()> {
        for class in self.decls.base_chain(id) {
            self.emit_tier_destructors(builder, class, this.clone())?;
        }
        Ok(())
    }
}
