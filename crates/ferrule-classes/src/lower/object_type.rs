//! Object type builder
//!
//! The composite type of a class is
//!
//! ```text
//! { vtable*, sync, data slots..., interface vtable*... }
//! ```
//!
//! The enclosing-context pointer of a nested class is a data slot placed
//! right after the inherited fields. Subclasses inherit it like any other
//! field, so it sits at the same index in every class of the chain.
//!
//! and of an interface the single-slot record `{ vtable* }` that an
//! interface reference points at. Both are created as named placeholders
//! the first time anything refers to the class and refined once the
//! layout is known.

use ferrule_ir::{Constant, IrType};
use tracing::{debug, trace};

use super::{ClassConsts, ClassGlobals, ClassIr, ClassLowering, ClassState, HEADER_SLOTS};
use crate::decl::ClassId;
use crate::error::{LowerError, LowerResult};
use crate::layout::{resolve_layout, Aggregate, FieldKey, LayoutInput, StructLayout};
use crate::mangle::{mangle_qualified, vtbl_type_name};

impl<'a> ClassLowering<'a> {
    /// Install the named placeholder types of a class; returns the composite
    pub(super) fn ensure_placeholder(&mut self, id: ClassId) -> ferrule_ir::TypeId {
        if let Some(ir) = self.classes.get(&id) {
            return ir.composite;
        }
        let decl = self.decls.class(id);
        let mangled = mangle_qualified(&decl.module, &decl.name);

        let types = &mut self.module.types;
        let composite = types.opaque();
        types.set_name(composite, mangled.clone());
        let vtbl_type = types.opaque();
        types.set_name(vtbl_type, vtbl_type_name(&mangled));

        self.classes.insert(
            id,
            ClassIr {
                state: ClassState::Unresolved,
                mangled,
                composite,
                vtbl_type,
                layout: None,
                mro: Vec::new(),
                interfaces: Vec::new(),
                context_slot: None,
                globals: ClassGlobals::default(),
                consts: ClassConsts::default(),
            },
        );
        composite
    }

    /// Body of the resolve phase
    pub(super) fn resolve_class(&mut self, id: ClassId) -> LowerResult<()> {
        let decls = self.decls;
        let decl = decls.class(id);
        let name = decl.qualified_name();

        if let Some(base) = decl.base {
            self.resolve(base)?;
            self.layout_of(base)?;
        }
        for &iface in &decl.interfaces {
            self.resolve(iface)?;
        }

        let layout = if decl.is_interface() {
            StructLayout::default()
        } else {
            self.resolve_class_layout(id)?
        };

        let mro = self.compute_mro(id)?;
        let vtbl_fields = self.vtbl_slot_types(id, &mro)?;
        let vtbl_type = self.ir(id)?.vtbl_type;
        self.module
            .types
            .refine(vtbl_type, IrType::Struct(vtbl_fields))?;
        self.ir_mut(id)?.mro = mro;

        let mut fields = Vec::new();
        let vtbl_ptr = self.module.types.ptr(vtbl_type);
        fields.push(vtbl_ptr);

        let mut interfaces = Vec::new();
        if !decl.is_interface() {
            fields.push(self.module.types.byte_ptr());
            fields.extend(layout.slot_types());

            interfaces = self.build_interface_entries(id, fields.len())?;
            for entry in &interfaces {
                fields.push(self.module.types.ptr(entry.vtbl_ty));
            }
        }
        let context_slot = layout
            .fields
            .iter()
            .find(|f| matches!(f.key.owner, Aggregate::Context(_)))
            .map(|f| HEADER_SLOTS + f.slot.slot);

        let composite = self.ir(id)?.composite;
        self.module
            .types
            .refine(composite, IrType::Struct(fields.clone()))?;

        debug!(
            class = %name,
            slots = fields.len(),
            data_slots = layout.slots.len(),
            interfaces = interfaces.len(),
            unions = layout.has_unions,
            "resolved composite type"
        );

        let ir = self.ir_mut(id)?;
        ir.layout = Some(layout);
        ir.interfaces = interfaces;
        ir.context_slot = context_slot;
        Ok(())
    }

    /// Merge inherited and own fields into one layout
    fn resolve_class_layout(&mut self, id: ClassId) -> LowerResult<StructLayout> {
        let decls = self.decls;
        let decl = decls.class(id);
        let target = self.module.target;
        let ptr_size = target.pointer_size();
        let start = HEADER_SLOTS as u64 * ptr_size;

        let mut inputs = Vec::new();
        let mut inherited_end = start;
        let mut has_context = false;
        if let Some(base) = decl.base {
            for field in &self.layout_of(base)?.fields {
                inherited_end = inherited_end.max(field.offset + field.size);
                has_context |= matches!(field.key.owner, Aggregate::Context(_));
                inputs.push(LayoutInput {
                    key: field.key,
                    offset: field.offset,
                    ty: field.ty,
                    init: field.init.clone(),
                });
            }
        }
        let mut own = Vec::with_capacity(decl.fields.len());
        for (index, field) in decl.fields.iter().enumerate() {
            let ty = self.ir_type(&field.ty)?;
            let init = self.default_value(&field.ty, field.init, ty)?;
            own.push(LayoutInput {
                key: FieldKey {
                    owner: Aggregate::Class(id),
                    index,
                },
                offset: field.offset,
                ty,
                init,
            });
        }

        if decl.is_nested && !has_context {
            let context = inherited_end.div_ceil(ptr_size) * ptr_size;
            for input in &own {
                let size = target.size_of(&self.module.types, input.ty)?;
                if input.offset < context + ptr_size && context < input.offset + size {
                    return Err(LowerError::ContextOverlap {
                        class: decl.qualified_name(),
                        offset: input.offset,
                        context,
                    });
                }
            }
            trace!(class = %decl.qualified_name(), offset = context, "enclosing context slot");
            let byte_ptr = self.module.types.byte_ptr();
            inputs.push(LayoutInput {
                key: FieldKey {
                    owner: Aggregate::Context(id),
                    index: 0,
                },
                offset: context,
                ty: byte_ptr,
                init: Constant::Null(byte_ptr),
            });
        }
        inputs.extend(own);

        resolve_layout(
            &decl.qualified_name(),
            start,
            inputs,
            &mut self.module.types,
            &target,
        )
    }

    /// Composite size in bytes of a resolved class
    pub fn instance_size(&self, id: ClassId) -> LowerResult<u64> {
        let composite = self.ir(id)?.composite;
        Ok(self.module.target.size_of(&self.module.types, composite)?)
    }
}
