//! Runtime type descriptors
//!
//! Every class and interface gets a descriptor record, the reflection data
//! consumed by the runtime for allocation, casts, scanning and
//! destruction. Concrete classes additionally get a vtable, a static
//! default image and, if they implement interfaces, an interface metadata
//! array plus one vtable per interface.
//!
//! Descriptor record layout:
//!
//! | # | field                         | type                         |
//! |---|-------------------------------|------------------------------|
//! | 0 | descriptor vtable             | `i8**`                       |
//! | 1 | sync handle                   | `i8*`                        |
//! | 2 | default image                 | `{ usize, i8* }`             |
//! | 3 | name                          | `{ usize, i8* }`             |
//! | 4 | vtable                        | `{ usize, i8** }`            |
//! | 5 | interface metadata            | `{ usize, Interface* }`      |
//! | 6 | base descriptor               | `ClassInfo*`                 |
//! | 7 | destructor                    | `i8*`                        |
//! | 8 | invariant (reserved)          | `i8*`                        |
//! | 9 | flags                         | `i32`                        |
//! | 10| allocator (reserved)          | `i8*`                        |
//! | 11| field offsets and type infos  | `{ usize, OffTi* }`          |
//! | 12| default constructor           | `i8*`                        |
//!
//! Interface metadata record: `{ ClassInfo*, { usize, i8** }, usize }`
//! (interface descriptor, interface vtable, byte offset of the interface
//! pointer inside the object).

use ferrule_ir::{Constant, FuncRef, FunctionBuilder, IrType, Linkage, Operand, TypeId};
use tracing::{debug, trace};

use super::{ClassConsts, ClassGlobals, ClassLowering, InterfaceEntry, HEADER_SLOTS};
use crate::decl::{ClassDecl, ClassId};
use crate::error::{LowerError, LowerResult};
use crate::layout::{Aggregate, FieldKey};
use crate::mangle::{
    descriptor_symbol, destructor_symbol, init_symbol, interface_infos_symbol,
    interface_vtbl_symbol, offset_type_info_symbol, type_info_symbol, vtbl_symbol,
};

/// Field indices of the descriptor record
pub struct DescriptorField;

impl DescriptorField {
    pub const VTABLE: usize = 0;
    pub const SYNC: usize = 1;
    pub const INIT: usize = 2;
    pub const NAME: usize = 3;
    pub const VTBL: usize = 4;
    pub const INTERFACES: usize = 5;
    pub const BASE: usize = 6;
    pub const DESTRUCTOR: usize = 7;
    pub const INVARIANT: usize = 8;
    pub const FLAGS: usize = 9;
    pub const ALLOCATOR: usize = 10;
    pub const OFFSET_TYPE_INFO: usize = 11;
    pub const DEFAULT_CTOR: usize = 12;

    /// Interface metadata: interface descriptor
    pub const INFO_DESCRIPTOR: usize = 0;
    /// Interface metadata: `{ len, vtable }`
    pub const INFO_VTBL: usize = 1;
    /// Interface metadata: byte offset of the interface pointer
    pub const INFO_OFFSET: usize = 2;
}

/// Bits of the descriptor flags word
pub struct ClassFlags;

impl ClassFlags {
    /// No field holds a traceable reference
    pub const NO_POINTERS: i32 = 0x2;
    /// Field offset table is present
    pub const HAS_OFF_TI: i32 = 0x4;
    /// Class declares a constructor
    pub const HAS_CTOR: i32 = 0x8;
    pub const IS_ABSTRACT: i32 = 0x40;
}

/// IR types shared by every descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorTypes {
    pub record: TypeId,
    pub interface_info: TypeId,
    pub offset_type_info: TypeId,
    /// `{ usize, i8* }`
    pub byte_span: TypeId,
    /// `{ usize, i8** }`
    pub fn_span: TypeId,
    /// `{ usize, Interface* }`
    pub info_span: TypeId,
    /// `{ usize, OffTi* }`
    pub offti_span: TypeId,
}

/// Name stored in the descriptor
pub fn display_name(decl: &ClassDecl) -> String {
    if decl.name.starts_with("TypeInfo_") {
        decl.name.clone()
    } else {
        decl.qualified_name()
    }
}

impl<'a> ClassLowering<'a> {
    /// Descriptor types, built once per module.
    ///
    /// The record refers to itself through the base-descriptor field and to
    /// the interface metadata record, which refers back to it, so both start
    /// as placeholders.
    pub fn descriptor_types(&mut self) -> LowerResult<DescriptorTypes> {
        if let Some(types) = self.descriptor_types {
            return Ok(types);
        }
        let size_t = self.module.target.size_type(&mut self.module.types);
        let types = &mut self.module.types;

        let byte_ptr = types.byte_ptr();
        let fn_table = types.ptr(byte_ptr);
        let i32 = types.i32();

        let record = types.opaque();
        types.set_name(record, "ferrule.ClassInfo");
        let record_ptr = types.ptr(record);

        let interface_info = types.opaque();
        types.set_name(interface_info, "ferrule.Interface");
        let fn_span = types.struct_of(vec![size_t, fn_table]);
        types.refine(
            interface_info,
            IrType::Struct(vec![record_ptr, fn_span, size_t]),
        )?;

        let offset_type_info = types.struct_of(vec![size_t, byte_ptr]);
        let byte_span = types.struct_of(vec![size_t, byte_ptr]);
        let info_ptr = types.ptr(interface_info);
        let info_span = types.struct_of(vec![size_t, info_ptr]);
        let offti_ptr = types.ptr(offset_type_info);
        let offti_span = types.struct_of(vec![size_t, offti_ptr]);

        types.refine(
            record,
            IrType::Struct(vec![
                fn_table,   // descriptor vtable
                byte_ptr,   // sync
                byte_span,  // default image
                byte_span,  // name
                fn_span,    // vtable
                info_span,  // interfaces
                record_ptr, // base
                byte_ptr,   // destructor
                byte_ptr,   // invariant
                i32,        // flags
                byte_ptr,   // allocator
                offti_span, // offset / type info
                byte_ptr,   // default constructor
            ]),
        )?;

        let result = DescriptorTypes {
            record,
            interface_info,
            offset_type_info,
            byte_span,
            fn_span,
            info_span,
            offti_span,
        };
        self.descriptor_types = Some(result);
        Ok(result)
    }

    /// Descriptor global of a class, declaring the class if needed
    pub fn descriptor_ref(&mut self, id: ClassId) -> LowerResult<Constant> {
        self.declare(id)?;
        let global = self
            .ir(id)?
            .globals
            .descriptor
            .ok_or_else(|| self.unresolved(id))?;
        Ok(self.module.global_ref(global))
    }

    // ========================================================================
    // Declare
    // ========================================================================

    pub(super) fn declare_class_globals(&mut self, id: ClassId) -> LowerResult<()> {
        let decls = self.decls;
        let decl = decls.class(id);
        let desc = self.descriptor_types()?;
        let ir = self.ir(id)?;
        let mangled = ir.mangled.clone();
        let vtbl_type = ir.vtbl_type;
        let composite = ir.composite;
        let mut entries = ir.interfaces.clone();

        let mut globals = ClassGlobals {
            descriptor: Some(self.module.declare_global(
                &descriptor_symbol(&mangled, decl.is_interface()),
                desc.record,
                Linkage::External,
                false,
            )?),
            ..ClassGlobals::default()
        };

        if decl.is_concrete() {
            globals.vtbl = Some(self.module.declare_global(
                &vtbl_symbol(&mangled),
                vtbl_type,
                Linkage::External,
                true,
            )?);
            globals.init = Some(self.module.declare_global(
                &init_symbol(&mangled),
                composite,
                Linkage::External,
                true,
            )?);

            if !entries.is_empty() {
                let array = self
                    .module
                    .types
                    .array(desc.interface_info, entries.len() as u64);
                globals.interface_infos = Some(self.module.declare_global(
                    &interface_infos_symbol(&mangled),
                    array,
                    Linkage::External,
                    true,
                )?);
            }
            for entry in &mut entries {
                let iface_mangled = self.ir(entry.iface)?.mangled.clone();
                entry.vtbl = Some(self.module.declare_global(
                    &interface_vtbl_symbol(&mangled, &iface_mangled),
                    entry.vtbl_ty,
                    Linkage::External,
                    true,
                )?);
            }
        }

        debug!(
            class = %decl.qualified_name(),
            concrete = decl.is_concrete(),
            interface_tables = entries.len(),
            "declared class storage"
        );

        let ir = self.ir_mut(id)?;
        ir.globals = globals;
        ir.interfaces = entries;
        Ok(())
    }

    // ========================================================================
    // Const-init
    // ========================================================================

    pub(super) fn build_class_constants(&mut self, id: ClassId) -> LowerResult<()> {
        let concrete = self.decls.class(id).is_concrete();
        let ir = self.ir(id)?;
        let globals = ir.globals.clone();
        let entries = ir.interfaces.clone();

        let mut consts = ClassConsts::default();
        if concrete {
            consts.init = Some(self.build_init_const(id)?);
            consts.vtbl = Some(self.build_vtbl_const(id)?);
            if let Some(infos) = globals.interface_infos {
                for entry in &entries {
                    let vtbl = self.build_interface_vtbl_const(id, entry, infos)?;
                    if let Some(global) = entry.vtbl {
                        consts.interface_vtbls.push((global, vtbl));
                    }
                }
                consts.interface_infos = Some(self.build_interface_infos_const(id, &entries)?);
            }
        }

        let destructor = self.build_destructor(id)?;
        let descriptor = self.build_descriptor_const(id, destructor, &mut consts)?;
        consts.descriptor = Some(descriptor);

        let ir = self.ir_mut(id)?;
        ir.globals.destructor = destructor;
        ir.consts = consts;
        Ok(())
    }

    /// Static default image: `{ vtable, null, field defaults..., interface vtables... }`
    fn build_init_const(&mut self, id: ClassId) -> LowerResult<Constant> {
        let ir = self.ir(id)?;
        let composite = ir.composite;
        let vtbl = ir.globals.vtbl.ok_or_else(|| self.unresolved(id))?;
        let slot_inits: Vec<Constant> = self
            .layout_of(id)?
            .slots
            .iter()
            .map(|s| s.init.clone())
            .collect();
        let iface_vtbls: Vec<Option<ferrule_ir::GlobalId>> =
            ir.interfaces.iter().map(|e| e.vtbl).collect();

        let byte_ptr = self.module.types.byte_ptr();
        let mut fields = vec![self.module.global_ref(vtbl), Constant::Null(byte_ptr)];
        fields.extend(slot_inits);
        for global in iface_vtbls {
            let global = global.ok_or_else(|| self.unresolved(id))?;
            fields.push(self.module.global_ref(global));
        }
        Ok(Constant::Struct {
            ty: composite,
            fields,
        })
    }

    /// Interface metadata array: one record per interface entry
    fn build_interface_infos_const(
        &mut self,
        id: ClassId,
        entries: &[InterfaceEntry],
    ) -> LowerResult<Constant> {
        let desc = self.descriptor_types()?;
        let composite = self.ir(id)?.composite;
        let object = self
            .module
            .target
            .struct_layout(&self.module.types, composite)?;
        let size_t = self.module.target.size_type(&mut self.module.types);
        let fn_table = {
            let byte_ptr = self.module.types.byte_ptr();
            self.module.types.ptr(byte_ptr)
        };

        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            let iface_desc = self.descriptor_ref(entry.iface)?;
            let vtbl = entry.vtbl.ok_or_else(|| self.unresolved(id))?;
            let vtbl_ref = self.module.global_ref(vtbl).bitcast(fn_table);
            let offset = object
                .element_offset(entry.slot)
                .ok_or_else(|| self.unresolved(id))?;
            trace!(
                class = %self.class_name(id),
                interface = %self.class_name(entry.iface),
                offset,
                "interface metadata"
            );
            infos.push(Constant::Struct {
                ty: desc.interface_info,
                fields: vec![
                    iface_desc,
                    Constant::Struct {
                        ty: desc.fn_span,
                        fields: vec![
                            Constant::Int {
                                ty: size_t,
                                value: entry.impls.len() as i64,
                            },
                            vtbl_ref,
                        ],
                    },
                    Constant::Int {
                        ty: size_t,
                        value: offset as i64,
                    },
                ],
            });
        }

        let ty = self
            .module
            .types
            .array(desc.interface_info, entries.len() as u64);
        Ok(Constant::Array { ty, elems: infos })
    }

    /// `{ len, ptr }` constant of a span type
    fn span(&mut self, span_ty: TypeId, len: u64, ptr: Option<Constant>) -> LowerResult<Constant> {
        let size_t = self.module.types.element_type(span_ty, 0)?;
        let ptr_ty = self.module.types.element_type(span_ty, 1)?;
        let ptr = match ptr {
            Some(c) => c.bitcast(ptr_ty),
            None => Constant::Null(ptr_ty),
        };
        Ok(Constant::Struct {
            ty: span_ty,
            fields: vec![
                Constant::Int {
                    ty: size_t,
                    value: len as i64,
                },
                ptr,
            ],
        })
    }

    fn build_descriptor_const(
        &mut self,
        id: ClassId,
        destructor: Option<FuncRef>,
        consts: &mut ClassConsts,
    ) -> LowerResult<Constant> {
        let decls = self.decls;
        let decl = decls.class(id);
        let desc = self.descriptor_types()?;
        let byte_ptr = self.module.types.byte_ptr();
        let record_ptr = self.module.types.ptr(desc.record);
        let ir = self.ir(id)?;
        let globals = ir.globals.clone();
        let vtbl_len = ir.mro.len() as u64;
        let iface_count = ir.interfaces.len() as u64;
        let composite = ir.composite;

        let desc_vtbl_symbol = self.options.runtime.descriptor_vtable.clone();
        let desc_vtbl =
            self.module
                .declare_global(&desc_vtbl_symbol, byte_ptr, Linkage::External, true)?;
        let own_vtbl = self.module.global_ref(desc_vtbl);

        // Only concrete classes have storage behind these spans
        let init = match globals.init {
            Some(init) => {
                let size = self
                    .module
                    .target
                    .size_of(&self.module.types, composite)?;
                let init_ref = self.module.global_ref(init);
                self.span(desc.byte_span, size, Some(init_ref))?
            }
            None => self.span(desc.byte_span, 0, None)?,
        };
        let vtbl = match globals.vtbl {
            Some(vtbl) => {
                let vtbl_ref = self.module.global_ref(vtbl);
                self.span(desc.fn_span, vtbl_len, Some(vtbl_ref))?
            }
            None => self.span(desc.fn_span, 0, None)?,
        };
        let interfaces = match globals.interface_infos {
            Some(infos) => {
                let infos_ref = self.module.global_ref(infos);
                self.span(desc.info_span, iface_count, Some(infos_ref))?
            }
            None => self.span(desc.info_span, 0, None)?,
        };

        let name = display_name(decl);
        let (name_global, name_len) = self.module.add_string(&name)?;
        let name_ref = self.module.global_ref(name_global);
        let name = self.span(desc.byte_span, name_len, Some(name_ref))?;

        let base = match decl.base {
            Some(base) if !decl.is_interface() => self.descriptor_ref(base)?,
            _ => Constant::Null(record_ptr),
        };

        let dtor = match destructor {
            Some(f) => self.module.function_ref(f).bitcast(byte_ptr),
            None => Constant::Null(byte_ptr),
        };

        let (offti, has_offti) = self.build_offset_type_info(id, consts)?;
        let flags = self.class_flags(id, has_offti);

        let default_ctor = match decl.default_ctor {
            Some(f) => self.func_ref(f)?.bitcast(byte_ptr),
            None => Constant::Null(byte_ptr),
        };

        let i32 = self.module.types.i32();
        Ok(Constant::Struct {
            ty: desc.record,
            fields: vec![
                own_vtbl,
                Constant::Null(byte_ptr),
                init,
                name,
                vtbl,
                interfaces,
                base,
                dtor,
                Constant::Null(byte_ptr),
                Constant::Int {
                    ty: i32,
                    value: i64::from(flags),
                },
                Constant::Null(byte_ptr),
                offti,
                default_ctor,
            ],
        })
    }

    fn class_flags(&self, id: ClassId, has_offti: bool) -> i32 {
        let decls = self.decls;
        let decl = decls.class(id);

        let mut flags = 0;
        if !decl.ctors.is_empty() {
            flags |= ClassFlags::HAS_CTOR;
        }
        let traced = decls.base_chain(id).into_iter().any(|c| {
            let class = decls.class(c);
            class.is_nested || class.fields.iter().any(|f| f.ty.has_pointers(decls))
        });
        if !traced {
            flags |= ClassFlags::NO_POINTERS;
        }
        if has_offti {
            flags |= ClassFlags::HAS_OFF_TI;
        }
        if decl.is_abstract {
            flags |= ClassFlags::IS_ABSTRACT;
        }
        flags
    }

    /// Field offset table over the whole inheritance chain, own fields first.
    /// Offsets are read from the finalized composite layout. The table's
    /// initializer is queued in `consts` and written at definition.
    fn build_offset_type_info(
        &mut self,
        id: ClassId,
        consts: &mut ClassConsts,
    ) -> LowerResult<(Constant, bool)> {
        let desc = self.descriptor_types()?;
        if !self.options.emit_offset_type_info || self.decls.class(id).is_interface() {
            return Ok((self.span(desc.offti_span, 0, None)?, false));
        }

        let decls = self.decls;
        let ir = self.ir(id)?;
        let composite = ir.composite;
        let mangled = ir.mangled.clone();
        let layout = self.layout_of(id)?.clone();
        let object = self
            .module
            .target
            .struct_layout(&self.module.types, composite)?;

        let mut rows = Vec::new();
        for class in decls.base_chain(id) {
            for (index, field) in decls.class(class).fields.iter().enumerate() {
                let key = FieldKey {
                    owner: Aggregate::Class(class),
                    index,
                };
                let placed = layout.field(key).ok_or_else(|| LowerError::OffsetNotFound {
                    class: self.class_name(id),
                    offset: field.offset,
                })?;
                let base = object
                    .element_offset(HEADER_SLOTS + placed.slot.slot)
                    .ok_or_else(|| LowerError::OffsetNotFound {
                        class: self.class_name(id),
                        offset: field.offset,
                    })?;
                rows.push((base + placed.slot.micro_offset * placed.size, &field.ty));
            }
        }
        if rows.is_empty() {
            return Ok((self.span(desc.offti_span, 0, None)?, false));
        }

        let size_t = self.module.target.size_type(&mut self.module.types);
        let i8 = self.module.types.i8();
        let byte_ptr = self.module.types.byte_ptr();
        let mut entries = Vec::with_capacity(rows.len());
        for (offset, ty) in rows {
            let symbol = type_info_symbol(decls, ty);
            let type_info = self
                .module
                .declare_global(&symbol, i8, Linkage::External, true)?;
            entries.push(Constant::Struct {
                ty: desc.offset_type_info,
                fields: vec![
                    Constant::Int {
                        ty: size_t,
                        value: offset as i64,
                    },
                    self.module.global_ref(type_info).bitcast(byte_ptr),
                ],
            });
        }

        let count = entries.len() as u64;
        let array = self.module.types.array(desc.offset_type_info, count);
        let global = self.module.declare_global(
            &offset_type_info_symbol(&mangled),
            array,
            Linkage::Internal,
            true,
        )?;
        consts.offset_type_info = Some((
            global,
            Constant::Array {
                ty: array,
                elems: entries,
            },
        ));
        let table = self.module.global_ref(global);
        Ok((self.span(desc.offti_span, count, Some(table))?, true))
    }

    /// Destructor referenced by the descriptor: the single destructor, or a
    /// synthesized function calling each destructor of this tier in order.
    /// The runtime walks base descriptors for the base tiers.
    fn build_destructor(&mut self, id: ClassId) -> LowerResult<Option<FuncRef>> {
        let decls = self.decls;
        let dtors = &decls.class(id).dtors;
        match dtors.as_slice() {
            [] => Ok(None),
            [single] => {
                let ty = self.func_type(*single)?;
                let symbol = &decls.func(*single).symbol;
                Ok(Some(
                    self.module
                        .declare_function(symbol, ty, Linkage::External)?,
                ))
            }
            _ => {
                let this_ty = self.class_ref_type(id);
                let void = self.module.types.void();
                let fn_ty = self.module.types.function(void, vec![this_ty]);
                let symbol = destructor_symbol(&self.ir(id)?.mangled);
                let thunk = self
                    .module
                    .declare_function(&symbol, fn_ty, Linkage::Internal)?;

                let mut builder = FunctionBuilder::new(&self.module.types, fn_ty)?;
                let this = Operand::Value(builder.params()[0]);
                self.emit_tier_destructors(&mut builder, id, this)?;
                builder.ret(None);
                self.module.define_function(thunk, builder.finish());
                trace!(class = %self.class_name(id), count = dtors.len(), "destructor thunk");
                Ok(Some(thunk))
            }
        }
    }

    /// Call every destructor declared by `id` itself, in declaration order
    pub(super) fn emit_tier_destructors(
        &mut self,
        builder: &mut FunctionBuilder,
        id: ClassId,
        this: Operand,
    ) -> LowerResult<()> {
        let decls = self.decls;
        let owner_ty = self.class_ref_type(id);
        for &dtor in &decls.class(id).dtors {
            let callee = self.func_ref(dtor)?;
            let arg = builder.bitcast(this.clone(), owner_ty);
            builder.call(&self.module.types, callee, vec![arg])?;
        }
        Ok(())
    }
}
