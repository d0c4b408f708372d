//! Field indexing
//!
//! Maps a frontend byte offset plus field type to an address inside an
//! object or value struct. Offsets are resolved against the cached
//! `StructLayout`: an exact match addresses the data slot (adjusted by the
//! union micro-offset where needed), an offset inside a nested value
//! struct recurses into that struct's layout, and anything else falls back
//! to aligned element arithmetic from the containing field.

use ferrule_ir::{FunctionBuilder, Operand, TypeId, TypeTable};
use tracing::trace;

use super::{ClassLowering, HEADER_SLOTS};
use crate::decl::{ClassId, SourceType, StructId};
use crate::error::{LowerError, LowerResult};
use crate::layout::{Aggregate, FieldKey, LayoutField, StructLayout};

/// A pointer described as base + byte delta, read as a `target`
///
/// `byte_delta` is a multiple of `elem_size` except for union members,
/// where it is the member's micro-offset scaled by its own size.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedOffset {
    pub base: Operand,
    pub byte_delta: u64,
    pub target: TypeId,
    pub elem_size: u64,
}

impl TypedOffset {
    pub fn aligned(
        base: Operand,
        byte_delta: u64,
        target: TypeId,
        elem_size: u64,
    ) -> LowerResult<Self> {
        if elem_size == 0 || byte_delta % elem_size != 0 {
            return Err(LowerError::MisalignedOffset {
                offset: byte_delta,
                element_size: elem_size,
            });
        }
        Ok(Self {
            base,
            byte_delta,
            target,
            elem_size,
        })
    }

    /// Member `micro` elements into a union slot
    pub fn union_member(base: Operand, micro: u64, target: TypeId, elem_size: u64) -> Self {
        Self {
            base,
            byte_delta: micro * elem_size,
            target,
            elem_size,
        }
    }

    /// Delta in units of the target type
    pub fn index(&self) -> i64 {
        if self.elem_size == 0 {
            0
        } else {
            (self.byte_delta / self.elem_size) as i64
        }
    }

    pub fn emit(&self, types: &mut TypeTable, builder: &mut FunctionBuilder) -> LowerResult<Operand> {
        let ptr = types.ptr(self.target);
        let retyped = builder.bitcast(self.base.clone(), ptr);
        match self.index() {
            0 => Ok(retyped),
            index => Ok(Operand::Value(builder.element_offset(types, retyped, index)?)),
        }
    }
}

/// Aggregate being indexed
#[derive(Clone, Copy)]
struct Scope {
    /// Composite slots before the first data slot
    header: usize,
    owner: Aggregate,
}

impl<'a> ClassLowering<'a> {
    /// Composite index and micro-offset of the field of `class` at `offset`
    /// with IR type `ty`
    pub fn field_slot(&self, class: ClassId, offset: u64, ty: TypeId) -> LowerResult<(usize, u64)> {
        let layout = self.layout_of(class)?;
        let field = layout
            .field_at(offset, ty)
            .ok_or_else(|| LowerError::OffsetNotFound {
                class: self.class_name(class),
                offset,
            })?;
        Ok((HEADER_SLOTS + field.slot.slot, field.slot.micro_offset))
    }

    /// Address of the field of type `ty` at byte `offset` of an instance
    pub fn index_class(
        &mut self,
        builder: &mut FunctionBuilder,
        this: Operand,
        class: ClassId,
        offset: u64,
        ty: &SourceType,
    ) -> LowerResult<Operand> {
        self.resolve(class)?;
        let layout = self.layout_of(class)?.clone();
        let class_ty = self.class_ref_type(class);
        let base = builder.bitcast(this, class_ty);
        let scope = Scope {
            header: HEADER_SLOTS,
            owner: Aggregate::Class(class),
        };
        self.index_layout(builder, base, &layout, scope, offset, ty)
    }

    /// Address of the field of type `ty` at byte `offset` of a value struct
    pub fn index_struct(
        &mut self,
        builder: &mut FunctionBuilder,
        base: Operand,
        strukt: StructId,
        offset: u64,
        ty: &SourceType,
    ) -> LowerResult<Operand> {
        let struct_ty = self.struct_type(strukt)?;
        let layout = match self.structs.get(&strukt) {
            Some(ir) => ir.layout.clone(),
            None => StructLayout::default(),
        };
        let ptr = self.module.types.ptr(struct_ty);
        let base = builder.bitcast(base, ptr);
        let scope = Scope {
            header: 0,
            owner: Aggregate::Struct(strukt),
        };
        self.index_layout(builder, base, &layout, scope, offset, ty)
    }

    fn index_layout(
        &mut self,
        builder: &mut FunctionBuilder,
        base: Operand,
        layout: &StructLayout,
        scope: Scope,
        offset: u64,
        ty: &SourceType,
    ) -> LowerResult<Operand> {
        let target = self.ir_type(ty)?;

        if let Some(field) = layout.field_at(offset, target) {
            return self.slot_address(builder, base, layout, scope, field);
        }

        let Some(field) = layout.field_containing(offset) else {
            return Err(self.offset_not_found(scope, offset));
        };
        let container = self.slot_address(builder, base, layout, scope, field)?;
        let delta = offset - field.offset;

        if let Some(SourceType::Struct(inner)) = self.field_source_type(field.key) {
            trace!(offset, delta, "recurse into nested struct");
            return self.index_struct(builder, container, *inner, delta, ty);
        }

        let elem_size = self.module.target.size_of(&self.module.types, target)?;
        let typed = TypedOffset::aligned(container, delta, target, elem_size)?;
        typed.emit(&mut self.module.types, builder)
    }

    /// Address of a resolved field, retyped when it does not own its slot
    fn slot_address(
        &mut self,
        builder: &mut FunctionBuilder,
        base: Operand,
        layout: &StructLayout,
        scope: Scope,
        field: &LayoutField,
    ) -> LowerResult<Operand> {
        let index = (scope.header + field.slot.slot) as u64;
        let addr = Operand::Value(builder.field_addr(&mut self.module.types, base, &[0, index])?);

        let slot_ty = layout
            .slots
            .get(field.slot.slot)
            .map(|s| s.ty)
            .ok_or_else(|| self.offset_not_found(scope, field.offset))?;
        if slot_ty == field.ty && field.slot.micro_offset == 0 {
            return Ok(addr);
        }
        TypedOffset::union_member(addr, field.slot.micro_offset, field.ty, field.size)
            .emit(&mut self.module.types, builder)
    }

    /// Declared type of a field; the context slot has none
    fn field_source_type(&self, key: FieldKey) -> Option<&'a SourceType> {
        let decls = self.decls;
        match key.owner {
            Aggregate::Class(c) => Some(&decls.class(c).fields[key.index].ty),
            Aggregate::Struct(s) => Some(&decls.strukt(s).fields[key.index].ty),
            Aggregate::Context(_) => None,
        }
    }

    fn offset_not_found(&self, scope: Scope, offset: u64) -> LowerError {
        let class = match scope.owner {
            Aggregate::Class(c) | Aggregate::Context(c) => self.class_name(c),
            Aggregate::Struct(s) => self.decls.strukt(s).qualified_name(),
        };
        LowerError::OffsetNotFound { class, offset }
    }
}
