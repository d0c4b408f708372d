//! Source type to IR type mapping, default values and value coercion

use ferrule_ir::{CastKind, Constant, FunctionBuilder, IrType, Operand, TypeId, TypeTable};
use tracing::trace;

use super::{ClassLowering, ClassState, StructIr};
use crate::decl::{ClassId, FieldInit, FuncId, SourceType, StructId};
use crate::error::{LowerError, LowerResult};
use crate::layout::{resolve_layout, Aggregate, FieldKey, LayoutInput};
use crate::mangle::mangle_qualified;

impl<'a> ClassLowering<'a> {
    /// IR type of a source type
    pub fn ir_type(&mut self, ty: &SourceType) -> LowerResult<TypeId> {
        Ok(match ty {
            SourceType::Void => self.module.types.void(),
            SourceType::Bool | SourceType::Char | SourceType::Byte => self.module.types.i8(),
            SourceType::Short => self.module.types.int(16),
            SourceType::Int => self.module.types.i32(),
            SourceType::Long => self.module.types.i64(),
            SourceType::Float => self.module.types.f32(),
            SourceType::Double => self.module.types.f64(),
            SourceType::Pointer(inner) => {
                let pointee = match inner.as_ref() {
                    SourceType::Void => self.module.types.i8(),
                    other => self.ir_type(other)?,
                };
                self.module.types.ptr(pointee)
            }
            SourceType::StaticArray(elem, len) => {
                let elem = self.ir_type(elem)?;
                self.module.types.array(elem, *len)
            }
            SourceType::Struct(s) => self.struct_type(*s)?,
            SourceType::Class(c) => self.class_ref_type(*c),
        })
    }

    /// Reference type of a class or interface: pointer to its composite.
    ///
    /// Only the placeholder is needed here, so the referenced class is
    /// queued rather than resolved. This keeps references from a base class
    /// to its own subclasses legal.
    pub fn class_ref_type(&mut self, id: ClassId) -> TypeId {
        let composite = self.ensure_placeholder(id);
        if self.state(id) == ClassState::Unresolved {
            self.pending.declare.push_back(id);
        }
        self.module.types.ptr(composite)
    }

    /// Type of a member function, with the implicit `this` first
    pub fn func_type(&mut self, id: FuncId) -> LowerResult<TypeId> {
        let decls = self.decls;
        let func = decls.func(id);
        let mut params = Vec::with_capacity(func.params.len() + 1);
        if let Some(owner) = func.owner {
            params.push(self.class_ref_type(owner));
        }
        for param in &func.params {
            params.push(self.ir_type(param)?);
        }
        let ret = self.ir_type(&func.ret)?;
        Ok(self.module.types.function(ret, params))
    }

    /// Address of a member function, declaring its symbol on first use
    pub fn func_ref(&mut self, id: FuncId) -> LowerResult<Constant> {
        let ty = self.func_type(id)?;
        let symbol = &self.decls.func(id).symbol;
        let f = self
            .module
            .declare_function(symbol, ty, ferrule_ir::Linkage::External)?;
        Ok(self.module.function_ref(f))
    }

    /// Identified struct type of a value struct, resolving its layout once.
    ///
    /// The named type is registered before the fields are lowered, so a
    /// field pointing back at the struct sees the placeholder.
    pub fn struct_type(&mut self, id: StructId) -> LowerResult<TypeId> {
        if let Some(ir) = self.structs.get(&id) {
            return Ok(ir.ty);
        }
        if let Some(&ty) = self.structs_in_progress.get(&id) {
            return Ok(ty);
        }
        let decls = self.decls;
        let decl = decls.strukt(id);
        let ty = self.module.types.opaque();
        self.module
            .types
            .set_name(ty, mangle_qualified(&decl.module, &decl.name));

        self.structs_in_progress.insert(id, ty);
        let result = self.resolve_struct(id, ty);
        self.structs_in_progress.remove(&id);
        result?;
        Ok(ty)
    }

    fn resolve_struct(&mut self, id: StructId, ty: TypeId) -> LowerResult<()> {
        let decls = self.decls;
        let decl = decls.strukt(id);
        let name = decl.qualified_name();

        let mut inputs = Vec::with_capacity(decl.fields.len());
        for (index, field) in decl.fields.iter().enumerate() {
            let ty = self.ir_type(&field.ty)?;
            let init = self.default_value(&field.ty, field.init, ty)?;
            inputs.push(LayoutInput {
                key: FieldKey {
                    owner: Aggregate::Struct(id),
                    index,
                },
                offset: field.offset,
                ty,
                init,
            });
        }

        let target = self.module.target;
        let layout = resolve_layout(&name, 0, inputs, &mut self.module.types, &target)?;
        self.module
            .types
            .refine(ty, IrType::Struct(layout.slot_types()))?;
        let init = Constant::Struct {
            ty,
            fields: layout.slots.iter().map(|s| s.init.clone()).collect(),
        };
        trace!(name = %name, slots = layout.slots.len(), "resolved struct");

        self.structs.insert(id, StructIr { ty, layout, init });
        Ok(())
    }

    /// Static default value of a field of type `source` (lowered to `ty`)
    pub fn default_value(
        &mut self,
        source: &SourceType,
        init: Option<FieldInit>,
        ty: TypeId,
    ) -> LowerResult<Constant> {
        if let SourceType::Struct(s) = source {
            self.struct_type(*s)?;
            return match self.structs.get(s) {
                Some(ir) => Ok(ir.init.clone()),
                None => Err(LowerError::RecursiveStruct {
                    name: self.decls.strukt(*s).qualified_name(),
                }),
            };
        }

        let types = &self.module.types;
        let constant = match types.get(ty) {
            IrType::Int(_) => {
                let value = match init {
                    Some(FieldInit::Int(v)) => v,
                    Some(FieldInit::Bool(b)) => i64::from(b),
                    Some(FieldInit::Float(f)) => f as i64,
                    Some(FieldInit::Null) | None => 0,
                };
                Constant::Int { ty, value }
            }
            IrType::F32 | IrType::F64 => {
                let value = match init {
                    Some(FieldInit::Float(f)) => f,
                    Some(FieldInit::Int(v)) => v as f64,
                    _ => 0.0,
                };
                Constant::Float { ty, value }
            }
            IrType::Ptr(_) => Constant::Null(ty),
            _ => Constant::Zero(ty),
        };
        Ok(constant)
    }
}

/// Convert a value to `to`, widening or narrowing scalars and
/// reinterpreting everything else
pub fn coerce(
    types: &TypeTable,
    builder: &mut FunctionBuilder,
    value: Operand,
    to: TypeId,
) -> Operand {
    let from = builder.operand_type(&value);
    if from == to {
        return value;
    }
    let kind = match (types.get(from), types.get(to)) {
        (IrType::Int(a), IrType::Int(b)) if a < b => CastKind::SExt,
        (IrType::Int(_), IrType::Int(_)) => CastKind::Trunc,
        (IrType::F32, IrType::F64) => CastKind::FpExt,
        (IrType::F64, IrType::F32) => CastKind::FpTrunc,
        _ => CastKind::BitCast,
    };
    Operand::Value(builder.cast(kind, value, to))
}
