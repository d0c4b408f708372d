//! Cast dispatch
//!
//! A cast between class and interface references is classified by the kind
//! of its source and target. Upcasts and raw-pointer targets are
//! reinterpretations; everything else calls into the runtime, which
//! returns null when the dynamic type does not match.

use ferrule_ir::{FunctionBuilder, Operand};
use tracing::trace;

use super::{ClassLowering, RuntimeFn};
use crate::decl::{ClassId, DeclTable, SourceType};
use crate::error::LowerResult;

/// A lowered value together with its source type
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    pub value: Operand,
    pub ty: SourceType,
}

impl TypedValue {
    pub fn new(value: impl Into<Operand>, ty: SourceType) -> Self {
        Self {
            value: value.into(),
            ty,
        }
    }
}

/// How a cast is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastPlan {
    /// Same bits, new type
    Reinterpret,
    /// Target is a base of the source; no check needed
    StaticUpcast,
    /// `dynamic_cast_object(obj, target)`
    ObjectToObject(ClassId),
    /// `dynamic_cast_object(obj, iface)`; the runtime finds the interface slot
    ObjectToInterface(ClassId),
    /// `to_object(iface)` then `dynamic_cast_object(obj, target)`
    InterfaceToObject(ClassId),
    /// `dynamic_cast_interface(iface, target)`
    InterfaceToInterface(ClassId),
}

/// Classify a cast from `from` to `to`
pub fn plan_cast(decls: &DeclTable, from: &SourceType, to: &SourceType) -> CastPlan {
    let (SourceType::Class(src), SourceType::Class(dst)) = (from, to) else {
        return CastPlan::Reinterpret;
    };
    if src == dst {
        return CastPlan::Reinterpret;
    }
    let src_iface = decls.class(*src).is_interface();
    let dst_iface = decls.class(*dst).is_interface();
    match (src_iface, dst_iface) {
        (false, false) if decls.is_same_or_base_of(*dst, *src) => CastPlan::StaticUpcast,
        (false, false) => CastPlan::ObjectToObject(*dst),
        (false, true) => CastPlan::ObjectToInterface(*dst),
        (true, false) => CastPlan::InterfaceToObject(*dst),
        (true, true) => CastPlan::InterfaceToInterface(*dst),
    }
}

impl<'a> ClassLowering<'a> {
    /// Emit a cast of `value` to `to`
    pub fn cast(
        &mut self,
        builder: &mut FunctionBuilder,
        value: TypedValue,
        to: &SourceType,
    ) -> LowerResult<Operand> {
        let plan = plan_cast(self.decls, &value.ty, to);
        trace!(?plan, "cast");

        let target_ty = self.ir_type(to)?;
        let byte_ptr = self.module.types.byte_ptr();
        let result = match plan {
            CastPlan::Reinterpret | CastPlan::StaticUpcast => value.value,
            CastPlan::ObjectToObject(target) | CastPlan::ObjectToInterface(target) => {
                let raw = builder.bitcast(value.value, byte_ptr);
                self.runtime_cast(builder, RuntimeFn::DynamicCastObject, raw, target)?
            }
            CastPlan::InterfaceToObject(target) => {
                let raw = builder.bitcast(value.value, byte_ptr);
                let to_object = self.runtime_fn(RuntimeFn::InterfaceToObject)?;
                let object = builder.call_value(&self.module.types, to_object, vec![raw])?;
                self.runtime_cast(
                    builder,
                    RuntimeFn::DynamicCastObject,
                    Operand::Value(object),
                    target,
                )?
            }
            CastPlan::InterfaceToInterface(target) => {
                let raw = builder.bitcast(value.value, byte_ptr);
                self.runtime_cast(builder, RuntimeFn::DynamicCastInterface, raw, target)?
            }
        };
        Ok(builder.bitcast(result, target_ty))
    }

    fn runtime_cast(
        &mut self,
        builder: &mut FunctionBuilder,
        f: RuntimeFn,
        raw: Operand,
        target: ClassId,
    ) -> LowerResult<Operand> {
        let callee = self.runtime_fn(f)?;
        let descriptor = self.descriptor_ref(target)?;
        let result = builder.call_value(&self.module.types, callee, vec![raw, descriptor.into()])?;
        Ok(Operand::Value(result))
    }
}
