//! Vtable builder
//!
//! The method-resolution order of a class is computed once during resolve
//! and cached on its `ClassIr`: slot 0 refers to the type descriptor (or,
//! for interfaces, the interface metadata record), followed by the base's
//! slots with this tier's overrides applied in place and this tier's new
//! methods appended. Slot indices come from the frontend.

use ferrule_ir::{Constant, TypeId};
use tracing::debug;

use super::ClassLowering;
use crate::decl::{ClassId, FuncId, FuncKind};
use crate::error::{LowerError, LowerResult};

/// One vtable slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VtblSlot {
    /// Slot 0: descriptor (classes) or interface metadata (interface tables)
    Descriptor,
    Method {
        /// Most derived implementation
        func: FuncId,
        /// Method that first occupied the slot; its signature types the slot
        introduced_by: FuncId,
    },
}

impl VtblSlot {
    pub fn func(&self) -> Option<FuncId> {
        match self {
            VtblSlot::Descriptor => None,
            VtblSlot::Method { func, .. } => Some(*func),
        }
    }
}

impl<'a> ClassLowering<'a> {
    /// Method-resolution order of a class whose bases are resolved
    pub(super) fn compute_mro(&mut self, id: ClassId) -> LowerResult<Vec<VtblSlot>> {
        let decls = self.decls;
        let decl = decls.class(id);

        let mut slots: Vec<Option<VtblSlot>> = vec![Some(VtblSlot::Descriptor)];
        if decl.is_interface() {
            for &base in &decl.interfaces {
                for slot in self.ir(base)?.mro.iter().skip(1) {
                    if !slots.contains(&Some(*slot)) {
                        slots.push(Some(*slot));
                    }
                }
            }
        } else if let Some(base) = decl.base {
            slots = self.ir(base)?.mro.iter().copied().map(Some).collect();
        }

        for &method in &decl.methods {
            let func = decls.func(method);
            let FuncKind::Virtual { vtbl_index } = func.kind else {
                continue;
            };
            let index = match vtbl_index {
                Some(index) if index > 0 => index as usize,
                _ => {
                    return Err(LowerError::MissingVtableIndex {
                        method: self.func_name(method),
                    })
                }
            };
            if index >= slots.len() {
                slots.resize(index + 1, None);
            }
            let introduced_by = match slots[index] {
                Some(VtblSlot::Method { introduced_by, .. }) => introduced_by,
                _ => method,
            };
            slots[index] = Some(VtblSlot::Method {
                func: method,
                introduced_by,
            });
        }

        let mut mro = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(slot) => mro.push(slot),
                None => {
                    return Err(LowerError::VtableHole {
                        class: decl.qualified_name(),
                        index: index as u32,
                    })
                }
            }
        }
        debug!(class = %decl.qualified_name(), slots = mro.len(), "method resolution order");
        Ok(mro)
    }

    /// Element types of the vtable record
    pub(super) fn vtbl_slot_types(
        &mut self,
        id: ClassId,
        mro: &[VtblSlot],
    ) -> LowerResult<Vec<TypeId>> {
        let is_interface = self.decls.class(id).is_interface();
        let desc = self.descriptor_types()?;
        let mut fields = Vec::with_capacity(mro.len());
        for slot in mro {
            let ty = match slot {
                VtblSlot::Descriptor if is_interface => self.module.types.ptr(desc.interface_info),
                VtblSlot::Descriptor => self.module.types.ptr(desc.record),
                VtblSlot::Method { introduced_by, .. } => {
                    let fn_ty = self.func_type(*introduced_by)?;
                    self.module.types.ptr(fn_ty)
                }
            };
            fields.push(ty);
        }
        Ok(fields)
    }

    /// Address of `func`, reinterpreted as the pointer type of vtable slot
    /// `index` in `vtbl_type`
    pub(super) fn slot_entry(
        &mut self,
        func: FuncId,
        vtbl_type: TypeId,
        index: usize,
    ) -> LowerResult<Constant> {
        let slot_ty = self.module.types.element_type(vtbl_type, index as u64)?;
        Ok(self.func_ref(func)?.bitcast(slot_ty))
    }

    /// Primary vtable constant of a concrete class
    pub(super) fn build_vtbl_const(&mut self, id: ClassId) -> LowerResult<Constant> {
        let decls = self.decls;
        let ir = self.ir(id)?;
        let mro = ir.mro.clone();
        let vtbl_type = ir.vtbl_type;
        let descriptor = ir.globals.descriptor.ok_or_else(|| self.unresolved(id))?;

        let mut fields = Vec::with_capacity(mro.len());
        for (index, slot) in mro.iter().enumerate() {
            match slot {
                VtblSlot::Descriptor => fields.push(self.module.global_ref(descriptor)),
                VtblSlot::Method { func, .. } => {
                    if decls.func(*func).is_abstract {
                        return Err(LowerError::AbstractSlotInConcreteClass {
                            class: self.class_name(id),
                            method: self.func_name(*func),
                        });
                    }
                    fields.push(self.slot_entry(*func, vtbl_type, index)?);
                }
            }
        }
        Ok(Constant::Struct {
            ty: vtbl_type,
            fields,
        })
    }
}
