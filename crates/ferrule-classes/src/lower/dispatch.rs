//! Virtual function pointer resolution

use ferrule_ir::{FunctionBuilder, Operand};

use super::ClassLowering;
use crate::decl::FuncId;
use crate::error::{LowerError, LowerResult};

impl<'a> ClassLowering<'a> {
    /// Load the vtable entry of `method` through the header of `this`.
    ///
    /// Works for class instances and interface references alike: both start
    /// with a pointer to the vtable the method's index refers to.
    pub fn virtual_function_pointer(
        &mut self,
        builder: &mut FunctionBuilder,
        this: Operand,
        method: FuncId,
    ) -> LowerResult<Operand> {
        let decls = self.decls;
        let func = decls.func(method);
        if !func.is_virtual() {
            return Err(LowerError::NotVirtual {
                method: self.func_name(method),
            });
        }
        let index = match func.vtbl_index() {
            Some(index) if index > 0 => u64::from(index),
            _ => {
                return Err(LowerError::MissingVtableIndex {
                    method: self.func_name(method),
                })
            }
        };
        let owner = func.owner.ok_or_else(|| LowerError::NotVirtual {
            method: self.func_name(method),
        })?;
        self.resolve(owner)?;

        let owner_ty = self.class_ref_type(owner);
        let this = builder.bitcast(this, owner_ty);
        let types = &mut self.module.types;
        let vptr_addr = builder.field_addr(types, this, &[0, 0])?;
        let vtbl = builder.load(types, vptr_addr)?;
        let slot_addr = builder.field_addr(types, vtbl, &[0, index])?;
        let fn_ptr = builder.load(types, slot_addr)?;
        Ok(Operand::Value(fn_ptr))
    }
}
