//! Runtime support entry points called by lowered code

use ferrule_ir::{Constant, Linkage, TypeId};

use super::ClassLowering;
use crate::config::RuntimeSymbols;
use crate::error::LowerResult;

/// Well-known runtime functions that generated code calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFn {
    /// `(ClassInfo*) -> i8*`
    AllocateInstance,
    /// `(i8* object, ClassInfo* target) -> i8*`
    DynamicCastObject,
    /// `(i8* interface, ClassInfo* target) -> i8*`
    DynamicCastInterface,
    /// `(i8* interface) -> i8*`
    InterfaceToObject,
}

impl RuntimeFn {
    pub fn symbol<'s>(&self, symbols: &'s RuntimeSymbols) -> &'s str {
        match self {
            RuntimeFn::AllocateInstance => &symbols.allocate_instance,
            RuntimeFn::DynamicCastObject => &symbols.dynamic_cast_object,
            RuntimeFn::DynamicCastInterface => &symbols.dynamic_cast_interface,
            RuntimeFn::InterfaceToObject => &symbols.interface_to_object,
        }
    }
}

impl<'a> ClassLowering<'a> {
    fn runtime_fn_type(&mut self, f: RuntimeFn) -> LowerResult<TypeId> {
        let desc = self.descriptor_types()?;
        let types = &mut self.module.types;
        let byte_ptr = types.byte_ptr();
        let record_ptr = types.ptr(desc.record);
        let params = match f {
            RuntimeFn::AllocateInstance => vec![record_ptr],
            RuntimeFn::DynamicCastObject | RuntimeFn::DynamicCastInterface => {
                vec![byte_ptr, record_ptr]
            }
            RuntimeFn::InterfaceToObject => vec![byte_ptr],
        };
        Ok(types.function(byte_ptr, params))
    }

    /// Address of a runtime function, declared external on first use
    pub fn runtime_fn(&mut self, f: RuntimeFn) -> LowerResult<Constant> {
        let ty = self.runtime_fn_type(f)?;
        let symbol = f.symbol(&self.options.runtime).to_string();
        let func = self
            .module
            .declare_function(&symbol, ty, Linkage::External)?;
        Ok(self.module.function_ref(func))
    }
}
