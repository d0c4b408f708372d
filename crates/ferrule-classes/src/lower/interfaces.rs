//! Interface table builder
//!
//! Discovers every interface a class implements, directly or through its
//! bases, in a fixed order: walk the direct bases (base class first, then
//! the implemented interfaces); add each interface not seen yet, then
//! recurse into its own bases. The discovery order is the order of the
//! interface pointer slots in the composite and of the metadata array.

use ferrule_ir::{Constant, TypeId};
use tracing::debug;

use super::{ClassLowering, VtblSlot};
use crate::decl::{ClassId, DeclTable, FuncId, FuncKind};
use crate::error::{LowerError, LowerResult};

/// An interface implemented by a class
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceEntry {
    pub iface: ClassId,
    /// Composite index of the interface vtable pointer
    pub slot: usize,
    /// Vtable record type of the interface
    pub vtbl_ty: TypeId,
    /// Index into the class's interface metadata array
    pub info_index: usize,
    /// Implementation for each interface vtable slot (slot 0 is `None`);
    /// empty for abstract classes
    pub impls: Vec<Option<FuncId>>,
    /// Class-specific vtable for this interface (concrete classes)
    pub vtbl: Option<ferrule_ir::GlobalId>,
}

/// Interfaces reachable from `id`, in slot order
pub fn discover_interfaces(decls: &DeclTable, id: ClassId) -> Vec<ClassId> {
    let mut found = Vec::new();
    walk_bases(decls, id, &mut found);
    found
}

fn walk_bases(decls: &DeclTable, id: ClassId, found: &mut Vec<ClassId>) {
    for base in decls.direct_bases(id) {
        if decls.class(base).is_interface() && !found.contains(&base) {
            found.push(base);
        }
        walk_bases(decls, base, found);
    }
}

impl<'a> ClassLowering<'a> {
    /// Interface entries for a class; pointer slots start at `first_slot`
    pub(super) fn build_interface_entries(
        &mut self,
        id: ClassId,
        first_slot: usize,
    ) -> LowerResult<Vec<InterfaceEntry>> {
        let decls = self.decls;
        let concrete = decls.class(id).is_concrete();
        let found = discover_interfaces(decls, id);

        let mut entries = Vec::with_capacity(found.len());
        for (index, iface) in found.into_iter().enumerate() {
            self.resolve(iface)?;
            let impls = if concrete {
                self.match_interface(id, iface)?
            } else {
                Vec::new()
            };
            entries.push(InterfaceEntry {
                iface,
                slot: first_slot + index,
                vtbl_ty: self.ir(iface)?.vtbl_type,
                info_index: index,
                impls,
                vtbl: None,
            });
        }

        debug!(
            class = %self.class_name(id),
            interfaces = entries.len(),
            "interface table"
        );
        Ok(entries)
    }

    /// Resolve each interface method against the class: first the class's
    /// virtual methods, then final methods anywhere in its base chain
    fn match_interface(&self, id: ClassId, iface: ClassId) -> LowerResult<Vec<Option<FuncId>>> {
        let decls = self.decls;
        let class_mro = &self.ir(id)?.mro;
        let iface_mro = &self.ir(iface)?.mro;

        let mut impls = Vec::with_capacity(iface_mro.len());
        for slot in iface_mro {
            let Some(wanted) = slot.func() else {
                impls.push(None);
                continue;
            };
            let wanted_decl = decls.func(wanted);

            let from_mro = class_mro.iter().rev().find_map(|s| match s {
                VtblSlot::Method { func, .. } if decls.func(*func).same_signature(wanted_decl) => {
                    Some(*func)
                }
                _ => None,
            });
            let found = from_mro.or_else(|| {
                decls.base_chain(id).into_iter().find_map(|c| {
                    decls.class(c).methods.iter().copied().find(|&m| {
                        let f = decls.func(m);
                        f.kind == FuncKind::Final && f.same_signature(wanted_decl)
                    })
                })
            });

            match found {
                Some(func) => impls.push(Some(func)),
                None => {
                    return Err(LowerError::UnimplementedInterfaceMethod {
                        class: self.class_name(id),
                        interface: self.class_name(iface),
                        method: wanted_decl.name.clone(),
                    })
                }
            }
        }
        Ok(impls)
    }

    /// Vtable constant of one interface entry of a concrete class
    pub(super) fn build_interface_vtbl_const(
        &mut self,
        class: ClassId,
        entry: &InterfaceEntry,
        infos: ferrule_ir::GlobalId,
    ) -> LowerResult<Constant> {
        let desc = self.descriptor_types()?;
        let info_ptr = self.module.types.ptr(desc.interface_info);

        let mut fields = Vec::with_capacity(entry.impls.len());
        for (index, imp) in entry.impls.iter().enumerate() {
            match imp {
                None => fields.push(Constant::ElementAddr {
                    global: infos,
                    indices: vec![0, entry.info_index as u64],
                    ty: info_ptr,
                }),
                Some(func) => {
                    if self.decls.func(*func).is_abstract {
                        return Err(LowerError::AbstractSlotInConcreteClass {
                            class: self.class_name(class),
                            method: self.func_name(*func),
                        });
                    }
                    fields.push(self.slot_entry(*func, entry.vtbl_ty, index)?)
                }
            }
        }
        Ok(Constant::Struct {
            ty: entry.vtbl_ty,
            fields,
        })
    }
}
