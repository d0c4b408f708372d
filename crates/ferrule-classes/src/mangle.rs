//! Symbol and type name mangling
//!
//! Qualified names are mangled as a sequence of length-prefixed
//! identifiers (`app.geo.Point` -> `3app3geo5Point`). Global symbols wrap a
//! mangled name in `_D ... Z` with a length-prefixed member suffix. These
//! names are the linkage contract between separately compiled modules.

use crate::decl::{DeclTable, SourceType};

/// Length-prefixed mangling of a dotted module path and a name
pub fn mangle_qualified(module: &str, name: &str) -> String {
    let mut out = String::new();
    for part in module.split('.').filter(|p| !p.is_empty()) {
        push_ident(&mut out, part);
    }
    push_ident(&mut out, name);
    out
}

fn push_ident(out: &mut String, ident: &str) {
    out.push_str(&ident.len().to_string());
    out.push_str(ident);
}

fn member_symbol(mangled: &str, member: &str) -> String {
    let mut out = format!("_D{}", mangled);
    push_ident(&mut out, member);
    out.push('Z');
    out
}

/// Primary vtable global
pub fn vtbl_symbol(mangled: &str) -> String {
    member_symbol(mangled, "__vtbl")
}

/// Interface metadata array global
pub fn interface_infos_symbol(mangled: &str) -> String {
    member_symbol(mangled, "__interfaceInfos")
}

/// Per-class vtable for one implemented interface
pub fn interface_vtbl_symbol(mangled: &str, iface_mangled: &str) -> String {
    let mut out = format!("_D{}", mangled);
    push_ident(&mut out, "__interface");
    out.push_str(iface_mangled);
    push_ident(&mut out, "__vtbl");
    out.push('Z');
    out
}

/// Static default image global
pub fn init_symbol(mangled: &str) -> String {
    member_symbol(mangled, "__init")
}

/// Type descriptor global
pub fn descriptor_symbol(mangled: &str, is_interface: bool) -> String {
    if is_interface {
        member_symbol(mangled, "__Interface")
    } else {
        member_symbol(mangled, "__Class")
    }
}

/// Field offset / type-info table referenced by the descriptor
pub fn offset_type_info_symbol(mangled: &str) -> String {
    member_symbol(mangled, "__OffTi")
}

/// Synthesized destructor chain
pub fn destructor_symbol(mangled: &str) -> String {
    let mut out = format!("_D{}", mangled);
    push_ident(&mut out, "__destructor");
    out.push_str("MFZv");
    out
}

/// Name of the vtable struct type
pub fn vtbl_type_name(mangled: &str) -> String {
    format!("{}__vtblType", mangled)
}

/// Type mangling used for type-info references
pub fn mangle_type(decls: &DeclTable, ty: &SourceType) -> String {
    match ty {
        SourceType::Void => "v".to_string(),
        SourceType::Bool => "b".to_string(),
        SourceType::Char => "a".to_string(),
        SourceType::Byte => "g".to_string(),
        SourceType::Short => "s".to_string(),
        SourceType::Int => "i".to_string(),
        SourceType::Long => "l".to_string(),
        SourceType::Float => "f".to_string(),
        SourceType::Double => "d".to_string(),
        SourceType::Pointer(inner) => format!("P{}", mangle_type(decls, inner)),
        SourceType::StaticArray(elem, len) => format!("G{}{}", len, mangle_type(decls, elem)),
        SourceType::Struct(s) => {
            let decl = decls.strukt(*s);
            format!("S{}", mangle_qualified(&decl.module, &decl.name))
        }
        SourceType::Class(c) => {
            let decl = decls.class(*c);
            format!("C{}", mangle_qualified(&decl.module, &decl.name))
        }
    }
}

/// Static type-info instance for a source type
pub fn type_info_symbol(decls: &DeclTable, ty: &SourceType) -> String {
    let ident = format!("TypeInfo_{}", mangle_type(decls, ty));
    member_symbol(&format!("{}{}", ident.len(), ident), "__init")
}
