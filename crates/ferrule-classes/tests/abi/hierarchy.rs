//! Inheritance: descriptor chain, vtables, reflection data, cross-module
//! references and self-referential graphs

use ferrule_classes::lower::{ClassFlags, DescriptorField, VtblSlot};
use ferrule_classes::{ClassState, FieldInit, LowerError, SourceType};
use ferrule_ir::{Constant, Linkage};

use crate::harness::{base_descriptor, descriptor_name, init_of, span_global, span_len, struct_field, Graph};

#[test]
fn test_descriptor_chain() {
    let mut g = Graph::new();
    let a = g.class("A");
    let b = g.class("B");
    let c = g.class("C");
    g.extends(b, a);
    g.extends(c, b);

    let module = g.lower(&[c]);
    let (da, db, dc) = (
        g.descriptor(&module, a),
        g.descriptor(&module, b),
        g.descriptor(&module, c),
    );
    assert_eq!(base_descriptor(&module, dc), Some(db));
    assert_eq!(base_descriptor(&module, db), Some(da));
    assert_eq!(base_descriptor(&module, da), None);
    assert!(struct_field(&module, da, DescriptorField::BASE).is_null());
}

#[test]
fn test_descriptor_names() {
    let mut g = Graph::new();
    let point = g.class_in("Point", "app.geo");
    let info = g.class_in("TypeInfo_Point", "app.geo");

    let mut options = ferrule_classes::LoweringOptions::default();
    options.module = "app.geo".to_string();
    let mut lowering = ferrule_classes::ClassLowering::new(&g.decls, options).unwrap();
    lowering.lower_classes(&[point, info]).unwrap();
    let module = lowering.into_module();

    assert_eq!(
        module.global(g.descriptor(&module, point)).name,
        "_D3app3geo5Point7__ClassZ"
    );
    assert_eq!(descriptor_name(&module, g.descriptor(&module, point)), "app.geo.Point");
    assert_eq!(descriptor_name(&module, g.descriptor(&module, info)), "TypeInfo_Point");
}

#[test]
fn test_vtable_counts_inherited_and_declared_methods() {
    let mut g = Graph::new();
    let a = g.class("A");
    let a_draw = g.method(a, "draw", 1);
    let a_area = g.method(a, "area", 2);
    let b = g.class("B");
    g.extends(b, a);
    let b_area = g.method(b, "area", 2);
    let b_grow = g.method(b, "grow", 3);

    let mut lowering = g.lowering();
    lowering.lower_classes(&[b]).unwrap();

    let mro = &lowering.class_ir(b).unwrap().mro;
    assert_eq!(mro.len(), 1 + 3);
    assert_eq!(mro[0], VtblSlot::Descriptor);
    assert_eq!(mro[1].func(), Some(a_draw));
    assert_eq!(
        mro[2],
        VtblSlot::Method {
            func: b_area,
            introduced_by: a_area
        }
    );
    assert_eq!(mro[3].func(), Some(b_grow));

    let module = lowering.into_module();
    let vtbl = module.global_by_name("_D4main1B6__vtblZ").unwrap();
    let entries = init_of(&module, vtbl).as_struct_fields().unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].as_global(), Some(g.descriptor(&module, b)));
    let area = entries[2].as_function().unwrap();
    assert_eq!(module.function(area).name, "_B_area");
    assert_eq!(span_len(struct_field(&module, g.descriptor(&module, b), DescriptorField::VTBL)), 4);
}

#[test]
fn test_default_image_and_flags() {
    let mut g = Graph::new();
    let a = g.class("Counter");
    g.decls.class_mut(a).fields.push(
        ferrule_classes::FieldDecl::new("count", 16, SourceType::Int).with_init(FieldInit::Int(3)),
    );
    g.field(a, "ratio", 24, SourceType::Double);
    g.ctor(a, vec![]);

    let module = g.lower(&[a]);
    let image = module.global_by_name("_D4main7Counter6__initZ").unwrap();
    let fields = init_of(&module, image).as_struct_fields().unwrap();
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[0].as_global(), module.global_by_name("_D4main7Counter6__vtblZ"));
    assert!(fields[1].is_null());
    assert_eq!(fields[2].as_int(), Some(3));
    assert!(matches!(fields[3], Constant::Float { value, .. } if value == 0.0));

    let descriptor = g.descriptor(&module, a);
    let flags = struct_field(&module, descriptor, DescriptorField::FLAGS)
        .as_int()
        .unwrap() as i32;
    assert_eq!(
        flags,
        ClassFlags::HAS_CTOR | ClassFlags::NO_POINTERS | ClassFlags::HAS_OFF_TI
    );
    let init = struct_field(&module, descriptor, DescriptorField::INIT);
    assert_eq!(span_len(init), 32);
    assert_eq!(span_global(init), Some(image));
}

#[test]
fn test_offset_table_covers_the_chain() {
    let mut g = Graph::new();
    let a = g.class("A");
    g.field(a, "next", 16, SourceType::Class(a));
    let b = g.class("B");
    g.extends(b, a);
    g.field(b, "count", 24, SourceType::Long);

    let module = g.lower(&[b]);
    let span = struct_field(&module, g.descriptor(&module, b), DescriptorField::OFFSET_TYPE_INFO);
    assert_eq!(span_len(span), 2);
    let table = span_global(span).unwrap();
    assert_eq!(module.global(table).linkage, Linkage::Internal);

    let rows = init_of(&module, table).as_array_elems().unwrap();
    let row = |i: usize| {
        let fields = rows[i].as_struct_fields().unwrap();
        let info = fields[1].as_global().unwrap();
        (fields[0].as_int().unwrap(), module.global(info).name.clone())
    };
    assert_eq!(row(0), (24, "_D10TypeInfo_l6__initZ".to_string()));
    assert_eq!(row(1), (16, "_D17TypeInfo_C4main1A6__initZ".to_string()));

    let flags = struct_field(&module, g.descriptor(&module, b), DescriptorField::FLAGS)
        .as_int()
        .unwrap() as i32;
    assert_eq!(flags & ClassFlags::NO_POINTERS, 0);
}

#[test]
fn test_offset_table_can_be_disabled() {
    let mut g = Graph::new();
    let a = g.class("A");
    g.field(a, "x", 16, SourceType::Int);

    let mut options = ferrule_classes::LoweringOptions::default();
    options.emit_offset_type_info = false;
    let module = ferrule_classes::lower_module(&g.decls, options, &[a]).unwrap();

    let descriptor = g.descriptor(&module, a);
    let span = struct_field(&module, descriptor, DescriptorField::OFFSET_TYPE_INFO);
    assert_eq!(span_len(span), 0);
    assert!(span.as_struct_fields().unwrap()[1].is_null());
    let flags = struct_field(&module, descriptor, DescriptorField::FLAGS)
        .as_int()
        .unwrap() as i32;
    assert_eq!(flags & ClassFlags::HAS_OFF_TI, 0);
}

#[test]
fn test_offset_table_written_at_definition() {
    let mut g = Graph::new();
    let a = g.class("A");
    g.field(a, "x", 16, SourceType::Int);

    let mut lowering = g.lowering();
    lowering.const_init(a).unwrap();
    assert_eq!(lowering.state(a), ClassState::ConstInitialized);
    let table = lowering.module().global_by_name("_D4main1A7__OffTiZ").unwrap();
    assert!(!lowering.module().global(table).is_defined());

    lowering.define(a).unwrap();
    assert!(lowering.module().global(table).is_defined());
}

#[test]
fn test_force_define_finishes_referenced_classes() {
    let mut g = Graph::new();
    let parent = g.class("Parent");
    let child = g.class("Child");
    g.field(parent, "first", 16, SourceType::Class(child));

    let mut lowering = g.lowering();
    lowering.define(parent).unwrap();
    assert_eq!(lowering.state(child), ClassState::Unresolved);

    let mut lowering = g.lowering();
    lowering.force_define(parent).unwrap();
    assert_eq!(lowering.state(parent), ClassState::Defined);
    assert_eq!(lowering.state(child), ClassState::Defined);
    let module = lowering.into_module();
    assert!(module.global(g.descriptor(&module, child)).is_defined());
}

#[test]
fn test_abstract_class_keeps_base_link() {
    let mut g = Graph::new();
    let a = g.class("A");
    let b = g.class("B");
    g.extends(b, a);
    g.decls.class_mut(b).is_abstract = true;

    let module = g.lower(&[b]);
    let descriptor = g.descriptor(&module, b);
    assert_eq!(base_descriptor(&module, descriptor), Some(g.descriptor(&module, a)));
    for field in [DescriptorField::INIT, DescriptorField::VTBL, DescriptorField::INTERFACES] {
        let span = struct_field(&module, descriptor, field);
        assert_eq!(span_len(span), 0);
        assert_eq!(span_global(span), None);
    }
    assert!(module.global_by_name("_D4main1B6__vtblZ").is_none());
    let flags = struct_field(&module, descriptor, DescriptorField::FLAGS)
        .as_int()
        .unwrap() as i32;
    assert_ne!(flags & ClassFlags::IS_ABSTRACT, 0);
}

#[test]
fn test_foreign_classes_are_declared_only() {
    let mut g = Graph::new();
    let base = g.class_in("Base", "lib");
    let derived = g.class("Derived");
    g.extends(derived, base);

    let mut lowering = g.lowering();
    lowering.lower_classes(&[derived]).unwrap();
    assert_eq!(lowering.state(base), ClassState::Declared);
    let module = lowering.into_module();

    let foreign = g.descriptor(&module, base);
    assert!(!module.global(foreign).is_defined());
    assert_eq!(module.global(foreign).linkage, Linkage::External);
    assert!(module.global(g.descriptor(&module, derived)).is_defined());
    assert_eq!(base_descriptor(&module, g.descriptor(&module, derived)), Some(foreign));
}

#[test]
fn test_self_referential_class() {
    let mut g = Graph::new();
    let node = g.class("Node");
    g.field(node, "next", 16, SourceType::Class(node));
    g.field(node, "prev", 24, SourceType::Class(node));

    let mut lowering = g.lowering();
    lowering.lower_classes(&[node]).unwrap();
    let composite = lowering.class_ir(node).unwrap().composite;
    let types = &lowering.module().types;
    assert!(!types.is_opaque(composite));
    let fields = types.struct_fields(composite).unwrap();
    assert_eq!(types.pointee(fields[2]), Some(composite));
    assert_eq!(types.pointee(fields[3]), Some(composite));
}

#[test]
fn test_mutually_referencing_classes() {
    let mut g = Graph::new();
    let parent = g.class("Parent");
    let child = g.class("Child");
    g.field(parent, "first", 16, SourceType::Class(child));
    g.field(child, "owner", 16, SourceType::Class(parent));

    let mut lowering = g.lowering();
    lowering.lower_classes(&[parent]).unwrap();
    assert_eq!(lowering.state(child), ClassState::Defined);
    for class in [parent, child] {
        let composite = lowering.class_ir(class).unwrap().composite;
        assert!(!lowering.module().types.is_opaque(composite));
    }
}

#[test]
fn test_base_may_reference_its_subclass() {
    let mut g = Graph::new();
    let base = g.class("Expr");
    let leaf = g.class("Literal");
    g.extends(leaf, base);
    g.field(base, "simplified", 16, SourceType::Class(leaf));

    let mut lowering = g.lowering();
    lowering.lower_classes(&[base]).unwrap();
    assert_eq!(lowering.state(leaf), ClassState::Defined);
    assert_eq!(lowering.instance_size(leaf).unwrap(), 24);
}

#[test]
fn test_cyclic_inheritance_is_fatal() {
    let mut g = Graph::new();
    let a = g.class("A");
    let b = g.class("B");
    g.extends(a, b);
    g.extends(b, a);

    let err = g.lowering().lower_classes(&[a]).unwrap_err();
    assert!(matches!(err, LowerError::UnresolvedClass { .. }));
}

#[test]
fn test_multiple_destructors_share_a_thunk() {
    let mut g = Graph::new();
    let a = g.class("Resource");
    g.dtor(a);
    g.dtor(a);
    let single = g.class("Handle");
    let only = g.dtor(single);

    let module = g.lower(&[a, single]);
    let thunk = struct_field(&module, g.descriptor(&module, a), DescriptorField::DESTRUCTOR)
        .as_function()
        .unwrap();
    assert_eq!(module.function(thunk).linkage, Linkage::Internal);

    let direct = struct_field(&module, g.descriptor(&module, single), DescriptorField::DESTRUCTOR)
        .as_function()
        .unwrap();
    assert_eq!(module.function(direct).name, g.decls.func(only).symbol);
}
