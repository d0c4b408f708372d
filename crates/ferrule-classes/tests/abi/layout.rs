//! Object layouts: header, padding, unions, sizes

use ferrule_classes::lower::HEADER_SLOTS;
use ferrule_classes::{ClassId, ClassLowering, LowerError, LoweringOptions, SourceType};

use crate::harness::Graph;

fn composite_fields(lowering: &ClassLowering<'_>, class: ClassId) -> Vec<String> {
    let types = &lowering.module().types;
    let composite = lowering.class_ir(class).unwrap().composite;
    types
        .struct_fields(composite)
        .unwrap()
        .iter()
        .map(|&t| types.display(t))
        .collect()
}

fn union_graph() -> (Graph, ClassId) {
    let mut g = Graph::new();
    let u = g.class("Variant");
    g.field(u, "tag", 16, SourceType::Int);
    g.field(u, "as_long", 24, SourceType::Long);
    g.field(u, "as_int", 24, SourceType::Int);
    g.field(u, "as_hi", 28, SourceType::Int);
    g.field(u, "as_pair", 24, SourceType::StaticArray(Box::new(SourceType::Long), 2));
    g.field(u, "after", 40, SourceType::Short);
    (g, u)
}

#[test]
fn test_layout_is_deterministic() {
    let (g, u) = union_graph();

    let mut first = g.lowering();
    first.lower_classes(&[u]).unwrap();
    let mut second = g.lowering();
    second.lower_classes(&[u]).unwrap();

    assert_eq!(composite_fields(&first, u), composite_fields(&second, u));
    let a = first.class_ir(u).unwrap().layout.clone().unwrap();
    let b = second.class_ir(u).unwrap().layout.clone().unwrap();
    let slots = |l: &ferrule_classes::StructLayout| {
        l.fields
            .iter()
            .map(|f| (f.offset, f.slot.slot, f.slot.micro_offset))
            .collect::<Vec<_>>()
    };
    assert_eq!(slots(&a), slots(&b));
}

#[test]
fn test_union_members_stay_inside_their_slot() {
    let (g, u) = union_graph();
    let mut lowering = g.lowering();
    lowering.lower_classes(&[u]).unwrap();

    let ir = lowering.class_ir(u).unwrap();
    let layout = ir.layout.as_ref().unwrap();
    assert!(layout.has_unions);

    let module = lowering.module();
    let object = module
        .target
        .struct_layout(&module.types, ir.composite)
        .unwrap();
    for field in &layout.fields {
        let index = HEADER_SLOTS + field.slot.slot;
        let slot_start = object.offsets[index];
        // Widening padding after a slot belongs to it
        let slot_end = layout
            .slots
            .iter()
            .enumerate()
            .skip(field.slot.slot + 1)
            .find(|(_, s)| s.field.is_some())
            .map(|(j, _)| object.offsets[HEADER_SLOTS + j])
            .unwrap_or(object.size);
        assert!(field.offset >= slot_start);
        assert!(
            field.offset + field.size <= slot_end,
            "field at {} (size {}) escapes slot [{}, {})",
            field.offset,
            field.size,
            slot_start,
            slot_end
        );
    }

    // The wider array alternative grows the slot to 16 bytes
    let after = layout.first_field_at(40).unwrap();
    assert_eq!(object.offsets[HEADER_SLOTS + after.slot.slot], 40);
}

#[test]
fn test_union_overlap_is_fatal() {
    let mut g = Graph::new();
    let c = g.class("Broken");
    g.field(c, "a", 16, SourceType::Int);
    g.field(c, "b", 18, SourceType::Int);

    let err = g.lowering().lower_classes(&[c]).unwrap_err();
    match err {
        LowerError::UnionOverlap {
            class,
            offset,
            slot_offset,
            slot_size,
            ..
        } => {
            assert_eq!(class, "main.Broken");
            assert_eq!((offset, slot_offset, slot_size), (18, 16, 4));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_gap_padding_preserves_frontend_offsets() {
    let mut g = Graph::new();
    let c = g.class("Sparse");
    g.field(c, "a", 16, SourceType::Int);
    g.field(c, "b", 32, SourceType::Long);

    let mut lowering = g.lowering();
    lowering.lower_classes(&[c]).unwrap();
    let ir = lowering.class_ir(c).unwrap();
    let layout = ir.layout.as_ref().unwrap();
    assert_eq!(layout.padding, 12);

    let module = lowering.module();
    let object = module
        .target
        .struct_layout(&module.types, ir.composite)
        .unwrap();
    let b = layout.first_field_at(32).unwrap();
    assert_eq!(object.offsets[HEADER_SLOTS + b.slot.slot], 32);
    assert_eq!(object.size, 40);
}

#[test]
fn test_header_slots_for_every_class() {
    let mut g = Graph::new();
    let empty = g.class("Empty");
    let full = g.class("Full");
    g.field(full, "x", 16, SourceType::Double);

    let mut lowering = g.lowering();
    lowering.lower_classes(&[empty, full]).unwrap();
    for class in [empty, full] {
        let ir = lowering.class_ir(class).unwrap();
        let types = &lowering.module().types;
        let fields = types.struct_fields(ir.composite).unwrap();
        assert_eq!(types.pointee(fields[0]), Some(ir.vtbl_type));
        assert_eq!(types.pointee(fields[1]).and_then(|t| types.int_width(t)), Some(8));
    }
}

#[test]
fn test_scenario_sizes() {
    let mut g = Graph::new();
    let a = g.class("A");
    let b = g.class("B");
    g.extends(b, a);
    g.field(b, "value", 16, SourceType::Int);

    let mut lowering = g.lowering();
    lowering.lower_classes(&[a, b]).unwrap();
    assert_eq!(lowering.instance_size(a).unwrap(), 16);
    assert_eq!(lowering.instance_size(b).unwrap(), 24);
}

#[test]
fn test_scenario_sizes_32_bit() {
    let mut g = Graph::new();
    let a = g.class("A");
    let b = g.class("B");
    g.extends(b, a);
    g.field(b, "value", 8, SourceType::Int);

    let mut options = LoweringOptions::default();
    options.target.pointer_width = 32;
    let mut lowering = ClassLowering::new(&g.decls, options).unwrap();
    lowering.lower_classes(&[a, b]).unwrap();
    assert_eq!(lowering.instance_size(a).unwrap(), 8);
    assert_eq!(lowering.instance_size(b).unwrap(), 12);
}

#[test]
fn test_inherited_fields_come_first() {
    let mut g = Graph::new();
    let a = g.class("A");
    g.field(a, "x", 16, SourceType::Int);
    let b = g.class("B");
    g.extends(b, a);
    g.field(b, "y", 20, SourceType::Int);

    let mut lowering = g.lowering();
    lowering.lower_classes(&[b]).unwrap();
    let layout = lowering.class_ir(b).unwrap().layout.as_ref().unwrap();
    assert_eq!(
        layout.fields.iter().map(|f| f.offset).collect::<Vec<_>>(),
        vec![16, 20]
    );
    assert_eq!(layout.slots.len(), 2);
}
