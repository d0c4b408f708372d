//! Cast dispatch and the runtime cast contract

use ferrule_classes::lower::{plan_cast, CastPlan, TypedValue};
use ferrule_classes::{ClassId, ClassLowering, SourceType};
use ferrule_ir::{FunctionBuilder, Instr, Operand};

use crate::harness::{Graph, Ref, Runtime};

/// Names of the functions called by `instrs`, in order
fn callees(lowering: &ClassLowering<'_>, instrs: &[Instr]) -> Vec<String> {
    instrs
        .iter()
        .filter_map(|i| match i {
            Instr::Call {
                callee: Operand::Const(c),
                ..
            } => c.as_function(),
            _ => None,
        })
        .map(|f| lowering.module().function(f).name.clone())
        .collect()
}

fn emit_cast(lowering: &mut ClassLowering<'_>, from: ClassId, to: &SourceType) -> Vec<String> {
    let param = lowering.class_ref_type(from);
    let types = &mut lowering.module_mut().types;
    let void = types.void();
    let fn_ty = types.function(void, vec![param]);
    let mut builder = FunctionBuilder::new(types, fn_ty).unwrap();
    let value = TypedValue::new(builder.param(0).unwrap(), SourceType::Class(from));

    let result = lowering.cast(&mut builder, value, to).unwrap();
    let expected = lowering.ir_type(to).unwrap();
    assert_eq!(builder.operand_type(&result), expected);
    callees(lowering, builder.instrs())
}

fn shapes() -> (Graph, ClassId, ClassId, ClassId, ClassId) {
    let mut g = Graph::new();
    let drawable = g.interface("Drawable");
    g.method(drawable, "draw", 1);
    let shape = g.class("Shape");
    let circle = g.class("Circle");
    g.extends(circle, shape);
    g.implements(circle, drawable);
    g.method(circle, "draw", 1);
    let square = g.class("Square");
    g.extends(square, shape);
    (g, drawable, shape, circle, square)
}

#[test]
fn test_cast_emission_per_kind() {
    let (g, drawable, shape, circle, _) = shapes();
    let mut lowering = g.lowering();
    lowering.lower_classes(&[circle]).unwrap();

    assert!(emit_cast(&mut lowering, circle, &SourceType::Class(shape)).is_empty());
    assert!(emit_cast(&mut lowering, circle, &SourceType::pointer_to(SourceType::Void)).is_empty());
    assert_eq!(
        emit_cast(&mut lowering, shape, &SourceType::Class(circle)),
        vec!["_ferrule_dynamic_cast"]
    );
    assert_eq!(
        emit_cast(&mut lowering, circle, &SourceType::Class(drawable)),
        vec!["_ferrule_dynamic_cast"]
    );
    assert_eq!(
        emit_cast(&mut lowering, drawable, &SourceType::Class(circle)),
        vec!["_ferrule_to_object", "_ferrule_dynamic_cast"]
    );
}

#[test]
fn test_interface_to_interface_uses_interface_cast() {
    let (mut g, drawable, _, circle, _) = shapes();
    let printable = g.interface("Printable");
    g.implements(circle, printable);

    let mut lowering = g.lowering();
    lowering.lower_classes(&[circle]).unwrap();
    assert_eq!(
        plan_cast(&g.decls, &SourceType::Class(drawable), &SourceType::Class(printable)),
        CastPlan::InterfaceToInterface(printable)
    );
    assert_eq!(
        emit_cast(&mut lowering, drawable, &SourceType::Class(printable)),
        vec!["_ferrule_interface_cast"]
    );
}

#[test]
fn test_cast_round_trip_through_interface() {
    let (g, drawable, _, circle, _) = shapes();
    let module = g.lower(&[circle]);
    let mut runtime = Runtime::new(&module);

    let object = runtime.allocate(g.descriptor(&module, circle));
    let iface = runtime
        .dynamic_cast_object(object, g.descriptor(&module, drawable))
        .unwrap();
    assert_eq!(iface.object, object.object);
    assert_eq!(iface.offset, 16);

    let back = runtime.interface_to_object(iface);
    assert_eq!(back, object);
    let again = runtime
        .dynamic_cast_object(back, g.descriptor(&module, drawable))
        .unwrap();
    assert_eq!(again, iface);
    assert_eq!(
        runtime.dynamic_cast_interface(iface, g.descriptor(&module, circle)),
        Some(object)
    );
}

#[test]
fn test_failed_downcast_is_null() {
    let (g, drawable, shape, circle, square) = shapes();
    let module = g.lower(&[circle, square]);
    let mut runtime = Runtime::new(&module);

    let c = runtime.allocate(g.descriptor(&module, circle));
    assert_eq!(runtime.dynamic_cast_object(c, g.descriptor(&module, square)), None);
    assert_eq!(
        runtime.dynamic_cast_object(c, g.descriptor(&module, shape)),
        Some(c)
    );

    let s = runtime.allocate(g.descriptor(&module, square));
    assert_eq!(runtime.dynamic_cast_object(s, g.descriptor(&module, drawable)), None);
}

#[test]
fn test_scenario_upcast_then_downcast() {
    let mut g = Graph::new();
    let a = g.class("A");
    let b = g.class("B");
    g.extends(b, a);
    g.field(b, "value", 16, SourceType::Int);

    assert_eq!(
        plan_cast(&g.decls, &SourceType::Class(b), &SourceType::Class(a)),
        CastPlan::StaticUpcast
    );
    let module = g.lower(&[b]);
    let mut runtime = Runtime::new(&module);
    let instance = runtime.allocate(g.descriptor(&module, b));
    let as_a: Ref = instance;
    assert_eq!(
        runtime.dynamic_cast_object(as_a, g.descriptor(&module, b)),
        Some(instance)
    );
}
