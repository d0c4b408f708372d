//! `new` expressions and destructor chains

use ferrule_classes::lower::{EnclosingFunction, NewExpr, ValueLowering};
use ferrule_classes::{
    ClassId, ClassLowering, ExprId, FuncDecl, FuncKind, LowerError, LowerResult, SourceType,
};
use ferrule_ir::{CastKind, Constant, FunctionBuilder, Instr, Module, Operand, TypeId, ValueId};

use crate::harness::Graph;

/// Records every expression it is asked to lower
#[derive(Default)]
struct Recorder {
    seen: Vec<(ExprId, SourceType)>,
}

impl ValueLowering for Recorder {
    fn lower_expr(
        &mut self,
        module: &mut Module,
        _builder: &mut FunctionBuilder,
        expr: ExprId,
        ty: &SourceType,
    ) -> LowerResult<Operand> {
        self.seen.push((expr, ty.clone()));
        let value = match ty {
            SourceType::Int => Constant::Int {
                ty: module.types.i32(),
                value: i64::from(expr.0),
            },
            _ => Constant::Null(module.types.byte_ptr()),
        };
        Ok(value.into())
    }
}

fn builder_with_params(lowering: &mut ClassLowering<'_>, params: Vec<TypeId>) -> FunctionBuilder {
    let types = &mut lowering.module_mut().types;
    let void = types.void();
    let fn_ty = types.function(void, params);
    FunctionBuilder::new(types, fn_ty).unwrap()
}

fn called(module: &Module, instr: &Instr) -> Option<String> {
    match instr {
        Instr::Call {
            callee: Operand::Const(c),
            ..
        } => c.as_function().map(|f| module.function(f).name.clone()),
        _ => None,
    }
}

/// Whether `this`, converted to a byte pointer, is stored into composite slot `slot`
fn stores_this_at(instrs: &[Instr], this: ValueId, slot: u64) -> bool {
    let slot_addrs: Vec<ValueId> = instrs
        .iter()
        .filter_map(|i| match i {
            Instr::FieldAddr { dest, indices, .. } if indices == &vec![0, slot] => Some(*dest),
            _ => None,
        })
        .collect();
    let converted: Vec<ValueId> = instrs
        .iter()
        .filter_map(|i| match i {
            Instr::Cast {
                dest,
                value: Operand::Value(v),
                ..
            } if *v == this => Some(*dest),
            _ => None,
        })
        .collect();
    instrs.iter().any(|i| {
        matches!(
            i,
            Instr::Store {
                value: Operand::Value(v),
                ptr: Operand::Value(p),
            } if converted.contains(v) && slot_addrs.contains(p)
        )
    })
}

fn point() -> (Graph, ClassId) {
    let mut g = Graph::new();
    let p = g.class("Point");
    g.field(p, "x", 16, SourceType::Int);
    g.field(p, "y", 20, SourceType::Int);
    (g, p)
}

#[test]
fn test_heap_instance_protocol() {
    let (g, p) = point();
    let mut lowering = g.lowering();
    let mut builder = builder_with_params(&mut lowering, vec![]);
    lowering
        .new_instance(
            &mut builder,
            &mut Recorder::default(),
            &NewExpr::heap(p),
            &EnclosingFunction::default(),
        )
        .unwrap();
    lowering.drain_pending().unwrap();

    let module = lowering.module();
    let instrs = builder.instrs();
    let Instr::Call { args, .. } = &instrs[0] else {
        panic!("first instruction is {:?}", instrs[0]);
    };
    assert_eq!(called(module, &instrs[0]).as_deref(), Some("_ferrule_new_class"));
    let descriptor = match &args[0] {
        Operand::Const(c) => c.as_global(),
        _ => None,
    };
    assert_eq!(descriptor, Some(g.descriptor(module, p)));

    let stores: Vec<&Operand> = instrs
        .iter()
        .filter_map(|i| match i {
            Instr::Store { value, .. } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(stores.len(), 2);
    match stores[0] {
        Operand::Const(c) => assert_eq!(c.as_global(), module.global_by_name("_D4main5Point6__vtblZ")),
        other => panic!("vtable store of {:?}", other),
    }
    assert!(matches!(stores[1], Operand::Const(c) if c.is_null()));
    assert!(instrs
        .iter()
        .any(|i| matches!(i, Instr::MemCopy { len: 8, .. })));
}

#[test]
fn test_stack_instance_uses_frame_slot() {
    let (g, p) = point();
    let mut lowering = g.lowering();
    let mut builder = builder_with_params(&mut lowering, vec![]);
    let expr = NewExpr {
        on_stack: true,
        ..NewExpr::heap(p)
    };
    lowering
        .new_instance(&mut builder, &mut Recorder::default(), &expr, &EnclosingFunction::default())
        .unwrap();

    let composite = lowering.class_ir(p).unwrap().composite;
    let instrs = builder.instrs();
    assert!(matches!(instrs[0], Instr::Alloca { ty, .. } if ty == composite));
    assert!(!instrs.iter().any(|i| matches!(i, Instr::Call { .. })));
}

#[test]
fn test_nested_instance_stores_enclosing_this() {
    let mut g = Graph::new();
    let outer = g.class("Outer");
    let inner = g.class("Inner");
    g.decls.class_mut(inner).is_nested = true;

    let mut lowering = g.lowering();
    let outer_ty = lowering.class_ref_type(outer);
    let mut builder = builder_with_params(&mut lowering, vec![outer_ty]);
    let this = builder.param(0).unwrap();
    let enclosing = EnclosingFunction {
        nested_context: None,
        this: Some(this.into()),
    };
    lowering
        .new_instance(&mut builder, &mut Recorder::default(), &NewExpr::heap(inner), &enclosing)
        .unwrap();

    let slot = lowering.class_ir(inner).unwrap().context_slot.unwrap() as u64;
    assert!(stores_this_at(builder.instrs(), this, slot));
}

#[test]
fn test_nested_base_context_is_inherited() {
    let mut g = Graph::new();
    let outer = g.class("Outer");
    let inner = g.class("Inner");
    g.decls.class_mut(inner).is_nested = true;
    let derived = g.class("Derived");
    g.extends(derived, inner);
    g.decls.class_mut(derived).is_nested = true;
    g.field(derived, "x", 24, SourceType::Long);
    let plain = g.class("Plain");
    g.extends(plain, inner);
    g.field(plain, "y", 24, SourceType::Int);

    let mut lowering = g.lowering();
    lowering.lower_classes(&[derived, plain]).unwrap();
    for class in [inner, derived, plain] {
        assert_eq!(lowering.class_ir(class).unwrap().context_slot, Some(2));
    }

    let composite = lowering.class_ir(derived).unwrap().composite;
    let types = &lowering.module().types;
    let fields = types.struct_fields(composite).unwrap();
    assert_eq!(fields.len(), 4);
    assert_eq!(types.pointee(fields[2]).and_then(|p| types.int_width(p)), Some(8));
    assert_eq!(types.int_width(fields[3]), Some(64));
    assert_eq!(lowering.instance_size(derived).unwrap(), 32);

    let outer_ty = lowering.class_ref_type(outer);
    let mut builder = builder_with_params(&mut lowering, vec![outer_ty]);
    let this = builder.param(0).unwrap();
    let enclosing = EnclosingFunction {
        nested_context: None,
        this: Some(this.into()),
    };
    lowering
        .new_instance(&mut builder, &mut Recorder::default(), &NewExpr::heap(derived), &enclosing)
        .unwrap();
    assert!(stores_this_at(builder.instrs(), this, 2));
    assert!(!stores_this_at(builder.instrs(), this, 3));
}

#[test]
fn test_subclass_of_nested_class_needs_context() {
    let mut g = Graph::new();
    let inner = g.class("Inner");
    g.decls.class_mut(inner).is_nested = true;
    let plain = g.class("Plain");
    g.extends(plain, inner);

    let mut lowering = g.lowering();
    let mut builder = builder_with_params(&mut lowering, vec![]);
    let err = lowering
        .new_instance(
            &mut builder,
            &mut Recorder::default(),
            &NewExpr::heap(plain),
            &EnclosingFunction::default(),
        )
        .unwrap_err();
    assert!(matches!(err, LowerError::MissingContext { .. }));
}

#[test]
fn test_explicit_outer_is_lowered_as_context() {
    let mut g = Graph::new();
    let inner = g.class("Inner");
    g.decls.class_mut(inner).is_nested = true;

    let mut lowering = g.lowering();
    let mut builder = builder_with_params(&mut lowering, vec![]);
    let mut values = Recorder::default();
    let expr = NewExpr {
        outer: Some(ExprId(7)),
        ..NewExpr::heap(inner)
    };
    lowering
        .new_instance(&mut builder, &mut values, &expr, &EnclosingFunction::default())
        .unwrap();
    assert_eq!(
        values.seen,
        vec![(ExprId(7), SourceType::pointer_to(SourceType::Void))]
    );
}

#[test]
fn test_constructor_call_and_result() {
    let (mut g, p) = point();
    let ctor = g.ctor(p, vec![SourceType::Int, SourceType::Int]);
    let factory = g.decls.add_func(FuncDecl {
        name: "__ctor".to_string(),
        symbol: "_Point_make".to_string(),
        owner: Some(p),
        params: vec![SourceType::Int],
        ret: SourceType::pointer_to(SourceType::Void),
        kind: FuncKind::Constructor,
        is_abstract: false,
    });
    g.decls.class_mut(p).ctors.push(factory);

    let mut lowering = g.lowering();
    let class_ty = lowering.class_ref_type(p);
    let mut values = Recorder::default();

    let mut builder = builder_with_params(&mut lowering, vec![]);
    let expr = NewExpr {
        ctor: Some(ctor),
        args: vec![ExprId(1), ExprId(2)],
        ..NewExpr::heap(p)
    };
    let result = lowering
        .new_instance(&mut builder, &mut values, &expr, &EnclosingFunction::default())
        .unwrap();
    assert_eq!(builder.operand_type(&result), class_ty);
    let call = builder
        .instrs()
        .iter()
        .rev()
        .find_map(|i| match i {
            Instr::Call { dest, args, .. } => Some((*dest, args.len())),
            _ => None,
        })
        .unwrap();
    assert_eq!(call, (None, 3));
    assert_eq!(values.seen.len(), 2);

    let mut builder = builder_with_params(&mut lowering, vec![]);
    let expr = NewExpr {
        ctor: Some(factory),
        args: vec![ExprId(3)],
        ..NewExpr::heap(p)
    };
    let result = lowering
        .new_instance(&mut builder, &mut values, &expr, &EnclosingFunction::default())
        .unwrap();
    assert_eq!(builder.operand_type(&result), class_ty);
    let last = builder.instrs().last().unwrap();
    assert!(matches!(
        last,
        Instr::Cast {
            kind: CastKind::BitCast,
            dest,
            ..
        } if result == Operand::Value(*dest)
    ));
}

#[test]
fn test_destructors_run_most_derived_first() {
    let mut g = Graph::new();
    let a = g.class("A");
    g.dtor(a);
    let b = g.class("B");
    g.extends(b, a);
    g.dtor(b);
    let c = g.class("C");
    g.extends(c, b);

    let mut lowering = g.lowering();
    let c_ty = lowering.class_ref_type(c);
    let mut builder = builder_with_params(&mut lowering, vec![c_ty]);
    let this = builder.param(0).unwrap();
    lowering
        .call_destructors(&mut builder, c, this.into())
        .unwrap();

    let module = lowering.module();
    let order: Vec<String> = builder
        .instrs()
        .iter()
        .filter_map(|i| called(module, i))
        .collect();
    assert_eq!(order, vec!["_B___dtor", "_A___dtor"]);
}
