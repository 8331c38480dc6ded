use criterion::{black_box, criterion_group, criterion_main, Criterion};

use statescript_core::{ClassBuilder, ClassDef, FunctionBuilder, Name, ObjHandle, PropKind, StateBuilder};
use statescript_engine::{BytecodeWriter, Conversion, Vm};

use std::sync::Arc;

fn instance_of(class: Arc<ClassDef>) -> (Vm, ObjHandle) {
    let mut vm = Vm::new();
    let id = vm.register_class(class).unwrap();
    let h = vm.create_instance(id, Name::new("Bench")).unwrap();
    (vm, h)
}

fn bench_event_dispatch(c: &mut Criterion) {
    // The smallest useful event: one store.
    let mut w = BytecodeWriter::new();
    w.assign();
    w.instance_var(0);
    w.int_const(42);
    let class = ClassBuilder::new(Name::new("Counter"))
        .var(Name::new("Value"), PropKind::Int)
        .function(FunctionBuilder::new(Name::new("Bump")).code(w.finish()).build())
        .build();
    let (mut vm, h) = instance_of(class);
    let bump = Name::new("Bump");

    c.bench_function("event_dispatch", |b| {
        b.iter(|| vm.call_event(black_box(h), bump, &[]).unwrap());
    });
}

fn bench_linear_stores(c: &mut Criterion) {
    // 64 back-to-back assignments through the instance-variable operand.
    let mut w = BytecodeWriter::new();
    for i in 0..64 {
        w.assign();
        w.instance_var((i % 2) as u16);
        w.int_const(i);
    }
    let class = ClassBuilder::new(Name::new("Counter"))
        .var(Name::new("A"), PropKind::Int)
        .var(Name::new("B"), PropKind::Int)
        .function(FunctionBuilder::new(Name::new("Fill")).code(w.finish()).build())
        .build();
    let (mut vm, h) = instance_of(class);
    let fill = Name::new("Fill");

    c.bench_function("linear_stores_64", |b| {
        b.iter(|| vm.call_event(black_box(h), fill, &[]).unwrap());
    });
}

fn bench_function_calls(c: &mut Criterion) {
    // Eight argument-passing virtual calls per event.
    let mut wa = BytecodeWriter::new();
    wa.assign();
    wa.instance_var(0);
    wa.local(0);
    let apply = FunctionBuilder::new(Name::new("Apply"))
        .param(Name::new("Amount"), PropKind::Int)
        .code(wa.finish())
        .build();
    let mut wg = BytecodeWriter::new();
    for _ in 0..8 {
        wg.virtual_call(Name::new("Apply"));
        wg.int_const(7);
        wg.end_parms();
    }
    let class = ClassBuilder::new(Name::new("Counter"))
        .var(Name::new("Value"), PropKind::Int)
        .function(apply)
        .function(FunctionBuilder::new(Name::new("Go")).code(wg.finish()).build())
        .build();
    let (mut vm, h) = instance_of(class);
    let go = Name::new("Go");

    c.bench_function("virtual_calls_8", |b| {
        b.iter(|| vm.call_event(black_box(h), go, &[]).unwrap());
    });
}

fn bench_state_pump(c: &mut Criterion) {
    // Re-arm the cursor at a label and pump the state code to its stop.
    let mut w = BytecodeWriter::new();
    w.mark(Name::new("Top"));
    for i in 0..8 {
        w.assign();
        w.instance_var(0);
        w.int_const(i);
    }
    w.stop();
    let (code, labels) = w.into_parts();
    let mut idle = StateBuilder::new(Name::new("Idle")).code(code);
    for (name, offset) in labels {
        idle = idle.label(name, offset);
    }
    let class = ClassBuilder::new(Name::new("Machine"))
        .var(Name::new("Value"), PropKind::Int)
        .state(idle.build())
        .build();
    let (mut vm, h) = instance_of(class);
    vm.goto_state(h, Name::new("Idle"), None).unwrap();
    let top = Name::new("Top");

    c.bench_function("state_pump", |b| {
        b.iter(|| {
            vm.goto_label(black_box(h), top);
            vm.tick_state(h).unwrap();
        });
    });
}

fn bench_primitive_casts(c: &mut Criterion) {
    // A parse, a widening and a render per event.
    let mut w = BytecodeWriter::new();
    w.assign();
    w.instance_var(0);
    w.cast(Conversion::StringToInt);
    w.string_const("42");
    w.assign();
    w.instance_var(1);
    w.cast(Conversion::IntToFloat);
    w.instance_var(0);
    w.assign();
    w.instance_var(2);
    w.cast(Conversion::FloatToString);
    w.float_const(3.25);
    let class = ClassBuilder::new(Name::new("Conv"))
        .var(Name::new("I"), PropKind::Int)
        .var(Name::new("F"), PropKind::Float)
        .var(Name::new("S"), PropKind::Str)
        .function(FunctionBuilder::new(Name::new("Go")).code(w.finish()).build())
        .build();
    let (mut vm, h) = instance_of(class);
    let go = Name::new("Go");

    c.bench_function("primitive_casts", |b| {
        b.iter(|| vm.call_event(black_box(h), go, &[]).unwrap());
    });
}

criterion_group!(
    benches,
    bench_event_dispatch,
    bench_linear_stores,
    bench_function_calls,
    bench_state_pump,
    bench_primitive_casts
);

criterion_main!(benches);
