use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quill_engine::{
    BinaryOp, CodeObject, CodeRef, Jump, JumpCondition, Opcode, Process, ProcessId, ProcessList,
    Value,
};

/// Count a local up to `n` and return it
fn counting_loop(n: i32) -> CodeObject {
    let mut code = CodeObject::new();
    let i = code.add_local_variable("i").unwrap();
    let top = code.make_label().unwrap();
    let end = code.make_label().unwrap();
    code.add_push_literal(Value::from(0)).unwrap();
    code.add_instruction(Opcode::PopLocal(i));
    code.add_label(top);
    code.add_instruction(Opcode::PushLocal(i));
    code.add_push_literal(Value::from(n)).unwrap();
    code.add_instruction(Opcode::Binary(BinaryOp::Lt));
    code.add_instruction(Opcode::Jump(Jump::to_label(JumpCondition::IfFalse, end).popping()));
    code.add_instruction(Opcode::PushLocal(i));
    code.add_push_literal(Value::from(1)).unwrap();
    code.add_instruction(Opcode::Binary(BinaryOp::Add));
    code.add_instruction(Opcode::PopLocal(i));
    code.add_jump(JumpCondition::Always, top);
    code.add_label(end);
    code.add_instruction(Opcode::PushLocal(i));
    code.add_instruction(Opcode::Return(1));
    code
}

fn compacted(n: i32) -> CodeRef {
    let mut code = counting_loop(n);
    code.compact();
    code.into_ref()
}

fn bench_interpreter(c: &mut Criterion) {
    let code = compacted(1_000);

    c.bench_function("run_loop_1000", |b| {
        b.iter(|| {
            let mut process = Process::new(ProcessId::from_u32(1), "bench");
            process.push_frame(code.clone(), true).unwrap();
            process.run(None);
            black_box(process.result().and_then(Value::as_int))
        });
    });
}

fn bench_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_group");
    let code = compacted(10);

    for size in [10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("run", size), &size, |b, &size| {
            b.iter(|| {
                let mut list = ProcessList::new();
                let group_id = list.allocate_process_group();
                for _ in 0..size {
                    let process = list.create("worker");
                    process.push_frame(code.clone(), false).unwrap();
                    let id = process.id();
                    list.resume_process(id, group_id);
                }
                list.start_process_group(group_id);
                list.run(None);
                black_box(list.remove_terminated_processes())
            });
        });
    }

    group.finish();
}

fn bench_compact(c: &mut Criterion) {
    c.bench_function("relocate_and_compact", |b| {
        b.iter(|| {
            let mut code = counting_loop(black_box(10));
            code.compact();
            code
        });
    });
}

criterion_group!(benches, bench_interpreter, bench_group, bench_compact);
criterion_main!(benches);
