//! Benchmarks for the deepstate-reactive engine.
//!
//! Target: one write plus flush through a ten-link computed chain < 20μs

use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use deepstate_reactive::{Instance, ManualScheduler, ModelType, Scheduler, Subscriber, Value};

fn wide_type(width: usize) -> Rc<ModelType> {
    let mut builder = ModelType::builder("Wide");
    for i in 0..width {
        builder = builder.value(&format!("k{}", i), 0);
    }
    builder.build()
}

fn chain_type(len: usize) -> Rc<ModelType> {
    let mut builder = ModelType::builder("Chain").value("a", 0);
    for i in 0..len {
        let prev = if i == 0 { "a".to_string() } else { format!("c{}", i - 1) };
        builder = builder.computed(&format!("c{}", i), move |v| {
            Ok(Value::Int(v.get_int(&prev)? + 1))
        });
    }
    builder.build()
}

fn bench_plain_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("plain_writes");

    for width in [1, 10, 100] {
        let sched = Rc::new(ManualScheduler::new());
        let t = Instance::new(&wide_type(width), sched.clone());
        let keys: Vec<String> = (0..width).map(|i| format!("k{}", i)).collect();
        let _d = t.on(keys.iter(), |_| {}).unwrap();
        let mut n = 0i64;

        group.bench_with_input(BenchmarkId::new("write_all_flush", width), &keys, |b, keys| {
            b.iter(|| {
                n += 1;
                for key in keys {
                    t.set(key, black_box(n)).unwrap();
                }
                sched.flush_now();
            })
        });
    }

    group.finish();
}

fn bench_computed_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed_chain");

    for len in [1, 10, 50] {
        let sched = Rc::new(ManualScheduler::new());
        let t = Instance::new(&chain_type(len), sched.clone());
        let last = format!("c{}", len - 1);
        t.get(&last).unwrap();
        let mut n = 0i64;

        group.bench_with_input(BenchmarkId::new("refresh", len), &last, |b, _| {
            b.iter(|| {
                n += 1;
                t.set("a", black_box(n)).unwrap();
                sched.flush_now();
            })
        });
    }

    group.finish();
}

fn bench_subscriber(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscriber");
    let sched = Rc::new(ManualScheduler::new());
    let t = Instance::new(&wide_type(10), sched.clone());

    group.bench_function("read_listen_release", |b| {
        b.iter(|| {
            let sub = Subscriber::new(&t, |_| {});
            let view = sub.view();
            for i in 0..10 {
                black_box(view.get(&format!("k{}", i)).unwrap());
            }
            let disposer = sub.listen().unwrap();
            disposer.dispose();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_plain_writes, bench_computed_chain, bench_subscriber);

criterion_main!(benches);
