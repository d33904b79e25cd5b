use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use etl_pipeline::{
    CollectNode, Emitter, NodeContext, NodeRef, ObjectPool, Process, ProcessSettings, Row,
    SourceNode,
};
use std::time::Duration;

fn run_fan_out(consumers: usize, count: usize, pooled: bool) {
    let mut builder = ProcessSettings::builder().name("fan_out");
    if pooled {
        builder = builder.pool::<Row>(count * consumers, true);
    }
    let mut process = Process::new(builder.build().expect("Settings build failed"));

    let source = NodeRef::new(SourceNode::new(
        "source",
        move |emitter: &Emitter<Row>, _ctx: &NodeContext| {
            for i in 0..count {
                emitter.emit(Row::new().with("id", i.to_string()))?;
            }
            Ok(())
        },
    ));
    let sinks: Vec<_> = (0..consumers)
        .map(|i| NodeRef::new(CollectNode::<Row>::named(format!("sink{i}"))))
        .collect();
    for sink in &sinks {
        process
            .attach_input_to_output(&source, sink)
            .expect("Attach failed");
    }

    process.execute().expect("Execute failed");
    for sink in &sinks {
        assert_eq!(sink.lock().items().len(), count);
    }
}

fn benchmark_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out_1000_rows");
    for consumers in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::new("lazy_pool", consumers), &consumers, |b, &n| {
            b.iter(|| run_fan_out(n, 1000, false));
        });
        group.bench_with_input(BenchmarkId::new("preallocated_pool", consumers), &consumers, |b, &n| {
            b.iter(|| run_fan_out(n, 1000, true));
        });
    }
    group.finish();
}

fn benchmark_pool_borrow(c: &mut Criterion) {
    c.bench_function("pool_borrow_release", |b| {
        let pool = ObjectPool::new();
        pool.register_and_initialize::<Row>(64, true);
        b.iter(|| {
            let row = pool.borrow::<Row>().expect("Borrow failed");
            pool.release(black_box(row));
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_fan_out, benchmark_pool_borrow
);
criterion_main!(benches);
