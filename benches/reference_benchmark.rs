use criterion::{Criterion, criterion_group, criterion_main};
use native_bridge_v8::{BridgeConfig, Runtime};

fn reference_benchmarks(c: &mut Criterion) {
    let mut rt = Runtime::new(BridgeConfig::default());

    rt.evaluate(
        r#"
        globalThis.buffer = new Reference(interop.types.int32, 1024);

        globalThis.allocate = () => {
            for (let i = 0; i < 100; i++) new Reference(interop.types.double, 16);
        };

        globalThis.readWrite = () => {
            let sum = 0;
            for (let i = 0; i < 1024; i++) {
                buffer[i] = i;
                sum += buffer[i];
            }
            return sum;
        };

        globalThis.weakRefs = () => {
            const target = {};
            for (let i = 0; i < 100; i++) new WeakRef(target).get();
        };
        "#,
    )
    .unwrap();

    c.bench_function("reference_allocate_100", |b| {
        b.iter(|| rt.evaluate("allocate()").unwrap())
    });

    c.bench_function("reference_index_read_write_1024", |b| {
        b.iter(|| rt.eval_number("readWrite()").unwrap())
    });

    c.bench_function("weak_ref_create_100", |b| {
        b.iter(|| rt.evaluate("weakRefs()").unwrap())
    });

    c.bench_function("collect_after_churn", |b| {
        b.iter(|| {
            rt.evaluate("allocate(); weakRefs();").unwrap();
            rt.collect_garbage();
        })
    });
}

criterion_group!(benches, reference_benchmarks);
criterion_main!(benches);
