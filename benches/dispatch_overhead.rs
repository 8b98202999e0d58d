//! Benchmarks for per-task dispatch overhead

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndqueue::prelude::*;

const SOURCE: &str = r#"
__kernel void noop(__global const float* a) {}
__kernel void scale(__global const float* src, __global float* dst, float k) {
    dst[get_global_id(0)] = src[get_global_id(0)] * k;
}
"#;

fn queue() -> Queue {
    let library = KernelLibrary::new()
        .with("noop", |_, _| {})
        .with("scale", |item, args| {
            let i = item.global_id(0);
            let k: f32 = args.scalar(2);
            let v: f32 = args.read(0, i);
            args.write(1, i, v * k);
        });
    let sources = MemorySource::new().with("bench.cl", SOURCE);
    Queue::with_loader(Config::default(), library, sources).unwrap()
}

fn bench_submit_wait(c: &mut Criterion) {
    let mut queue = queue();
    let a = [0.0f32; 4];

    c.bench_function("submit_wait_noop", |b| {
        b.iter(|| {
            queue
                .submit(
                    "bench.cl",
                    "noop",
                    &NdRange::linear(1, 1),
                    [KernelArg::input(black_box(&a))],
                )
                .unwrap()
                .wait()
                .unwrap();
        });
    });
}

fn bench_transfer_sizes(c: &mut Criterion) {
    let mut queue = queue();
    let mut group = c.benchmark_group("scale");

    for size in [1_024usize, 16_384, 262_144].iter() {
        let src = vec![1.0f32; *size];
        let mut dst = vec![0.0f32; *size];

        group.bench_with_input(BenchmarkId::new("submit_get", size), size, |b, &size| {
            b.iter(|| {
                queue
                    .submit(
                        "bench.cl",
                        "scale",
                        &NdRange::from_global(&[size]),
                        [
                            KernelArg::input(&src),
                            KernelArg::output(&mut dst),
                            KernelArg::scalar(&2.0f32),
                        ],
                    )
                    .unwrap()
                    .wait()
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_pipelined(c: &mut Criterion) {
    let mut queue = queue();
    let src = vec![1.0f32; 4096];
    let mut outs: Vec<Vec<f32>> = (0..16).map(|_| vec![0.0f32; 4096]).collect();

    c.bench_function("pipelined_16", |b| {
        b.iter(|| {
            let mut completions: Vec<_> = outs
                .iter_mut()
                .map(|out| {
                    queue
                        .submit(
                            "bench.cl",
                            "scale",
                            &NdRange::linear(4096, 256),
                            [
                                KernelArg::input(&src),
                                KernelArg::output(out),
                                KernelArg::scalar(&3.0f32),
                            ],
                        )
                        .unwrap()
                })
                .collect();
            for completion in completions.iter_mut() {
                completion.wait().unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_submit_wait, bench_transfer_sizes, bench_pipelined);
criterion_main!(benches);
