use ndqueue::info;
use ndqueue::prelude::*;
use ndqueue::telemetry::{ConsoleExporter, MetricsExporter};

const SOURCE: &str = r#"
__kernel void vector_add(__global const float* a, __global const float* b, __global float* c) {
    size_t i = get_global_id(0);
    c[i] = a[i] + b[i];
}

__kernel void block_sum(__global const float* src, __global float* sums, __local float* scratch) {
    scratch[get_local_id(0)] = src[get_global_id(0)];
    barrier(CLK_LOCAL_MEM_FENCE);
    if (get_local_id(0) == BLOCK_SIZE - 1) {
        float total = 0.0f;
        for (int j = 0; j < BLOCK_SIZE; ++j) total += scratch[j];
        sums[get_group_id(0)] = total;
    }
}
"#;

fn main() {
    println!("{}", info::opencl_info(false));

    let library = KernelLibrary::new()
        .with("vector_add", |item, args| {
            let i = item.global_id(0);
            let sum = args.read::<f32>(0, i) + args.read::<f32>(1, i);
            args.write(2, i, sum);
        })
        .with("block_sum", |item, args| {
            let lid = item.local_id(0);
            let value: f32 = args.read(0, item.global_id(0));
            args.write(2, lid, value);

            let block: usize = args.define_or("BLOCK_SIZE", 1);
            if lid == block - 1 {
                let total: f32 = (0..block).map(|j| args.read::<f32>(2, j)).sum();
                args.write(1, item.group_id(0), total);
            }
        });

    let sources = MemorySource::new().with("vector_add.cl", SOURCE);
    let mut queue =
        Queue::with_loader(Config::from_env(), library, sources).expect("Failed to open queue");

    println!("=== Vector Add ===\n");
    let n = 16;
    let a: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let b: Vec<f32> = (0..n).map(|i| (n - i) as f32).collect();
    let mut c = vec![0.0f32; n];

    queue
        .submit(
            "vector_add.cl",
            "vector_add",
            &NdRange::linear(n, 4),
            [KernelArg::input(&a), KernelArg::input(&b), KernelArg::output(&mut c)],
        )
        .expect("submit failed")
        .wait()
        .expect("kernel failed");
    println!("a + b = {:?}", c);

    println!("\n=== Block Sum ===\n");
    let mut sums = vec![0.0f32; n / 2];
    let outputs = queue
        .submit(
            "vector_add.cl",
            "block_sum",
            &NdRange::linear(n, 2),
            [KernelArg::input(&c), KernelArg::output(&mut sums), KernelArg::local::<f32>(2)],
        )
        .expect("submit failed")
        .get()
        .expect("kernel failed");
    println!("pairwise sums = {:?}", outputs[0].to_vec::<f32>());

    drop(outputs);

    println!("\nPrograms built: {}", queue.cache().stats().programs_built);
    ConsoleExporter::new(true)
        .export(&queue.metrics().snapshot())
        .expect("Failed to export metrics");

    println!("\n=== Example Complete ===");
}
