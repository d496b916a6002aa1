use sico::{ComputeRegistry, Error, devices::opencl::OpenClRuntime, dispatch::run_kernel_1d_array};

const FLOAT_COUNT: usize = 64 * 1024;

fn main() -> Result<(), Error> {
    env_logger::init();

    let registry = ComputeRegistry::open(OpenClRuntime::new())?;
    println!("running on {}", registry.select_best_device()?.name());

    let data = (0..FLOAT_COUNT).map(|i| i as f32).collect::<Vec<_>>();
    let mut out = vec![0f32; FLOAT_COUNT];

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/kernels/add_floats.cl");
    run_kernel_1d_array(&registry, path, &mut out, &data, &data)?;

    for value in &out[..10] {
        println!("data {value}");
    }

    registry.close()
}
