use sico::{
    ComputeRegistry, Error,
    devices::host::{HostDevice, HostRuntime},
    dispatch::run_kernel_1d_array,
};

const FLOAT_COUNT: usize = 64 * 1024;

fn main() -> Result<(), Error> {
    let runtime = HostRuntime::builder()
        .platform("sico host", [HostDevice::gpu("Host GPU")])
        .kernel("kern", |item, args| {
            let i = item.global_id(0);
            args.store(0, i, args.load::<f32>(1, i)? + args.load::<f32>(2, i)?)
        })
        .build();
    let registry = ComputeRegistry::open(runtime)?;

    let data = (0..FLOAT_COUNT).map(|i| i as f32).collect::<Vec<_>>();
    let mut out = vec![0f32; FLOAT_COUNT];

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/kernels/add_floats.cl");
    run_kernel_1d_array(&registry, path, &mut out, &data, &data)?;

    for value in &out[..10] {
        println!("data {value}");
    }

    registry.close()
}
