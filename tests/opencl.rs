use sico::{
    devices::opencl::OpenClRuntime, dispatch::run_1d, listing::device_listing, ComputeRegistry,
    ErrorKind, Kernel, Parameter, Queue,
};

const ADD_SRC: &str = "
    __kernel void add(__global float* out, __global const float* a, __global const float* b) {
        size_t i = get_global_id(0);
        out[i] = a[i] + b[i];
    }
";

fn registry() -> Option<ComputeRegistry<OpenClRuntime>> {
    let _ = env_logger::builder().is_test(true).try_init();

    match ComputeRegistry::open(OpenClRuntime::new()) {
        Ok(registry) if registry.discover_devices().is_ok() => Some(registry),
        _ => {
            eprintln!("no OpenCL device available, skipping");
            None
        }
    }
}

#[test]
fn test_add_floats_on_every_device() -> sico::Result<()> {
    let Some(registry) = registry() else {
        return Ok(());
    };

    for device in registry.discover_devices()? {
        if registry.ensure_context(device).is_err() {
            continue;
        }
        let kernel = Kernel::compile(&registry, device, &ADD_SRC.into(), "add", "")?;
        let queue = Queue::new(&registry, device)?;

        let mut out = [0f32; 4];
        let mut params = [
            Parameter::write_only(&mut out),
            Parameter::read_only(&[1f32, 2., 3., 4.]),
            Parameter::read_only(&[11f32, 12., 13., 14.]),
        ];
        run_1d(device, &kernel, &queue, &mut params, 4, None)?;

        for (out, expected) in out.iter().zip([12f32, 14., 16., 18.]) {
            assert!((out - expected).abs() <= f32::EPSILON);
        }
        queue.destroy()?;
        kernel.release()?;
    }
    registry.close()
}

#[test]
fn test_build_log_on_failure() -> sico::Result<()> {
    let Some(registry) = registry() else {
        return Ok(());
    };
    let device = registry.select_best_device()?;

    let src = "__kernel void broken(__global float* x) { x[0] = undeclared; }";
    let err = Kernel::compile(&registry, device, &src.into(), "broken", "")
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::UnableToBuildKernel);
    assert!(err.build_log().is_some_and(|log| !log.is_empty()));
    Ok(())
}

#[test]
fn test_listing() -> sico::Result<()> {
    let Some(registry) = registry() else {
        return Ok(());
    };
    let listing = device_listing(&registry)?;
    assert!(listing.starts_with("1.0 Device: "));
    Ok(())
}
