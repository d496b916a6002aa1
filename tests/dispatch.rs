use sico::{
    devices::host::{HostCall, HostDevice, HostRuntime},
    dispatch::run_1d,
    params::bind,
    prelude::*,
};

const ADD_SRC: &str = "
    __kernel void add(__global float* out, __global const float* a, __global const float* b) {
        size_t i = get_global_id(0);
        out[i] = a[i] + b[i];
    }
";

const ORDER_SRC: &str = "
    __kernel void order(uint tag, __global const int* a, __global int* out) {
        out[0] = tag * 100 + a[0];
    }
";

fn runtime(devices: impl IntoIterator<Item = HostDevice>) -> HostRuntime {
    HostRuntime::builder()
        .platform("test", devices)
        .kernel("add", |item, args| {
            let i = item.global_id(0);
            args.store(0, i, args.load::<f32>(1, i)? + args.load::<f32>(2, i)?)
        })
        .kernel("order", |_, args| {
            let tag = args.value::<u32>(0)? as i32;
            args.store(2, 0, tag * 100 + args.load::<i32>(1, 0)?)
        })
        .build()
}

fn add_on(registry: &ComputeRegistry<HostRuntime>, device: &Device) -> Result<[f32; 4]> {
    let kernel = Kernel::compile(registry, device, &ADD_SRC.into(), "add", "")?;
    let queue = Queue::new(registry, device)?;

    let mut out = [0f32; 4];
    let mut params = [
        Parameter::write_only(&mut out),
        Parameter::read_only(&[1f32, 2., 3., 4.]),
        Parameter::read_only(&[11f32, 12., 13., 14.]),
    ];
    run_1d(device, &kernel, &queue, &mut params, 4, None)?;

    queue.destroy()?;
    kernel.release()?;
    Ok(out)
}

#[test]
fn test_add_on_every_device() -> sico::Result<()> {
    let registry = ComputeRegistry::open(runtime([
        HostDevice::cpu("cpu"),
        HostDevice::gpu("gpu"),
        HostDevice::accelerator("acc"),
    ]))?;

    for device in registry.discover_devices()? {
        registry.ensure_context(device)?;
        let out = add_on(&registry, device)?;

        for (out, expected) in out.iter().zip([12f32, 14., 16., 18.]) {
            assert!((out - expected).abs() <= f32::EPSILON);
        }
    }
    Ok(())
}

#[test]
fn test_cpu_write_back_transfers_nothing() -> sico::Result<()> {
    let registry = ComputeRegistry::open(runtime([HostDevice::cpu("cpu")]))?;
    let device = registry.select_best_device()?;
    assert!(device.shares_host_memory());

    add_on(&registry, device)?;

    let stats = registry.runtime().stats();
    assert_eq!(stats.uploads, 0);
    assert_eq!(stats.downloads, 0);
    assert_eq!(stats.host_backed_buffers, 3);
    Ok(())
}

#[test]
fn test_discrete_transfers_once_per_param() -> sico::Result<()> {
    let registry = ComputeRegistry::open(runtime([HostDevice::gpu("gpu")]))?;
    let device = registry.select_best_device()?;
    assert!(!device.shares_host_memory());

    let kernel = Kernel::compile(&registry, device, &ORDER_SRC.into(), "order", "")?;
    let queue = Queue::new(&registry, device)?;

    let mut out = [0i32];
    let mut params = [
        Parameter::scalar(&7u32),
        Parameter::read_only(&[5i32]),
        Parameter::read_write(&mut out),
    ];

    bind_scoped(device, &kernel, &queue, &mut params, |binding| {
        // uploads happen before the launch
        assert_eq!(registry.runtime().stats().uploads, 2);
        assert_eq!(registry.runtime().stats().launches, 0);

        queue.enqueue_1d(&kernel, 1, None)?;
        queue.finish()?;
        binding.write_back()
    })?;

    // the by-value tag is bound after both buffers were uploaded
    let calls = registry.runtime().calls();
    let tag = calls
        .iter()
        .position(|call| *call == HostCall::SetArg { index: 0, mem: None })
        .unwrap();
    let last_upload = calls
        .iter()
        .rposition(|call| matches!(call, HostCall::Upload(_)))
        .unwrap();
    assert!(last_upload < tag);

    let stats = registry.runtime().stats();
    assert_eq!((stats.uploads, stats.downloads, stats.launches), (2, 1, 1));
    assert_eq!(stats.live_buffers(), 0);
    assert_eq!(out, [705]);
    Ok(())
}

#[test]
fn test_binding_preserves_argument_order() -> sico::Result<()> {
    // the scalar, read-only and read-write classes in kernel order
    for device in [HostDevice::cpu("cpu"), HostDevice::gpu("gpu")] {
        let registry = ComputeRegistry::open(runtime([device]))?;
        let device = registry.select_best_device()?;
        let kernel = Kernel::compile(&registry, device, &ORDER_SRC.into(), "order", "")?;
        let queue = Queue::new(&registry, device)?;

        let mut out = [0i32];
        let mut params = [
            Parameter::scalar(&3u32),
            Parameter::read_only(&[42i32]),
            Parameter::write_only(&mut out),
        ];
        run_1d(device, &kernel, &queue, &mut params, 1, None)?;

        assert_eq!(out, [342]);
    }
    Ok(())
}

#[test]
fn test_release_twice_is_noop() -> sico::Result<()> {
    let registry = ComputeRegistry::open(runtime([HostDevice::gpu("gpu")]))?;
    let device = registry.select_best_device()?;
    let kernel = Kernel::compile(&registry, device, &ADD_SRC.into(), "add", "")?;
    let queue = Queue::new(&registry, device)?;

    let mut out = [0f32; 2];
    let mut params = [
        Parameter::write_only(&mut out),
        Parameter::read_only(&[1f32, 2.]),
        Parameter::read_only(&[1f32, 2.]),
    ];
    // SAFETY: the binding is released right away
    let binding = unsafe { bind(device, &kernel, &queue, &mut params)? };
    binding.release()?;

    release(registry.runtime(), &mut params)?;
    release(registry.runtime(), &mut params)?;

    let stats = registry.runtime().stats();
    assert_eq!((stats.buffers_created, stats.buffers_released), (3, 3));
    Ok(())
}

#[test]
fn test_flush_then_finish() -> sico::Result<()> {
    let registry = ComputeRegistry::open(runtime([HostDevice::gpu("gpu")]))?;
    let device = registry.select_best_device()?;
    let kernel = Kernel::compile(&registry, device, &ADD_SRC.into(), "add", "")?;
    let queue = Queue::new(&registry, device)?;

    let mut out = [0f32; 3];
    let mut params = [
        Parameter::write_only(&mut out),
        Parameter::read_only(&[1f32, 1., 1.]),
        Parameter::read_only(&[2f32, 2., 2.]),
    ];
    bind_scoped(device, &kernel, &queue, &mut params, |binding| {
        queue.enqueue(&kernel, &WorkSize::d1(3).with_local([1]))?;
        queue.flush()?;
        queue.finish()?;
        binding.write_back()
    })?;

    assert_eq!(out, [3., 3., 3.]);
    assert_eq!(registry.runtime().stats().flushes, 1);
    Ok(())
}

#[test]
fn test_launch_failure_is_execute_error() -> sico::Result<()> {
    let registry = ComputeRegistry::open(runtime([HostDevice::gpu("gpu")]))?;
    let device = registry.select_best_device()?;
    let kernel = Kernel::compile(&registry, device, &ADD_SRC.into(), "add", "")?;
    let queue = Queue::new(&registry, device)?;

    // no arguments were set
    let err = queue.enqueue_1d(&kernel, 4, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnableToExecuteKernel);
    assert_eq!(err.code_name(), Some("CL_INVALID_KERNEL_ARGS"));

    let err = queue.enqueue(&kernel, &WorkSize::d2(4, 0)).unwrap_err();
    assert_eq!(State::of(&Err::<(), _>(err)), State::UnableToExecuteKernel);
    Ok(())
}

#[test]
fn test_user_supplied_buffer() -> sico::Result<()> {
    let registry = ComputeRegistry::open(runtime([HostDevice::gpu("gpu")]))?;
    let device = registry.select_best_device()?;
    let kernel = Kernel::compile(&registry, device, &ADD_SRC.into(), "add", "")?;
    let queue = Queue::new(&registry, device)?;

    let out = DeviceBuffer::alloc_for::<f32>(&registry, device, 2, MemFlags::WRITE_ONLY)?;
    kernel.set_arg_buffer(0, &out)?;

    let mut params = [
        Parameter::user_supplied(MemoryClass::WriteOnly, out.size()),
        Parameter::read_only(&[1f32, 2.]),
        Parameter::read_only(&[3f32, 4.]),
    ];
    run_1d(device, &kernel, &queue, &mut params, 2, None)?;

    let mut host = [0f32; 2];
    queue.read_buffer(&out, &mut host)?;
    assert_eq!(host, [4., 6.]);

    out.free()?;
    assert_eq!(registry.runtime().stats().live_buffers(), 0);
    Ok(())
}
