use sico::{
    devices::host::{HostDevice, HostRuntime},
    status::{error_string, launch_error_details, UNKNOWN_ERROR_CODE},
    ComputeRegistry, Error, ErrorKind, Kernel, Parameter, Queue, Stage, State,
};

#[test]
fn test_error_decoding() {
    assert_eq!(error_string(0), "CL_SUCCESS");
    assert_eq!(error_string(-1), "CL_DEVICE_NOT_FOUND");
    assert_eq!(error_string(-48), "CL_INVALID_KERNEL");
    assert_eq!(error_string(-9999), UNKNOWN_ERROR_CODE);
    assert_eq!(error_string(i32::MIN), UNKNOWN_ERROR_CODE);

    assert!(!launch_error_details(-54).is_empty());
    assert!(launch_error_details(-9999).is_empty());
}

#[test]
fn test_state_of_results() {
    assert_eq!(State::of(&Ok::<_, Error>(1)), State::Ok);

    let err = Error::build(Stage::ProgramBuild, "no");
    assert_eq!(State::of(&Err::<(), _>(err)), State::UnableToBuildKernel);
    assert_eq!(State::from(ErrorKind::NoDevice), State::NoDevice);
}

#[test]
fn test_questionmark() -> Result<(), Box<dyn std::error::Error + Sync + Send>> {
    let registry = ComputeRegistry::open(HostRuntime::new())?;
    let _device = registry.select_best_device()?;
    Ok(())
}

#[test]
fn test_kernel_fault_is_execute_failure() {
    let runtime = HostRuntime::builder()
        .platform("p", [HostDevice::gpu("gpu")])
        .kernel("oob", |_, args| args.store(0, 1000, 1f32))
        .build();
    let registry = ComputeRegistry::open(runtime).unwrap();
    let device = registry.select_best_device().unwrap();

    let src = "__kernel void oob(__global float* x) { x[1000] = 1.0f; }";
    let kernel = Kernel::compile(&registry, device, &src.into(), "oob", "").unwrap();
    let queue = Queue::new(&registry, device).unwrap();

    let mut data = [0f32; 4];
    let mut params = [Parameter::read_write(&mut data)];
    let err = sico::dispatch::run_1d(device, &kernel, &queue, &mut params, 1, None).unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Synchronize));
    assert_eq!(err.code_name(), Some("CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"));
    // storage is released on the error path as well
    assert_eq!(registry.runtime().stats().live_buffers(), 0);
}
