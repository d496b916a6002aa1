use std::collections::HashMap;

use sico::{
    devices::host::{HostDevice, HostRuntime},
    ComputeRegistry, Config, ErrorKind, Kernel, Stage, BUILD_OPTIONS_VAR, DEVICE_NAME_VAR,
    PLATFORM_IDX_VAR,
};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect::<HashMap<_, _>>();
    move |key: &str| vars.get(key).cloned()
}

fn registry() -> ComputeRegistry<HostRuntime> {
    let runtime = HostRuntime::builder()
        .platform("first", [HostDevice::gpu("gpu a")])
        .platform("second", [HostDevice::cpu("cpu b"), HostDevice::gpu("gpu b")])
        .kernel("noop", |_, _| Ok(()))
        .build();
    ComputeRegistry::open(runtime).unwrap()
}

#[test]
fn test_configured_device() -> sico::Result<()> {
    let registry = registry();

    let config = Config::from_lookup(lookup(&[(PLATFORM_IDX_VAR, "1")]))?;
    assert_eq!(registry.select_configured_device(&config)?.name(), "gpu b");

    let config = Config::from_lookup(lookup(&[(DEVICE_NAME_VAR, "CPU")]))?;
    assert_eq!(registry.select_configured_device(&config)?.name(), "cpu b");

    // nothing configured, the default heuristic applies
    let config = Config::from_lookup(lookup(&[]))?;
    assert_eq!(registry.select_configured_device(&config)?.name(), "gpu a");
    Ok(())
}

#[test]
fn test_configured_build_options() -> sico::Result<()> {
    let registry = registry();
    let config = Config::from_lookup(lookup(&[(BUILD_OPTIONS_VAR, "-D N=2 -cl-mad-enable")]))?;
    let device = registry.select_configured_device(&config)?;

    let src = "__kernel void noop() { }";
    let kernel = Kernel::compile(&registry, device, &src.into(), "noop", &config.build_options)?;
    kernel.release()
}

#[test]
fn test_invalid_config() {
    let err = Config::from_lookup(lookup(&[(PLATFORM_IDX_VAR, "first")])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GeneralFail);
    assert_eq!(err.stage(), Some(Stage::Config));
    assert!(err.message().contains(PLATFORM_IDX_VAR));

    let registry = registry();
    let config = Config::from_lookup(lookup(&[(PLATFORM_IDX_VAR, "5")])).unwrap();
    let err = registry.select_configured_device(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoDevice);
    // no context is created for a failed selection
    assert_eq!(registry.runtime().stats().contexts_created, 0);
}
