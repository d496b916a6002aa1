use sico::{
    devices::host::{HostDevice, HostRuntime},
    listing::device_listing_json,
    ComputeRegistry,
};

#[test]
fn test_listing_json() -> sico::Result<()> {
    let runtime = HostRuntime::builder()
        .platform("host", [HostDevice::cpu("cpu"), HostDevice::gpu("gpu").compute_units(16)])
        .build();
    let registry = ComputeRegistry::open(runtime)?;

    let json = device_listing_json(&registry)?;
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let devices = value.as_array().unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0]["name"], "cpu");
    assert_eq!(devices[0]["shares_host_memory"], true);
    assert_eq!(devices[1]["platform"], "host");
    assert_eq!(devices[1]["compute_units"], 16);
    assert_eq!(devices[1]["shares_host_memory"], false);
    Ok(())
}
