use core::fmt::Write;

use crate::{ComputeRegistry, Device, Result, Runtime};

fn write_device(out: &mut String, number: usize, device: &Device) -> core::fmt::Result {
    let info = device.info();
    writeln!(out, "{number}.0 Device: {}", info.name)?;
    writeln!(out, " {number}.1 Hardware version: {}", info.version)?;
    writeln!(out, " {number}.2 Software version: {}", info.driver_version)?;
    writeln!(out, " {number}.3 OpenCL C version: {}", info.c_version)?;
    writeln!(out, " {number}.4 Parallel compute units: {}", info.compute_units)
}

/// A human readable listing of every discovered device, numbered from 1.
/// # Example
/// ```
/// use sico::{ComputeRegistry, listing::device_listing, devices::host::{HostDevice, HostRuntime}};
///
/// let runtime = HostRuntime::builder()
///     .platform("host", [HostDevice::gpu("gpu0").compute_units(8)])
///     .build();
/// let registry = ComputeRegistry::open(runtime).unwrap();
///
/// let listing = device_listing(&registry).unwrap();
/// assert!(listing.starts_with("1.0 Device: gpu0\n"));
/// assert!(listing.contains(" 1.4 Parallel compute units: 8\n"));
/// ```
pub fn device_listing<R: Runtime>(registry: &ComputeRegistry<R>) -> Result<String> {
    let mut out = String::new();
    for device in registry.discover_devices()? {
        // writing into a String does not fail
        let _ = write_device(&mut out, device.index() + 1, device);
    }
    Ok(out)
}

/// Every discovered device as a JSON array.
#[cfg(feature = "json")]
pub fn device_listing_json<R: Runtime>(registry: &ComputeRegistry<R>) -> Result<String> {
    use crate::{runtime::DeviceClass, DeviceInfo, Error, Stage};

    #[derive(serde::Serialize)]
    struct DeviceSummary<'a> {
        index: usize,
        platform_index: usize,
        platform: &'a str,
        class: DeviceClass,
        shares_host_memory: bool,
        #[serde(flatten)]
        info: &'a DeviceInfo,
    }

    let summaries = registry
        .discover_devices()?
        .iter()
        .map(|device| DeviceSummary {
            index: device.index(),
            platform_index: device.platform_index(),
            platform: device.platform_name(),
            class: device.class(),
            shares_host_memory: device.shares_host_memory(),
            info: device.info(),
        })
        .collect::<Vec<_>>();

    serde_json::to_string_pretty(&summaries)
        .map_err(|err| Error::general(Stage::Discovery, format!("unable to serialize devices: {err}")))
}

#[cfg(test)]
mod tests {
    use super::device_listing;
    use crate::{
        devices::host::{HostDevice, HostRuntime},
        ComputeRegistry,
    };

    #[test]
    fn test_listing_numbers_devices() {
        let runtime = HostRuntime::builder()
            .platform("a", [HostDevice::cpu("cpu")])
            .platform("b", [HostDevice::gpu("gpu").compute_units(20)])
            .build();
        let registry = ComputeRegistry::open(runtime).unwrap();
        let listing = device_listing(&registry).unwrap();
        let lines = listing.lines().collect::<Vec<_>>();

        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "1.0 Device: cpu");
        assert_eq!(lines[5], "2.0 Device: gpu");
        assert_eq!(lines[9], " 2.4 Parallel compute units: 20");
        assert!(lines[8].starts_with(" 2.3 OpenCL C version: "));
    }
}
