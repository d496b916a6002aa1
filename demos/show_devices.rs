// Lists the available compute devices.
// Run with `--features opencl` to list the OpenCL devices of this system.

use sico::{ComputeRegistry, Error, listing::device_listing};

#[cfg(feature = "opencl")]
fn runtime() -> sico::devices::opencl::OpenClRuntime {
    sico::devices::opencl::OpenClRuntime::new()
}

#[cfg(not(feature = "opencl"))]
fn runtime() -> sico::devices::host::HostRuntime {
    use sico::devices::host::{HostDevice, HostRuntime};

    HostRuntime::builder()
        .platform("sico host", [HostDevice::cpu("Host CPU").compute_units(8)])
        .platform(
            "sico discrete",
            [
                HostDevice::gpu("Host GPU").compute_units(32),
                HostDevice::accelerator("Host Accelerator").compute_units(4),
            ],
        )
        .build()
}

fn main() -> Result<(), Error> {
    let registry = ComputeRegistry::open(runtime())?;
    print!("{}", device_listing(&registry)?);
    registry.close()
}
