// A kernel launch may modify memory it only got a shared reference to.
// To declare that a value is mutated, a "needless" mutable reference is used.
#![allow(clippy::needless_pass_by_ref_mut)]

//! A small host-side dispatch layer for compute kernels.
//!
//! sico discovers the compute devices of a runtime, picks one, compiles kernel
//! source for it, binds typed parameters and runs the kernel over a 1D or 2D
//! index space. Whether a device shares host memory (CPUs) or has a separate
//! memory space (GPUs, accelerators) is hidden: buffers on the former are
//! created on top of the caller's data, on the latter they are uploaded before
//! and downloaded after the launch.
//!
//! The lower-level runtime is behind the [`Runtime`] trait. Two are included:
//! - [`HostRuntime`](devices::host::HostRuntime): in-process devices running kernels written in Rust
//! - `OpenClRuntime` (feature `opencl`): any OpenCL platform installed on the system
//!
//! ```
//! use sico::prelude::*;
//! use sico::devices::host::{HostDevice, HostRuntime};
//!
//! fn main() -> sico::Result<()> {
//!     let runtime = HostRuntime::builder()
//!         .platform("host", [HostDevice::cpu("cpu"), HostDevice::gpu("gpu")])
//!         .kernel("add", |item, args| {
//!             let i = item.global_id(0);
//!             args.store(0, i, args.load::<f32>(1, i)? + args.load::<f32>(2, i)?)
//!         })
//!         .build();
//!
//!     let registry = ComputeRegistry::open(runtime)?;
//!     let device = registry.select_best_device()?;
//!
//!     let src = "__kernel void add(__global float* out, __global const float* a, __global const float* b) {
//!         size_t i = get_global_id(0);
//!         out[i] = a[i] + b[i];
//!     }";
//!     let kernel = Kernel::compile(&registry, device, &src.into(), "add", "")?;
//!     let queue = Queue::new(&registry, device)?;
//!
//!     let mut out = [0f32; 4];
//!     let mut params = [
//!         Parameter::write_only(&mut out),
//!         Parameter::read_only(&[1f32, 2., 3., 4.]),
//!         Parameter::read_only(&[11f32, 12., 13., 14.]),
//!     ];
//!     sico::dispatch::run_1d(device, &kernel, &queue, &mut params, 4, None)?;
//!
//!     assert_eq!(out, [12., 14., 16., 18.]);
//!     Ok(())
//! }
//! ```
//!
//! More usage examples can be found in the `tests/` and `demos/` folders of
//! this repository.

pub use config::*;
pub use error::*;
pub use kernel::{check_file, check_program, Kernel};
pub use params::{AllocationPolicy, Binding, MemoryClass, Parameter, MAX_PARAMS};
pub use queue::*;
pub use registry::*;
pub use repr::*;
pub use runtime::{DeviceClass, DeviceInfo, DeviceKind, MemFlags, Runtime, WorkSize};
pub use selector::*;
pub use source::*;

pub mod devices;
pub mod dispatch;
pub mod listing;
pub mod params;
pub mod runtime;
pub mod status;

mod config;
mod error;
mod kernel;
mod queue;
mod registry;
mod repr;
mod selector;
mod source;

pub mod prelude {
    //! Typical imports for using sico.

    pub use crate::{
        params::{bind_scoped, release, write_back},
        ComputeRegistry, Device, DeviceBuffer, DeviceRepr, Error, ErrorKind, Kernel,
        KernelSource, MemFlags, MemoryClass, Parameter, Queue, Result, Runtime, State, WorkSize,
    };

    #[cfg(feature = "opencl")]
    pub use crate::devices::opencl::OpenClRuntime;
}
