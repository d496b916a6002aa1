//! One-shot helpers chaining bind, launch, finish and write-back.

use std::path::Path;

use log::info;

use crate::{
    params::{bind_scoped, Parameter},
    ComputeRegistry, Device, DeviceRepr, Error, Kernel, Queue, Result, Runtime, Stage,
};

/// Entry point name expected by [`run_kernel_1d_array`].
pub const ARRAY_KERNEL_ENTRY: &str = "kern";

/// Binds `params`, launches `kernel` over a `global[0] * global[1]` grid,
/// waits for it and copies the results back. The parameter storage is
/// released on every path.
pub fn run_2d<R: Runtime>(
    device: &Device,
    kernel: &Kernel<'_, R>,
    queue: &Queue<'_, R>,
    params: &mut [Parameter<'_>],
    global: [usize; 2],
    local: Option<[usize; 2]>,
) -> Result<()> {
    bind_scoped(device, kernel, queue, params, |binding| {
        queue.enqueue_2d(kernel, global, local)?;
        queue.finish()?;
        binding.write_back()
    })
}

/// [`run_2d`] for one dimensional launches.
pub fn run_1d<R: Runtime>(
    device: &Device,
    kernel: &Kernel<'_, R>,
    queue: &Queue<'_, R>,
    params: &mut [Parameter<'_>],
    global: usize,
    local: Option<usize>,
) -> Result<()> {
    bind_scoped(device, kernel, queue, params, |binding| {
        queue.enqueue_1d(kernel, global, local)?;
        queue.finish()?;
        binding.write_back()
    })
}

/// Runs the kernel `kern` of the file at `path` once per element of `dest`.
///
/// The kernel receives `dest` (read-write), `a` and `b` (read-only) as its
/// three arguments. The best device of `registry` is used.
/// # Example
/// ```
/// use std::io::Write;
/// use sico::{ComputeRegistry, devices::host::HostRuntime, dispatch::run_kernel_1d_array};
///
/// let runtime = HostRuntime::new();
/// runtime.register("kern", |item, args| {
///     let i = item.global_id(0);
///     args.store(0, i, args.load::<i32>(1, i)? * args.load::<i32>(2, i)?)
/// });
/// let registry = ComputeRegistry::open(runtime).unwrap();
///
/// let mut file = tempfile::NamedTempFile::new().unwrap();
/// write!(file, "__kernel void kern(__global int* d, __global const int* a, __global const int* b) {{ }}").unwrap();
///
/// let mut dest = [0; 3];
/// run_kernel_1d_array(&registry, file.path(), &mut dest, &[1, 2, 3], &[4, 5, 6]).unwrap();
/// assert_eq!(dest, [4, 10, 18]);
/// ```
pub fn run_kernel_1d_array<R: Runtime, T: DeviceRepr>(
    registry: &ComputeRegistry<R>,
    path: impl AsRef<Path>,
    dest: &mut [T],
    a: &[T],
    b: &[T],
) -> Result<()> {
    if a.len() != dest.len() || b.len() != dest.len() {
        return Err(Error::general(
            Stage::ArgumentBinding,
            format!(
                "array lengths differ: dest {}, a {}, b {}",
                dest.len(),
                a.len(),
                b.len()
            ),
        ));
    }

    let device = registry.select_best_device()?;
    let kernel = Kernel::compile_file(registry, device, path, ARRAY_KERNEL_ENTRY, "")?;
    let queue = Queue::new(registry, device)?;

    let len = dest.len();
    let mut params = [
        Parameter::read_write(dest),
        Parameter::read_only(a),
        Parameter::read_only(b),
    ];
    run_1d(device, &kernel, &queue, &mut params, len, None)?;

    info!("ran `{ARRAY_KERNEL_ENTRY}` over {len} elements on {}", device.name());
    queue.destroy()?;
    kernel.release()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{run_2d, run_kernel_1d_array};
    use crate::{
        devices::host::{HostDevice, HostRuntime},
        ComputeRegistry, ErrorKind, Kernel, Parameter, Queue,
    };

    fn add_runtime(device: HostDevice) -> HostRuntime {
        HostRuntime::builder()
            .platform("p", [device])
            .kernel("kern", |item, args| {
                let i = item.global_id(0);
                args.store(0, i, args.load::<f32>(1, i)? + args.load::<f32>(2, i)?)
            })
            .build()
    }

    fn kernel_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"__kernel void kern(__global float* dest, __global const float* a, __global const float* b) {
                size_t i = get_global_id(0);
                dest[i] = a[i] + b[i];
            }",
        )
        .unwrap();
        file
    }

    #[test]
    fn test_add_floats_on_every_device_class() {
        let file = kernel_file();

        for device in [HostDevice::cpu("cpu"), HostDevice::gpu("gpu")] {
            let registry = ComputeRegistry::open(add_runtime(device)).unwrap();
            let mut dest = [0f32; 4];
            run_kernel_1d_array(
                &registry,
                file.path(),
                &mut dest,
                &[1., 2., 3., 4.],
                &[11., 12., 13., 14.],
            )
            .unwrap();

            for (out, expected) in dest.iter().zip([12f32, 14., 16., 18.]) {
                assert!((out - expected).abs() < f32::EPSILON);
            }
            assert_eq!(registry.runtime().stats().live_buffers(), 0);
        }
    }

    #[test]
    fn test_length_mismatch() {
        let registry = ComputeRegistry::open(add_runtime(HostDevice::cpu("cpu"))).unwrap();
        let err = run_kernel_1d_array(&registry, "unused.cl", &mut [0f32; 2], &[1.], &[1., 2.])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GeneralFail);
    }

    #[test]
    fn test_missing_file() {
        let registry = ComputeRegistry::open(add_runtime(HostDevice::gpu("gpu"))).unwrap();
        let err = run_kernel_1d_array(&registry, "missing.cl", &mut [0f32; 2], &[1., 2.], &[1., 2.])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnableToBuildKernel);
    }

    #[test]
    fn test_run_2d() {
        let runtime = HostRuntime::builder()
            .platform("p", [HostDevice::gpu("gpu")])
            .kernel("coords", |item, args| {
                let (x, y) = (item.global_id(0), item.global_id(1));
                let width = args.value::<u32>(1)? as usize;
                args.store(0, y * width + x, (x * 10 + y) as u32)
            })
            .build();
        let registry = ComputeRegistry::open(runtime).unwrap();
        let device = registry.select_best_device().unwrap();
        let src = "__kernel void coords(__global uint* out, uint width) { }";
        let kernel = Kernel::compile(&registry, device, &src.into(), "coords", "").unwrap();
        let queue = Queue::new(&registry, device).unwrap();

        let mut out = [0u32; 6];
        let mut params = [Parameter::write_only(&mut out), Parameter::scalar(&3u32)];
        run_2d(device, &kernel, &queue, &mut params, [3, 2], None).unwrap();

        assert_eq!(out, [0, 10, 20, 1, 11, 21]);
        let stats = registry.runtime().stats();
        assert_eq!((stats.downloads, stats.live_buffers()), (1, 0));
    }
}
