use core::cell::Cell;
use std::path::Path;

use log::{debug, error, info, warn};

use crate::{
    runtime::{ClStatus, ContextId, DeviceId, KernelArg, KernelId, ProgramId, RtResult},
    status::CL_INVALID_KERNEL_ARGS,
    ComputeRegistry, Device, DeviceBuffer, DeviceRepr, Error, KernelSource, Result, Runtime,
    Stage,
};

/// Creates and builds a program, returning the build log alongside.
/// On failure the program is released and the log is part of the error.
fn build_program<R: Runtime>(
    runtime: &R,
    context: ContextId,
    device: &Device,
    source: &KernelSource,
    options: &str,
) -> Result<(ProgramId, String)> {
    let origin = source.origin();

    let program = runtime
        .create_program(context, source.padded())
        .map_err(|status| {
            error!("unable to create a program from {origin}: {status}");
            Error::build(Stage::ProgramBuild, format!("unable to create a program from {origin}"))
                .with_code(status.code())
        })?;

    let built = runtime.build_program(program, device.id(), options);
    let log = runtime
        .build_log(program, device.id())
        .unwrap_or_else(|status| {
            warn!("unable to fetch the build log of {origin}: {status}");
            String::new()
        });

    if let Err(status) = built {
        error!(
            "unable to build {origin} for {}: {status}\n{log}",
            device.name()
        );
        if let Err(status) = runtime.release_program(program) {
            warn!("unable to release the failed program of {origin}: {status}");
        }
        return Err(
            Error::build(Stage::ProgramBuild, format!("unable to build {origin}"))
                .with_code(status.code())
                .with_build_log(log),
        );
    }

    if !log.trim().is_empty() {
        debug!("build log of {origin}:\n{log}");
    }
    Ok((program, log))
}

/// Compiles `source` for `device` without creating a kernel.
///
/// Returns the build log, which may contain warnings, and releases the
/// program again. Used by the precompiler to validate kernel files.
pub fn check_program<R: Runtime>(
    registry: &ComputeRegistry<R>,
    device: &Device,
    source: &KernelSource,
    options: &str,
) -> Result<String> {
    let context = registry.ensure_context(device)?;
    let (program, log) = build_program(registry.runtime(), context, device, source, options)?;

    if let Err(status) = registry.runtime().release_program(program) {
        warn!("unable to release program of {}: {status}", source.origin());
    }
    Ok(log)
}

/// [`check_program`] for a file on disk.
pub fn check_file<R: Runtime>(
    registry: &ComputeRegistry<R>,
    device: &Device,
    path: impl AsRef<Path>,
    options: &str,
) -> Result<String> {
    let source = KernelSource::from_file(path)?;
    check_program(registry, device, &source, options)
}

/// A built program together with one of its entry points.
///
/// The kernel is owned by the caller: it is released by [`Kernel::release`]
/// or when dropped.
/// # Example
/// ```
/// use sico::{ComputeRegistry, Kernel, devices::host::HostRuntime};
///
/// fn main() -> sico::Result<()> {
///     let runtime = HostRuntime::new();
///     runtime.register("fill", |item, args| args.store(0, item.global_id(0), 1f32));
///
///     let registry = ComputeRegistry::open(runtime)?;
///     let device = registry.select_best_device()?;
///
///     let src = "__kernel void fill(__global float* out) { out[get_global_id(0)] = 1.0f; }";
///     let kernel = Kernel::compile(&registry, device, &src.into(), "fill", "")?;
///     assert_eq!(kernel.name(), "fill");
///
///     kernel.release()
/// }
/// ```
pub struct Kernel<'r, R: Runtime> {
    runtime: &'r R,
    context: ContextId,
    device: DeviceId,
    program: ProgramId,
    kernel: KernelId,
    name: String,
    /// Set once storage bound by [`bind`](crate::params::bind) was released.
    args_released: Cell<bool>,
    released: bool,
}

impl<'r, R: Runtime> Kernel<'r, R> {
    /// Builds `source` for `device` and resolves the entry point `entry`.
    ///
    /// # Errors
    /// - context creation failed ([`GeneralFail`](crate::ErrorKind::GeneralFail))
    /// - the build failed: [`UnableToBuildKernel`](crate::ErrorKind::UnableToBuildKernel)
    ///   at [`Stage::ProgramBuild`], carrying the build log
    /// - there is no kernel named `entry`: [`UnableToBuildKernel`](crate::ErrorKind::UnableToBuildKernel)
    ///   at [`Stage::EntryPoint`]
    pub fn compile(
        registry: &'r ComputeRegistry<R>,
        device: &Device,
        source: &KernelSource,
        entry: &str,
        options: &str,
    ) -> Result<Kernel<'r, R>> {
        let runtime = registry.runtime();
        let context = registry.ensure_context(device)?;
        let (program, _) = build_program(runtime, context, device, source, options)?;

        let kernel = match runtime.create_kernel(program, entry) {
            Ok(kernel) => kernel,
            Err(status) => {
                error!(
                    "no kernel `{entry}` in {}: {status}",
                    source.origin()
                );
                if let Err(status) = runtime.release_program(program) {
                    warn!("unable to release program of {}: {status}", source.origin());
                }
                return Err(Error::build(
                    Stage::EntryPoint,
                    format!("unable to resolve kernel `{entry}` in {}", source.origin()),
                )
                .with_code(status.code()));
            }
        };

        info!("compiled kernel `{entry}` for {}", device.name());
        Ok(Kernel {
            runtime,
            context,
            device: device.id(),
            program,
            kernel,
            name: entry.to_string(),
            args_released: Cell::new(false),
            released: false,
        })
    }

    /// Loads `path` and compiles it, see [`Kernel::compile`].
    ///
    /// The file is read before any context is created, so a missing file has
    /// no side effects on the registry.
    pub fn compile_file(
        registry: &'r ComputeRegistry<R>,
        device: &Device,
        path: impl AsRef<Path>,
        entry: &str,
        options: &str,
    ) -> Result<Kernel<'r, R>> {
        let source = KernelSource::from_file(path)?;
        Kernel::compile(registry, device, &source, entry, options)
    }

    #[inline]
    pub fn runtime(&self) -> &'r R {
        self.runtime
    }

    #[inline]
    pub fn context(&self) -> ContextId {
        self.context
    }

    #[inline]
    pub fn device_id(&self) -> DeviceId {
        self.device
    }

    #[inline]
    pub fn program(&self) -> ProgramId {
        self.program
    }

    #[inline]
    pub fn id(&self) -> KernelId {
        self.kernel
    }

    /// The entry point name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn set_arg(&self, index: u32, arg: KernelArg<'_>) -> Result<()> {
        self.runtime
            .set_kernel_arg(self.kernel, index, arg)
            .map_err(|status| {
                error!("unable to set argument {index} of `{}`: {status}", self.name);
                Error::general(
                    Stage::ArgumentBinding,
                    format!("unable to set argument {index} of `{}`", self.name),
                )
                .with_param(index as usize)
                .with_code(status.code())
            })
    }

    /// Binds caller-owned storage to argument `index`.
    #[inline]
    pub fn set_arg_buffer(&self, index: u32, buffer: &DeviceBuffer<'_, R>) -> Result<()> {
        self.set_arg(index, KernelArg::Mem(buffer.id()))
    }

    /// Binds `value` by value to argument `index`.
    #[inline]
    pub fn set_arg_value<T: DeviceRepr>(&self, index: u32, value: &T) -> Result<()> {
        self.set_arg(index, KernelArg::Value(crate::as_bytes(core::slice::from_ref(value))))
    }

    #[inline]
    pub(crate) fn set_args_released(&self, released: bool) {
        self.args_released.set(released);
    }

    /// Fails with `CL_INVALID_KERNEL_ARGS` while an argument still refers to
    /// released parameter storage.
    #[inline]
    pub(crate) fn check_args(&self) -> RtResult<()> {
        match self.args_released.get() {
            true => Err(ClStatus(CL_INVALID_KERNEL_ARGS)),
            false => Ok(()),
        }
    }

    fn release_handles(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        // both are attempted, the kernel first
        let kernel = self.runtime.release_kernel(self.kernel);
        let program = self.runtime.release_program(self.program);

        kernel.and(program).map_err(|status| {
            warn!("unable to release kernel `{}`: {status}", self.name);
            Error::general(Stage::Release, format!("unable to release kernel `{}`", self.name))
                .with_code(status.code())
        })
    }

    /// Releases the kernel and its program.
    #[inline]
    pub fn release(mut self) -> Result<()> {
        self.release_handles()
    }
}

impl<R: Runtime> Drop for Kernel<'_, R> {
    #[inline]
    fn drop(&mut self) {
        let _ = self.release_handles();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{check_file, check_program, Kernel};
    use crate::{
        devices::host::{HostDevice, HostRuntime},
        ComputeRegistry, ContextState, ErrorKind, KernelSource, Stage,
    };

    const ADD: &str = "__kernel void add(__global float* a, __global const float* b) {
        size_t i = get_global_id(0);
        a[i] += b[i];
    }";

    fn registry() -> ComputeRegistry<HostRuntime> {
        let runtime = HostRuntime::builder()
            .platform("p", [HostDevice::gpu("gpu")])
            .kernel("add", |item, args| {
                let i = item.global_id(0);
                args.store(0, i, args.load::<f32>(0, i)? + args.load::<f32>(1, i)?)
            })
            .build();
        ComputeRegistry::open(runtime).unwrap()
    }

    #[test]
    fn test_compile_and_release() {
        let registry = registry();
        let device = registry.select_best_device().unwrap();

        let kernel = Kernel::compile(&registry, device, &ADD.into(), "add", "").unwrap();
        assert_eq!(kernel.name(), "add");
        kernel.release().unwrap();

        let stats = registry.runtime().stats();
        assert_eq!((stats.kernels_created, stats.kernels_released), (1, 1));
    }

    #[test]
    fn test_drop_releases() {
        let registry = registry();
        let device = registry.select_best_device().unwrap();
        drop(Kernel::compile(&registry, device, &ADD.into(), "add", "").unwrap());
        assert_eq!(registry.runtime().stats().kernels_released, 1);
    }

    #[test]
    fn test_build_failure_carries_log() {
        let registry = registry();
        let device = registry.select_best_device().unwrap();
        let broken = KernelSource::new("__kernel void add(__global float* a) {\n a[0] = 1;\n");

        let err = Kernel::compile(&registry, device, &broken, "add", "")
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnableToBuildKernel);
        assert_eq!(err.stage(), Some(Stage::ProgramBuild));
        assert_eq!(err.code_name(), Some("CL_BUILD_PROGRAM_FAILURE"));
        assert!(err.build_log().unwrap().contains("unmatched '{'"));
    }

    #[test]
    fn test_unknown_entry_point_is_distinct() {
        let registry = registry();
        let device = registry.select_best_device().unwrap();

        let err = Kernel::compile(&registry, device, &ADD.into(), "sub", "")
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnableToBuildKernel);
        assert_eq!(err.stage(), Some(Stage::EntryPoint));
        assert_eq!(err.code_name(), Some("CL_INVALID_KERNEL_NAME"));
        assert_eq!(err.build_log(), None);
    }

    #[test]
    fn test_missing_file_has_no_side_effects() {
        let registry = registry();
        let device = registry.device(0).unwrap();

        let err = Kernel::compile_file(&registry, device, "missing/kernel.cl", "add", "")
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnableToBuildKernel);
        assert_eq!(err.stage(), Some(Stage::SourceLoad));
        assert_eq!(device.context_state(), ContextState::Absent);

        // later calls are unaffected
        Kernel::compile(&registry, device, &ADD.into(), "add", "").unwrap();
    }

    #[test]
    fn test_check_program() {
        let registry = registry();
        let device = registry.select_best_device().unwrap();

        assert_eq!(check_program(&registry, device, &ADD.into(), "").unwrap(), "");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"__kernel void nope() {}").unwrap();
        let err = check_file(&registry, device, file.path(), "").unwrap_err();
        assert!(err.build_log().unwrap().contains("'nope'"));

        // no program survives the check
        assert_eq!(registry.runtime().stats().kernels_created, 0);
    }
}
