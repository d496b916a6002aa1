use log::{error, trace, warn};

use crate::{
    runtime::{ContextId, DeviceId, MemFlags, MemId, QueueId},
    status::launch_error_details,
    ComputeRegistry, Device, DeviceRepr, Error, Kernel, Result, Runtime, Stage, WorkSize,
};

/// An in-order command queue on one device.
///
/// Destroyed by [`Queue::destroy`] or on drop. Launches become visible to
/// transfers after [`Queue::finish`].
pub struct Queue<'r, R: Runtime> {
    runtime: &'r R,
    id: QueueId,
    context: ContextId,
    device: DeviceId,
    destroyed: bool,
}

impl<'r, R: Runtime> Queue<'r, R> {
    /// Creates a queue on `device`, creating the device's context if needed.
    pub fn new(registry: &'r ComputeRegistry<R>, device: &Device) -> Result<Queue<'r, R>> {
        let context = registry.ensure_context(device)?;
        let runtime = registry.runtime();

        let id = runtime.create_queue(context, device.id()).map_err(|status| {
            error!("unable to create a command queue on {}: {status}", device.name());
            Error::general(
                Stage::Queue,
                format!("unable to create a command queue on {}", device.name()),
            )
            .with_code(status.code())
        })?;

        Ok(Queue {
            runtime,
            id,
            context,
            device: device.id(),
            destroyed: false,
        })
    }

    #[inline]
    pub fn id(&self) -> QueueId {
        self.id
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
    pub fn runtime(&self) -> &'r R {
        self.runtime
    }

    /// Enqueues `kernel` over `work`. Arguments must be bound beforehand, and
    /// bound again once the storage of a previous binding was released.
    ///
    /// Failures are [`UnableToExecuteKernel`](crate::ErrorKind::UnableToExecuteKernel)
    /// and log a long-form explanation of the status code.
    pub fn enqueue(&self, kernel: &Kernel<'_, R>, work: &WorkSize) -> Result<()> {
        let launched = work
            .validate()
            .and_then(|()| kernel.check_args())
            .and_then(|()| self.runtime.enqueue_kernel(self.id, kernel.id(), work));

        if let Err(status) = launched {
            error!("unable to enqueue kernel `{}`: {status}", kernel.name());
            for line in launch_error_details(status.code()) {
                error!("    {line}");
            }
            return Err(Error::execute(format!("unable to enqueue kernel `{}`", kernel.name()))
                .with_code(status.code()));
        }

        trace!("enqueued `{}` over {:?}", kernel.name(), work.global());
        Ok(())
    }

    /// One dimensional launch over `global` work items.
    #[inline]
    pub fn enqueue_1d(&self, kernel: &Kernel<'_, R>, global: usize, local: Option<usize>) -> Result<()> {
        let mut work = WorkSize::d1(global);
        if let Some(local) = local {
            work = work.with_local([local]);
        }
        self.enqueue(kernel, &work)
    }

    /// Two dimensional launch over `global[0] * global[1]` work items.
    #[inline]
    pub fn enqueue_2d(
        &self,
        kernel: &Kernel<'_, R>,
        global: [usize; 2],
        local: Option<[usize; 2]>,
    ) -> Result<()> {
        let mut work = WorkSize::d2(global[0], global[1]);
        if let Some(local) = local {
            work = work.with_local(local);
        }
        self.enqueue(kernel, &work)
    }

    /// Blocks until all enqueued work has completed.
    pub fn finish(&self) -> Result<()> {
        self.runtime.finish(self.id).map_err(|status| {
            error!("unable to finish command queue: {status}");
            Error::general(Stage::Synchronize, "unable to finish command queue")
                .with_code(status.code())
        })
    }

    /// Submits enqueued work without waiting for it. Call [`Queue::finish`]
    /// before reading results.
    pub fn flush(&self) -> Result<()> {
        self.runtime.flush(self.id).map_err(|status| {
            error!("unable to flush command queue: {status}");
            Error::general(Stage::Synchronize, "unable to flush command queue")
                .with_code(status.code())
        })
    }

    /// Blocking copy of `data` into the start of `buffer`.
    pub fn write_buffer<T: DeviceRepr>(&self, buffer: &DeviceBuffer<'_, R>, data: &[T]) -> Result<()> {
        self.runtime
            .write_buffer(self.id, buffer.id(), crate::as_bytes(data))
            .map_err(|status| {
                error!("unable to write {} bytes to device: {status}", size_of_val(data));
                Error::general(Stage::Upload, "unable to write to device buffer").with_code(status.code())
            })
    }

    /// Blocking copy of the start of `buffer` into `data`.
    pub fn read_buffer<T: DeviceRepr>(&self, buffer: &DeviceBuffer<'_, R>, data: &mut [T]) -> Result<()> {
        self.runtime
            .read_buffer(self.id, buffer.id(), crate::as_bytes_mut(data))
            .map_err(|status| {
                error!("unable to read {} bytes from device: {status}", size_of_val(data));
                Error::general(Stage::Download, "unable to read from device buffer").with_code(status.code())
            })
    }

    fn release_handle(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        self.runtime.release_queue(self.id).map_err(|status| {
            warn!("unable to release command queue: {status}");
            Error::general(Stage::Queue, "unable to release command queue").with_code(status.code())
        })
    }

    #[inline]
    pub fn destroy(mut self) -> Result<()> {
        self.release_handle()
    }
}

impl<R: Runtime> Drop for Queue<'_, R> {
    #[inline]
    fn drop(&mut self) {
        let _ = self.release_handle();
    }
}

/// Caller-owned device storage.
///
/// Backs [`UserSupplied`](crate::AllocationPolicy::UserSupplied) parameters,
/// bound with [`Kernel::set_arg_buffer`].
/// # Example
/// ```
/// use sico::{ComputeRegistry, DeviceBuffer, MemFlags, Queue, devices::host::HostRuntime};
///
/// fn main() -> sico::Result<()> {
///     let registry = ComputeRegistry::open(HostRuntime::new())?;
///     let device = registry.select_best_device()?;
///     let queue = Queue::new(&registry, device)?;
///
///     let buf = DeviceBuffer::alloc(&registry, device, 16, MemFlags::READ_WRITE)?;
///     queue.write_buffer(&buf, &[1f32, 2., 3., 4.])?;
///
///     let mut out = [0f32; 4];
///     queue.read_buffer(&buf, &mut out)?;
///     assert_eq!(out, [1., 2., 3., 4.]);
///
///     buf.free()
/// }
/// ```
pub struct DeviceBuffer<'r, R: Runtime> {
    runtime: &'r R,
    id: MemId,
    size: usize,
    flags: MemFlags,
    freed: bool,
}

impl<'r, R: Runtime> DeviceBuffer<'r, R> {
    /// Allocates `size` bytes of uninitialized (for the host runtime: zeroed)
    /// device storage.
    pub fn alloc(
        registry: &'r ComputeRegistry<R>,
        device: &Device,
        size: usize,
        flags: MemFlags,
    ) -> Result<DeviceBuffer<'r, R>> {
        let context = registry.ensure_context(device)?;
        let runtime = registry.runtime();

        if flags.contains(MemFlags::USE_HOST_PTR) || flags.contains(MemFlags::COPY_HOST_PTR) {
            return Err(Error::general(
                Stage::Allocation,
                "device buffers can not be created from host memory",
            ));
        }

        // SAFETY: no host pointer is involved
        let id = unsafe { runtime.create_buffer(context, flags, size, None) }.map_err(|status| {
            error!("unable to allocate {size} bytes on {}: {status}", device.name());
            Error::general(
                Stage::Allocation,
                format!("unable to allocate {size} bytes on {}", device.name()),
            )
            .with_code(status.code())
        })?;

        Ok(DeviceBuffer {
            runtime,
            id,
            size,
            flags,
            freed: false,
        })
    }

    /// Allocates room for `len` elements of `T`.
    #[inline]
    pub fn alloc_for<T: DeviceRepr>(
        registry: &'r ComputeRegistry<R>,
        device: &Device,
        len: usize,
        flags: MemFlags,
    ) -> Result<DeviceBuffer<'r, R>> {
        DeviceBuffer::alloc(registry, device, len * size_of::<T>(), flags)
    }

    #[inline]
    pub fn id(&self) -> MemId {
        self.id
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn flags(&self) -> MemFlags {
        self.flags
    }

    fn release_handle(&mut self) -> Result<()> {
        if self.freed {
            return Ok(());
        }
        self.freed = true;

        self.runtime.release_buffer(self.id).map_err(|status| {
            warn!("unable to free device buffer: {status}");
            Error::general(Stage::Release, "unable to free device buffer").with_code(status.code())
        })
    }

    #[inline]
    pub fn free(mut self) -> Result<()> {
        self.release_handle()
    }
}

impl<R: Runtime> Drop for DeviceBuffer<'_, R> {
    #[inline]
    fn drop(&mut self) {
        let _ = self.release_handle();
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        devices::host::{HostDevice, HostRuntime},
        ComputeRegistry, DeviceBuffer, ErrorKind, Kernel, MemFlags, Queue, Stage, WorkSize,
    };

    const INC: &str = "__kernel void inc(__global int* x) { x[get_global_id(0)] += 1; }";

    fn registry() -> ComputeRegistry<HostRuntime> {
        let runtime = HostRuntime::builder()
            .platform("p", [HostDevice::gpu("gpu")])
            .kernel("inc", |item, args| {
                let i = item.global_id(0) + item.global_id(1) * item.global_size(0);
                args.store(0, i, args.load::<i32>(0, i)? + 1)
            })
            .build();
        ComputeRegistry::open(runtime).unwrap()
    }

    #[test]
    fn test_user_supplied_storage() {
        let registry = registry();
        let device = registry.select_best_device().unwrap();
        let queue = Queue::new(&registry, device).unwrap();
        let kernel = Kernel::compile(&registry, device, &INC.into(), "inc", "").unwrap();

        let buf = DeviceBuffer::alloc_for::<i32>(&registry, device, 6, MemFlags::READ_WRITE).unwrap();
        queue.write_buffer(&buf, &[0i32, 1, 2, 3, 4, 5]).unwrap();
        kernel.set_arg_buffer(0, &buf).unwrap();

        queue.enqueue_2d(&kernel, [3, 2], None).unwrap();
        queue.enqueue_1d(&kernel, 6, Some(2)).unwrap();
        queue.finish().unwrap();

        let mut out = [0i32; 6];
        queue.read_buffer(&buf, &mut out).unwrap();
        assert_eq!(out, [2, 3, 4, 5, 6, 7]);

        buf.free().unwrap();
        queue.destroy().unwrap();
        assert_eq!(registry.runtime().stats().live_buffers(), 0);
    }

    #[test]
    fn test_enqueue_failures_are_execute_errors() {
        let registry = registry();
        let device = registry.select_best_device().unwrap();
        let queue = Queue::new(&registry, device).unwrap();
        let kernel = Kernel::compile(&registry, device, &INC.into(), "inc", "").unwrap();

        // argument 0 was never set
        let err = queue.enqueue(&kernel, &WorkSize::d1(4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnableToExecuteKernel);
        assert_eq!(err.code_name(), Some("CL_INVALID_KERNEL_ARGS"));

        let err = queue.enqueue(&kernel, &WorkSize::d2(4, 0)).unwrap_err();
        assert_eq!(err.code_name(), Some("CL_INVALID_GLOBAL_WORK_SIZE"));
    }

    #[test]
    fn test_zero_sized_buffer() {
        let registry = registry();
        let device = registry.select_best_device().unwrap();
        let err = DeviceBuffer::alloc(&registry, device, 0, MemFlags::READ_WRITE)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::GeneralFail);
        assert_eq!(err.stage(), Some(Stage::Allocation));
    }

    #[test]
    fn test_flush_then_finish() {
        let registry = registry();
        let device = registry.select_best_device().unwrap();
        let queue = Queue::new(&registry, device).unwrap();
        queue.flush().unwrap();
        queue.finish().unwrap();

        let stats = registry.runtime().stats();
        assert_eq!((stats.flushes, stats.finishes), (1, 1));
    }
}
