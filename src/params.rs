//! Binding of kernel parameters to device storage.
//!
//! A call goes through three phases:
//!
//! 1. [`bind_scoped`] (or the unsafe [`bind`]): device storage is created
//!    for every parameter this layer owns, initial contents are uploaded
//!    where the device has its own memory, then every parameter is bound to
//!    its argument slot, in order.
//! 2. [`write_back`] (after [`Queue::finish`]): mutated buffers are copied
//!    back to host memory, again only where the device has its own memory.
//! 3. [`release`]: device storage is freed and the handles cleared.
//!    [`bind_scoped`] does this itself before returning.
//!
//! Devices that share host memory get buffers created on top of the
//! caller's data, so they need neither uploads nor downloads.

use core::{marker::PhantomData, ptr::NonNull, slice};

use log::{debug, error, trace, warn};

use crate::{
    runtime::{KernelArg, MemFlags, MemId, QueueId},
    Device, DeviceRepr, Error, Kernel, Queue, Result, Runtime, Stage,
};

/// Upper bound for the number of parameters of one call.
pub const MAX_PARAMS: usize = 256;

/// How a kernel accesses a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    ReadWrite,
    ReadOnly,
    WriteOnly,
    /// Passed by value, never backed by device storage.
    Scalar,
}

impl MemoryClass {
    #[inline]
    pub fn mem_flags(self) -> MemFlags {
        match self {
            MemoryClass::ReadWrite => MemFlags::READ_WRITE,
            MemoryClass::ReadOnly => MemFlags::READ_ONLY,
            MemoryClass::WriteOnly => MemFlags::WRITE_ONLY,
            MemoryClass::Scalar => MemFlags::default(),
        }
    }
}

/// Who owns the device storage of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationPolicy {
    /// Storage is created by [`bind_scoped`] and freed before it returns.
    AutoAllocate,
    /// The caller created and bound the storage, e.g. with a [`DeviceBuffer`](crate::DeviceBuffer).
    UserSupplied,
}

/// One argument of a kernel invocation.
///
/// Host data stays owned (borrowed) by the caller, `'a` ties the parameter
/// to it.
/// # Example
/// ```
/// use sico::{MemoryClass, Parameter};
///
/// let a = [1f32, 2., 3.];
/// let mut out = [0f32; 3];
///
/// let params = [Parameter::read_only(&a), Parameter::write_only(&mut out), Parameter::scalar(&3u32)];
/// assert_eq!(params[0].size_bytes(), 12);
/// assert_eq!(params[2].memory_class(), MemoryClass::Scalar);
/// ```
#[derive(Debug)]
pub struct Parameter<'a> {
    data: Option<NonNull<u8>>,
    size: usize,
    class: MemoryClass,
    policy: AllocationPolicy,
    handle: Option<MemId>,
    _data: PhantomData<&'a mut [u8]>,
}

impl<'a> Parameter<'a> {
    fn host<T: DeviceRepr>(data: NonNull<[T]>, len: usize, class: MemoryClass) -> Parameter<'a> {
        Parameter {
            data: Some(data.cast()),
            size: len * size_of::<T>(),
            class,
            policy: AllocationPolicy::AutoAllocate,
            handle: None,
            _data: PhantomData,
        }
    }

    /// Input the kernel only reads.
    #[inline]
    pub fn read_only<T: DeviceRepr>(data: &'a [T]) -> Parameter<'a> {
        Parameter::host(NonNull::from(data), data.len(), MemoryClass::ReadOnly)
    }

    /// Input the kernel updates in place.
    #[inline]
    pub fn read_write<T: DeviceRepr>(data: &'a mut [T]) -> Parameter<'a> {
        let len = data.len();
        Parameter::host(NonNull::from(data), len, MemoryClass::ReadWrite)
    }

    /// Output the kernel only writes.
    #[inline]
    pub fn write_only<T: DeviceRepr>(data: &'a mut [T]) -> Parameter<'a> {
        let len = data.len();
        Parameter::host(NonNull::from(data), len, MemoryClass::WriteOnly)
    }

    /// A value passed by value.
    #[inline]
    pub fn scalar<T: DeviceRepr>(value: &'a T) -> Parameter<'a> {
        Parameter::host(NonNull::from(slice::from_ref(value)), 1, MemoryClass::Scalar)
    }

    /// A parameter whose storage the caller already created and bound.
    /// [`bind_scoped`] leaves its argument slot alone.
    #[inline]
    pub fn user_supplied(class: MemoryClass, size_bytes: usize) -> Parameter<'a> {
        Parameter {
            data: None,
            size: size_bytes,
            class,
            policy: AllocationPolicy::UserSupplied,
            handle: None,
            _data: PhantomData,
        }
    }

    #[inline]
    pub fn memory_class(&self) -> MemoryClass {
        self.class
    }

    #[inline]
    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.size
    }

    /// Set while a [`Binding`] holds the storage of an auto allocated buffer.
    #[inline]
    pub fn device_handle(&self) -> Option<MemId> {
        self.handle
    }

    fn host_bytes(&self) -> Option<&[u8]> {
        // SAFETY: `data` was created from a borrow of `size` bytes that lives for 'a
        self.data
            .map(|ptr| unsafe { slice::from_raw_parts(ptr.as_ptr(), self.size) })
    }

    fn host_bytes_mut(&mut self) -> Option<&mut [u8]> {
        // only these were created from a mutable borrow
        if !matches!(self.class, MemoryClass::ReadWrite | MemoryClass::WriteOnly) {
            return None;
        }
        self.data
            .map(|ptr| unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), self.size) })
    }

    #[inline]
    fn owns_storage(&self) -> bool {
        self.class != MemoryClass::Scalar && self.policy == AllocationPolicy::AutoAllocate
    }
}

fn allocate<R: Runtime>(
    runtime: &R,
    kernel: &Kernel<'_, R>,
    shares_host_memory: bool,
    params: &mut [Parameter<'_>],
    needs_upload: &mut [bool],
) -> Result<()> {
    for (idx, param) in params.iter_mut().enumerate() {
        if !param.owns_storage() {
            continue;
        }
        if param.handle.is_some() {
            return Err(Error::general(Stage::Allocation, "parameter is already bound").with_param(idx));
        }

        let flags = param.class.mem_flags();
        // SAFETY: the host pointer stays valid and borrowed for 'a, and the
        // storage is released before the data is dropped (see `bind`)
        let mem = if shares_host_memory {
            unsafe {
                runtime.create_buffer(
                    kernel.context(),
                    flags | MemFlags::USE_HOST_PTR,
                    param.size,
                    param.data,
                )
            }
        } else {
            needs_upload[idx] = true;
            unsafe { runtime.create_buffer(kernel.context(), flags, param.size, None) }
        };

        let mem = mem.map_err(|status| {
            Error::general(
                Stage::Allocation,
                format!("unable to allocate {} bytes", param.size),
            )
            .with_param(idx)
            .with_code(status.code())
        })?;
        trace!("param {idx}: allocated {} bytes ({:?})", param.size, param.class);
        param.handle = Some(mem);
    }
    Ok(())
}

fn upload<R: Runtime>(
    runtime: &R,
    queue: QueueId,
    params: &[Parameter<'_>],
    needs_upload: &[bool],
) -> Result<()> {
    for (idx, param) in params.iter().enumerate() {
        if !needs_upload[idx] {
            continue;
        }
        let (Some(mem), Some(data)) = (param.handle, param.host_bytes()) else {
            continue;
        };

        runtime.write_buffer(queue, mem, data).map_err(|status| {
            Error::general(Stage::Upload, format!("unable to upload {} bytes", param.size))
                .with_param(idx)
                .with_code(status.code())
        })?;
        trace!("param {idx}: uploaded {} bytes", param.size);
    }
    Ok(())
}

fn set_args<R: Runtime>(runtime: &R, kernel: &Kernel<'_, R>, params: &[Parameter<'_>]) -> Result<()> {
    for (idx, param) in params.iter().enumerate() {
        let arg = match (param.class, param.handle) {
            (MemoryClass::Scalar, _) => match param.host_bytes() {
                Some(bytes) => KernelArg::Value(bytes),
                None => {
                    return Err(Error::general(
                        Stage::ArgumentBinding,
                        "scalar parameter without a value",
                    )
                    .with_param(idx))
                }
            },
            (_, Some(mem)) => KernelArg::Mem(mem),
            // user supplied
            (_, None) => continue,
        };

        runtime
            .set_kernel_arg(kernel.id(), idx as u32, arg)
            .map_err(|status| {
                Error::general(
                    Stage::ArgumentBinding,
                    format!("unable to bind argument {idx} of `{}`", kernel.name()),
                )
                .with_param(idx)
                .with_code(status.code())
            })?;
    }
    Ok(())
}

/// Prepares `params` as the arguments `0..params.len()` of `kernel`.
///
/// Storage is allocated for every auto allocated buffer parameter first. On
/// devices that share host memory it is created on top of the caller's data,
/// on others it is fresh device memory that is then uploaded. Only after all
/// uploads are complete are the arguments set, in parameter order.
///
/// On failure everything allocated so far is released and the error names
/// the failing parameter. The returned [`Binding`] finishes `queue` and
/// releases the storage when dropped. [`bind_scoped`] is the safe wrapper.
///
/// # Safety
/// On devices that share host memory the storage aliases the host data of
/// `params`. It must be released, by the [`Binding`] or by [`release`],
/// before that data is dropped. Leaking the binding (e.g. with
/// [`core::mem::forget`]) and then dropping the data lets a later launch of
/// `kernel` write into freed memory.
///
/// # Panics
/// If more than [`MAX_PARAMS`] parameters are given.
pub unsafe fn bind<'r: 'p, 'q: 'p, 'p, 'a, R: Runtime>(
    device: &Device,
    kernel: &'p Kernel<'r, R>,
    queue: &'p Queue<'q, R>,
    params: &'p mut [Parameter<'a>],
) -> Result<Binding<'p, 'a, R>> {
    assert!(
        params.len() <= MAX_PARAMS,
        "at most {MAX_PARAMS} parameters can be bound, got {}",
        params.len()
    );

    let runtime = kernel.runtime();
    let shares_host_memory = device.shares_host_memory();
    let mut needs_upload = [false; MAX_PARAMS];

    let bound = allocate(runtime, kernel, shares_host_memory, params, &mut needs_upload)
        .and_then(|()| upload(runtime, queue.id(), params, &needs_upload))
        .and_then(|()| set_args(runtime, kernel, params));

    if let Err(err) = bound {
        error!("unable to bind the parameters of `{}`: {err}", kernel.name());
        // slots set before the failure may refer to the storage released here
        kernel.set_args_released(true);
        let _ = release(runtime, params);
        return Err(err);
    }
    kernel.set_args_released(false);

    debug!(
        "bound {} parameter(s) of `{}` on {}",
        params.len(),
        kernel.name(),
        device.name()
    );
    Ok(Binding {
        kernel,
        queue,
        shares_host_memory,
        params,
    })
}

/// Binds `params` (see [`bind`]), runs `f` and releases the storage before
/// returning, whether `f` succeeded or not.
///
/// `queue` is finished before the release, so no launch enqueued by `f` is
/// still using the storage. Afterwards `kernel` can only be launched again
/// once it was bound anew. An error of `f` takes precedence over a failed
/// release.
/// # Example
/// ```
/// use sico::{prelude::*, params::bind_scoped};
/// use sico::devices::host::{HostDevice, HostRuntime};
///
/// fn main() -> sico::Result<()> {
///     let runtime = HostRuntime::builder()
///         .platform("host", [HostDevice::gpu("gpu")])
///         .kernel("double", |item, args| {
///             let i = item.global_id(0);
///             args.store(0, i, args.load::<u32>(0, i)? * 2)
///         })
///         .build();
///     let registry = ComputeRegistry::open(runtime)?;
///     let device = registry.select_best_device()?;
///
///     let src = "__kernel void double(__global uint* x) { x[get_global_id(0)] *= 2; }";
///     let kernel = Kernel::compile(&registry, device, &src.into(), "double", "")?;
///     let queue = Queue::new(&registry, device)?;
///
///     let mut x = [1u32, 2, 3];
///     let mut params = [Parameter::read_write(&mut x)];
///     bind_scoped(device, &kernel, &queue, &mut params, |binding| {
///         queue.enqueue_1d(&kernel, 3, None)?;
///         queue.finish()?;
///         binding.write_back()
///     })?;
///
///     assert_eq!(x, [2, 4, 6]);
///     Ok(())
/// }
/// ```
pub fn bind_scoped<'p, 'a, R, T, F>(
    device: &Device,
    kernel: &'p Kernel<'_, R>,
    queue: &'p Queue<'_, R>,
    params: &'p mut [Parameter<'a>],
    f: F,
) -> Result<T>
where
    R: Runtime,
    F: FnOnce(&mut Binding<'p, 'a, R>) -> Result<T>,
{
    // SAFETY: the binding is released before this function returns, and
    // released by its destructor if `f` unwinds
    let mut binding = unsafe { bind(device, kernel, queue, params)? };
    let out = f(&mut binding);
    let released = binding.release();

    match (out, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), released) => {
            if let Err(release_err) = released {
                warn!("unable to release the parameters of `{}`: {release_err}", kernel.name());
            }
            Err(err)
        }
    }
}

fn write_back_with<R: Runtime>(
    runtime: &R,
    queue: QueueId,
    shares_host_memory: bool,
    params: &mut [Parameter<'_>],
) -> Result<()> {
    if shares_host_memory {
        // kernels wrote straight into the caller's memory
        return Ok(());
    }

    for (idx, param) in params.iter_mut().enumerate() {
        if matches!(param.class, MemoryClass::ReadOnly | MemoryClass::Scalar) {
            continue;
        }
        let Some(mem) = param.handle else {
            continue;
        };
        let Some(dst) = param.host_bytes_mut() else {
            continue;
        };

        runtime.read_buffer(queue, mem, dst).map_err(|status| {
            error!("unable to download parameter {idx}: {status}");
            Error::general(Stage::Download, "unable to download parameter")
                .with_param(idx)
                .with_code(status.code())
        })?;
        trace!("param {idx}: downloaded {} bytes", dst.len());
    }
    Ok(())
}

/// Copies every mutable buffer parameter back into host memory.
///
/// A no-op on devices that share host memory. Read-only, scalar and user
/// supplied parameters are skipped. Stops at the first failure. Call after
/// [`Queue::finish`].
#[inline]
pub fn write_back<R: Runtime>(device: &Device, queue: &Queue<'_, R>, params: &mut [Parameter<'_>]) -> Result<()> {
    write_back_with(queue.runtime(), queue.id(), device.shares_host_memory(), params)
}

/// Frees the storage of every bound parameter and clears its handle.
///
/// Every parameter is attempted, the first failure is returned. Calling it
/// again is a no-op.
pub fn release<R: Runtime>(runtime: &R, params: &mut [Parameter<'_>]) -> Result<()> {
    let mut first_err = None;

    for (idx, param) in params.iter_mut().enumerate() {
        let Some(mem) = param.handle.take() else {
            continue;
        };

        if let Err(status) = runtime.release_buffer(mem) {
            warn!("unable to release parameter {idx}: {status}");
            first_err.get_or_insert(
                Error::general(Stage::Release, "unable to release parameter")
                    .with_param(idx)
                    .with_code(status.code()),
            );
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Parameters bound by [`bind`]. Their storage is released on drop.
pub struct Binding<'p, 'a, R: Runtime> {
    kernel: &'p Kernel<'p, R>,
    queue: &'p Queue<'p, R>,
    shares_host_memory: bool,
    params: &'p mut [Parameter<'a>],
}

impl<'a, R: Runtime> Binding<'_, 'a, R> {
    #[inline]
    pub fn params(&self) -> &[Parameter<'a>] {
        self.params
    }

    /// See [`write_back`].
    #[inline]
    pub fn write_back(&mut self) -> Result<()> {
        write_back_with(self.kernel.runtime(), self.queue.id(), self.shares_host_memory, self.params)
    }

    /// Finishes the queue, then frees the storage. The kernel's arguments
    /// are marked as released if any storage was freed.
    fn finish_and_release(&mut self) -> Result<()> {
        if self.params.iter().all(|param| param.handle.is_none()) {
            return Ok(());
        }

        // launches still queued may use the storage
        let finished = self.queue.finish();
        let released = release(self.kernel.runtime(), self.params);
        self.kernel.set_args_released(true);
        finished.and(released)
    }

    /// See [`release`]. The queue is finished first.
    #[inline]
    pub fn release(mut self) -> Result<()> {
        self.finish_and_release()
    }
}

impl<R: Runtime> Drop for Binding<'_, '_, R> {
    #[inline]
    fn drop(&mut self) {
        let _ = self.finish_and_release();
    }
}
