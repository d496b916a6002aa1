//! The OpenCL runtime, backed by the system's OpenCL ICD loader through `opencl3`.

use core::{cell::RefCell, ffi::c_void, ptr::NonNull};
use std::collections::HashMap;

use opencl3::{
    command_queue::CommandQueue,
    context::Context,
    device::{
        Device as ClDevice, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
        CL_DEVICE_TYPE_GPU,
    },
    error_codes::ClError,
    kernel::Kernel as ClKernel,
    memory::{Buffer, ClMem},
    platform::{get_platforms, Platform},
    program::Program,
    types::{cl_device_id, cl_device_type, CL_BLOCKING},
};

use crate::{
    runtime::{
        ClStatus, ContextId, DeviceId, DeviceInfo, DeviceKind, KernelArg, KernelId, MemFlags,
        MemId, PlatformId, ProgramId, QueueId, RtResult, Runtime, WorkSize,
    },
    status::{
        CL_INVALID_ARG_SIZE, CL_INVALID_COMMAND_QUEUE, CL_INVALID_CONTEXT, CL_INVALID_DEVICE,
        CL_INVALID_KERNEL, CL_INVALID_MEM_OBJECT, CL_INVALID_PLATFORM, CL_INVALID_PROGRAM,
        CL_INVALID_VALUE,
    },
};

#[inline]
fn status(err: ClError) -> ClStatus {
    ClStatus(err.0)
}

fn device_kind(ty: cl_device_type) -> DeviceKind {
    if ty & CL_DEVICE_TYPE_GPU != 0 {
        DeviceKind::Gpu
    } else if ty & CL_DEVICE_TYPE_CPU != 0 {
        DeviceKind::Cpu
    } else if ty & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceKind::Accelerator
    } else {
        DeviceKind::Custom
    }
}

/// Sets a by-value argument of `bytes.len()` bytes.
/// Only sizes of OpenCL C scalar and vector types are supported.
fn set_value_arg(kernel: &ClKernel, index: u32, bytes: &[u8]) -> RtResult<()> {
    macro_rules! set_sized {
        ($($n:literal),*) => {
            match bytes.len() {
                $($n => {
                    let mut value = [0u8; $n];
                    value.copy_from_slice(bytes);
                    unsafe { kernel.set_arg(index, &value) }.map_err(status)
                })*
                _ => Err(ClStatus(CL_INVALID_ARG_SIZE)),
            }
        };
    }
    set_sized!(1, 2, 4, 8, 12, 16, 32, 64, 128)
}

#[derive(Default)]
struct Arena {
    last_id: u64,
    contexts: HashMap<u64, Context>,
    programs: HashMap<u64, Program>,
    kernels: HashMap<u64, ClKernel>,
    queues: HashMap<u64, CommandQueue>,
    buffers: HashMap<u64, Buffer<u8>>,
}

impl Arena {
    #[inline]
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }
}

/// Maps the [`Runtime`] calls onto OpenCL.
///
/// OpenCL objects are kept in integer-ID arenas and released when removed.
/// # Example
/// ```no_run
/// use sico::{ComputeRegistry, devices::opencl::OpenClRuntime, listing::device_listing};
///
/// fn main() -> sico::Result<()> {
///     let registry = ComputeRegistry::open(OpenClRuntime::new())?;
///     println!("{}", device_listing(&registry)?);
///     Ok(())
/// }
/// ```
#[derive(Default)]
pub struct OpenClRuntime {
    platforms: RefCell<Vec<Platform>>,
    devices: RefCell<Vec<cl_device_id>>,
    arena: RefCell<Arena>,
}

impl OpenClRuntime {
    #[inline]
    pub fn new() -> OpenClRuntime {
        OpenClRuntime::default()
    }

    fn cl_device(&self, device: DeviceId) -> RtResult<cl_device_id> {
        self.devices
            .borrow()
            .get(device.0 as usize)
            .copied()
            .ok_or(ClStatus(CL_INVALID_DEVICE))
    }

    fn insert<T>(&self, pick: impl FnOnce(&mut Arena) -> &mut HashMap<u64, T>, value: T) -> u64 {
        let mut arena = self.arena.borrow_mut();
        let id = arena.next_id();
        pick(&mut *arena).insert(id, value);
        id
    }
}

impl Runtime for OpenClRuntime {
    #[inline]
    fn name(&self) -> &str {
        "opencl"
    }

    fn platforms(&self) -> RtResult<Vec<PlatformId>> {
        let platforms = get_platforms().map_err(status)?;
        let ids = (0..platforms.len() as u64).map(PlatformId).collect();
        *self.platforms.borrow_mut() = platforms;
        Ok(ids)
    }

    fn platform_name(&self, platform: PlatformId) -> RtResult<String> {
        self.platforms
            .borrow()
            .get(platform.0 as usize)
            .ok_or(ClStatus(CL_INVALID_PLATFORM))?
            .name()
            .map_err(status)
    }

    fn devices(&self, platform: PlatformId) -> RtResult<Vec<DeviceId>> {
        let ids = self
            .platforms
            .borrow()
            .get(platform.0 as usize)
            .ok_or(ClStatus(CL_INVALID_PLATFORM))?
            .get_devices(CL_DEVICE_TYPE_ALL)
            .map_err(status)?;

        let mut devices = self.devices.borrow_mut();
        Ok(ids
            .into_iter()
            .map(|id| {
                let idx = devices.iter().position(|known| *known == id).unwrap_or_else(|| {
                    devices.push(id);
                    devices.len() - 1
                });
                DeviceId(idx as u64)
            })
            .collect())
    }

    fn device_info(&self, device: DeviceId) -> RtResult<DeviceInfo> {
        let dev = ClDevice::new(self.cl_device(device)?);

        Ok(DeviceInfo {
            name: dev.name().map_err(status)?.trim().to_string(),
            vendor: dev.vendor().map_err(status)?,
            version: dev.version().map_err(status)?,
            driver_version: dev.driver_version().map_err(status)?,
            c_version: dev.opencl_c_version().map_err(status)?,
            kind: device_kind(dev.dev_type().map_err(status)?),
            compute_units: dev.max_compute_units().map_err(status)?,
            global_mem: dev.global_mem_size().map_err(status)?,
            host_unified_memory: dev.host_unified_memory().unwrap_or(false),
        })
    }

    fn create_context(&self, device: DeviceId) -> RtResult<ContextId> {
        let dev = ClDevice::new(self.cl_device(device)?);
        let context = Context::from_device(&dev).map_err(status)?;
        Ok(ContextId(self.insert(|a| &mut a.contexts, context)))
    }

    fn release_context(&self, context: ContextId) -> RtResult<()> {
        self.arena
            .borrow_mut()
            .contexts
            .remove(&context.0)
            .map(drop)
            .ok_or(ClStatus(CL_INVALID_CONTEXT))
    }

    fn create_program(&self, context: ContextId, source: &[u8]) -> RtResult<ProgramId> {
        // opencl3 passes the length explicitly, the terminator stays behind
        let end = source.iter().position(|b| *b == 0).unwrap_or(source.len());
        let source = core::str::from_utf8(&source[..end]).map_err(|_| ClStatus(CL_INVALID_VALUE))?;
        let program = {
            let arena = self.arena.borrow();
            let context = arena
                .contexts
                .get(&context.0)
                .ok_or(ClStatus(CL_INVALID_CONTEXT))?;
            Program::create_from_source(context, source).map_err(status)?
        };
        Ok(ProgramId(self.insert(|a| &mut a.programs, program)))
    }

    fn build_program(&self, program: ProgramId, device: DeviceId, options: &str) -> RtResult<()> {
        let device = self.cl_device(device)?;
        self.arena
            .borrow_mut()
            .programs
            .get_mut(&program.0)
            .ok_or(ClStatus(CL_INVALID_PROGRAM))?
            .build(&[device], options)
            .map_err(status)
    }

    fn build_log(&self, program: ProgramId, device: DeviceId) -> RtResult<String> {
        let device = self.cl_device(device)?;
        self.arena
            .borrow()
            .programs
            .get(&program.0)
            .ok_or(ClStatus(CL_INVALID_PROGRAM))?
            .get_build_log(device)
            .map_err(status)
    }

    fn release_program(&self, program: ProgramId) -> RtResult<()> {
        self.arena
            .borrow_mut()
            .programs
            .remove(&program.0)
            .map(drop)
            .ok_or(ClStatus(CL_INVALID_PROGRAM))
    }

    fn create_kernel(&self, program: ProgramId, name: &str) -> RtResult<KernelId> {
        let kernel = {
            let arena = self.arena.borrow();
            let program = arena
                .programs
                .get(&program.0)
                .ok_or(ClStatus(CL_INVALID_PROGRAM))?;
            ClKernel::create(program, name).map_err(status)?
        };
        Ok(KernelId(self.insert(|a| &mut a.kernels, kernel)))
    }

    fn release_kernel(&self, kernel: KernelId) -> RtResult<()> {
        self.arena
            .borrow_mut()
            .kernels
            .remove(&kernel.0)
            .map(drop)
            .ok_or(ClStatus(CL_INVALID_KERNEL))
    }

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, arg: KernelArg<'_>) -> RtResult<()> {
        let arena = self.arena.borrow();
        let kernel = arena
            .kernels
            .get(&kernel.0)
            .ok_or(ClStatus(CL_INVALID_KERNEL))?;

        match arg {
            KernelArg::Mem(mem) => {
                let mem = arena
                    .buffers
                    .get(&mem.0)
                    .ok_or(ClStatus(CL_INVALID_MEM_OBJECT))?
                    .get();
                unsafe { kernel.set_arg(index, &mem) }.map_err(status)
            }
            KernelArg::Value(bytes) => set_value_arg(kernel, index, bytes),
        }
    }

    fn create_queue(&self, context: ContextId, _device: DeviceId) -> RtResult<QueueId> {
        let queue = {
            let arena = self.arena.borrow();
            let context = arena
                .contexts
                .get(&context.0)
                .ok_or(ClStatus(CL_INVALID_CONTEXT))?;
            // the context holds exactly the device
            CommandQueue::create_default(context, 0).map_err(status)?
        };
        Ok(QueueId(self.insert(|a| &mut a.queues, queue)))
    }

    fn release_queue(&self, queue: QueueId) -> RtResult<()> {
        self.arena
            .borrow_mut()
            .queues
            .remove(&queue.0)
            .map(drop)
            .ok_or(ClStatus(CL_INVALID_COMMAND_QUEUE))
    }

    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, work: &WorkSize) -> RtResult<()> {
        let arena = self.arena.borrow();
        let queue = arena
            .queues
            .get(&queue.0)
            .ok_or(ClStatus(CL_INVALID_COMMAND_QUEUE))?;
        let kernel = arena
            .kernels
            .get(&kernel.0)
            .ok_or(ClStatus(CL_INVALID_KERNEL))?;

        work.validate()?;
        let offset = work.offset3();
        let global = work.global3();
        let local = work.local3();

        unsafe {
            queue.enqueue_nd_range_kernel(
                kernel.get(),
                work.dims() as u32,
                if work.offset().is_some() {
                    offset.as_ptr()
                } else {
                    core::ptr::null()
                },
                global.as_ptr(),
                local
                    .as_ref()
                    .map_or(core::ptr::null(), |local| local.as_ptr()),
                &[],
            )
        }
        .map(drop)
        .map_err(status)
    }

    fn finish(&self, queue: QueueId) -> RtResult<()> {
        self.arena
            .borrow()
            .queues
            .get(&queue.0)
            .ok_or(ClStatus(CL_INVALID_COMMAND_QUEUE))?
            .finish()
            .map_err(status)
    }

    fn flush(&self, queue: QueueId) -> RtResult<()> {
        self.arena
            .borrow()
            .queues
            .get(&queue.0)
            .ok_or(ClStatus(CL_INVALID_COMMAND_QUEUE))?
            .flush()
            .map_err(status)
    }

    unsafe fn create_buffer(
        &self,
        context: ContextId,
        flags: MemFlags,
        size: usize,
        host: Option<NonNull<u8>>,
    ) -> RtResult<MemId> {
        let buffer = {
            let arena = self.arena.borrow();
            let context = arena
                .contexts
                .get(&context.0)
                .ok_or(ClStatus(CL_INVALID_CONTEXT))?;
            let host = host.map_or(core::ptr::null_mut(), |ptr| ptr.as_ptr().cast::<c_void>());

            // MemFlags share the cl_mem_flags bit values
            unsafe { Buffer::<u8>::create(context, flags.bits(), size, host) }.map_err(status)?
        };
        Ok(MemId(self.insert(|a| &mut a.buffers, buffer)))
    }

    fn release_buffer(&self, mem: MemId) -> RtResult<()> {
        self.arena
            .borrow_mut()
            .buffers
            .remove(&mem.0)
            .map(drop)
            .ok_or(ClStatus(CL_INVALID_MEM_OBJECT))
    }

    fn write_buffer(&self, queue: QueueId, mem: MemId, src: &[u8]) -> RtResult<()> {
        let mut arena = self.arena.borrow_mut();
        let arena = &mut *arena;
        let queue = arena
            .queues
            .get(&queue.0)
            .ok_or(ClStatus(CL_INVALID_COMMAND_QUEUE))?;
        let buffer = arena
            .buffers
            .get_mut(&mem.0)
            .ok_or(ClStatus(CL_INVALID_MEM_OBJECT))?;

        unsafe { queue.enqueue_write_buffer(buffer, CL_BLOCKING, 0, src, &[]) }
            .map(drop)
            .map_err(status)
    }

    fn read_buffer(&self, queue: QueueId, mem: MemId, dst: &mut [u8]) -> RtResult<()> {
        let arena = self.arena.borrow();
        let queue = arena
            .queues
            .get(&queue.0)
            .ok_or(ClStatus(CL_INVALID_COMMAND_QUEUE))?;
        let buffer = arena
            .buffers
            .get(&mem.0)
            .ok_or(ClStatus(CL_INVALID_MEM_OBJECT))?;

        unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, 0, dst, &[]) }
            .map(drop)
            .map_err(status)
    }
}
