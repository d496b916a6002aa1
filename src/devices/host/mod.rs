//! An in-process [`Runtime`] that executes kernels written in Rust.
//!
//! Devices come in two flavours: CPU devices, whose buffers may alias caller
//! memory through [`MemFlags::USE_HOST_PTR`], and discrete devices that own
//! their storage and therefore need explicit transfers. Kernel source is
//! still "compiled": the runtime scans it for kernel declarations and binds
//! each one to a native implementation registered under the same name.
//!
//! Every call is counted in [`HostStats`], which makes the runtime usable as
//! a transfer spy in tests, and [`HostRuntime::calls`] keeps the order of
//! the memory related calls.

mod native;
mod stats;

pub use native::*;
pub use stats::{HostCall, HostStats};

use core::{cell::Cell, cell::RefCell, ptr::NonNull};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use crate::{
    runtime::{
        ClStatus, ContextId, DeviceId, DeviceInfo, DeviceKind, KernelArg, KernelId, MemFlags,
        MemId, PlatformId, ProgramId, QueueId, RtResult, Runtime, WorkSize,
    },
    status::*,
};

/// Declaration of one simulated device.
/// # Example
/// ```
/// use sico::devices::host::{HostDevice, HostRuntime};
///
/// let runtime = HostRuntime::builder()
///     .platform("Simulated", [HostDevice::cpu("cpu0"), HostDevice::gpu("gpu0").compute_units(32)])
///     .build();
/// assert_eq!(runtime.device_count(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct HostDevice {
    name: String,
    vendor: String,
    kind: DeviceKind,
    compute_units: u32,
    global_mem: u64,
    fail_context: bool,
    fail_context_release: bool,
    allocation_limit: Option<usize>,
}

impl HostDevice {
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> HostDevice {
        HostDevice {
            name: name.into(),
            vendor: "sico".into(),
            kind,
            compute_units: 1,
            global_mem: 1 << 30,
            fail_context: false,
            fail_context_release: false,
            allocation_limit: None,
        }
    }

    #[inline]
    pub fn cpu(name: impl Into<String>) -> HostDevice {
        HostDevice::new(name, DeviceKind::Cpu)
    }

    #[inline]
    pub fn gpu(name: impl Into<String>) -> HostDevice {
        HostDevice::new(name, DeviceKind::Gpu)
    }

    #[inline]
    pub fn accelerator(name: impl Into<String>) -> HostDevice {
        HostDevice::new(name, DeviceKind::Accelerator)
    }

    pub fn vendor(mut self, vendor: impl Into<String>) -> HostDevice {
        self.vendor = vendor.into();
        self
    }

    pub fn compute_units(mut self, units: u32) -> HostDevice {
        self.compute_units = units;
        self
    }

    pub fn global_mem(mut self, bytes: u64) -> HostDevice {
        self.global_mem = bytes;
        self
    }

    /// Every context creation on this device fails with `CL_DEVICE_NOT_AVAILABLE`.
    pub fn fail_context_creation(mut self) -> HostDevice {
        self.fail_context = true;
        self
    }

    /// Releasing a context of this device fails with `CL_OUT_OF_RESOURCES`.
    pub fn fail_context_release(mut self) -> HostDevice {
        self.fail_context_release = true;
        self
    }

    /// Allows `count` buffer allocations, every further one fails with
    /// `CL_MEM_OBJECT_ALLOCATION_FAILURE`.
    pub fn fail_allocation_after(mut self, count: usize) -> HostDevice {
        self.allocation_limit = Some(count);
        self
    }
}

#[derive(Default)]
pub struct HostRuntimeBuilder {
    platforms: Vec<(String, Vec<HostDevice>)>,
    kernels: HashMap<String, NativeKernel>,
    syntax_only: bool,
}

impl HostRuntimeBuilder {
    pub fn platform(
        mut self,
        name: impl Into<String>,
        devices: impl IntoIterator<Item = HostDevice>,
    ) -> Self {
        self.platforms
            .push((name.into(), devices.into_iter().collect()));
        self
    }

    /// Registers the native implementation of the kernel function `name`.
    pub fn kernel<F>(mut self, name: impl Into<String>, kernel: F) -> Self
    where
        F: Fn(&WorkItem, &KernelArgs<'_>) -> Result<(), KernelFault> + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(kernel));
        self
    }

    /// Builds succeed for declared kernels without a native implementation.
    /// Entry points of such kernels still can't be created.
    pub fn syntax_only(mut self) -> Self {
        self.syntax_only = true;
        self
    }

    pub fn build(self) -> HostRuntime {
        let mut platforms = Vec::with_capacity(self.platforms.len());
        let mut devices = Vec::new();

        for (name, platform_devices) in self.platforms {
            let start = devices.len();
            devices.extend(platform_devices);
            platforms.push(HostPlatform {
                name,
                devices: (start..devices.len()).collect(),
            });
        }

        HostRuntime {
            platforms,
            devices,
            natives: RefCell::new(self.kernels),
            syntax_only: self.syntax_only,
            state: Default::default(),
            stats: Default::default(),
            calls: Default::default(),
        }
    }
}

struct HostPlatform {
    name: String,
    devices: Vec<usize>,
}

struct HostProgram {
    context: u64,
    source: String,
    built: bool,
    log: String,
    declarations: Vec<Declaration>,
}

#[derive(Debug, Clone)]
enum BoundArg {
    Mem(u64),
    Value(Vec<u8>),
}

struct HostKernel {
    context: u64,
    name: String,
    func: NativeKernel,
    args: Vec<Option<BoundArg>>,
}

struct Launch {
    kernel: String,
    func: NativeKernel,
    args: Vec<BoundArg>,
    work: WorkSize,
}

struct HostQueue {
    context: u64,
    pending: VecDeque<Launch>,
    faulted: bool,
}

enum Storage {
    /// Caller memory, see the safety contract of [`Runtime::create_buffer`].
    HostBacked { ptr: NonNull<u8>, len: usize },
    Owned(Vec<u8>),
}

impl Storage {
    #[inline]
    fn len(&self) -> usize {
        match self {
            Storage::HostBacked { len, .. } => *len,
            Storage::Owned(data) => data.len(),
        }
    }

    #[inline]
    fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            Storage::HostBacked { ptr, .. } => ptr.as_ptr(),
            Storage::Owned(data) => data.as_mut_ptr(),
        }
    }
}

struct HostBuffer {
    context: u64,
    flags: MemFlags,
    storage: Storage,
}

#[derive(Default)]
struct HostState {
    last_id: u64,
    /// context -> device index
    contexts: HashMap<u64, usize>,
    programs: HashMap<u64, HostProgram>,
    kernels: HashMap<u64, HostKernel>,
    queues: HashMap<u64, HostQueue>,
    buffers: HashMap<u64, HostBuffer>,
    /// device index -> successful allocations
    allocations: HashMap<usize, usize>,
}

impl HostState {
    #[inline]
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn queue_context(&self, queue: QueueId) -> RtResult<u64> {
        self.queues
            .get(&queue.0)
            .map(|q| q.context)
            .ok_or(ClStatus(CL_INVALID_COMMAND_QUEUE))
    }

    /// Runs every pending launch of `queue` in submission order.
    /// A faulting launch discards the launches behind it.
    fn drain(&mut self, queue: QueueId) -> RtResult<()> {
        let q = self
            .queues
            .get_mut(&queue.0)
            .ok_or(ClStatus(CL_INVALID_COMMAND_QUEUE))?;
        let pending = core::mem::take(&mut q.pending);

        for launch in pending {
            if let Err(fault) = execute(&mut self.buffers, &launch) {
                log::error!("host kernel `{}` faulted: {fault}", launch.kernel);
                if let Some(q) = self.queues.get_mut(&queue.0) {
                    q.faulted = true;
                }
                break;
            }
        }
        Ok(())
    }

    /// Drains `queue` and reports a fault of any launch since the last blocking call.
    fn sync(&mut self, queue: QueueId) -> RtResult<()> {
        self.drain(queue)?;
        match self.queues.get_mut(&queue.0) {
            Some(q) if q.faulted => {
                q.faulted = false;
                Err(ClStatus(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST))
            }
            Some(_) => Ok(()),
            None => Err(ClStatus(CL_INVALID_COMMAND_QUEUE)),
        }
    }
}

fn execute(buffers: &mut HashMap<u64, HostBuffer>, launch: &Launch) -> Result<(), KernelFault> {
    let mut resolved = Vec::with_capacity(launch.args.len());
    for arg in &launch.args {
        resolved.push(match arg {
            BoundArg::Mem(id) => {
                let buf = buffers
                    .get_mut(id)
                    .ok_or(KernelFault::Custom("argument refers to a released memory object"))?;
                ResolvedArg::Buffer {
                    ptr: buf.storage.as_mut_ptr(),
                    len: buf.storage.len(),
                    writable: buf.flags.device_writable(),
                }
            }
            BoundArg::Value(bytes) => ResolvedArg::Value(bytes.clone()),
        });
    }

    // SAFETY: the storage behind each pointer lives in `buffers`, which is
    // borrowed mutably for the whole launch
    let args = unsafe { KernelArgs::new(&resolved) };

    let work = &launch.work;
    let global = work.global3();
    let offset = work.offset3();
    let local = work.local3().unwrap_or([1; 3]);

    for z in 0..global[2] {
        for y in 0..global[1] {
            for x in 0..global[0] {
                let pos = [x, y, z];
                let item = WorkItem {
                    dims: work.dims(),
                    global_id: core::array::from_fn(|d| pos[d] + offset[d]),
                    global_size: global,
                    global_offset: offset,
                    local_id: core::array::from_fn(|d| pos[d] % local[d]),
                    local_size: local,
                    group_id: core::array::from_fn(|d| pos[d] / local[d]),
                };
                (launch.func)(&item, &args)?;
            }
        }
    }
    Ok(())
}

fn check_build_options(options: &str) -> Result<(), String> {
    const KNOWN: [&str; 5] = ["-D", "-I", "-cl-", "-w", "-Werror"];

    for opt in options.split_whitespace() {
        if opt.starts_with('-') && !KNOWN.iter().any(|known| opt.starts_with(known)) {
            return Err(format!("error: unknown build option '{opt}'"));
        }
    }
    Ok(())
}

/// The simulated runtime, see the [module docs](self).
/// # Example
/// ```
/// use sico::devices::host::HostRuntime;
/// use sico::Runtime;
///
/// let runtime = HostRuntime::new();
/// let platforms = runtime.platforms().unwrap();
/// assert_eq!(runtime.devices(platforms[0]).unwrap().len(), 1);
/// assert_eq!(runtime.stats().platform_queries, 1);
/// ```
pub struct HostRuntime {
    platforms: Vec<HostPlatform>,
    devices: Vec<HostDevice>,
    natives: RefCell<HashMap<String, NativeKernel>>,
    syntax_only: bool,
    state: RefCell<HostState>,
    stats: Cell<HostStats>,
    calls: RefCell<Vec<HostCall>>,
}

impl Default for HostRuntime {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl HostRuntime {
    /// One platform with a single CPU device and no registered kernels.
    pub fn new() -> HostRuntime {
        let units = std::thread::available_parallelism().map_or(1, |n| n.get() as u32);
        HostRuntime::builder()
            .platform("sico host", [HostDevice::cpu("Host CPU").compute_units(units)])
            .build()
    }

    #[inline]
    pub fn builder() -> HostRuntimeBuilder {
        HostRuntimeBuilder::default()
    }

    /// Registers (or replaces) the native implementation of the kernel function `name`.
    /// Affects programs built afterwards.
    pub fn register<F>(&self, name: impl Into<String>, kernel: F)
    where
        F: Fn(&WorkItem, &KernelArgs<'_>) -> Result<(), KernelFault> + Send + Sync + 'static,
    {
        self.natives.borrow_mut().insert(name.into(), Arc::new(kernel));
    }

    #[inline]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    #[inline]
    pub fn stats(&self) -> HostStats {
        self.stats.get()
    }

    /// Buffer, argument and launch calls since creation or the last [`reset_stats`](Self::reset_stats).
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.borrow().clone()
    }

    /// Resets the counters and the call log.
    pub fn reset_stats(&self) {
        self.stats.set(HostStats::default());
        self.calls.borrow_mut().clear();
    }

    #[inline]
    fn record(&self, call: HostCall) {
        self.calls.borrow_mut().push(call);
    }

    #[inline]
    fn bump(&self, f: impl FnOnce(&mut HostStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn device(&self, device: DeviceId) -> RtResult<&HostDevice> {
        self.devices
            .get(device.0 as usize)
            .ok_or(ClStatus(CL_INVALID_DEVICE))
    }
}

impl Runtime for HostRuntime {
    #[inline]
    fn name(&self) -> &str {
        "host"
    }

    fn platforms(&self) -> RtResult<Vec<PlatformId>> {
        self.bump(|s| s.platform_queries += 1);
        Ok((0..self.platforms.len() as u64).map(PlatformId).collect())
    }

    fn platform_name(&self, platform: PlatformId) -> RtResult<String> {
        self.platforms
            .get(platform.0 as usize)
            .map(|p| p.name.clone())
            .ok_or(ClStatus(CL_INVALID_PLATFORM))
    }

    fn devices(&self, platform: PlatformId) -> RtResult<Vec<DeviceId>> {
        self.bump(|s| s.device_queries += 1);
        let platform = self
            .platforms
            .get(platform.0 as usize)
            .ok_or(ClStatus(CL_INVALID_PLATFORM))?;
        Ok(platform
            .devices
            .iter()
            .map(|idx| DeviceId(*idx as u64))
            .collect())
    }

    fn device_info(&self, device: DeviceId) -> RtResult<DeviceInfo> {
        let dev = self.device(device)?;
        Ok(DeviceInfo {
            name: dev.name.clone(),
            vendor: dev.vendor.clone(),
            version: "OpenCL 1.2 sico host".into(),
            driver_version: env!("CARGO_PKG_VERSION").into(),
            c_version: "OpenCL C 1.2 (native)".into(),
            kind: dev.kind,
            compute_units: dev.compute_units,
            global_mem: dev.global_mem,
            host_unified_memory: dev.kind == DeviceKind::Cpu,
        })
    }

    fn create_context(&self, device: DeviceId) -> RtResult<ContextId> {
        if self.device(device)?.fail_context {
            return Err(ClStatus(CL_DEVICE_NOT_AVAILABLE));
        }
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.contexts.insert(id, device.0 as usize);
        self.bump(|s| s.contexts_created += 1);
        Ok(ContextId(id))
    }

    fn release_context(&self, context: ContextId) -> RtResult<()> {
        let mut state = self.state.borrow_mut();
        let device = *state
            .contexts
            .get(&context.0)
            .ok_or(ClStatus(CL_INVALID_CONTEXT))?;

        if self.devices[device].fail_context_release {
            return Err(ClStatus(CL_OUT_OF_RESOURCES));
        }
        state.contexts.remove(&context.0);
        self.bump(|s| s.contexts_released += 1);
        Ok(())
    }

    fn create_program(&self, context: ContextId, source: &[u8]) -> RtResult<ProgramId> {
        let mut state = self.state.borrow_mut();
        if !state.contexts.contains_key(&context.0) {
            return Err(ClStatus(CL_INVALID_CONTEXT));
        }

        let end = source.iter().position(|b| *b == 0).unwrap_or(source.len());
        let source = core::str::from_utf8(&source[..end]).map_err(|_| ClStatus(CL_INVALID_VALUE))?;
        if source.is_empty() {
            return Err(ClStatus(CL_INVALID_VALUE));
        }

        let id = state.next_id();
        state.programs.insert(
            id,
            HostProgram {
                context: context.0,
                source: source.to_string(),
                built: false,
                log: String::new(),
                declarations: Vec::new(),
            },
        );
        Ok(ProgramId(id))
    }

    fn build_program(&self, program: ProgramId, device: DeviceId, options: &str) -> RtResult<()> {
        self.device(device)?;
        let natives = self.natives.borrow();
        let mut state = self.state.borrow_mut();
        let state = &mut *state;

        let prog = state
            .programs
            .get_mut(&program.0)
            .ok_or(ClStatus(CL_INVALID_PROGRAM))?;
        if state.contexts.get(&prog.context) != Some(&(device.0 as usize)) {
            return Err(ClStatus(CL_INVALID_DEVICE));
        }

        prog.built = false;
        prog.declarations.clear();

        if let Err(log) = check_build_options(options) {
            prog.log = log;
            return Err(ClStatus(CL_INVALID_BUILD_OPTIONS));
        }

        let scanned = scan_kernels(&prog.source).and_then(|decls| {
            let missing = decls
                .iter()
                .filter(|decl| !self.syntax_only && !natives.contains_key(&decl.name))
                .map(|decl| {
                    format!(
                        "<source>:{}: error: no native implementation registered for kernel '{}'",
                        decl.line, decl.name
                    )
                })
                .collect::<Vec<_>>();

            if missing.is_empty() {
                Ok(decls)
            } else {
                Err(missing)
            }
        });

        match scanned {
            Ok(decls) => {
                prog.declarations = decls;
                prog.built = true;
                prog.log.clear();
                self.bump(|s| s.programs_built += 1);
                Ok(())
            }
            Err(diagnostics) => {
                prog.log = diagnostics.join("\n");
                Err(ClStatus(CL_BUILD_PROGRAM_FAILURE))
            }
        }
    }

    fn build_log(&self, program: ProgramId, _device: DeviceId) -> RtResult<String> {
        self.state
            .borrow()
            .programs
            .get(&program.0)
            .map(|prog| prog.log.clone())
            .ok_or(ClStatus(CL_INVALID_PROGRAM))
    }

    fn release_program(&self, program: ProgramId) -> RtResult<()> {
        self.state
            .borrow_mut()
            .programs
            .remove(&program.0)
            .map(|_| ())
            .ok_or(ClStatus(CL_INVALID_PROGRAM))
    }

    fn create_kernel(&self, program: ProgramId, name: &str) -> RtResult<KernelId> {
        let natives = self.natives.borrow();
        let mut state = self.state.borrow_mut();

        let prog = state
            .programs
            .get(&program.0)
            .ok_or(ClStatus(CL_INVALID_PROGRAM))?;
        if !prog.built {
            return Err(ClStatus(CL_INVALID_PROGRAM_EXECUTABLE));
        }

        let decl = prog
            .declarations
            .iter()
            .find(|decl| decl.name == name)
            .ok_or(ClStatus(CL_INVALID_KERNEL_NAME))?;
        let func = natives
            .get(name)
            .cloned()
            .ok_or(ClStatus(CL_INVALID_KERNEL_NAME))?;

        let kernel = HostKernel {
            context: prog.context,
            name: name.to_string(),
            func,
            args: vec![None; decl.arity],
        };

        let id = state.next_id();
        state.kernels.insert(id, kernel);
        self.bump(|s| s.kernels_created += 1);
        Ok(KernelId(id))
    }

    fn release_kernel(&self, kernel: KernelId) -> RtResult<()> {
        self.state
            .borrow_mut()
            .kernels
            .remove(&kernel.0)
            .ok_or(ClStatus(CL_INVALID_KERNEL))?;
        self.bump(|s| s.kernels_released += 1);
        Ok(())
    }

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, arg: KernelArg<'_>) -> RtResult<()> {
        let mut state = self.state.borrow_mut();
        let state = &mut *state;

        let kernel = state
            .kernels
            .get_mut(&kernel.0)
            .ok_or(ClStatus(CL_INVALID_KERNEL))?;
        let slot = kernel
            .args
            .get_mut(index as usize)
            .ok_or(ClStatus(CL_INVALID_ARG_INDEX))?;

        let mem = match arg {
            KernelArg::Mem(mem) => Some(mem),
            KernelArg::Value(_) => None,
        };
        *slot = Some(match arg {
            KernelArg::Mem(mem) => match state.buffers.get(&mem.0) {
                Some(buf) if buf.context == kernel.context => BoundArg::Mem(mem.0),
                Some(_) => return Err(ClStatus(CL_INVALID_CONTEXT)),
                None => return Err(ClStatus(CL_INVALID_MEM_OBJECT)),
            },
            KernelArg::Value([]) => return Err(ClStatus(CL_INVALID_ARG_SIZE)),
            KernelArg::Value(bytes) => BoundArg::Value(bytes.to_vec()),
        });
        self.bump(|s| s.arg_sets += 1);
        self.record(HostCall::SetArg { index, mem });
        Ok(())
    }

    fn create_queue(&self, context: ContextId, device: DeviceId) -> RtResult<QueueId> {
        let mut state = self.state.borrow_mut();
        let ctx_device = *state
            .contexts
            .get(&context.0)
            .ok_or(ClStatus(CL_INVALID_CONTEXT))?;
        if ctx_device != device.0 as usize {
            return Err(ClStatus(CL_INVALID_DEVICE));
        }

        let id = state.next_id();
        state.queues.insert(
            id,
            HostQueue {
                context: context.0,
                pending: VecDeque::new(),
                faulted: false,
            },
        );
        self.bump(|s| s.queues_created += 1);
        Ok(QueueId(id))
    }

    fn release_queue(&self, queue: QueueId) -> RtResult<()> {
        let mut state = self.state.borrow_mut();
        // releasing implicitly flushes
        state.drain(queue)?;
        state.queues.remove(&queue.0);
        self.bump(|s| s.queues_released += 1);
        Ok(())
    }

    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, work: &WorkSize) -> RtResult<()> {
        let mut state = self.state.borrow_mut();
        let queue_context = state.queue_context(queue)?;

        let kernel = state
            .kernels
            .get(&kernel.0)
            .ok_or(ClStatus(CL_INVALID_KERNEL))?;
        if kernel.context != queue_context {
            return Err(ClStatus(CL_INVALID_CONTEXT));
        }

        work.validate()?;
        if let Some(local) = work.local3() {
            let global = work.global3();
            if (0..3).any(|d| local[d] == 0 || global[d] % local[d] != 0) {
                return Err(ClStatus(CL_INVALID_WORK_GROUP_SIZE));
            }
        }

        let args = kernel
            .args
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or(ClStatus(CL_INVALID_KERNEL_ARGS))?;

        let launch = Launch {
            kernel: kernel.name.clone(),
            func: kernel.func.clone(),
            args,
            work: *work,
        };
        log::trace!("host: enqueue `{}` over {:?}", launch.kernel, work.global());

        if let Some(q) = state.queues.get_mut(&queue.0) {
            q.pending.push_back(launch);
        }
        self.bump(|s| s.launches += 1);
        self.record(HostCall::Launch);
        Ok(())
    }

    fn finish(&self, queue: QueueId) -> RtResult<()> {
        self.bump(|s| s.finishes += 1);
        self.record(HostCall::Finish);
        self.state.borrow_mut().sync(queue)
    }

    fn flush(&self, queue: QueueId) -> RtResult<()> {
        self.bump(|s| s.flushes += 1);
        self.state.borrow_mut().drain(queue)
    }

    unsafe fn create_buffer(
        &self,
        context: ContextId,
        flags: MemFlags,
        size: usize,
        host: Option<NonNull<u8>>,
    ) -> RtResult<MemId> {
        let mut state = self.state.borrow_mut();
        let device = *state
            .contexts
            .get(&context.0)
            .ok_or(ClStatus(CL_INVALID_CONTEXT))?;
        let dev = &self.devices[device];

        if size == 0 || size as u64 > dev.global_mem {
            return Err(ClStatus(CL_INVALID_BUFFER_SIZE));
        }

        let use_host = flags.contains(MemFlags::USE_HOST_PTR);
        let copy_host = flags.contains(MemFlags::COPY_HOST_PTR);
        if use_host && copy_host {
            return Err(ClStatus(CL_INVALID_VALUE));
        }
        if (use_host || copy_host) != host.is_some() {
            return Err(ClStatus(CL_INVALID_HOST_PTR));
        }

        let allocated = state.allocations.get(&device).copied().unwrap_or(0);
        if dev.allocation_limit.is_some_and(|limit| allocated >= limit) {
            return Err(ClStatus(CL_MEM_OBJECT_ALLOCATION_FAILURE));
        }

        let storage = match host {
            Some(ptr) if use_host => Storage::HostBacked { ptr, len: size },
            Some(ptr) => {
                // SAFETY: the caller guarantees `size` readable bytes behind `ptr`
                let src = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), size) };
                Storage::Owned(src.to_vec())
            }
            None => Storage::Owned(vec![0; size]),
        };

        *state.allocations.entry(device).or_default() += 1;
        let id = state.next_id();
        state.buffers.insert(
            id,
            HostBuffer {
                context: context.0,
                flags,
                storage,
            },
        );

        self.bump(|s| {
            s.buffers_created += 1;
            s.host_backed_buffers += use_host as usize;
        });
        self.record(HostCall::CreateBuffer(MemId(id)));
        Ok(MemId(id))
    }

    fn release_buffer(&self, mem: MemId) -> RtResult<()> {
        self.state
            .borrow_mut()
            .buffers
            .remove(&mem.0)
            .ok_or(ClStatus(CL_INVALID_MEM_OBJECT))?;
        self.bump(|s| s.buffers_released += 1);
        self.record(HostCall::ReleaseBuffer(mem));
        Ok(())
    }

    fn write_buffer(&self, queue: QueueId, mem: MemId, src: &[u8]) -> RtResult<()> {
        let mut state = self.state.borrow_mut();
        state.sync(queue)?;
        let queue_context = state.queue_context(queue)?;

        let buf = state
            .buffers
            .get_mut(&mem.0)
            .ok_or(ClStatus(CL_INVALID_MEM_OBJECT))?;
        if buf.context != queue_context {
            return Err(ClStatus(CL_INVALID_CONTEXT));
        }
        if src.len() > buf.storage.len() {
            return Err(ClStatus(CL_INVALID_VALUE));
        }

        // host backed storage may alias `src`
        unsafe { core::ptr::copy(src.as_ptr(), buf.storage.as_mut_ptr(), src.len()) };
        self.bump(|s| s.uploads += 1);
        self.record(HostCall::Upload(mem));
        Ok(())
    }

    fn read_buffer(&self, queue: QueueId, mem: MemId, dst: &mut [u8]) -> RtResult<()> {
        let mut state = self.state.borrow_mut();
        state.sync(queue)?;
        let queue_context = state.queue_context(queue)?;

        let buf = state
            .buffers
            .get_mut(&mem.0)
            .ok_or(ClStatus(CL_INVALID_MEM_OBJECT))?;
        if buf.context != queue_context {
            return Err(ClStatus(CL_INVALID_CONTEXT));
        }
        if dst.len() > buf.storage.len() {
            return Err(ClStatus(CL_INVALID_VALUE));
        }

        unsafe { core::ptr::copy(buf.storage.as_mut_ptr(), dst.as_mut_ptr(), dst.len()) };
        self.bump(|s| s.downloads += 1);
        self.record(HostCall::Download(mem));
        Ok(())
    }
}
