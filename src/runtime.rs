//! The seam between this crate and the lower-level compute runtime.
//!
//! Every object the runtime hands out is an opaque, `Copy` integer ID. The
//! runtime owns the real resource behind the ID until the matching `release_*`
//! call.

use core::{fmt, ops::BitOr, ptr::NonNull};

use crate::status::{error_string, CL_INVALID_GLOBAL_WORK_SIZE, CL_INVALID_WORK_DIMENSION};

/// A failed runtime call, carrying the runtime's numeric status code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClStatus(pub i32);

impl ClStatus {
    #[inline]
    pub fn code(self) -> i32 {
        self.0
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        error_string(self.0)
    }
}

impl fmt::Debug for ClStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.0)
    }
}

impl fmt::Display for ClStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::error::Error for ClStatus {}

pub type RtResult<T> = core::result::Result<T, ClStatus>;

macro_rules! handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);
        )*
    };
}

handle! {
    /// A platform (driver) exposed by the runtime.
    PlatformId,
    /// A device as known to the runtime.
    DeviceId,
    ContextId,
    ProgramId,
    KernelId,
    QueueId,
    /// Device-side storage.
    MemId,
}

/// Hardware category reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Accelerator,
    Custom,
}

/// The only device property memory decisions depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceClass {
    /// Host-resident compute that reads and writes host memory directly.
    Cpu,
    /// GPUs and accelerators with their own memory space.
    Other,
}

impl DeviceKind {
    #[inline]
    pub fn class(self) -> DeviceClass {
        match self {
            DeviceKind::Cpu => DeviceClass::Cpu,
            _ => DeviceClass::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Cpu => "CPU",
            DeviceKind::Gpu => "GPU",
            DeviceKind::Accelerator => "Accelerator",
            DeviceKind::Custom => "Custom",
        }
    }
}

/// Static description of a device, queried once during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    /// `CL_DEVICE_VERSION`
    pub version: String,
    pub driver_version: String,
    pub c_version: String,
    pub kind: DeviceKind,
    pub compute_units: u32,
    pub global_mem: u64,
    pub host_unified_memory: bool,
}

/// `cl_mem_flags` compatible memory flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemFlags(pub u64);

impl MemFlags {
    pub const READ_WRITE: MemFlags = MemFlags(1);
    pub const WRITE_ONLY: MemFlags = MemFlags(1 << 1);
    pub const READ_ONLY: MemFlags = MemFlags(1 << 2);
    pub const USE_HOST_PTR: MemFlags = MemFlags(1 << 3);
    pub const ALLOC_HOST_PTR: MemFlags = MemFlags(1 << 4);
    pub const COPY_HOST_PTR: MemFlags = MemFlags(1 << 5);

    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn contains(self, other: MemFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether a kernel may write to memory created with these flags.
    #[inline]
    pub fn device_writable(self) -> bool {
        !self.contains(MemFlags::READ_ONLY)
    }
}

impl BitOr for MemFlags {
    type Output = MemFlags;

    #[inline]
    fn bitor(self, rhs: Self) -> Self::Output {
        MemFlags(self.0 | rhs.0)
    }
}

/// A value bound to a kernel argument slot.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a> {
    /// Device storage, passed as a memory object.
    Mem(MemId),
    /// Raw bytes passed by value.
    Value(&'a [u8]),
}

/// The N-dimensional index space of a kernel launch.
/// # Example
/// ```
/// use sico::WorkSize;
///
/// let ws = WorkSize::d2(1280, 720).with_local([16, 8]);
/// assert_eq!(ws.dims(), 2);
/// assert_eq!(ws.global(), &[1280, 720]);
/// assert_eq!(ws.work_items(), 1280 * 720);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkSize {
    dims: usize,
    global: [usize; 3],
    offset: Option<[usize; 3]>,
    local: Option<[usize; 3]>,
}

impl WorkSize {
    #[inline]
    pub fn d1(x: usize) -> WorkSize {
        WorkSize::new(&[x])
    }

    #[inline]
    pub fn d2(x: usize, y: usize) -> WorkSize {
        WorkSize::new(&[x, y])
    }

    #[inline]
    pub fn d3(x: usize, y: usize, z: usize) -> WorkSize {
        WorkSize::new(&[x, y, z])
    }

    /// Creates a work size with `global.len()` dimensions.
    /// Whether the shape is launchable is checked by [`WorkSize::validate`].
    pub fn new(global: &[usize]) -> WorkSize {
        let mut sizes = [1; 3];
        for (dst, src) in sizes.iter_mut().zip(global) {
            *dst = *src;
        }
        WorkSize {
            dims: global.len(),
            global: sizes,
            offset: None,
            local: None,
        }
    }

    pub fn with_offset(mut self, offset: impl AsRef<[usize]>) -> WorkSize {
        self.offset = Some(pad(offset.as_ref(), 0));
        self
    }

    pub fn with_local(mut self, local: impl AsRef<[usize]>) -> WorkSize {
        self.local = Some(pad(local.as_ref(), 1));
        self
    }

    #[inline]
    pub fn dims(&self) -> usize {
        self.dims
    }

    #[inline]
    pub fn global(&self) -> &[usize] {
        &self.global[..self.dims.min(3)]
    }

    #[inline]
    pub fn offset(&self) -> Option<&[usize]> {
        self.offset.as_ref().map(|o| &o[..self.dims.min(3)])
    }

    #[inline]
    pub fn local(&self) -> Option<&[usize]> {
        self.local.as_ref().map(|l| &l[..self.dims.min(3)])
    }

    /// Padded to three dimensions, unused dimensions are 1.
    #[inline]
    pub fn global3(&self) -> [usize; 3] {
        self.global
    }

    /// Padded to three dimensions, zero when no offset was given.
    #[inline]
    pub fn offset3(&self) -> [usize; 3] {
        self.offset.unwrap_or([0; 3])
    }

    #[inline]
    pub fn local3(&self) -> Option<[usize; 3]> {
        self.local
    }

    #[inline]
    pub fn work_items(&self) -> usize {
        self.global().iter().product()
    }

    /// Rejects dimension counts outside 1..=3 and zero-sized dimensions.
    pub fn validate(&self) -> RtResult<()> {
        if self.dims == 0 || self.dims > 3 {
            return Err(ClStatus(CL_INVALID_WORK_DIMENSION));
        }
        if self.global().contains(&0) {
            return Err(ClStatus(CL_INVALID_GLOBAL_WORK_SIZE));
        }
        Ok(())
    }
}

fn pad(values: &[usize], fill: usize) -> [usize; 3] {
    let mut out = [fill; 3];
    for (dst, src) in out.iter_mut().zip(values) {
        *dst = *src;
    }
    out
}

/// The lower-level compute runtime.
///
/// Implementations are single threaded: callers serialize access, so
/// implementations are free to use interior mutability behind `&self`.
pub trait Runtime {
    /// Human readable name of the runtime implementation.
    fn name(&self) -> &str;

    fn platforms(&self) -> RtResult<Vec<PlatformId>>;
    fn platform_name(&self, platform: PlatformId) -> RtResult<String>;
    /// Every device of every type on `platform`.
    fn devices(&self, platform: PlatformId) -> RtResult<Vec<DeviceId>>;
    fn device_info(&self, device: DeviceId) -> RtResult<DeviceInfo>;

    fn create_context(&self, device: DeviceId) -> RtResult<ContextId>;
    fn release_context(&self, context: ContextId) -> RtResult<()>;

    /// `source` is null terminated: the text ends at the first zero byte.
    fn create_program(&self, context: ContextId, source: &[u8]) -> RtResult<ProgramId>;
    fn build_program(&self, program: ProgramId, device: DeviceId, options: &str) -> RtResult<()>;
    fn build_log(&self, program: ProgramId, device: DeviceId) -> RtResult<String>;
    fn release_program(&self, program: ProgramId) -> RtResult<()>;

    fn create_kernel(&self, program: ProgramId, name: &str) -> RtResult<KernelId>;
    fn release_kernel(&self, kernel: KernelId) -> RtResult<()>;
    fn set_kernel_arg(&self, kernel: KernelId, index: u32, arg: KernelArg<'_>) -> RtResult<()>;

    fn create_queue(&self, context: ContextId, device: DeviceId) -> RtResult<QueueId>;
    fn release_queue(&self, queue: QueueId) -> RtResult<()>;
    fn enqueue_kernel(&self, queue: QueueId, kernel: KernelId, work: &WorkSize) -> RtResult<()>;
    /// Blocks until every command enqueued on `queue` has completed.
    fn finish(&self, queue: QueueId) -> RtResult<()>;
    /// Submits pending commands without waiting for them.
    fn flush(&self, queue: QueueId) -> RtResult<()>;

    /// Creates device storage of `size` bytes.
    ///
    /// # Safety
    /// If `host` is given (together with [`MemFlags::USE_HOST_PTR`]), it must
    /// point to `size` bytes that stay valid, and are not accessed through
    /// other references while a kernel may use them, until the storage is
    /// released. Read-only storage is never written through `host`.
    unsafe fn create_buffer(
        &self,
        context: ContextId,
        flags: MemFlags,
        size: usize,
        host: Option<NonNull<u8>>,
    ) -> RtResult<MemId>;
    fn release_buffer(&self, mem: MemId) -> RtResult<()>;

    /// Blocking host to device copy into the start of `mem`.
    fn write_buffer(&self, queue: QueueId, mem: MemId, src: &[u8]) -> RtResult<()>;
    /// Blocking device to host copy from the start of `mem`.
    fn read_buffer(&self, queue: QueueId, mem: MemId, dst: &mut [u8]) -> RtResult<()>;
}

#[cfg(test)]
mod tests {
    use super::{ClStatus, DeviceClass, DeviceKind, MemFlags, WorkSize};

    #[test]
    fn test_work_size_validation() {
        assert!(WorkSize::d1(4).validate().is_ok());
        assert_eq!(WorkSize::d2(4, 0).validate(), Err(ClStatus(-63)));
        assert_eq!(WorkSize::new(&[]).validate(), Err(ClStatus(-53)));
        assert_eq!(WorkSize::new(&[1, 1, 1, 1]).validate(), Err(ClStatus(-53)));
    }

    #[test]
    fn test_work_size_padding() {
        let ws = WorkSize::d1(10).with_offset([2]).with_local([5]);
        assert_eq!(ws.global3(), [10, 1, 1]);
        assert_eq!(ws.offset(), Some(&[2][..]));
        assert_eq!(ws.local(), Some(&[5][..]));
    }

    #[test]
    fn test_mem_flags() {
        let flags = MemFlags::READ_ONLY | MemFlags::USE_HOST_PTR;
        assert!(flags.contains(MemFlags::USE_HOST_PTR));
        assert!(!flags.device_writable());
        assert!(MemFlags::WRITE_ONLY.device_writable());
    }

    #[test]
    fn test_device_class() {
        assert_eq!(DeviceKind::Cpu.class(), DeviceClass::Cpu);
        assert_eq!(DeviceKind::Gpu.class(), DeviceClass::Other);
        assert_eq!(DeviceKind::Accelerator.class(), DeviceClass::Other);
    }
}
