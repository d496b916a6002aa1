use crate::runtime::MemId;

/// Counters of every observable runtime call made against a [`HostRuntime`](super::HostRuntime).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Calls to the platform enumeration.
    pub platform_queries: usize,
    /// Calls to the per-platform device enumeration.
    pub device_queries: usize,
    pub contexts_created: usize,
    pub contexts_released: usize,
    pub programs_built: usize,
    pub kernels_created: usize,
    pub kernels_released: usize,
    pub buffers_created: usize,
    /// Buffers created on top of caller memory (`USE_HOST_PTR`).
    pub host_backed_buffers: usize,
    pub buffers_released: usize,
    /// Blocking host to device writes.
    pub uploads: usize,
    /// Blocking device to host reads.
    pub downloads: usize,
    pub arg_sets: usize,
    pub launches: usize,
    pub finishes: usize,
    pub flushes: usize,
    pub queues_created: usize,
    pub queues_released: usize,
}

impl HostStats {
    #[inline]
    pub fn live_buffers(&self) -> usize {
        self.buffers_created - self.buffers_released
    }

    #[inline]
    pub fn live_contexts(&self) -> usize {
        self.contexts_created - self.contexts_released
    }
}

/// One memory or launch related call, in the order the runtime received them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCall {
    CreateBuffer(MemId),
    Upload(MemId),
    /// `mem` is `None` for by-value arguments.
    SetArg { index: u32, mem: Option<MemId> },
    Launch,
    Finish,
    Download(MemId),
    ReleaseBuffer(MemId),
}
