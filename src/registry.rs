use core::cell::{Cell, OnceCell};

use log::{debug, info, warn};

use crate::{
    runtime::{ContextId, DeviceClass, DeviceId, DeviceInfo, DeviceKind, PlatformId, Runtime},
    Error, Result, Stage,
};

/// Lifecycle of the context owned by a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Not requested yet.
    Absent,
    Ready(ContextId),
    /// Creation failed with the contained status code. Never retried.
    Failed(i32),
    /// Released by [`ComputeRegistry::release_all_contexts`].
    Released,
}

/// One discovered compute device.
///
/// Everything but the context is fixed at discovery.
#[derive(Debug)]
pub struct Device {
    index: usize,
    platform_index: usize,
    platform_name: String,
    id: DeviceId,
    info: DeviceInfo,
    context: Cell<ContextState>,
}

impl Device {
    /// Position in discovery order, across all platforms.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn platform_index(&self) -> usize {
        self.platform_index
    }

    #[inline]
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    #[inline]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[inline]
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    #[inline]
    pub fn kind(&self) -> DeviceKind {
        self.info.kind
    }

    #[inline]
    pub fn class(&self) -> DeviceClass {
        self.info.kind.class()
    }

    /// Whether kernels on this device read and write host memory directly.
    /// Every upload, download and write-back decision keys off this.
    #[inline]
    pub fn shares_host_memory(&self) -> bool {
        self.class() == DeviceClass::Cpu
    }

    #[inline]
    pub fn context_state(&self) -> ContextState {
        self.context.get()
    }

    /// The context, if it has been created and not released.
    #[inline]
    pub fn context(&self) -> Option<ContextId> {
        match self.context.get() {
            ContextState::Ready(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// First device of class [`DeviceClass::Other`], else the first device.
pub(crate) fn pick_best<'a>(devices: impl IntoIterator<Item = &'a Device> + Clone) -> Option<&'a Device> {
    devices
        .clone()
        .into_iter()
        .find(|dev| dev.class() == DeviceClass::Other)
        .or_else(|| devices.into_iter().next())
}

/// Owns the runtime, the discovered devices and one context per device.
///
/// Discovery runs once and is cached. Contexts are created on first use and
/// released exactly once, by [`close`](ComputeRegistry::close) or on drop.
/// The registry is not thread safe: it is meant to be owned by one thread (or
/// one test).
/// # Example
/// ```
/// use sico::{ComputeRegistry, devices::host::{HostDevice, HostRuntime}};
///
/// fn main() -> sico::Result<()> {
///     let runtime = HostRuntime::builder()
///         .platform("host", [HostDevice::cpu("cpu"), HostDevice::gpu("gpu")])
///         .build();
///     let registry = ComputeRegistry::open(runtime)?;
///
///     let device = registry.select_best_device()?;
///     assert_eq!(device.name(), "gpu");
///     assert!(device.context().is_some());
///
///     registry.close()
/// }
/// ```
pub struct ComputeRegistry<R: Runtime> {
    runtime: R,
    platforms: Vec<(PlatformId, String)>,
    devices: OnceCell<Vec<Device>>,
    closed: bool,
}

impl<R: Runtime> ComputeRegistry<R> {
    /// Fails with [`NoDevice`](crate::ErrorKind::NoDevice) if the runtime exposes no platform.
    pub fn open(runtime: R) -> Result<ComputeRegistry<R>> {
        let ids = runtime.platforms().map_err(|status| {
            log::error!("{}: unable to query platforms: {status}", runtime.name());
            Error::no_device("unable to query compute platforms")
                .at(Stage::Discovery)
                .with_code(status.code())
        })?;

        if ids.is_empty() {
            log::error!("{}: no compute platform found", runtime.name());
            return Err(Error::no_device("no compute platform found").at(Stage::Discovery));
        }

        let mut platforms = Vec::with_capacity(ids.len());
        for id in ids {
            let name = runtime.platform_name(id).unwrap_or_else(|status| {
                warn!("unable to query name of platform {}: {status}", id.0);
                String::new()
            });
            platforms.push((id, name));
        }

        debug!("{}: opened registry with {} platform(s)", runtime.name(), platforms.len());
        Ok(ComputeRegistry {
            runtime,
            platforms,
            devices: OnceCell::new(),
            closed: false,
        })
    }

    #[inline]
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    #[inline]
    pub fn platform_count(&self) -> usize {
        self.platforms.len()
    }

    #[inline]
    pub fn platform_name(&self, platform_index: usize) -> Option<&str> {
        self.platforms
            .get(platform_index)
            .map(|(_, name)| name.as_str())
    }

    fn enumerate(&self) -> Vec<Device> {
        let mut devices = Vec::new();

        for (platform_index, (platform, platform_name)) in self.platforms.iter().enumerate() {
            let ids = match self.runtime.devices(*platform) {
                Ok(ids) => ids,
                Err(status) => {
                    warn!("skipping platform {platform_index} ({platform_name}): {status}");
                    continue;
                }
            };

            for id in ids {
                match self.runtime.device_info(id) {
                    Ok(info) => devices.push(Device {
                        index: devices.len(),
                        platform_index,
                        platform_name: platform_name.clone(),
                        id,
                        info,
                        context: Cell::new(ContextState::Absent),
                    }),
                    Err(status) => warn!("skipping device {} of platform {platform_index}: {status}", id.0),
                }
            }
        }
        devices
    }

    /// Every device of every platform, in discovery order.
    ///
    /// The runtime is queried on the first call only, later calls return the
    /// very same slice.
    pub fn discover_devices(&self) -> Result<&[Device]> {
        let devices = match self.devices.get() {
            Some(devices) => devices,
            None => {
                let found = self.enumerate();
                info!(
                    "discovered {} device(s) on {} platform(s)",
                    found.len(),
                    self.platforms.len()
                );
                self.devices.get_or_init(|| found)
            }
        };

        if devices.is_empty() {
            return Err(Error::no_device("no compute device found").at(Stage::Discovery));
        }
        Ok(devices)
    }

    #[inline]
    pub fn all_devices(&self) -> Result<&[Device]> {
        self.discover_devices()
    }

    pub fn device(&self, index: usize) -> Result<&Device> {
        let devices = self.discover_devices()?;
        devices.get(index).ok_or_else(|| {
            Error::no_device(format!(
                "device index {index} out of range ({} devices)",
                devices.len()
            ))
        })
    }

    fn devices_where(&self, pred: impl Fn(&Device) -> bool) -> Result<Vec<&Device>> {
        Ok(self.discover_devices()?.iter().filter(|dev| pred(dev)).collect())
    }

    pub fn cpu_devices(&self) -> Result<Vec<&Device>> {
        self.devices_where(|dev| dev.kind() == DeviceKind::Cpu)
    }

    pub fn gpu_devices(&self) -> Result<Vec<&Device>> {
        self.devices_where(|dev| dev.kind() == DeviceKind::Gpu)
    }

    /// Devices that are neither CPUs nor GPUs.
    pub fn other_devices(&self) -> Result<Vec<&Device>> {
        self.devices_where(|dev| !matches!(dev.kind(), DeviceKind::Cpu | DeviceKind::Gpu))
    }

    /// Picks the first non-CPU device, or the first device if there is none,
    /// and makes sure it has a context.
    ///
    /// Only the device class is considered, not compute units or memory.
    pub fn select_best_device(&self) -> Result<&Device> {
        let devices = self.discover_devices()?;
        let device = pick_best(devices.iter())
            .ok_or_else(|| Error::no_device("no compute device found"))?;

        self.ensure_context(device)?;
        info!(
            "selected device {}: {} ({})",
            device.index,
            device.name(),
            device.kind().as_str()
        );
        Ok(device)
    }

    /// Returns the context of `device`, creating it on first use.
    ///
    /// A failed creation is remembered, later calls fail without asking the
    /// runtime again.
    pub fn ensure_context(&self, device: &Device) -> Result<ContextId> {
        match device.context.get() {
            ContextState::Ready(ctx) => Ok(ctx),
            ContextState::Failed(code) => Err(Error::general(
                Stage::Context,
                format!("context creation for device {} failed before", device.name()),
            )
            .with_code(code)),
            ContextState::Released => Err(Error::general(
                Stage::Context,
                format!("the context of device {} was already released", device.name()),
            )),
            ContextState::Absent => match self.runtime.create_context(device.id) {
                Ok(ctx) => {
                    debug!("created context {} for device {}", ctx.0, device.name());
                    device.context.set(ContextState::Ready(ctx));
                    Ok(ctx)
                }
                Err(status) => {
                    log::error!("unable to create a context for device {}: {status}", device.name());
                    device.context.set(ContextState::Failed(status.code()));
                    Err(Error::general(
                        Stage::Context,
                        format!("unable to create a context for device {}", device.name()),
                    )
                    .with_code(status.code()))
                }
            },
        }
    }

    /// Releases every created context, continuing past failures.
    ///
    /// Each context is released at most once, later calls only skip. Returns
    /// the failures, which are logged as well.
    pub fn release_all_contexts(&self) -> Vec<Error> {
        let Some(devices) = self.devices.get() else {
            return Vec::new();
        };

        let mut failures = Vec::new();
        for device in devices {
            let state = device.context.replace(ContextState::Released);
            let ContextState::Ready(ctx) = state else {
                continue;
            };

            match self.runtime.release_context(ctx) {
                Ok(()) => debug!("released context {} of device {}", ctx.0, device.name()),
                Err(status) => {
                    warn!("unable to release the context of device {}: {status}", device.name());
                    failures.push(
                        Error::general(
                            Stage::Release,
                            format!("unable to release the context of device {}", device.name()),
                        )
                        .with_code(status.code()),
                    );
                }
            }
        }
        failures
    }

    /// Releases all contexts. Fails if any release failed, after attempting all of them.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        match self.release_all_contexts().into_iter().next() {
            None => Ok(()),
            Some(first) => Err(first),
        }
    }
}

impl<R: Runtime> Drop for ComputeRegistry<R> {
    fn drop(&mut self) {
        if !self.closed {
            self.release_all_contexts();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        devices::host::{HostDevice, HostRuntime},
        ComputeRegistry, ContextState, ErrorKind, Stage,
    };

    fn mixed() -> HostRuntime {
        HostRuntime::builder()
            .platform("first", [HostDevice::cpu("cpu0")])
            .platform("second", [HostDevice::gpu("gpu0"), HostDevice::accelerator("acc0")])
            .build()
    }

    #[test]
    fn test_discovery_is_memoized() {
        let registry = ComputeRegistry::open(mixed()).unwrap();

        let first = registry.discover_devices().unwrap();
        let second = registry.discover_devices().unwrap();
        assert!(core::ptr::eq(first, second));
        assert_eq!(first.len(), 3);

        let stats = registry.runtime().stats();
        assert_eq!(stats.platform_queries, 1);
        assert_eq!(stats.device_queries, 2);
    }

    #[test]
    fn test_open_without_platforms() {
        let err = ComputeRegistry::open(HostRuntime::builder().build())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NoDevice);
    }

    #[test]
    fn test_empty_platform_is_no_device() {
        let registry =
            ComputeRegistry::open(HostRuntime::builder().platform("empty", []).build()).unwrap();
        assert_eq!(
            registry.discover_devices().unwrap_err().kind(),
            ErrorKind::NoDevice
        );
        assert_eq!(
            registry.select_best_device().unwrap_err().kind(),
            ErrorKind::NoDevice
        );
    }

    #[test]
    fn test_best_device_prefers_non_cpu() {
        let registry = ComputeRegistry::open(mixed()).unwrap();
        let best = registry.select_best_device().unwrap();
        assert_eq!(best.name(), "gpu0");
        assert_eq!(best.platform_index(), 1);
        assert!(!best.shares_host_memory());

        let cpus = HostRuntime::builder()
            .platform("cpus", [HostDevice::cpu("a"), HostDevice::cpu("b")])
            .build();
        let registry = ComputeRegistry::open(cpus).unwrap();
        assert_eq!(registry.select_best_device().unwrap().name(), "a");
    }

    #[test]
    fn test_filters() {
        let registry = ComputeRegistry::open(mixed()).unwrap();
        assert_eq!(registry.cpu_devices().unwrap()[0].name(), "cpu0");
        assert_eq!(registry.gpu_devices().unwrap()[0].name(), "gpu0");
        assert_eq!(registry.other_devices().unwrap()[0].name(), "acc0");
        assert_eq!(registry.all_devices().unwrap().len(), 3);
    }

    #[test]
    fn test_context_is_created_once() {
        let registry = ComputeRegistry::open(mixed()).unwrap();
        let device = registry.device(0).unwrap();

        let ctx = registry.ensure_context(device).unwrap();
        assert_eq!(registry.ensure_context(device).unwrap(), ctx);
        assert_eq!(registry.runtime().stats().contexts_created, 1);
    }

    #[test]
    fn test_failed_context_is_terminal() {
        let runtime = HostRuntime::builder()
            .platform("p", [HostDevice::gpu("broken").fail_context_creation()])
            .build();
        let registry = ComputeRegistry::open(runtime).unwrap();

        let err = registry.select_best_device().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GeneralFail);
        assert_eq!(err.stage(), Some(Stage::Context));

        let device = registry.device(0).unwrap();
        assert_eq!(device.context_state(), ContextState::Failed(-2));
        assert!(registry.ensure_context(device).is_err());
    }

    #[test]
    fn test_release_is_fail_soft() {
        let runtime = HostRuntime::builder()
            .platform(
                "p",
                [
                    HostDevice::gpu("sticky").fail_context_release(),
                    HostDevice::gpu("unused"),
                    HostDevice::cpu("fine"),
                ],
            )
            .build();
        let registry = ComputeRegistry::open(runtime).unwrap();
        let devices = registry.discover_devices().unwrap();
        registry.ensure_context(&devices[0]).unwrap();
        registry.ensure_context(&devices[2]).unwrap();

        let failures = registry.release_all_contexts();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage(), Some(Stage::Release));
        // the failure did not stop the release of the last context
        assert_eq!(registry.runtime().stats().contexts_released, 1);

        // released at most once
        assert!(registry.release_all_contexts().is_empty());
        assert_eq!(devices[2].context_state(), ContextState::Released);
    }

    #[test]
    fn test_close_releases_contexts() {
        let registry = ComputeRegistry::open(mixed()).unwrap();
        registry.select_best_device().unwrap();
        registry.close().unwrap();
    }
}
