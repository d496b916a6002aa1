use log::info;

use crate::{registry::pick_best, ComputeRegistry, Config, Device, Error, Result, Runtime};

/// Overrides of the default device choice.
///
/// An index takes precedence over a name substring for the same level.
/// Substrings match case-insensitively. The device index counts devices of
/// the chosen platform (or of all platforms if no platform is given).
/// # Example
/// ```
/// use sico::{ComputeRegistry, DeviceSelector, devices::host::{HostDevice, HostRuntime}};
///
/// let runtime = HostRuntime::builder()
///     .platform("Portable Computing Language", [HostDevice::cpu("pthread-cpu")])
///     .platform("NVIDIA CUDA", [HostDevice::gpu("GeForce RTX 3060")])
///     .build();
/// let registry = ComputeRegistry::open(runtime).unwrap();
///
/// let selector = DeviceSelector::default().platform_name("portable");
/// assert_eq!(registry.select_device(&selector).unwrap().name(), "pthread-cpu");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceSelector {
    pub platform_index: Option<usize>,
    pub platform_substr: Option<String>,
    pub device_index: Option<usize>,
    pub device_substr: Option<String>,
}

impl DeviceSelector {
    pub fn platform_index(mut self, idx: usize) -> Self {
        self.platform_index = Some(idx);
        self
    }

    pub fn platform_name(mut self, substr: impl Into<String>) -> Self {
        self.platform_substr = Some(substr.into());
        self
    }

    pub fn device_index(mut self, idx: usize) -> Self {
        self.device_index = Some(idx);
        self
    }

    pub fn device_name(mut self, substr: impl Into<String>) -> Self {
        self.device_substr = Some(substr.into());
        self
    }

    /// No override set, selection falls back to the default heuristic.
    pub fn is_empty(&self) -> bool {
        self.platform_index.is_none()
            && self.platform_substr.is_none()
            && self.device_index.is_none()
            && self.device_substr.is_none()
    }
}

#[inline]
fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl<R: Runtime> ComputeRegistry<R> {
    fn selected_platform(&self, selector: &DeviceSelector) -> Result<Option<usize>> {
        if let Some(idx) = selector.platform_index {
            if idx >= self.platform_count() {
                return Err(Error::no_device(format!(
                    "platform index {idx} out of range ({} platforms)",
                    self.platform_count()
                )));
            }
            return Ok(Some(idx));
        }

        let Some(substr) = &selector.platform_substr else {
            return Ok(None);
        };
        (0..self.platform_count())
            .find(|idx| {
                self.platform_name(*idx)
                    .is_some_and(|name| contains_ignore_case(name, substr))
            })
            .map(Some)
            .ok_or_else(|| Error::no_device(format!("no platform name contains \"{substr}\"")))
    }

    /// Selects a device honouring the overrides in `selector` and makes sure it has a context.
    ///
    /// Overrides that are out of range or match nothing fail with
    /// [`NoDevice`](crate::ErrorKind::NoDevice), they never fall back silently.
    pub fn select_device(&self, selector: &DeviceSelector) -> Result<&Device> {
        let devices = self.discover_devices()?;
        let platform = self.selected_platform(selector)?;

        let candidates = devices
            .iter()
            .filter(|dev| platform.is_none_or(|idx| dev.platform_index() == idx))
            .collect::<Vec<_>>();

        let device = if let Some(idx) = selector.device_index {
            candidates.get(idx).copied().ok_or_else(|| {
                Error::no_device(format!(
                    "device index {idx} out of range ({} devices)",
                    candidates.len()
                ))
            })?
        } else if let Some(substr) = &selector.device_substr {
            candidates
                .iter()
                .copied()
                .find(|dev| contains_ignore_case(dev.name(), substr))
                .ok_or_else(|| Error::no_device(format!("no device name contains \"{substr}\"")))?
        } else {
            pick_best(candidates.iter().copied())
                .ok_or_else(|| Error::no_device("the selected platform has no devices"))?
        };

        self.ensure_context(device)?;
        info!(
            "selected device {}: {} on platform {}",
            device.index(),
            device.name(),
            device.platform_name()
        );
        Ok(device)
    }

    /// [`select_device`](Self::select_device) with the selector of `config`.
    #[inline]
    pub fn select_configured_device(&self, config: &Config) -> Result<&Device> {
        self.select_device(&config.selector)
    }
}

#[cfg(test)]
mod tests {
    use super::DeviceSelector;
    use crate::{
        devices::host::{HostDevice, HostRuntime},
        ComputeRegistry, ErrorKind,
    };

    fn registry() -> ComputeRegistry<HostRuntime> {
        let runtime = HostRuntime::builder()
            .platform("Intel(R) OpenCL", [HostDevice::cpu("Intel Core i7"), HostDevice::gpu("Intel UHD")])
            .platform("NVIDIA CUDA", [HostDevice::gpu("GeForce GTX 1080")])
            .build();
        ComputeRegistry::open(runtime).unwrap()
    }

    #[test]
    fn test_empty_selector_uses_heuristic() {
        let registry = registry();
        let dev = registry.select_device(&DeviceSelector::default()).unwrap();
        assert_eq!(dev.name(), "Intel UHD");
    }

    #[test]
    fn test_platform_then_device_index() {
        let registry = registry();
        let sel = DeviceSelector::default().platform_index(1).device_index(0);
        assert_eq!(registry.select_device(&sel).unwrap().name(), "GeForce GTX 1080");

        // relative to the chosen platform
        let sel = DeviceSelector::default().platform_index(0).device_index(0);
        assert_eq!(registry.select_device(&sel).unwrap().name(), "Intel Core i7");
    }

    #[test]
    fn test_index_beats_substring() {
        let registry = registry();
        let sel = DeviceSelector::default()
            .platform_index(0)
            .platform_name("nvidia")
            .device_name("uhd");
        assert_eq!(registry.select_device(&sel).unwrap().name(), "Intel UHD");
    }

    #[test]
    fn test_substrings_are_case_insensitive() {
        let registry = registry();
        let sel = DeviceSelector::default().device_name("GEFORCE");
        assert_eq!(registry.select_device(&sel).unwrap().name(), "GeForce GTX 1080");
    }

    #[test]
    fn test_unmatched_overrides_fail() {
        let registry = registry();
        for sel in [
            DeviceSelector::default().platform_index(2),
            DeviceSelector::default().platform_name("amd"),
            DeviceSelector::default().platform_index(1).device_index(1),
            DeviceSelector::default().device_name("radeon"),
        ] {
            let err = registry.select_device(&sel).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NoDevice, "{sel:?}");
        }
        // nothing got a context along the way
        assert_eq!(registry.runtime().stats().contexts_created, 0);
    }
}
