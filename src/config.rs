use crate::{DeviceSelector, Error, Result, Stage};

pub const PLATFORM_IDX_VAR: &str = "SICO_PLATFORM_IDX";
pub const DEVICE_IDX_VAR: &str = "SICO_DEVICE_IDX";
pub const PLATFORM_NAME_VAR: &str = "SICO_PLATFORM_NAME";
pub const DEVICE_NAME_VAR: &str = "SICO_DEVICE_NAME";
pub const BUILD_OPTIONS_VAR: &str = "SICO_BUILD_OPTIONS";

/// Device overrides and default build options, usually read from the environment.
///
/// | variable | meaning |
/// |---|---|
/// | `SICO_PLATFORM_IDX` | zero based platform index |
/// | `SICO_DEVICE_IDX` | zero based device index within the selected platform |
/// | `SICO_PLATFORM_NAME` | case-insensitive platform name substring |
/// | `SICO_DEVICE_NAME` | case-insensitive device name substring |
/// | `SICO_BUILD_OPTIONS` | options passed to every kernel build |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    pub selector: DeviceSelector,
    pub build_options: String,
}

impl Config {
    /// Reads the configuration from the process environment.
    #[inline]
    pub fn from_env() -> Result<Config> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`. Empty values count as unset.
    /// # Example
    /// ```
    /// use sico::Config;
    ///
    /// let config = Config::from_lookup(|key| match key {
    ///     "SICO_DEVICE_IDX" => Some("1".into()),
    ///     "SICO_BUILD_OPTIONS" => Some("-cl-fast-relaxed-math".into()),
    ///     _ => None,
    /// }).unwrap();
    ///
    /// assert_eq!(config.selector.device_index, Some(1));
    /// assert_eq!(config.build_options, "-cl-fast-relaxed-math");
    /// ```
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let index = |key: &str| -> Result<Option<usize>> {
            get(key)
                .map(|value| {
                    value.trim().parse().map_err(|_| {
                        Error::general(
                            Stage::Config,
                            format!("environment variable '{key}' contains an invalid index: {value:?}"),
                        )
                    })
                })
                .transpose()
        };

        Ok(Config {
            selector: DeviceSelector {
                platform_index: index(PLATFORM_IDX_VAR)?,
                platform_substr: get(PLATFORM_NAME_VAR),
                device_index: index(DEVICE_IDX_VAR)?,
                device_substr: get(DEVICE_NAME_VAR),
            },
            build_options: get(BUILD_OPTIONS_VAR).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::Config;
    use crate::{ErrorKind, Stage};

    fn config(vars: &[(&str, &str)]) -> crate::Result<Config> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_empty_environment() {
        assert_eq!(config(&[]).unwrap(), Config::default());
    }

    #[test]
    fn test_all_variables() {
        let config = config(&[
            ("SICO_PLATFORM_IDX", "1"),
            ("SICO_DEVICE_IDX", " 2 "),
            ("SICO_PLATFORM_NAME", "nvidia"),
            ("SICO_DEVICE_NAME", "geforce"),
            ("SICO_BUILD_OPTIONS", "-D N=4"),
        ])
        .unwrap();

        assert_eq!(config.selector.platform_index, Some(1));
        assert_eq!(config.selector.device_index, Some(2));
        assert_eq!(config.selector.platform_substr.as_deref(), Some("nvidia"));
        assert_eq!(config.selector.device_substr.as_deref(), Some("geforce"));
        assert_eq!(config.build_options, "-D N=4");
    }

    #[test]
    fn test_invalid_index_names_variable() {
        let err = config(&[("SICO_DEVICE_IDX", "gpu")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GeneralFail);
        assert_eq!(err.stage(), Some(Stage::Config));
        assert!(err.message().contains("SICO_DEVICE_IDX"));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = config(&[("SICO_PLATFORM_NAME", "  "), ("SICO_PLATFORM_IDX", "")]).unwrap();
        assert!(config.selector.is_empty());
    }
}
