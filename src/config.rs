use std::{ops::RangeInclusive, path::PathBuf, str::FromStr, time::Duration};

use crate::constants::{
    COMPILED_TIMEOUT, HIGH_TEMP_FILE_WATERMARK, INTERPRETED_TIMEOUT, LISTENER_DEMO_WINDOW,
    LISTENER_PORT_MAX, LISTENER_PORT_MIN, MAX_OUTPUT_BYTES, RETENTION, SWEEP_INTERVAL,
    TEMP_DIR_NAME, TOOLCHAIN_PROBE_TIMEOUT,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {variable}: {reason}")]
    Invalid {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

/// Program names of each toolchain. C and C++ list candidates in
/// preference order.
#[derive(Debug, Clone, PartialEq)]
pub struct Toolchains {
    pub python: String,
    pub node: String,
    pub javac: String,
    pub java: String,
    pub tsc: String,
    pub c_compilers: Vec<String>,
    pub cpp_compilers: Vec<String>,
}

impl Default for Toolchains {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            node: "node".to_string(),
            javac: "javac".to_string(),
            java: "java".to_string(),
            tsc: "tsc".to_string(),
            c_compilers: vec!["gcc".to_string(), "clang".to_string()],
            cpp_compilers: vec!["g++".to_string(), "clang++".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub temp_dir: PathBuf,
    pub sweep_interval: Duration,
    pub retention: Duration,
    pub interpreted_timeout: Duration,
    pub compiled_timeout: Duration,
    pub probe_timeout: Duration,
    pub max_output_bytes: usize,
    pub listener_demo_window: Duration,
    pub listener_ports: RangeInclusive<u16>,
    pub temp_file_watermark: usize,
    pub toolchains: Toolchains,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join(TEMP_DIR_NAME),
            sweep_interval: SWEEP_INTERVAL,
            retention: RETENTION,
            interpreted_timeout: INTERPRETED_TIMEOUT,
            compiled_timeout: COMPILED_TIMEOUT,
            probe_timeout: TOOLCHAIN_PROBE_TIMEOUT,
            max_output_bytes: MAX_OUTPUT_BYTES,
            listener_demo_window: LISTENER_DEMO_WINDOW,
            listener_ports: LISTENER_PORT_MIN..=LISTENER_PORT_MAX,
            temp_file_watermark: HIGH_TEMP_FILE_WATERMARK,
            toolchains: Toolchains::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source; unset
    /// variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let defaults = Config::default();
        let toolchains = defaults.toolchains;

        Ok(Self {
            temp_dir: env
                .string("CODEPLAY_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            sweep_interval: env
                .parse("CODEPLAY_SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            retention: env
                .parse("CODEPLAY_RETENTION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
            interpreted_timeout: env
                .positive_millis("CODEPLAY_INTERPRETED_TIMEOUT_MS")?
                .unwrap_or(defaults.interpreted_timeout),
            compiled_timeout: env
                .positive_millis("CODEPLAY_COMPILED_TIMEOUT_MS")?
                .unwrap_or(defaults.compiled_timeout),
            probe_timeout: env
                .positive_millis("CODEPLAY_PROBE_TIMEOUT_MS")?
                .unwrap_or(defaults.probe_timeout),
            max_output_bytes: env
                .parse("CODEPLAY_MAX_OUTPUT_BYTES")?
                .unwrap_or(defaults.max_output_bytes),
            listener_demo_window: env
                .positive_millis("CODEPLAY_LISTEN_DEMO_MS")?
                .unwrap_or(defaults.listener_demo_window),
            listener_ports: env
                .port_range("CODEPLAY_LISTEN_PORTS")?
                .unwrap_or(defaults.listener_ports),
            temp_file_watermark: env
                .parse("CODEPLAY_TEMP_FILE_WATERMARK")?
                .unwrap_or(defaults.temp_file_watermark),
            toolchains: Toolchains {
                python: env.string("CODEPLAY_PYTHON").unwrap_or(toolchains.python),
                node: env.string("CODEPLAY_NODE").unwrap_or(toolchains.node),
                javac: env.string("CODEPLAY_JAVAC").unwrap_or(toolchains.javac),
                java: env.string("CODEPLAY_JAVA").unwrap_or(toolchains.java),
                tsc: env.string("CODEPLAY_TSC").unwrap_or(toolchains.tsc),
                c_compilers: env.list("CODEPLAY_CC").unwrap_or(toolchains.c_compilers),
                cpp_compilers: env.list("CODEPLAY_CXX").unwrap_or(toolchains.cpp_compilers),
            },
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, variable: &'static str) -> Option<String> {
        (self.0)(variable)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, variable: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(variable)
            .map(|value| {
                value.parse::<T>().map_err(|e| ConfigError::Invalid {
                    variable,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn positive_millis(&self, variable: &'static str) -> Result<Option<Duration>, ConfigError> {
        match self.parse::<u64>(variable)? {
            Some(0) => Err(ConfigError::Invalid {
                variable,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            }),
            other => Ok(other.map(Duration::from_millis)),
        }
    }

    fn list(&self, variable: &'static str) -> Option<Vec<String>> {
        let items: Vec<String> = self
            .string(variable)?
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
        (!items.is_empty()).then_some(items)
    }

    fn port_range(&self, variable: &'static str) -> Result<Option<RangeInclusive<u16>>, ConfigError> {
        let Some(value) = self.string(variable) else {
            return Ok(None);
        };
        let invalid = |reason: &str| ConfigError::Invalid {
            variable,
            value: value.clone(),
            reason: reason.to_string(),
        };

        let (low, high) = value
            .split_once('-')
            .ok_or_else(|| invalid("expected <low>-<high>"))?;
        let low: u16 = low.trim().parse().map_err(|_| invalid("invalid low port"))?;
        let high: u16 = high.trim().parse().map_err(|_| invalid("invalid high port"))?;
        if low == 0 || low > high {
            return Err(invalid("empty port range"));
        }
        Ok(Some(low..=high))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.interpreted_timeout, Duration::from_secs(10));
        assert_eq!(config.compiled_timeout, Duration::from_secs(15));
        assert_eq!(config.retention, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(1800));
        assert_eq!(config.listener_ports, 4000..=9999);
        assert!(config.temp_dir.ends_with("codeplay"));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = config_from(&[
            ("CODEPLAY_TEMP_DIR", "/var/tmp/playground"),
            ("CODEPLAY_INTERPRETED_TIMEOUT_MS", "2500"),
            ("CODEPLAY_RETENTION_SECS", "0"),
            ("CODEPLAY_CXX", "clang++, g++"),
            ("CODEPLAY_LISTEN_PORTS", "5000-5010"),
            ("CODEPLAY_PYTHON", "python3.12"),
        ])
        .unwrap();

        assert_eq!(config.temp_dir, PathBuf::from("/var/tmp/playground"));
        assert_eq!(config.interpreted_timeout, Duration::from_millis(2500));
        assert_eq!(config.retention, Duration::ZERO);
        assert_eq!(config.toolchains.cpp_compilers, vec!["clang++", "g++"]);
        assert_eq!(config.toolchains.python, "python3.12");
        assert_eq!(config.listener_ports, 5000..=5010);
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = config_from(&[("CODEPLAY_MAX_OUTPUT_BYTES", "lots")]).unwrap_err();
        assert!(err.to_string().contains("CODEPLAY_MAX_OUTPUT_BYTES"));

        let err = config_from(&[("CODEPLAY_COMPILED_TIMEOUT_MS", "0")]).unwrap_err();
        assert!(err.to_string().contains("must be greater than zero"));

        let err = config_from(&[("CODEPLAY_LISTEN_PORTS", "9000-4000")]).unwrap_err();
        assert!(err.to_string().contains("CODEPLAY_LISTEN_PORTS"));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[("CODEPLAY_CC", " , "), ("CODEPLAY_NODE", "  ")]).unwrap();

        assert_eq!(config.toolchains.c_compilers, vec!["gcc", "clang"]);
        assert_eq!(config.toolchains.node, "node");
    }
}
