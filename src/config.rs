//! Serving-plane configuration
//!
//! A nested YAML record with one sub-record per autoscaler framework plus
//! backend executor settings. All values are immutable after parsing and
//! are threaded through constructors; nothing reads configuration from
//! global state.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, ServeError};

/// Top-level configuration for the serving plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServeConfig {
    /// Autoscaler framework: "kpa" (default) or "one-time"
    #[serde(default = "default_framework")]
    pub framework: String,

    /// Seconds between relay outstanding-count trace lines (default: 5)
    #[serde(default = "default_trace_period")]
    pub trace_period_secs: u64,

    /// Knative-Pod-Autoscaler settings
    #[serde(default)]
    pub kpa: Option<KpaConfig>,

    /// One-time autoscaler settings
    #[serde(default)]
    pub one_time: Option<OneTimeConfig>,

    /// Backend executor settings
    #[serde(default)]
    pub backend: BackendConfig,
}

/// KPA decider and control-loop parameters.
///
/// Field names mirror the YAML record: the panic window is
/// `stableWindowSeconds × panicWindowPercentage / 100`, and the panic
/// threshold is used as a ratio (`panicThresholdPercentage / 100`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpaConfig {
    /// Enqueue scale work only from the ticker; when false, a request
    /// arriving while desired == 0 kicks the queue immediately
    #[serde(default, rename = "async")]
    pub async_mode: bool,

    /// Target concurrency per replica (default: 100)
    #[serde(default = "default_target_concurrency")]
    pub target_concurrency: f64,

    /// Max multiplicative scale-up factor per tick (default: 1000)
    #[serde(default = "default_max_scale_up_rate")]
    pub max_scale_up_rate: f64,

    /// Max multiplicative scale-down factor per tick (default: 2)
    #[serde(default = "default_max_scale_down_rate")]
    pub max_scale_down_rate: f64,

    /// Stable window length in seconds (default: 60)
    #[serde(default = "default_stable_window")]
    pub stable_window_seconds: f64,

    /// Panic window as a percentage of the stable window (default: 10)
    #[serde(default = "default_panic_window_percentage")]
    pub panic_window_percentage: f64,

    /// Panic threshold as a percentage (default: 200, i.e. ratio 2.0)
    #[serde(default = "default_panic_threshold_percentage")]
    pub panic_threshold_percentage: f64,

    /// Scale-down delay in seconds; 0 disables the delay window (default: 0)
    #[serde(default)]
    pub scale_down_delay_seconds: u64,

    /// Decider tick interval in seconds (default: 2)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
}

impl Default for KpaConfig {
    fn default() -> Self {
        Self {
            async_mode: false,
            target_concurrency: default_target_concurrency(),
            max_scale_up_rate: default_max_scale_up_rate(),
            max_scale_down_rate: default_max_scale_down_rate(),
            stable_window_seconds: default_stable_window(),
            panic_window_percentage: default_panic_window_percentage(),
            panic_threshold_percentage: default_panic_threshold_percentage(),
            scale_down_delay_seconds: 0,
            tick_interval_seconds: default_tick_interval(),
        }
    }
}

impl KpaConfig {
    pub fn stable_window(&self) -> Duration {
        Duration::from_secs_f64(self.stable_window_seconds)
    }

    pub fn panic_window(&self) -> Duration {
        Duration::from_secs_f64(self.stable_window_seconds * self.panic_window_percentage / 100.0)
    }

    /// Threshold as a ratio, e.g. 200% → 2.0
    pub fn panic_threshold(&self) -> f64 {
        self.panic_threshold_percentage / 100.0
    }

    pub fn scale_down_delay(&self) -> Duration {
        Duration::from_secs(self.scale_down_delay_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }
}

/// One-time autoscaler: scale each key once to `initialScale` on its
/// first request, never again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeConfig {
    /// Replica count applied on the first request for a key (default: 1)
    #[serde(default = "default_initial_scale")]
    pub initial_scale: usize,
}

impl Default for OneTimeConfig {
    fn default() -> Self {
        Self {
            initial_scale: default_initial_scale(),
        }
    }
}

/// Backend executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Executor implementation: "fake" (default) or "http"
    #[serde(default = "default_backend_framework")]
    pub framework: String,

    /// Floor for the per-call timeout in seconds (default: 15)
    #[serde(default = "default_base_timeout")]
    pub base_timeout_secs: u64,

    /// Timeout multiplier over the request's duration hint (default: 5.0)
    #[serde(default = "default_slo_factor")]
    pub slo_factor: f64,

    /// Client handles seeded into each endpoint's connection pool (default: 80)
    #[serde(default = "default_pool_concurrency")]
    pub pool_concurrency: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            framework: default_backend_framework(),
            base_timeout_secs: default_base_timeout(),
            slo_factor: default_slo_factor(),
            pool_concurrency: default_pool_concurrency(),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            framework: default_framework(),
            trace_period_secs: default_trace_period(),
            kpa: None,
            one_time: None,
            backend: BackendConfig::default(),
        }
    }
}

fn default_framework() -> String {
    "kpa".to_string()
}

fn default_trace_period() -> u64 {
    5
}

fn default_target_concurrency() -> f64 {
    100.0
}

fn default_max_scale_up_rate() -> f64 {
    1000.0
}

fn default_max_scale_down_rate() -> f64 {
    2.0
}

fn default_stable_window() -> f64 {
    60.0
}

fn default_panic_window_percentage() -> f64 {
    10.0
}

fn default_panic_threshold_percentage() -> f64 {
    200.0
}

fn default_tick_interval() -> u64 {
    2
}

fn default_initial_scale() -> usize {
    1
}

fn default_backend_framework() -> String {
    "fake".to_string()
}

fn default_base_timeout() -> u64 {
    15
}

fn default_slo_factor() -> f64 {
    5.0
}

fn default_pool_concurrency() -> usize {
    80
}

impl ServeConfig {
    /// Load configuration from a YAML file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ServeError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ServeConfig = serde_yaml::from_str(content)
            .map_err(|e| ServeError::Config(format!("Failed to parse YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// The effective KPA settings (defaults when the sub-record is absent).
    pub fn kpa(&self) -> KpaConfig {
        self.kpa.clone().unwrap_or_default()
    }

    /// The effective one-time settings (defaults when the sub-record is absent).
    pub fn one_time(&self) -> OneTimeConfig {
        self.one_time.clone().unwrap_or_default()
    }

    pub fn trace_period(&self) -> Duration {
        Duration::from_secs(self.trace_period_secs)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        match self.framework.as_str() {
            "kpa" | "one-time" => {}
            other => {
                return Err(ServeError::Config(format!(
                    "Unknown autoscaler framework '{}', expected 'kpa' or 'one-time'",
                    other
                )))
            }
        }

        let kpa = self.kpa();
        if kpa.target_concurrency <= 0.0 {
            return Err(ServeError::Config(format!(
                "targetConcurrency ({}) must be > 0",
                kpa.target_concurrency
            )));
        }
        if kpa.max_scale_up_rate <= 1.0 {
            return Err(ServeError::Config(format!(
                "maxScaleUpRate ({}) must be > 1",
                kpa.max_scale_up_rate
            )));
        }
        if kpa.max_scale_down_rate <= 1.0 {
            return Err(ServeError::Config(format!(
                "maxScaleDownRate ({}) must be > 1",
                kpa.max_scale_down_rate
            )));
        }
        if kpa.stable_window_seconds <= 0.0 {
            return Err(ServeError::Config(format!(
                "stableWindowSeconds ({}) must be > 0",
                kpa.stable_window_seconds
            )));
        }
        if kpa.panic_window_percentage <= 0.0 || kpa.panic_window_percentage > 100.0 {
            return Err(ServeError::Config(format!(
                "panicWindowPercentage ({}) must be in (0, 100]",
                kpa.panic_window_percentage
            )));
        }
        if kpa.panic_threshold_percentage < 100.0 {
            return Err(ServeError::Config(format!(
                "panicThresholdPercentage ({}) must be >= 100",
                kpa.panic_threshold_percentage
            )));
        }
        if kpa.tick_interval_seconds == 0 {
            return Err(ServeError::Config(
                "tickIntervalSeconds must be positive".to_string(),
            ));
        }

        match self.backend.framework.as_str() {
            "fake" | "http" => {}
            other => {
                return Err(ServeError::Config(format!(
                    "Unknown backend framework '{}', expected 'fake' or 'http'",
                    other
                )))
            }
        }
        if self.backend.pool_concurrency == 0 {
            return Err(ServeError::Config(
                "backend poolConcurrency must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServeConfig::default();
        assert_eq!(config.framework, "kpa");
        assert_eq!(config.trace_period_secs, 5);
        assert!(config.kpa.is_none());
        assert_eq!(config.backend.framework, "fake");

        // Parsing an empty record yields the same defaults.
        let parsed = ServeConfig::from_yaml("{}").unwrap();
        assert_eq!(parsed.framework, "kpa");
        assert_eq!(parsed.trace_period_secs, 5);
    }

    #[test]
    fn test_kpa_defaults() {
        let kpa = KpaConfig::default();
        assert!(!kpa.async_mode);
        assert_eq!(kpa.target_concurrency, 100.0);
        assert_eq!(kpa.max_scale_up_rate, 1000.0);
        assert_eq!(kpa.max_scale_down_rate, 2.0);
        assert_eq!(kpa.stable_window_seconds, 60.0);
        assert_eq!(kpa.panic_window_percentage, 10.0);
        assert_eq!(kpa.panic_threshold_percentage, 200.0);
        assert_eq!(kpa.scale_down_delay_seconds, 0);
        assert_eq!(kpa.tick_interval_seconds, 2);
    }

    #[test]
    fn test_derived_windows() {
        let kpa = KpaConfig {
            stable_window_seconds: 60.0,
            panic_window_percentage: 10.0,
            panic_threshold_percentage: 200.0,
            ..KpaConfig::default()
        };
        assert_eq!(kpa.stable_window(), Duration::from_secs(60));
        assert_eq!(kpa.panic_window(), Duration::from_secs(6));
        assert_eq!(kpa.panic_threshold(), 2.0);
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
framework: kpa
tracePeriodSecs: 10
kpa:
  async: true
  targetConcurrency: 1
  maxScaleUpRate: 10
  maxScaleDownRate: 2
  stableWindowSeconds: 60
  panicWindowPercentage: 10
  panicThresholdPercentage: 200
  scaleDownDelaySeconds: 30
  tickIntervalSeconds: 1
backend:
  framework: http
  baseTimeoutSecs: 20
  sloFactor: 3.0
  poolConcurrency: 16
"#;
        let config = ServeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.trace_period_secs, 10);
        let kpa = config.kpa();
        assert!(kpa.async_mode);
        assert_eq!(kpa.target_concurrency, 1.0);
        assert_eq!(kpa.scale_down_delay_seconds, 30);
        assert_eq!(kpa.tick_interval_seconds, 1);
        assert_eq!(config.backend.framework, "http");
        assert_eq!(config.backend.pool_concurrency, 16);
    }

    #[test]
    fn test_parse_one_time_yaml() {
        let yaml = r#"
framework: one-time
oneTime:
  initialScale: 3
"#;
        let config = ServeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.framework, "one-time");
        assert_eq!(config.one_time().initial_scale, 3);
    }

    #[test]
    fn test_one_time_default_initial_scale() {
        let config = ServeConfig::from_yaml("framework: one-time").unwrap();
        assert_eq!(config.one_time().initial_scale, 1);
    }

    #[test]
    fn test_kpa_sub_record_partial() {
        let yaml = r#"
kpa:
  targetConcurrency: 2
"#;
        let config = ServeConfig::from_yaml(yaml).unwrap();
        let kpa = config.kpa();
        assert_eq!(kpa.target_concurrency, 2.0);
        // unspecified fields keep defaults
        assert_eq!(kpa.max_scale_down_rate, 2.0);
        assert_eq!(kpa.stable_window_seconds, 60.0);
    }

    #[test]
    fn test_validate_unknown_framework() {
        let err = ServeConfig::from_yaml("framework: hpa").unwrap_err();
        assert!(err.to_string().contains("Unknown autoscaler framework"));
    }

    #[test]
    fn test_validate_bad_target_concurrency() {
        let yaml = "kpa:\n  targetConcurrency: 0\n";
        let err = ServeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("targetConcurrency"));
    }

    #[test]
    fn test_validate_bad_scale_rates() {
        let yaml = "kpa:\n  maxScaleUpRate: 1\n";
        let err = ServeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("maxScaleUpRate"));

        let yaml = "kpa:\n  maxScaleDownRate: 0.5\n";
        let err = ServeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("maxScaleDownRate"));
    }

    #[test]
    fn test_validate_bad_panic_window() {
        let yaml = "kpa:\n  panicWindowPercentage: 150\n";
        let err = ServeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("panicWindowPercentage"));
    }

    #[test]
    fn test_validate_bad_panic_threshold() {
        let yaml = "kpa:\n  panicThresholdPercentage: 50\n";
        let err = ServeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("panicThresholdPercentage"));
    }

    #[test]
    fn test_validate_zero_tick() {
        let yaml = "kpa:\n  tickIntervalSeconds: 0\n";
        let err = ServeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("tickIntervalSeconds"));
    }

    #[test]
    fn test_validate_unknown_backend() {
        let yaml = "backend:\n  framework: quic\n";
        let err = ServeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Unknown backend framework"));
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = ServeConfig::from_yaml(": not yaml :").unwrap_err();
        assert!(matches!(err, ServeError::Config(_)));
    }
}
