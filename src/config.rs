use config::{self, File};
use log::{debug, error, info};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{AgentError, Result};

/// The kind of measurement a metric performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricKind {
    /// Constant sample carrying the running build number
    BuildNumber,
    /// Latency/status probe of an HTTP endpoint
    Http,
    /// Anything else found in the configuration; kept so the runner can
    /// report the bad kind on every cycle instead of rejecting at load time
    Unsupported(String),
}

impl MetricKind {
    pub fn as_str(&self) -> &str {
        match self {
            MetricKind::BuildNumber => "build-number",
            MetricKind::Http => "http",
            MetricKind::Unsupported(other) => other,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for MetricKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "build-number" => MetricKind::BuildNumber,
            "http" => MetricKind::Http,
            _ => MetricKind::Unsupported(s),
        }
    }
}

impl<'de> Deserialize<'de> for MetricKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(String::deserialize(deserializer)?.into())
    }
}

/// Sampling period of a metric
///
/// Accepts either a bare number (a raw nanosecond count) or a
/// human-readable string such as `"30s"` or `"5m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period(Duration);

impl Period {
    pub fn new(duration: Duration) -> Self {
        Period(duration)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PeriodVisitor;

        impl Visitor<'_> for PeriodVisitor {
            type Value = Period;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration in nanoseconds or a string such as \"30s\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Period, E> {
                Ok(Period(Duration::from_nanos(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Period, E> {
                if v < 0 {
                    return Err(E::custom("period must not be negative"));
                }
                Ok(Period(Duration::from_nanos(v as u64)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Period, E> {
                if v < 0.0 {
                    return Err(E::custom("period must not be negative"));
                }
                Ok(Period(Duration::from_nanos(v as u64)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Period, E> {
                humantime::parse_duration(v).map(Period).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(PeriodVisitor)
    }
}

fn default_enabled() -> bool {
    true
}

/// Definition of one configured metric
#[derive(Debug, Deserialize, Clone)]
pub struct MetricSpec {
    /// Measurement kind, e.g. "build-number" or "http"
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Unique name for this metric
    pub name: String,
    /// HTTP method (http metrics only)
    #[serde(default)]
    pub method: String,
    /// Target URL (http metrics only)
    #[serde(default)]
    pub url: String,
    /// Time between sampling cycles
    pub period: Period,
    /// Whether a runner should be started for this metric
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Collector endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// When false the transport runs in no-op mode and drops all samples
    #[serde(default)]
    pub enabled: bool,
    /// Log every transmitted line
    #[serde(default)]
    pub verbose: bool,
    /// Collector host
    #[serde(default)]
    pub host: String,
    /// Collector plaintext port
    #[serde(default)]
    pub port: u16,
}

/// Logging level
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

fn default_env() -> String {
    "development".to_string()
}

/// Agent configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Deployment environment, e.g. "production"
    #[serde(default = "default_env")]
    pub env: String,
    /// Agent name; combined with env to prefix every metric path
    pub name: String,
    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,
    /// Collector endpoint
    pub collector: CollectorConfig,
    /// Configured metrics
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

impl AgentConfig {
    /// Check the invariants the sampling engine relies on: every metric
    /// name must be unique and non-empty, every period positive.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for metric in &self.metrics {
            if metric.name.is_empty() {
                return Err(AgentError::Config(
                    "found empty metric name (please make sure all metrics have a name property)"
                        .to_string(),
                ));
            }

            if !seen.insert(metric.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "found duplicate metric by the name of {} (please make sure all configured \
                     metric names are unique)",
                    metric.name
                )));
            }

            if metric.period.as_duration().is_zero() {
                return Err(AgentError::Config(format!(
                    "metric {} has a zero period",
                    metric.name
                )));
            }
        }

        Ok(())
    }

    /// Identity prefix prepended to every metric path: the lowercased,
    /// space-stripped agent name plus the first four characters of the
    /// lowercased environment.
    pub fn metric_prefix(&self) -> String {
        let name = self.name.to_lowercase().replace(' ', "");
        let env: String = self.env.to_lowercase().chars().take(4).collect();
        format!("{}-{}", name, env)
    }

    /// Log a short summary of the loaded configuration
    pub fn log_summary(&self) {
        info!("configuration summary");
        info!(" environment: ........ {}", self.env);
        info!(" name: ............... {}", self.name);
        info!(
            " collector: .......... {}:{} (enabled: {})",
            self.collector.host, self.collector.port, self.collector.enabled
        );
        info!(" metrics: ............ {}", self.metrics.len());
    }
}

/// Load and validate agent configuration from a file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AgentConfig> {
    let path = path.as_ref();
    debug!("Loading configuration from {}", path.display());

    // Check if the file exists
    if !path.exists() {
        error!("Configuration file {} does not exist", path.display());
        return Err(AgentError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    // Get the file extension
    let extension = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => {
            error!("Configuration file has no extension");
            return Err(AgentError::Config(format!(
                "Configuration file has no extension: {}",
                path.display()
            )));
        }
    };

    // Check if the extension is supported and create the appropriate FileFormat
    let format = match extension.as_str() {
        "toml" => config::FileFormat::Toml,
        "json" => config::FileFormat::Json,
        "yaml" | "yml" => config::FileFormat::Yaml,
        format => {
            error!("Unsupported configuration format: {}", format);
            return Err(AgentError::Config(format!(
                "Unsupported config format: {}",
                format
            )));
        }
    };

    // Build configuration
    let config = config::Config::builder()
        .add_source(File::with_name(&path.to_string_lossy()).format(format))
        .build()
        .map_err(|e| AgentError::Config(e.to_string()))?;

    // Deserialize configuration
    let config: AgentConfig = config
        .try_deserialize()
        .map_err(|e| AgentError::Config(e.to_string()))?;

    // No runner may start from a configuration that breaks the name invariants
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID: &str = r#"{
        "env": "production",
        "name": "My Agent",
        "collector": {"enabled": true, "host": "127.0.0.1", "port": 2003},
        "metrics": [
            {"type": "build-number", "name": "buildnum", "period": "1m"},
            {"type": "http", "name": "homepage", "method": "GET",
             "url": "https://example.com/", "period": 30000000000}
        ]
    }"#;

    #[test]
    fn test_load_valid_config() {
        let file = write_config(VALID);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.env, "production");
        assert_eq!(config.metrics.len(), 2);
        assert_eq!(config.metrics[0].kind, MetricKind::BuildNumber);
        assert_eq!(
            config.metrics[0].period.as_duration(),
            Duration::from_secs(60)
        );
        // Numeric periods are raw nanosecond counts
        assert_eq!(config.metrics[1].kind, MetricKind::Http);
        assert_eq!(
            config.metrics[1].period.as_duration(),
            Duration::from_secs(30)
        );
        assert!(config.metrics[1].enabled, "enabled should default to true");
    }

    #[test]
    fn test_duplicate_metric_names_rejected() {
        let file = write_config(
            r#"{
            "name": "agent",
            "collector": {"host": "localhost", "port": 2003},
            "metrics": [
                {"type": "build-number", "name": "same", "period": "1m"},
                {"type": "http", "name": "same", "url": "http://x/", "period": "1m"}
            ]
        }"#,
        );

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate metric"));
    }

    #[test]
    fn test_empty_metric_name_rejected() {
        let file = write_config(
            r#"{
            "name": "agent",
            "collector": {"host": "localhost", "port": 2003},
            "metrics": [{"type": "build-number", "name": "", "period": "1m"}]
        }"#,
        );

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("empty metric name"));
    }

    #[test]
    fn test_unknown_metric_kind_is_kept() {
        let file = write_config(
            r#"{
            "name": "agent",
            "collector": {"host": "localhost", "port": 2003},
            "metrics": [{"type": "carrier-pigeon", "name": "pigeon", "period": "1m"}]
        }"#,
        );

        // Unknown kinds load fine; they fail at sample time instead
        let config = load_config(file.path()).unwrap();
        assert_eq!(
            config.metrics[0].kind,
            MetricKind::Unsupported("carrier-pigeon".to_string())
        );
    }

    #[test]
    fn test_zero_period_rejected() {
        let file = write_config(
            r#"{
            "name": "agent",
            "collector": {"host": "localhost", "port": 2003},
            "metrics": [{"type": "http", "name": "probe", "url": "http://x/", "period": 0}]
        }"#,
        );

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("zero period"));
    }

    #[test]
    fn test_metric_prefix_normalization() {
        let file = write_config(VALID);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.metric_prefix(), "myagent-prod");
    }

    #[test]
    fn test_metric_prefix_with_short_env() {
        let file = write_config(VALID);
        let mut config = load_config(file.path()).unwrap();
        config.env = "qa".to_string();
        assert_eq!(config.metric_prefix(), "myagent-qa");
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_config("/nonexistent/beacon.json").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
