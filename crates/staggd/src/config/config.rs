use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use btleplug::api::BDAddr;
use serde::Deserialize;
use toml::Spanned;
use tracing_subscriber::filter::LevelFilter;

use super::diagnostics::{
    format_diagnostics, Diagnostic, Error, LoadError, SourceInfo, ValidationError,
};
use super::partial::{PartialConfig, PartialKettleConfig};
use crate::engine::TemperatureUnit;

pub const DEFAULT_API_LISTEN: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 8565;

/// Kettles drop connections when polled faster than this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub api: Option<ApiConfig>,
    pub bluetooth: BluetoothConfig,
    /// Key = entry id
    pub kettles: BTreeMap<String, KettleConfig>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    pub overrides: HashMap<String, LogLevel>,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct BluetoothConfig {
    /// Index into the host's adapter list
    pub adapter: usize,

    pub scan_timeout: Duration,

    /// Add kettles found advertising the kettle service as entries at startup
    pub auto_discover: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: 0,
            scan_timeout: Duration::from_secs(10),
            auto_discover: false,
        }
    }
}

/// One configured kettle
#[derive(Debug, Clone, PartialEq)]
pub struct KettleConfig {
    pub address: BDAddr,

    /// Device name; defaults to "Fellow Stagg EKG+ <address>"
    pub name: Option<String>,

    /// Unit used until the kettle reports its own
    pub units: TemperatureUnit,

    pub poll_interval: Duration,
    pub connection_timeout: Duration,

    /// How long to collect notifications after authenticating
    pub notification_window: Duration,

    /// Connection attempts per session
    pub max_attempts: u32,
}

impl KettleConfig {
    pub fn new(address: BDAddr) -> Self {
        Self {
            address,
            name: None,
            units: TemperatureUnit::Fahrenheit,
            poll_interval: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(15),
            notification_window: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{0}")]
    Invalid(String),
}

/// Collects validation errors for one entry while converting it
struct Validator<'a> {
    prefix: String,
    source: Option<&'a SourceInfo>,
    errors: Vec<ValidationError>,
}

impl<'a> Validator<'a> {
    fn new(prefix: String, source: Option<&'a SourceInfo>) -> Self {
        Self {
            prefix,
            source,
            errors: Vec::new(),
        }
    }

    fn error(&mut self, field: &str, message: impl Into<String>, span: Option<std::ops::Range<usize>>) {
        self.errors.push(ValidationError {
            field_path: format!("{}.{}", self.prefix, field),
            message: message.into(),
            span,
            source: self.source.cloned(),
        });
    }

    /// A positive integer field, falling back to `default` when unset
    fn positive<T>(&mut self, field: &str, value: Option<Spanned<T>>, default: T) -> T
    where
        T: Copy + PartialEq + Default + std::fmt::Display,
    {
        match value {
            Some(v) if *v.get_ref() == T::default() => {
                self.error(field, format!("{} must be greater than zero", field), Some(v.span()));
                default
            }
            Some(v) => v.into_inner(),
            None => default,
        }
    }
}

impl Config {
    /// Load configuration from one or more TOML files with import resolution
    ///
    /// Returns the config together with any warnings. Errors from every file
    /// are reported together.
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let configs = PartialConfig::load_with_imports(paths)?;
        let (partial, diagnostics) = PartialConfig::merge(configs);
        Self::from_partial(partial, diagnostics)
    }

    /// Convert a merged PartialConfig to a Config, validating all fields
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let logging = partial
            .logging
            .map(|l| LoggingConfig {
                level: l.level.map(Spanned::into_inner).unwrap_or_default(),
                overrides: l
                    .overrides
                    .map(|o| o.into_iter().map(|(k, v)| (k, v.into_inner())).collect())
                    .unwrap_or_default(),
            })
            .unwrap_or_default();

        let api = partial.api.map(|a| ApiConfig {
            listen: a
                .listen
                .map(Spanned::into_inner)
                .unwrap_or_else(|| DEFAULT_API_LISTEN.to_string()),
            port: a.port.map(Spanned::into_inner).unwrap_or(DEFAULT_API_PORT),
        });

        let bluetooth = match partial.bluetooth {
            Some(b) => {
                let mut v = Validator::new("bluetooth".to_string(), partial.source.as_ref());
                let defaults = BluetoothConfig::default();
                let scan_timeout_secs = v.positive(
                    "scan_timeout_secs",
                    b.scan_timeout_secs,
                    defaults.scan_timeout.as_secs(),
                );
                diagnostics.extend(
                    v.errors
                        .into_iter()
                        .map(|e| Diagnostic::Error(Error::Validation(e))),
                );
                BluetoothConfig {
                    adapter: b.adapter.map(Spanned::into_inner).unwrap_or(defaults.adapter),
                    scan_timeout: Duration::from_secs(scan_timeout_secs),
                    auto_discover: b
                        .auto_discover
                        .map(Spanned::into_inner)
                        .unwrap_or(defaults.auto_discover),
                }
            }
            None => BluetoothConfig::default(),
        };

        let mut kettles = BTreeMap::new();
        for (entry_id, kettle) in partial.kettles.unwrap_or_default() {
            let source = partial.kettle_sources.get(&entry_id);
            match Self::validate_kettle(&entry_id, kettle, source) {
                Ok(k) => {
                    kettles.insert(entry_id, k);
                }
                Err(errors) => diagnostics.extend(
                    errors
                        .into_iter()
                        .map(|e| Diagnostic::Error(Error::Validation(e))),
                ),
            }
        }

        let config = Config {
            logging,
            api,
            bluetooth,
            kettles,
        };

        if let Err(e) = config.validate() {
            diagnostics.push(Diagnostic::Error(Error::Validation(e)));
        }

        if diagnostics.iter().any(Diagnostic::is_error) {
            Err(ConfigError::Invalid(format_diagnostics(&diagnostics)))
        } else {
            Ok((config, diagnostics))
        }
    }

    /// Validate a partial kettle entry and convert it to a complete KettleConfig
    fn validate_kettle(
        entry_id: &str,
        partial: Spanned<PartialKettleConfig>,
        source: Option<&SourceInfo>,
    ) -> Result<KettleConfig, Vec<ValidationError>> {
        let entry_span = partial.span();
        let partial = partial.into_inner();
        let mut v = Validator::new(format!("kettles.{}", entry_id), source);

        let address = match partial.address {
            Some(addr) => match BDAddr::from_str(addr.get_ref().trim()) {
                Ok(a) => Some(a),
                Err(e) => {
                    v.error(
                        "address",
                        format!("invalid Bluetooth address '{}': {}", addr.get_ref(), e),
                        Some(addr.span()),
                    );
                    None
                }
            },
            None => {
                v.error("address", "address is required", Some(entry_span));
                None
            }
        };

        let mut kettle = KettleConfig::new(address.unwrap_or_default());
        kettle.name = partial.name;
        kettle.units = partial.units.unwrap_or(kettle.units);

        if let Some(poll) = &partial.poll_interval_secs {
            if Duration::from_secs(*poll.get_ref()) < MIN_POLL_INTERVAL {
                v.error(
                    "poll_interval_secs",
                    format!(
                        "poll interval must be at least {} seconds",
                        MIN_POLL_INTERVAL.as_secs()
                    ),
                    Some(poll.span()),
                );
            }
        }
        kettle.poll_interval = partial
            .poll_interval_secs
            .map(|p| Duration::from_secs(p.into_inner()))
            .unwrap_or(kettle.poll_interval);

        let default_timeout = kettle.connection_timeout.as_secs();
        kettle.connection_timeout = Duration::from_secs(v.positive(
            "connection_timeout_secs",
            partial.connection_timeout_secs,
            default_timeout,
        ));

        let default_window = kettle.notification_window.as_millis() as u64;
        kettle.notification_window = Duration::from_millis(v.positive(
            "notification_window_ms",
            partial.notification_window_ms,
            default_window,
        ));

        let default_attempts = kettle.max_attempts;
        kettle.max_attempts = v.positive("max_attempts", partial.max_attempts, default_attempts);

        if v.errors.is_empty() {
            Ok(kettle)
        } else {
            Err(v.errors)
        }
    }

    /// Cross-entry constraints
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut by_address: HashMap<BDAddr, &str> = HashMap::new();
        for (entry_id, kettle) in &self.kettles {
            if let Some(other) = by_address.insert(kettle.address, entry_id) {
                return Err(ValidationError {
                    field_path: format!("kettles.{}.address", entry_id),
                    message: format!(
                        "kettle {} is already configured as '{}'",
                        kettle.address, other
                    ),
                    span: None,
                    source: None,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_minimal_kettle_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("staggd.toml");
        fs::write(&path, "[kettles.kitchen]\naddress = \"24:DC:C3:2D:25:B2\"\n").unwrap();

        let (config, diagnostics) = Config::from_files(&[path]).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.api.is_none());
        assert!(!config.bluetooth.auto_discover);

        let kettle = &config.kettles["kitchen"];
        assert_eq!(
            kettle.address,
            BDAddr::from([0x24, 0xDC, 0xC3, 0x2D, 0x25, 0xB2])
        );
        assert_eq!(kettle.units, TemperatureUnit::Fahrenheit);
        assert_eq!(kettle.poll_interval, Duration::from_secs(30));
        assert_eq!(kettle.connection_timeout, Duration::from_secs(15));
        assert_eq!(kettle.notification_window, Duration::from_secs(2));
        assert_eq!(kettle.max_attempts, 3);
    }

    #[test]
    fn test_full_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("staggd.toml");
        fs::write(
            &path,
            r#"
[logging]
level = "debug"

[logging.overrides]
"staggd::api" = "warn"

[api]
port = 9090

[bluetooth]
adapter = 1
scan_timeout_secs = 5
auto_discover = true

[kettles.office]
address = "24dcc32d25b3"
name = "Office Kettle"
units = "celsius"
poll_interval_secs = 10
connection_timeout_secs = 20
notification_window_ms = 1500
max_attempts = 5
"#,
        )
        .unwrap();

        let (config, _) = Config::from_files(&[path]).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.overrides["staggd::api"], LogLevel::Warn);

        let api = config.api.unwrap();
        assert_eq!(api.listen, DEFAULT_API_LISTEN);
        assert_eq!(api.port, 9090);

        assert_eq!(config.bluetooth.adapter, 1);
        assert_eq!(config.bluetooth.scan_timeout, Duration::from_secs(5));
        assert!(config.bluetooth.auto_discover);

        let kettle = &config.kettles["office"];
        assert_eq!(kettle.name.as_deref(), Some("Office Kettle"));
        assert_eq!(kettle.units, TemperatureUnit::Celsius);
        assert_eq!(kettle.poll_interval, Duration::from_secs(10));
        assert_eq!(kettle.connection_timeout, Duration::from_secs(20));
        assert_eq!(kettle.notification_window, Duration::from_millis(1500));
        assert_eq!(kettle.max_attempts, 5);
    }

    #[test]
    fn test_invalid_values_all_reported() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("staggd.toml");
        fs::write(
            &path,
            r#"
[kettles.kitchen]
address = "not-a-mac"
poll_interval_secs = 1

[kettles.office]
address = "24:DC:C3:2D:25:B3"
max_attempts = 0
"#,
        )
        .unwrap();

        let err = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err.contains("kettles.kitchen.address"), "{}", err);
        assert!(err.contains("kettles.kitchen.poll_interval_secs"), "{}", err);
        assert!(err.contains("kettles.office.max_attempts"), "{}", err);
    }

    #[test]
    fn test_missing_address() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("staggd.toml");
        fs::write(&path, "[kettles.kitchen]\nname = \"Kitchen\"\n").unwrap();

        let err = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err.contains("address is required"), "{}", err);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("staggd.toml");
        fs::write(
            &path,
            r#"
[kettles.a]
address = "24:DC:C3:2D:25:B2"

[kettles.b]
address = "24:dc:c3:2d:25:b2"
"#,
        )
        .unwrap();

        let err = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err.contains("already configured"), "{}", err);
    }

    #[test]
    fn test_import_resolution() {
        let temp_dir = tempfile::tempdir().unwrap();
        let subdir = temp_dir.path().join("kettles");
        fs::create_dir_all(&subdir).unwrap();

        fs::write(
            subdir.join("kitchen.toml"),
            "[kettles.kitchen]\naddress = \"24:DC:C3:2D:25:B2\"\n",
        )
        .unwrap();

        let main_path = temp_dir.path().join("main.toml");
        fs::write(
            &main_path,
            "imports = [\"kettles/kitchen.toml\"]\n\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();

        let (config, _) = Config::from_files(&[main_path]).unwrap();
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert!(config.kettles.contains_key("kitchen"));
    }

    #[test]
    fn test_import_cycle_detection() {
        let temp_dir = tempfile::tempdir().unwrap();
        let a = temp_dir.path().join("a.toml");
        let b = temp_dir.path().join("b.toml");
        fs::write(&a, "imports = [\"b.toml\"]\n").unwrap();
        fs::write(&b, "imports = [\"a.toml\"]\n").unwrap();

        let err = Config::from_files(&[a]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Load(LoadError::ImportCycle { .. })
        ));
    }

    #[test]
    fn test_conflict_across_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let a = temp_dir.path().join("a.toml");
        let b = temp_dir.path().join("b.toml");
        fs::write(&a, "[api]\nport = 8000\n").unwrap();
        fs::write(&b, "[api]\nport = 8001\n").unwrap();

        let err = Config::from_files(&[a, b]).unwrap_err().to_string();
        assert!(err.contains("Merge conflict"), "{}", err);
        assert!(err.contains("api.port"), "{}", err);
    }

    #[test]
    fn test_empty_config_warns() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("empty.toml");
        fs::write(&path, "").unwrap();

        let (config, diagnostics) = Config::from_files(&[path]).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_warning());
        assert!(config.kettles.is_empty());
    }

    #[test]
    fn test_missing_file_error() {
        let missing = PathBuf::from("/nonexistent/staggd.toml");
        let err = Config::from_files(&[missing]).unwrap_err().to_string();
        assert!(err.contains("Failed to read"));
        assert!(err.contains("/nonexistent/staggd.toml"));
    }
}
