use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::Spanned;

use super::diagnostics::{
    Diagnostic, Error, LoadError, MergeConflictLocation, MergeError, SourceInfo, Warning,
};
use super::LogLevel;
use crate::engine::TemperatureUnit;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub api: Option<PartialApiConfig>,
    pub bluetooth: Option<PartialBluetoothConfig>,
    pub kettles: Option<BTreeMap<String, Spanned<PartialKettleConfig>>>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,

    /// Per-entry source, filled in during merge so validation can point at the right file
    #[serde(skip)]
    pub kettle_sources: HashMap<String, SourceInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialLoggingConfig {
    pub level: Option<Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialApiConfig {
    pub listen: Option<Spanned<String>>,
    pub port: Option<Spanned<u16>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialBluetoothConfig {
    pub adapter: Option<Spanned<usize>>,
    pub scan_timeout_secs: Option<Spanned<u64>>,
    pub auto_discover: Option<Spanned<bool>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialKettleConfig {
    pub address: Option<Spanned<String>>,
    pub name: Option<String>,
    pub units: Option<TemperatureUnit>,
    pub poll_interval_secs: Option<Spanned<u64>>,
    pub connection_timeout_secs: Option<Spanned<u64>>,
    pub notification_window_ms: Option<Spanned<u64>>,
    pub max_attempts: Option<Spanned<u32>>,
}

/// First-wins merge of a single scalar field, recording a conflict if it was already set
fn merge_field<T>(
    slot: &mut Option<Spanned<T>>,
    seen: &mut HashMap<String, MergeConflictLocation>,
    field_path: &str,
    what: &str,
    value: Option<Spanned<T>>,
    source: &SourceInfo,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(value) = value else {
        return;
    };

    let loc = MergeConflictLocation::new(source, value.span());
    if let Some(prev) = seen.get(field_path) {
        diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
            field_path: field_path.to_string(),
            message: format!("{} defined in multiple config files", what),
            conflicts: vec![prev.clone(), loc],
        })));
    } else {
        *slot = Some(value);
        seen.insert(field_path.to_string(), loc);
    }
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Returns a Vec of all loaded configs in order (imports first, then parent)
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if visited.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path,
                cycle: visited.iter().cloned().collect(),
            });
        }

        visited.insert(canonical_path.clone());

        let config = Self::from_file(path)?;

        for import in &config.imports {
            let import_path = PathBuf::from(import);

            // Relative imports are resolved from the importing file's directory
            let resolved = if import_path.is_absolute() {
                import_path
            } else {
                path.parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(import_path)
            };

            Self::load_recursive(&resolved, visited, configs)?;
        }

        configs.push(config);

        // Sibling branches may import the same file
        visited.remove(&canonical_path);

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.api.is_none()
            && self.bluetooth.is_none()
            && self.kettles.is_none()
            && self.imports.is_empty()
    }

    /// Merge multiple partial configs together
    ///
    /// First-wins: the first occurrence of a field is kept. Every conflict is
    /// collected so that all of them can be reported at once.
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut diagnostics = Vec::new();
        let mut imports = Vec::new();
        let mut seen: HashMap<String, MergeConflictLocation> = HashMap::new();

        for config in configs {
            imports.extend(config.imports.iter().cloned());

            let source = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            if config.is_empty() {
                diagnostics.push(Diagnostic::Warning(Warning::EmptyConfig {
                    file_path: source.file_path.clone(),
                }));
            }

            if let Some(logging) = config.logging {
                let merged = result.logging.get_or_insert_with(Default::default);
                merge_field(
                    &mut merged.level,
                    &mut seen,
                    "logging.level",
                    "Logging level",
                    logging.level,
                    &source,
                    &mut diagnostics,
                );

                if let Some(overrides) = logging.overrides {
                    let merged_overrides = merged.overrides.get_or_insert_with(HashMap::new);
                    for (target, level) in overrides {
                        let path = format!("logging.overrides.{}", target);
                        let mut slot = merged_overrides.remove(&target);
                        merge_field(
                            &mut slot,
                            &mut seen,
                            &path,
                            &format!("Logging override for '{}'", target),
                            Some(level),
                            &source,
                            &mut diagnostics,
                        );
                        if let Some(level) = slot {
                            merged_overrides.insert(target, level);
                        }
                    }
                }
            }

            if let Some(api) = config.api {
                let merged = result.api.get_or_insert_with(Default::default);
                merge_field(
                    &mut merged.listen,
                    &mut seen,
                    "api.listen",
                    "API listen address",
                    api.listen,
                    &source,
                    &mut diagnostics,
                );
                merge_field(
                    &mut merged.port,
                    &mut seen,
                    "api.port",
                    "API port",
                    api.port,
                    &source,
                    &mut diagnostics,
                );
            }

            if let Some(bluetooth) = config.bluetooth {
                let merged = result.bluetooth.get_or_insert_with(Default::default);
                merge_field(
                    &mut merged.adapter,
                    &mut seen,
                    "bluetooth.adapter",
                    "Bluetooth adapter",
                    bluetooth.adapter,
                    &source,
                    &mut diagnostics,
                );
                merge_field(
                    &mut merged.scan_timeout_secs,
                    &mut seen,
                    "bluetooth.scan_timeout_secs",
                    "Scan timeout",
                    bluetooth.scan_timeout_secs,
                    &source,
                    &mut diagnostics,
                );
                merge_field(
                    &mut merged.auto_discover,
                    &mut seen,
                    "bluetooth.auto_discover",
                    "Auto discovery",
                    bluetooth.auto_discover,
                    &source,
                    &mut diagnostics,
                );
            }

            // Kettle entries conflict as a whole: an entry belongs to exactly one file
            if let Some(kettles) = config.kettles {
                let merged = result.kettles.get_or_insert_with(BTreeMap::new);
                for (entry_id, kettle) in kettles {
                    let path = format!("kettles.{}", entry_id);
                    let mut slot = None;
                    merge_field(
                        &mut slot,
                        &mut seen,
                        &path,
                        &format!("Kettle '{}'", entry_id),
                        Some(kettle),
                        &source,
                        &mut diagnostics,
                    );
                    if let Some(kettle) = slot {
                        result.kettle_sources.insert(entry_id.clone(), source.clone());
                        merged.insert(entry_id, kettle);
                    }
                }
            }
        }

        result.imports = imports;

        (result, diagnostics)
    }
}
