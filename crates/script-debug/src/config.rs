//! Layered debug configuration.
//! - DebugConfig: effective settings (camelCase keys)
//! - ConfigLevel: defaults < launch < runtime
//! - ConfigStore: key-wise merge, validate-then-commit

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::encoding::TextEncoding;
use crate::error::ConfigError;
use crate::path::PathReconciler;

/// Exception filter for errors that unwind to the top of a thread.
pub const FILTER_ERROR: &str = "error";
/// Exception filter for errors caught by protected calls.
pub const FILTER_CAUGHT: &str = "caught";

/// Output sources captured into `output` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCapture {
    Print,
    Stdout,
    Stderr,
}

/// Effective debug configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugConfig {
    /// `[server, client]` prefix pairs.
    pub source_maps: Vec<(String, String)>,
    pub skip_files: Vec<String>,
    pub workspace_folder: Option<String>,
    pub cwd: Option<String>,
    pub source_coding: TextEncoding,
    pub console_coding: TextEncoding,
    pub output_capture: Vec<OutputCapture>,
    pub exception_filters: Vec<String>,
    pub stop_on_entry: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            source_maps: Vec::new(),
            skip_files: Vec::new(),
            workspace_folder: None,
            cwd: None,
            source_coding: TextEncoding::Utf8,
            console_coding: TextEncoding::Utf8,
            output_capture: Vec::new(),
            exception_filters: vec![FILTER_ERROR.to_string()],
            stop_on_entry: false,
        }
    }
}

impl DebugConfig {
    #[must_use]
    pub fn captures(&self, capture: OutputCapture) -> bool {
        self.output_capture.contains(&capture)
    }
}

/// Configuration layer; later levels override earlier ones key by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLevel {
    Defaults,
    Launch,
    Runtime,
}

impl ConfigLevel {
    fn index(self) -> usize {
        match self {
            Self::Defaults => 0,
            Self::Launch => 1,
            Self::Runtime => 2,
        }
    }
}

pub(crate) fn validate_exception_filters(filters: &[String]) -> Result<(), ConfigError> {
    match filters
        .iter()
        .find(|filter| !matches!(filter.as_str(), FILTER_ERROR | FILTER_CAUGHT))
    {
        Some(unknown) => Err(ConfigError::UnknownExceptionFilter(unknown.clone())),
        None => Ok(()),
    }
}

/// Holds every configuration level plus the validated effective snapshot.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    levels: [Map<String, Value>; 3],
    effective: DebugConfig,
    paths: Arc<PathReconciler>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            levels: [Map::new(), Map::new(), Map::new()],
            effective: DebugConfig::default(),
            paths: Arc::new(PathReconciler::default()),
        }
    }

    #[must_use]
    pub fn effective(&self) -> &DebugConfig {
        &self.effective
    }

    /// Path reconciler built from the effective configuration.
    #[must_use]
    pub fn paths(&self) -> Arc<PathReconciler> {
        Arc::clone(&self.paths)
    }

    /// Merge `update` into `level`; `null` values remove keys.
    ///
    /// The merged result is validated before anything is committed; on error
    /// every level keeps its previous contents.
    pub fn apply(&mut self, level: ConfigLevel, update: Value) -> Result<&DebugConfig, ConfigError> {
        let Value::Object(update) = update else {
            return Err(ConfigError::NotAnObject);
        };
        let mut levels = self.levels.clone();
        let target = &mut levels[level.index()];
        for (key, value) in update {
            if value.is_null() {
                target.remove(&key);
            } else {
                target.insert(key, value);
            }
        }

        let mut merged = Map::new();
        for layer in &levels {
            for (key, value) in layer {
                merged.insert(key.clone(), value.clone());
            }
        }
        let effective: DebugConfig = serde_json::from_value(Value::Object(merged))?;
        validate_exception_filters(&effective.exception_filters)?;
        let paths = PathReconciler::new(&effective)?;

        self.levels = levels;
        self.effective = effective;
        self.paths = Arc::new(paths);
        Ok(&self.effective)
    }

    /// Apply a TOML document at `level`.
    pub fn apply_toml(&mut self, level: ConfigLevel, text: &str) -> Result<&DebugConfig, ConfigError> {
        let value: Value = toml::from_str(text)?;
        self.apply(level, value)
    }

    /// Load the defaults level from a TOML file.
    pub fn load_defaults(&mut self, path: &Path) -> Result<&DebugConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_toml(ConfigLevel::Defaults, &text)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ConfigLevel, ConfigStore, OutputCapture};
    use crate::encoding::TextEncoding;
    use crate::error::ConfigError;

    #[test]
    fn higher_levels_override_key_by_key() {
        let mut store = ConfigStore::new();
        store
            .apply(
                ConfigLevel::Defaults,
                json!({"consoleCoding": "ansi", "skipFiles": ["**/vendor/**"]}),
            )
            .expect("defaults");
        let config = store
            .apply(ConfigLevel::Launch, json!({"consoleCoding": "utf8", "stopOnEntry": true}))
            .expect("launch");
        assert_eq!(config.console_coding, TextEncoding::Utf8);
        assert_eq!(config.skip_files, vec!["**/vendor/**".to_string()]);
        assert!(config.stop_on_entry);
    }

    #[test]
    fn rejected_update_leaves_previous_config() {
        let mut store = ConfigStore::new();
        store
            .apply(
                ConfigLevel::Launch,
                json!({"sourceMaps": [["/src/", "c:/proj/"]]}),
            )
            .expect("launch");
        let err = store
            .apply(
                ConfigLevel::Runtime,
                json!({"sourceMaps": [["/a/*", "/b/"]], "cwd": "/tmp"}),
            )
            .expect_err("invalid wildcard");
        assert!(matches!(err, ConfigError::InvalidSourceMap { .. }));
        assert!(store.effective().cwd.is_none());
        assert_eq!(store.paths().server_to_client("/src/a.lua"), "c:/proj/a.lua");

        let err = store
            .apply(ConfigLevel::Runtime, json!({"skipFiles": ["[oops"]}))
            .expect_err("invalid glob");
        assert!(matches!(err, ConfigError::InvalidSkipPattern { .. }));
        assert!(store.effective().skip_files.is_empty());
    }

    #[test]
    fn unknown_filter_and_bad_shapes_are_errors() {
        let mut store = ConfigStore::new();
        assert!(matches!(
            store.apply(ConfigLevel::Launch, json!({"exceptionFilters": ["all"]})),
            Err(ConfigError::UnknownExceptionFilter(name)) if name == "all"
        ));
        assert!(matches!(
            store.apply(ConfigLevel::Launch, json!(["x"])),
            Err(ConfigError::NotAnObject)
        ));
        assert!(matches!(
            store.apply(ConfigLevel::Launch, json!({"consoleCoding": "ebcdic"})),
            Err(ConfigError::Invalid(_))
        ));
        assert_eq!(store.effective().exception_filters, vec!["error".to_string()]);
    }

    #[test]
    fn null_removes_a_key_and_unknown_keys_are_ignored() {
        let mut store = ConfigStore::new();
        store
            .apply(
                ConfigLevel::Launch,
                json!({"cwd": "/work", "program": "main.lua", "request": "launch"}),
            )
            .expect("launch");
        assert_eq!(store.effective().cwd.as_deref(), Some("/work"));
        store
            .apply(ConfigLevel::Launch, json!({"cwd": null}))
            .expect("update");
        assert!(store.effective().cwd.is_none());
    }

    #[test]
    fn defaults_load_from_toml() {
        let mut store = ConfigStore::new();
        let config = store
            .apply_toml(
                ConfigLevel::Defaults,
                r#"
sourceMaps = [["/srv/", "c:/srv/"]]
outputCapture = ["print", "stderr"]
sourceCoding = "ansi"
"#,
            )
            .expect("toml defaults");
        assert!(config.captures(OutputCapture::Print));
        assert!(config.captures(OutputCapture::Stderr));
        assert!(!config.captures(OutputCapture::Stdout));
        assert_eq!(config.source_coding, TextEncoding::Ansi);
        assert_eq!(store.paths().server_to_client("/srv/x.lua"), "c:/srv/x.lua");
    }
}
