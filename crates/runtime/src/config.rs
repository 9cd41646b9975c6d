//! Engine configuration
//!
//! A [`LuaConfig`] can be read from TOML or assembled with the builder
//! methods. Every field has a default, so an empty file is valid.
//!
//! ```toml
//! strict = true
//! chunk_name = "app"
//! preload = ["lib/prelude.lua"]
//!
//! [dump]
//! pretty = false
//! max_depth = 5
//! ```

use luaw_core::DumpConfig;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Failure to read or parse a configuration file
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: Option<PathBuf>,
        message: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse {
                path: Some(path),
                message,
            } => write!(f, "Failed to parse config {}: {}", path.display(), message),
            ConfigError::Parse {
                path: None,
                message,
            } => write!(f, "Failed to parse config: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { .. } => None,
        }
    }
}

/// Dumper settings as they appear under `[dump]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DumpSettings {
    pub pretty: bool,
    pub max_depth: usize,
}

impl Default for DumpSettings {
    fn default() -> Self {
        let defaults = DumpConfig::default();
        Self {
            pretty: defaults.pretty,
            max_depth: defaults.max_depth,
        }
    }
}

impl From<&DumpSettings> for DumpConfig {
    fn from(settings: &DumpSettings) -> Self {
        DumpConfig {
            pretty: settings.pretty,
            max_depth: settings.max_depth,
        }
    }
}

/// Settings applied when a [`Lua`](crate::Lua) engine is created
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LuaConfig {
    /// Install the strict-globals policy
    pub strict: bool,
    /// Chunk name for code run through `exec` and `eval`
    pub chunk_name: String,
    /// Scripts run in order right after the engine starts
    pub preload: Vec<PathBuf>,
    pub dump: DumpSettings,
}

impl Default for LuaConfig {
    fn default() -> Self {
        Self {
            strict: false,
            chunk_name: "anonymous".to_string(),
            preload: Vec::new(),
            dump: DumpSettings::default(),
        }
    }
}

impl LuaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse {
            path: None,
            message: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            message: e.to_string(),
        })
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_chunk_name(mut self, name: impl Into<String>) -> Self {
        self.chunk_name = name.into();
        self
    }

    pub fn with_preload(mut self, path: impl Into<PathBuf>) -> Self {
        self.preload.push(path.into());
        self
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.dump.pretty = pretty;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.dump.max_depth = max_depth;
        self
    }

    /// Dumper options derived from `[dump]`
    pub fn dump_config(&self) -> DumpConfig {
        DumpConfig::from(&self.dump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LuaConfig::from_toml("").unwrap();
        assert_eq!(config, LuaConfig::default());
        assert!(!config.strict);
        assert_eq!(config.chunk_name, "anonymous");
        assert!(config.dump.pretty);
        assert_eq!(config.dump.max_depth, 3);
    }

    #[test]
    fn test_parse_full() {
        let config = LuaConfig::from_toml(
            r#"
strict = true
chunk_name = "app"
preload = ["a.lua", "b.lua"]

[dump]
pretty = false
max_depth = 5
"#,
        )
        .unwrap();
        assert!(config.strict);
        assert_eq!(config.chunk_name, "app");
        assert_eq!(
            config.preload,
            vec![PathBuf::from("a.lua"), PathBuf::from("b.lua")]
        );
        let dump = config.dump_config();
        assert!(!dump.pretty);
        assert_eq!(dump.max_depth, 5);
    }

    #[test]
    fn test_partial_dump_section() {
        let config = LuaConfig::from_toml("[dump]\nmax_depth = 1\n").unwrap();
        assert!(config.dump.pretty);
        assert_eq!(config.dump.max_depth, 1);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = LuaConfig::from_toml("stirct = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: None, .. }));
    }

    #[test]
    fn test_from_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "strict = \"yes\"").unwrap();
        match LuaConfig::from_file(file.path()) {
            Err(ConfigError::Parse {
                path: Some(path), ..
            }) => assert_eq!(path, file.path()),
            other => panic!("Expected Parse error, got {:?}", other),
        }

        let missing = LuaConfig::from_file(Path::new("/nonexistent/luaw.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
        assert!(missing.to_string().contains("/nonexistent/luaw.toml"));
    }

    #[test]
    fn test_builder() {
        let config = LuaConfig::new()
            .with_strict(true)
            .with_chunk_name("repl")
            .with_preload("init.lua")
            .with_pretty(false)
            .with_max_depth(2);
        assert!(config.strict);
        assert_eq!(config.chunk_name, "repl");
        assert_eq!(config.preload, vec![PathBuf::from("init.lua")]);
        assert!(!config.dump_config().pretty);
        assert_eq!(config.dump_config().max_depth, 2);
    }
}
