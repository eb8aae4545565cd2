//! Application configuration for PageStream.
//!
//! User config lives at `~/.pagestream/pagestream.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PageStreamError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pagestream.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pagestream";

// ---------------------------------------------------------------------------
// Config structs (matching pagestream.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Page stream source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Materialization settings.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source identifier: a URL, a path relative to `content_dir`, or empty.
    #[serde(default)]
    pub url: String,

    /// Root for local sources and for the filesystem-backed file list.
    #[serde(default = "default_content_dir")]
    pub content_dir: String,

    /// Deadline for remote fetches, in seconds. `0` disables the deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Fail the whole merge when the source cannot be fetched.
    #[serde(default)]
    pub strict: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            content_dir: default_content_dir(),
            timeout_secs: default_timeout_secs(),
            strict: false,
        }
    }
}

fn default_content_dir() -> String {
    "content".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory the merged file set is materialized into.
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "public".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pagestream/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PageStreamError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pagestream/pagestream.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PageStreamError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PageStreamError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PageStreamError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PageStreamError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PageStreamError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("content_dir"));
        assert!(toml_str.contains("timeout_secs = 30"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.source.content_dir, "content");
        assert_eq!(parsed.output.dir, "public");
        assert!(!parsed.source.strict);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[source]
url = "https://example.com/pages.json"
strict = true
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.source.url, "https://example.com/pages.json");
        assert!(config.source.strict);
        assert_eq!(config.source.timeout_secs, 30);
        assert_eq!(config.output.dir, "public");
    }

    #[test]
    fn invalid_config_file_is_a_config_error() {
        let dir = std::env::temp_dir().join(format!("ps-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.toml");
        std::fs::write(&path, "[source\nurl = 1").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, PageStreamError::Config { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
