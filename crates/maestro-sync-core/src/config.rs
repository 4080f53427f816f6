use crate::error::Result;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persisted record of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SourceConfig {
    pub fn new(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            domain: default_domain(),
            extensions: default_extensions(),
            enabled: true,
        }
    }

    /// Whether `path` has one of the source's extensions (case-insensitive).
    pub fn accepts_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierSettings {
    pub fpcalc_command: String,
    pub decoder_command: String,
    pub acoustid_key: Option<String>,
    pub lookup_url: String,
    pub fallback_seconds: u32,
    pub lookup_timeout_secs: u64,
}

impl Default for IdentifierSettings {
    fn default() -> Self {
        Self {
            fpcalc_command: "fpcalc".to_string(),
            decoder_command: "ffmpeg".to_string(),
            acoustid_key: None,
            lookup_url: "https://api.acoustid.org/v2/lookup".to_string(),
            fallback_seconds: 15,
            lookup_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: String,
    pub poll_interval_ms: u64,
    pub scan_delay_secs: u64,
    pub ignore_patterns: Vec<String>,
    pub identifier: IdentifierSettings,
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "maestro.db".to_string(),
            poll_interval_ms: 200,
            scan_delay_secs: 5,
            ignore_patterns: Vec::new(),
            identifier: IdentifierSettings::default(),
            sources: Vec::new(),
        }
    }
}

fn default_domain() -> String {
    "music".to_string()
}

fn default_extensions() -> Vec<String> {
    ["mp3", "flac", "ogg", "oga", "opus", "m4a", "mp4", "wav", "wv", "ape", "mpc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

/// Load `<name>.{toml,yaml,json,...}` if present, then `MAESTRO__*` variables.
pub fn load_configuration(name: &str) -> std::result::Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name(name).required(false))
        .add_source(Environment::with_prefix("MAESTRO").separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Write the configuration, sources included, as TOML.
pub fn save_configuration(config: &AppConfig, path: &Path) -> Result<()> {
    let text = toml::to_string_pretty(config)?;
    fs::write(path, text)?;
    debug!("Saved configuration with {} sources to {}", config.sources.len(), path.display());
    Ok(())
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        let mut should_add = true;
        let result_clone = result.clone();

        for res_dir in &result_clone {
            let res_dir_path = Path::new(res_dir);

            if dir_path.starts_with(res_dir_path) {
                should_add = false;
                break;
            }

            if res_dir_path.starts_with(dir_path) {
                result.retain(|x| x != res_dir);
                break;
            }
        }

        if should_add {
            result.push(dir);
        }
    }

    result
}
