use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Host configuration for the runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeConfig {
    pub logging: LoggingSection,
    pub runtime: RuntimeSection,
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingSection {
    pub level: String,
    pub format: String,
    pub file: Option<PathBuf>,
    pub file_level: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: None,
            file_level: None,
        }
    }
}

/// `[runtime]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeSection {
    /// Directories searched for plug-in runtime libraries, in order
    pub library_paths: Vec<PathBuf>,
}

impl RuntimeConfig {
    /// Load configuration using discovery hierarchy
    pub fn load() -> Result<Self> {
        debug!("Starting configuration discovery");

        for path in discover_config_files() {
            debug!("Attempting to load config from: {}", path.display());
            if path.exists() {
                info!("Loading configuration from: {}", path.display());
                return Self::load_from_file(&path);
            }
        }

        info!("No configuration file found, using default configuration");
        Ok(Self::default())
    }

    /// Load configuration from explicit file path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!("Successfully loaded configuration from: {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(content).context("Failed to parse TOML content")?;
        debug!("Parsed configuration: {:?}", config);
        Ok(config)
    }
}

/// Discover configuration files in order of precedence
fn discover_config_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Environment variable $PLUGINRT_CONFIG
    if let Ok(env_path) = env::var("PLUGINRT_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    // 2. XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("pluginrt").join("config.toml"));
    }

    // 3. Home directory
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".pluginrt.toml"));
    }

    // 4. Project local
    paths.push(PathBuf::from("./.pluginrt.toml"));

    debug!("Config discovery paths: {:?}", paths);
    paths
}
