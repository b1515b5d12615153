//! Application constants and filesystem paths.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Incremental projection patches fall back to a full rebuild when the delta
/// exceeds this fraction of the projection's current row count.
pub const DEFAULT_REBUILD_FRACTION: f32 = 0.2;

/// Group label for entities whose hierarchy attribute is missing or empty
pub const UNSPECIFIED_LABEL: &str = "undef";

/// Property choice meaning "no property, plain color"
pub const PROPERTY_NONE: &str = "none";

/// Maximum events in the bus queue before oldest are evicted
pub const MAX_EVENT_QUEUE: usize = 1000;

/// Files whose presence in the working directory makes it the config dir
const LOCAL_CONFIG_FILES: [&str; 3] = ["pzero.json", "pzero_views.json", "pzero.log"];

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Create PathConfig from CLI arguments and environment variables
    ///
    /// Priority: CLI args → ENV var (PZERO_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var("PZERO_CONFIG_DIR").ok().map(PathBuf::from));

        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. PZERO_CONFIG_DIR environment variable
/// 3. Local folder IF any config files exist (pzero.json, pzero_views.json, pzero.log)
/// 4. Platform-specific config directory from dirs-next (default)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Get path to a data file (logs, saved scenes)
///
/// Same priority as [`config_file`] but falls back to the platform data dir.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    get_data_dir(config).join(name)
}

/// Ensure that configuration and data directories exist
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = get_config_dir(config);
    let data_dir = get_data_dir(config);

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    }

    if data_dir != config_dir && !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }

    Ok(())
}

fn has_local_config_files(dir: &std::path::Path) -> bool {
    LOCAL_CONFIG_FILES.iter().any(|f| dir.join(f).exists())
}

fn local_dir() -> Option<PathBuf> {
    std::env::current_dir().ok().filter(|d| has_local_config_files(d))
}

fn get_config_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    dirs_next::config_dir()
        .map(|d| d.join("pzero"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn get_data_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    dirs_next::data_dir()
        .map(|d| d.join("pzero"))
        .unwrap_or_else(|| PathBuf::from("."))
}
