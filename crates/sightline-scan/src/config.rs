use std::path::{Path, PathBuf};

use sightline_core::{ConfigError, EngineConfig};

const DEFAULT_CONCURRENCY: usize = 4;

/// Runtime settings, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite profile database.
    pub db_path: PathBuf,
    /// Path to the engine TOML file (missing file = defaults).
    pub config_path: PathBuf,
    /// Images scanned in parallel.
    pub concurrency: usize,
}

impl Config {
    /// Load configuration from `SIGHTLINE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = xdg_dir("XDG_DATA_HOME", ".local/share").join("sightline");
        let config_dir = xdg_dir("XDG_CONFIG_HOME", ".config").join("sightline");

        Self {
            db_path: std::env::var("SIGHTLINE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("profiles.db")),
            config_path: std::env::var("SIGHTLINE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| config_dir.join("config.toml")),
            concurrency: env_usize("SIGHTLINE_CONCURRENCY", DEFAULT_CONCURRENCY).max(1),
        }
    }

    /// Engine configuration from `config_path`, with environment overrides applied.
    pub fn engine(&self) -> Result<EngineConfig, ConfigError> {
        load_engine_config(&self.config_path, |key| std::env::var(key).ok())
    }
}

/// Read the TOML file at `path` (defaults when absent), apply overrides from
/// `lookup`, and validate the result.
pub fn load_engine_config(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<EngineConfig, ConfigError> {
    let mut cfg = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        EngineConfig::parse(&raw)?
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        EngineConfig::default()
    };

    override_f32(&lookup, "SIGHTLINE_THRESHOLD", &mut cfg.matching.threshold);
    override_f32(&lookup, "SIGHTLINE_POSSIBLE_BAND", &mut cfg.matching.possible_band);
    override_f32(&lookup, "SIGHTLINE_MARGIN", &mut cfg.matching.margin);
    override_f32(&lookup, "SIGHTLINE_MIN_DET_SCORE", &mut cfg.filter.min_det_score);
    if let Some(v) = lookup("SIGHTLINE_MAX_FACES").and_then(|v| v.parse().ok()) {
        cfg.filter.max_faces_per_image = v;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn override_f32(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut f32) {
    if let Some(v) = lookup(key).and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
