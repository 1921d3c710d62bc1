//! Compiler configuration
//!
//! Default config location: ~/.pancake/config.toml

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Knobs the compiler reads on every request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompilerConfig {
    /// Table referenced when no schema supplies one.
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Always add the total-count column to the main statement.
    #[serde(default)]
    pub add_total_count: bool,
    #[serde(default = "default_terms_size")]
    pub default_terms_size: usize,
    #[serde(default = "default_composite_size")]
    pub default_composite_size: usize,
    #[serde(default = "default_sampler_shard_size")]
    pub default_sampler_shard_size: usize,
    #[serde(default = "default_geotile_precision")]
    pub default_geotile_precision: u32,
    #[serde(default = "default_geotile_size")]
    pub default_geotile_size: usize,
    #[serde(default = "default_auto_buckets")]
    pub default_auto_buckets: usize,
    #[serde(default = "default_top_hits_size")]
    pub default_top_hits_size: usize,
}

fn default_table_name() -> String {
    "__quesma_table_name".to_string()
}

fn default_terms_size() -> usize {
    10
}

fn default_composite_size() -> usize {
    10
}

fn default_sampler_shard_size() -> usize {
    100
}

fn default_geotile_precision() -> u32 {
    7
}

fn default_geotile_size() -> usize {
    10_000
}

fn default_auto_buckets() -> usize {
    10
}

fn default_top_hits_size() -> usize {
    1
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            add_total_count: false,
            default_terms_size: default_terms_size(),
            default_composite_size: default_composite_size(),
            default_sampler_shard_size: default_sampler_shard_size(),
            default_geotile_precision: default_geotile_precision(),
            default_geotile_size: default_geotile_size(),
            default_auto_buckets: default_auto_buckets(),
            default_top_hits_size: default_top_hits_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SchemaConfig {
    /// Directory of `*.yaml` table schemas.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log format: "pretty" (human-readable) or "json" (structured)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Default log level filter (overridden by RUST_LOG env var)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info,pancake=debug".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pancake")
}

pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Config {
    /// Load config from default location (~/.pancake/config.toml)
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_dir().join("config.toml"))
    }

    /// Load config from a file; a missing file yields the defaults.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };
        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from file path, or create default
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load_from(config_path)
        } else {
            let config = Config::default();
            config.save(config_path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn expand_paths(&mut self) -> Result<()> {
        if let Some(ref dir) = self.schema.dir {
            self.schema.dir = Some(expand_tilde(dir)?);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let c = &self.compiler;
        if c.table_name.trim().is_empty() {
            return Err(anyhow!("compiler.table_name must not be empty"));
        }
        if c.default_terms_size == 0 || c.default_composite_size == 0 {
            return Err(anyhow!("default bucket sizes must be > 0"));
        }
        if c.default_geotile_precision > 29 {
            return Err(anyhow!(
                "compiler.default_geotile_precision must be in 0..=29 (got {})",
                c.default_geotile_precision
            ));
        }
        Ok(())
    }
}
