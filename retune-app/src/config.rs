//! Simple configuration persistence for Retune
//!
//! Stores the correction settings and host options between runs.

use retune_analysis::{parse_root_key, Scale, NOTE_NAMES};
use retune_audio::CorrectionConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root key (0 = C .. 11 = B)
    pub root_key: u8,
    pub scale: Scale,
    pub retune_speed: f32,
    pub amount: f32,
    pub humanize: f32,
    pub bypass: bool,
    /// Requested audio buffer size in frames (None = device default)
    pub block_size: Option<u32>,
    /// How often the status line is printed
    pub status_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let correction = CorrectionConfig::default();
        Self {
            root_key: correction.root_key,
            scale: correction.scale,
            retune_speed: correction.retune_speed,
            amount: correction.amount,
            humanize: correction.humanize,
            bypass: correction.bypass,
            block_size: None,
            status_interval_ms: 500,
        }
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be read.
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => {
                tracing::warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        fs::write(path, self.serialize()).map_err(io_err)
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("retune")
            .join("config.txt")
    }

    /// Correction parameters to start the engine with
    pub fn correction_config(&self) -> CorrectionConfig {
        CorrectionConfig {
            root_key: self.root_key,
            scale: self.scale,
            retune_speed: self.retune_speed,
            amount: self.amount,
            humanize: self.humanize,
            formant_shift: 0.0,
            bypass: self.bypass,
        }
        .sanitized()
    }

    /// Take over the current engine parameters
    pub fn set_correction(&mut self, correction: &CorrectionConfig) {
        self.root_key = correction.root_key;
        self.scale = correction.scale;
        self.retune_speed = correction.retune_speed;
        self.amount = correction.amount;
        self.humanize = correction.humanize;
        self.bypass = correction.bypass;
    }

    /// Parse config from simple key=value format
    ///
    /// Invalid values keep their defaults and are logged.
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "root_key" => match parse_root_key(value) {
                    Ok(key) => config.root_key = key,
                    Err(e) => warn_invalid(key, value, &e),
                },
                "scale" => match value.parse::<Scale>() {
                    Ok(scale) => config.scale = scale,
                    Err(e) => warn_invalid(key, value, &e),
                },
                "retune_speed" => parse_unit(key, value, &mut config.retune_speed),
                "amount" => parse_unit(key, value, &mut config.amount),
                "humanize" => parse_unit(key, value, &mut config.humanize),
                "bypass" => match parse_bool(value) {
                    Some(b) => config.bypass = b,
                    None => warn_invalid(key, value, &"expected true or false"),
                },
                "block_size" => match value.parse::<u32>() {
                    Ok(0) => config.block_size = None,
                    Ok(n) => config.block_size = Some(n),
                    Err(e) => warn_invalid(key, value, &e),
                },
                "status_interval_ms" => match value.parse::<u64>() {
                    Ok(ms) if ms > 0 => config.status_interval_ms = ms,
                    Ok(_) => warn_invalid(key, value, &"must be positive"),
                    Err(e) => warn_invalid(key, value, &e),
                },
                _ => {} // Ignore unknown keys
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        let mut lines = Vec::new();
        lines.push("# Retune Configuration".to_string());
        lines.push(format!("root_key={}", NOTE_NAMES[self.root_key as usize % 12]));
        lines.push(format!("scale={}", self.scale.name()));
        lines.push(format!("retune_speed={}", self.retune_speed));
        lines.push(format!("amount={}", self.amount));
        lines.push(format!("humanize={}", self.humanize));
        lines.push(format!("bypass={}", self.bypass));
        if let Some(size) = self.block_size {
            lines.push(format!("block_size={}", size));
        }
        lines.push(format!("status_interval_ms={}", self.status_interval_ms));

        lines.join("\n")
    }
}

fn parse_unit(key: &str, value: &str, slot: &mut f32) {
    match value.parse::<f32>() {
        Ok(v) if v.is_finite() && (0.0..=1.0).contains(&v) => *slot = v,
        Ok(_) => warn_invalid(key, value, &"must be between 0 and 1"),
        Err(e) => warn_invalid(key, value, &e),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn warn_invalid(key: &str, value: &str, reason: &dyn std::fmt::Display) {
    tracing::warn!(key, value, "ignoring invalid config value: {}", reason);
}
