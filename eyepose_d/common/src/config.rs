use anyhow::Result;
use api::{DetectionOptions, OptionsError};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid detection options: {0}")]
    Detection(#[from] OptionsError),

    #[error("refresh_hz must give a tick period between 1ns and u64::MAX seconds, got {0}")]
    RefreshRate(f32),

    #[error("report_interval must be non-zero")]
    ReportInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginConfig {
    /// Library stem; the platform prefix and extension are added when loading.
    pub name: String,
    pub search_dirs: Vec<PathBuf>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            name: "synthetic_pose".to_string(),
            search_dirs: vec![
                PathBuf::from("plugins/native"),
                PathBuf::from("../plugins/native"),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub detection: DetectionOptions,
    /// Detection cycles are aligned to ticks of this rate.
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: f32,
    pub plugin: PluginConfig,
    /// Frames between detection-rate log lines.
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
}

fn default_refresh_hz() -> f32 {
    60.0
}

fn default_report_interval() -> u64 {
    1000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detection: DetectionOptions::default(),
            refresh_hz: default_refresh_hz(),
            plugin: PluginConfig::default(),
            report_interval: default_report_interval(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detection.validate()?;
        self.tick()?;
        if self.report_interval == 0 {
            return Err(ConfigError::ReportInterval);
        }
        Ok(())
    }

    /// Time between detection ticks.
    pub fn tick(&self) -> Result<Duration, ConfigError> {
        if !(self.refresh_hz.is_finite() && self.refresh_hz > 0.0) {
            return Err(ConfigError::RefreshRate(self.refresh_hz));
        }
        match Duration::try_from_secs_f32(1.0 / self.refresh_hz) {
            Ok(tick) if !tick.is_zero() => Ok(tick),
            _ => Err(ConfigError::RefreshRate(self.refresh_hz)),
        }
    }
}

/// Reads the config at `path`, writing a default one first if none exists.
pub fn load_config(path: &Path) -> Result<TrackerConfig> {
    let config = if path.exists() {
        info!("Loading config from {:?}", path);
        let file = fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)?
    } else {
        info!("Config not found. Creating default at {:?}", path);
        let config = TrackerConfig::default();
        let file = fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &config)?;
        config
    };
    config.validate()?;
    Ok(config)
}
