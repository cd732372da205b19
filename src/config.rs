// src/config.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::drivers::SerialSettings;
use crate::recorder::{default_channel_names, timestamped_filename};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Use `<base_name>_<YYYYMMDD_HHMMSS>.csv` instead of `filename`.
    pub timestamped: bool,
    pub base_name: String,
    pub filename: String,
    pub channel_names: Vec<String>,
}
impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            timestamped: true,
            base_name: "mscope".to_owned(),
            filename: "mscope.csv".to_owned(),
            channel_names: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub serial: SerialSettings,
    pub channel_count: usize,
    pub max_channels: usize,
    pub history_capacity: usize,
    pub max_capacity: usize,
    pub poll_interval_ms: u64,
    pub read_chunk: usize,
    pub ring_capacity: usize,
    pub simulation_rate_hz: f64,
    pub recording: RecordingSettings,
}
impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            channel_count: 0,
            max_channels: 3,
            history_capacity: 1000,
            max_capacity: 10_000,
            poll_interval_ms: 10, // 100 Hz polling
            read_chunk: 64,
            ring_capacity: 256,
            simulation_rate_hz: 100.0,
            recording: RecordingSettings::default(),
        }
    }
}
impl ScopeConfig {
    /// Reads a JSON config file. Missing keys fall back to defaults and every
    /// bounded value is clamped.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: ScopeConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config.clamped())
    }
    pub fn clamped(mut self) -> Self {
        self.channel_count = self.clamp_channel_count(self.channel_count);
        self.history_capacity = self.clamp_capacity(self.history_capacity);
        self.poll_interval_ms = self.poll_interval_ms.clamp(1, 1000);
        self.read_chunk = self.read_chunk.max(1);
        self.ring_capacity = self.ring_capacity.max(self.read_chunk);
        self
    }
    pub fn clamp_channel_count(&self, count: usize) -> usize {
        count.min(self.max_channels)
    }
    pub fn clamp_capacity(&self, capacity: usize) -> usize {
        capacity.min(self.max_capacity)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn recording_path(&self) -> PathBuf {
        if self.recording.timestamped {
            PathBuf::from(timestamped_filename(&self.recording.base_name))
        } else {
            PathBuf::from(&self.recording.filename)
        }
    }
    /// One name per channel; blanks and missing entries get `Channel_<n>`.
    pub fn channel_names(&self) -> Vec<String> {
        default_channel_names(self.channel_count)
            .into_iter()
            .enumerate()
            .map(|(i, fallback)| match self.recording.channel_names.get(i) {
                Some(name) if !name.trim().is_empty() => name.clone(),
                _ => fallback,
            })
            .collect()
    }
}
