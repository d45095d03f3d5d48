//! File-backed configuration and storage adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for a host node.
//!
//! - Config: one JSON file.  A missing file yields defaults; every field is
//!   range-checked before it is handed out or written back.
//! - Storage: `<state_dir>/<namespace>/<key>` files.  Writes go to a
//!   sibling temp file first and are renamed into place, so a reader sees
//!   the old record or the new one.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::NodeConfig;
use crate::reading::ReadingId;

pub struct FileStore {
    config_path: PathBuf,
    state_dir: PathBuf,
}

impl FileStore {
    pub fn new(config_path: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn record_path(&self, namespace: &str, key: &str) -> Result<PathBuf, StorageError> {
        for part in [namespace, key] {
            if part.is_empty() || part.contains(['/', '\\']) || part.starts_with('.') {
                return Err(StorageError::IoError);
            }
        }
        Ok(self.state_dir.join(namespace).join(key))
    }
}

/// Write `data` to `path` through a temp file and a rename.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

pub fn validate_config(cfg: &NodeConfig) -> Result<(), ConfigError> {
    if cfg.site_id.is_empty() || cfg.site_id.contains(':') {
        return Err(ConfigError::ValidationFailed(
            "site_id must be non-empty and contain no ':'",
        ));
    }
    if !(1..=10).contains(&cfg.remote_retries) {
        return Err(ConfigError::ValidationFailed("remote_retries must be 1–10"));
    }
    if cfg.remote_retry_pause_ms > 10_000 {
        return Err(ConfigError::ValidationFailed(
            "remote_retry_pause_ms must be at most 10000",
        ));
    }
    if !(10..=10_000).contains(&cfg.servo_hold_period_ms) {
        return Err(ConfigError::ValidationFailed(
            "servo_hold_period_ms must be 10–10000",
        ));
    }
    if !(10..=cfg.servo_hold_period_ms).contains(&cfg.servo_drive_period_ms) {
        return Err(ConfigError::ValidationFailed(
            "servo_drive_period_ms must be 10–servo_hold_period_ms",
        ));
    }
    if !(10..=60_000).contains(&cfg.decoder_period_ms) {
        return Err(ConfigError::ValidationFailed(
            "decoder_period_ms must be 10–60000",
        ));
    }

    let v = &cfg.valve;
    if v.max_open > 100 || v.min_open >= v.max_open {
        return Err(ConfigError::ValidationFailed(
            "valve min_open must be below max_open, max_open at most 100",
        ));
    }
    if v.tolerance == 0 || v.tolerance > 25 {
        return Err(ConfigError::ValidationFailed("valve tolerance must be 1–25"));
    }
    if !(0.5..=12.0).contains(&v.ref_voltage) {
        return Err(ConfigError::ValidationFailed(
            "valve ref_voltage must be 0.5–12.0",
        ));
    }

    if !cfg.probe.is_consistent() {
        return Err(ConfigError::ValidationFailed(
            "probe calibration windows and depth columns disagree",
        ));
    }
    if cfg.probe_channels.contains(&cfg.valve_position_channel) {
        return Err(ConfigError::ValidationFailed(
            "valve_position_channel must not be a probe channel",
        ));
    }
    if cfg.probe_reading_id.parse::<ReadingId>().is_err() {
        return Err(ConfigError::ValidationFailed(
            "probe_reading_id must be <zone>:<sensor>",
        ));
    }

    let t = &cfg.transfer;
    if !(t.dest_overfull > t.dest_full
        && t.dest_full > t.dest_very_nearly_full
        && t.dest_very_nearly_full > t.dest_nearly_full
        && t.source_full > t.source_not_empty)
    {
        return Err(ConfigError::ValidationFailed(
            "transfer levels must be strictly ordered",
        ));
    }

    let s = &cfg.topup;
    if !(s.window_start <= s.window_end && s.window_end < s.failsafe_end) {
        return Err(ConfigError::ValidationFailed(
            "top-up window must start before it ends and end before the failsafe",
        ));
    }
    if s.stop_level < s.start_level {
        return Err(ConfigError::ValidationFailed(
            "top-up stop_level must not be below start_level",
        ));
    }
    Ok(())
}

impl ConfigPort for FileStore {
    fn load(&self) -> Result<NodeConfig, ConfigError> {
        let text = match fs::read_to_string(&self.config_path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    "FileStore: no config at {}, using defaults",
                    self.config_path.display()
                );
                return Ok(NodeConfig::default());
            }
            Err(e) => {
                warn!("FileStore: cannot read {}: {}", self.config_path.display(), e);
                return Err(ConfigError::IoError);
            }
        };
        let cfg: NodeConfig = serde_json::from_str(&text).map_err(|e| {
            warn!("FileStore: {} is not valid config: {}", self.config_path.display(), e);
            ConfigError::Corrupted
        })?;
        validate_config(&cfg)?;
        info!("FileStore: loaded config from {}", self.config_path.display());
        Ok(cfg)
    }

    fn save(&self, config: &NodeConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let json = serde_json::to_vec_pretty(config).map_err(|_| ConfigError::Corrupted)?;
        write_atomic(&self.config_path, &json).map_err(|e| {
            warn!("FileStore: cannot write {}: {}", self.config_path.display(), e);
            ConfigError::IoError
        })
    }
}

impl StoragePort for FileStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let path = self.record_path(namespace, key)?;
        let data = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound,
            _ => StorageError::IoError,
        })?;
        if data.len() > buf.len() {
            return Err(StorageError::BufferTooSmall);
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.record_path(namespace, key)?;
        write_atomic(&path, data).map_err(|e| {
            warn!("FileStore: cannot write {}: {}", path.display(), e);
            StorageError::IoError
        })
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let path = self.record_path(namespace, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(_) => Err(StorageError::IoError),
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.record_path(namespace, key)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }
}
