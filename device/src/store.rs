use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;

use airdry_common::DeviceConfig;

/// On-disk home of the device: persisted config plus the firmware staging
/// image. Location comes from `AIRDRY_DATA_DIR`, defaulting to `./.airdry`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
    staging_path: PathBuf,
}

impl ConfigStore {
    pub fn new() -> Self {
        let data_dir = std::env::var("AIRDRY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.airdry"));

        Self {
            config_path: data_dir.join("config.json"),
            staging_path: data_dir.join("firmware-staged.bin"),
        }
    }

    pub fn staging_path(&self) -> PathBuf {
        self.staging_path.clone()
    }

    pub fn load(&self) -> anyhow::Result<DeviceConfig> {
        match std::fs::read(&self.config_path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("invalid config file {}", self.config_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DeviceConfig::default()),
            Err(err) => Err(err).context("failed to read config file"),
        }
    }

    pub fn save(&self, config: &DeviceConfig) -> anyhow::Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data dir {}", parent.display()))?;
        }
        let payload = serde_json::to_vec_pretty(config)?;
        std::fs::write(&self.config_path, payload)
            .with_context(|| format!("failed to write config file {}", self.config_path.display()))
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}
