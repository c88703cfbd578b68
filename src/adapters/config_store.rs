//! In-memory configuration store.
//!
//! Implements [`ConfigPort`] over a postcard blob, the same encoding a
//! flash-backed store would write.  Every save validates first; a config
//! that fails validation never reaches storage.

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::EngineConfig;
use crate::error::Error;

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    blob: Option<Vec<u8>>,
    saves: u32,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed storage with raw bytes (e.g. a blob read from a file).
    pub fn with_blob(blob: Vec<u8>) -> Self {
        Self {
            blob: Some(blob),
            saves: 0,
        }
    }

    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    pub fn save_count(&self) -> u32 {
        self.saves
    }
}

fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    config.validate().map_err(|e| match e {
        Error::Config(msg) => ConfigError::ValidationFailed(msg),
        _ => ConfigError::ValidationFailed("invalid config"),
    })
}

impl ConfigPort for MemoryConfigStore {
    fn load(&self) -> Result<EngineConfig, ConfigError> {
        let blob = self.blob.as_deref().ok_or(ConfigError::NotFound)?;
        let config = EngineConfig::from_bytes(blob).map_err(|e| {
            warn!("Config store: decode failed: {e}");
            ConfigError::Corrupted
        })?;
        validate(&config)?;
        Ok(config)
    }

    fn save(&mut self, config: &EngineConfig) -> Result<(), ConfigError> {
        validate(config)?;
        let bytes = config.to_bytes().map_err(|_| ConfigError::IoError)?;
        info!("Config store: saved {} bytes", bytes.len());
        self.blob = Some(bytes);
        self.saves = self.saves.wrapping_add(1);
        Ok(())
    }
}
