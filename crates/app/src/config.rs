use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use barkwatch_detect::DebounceConfig;
use barkwatch_foundation::AppError;
use barkwatch_relay::RelayConfig;

/// Top-level configuration, loadable from TOML. Every field has a default,
/// so a partial file (or none at all) is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tick_rate_hz: u32,
    pub chunk_size: usize,
    /// RMS gate of the built-in level classifier.
    pub level_threshold: f64,
    pub debounce: DebounceConfig,
    pub relay: RelayConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            chunk_size: barkwatch_audio::DEFAULT_CHUNK_SIZE,
            level_threshold: 4000.0,
            debounce: DebounceConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    AppError::Config(format!("reading {}: {e}", path.display()))
                })?;
                let cfg = toml::from_str(&text).map_err(|e| {
                    AppError::Config(format!("parsing {}: {e}", path.display()))
                })?;
                tracing::info!(path = %path.display(), "configuration loaded");
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults_for_the_rest() {
        let cfg: AppConfig = toml::from_str(
            r#"
            tick_rate_hz = 30

            [debounce]
            subject_threshold = 0.8

            [relay]
            port = 20000
            "#,
        )
        .unwrap();

        assert_eq!(cfg.tick_rate_hz, 30);
        assert_eq!(cfg.debounce.subject_threshold, 0.8);
        assert_eq!(cfg.debounce.signature_threshold, 0.85);
        assert_eq!(cfg.relay.port, 20000);
        assert_eq!(cfg.relay.client_timeout_s, 10.0);
        assert_eq!(cfg.chunk_size, barkwatch_audio::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn defaults_match_the_deployment_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.tick_rate_hz, 60);
        assert_eq!(cfg.relay.port, 19912);
        assert_eq!(cfg.debounce.grace_period_s, 1.0);
    }
}
