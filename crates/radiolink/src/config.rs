//! Link provider configuration
//!
//! Timings are stored as milliseconds so the struct maps directly onto a TOML
//! table:
//!
//! ```toml
//! enabled = true
//! service_name = "radiolink"
//! settle_delay_ms = 500
//! discovery_window_ms = 15000
//! handshake_timeout_ms = 30000
//! ```

use crate::error::{LinkError, LinkResult};
use crate::types::ServiceId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default pause between raw connection establishment and framed I/O.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;

/// Default length of the discovery listening window.
pub const DEFAULT_DISCOVERY_WINDOW_MS: u64 = 15_000;

/// Default deadline for a whole handshake, settle delay included.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 30_000;

/// Configuration for [`RadioLinkProvider`](crate::provider::RadioLinkProvider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkProviderConfig {
    /// Whether the provider does anything on start.
    pub enabled: bool,
    /// Name advertised alongside the service record.
    pub service_name: String,
    /// Service UUID we listen on and look for.
    pub service_id: ServiceId,
    /// Pause after a raw connection becomes usable, before framed I/O.
    pub settle_delay_ms: u64,
    /// How long one discovery pass keeps listening for capability events.
    pub discovery_window_ms: u64,
    /// Deadline for a whole handshake. `None` waits for the transport to give
    /// up on its own.
    pub handshake_timeout_ms: Option<u64>,
}

impl Default for LinkProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "radiolink".to_string(),
            service_id: ServiceId::default(),
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            discovery_window_ms: DEFAULT_DISCOVERY_WINDOW_MS,
            handshake_timeout_ms: Some(DEFAULT_HANDSHAKE_TIMEOUT_MS),
        }
    }
}

impl LinkProviderConfig {
    /// Parse a TOML document; absent keys take their defaults.
    pub fn from_toml_str(source: &str) -> LinkResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load_from_file(path: &Path) -> LinkResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            LinkError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LinkResult<()> {
        if self.service_name.trim().is_empty() {
            return Err(LinkError::config("service_name must not be empty"));
        }
        if self.discovery_window_ms == 0 {
            return Err(LinkError::config("discovery_window_ms must be positive"));
        }
        if let Some(timeout) = self.handshake_timeout_ms {
            if timeout <= self.settle_delay_ms {
                return Err(LinkError::config(format!(
                    "handshake_timeout_ms ({timeout}) must exceed settle_delay_ms ({})",
                    self.settle_delay_ms
                )));
            }
        }
        Ok(())
    }

    /// Settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Discovery window as a [`Duration`].
    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }

    /// Handshake deadline as a [`Duration`], if any.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use uuid::Uuid;

    #[test]
    fn test_defaults_validate() {
        let config = LinkProviderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.settle_delay(), Duration::from_millis(500));
        assert_eq!(config.discovery_window(), Duration::from_secs(15));
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LinkProviderConfig::from_toml_str(
            r#"
            settle_delay_ms = 10
            service_id = "00000000-0000-0000-0000-000000000001"
            "#,
        )
        .unwrap();

        assert_eq!(config.settle_delay_ms, 10);
        assert_eq!(config.service_id.uuid(), Uuid::from_u128(1));
        assert_eq!(config.discovery_window_ms, DEFAULT_DISCOVERY_WINDOW_MS);
        assert!(config.enabled);
    }

    #[test]
    fn test_invalid_configs() {
        let err = LinkProviderConfig::from_toml_str("discovery_window_ms = 0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = LinkProviderConfig::from_toml_str(
            "settle_delay_ms = 1000\nhandshake_timeout_ms = 500",
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = LinkProviderConfig::from_toml_str("enabled = \"yes\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
