//! Runtime settings shared by the reference loop, the registry and proxies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bridge configuration.
///
/// ```
/// use loop_bridge::BridgeConfig;
///
/// let config = BridgeConfig::from_toml_str("call_timeout_ms = 250").unwrap();
/// assert_eq!(config.call_timeout().unwrap().as_millis(), 250);
/// assert!(config.warn_unbound_generate);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Default wait for ordinary proxy calls. `None` waits indefinitely.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    /// Log a warning when data is generated for a sequence nobody bound.
    #[serde(default = "default_true")]
    pub warn_unbound_generate: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: None,
            warn_unbound_generate: true,
        }
    }
}

impl BridgeConfig {
    /// Parses a TOML document; missing keys fall back to their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}
