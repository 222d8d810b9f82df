//! TOML configuration loading.
//!
//! The gateway reads a single `tollgate.toml`. A missing file yields the
//! built-in defaults (no providers, caching on); a malformed file also
//! falls back to defaults rather than refusing to start, with the parse
//! error logged so the operator can fix it.

use std::path::Path;

use tracing::{info, warn};

use tollgate_types::config::GatewayConfig;

/// Load gateway configuration from a TOML file.
pub fn load_config(path: &Path) -> GatewayConfig {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Config file not readable, using defaults"
            );
            return GatewayConfig::default();
        }
    };

    match toml::from_str::<GatewayConfig>(&raw) {
        Ok(config) => {
            info!(
                path = %path.display(),
                providers = config.providers.len(),
                "Loaded configuration"
            );
            config
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Config file invalid, using defaults"
            );
            GatewayConfig::default()
        }
    }
}
