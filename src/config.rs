use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::GateConfig;

/// Main configuration structure for Haulgate
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HaulgateConfig {
    /// Database settings
    pub database: DatabaseConfig,
    /// Gate defaults applied to new jobs
    pub gate: GateConfig,
    /// Carrier link settings
    pub invites: InviteConfig,
    /// Notification outbox settings
    pub outbox: OutboxConfig,
    /// Payment provider selection
    pub payments: PaymentsConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
    /// How long a writer waits on a locked database before giving up
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://haulgate.db".to_string(),
            max_connections: 4,
            auto_migrate: true,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InviteConfig {
    /// Prefix for carrier links, e.g. https://app.example.com
    pub base_url: String,
    /// Token lifetime; no expiry when unset
    pub ttl_hours: Option<i64>,
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            ttl_hours: Some(72),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub default_drain_limit: u32,
    pub max_drain_limit: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            default_drain_limit: 20,
            max_drain_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaymentsConfig {
    /// Provider name recorded on holds
    pub provider: String,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            provider: "noop".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl HaulgateConfig {
    /// Load configuration from defaults, haulgate.toml and HAULGATE__* environment variables
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenvy::dotenv();

        let defaults = Config::try_from(&HaulgateConfig::default())?;

        let mut builder = Config::builder().add_source(defaults);

        if Path::new("haulgate.toml").exists() {
            builder = builder.add_source(File::with_name("haulgate.toml"));
        }

        builder = builder.add_source(
            Environment::with_prefix("HAULGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let haulgate_config: HaulgateConfig = config.try_deserialize()?;

        Ok(haulgate_config)
    }

    /// Load configuration from an explicit TOML file layered over defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let defaults = Config::try_from(&HaulgateConfig::default())?;
        let config = Config::builder()
            .add_source(defaults)
            .add_source(File::from(path))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<HaulgateConfig> = std::sync::LazyLock::new(|| {
    HaulgateConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load configuration: {e}. Using defaults.");
        HaulgateConfig::default()
    })
});

/// Get global configuration instance
pub fn config() -> &'static HaulgateConfig {
    &CONFIG
}

/// Initialize configuration (call early in main)
pub fn init_config() -> Result<()> {
    let _ = config();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_gate_defaults() {
        let config = HaulgateConfig::default();
        assert_eq!(config.gate, GateConfig::default());
        assert_eq!(config.outbox.default_drain_limit, 20);
        assert_eq!(config.outbox.max_drain_limit, 200);
    }

    #[test]
    fn test_file_overrides_layer_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[gate]\nrequire_pod = true\nmin_pickup_photos = 2\n\n[invites]\nbase_url = \"https://haul.example\""
        )
        .unwrap();

        let config = HaulgateConfig::from_file(file.path()).unwrap();

        assert!(config.gate.require_pod);
        assert_eq!(config.gate.min_pickup_photos, 2);
        assert_eq!(config.gate.min_delivery_photos, 4);
        assert_eq!(config.invites.base_url, "https://haul.example");
        assert_eq!(config.database.max_connections, 4);
    }

    #[test]
    fn test_config_renders_as_toml() {
        let rendered = HaulgateConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[gate]"));
        assert!(rendered.contains("approval_mode = \"manual\""));
    }
}
