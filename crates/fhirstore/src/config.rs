//! Configuration loading and environment overlay

use anyhow::{Context, Result};
use clap::Args;
use fhirstore_core::RawStoreConfiguration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Store attributes, `fhir-server-*` keys
    #[serde(default)]
    pub store: RawStoreConfiguration,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster transport settings handed to the cache engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub config_file_name: Option<String>,
    #[serde(default)]
    pub cluster_name: Option<String>,
}

/// Blocking-work executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_max_in_flight() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Values taken from the command line or the environment, overriding the file
#[derive(Args, Debug, Clone, Default)]
pub struct EnvOverrides {
    /// FHIR server host
    #[arg(long, env = "FHIR_SERVER_HOST", global = true)]
    pub host: Option<String>,

    /// FHIR server port
    #[arg(long, env = "FHIR_SERVER_PORT", global = true)]
    pub port: Option<i64>,

    /// FHIR server context path
    #[arg(long, env = "FHIR_SERVER_CONTEXT_PATH", global = true)]
    pub context_path: Option<String>,

    /// Socket timeout in seconds
    #[arg(long, env = "FHIR_SERVER_PORT_TIMEOUT", global = true)]
    pub port_timeout: Option<i64>,

    /// Use https and send the API key header
    #[arg(long, env = "FHIR_SERVER_REQUIRES_ENCRYPTION", global = true)]
    pub requires_encryption: Option<bool>,

    /// Comma-separated resource types to persist
    #[arg(long, env = "FHIR_SERVER_PERSISTED_RESOURCE_SET", global = true)]
    pub persisted_resource_set: Option<String>,

    /// Cluster transport configuration file
    #[arg(long, env = "JGROUPS_CONFIG_FILE_NAME", global = true)]
    pub cluster_config_file: Option<String>,

    /// Cluster name
    #[arg(long, env = "JGROUPS_CLUSTER_NAME", global = true)]
    pub cluster_name: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Overlay command line and environment values
    pub fn apply_overrides(&mut self, overrides: &EnvOverrides) -> Result<()> {
        let store = &mut self.store;

        if let Some(host) = non_blank(overrides.host.as_deref()) {
            store.host = Some(host.to_string());
        }
        if let Some(port) = overrides.port {
            store.port = port;
        }
        if let Some(path) = non_blank(overrides.context_path.as_deref()) {
            store.context_path = path.to_string();
        }
        if let Some(timeout) = overrides.port_timeout {
            store.port_timeout = timeout;
        }
        if let Some(encrypted) = overrides.requires_encryption {
            store.requires_encryption = encrypted;
        }
        if let Some(set) = non_blank(overrides.persisted_resource_set.as_deref()) {
            store.persisted_resource_set = set
                .parse()
                .with_context(|| format!("Invalid persisted resource set: {}", set))?;
        }
        if let Some(file) = non_blank(overrides.cluster_config_file.as_deref()) {
            self.cluster.config_file_name = Some(file.to_string());
        }
        if let Some(name) = non_blank(overrides.cluster_name.as_deref()) {
            self.cluster.cluster_name = Some(name.to_string());
        }

        Ok(())
    }

    /// Fill in the API key from the property named by the store configuration
    ///
    /// A key already present in the file wins.
    pub fn resolve_api_key(&mut self) {
        if self.store.api_key.is_some() {
            return;
        }

        let property = self.store.api_key_property.clone();
        match read_property(&property) {
            Some(value) => {
                debug!("API key read from {}", property_env_name(&property));
                self.store.api_key = Some(value);
            }
            None if self.store.requires_encryption => {
                warn!("No value for API key property {}", property);
            }
            None => {}
        }
    }
}

/// Environment variable name for a property: upper case, `.` and `-` become `_`
pub fn property_env_name(property: &str) -> String {
    property
        .trim()
        .chars()
        .map(|c| match c {
            '.' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Read a property from the environment. Blank values count as absent.
pub fn read_property(property: &str) -> Option<String> {
    std::env::var(property_env_name(property))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhirstore_client::ResourceType;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/fhirstore.toml").unwrap();
        assert_eq!(config.store.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.executor.max_in_flight, 16);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[store]
fhir-server-host = "fhir.local"
fhir-server-port = 9000
fhir-server-context-path = "/fhir"
fhir-server-persisted-resource-set = ["Patient", "Task"]

[cluster]
cluster_name = "fhirstore"

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.store.host.as_deref(), Some("fhir.local"));
        assert_eq!(config.store.port, 9000);
        assert!(config.store.persisted_resource_set.contains(ResourceType::Task));
        assert_eq!(config.cluster.cluster_name.as_deref(), Some("fhirstore"));
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = Config::default();
        config.store.host = Some("from-file".to_string());

        let overrides = EnvOverrides {
            host: Some("from-env".to_string()),
            port: Some(9443),
            context_path: Some("  ".to_string()),
            requires_encryption: Some(true),
            persisted_resource_set: Some("Patient,AuditEvent".to_string()),
            cluster_name: Some("c1".to_string()),
            ..Default::default()
        };
        config.apply_overrides(&overrides).unwrap();

        assert_eq!(config.store.host.as_deref(), Some("from-env"));
        assert_eq!(config.store.port, 9443);
        assert_eq!(config.store.context_path, "/");
        assert!(config.store.requires_encryption);
        assert_eq!(config.store.persisted_resource_set.len(), 2);
        assert_eq!(config.cluster.cluster_name.as_deref(), Some("c1"));

        let bad = EnvOverrides {
            persisted_resource_set: Some("Medication".to_string()),
            ..Default::default()
        };
        assert!(config.apply_overrides(&bad).is_err());
    }

    #[test]
    fn test_property_env_name() {
        assert_eq!(property_env_name("HAPI_API_KEY"), "HAPI_API_KEY");
        assert_eq!(property_env_name("hapi.api-key"), "HAPI_API_KEY");
    }

    #[test]
    fn test_file_api_key_is_kept() {
        let mut config = Config::default();
        config.store.api_key = Some("from-file".to_string());
        config.store.api_key_property = "FHIRSTORE_TEST_UNSET_PROPERTY".to_string();
        config.resolve_api_key();
        assert_eq!(config.store.api_key.as_deref(), Some("from-file"));
    }
}
