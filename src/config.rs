//! Server configuration

use crate::error::{Result, RouterError};
use crate::renderer::CacheScope;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::Level;

/// Configuration of the routing server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP server binds to (default: "127.0.0.1:8080")
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Path of the services document (default: "services.yaml")
    #[serde(default = "default_services_file")]
    pub services_file: String,

    /// Shared secret for control parameters (optional)
    /// If not set, control parameters are accepted from every caller
    #[serde(default)]
    pub control_key: Option<String>,

    /// Answer generator failures with an error document instead of a
    /// hard 500 (default: true)
    #[serde(default = "default_true")]
    pub swallow_generator_errors: bool,

    /// Freshness lifetime of cacheable responses in seconds (default: 300)
    #[serde(default = "default_expires_secs")]
    pub expires_secs: u64,

    /// Prefix marking HTTP parameters meant for the renderer (default: "xsl.")
    #[serde(default = "default_render_param_prefix")]
    pub render_param_prefix: String,

    /// Which services share a compiled template (default: service)
    #[serde(default)]
    pub template_cache_scope: CacheScope,

    /// Whether to gzip rendered bodies for clients that accept it (default: true)
    #[serde(default = "default_true")]
    pub enable_compression: bool,

    /// Log level: trace, debug, info, warn or error (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_services_file() -> String {
    "services.yaml".to_string()
}

fn default_true() -> bool {
    true
}

fn default_expires_secs() -> u64 {
    300 // 5 minutes
}

fn default_render_param_prefix() -> String {
    "xsl.".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_address: default_listen_address(),
            services_file: default_services_file(),
            control_key: None,
            swallow_generator_errors: default_true(),
            expires_secs: default_expires_secs(),
            render_param_prefix: default_render_param_prefix(),
            template_cache_scope: CacheScope::default(),
            enable_compression: default_true(),
            log_level: default_log_level(),
            metrics_endpoint: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(ServerConfig)` if loading and validation succeed
    /// * `Err(RouterError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RouterError::ConfigError(format!("Failed to read config file: {}", e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ServerConfig = serde_yaml::from_str(content).map_err(|e| {
            RouterError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - listen_address must be a socket address
    /// - services_file must not be empty
    /// - render_param_prefix must not be empty
    /// - log_level must name a tracing level
    /// - an enabled metrics endpoint must have a socket address
    pub fn validate(&self) -> Result<()> {
        if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(RouterError::ConfigError(format!(
                "listen_address '{}' is not a socket address",
                self.listen_address
            )));
        }

        if self.services_file.trim().is_empty() {
            return Err(RouterError::ConfigError(
                "services_file must not be empty".to_string(),
            ));
        }

        if self.render_param_prefix.is_empty() {
            return Err(RouterError::ConfigError(
                "render_param_prefix must not be empty".to_string(),
            ));
        }

        self.tracing_level()?;

        if let Some(metrics) = &self.metrics_endpoint {
            if metrics.enabled && metrics.address.parse::<std::net::SocketAddr>().is_err() {
                return Err(RouterError::ConfigError(format!(
                    "metrics_endpoint address '{}' is not a socket address",
                    metrics.address
                )));
            }
        }

        Ok(())
    }

    /// Parsed `log_level`
    pub fn tracing_level(&self) -> Result<Level> {
        self.log_level.parse::<Level>().map_err(|_| {
            RouterError::ConfigError(format!(
                "Invalid log_level '{}', must be one of trace, debug, info, warn, error",
                self.log_level
            ))
        })
    }

    /// Control key, if one is configured and non-empty
    pub fn control_key(&self) -> Option<&str> {
        self.control_key.as_deref().filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.render_param_prefix, "xsl.");
        assert!(config.swallow_generator_errors);
        assert_eq!(config.control_key(), None);
    }

    #[test]
    fn test_empty_control_key_means_none() {
        let config = ServerConfig {
            control_key: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(config.control_key(), None);
    }

    #[test]
    fn test_invalid_values() {
        let bad_address = ServerConfig {
            listen_address: "nowhere".into(),
            ..Default::default()
        };
        assert!(bad_address.validate().is_err());

        let bad_level = ServerConfig {
            log_level: "loud".into(),
            ..Default::default()
        };
        assert!(bad_level.validate().is_err());

        let bad_prefix = ServerConfig {
            render_param_prefix: String::new(),
            ..Default::default()
        };
        assert!(bad_prefix.validate().is_err());
    }

    #[test]
    fn test_from_yaml() {
        let config = ServerConfig::from_yaml(
            "listen_address: \"0.0.0.0:8000\"\ncontrol_key: secret\ntemplate_cache_scope: group\n",
        )
        .unwrap();
        assert_eq!(config.control_key(), Some("secret"));
        assert_eq!(config.template_cache_scope, CacheScope::Group);
        assert_eq!(config.expires_secs, 300);
    }
}
