//! Proxy Configuration
//!
//! Optional TOML file, overridden field by field by CLI flags and
//! environment variables. Example:
//!
//! ```toml
//! socket_path = "/tmp/xcelerate-proxy.sock"
//! endpoint = "https://cache.example.com:443"
//! token = "..."
//! org_id = "org-123"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use xcelerate_protocol::TOOL_NAME;

use crate::headers::Credentials;

/// Proxy configuration
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyConfig {
    /// UNIX socket the compiler connects to
    pub socket_path: PathBuf,

    /// Remote store URL (`http://` or `https://`)
    pub endpoint: String,

    /// Bearer token; omitted from requests when empty
    pub token: String,

    /// Organisation id; omitted from requests when empty
    pub org_id: String,

    /// Reported as `x-flare-buildtool` and in `RequestMetadata`
    pub tool_name: String,

    /// Timeout for establishing the remote connection
    pub connect_timeout_seconds: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            endpoint: String::new(),
            token: String::new(),
            org_id: String::new(),
            tool_name: TOOL_NAME.to_string(),
            connect_timeout_seconds: 10,
        }
    }
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("socket_path", &self.socket_path)
            .field("endpoint", &self.endpoint)
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("org_id", &self.org_id)
            .field("tool_name", &self.tool_name)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .finish()
    }
}

/// `$TMPDIR/xcelerate-proxy.sock`
pub fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join("xcelerate-proxy.sock")
}

/// Errors that can occur when loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ProxyConfig {
    /// Load configuration from a TOML file. Not validated: flags may still
    /// fill in missing fields.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingField("endpoint"));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "endpoint",
                reason: format!("'{}' must start with http:// or https://", self.endpoint),
            });
        }
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("socket_path"));
        }
        if self.connect_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connect_timeout_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            token: self.token.clone(),
            org_id: self.org_id.clone(),
            tool_name: self.tool_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = ProxyConfig::parse(
            r#"
socket_path = "/tmp/proxy.sock"
endpoint = "https://cache.example.com:443"
token = "secret"
org_id = "org-1"
connect_timeout_seconds = 3
"#,
        )
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/proxy.sock"));
        assert_eq!(config.endpoint, "https://cache.example.com:443");
        assert_eq!(config.tool_name, "xcelerate");
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_applied() {
        let config = ProxyConfig::parse("endpoint = \"http://localhost:6666\"").unwrap();
        assert_eq!(config.socket_path, default_socket_path());
        assert_eq!(config.connect_timeout_seconds, 10);
        assert!(config.token.is_empty());
    }

    #[test]
    fn test_validate_requires_endpoint() {
        let err = ProxyConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("endpoint")));
    }

    #[test]
    fn test_validate_rejects_schemeless_endpoint() {
        let config = ProxyConfig {
            endpoint: "cache.example.com:443".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "endpoint", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ProxyConfig {
            endpoint: "http://localhost:6666".to_string(),
            connect_timeout_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wrong_field_type_is_parse_error() {
        let err = ProxyConfig::parse("connect_timeout_seconds = \"ten\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_credentials_and_debug_redaction() {
        let config = ProxyConfig {
            token: "secret".to_string(),
            org_id: "org-1".to_string(),
            ..Default::default()
        };
        assert_eq!(config.credentials().org_id, "org-1");
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
