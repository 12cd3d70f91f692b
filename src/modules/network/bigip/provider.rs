//! Connection parameters for a BIG-IP device.
//!
//! Values come from module parameters first, then from the configured
//! defaults (which already include the `F5_*` environment overrides).

use crate::config::BigIpDefaults;
use crate::modules::{ModuleError, ModuleParams, ModuleResult, ParamExt};
use std::fmt;
use std::time::Duration;

/// Default iControl REST port
pub const DEFAULT_SERVER_PORT: u16 = 443;

/// Where and how to reach a BIG-IP management interface.
#[derive(Clone, PartialEq, Eq)]
pub struct BigIpProvider {
    /// Hostname or address. A value that already carries a scheme
    /// (`https://lb:8443`) is used verbatim as the base URL.
    pub server: String,
    /// Management port
    pub server_port: u16,
    /// Username for basic auth
    pub user: String,
    /// Password for basic auth
    pub password: String,
    /// Whether to verify the device's TLS certificate
    pub validate_certs: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl fmt::Debug for BigIpProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigIpProvider")
            .field("server", &self.server)
            .field("server_port", &self.server_port)
            .field("user", &self.user)
            .field("password", &"********")
            .field("validate_certs", &self.validate_certs)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BigIpProvider {
    /// Resolve the provider from module parameters, falling back to defaults.
    pub fn from_params(params: &ModuleParams, defaults: &BigIpDefaults) -> ModuleResult<Self> {
        let server = params
            .get_string("server")?
            .or_else(|| defaults.server.clone())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ModuleError::MissingParameter("server".to_string()))?;
        let user = params
            .get_string("user")?
            .or_else(|| defaults.user.clone())
            .ok_or_else(|| ModuleError::MissingParameter("user".to_string()))?;
        let password = params
            .get_string("password")?
            .or_else(|| defaults.password.clone())
            .ok_or_else(|| ModuleError::MissingParameter("password".to_string()))?;

        let server_port = params
            .get_u16("server_port")?
            .unwrap_or(defaults.server_port);
        if server_port == 0 {
            return Err(ModuleError::InvalidParameter(
                "server_port must be between 1 and 65535".to_string(),
            ));
        }

        let validate_certs = params
            .get_bool("validate_certs")?
            .unwrap_or(defaults.validate_certs);

        Ok(Self {
            server: server.trim().to_string(),
            server_port,
            user,
            password,
            validate_certs,
            timeout: Duration::from_secs(defaults.timeout),
        })
    }

    /// Base URL of the management interface, without a trailing slash.
    pub fn base_url(&self) -> String {
        if self.server.contains("://") {
            self.server.trim_end_matches('/').to_string()
        } else {
            format!("https://{}:{}", self.server, self.server_port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn params(entries: Vec<(&str, serde_json::Value)>) -> ModuleParams {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_provider_from_params() {
        let p = params(vec![
            ("server", serde_json::json!("localhost")),
            ("user", serde_json::json!("admin")),
            ("password", serde_json::json!("passsword")),
        ]);
        let provider = BigIpProvider::from_params(&p, &BigIpDefaults::default()).unwrap();

        assert_eq!(provider.server, "localhost");
        assert_eq!(provider.server_port, DEFAULT_SERVER_PORT);
        assert!(provider.validate_certs);
        assert_eq!(provider.base_url(), "https://localhost:443");
    }

    #[test]
    fn test_provider_falls_back_to_defaults() {
        let defaults = BigIpDefaults {
            server: Some("lb.example.com".to_string()),
            user: Some("admin".to_string()),
            password: Some("secret".to_string()),
            server_port: 8443,
            validate_certs: false,
            ..BigIpDefaults::default()
        };
        let provider = BigIpProvider::from_params(&HashMap::new(), &defaults).unwrap();

        assert_eq!(provider.base_url(), "https://lb.example.com:8443");
        assert!(!provider.validate_certs);
    }

    #[test]
    fn test_params_override_defaults() {
        let defaults = BigIpDefaults {
            server: Some("lb.example.com".to_string()),
            user: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..BigIpDefaults::default()
        };
        let p = params(vec![
            ("server", serde_json::json!("other.example.com")),
            ("server_port", serde_json::json!("10443")),
            ("validate_certs", serde_json::json!("no")),
        ]);
        let provider = BigIpProvider::from_params(&p, &defaults).unwrap();

        assert_eq!(provider.base_url(), "https://other.example.com:10443");
        assert!(!provider.validate_certs);
        assert_eq!(provider.user, "admin");
    }

    #[test]
    fn test_missing_server_is_an_error() {
        let p = params(vec![
            ("user", serde_json::json!("admin")),
            ("password", serde_json::json!("secret")),
        ]);
        let err = BigIpProvider::from_params(&p, &BigIpDefaults::default()).unwrap_err();
        assert!(matches!(err, ModuleError::MissingParameter(ref s) if s == "server"));
    }

    #[test]
    fn test_server_with_scheme_is_used_verbatim() {
        let p = params(vec![
            ("server", serde_json::json!("http://127.0.0.1:9000/")),
            ("user", serde_json::json!("admin")),
            ("password", serde_json::json!("secret")),
        ]);
        let provider = BigIpProvider::from_params(&p, &BigIpDefaults::default()).unwrap();
        assert_eq!(provider.base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_debug_redacts_password() {
        let p = params(vec![
            ("server", serde_json::json!("localhost")),
            ("user", serde_json::json!("admin")),
            ("password", serde_json::json!("hunter2")),
        ]);
        let provider = BigIpProvider::from_params(&p, &BigIpDefaults::default()).unwrap();
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("hunter2"));
    }
}
