//! Blocking iControl REST client for BIG-IP devices.
//!
//! Only the endpoints the iApp template workflow needs are covered. Every
//! non-success response is reported as [`BigIpError::UnexpectedHttp`]; there
//! is no retry logic, a failed call fails the whole module run.

use super::provider::BigIpProvider;
use crate::modules::network::bigip_iapp_template::TemplateParameters;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{header, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

/// Collection endpoint for iApp templates
pub const APPLICATION_TEMPLATE_PATH: &str = "/mgmt/tm/sys/application/template";

/// Collection endpoint for deployed application services
pub const APPLICATION_SERVICE_PATH: &str = "/mgmt/tm/sys/application/service";

/// Endpoint that runs commands through the device's bash utility
pub const BASH_PATH: &str = "/mgmt/tm/util/bash";

/// File upload endpoint; files land in `/var/config/rest/downloads/`
pub const UPLOAD_PATH: &str = "/mgmt/shared/file-transfer/uploads";

/// Errors raised while talking to a BIG-IP device
#[derive(Error, Debug)]
pub enum BigIpError {
    /// The device (or the transport to it) did not answer as expected.
    #[error("Unexpected HTTP error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    UnexpectedHttp {
        /// HTTP status, when a response was received at all
        status: Option<u16>,
        /// Device or transport message
        message: String,
    },

    /// A response body could not be decoded.
    #[error("Failed to decode device response: {0}")]
    Decode(String),

    /// The request URL could not be built.
    #[error("Invalid device URL: {0}")]
    InvalidUrl(String),
}

impl BigIpError {
    /// Creates an unexpected HTTP error.
    pub fn unexpected(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::UnexpectedHttp {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedHttp { status, .. } => *status,
            _ => None,
        }
    }
}

/// Result type for device operations
pub type BigIpResult<T> = Result<T, BigIpError>;

/// Device operations used to reconcile iApp templates.
///
/// [`BigIpClient`] implements this over iControl REST; tests substitute a mock.
#[cfg_attr(test, mockall::automock)]
pub trait IappTemplateApi {
    /// Whether `/<partition>/<name>` exists on the device.
    fn template_exists(&self, name: &str, partition: &str) -> BigIpResult<bool>;

    /// Load the template's attributes, including its checksum.
    fn load_template(&self, name: &str, partition: &str) -> BigIpResult<TemplateParameters>;

    /// Clear the stored checksum so the template can be reloaded in place.
    fn clear_template_checksum(&self, name: &str, partition: &str) -> BigIpResult<()>;

    /// Delete the template.
    fn delete_template(&self, name: &str, partition: &str) -> BigIpResult<()>;

    /// Upload a file into the device's REST downloads directory.
    fn upload_file(&self, file_name: &str, content: &[u8]) -> BigIpResult<()>;

    /// Run a command through bash and return its output, if any.
    fn run_bash(&self, command: &str) -> BigIpResult<Option<String>>;

    /// Full template paths referenced by every deployed application service.
    fn application_service_templates(&self) -> BigIpResult<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct DeviceErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApplicationService {
    #[serde(default)]
    template: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BashResult {
    #[serde(default)]
    command_result: Option<String>,
}

/// iControl REST client using HTTP basic auth
pub struct BigIpClient {
    http: Client,
    base_url: String,
    user: String,
    password: String,
}

impl std::fmt::Debug for BigIpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigIpClient")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .finish()
    }
}

impl BigIpClient {
    /// Build a client for the given provider.
    pub fn new(provider: &BigIpProvider) -> BigIpResult<Self> {
        let http = Client::builder()
            .timeout(provider.timeout)
            .danger_accept_invalid_certs(!provider.validate_certs)
            .build()
            .map_err(|e| BigIpError::unexpected(None, format!("Failed to build HTTP client: {}", e)))?;

        let base_url = provider.base_url();
        Url::parse(&base_url).map_err(|e| BigIpError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        Ok(Self {
            http,
            base_url,
            user: provider.user.clone(),
            password: provider.password.clone(),
        })
    }

    /// Base URL requests are issued against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> BigIpResult<Url> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| BigIpError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    fn template_url(&self, name: &str, partition: &str) -> BigIpResult<Url> {
        self.url(&format!(
            "{}/~{}~{}",
            APPLICATION_TEMPLATE_PATH, partition, name
        ))
    }

    fn send(&self, request: RequestBuilder) -> BigIpResult<Response> {
        request
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .map_err(|e| BigIpError::unexpected(e.status().map(|s| s.as_u16()), e.to_string()))
    }

    fn expect_success(response: Response) -> BigIpResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_from_response(response))
        }
    }

    fn error_from_response(response: Response) -> BigIpError {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        let message = serde_json::from_str::<DeviceErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| {
                if body.is_empty() {
                    status.canonical_reason().unwrap_or("Unknown").to_string()
                } else {
                    body
                }
            });
        BigIpError::unexpected(Some(status.as_u16()), message)
    }

    fn decode<T: serde::de::DeserializeOwned>(response: Response) -> BigIpResult<T> {
        let body = response
            .text()
            .map_err(|e| BigIpError::unexpected(None, format!("Failed to read response body: {}", e)))?;
        serde_json::from_str(&body).map_err(|e| BigIpError::Decode(e.to_string()))
    }
}

impl IappTemplateApi for BigIpClient {
    fn template_exists(&self, name: &str, partition: &str) -> BigIpResult<bool> {
        let url = self.template_url(name, partition)?;
        debug!(%url, "Checking whether iApp template exists");
        let response = self.send(self.http.get(url))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(Self::error_from_response(response)),
        }
    }

    fn load_template(&self, name: &str, partition: &str) -> BigIpResult<TemplateParameters> {
        let url = self.template_url(name, partition)?;
        debug!(%url, "Loading iApp template");
        let response = Self::expect_success(self.send(self.http.get(url))?)?;
        Self::decode(response)
    }

    fn clear_template_checksum(&self, name: &str, partition: &str) -> BigIpResult<()> {
        let url = self.template_url(name, partition)?;
        debug!(%url, "Clearing iApp template checksum");
        let body = serde_json::json!({ "tmplChecksum": serde_json::Value::Null });
        Self::expect_success(self.send(self.http.patch(url).json(&body))?)?;
        Ok(())
    }

    fn delete_template(&self, name: &str, partition: &str) -> BigIpResult<()> {
        let url = self.template_url(name, partition)?;
        debug!(%url, "Deleting iApp template");
        Self::expect_success(self.send(self.http.delete(url))?)?;
        Ok(())
    }

    fn upload_file(&self, file_name: &str, content: &[u8]) -> BigIpResult<()> {
        let url = self.url(&format!("{}/{}", UPLOAD_PATH, file_name))?;
        let size = content.len();
        let content_range = format!("0-{}/{}", size.saturating_sub(1), size);
        debug!(%url, size, "Uploading file to device");
        let request = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_RANGE, content_range)
            .body(content.to_vec());
        Self::expect_success(self.send(request)?)?;
        Ok(())
    }

    fn run_bash(&self, command: &str) -> BigIpResult<Option<String>> {
        let url = self.url(BASH_PATH)?;
        debug!(command, "Running bash command on device");
        let body = serde_json::json!({
            "command": "run",
            "utilCmdArgs": format!("-c \"{}\"", command),
        });
        let response = Self::expect_success(self.send(self.http.post(url).json(&body))?)?;
        let result: BashResult = Self::decode(response)?;
        trace!(output = ?result.command_result, "Bash command finished");
        Ok(result.command_result)
    }

    fn application_service_templates(&self) -> BigIpResult<Vec<String>> {
        let url = self.url(APPLICATION_SERVICE_PATH)?;
        debug!(%url, "Listing application services");
        let response = Self::expect_success(self.send(self.http.get(url))?)?;
        let services: Collection<ApplicationService> = Self::decode(response)?;
        Ok(services
            .items
            .into_iter()
            .filter_map(|service| service.template)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider(server: &str) -> BigIpProvider {
        BigIpProvider {
            server: server.to_string(),
            server_port: 443,
            user: "admin".to_string(),
            password: "secret".to_string(),
            validate_certs: true,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_template_url_encodes_partition_and_name() {
        let client = BigIpClient::new(&provider("localhost")).unwrap();
        let url = client.template_url("foo.iapp", "Common").unwrap();
        assert_eq!(
            url.as_str(),
            "https://localhost/mgmt/tm/sys/application/template/~Common~foo.iapp"
        );
        assert_eq!(client.base_url(), "https://localhost:443");
    }

    #[test]
    fn test_unexpected_http_display() {
        let err = BigIpError::unexpected(Some(401), "Authentication failed");
        assert_eq!(err.status(), Some(401));
        assert_eq!(
            err.to_string(),
            "Unexpected HTTP error (401): Authentication failed"
        );

        let err = BigIpError::unexpected(None, "connection refused");
        assert_eq!(err.status(), None);
        assert_eq!(err.to_string(), "Unexpected HTTP error: connection refused");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = BigIpClient::new(&provider("http://"));
        assert!(matches!(result, Err(BigIpError::InvalidUrl(_))));
    }
}
