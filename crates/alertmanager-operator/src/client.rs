//! Client for Alertmanager's HTTP control API.
//!
//! Any failure (connection error, timeout, non-200 status, malformed body) is reported through
//! the same [`Error`] type. Callers treat all of them as "operation failed" and only log the
//! specific cause.
use std::time::Duration;

use alertmanager_config::{RawConfig, raw};
use async_trait::async_trait;
use reqwest::{Certificate, Method, StatusCode};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};
use url::Url;

use crate::constants::API_PORT;

pub type Result<T, E = Error> = std::result::Result<T, E>;

const ATTEMPTS: usize = 3;
const RETRY_PAUSE: Duration = Duration::from_millis(200);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to construct the Alertmanager base URL"))]
    InvalidBaseUrl { source: url::ParseError },

    #[snafu(display("failed to parse the CA certificate"))]
    ParseCaCertificate { source: reqwest::Error },

    #[snafu(display("failed to build the HTTP client"))]
    BuildClient { source: reqwest::Error },

    #[snafu(display("request to {url} failed"))]
    Request { source: reqwest::Error, url: String },

    #[snafu(display("request to {url} returned status {status}"))]
    UnexpectedStatus { url: String, status: u16 },

    #[snafu(display("response from {url} is not a valid status document"))]
    DecodeStatus {
        source: serde_json::Error,
        url: String,
    },

    #[snafu(display("the reported config is not valid YAML"))]
    ParseReportedConfig { source: raw::Error },
}

/// The subset of `GET /api/v2/status` the operator uses.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerStatus {
    #[serde(default)]
    pub cluster: ClusterStatus,
    #[serde(default)]
    pub config: ConfigStatus,
    #[serde(default)]
    pub version_info: VersionInfo,
    pub uptime: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ClusterStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub peers: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ConfigStatus {
    /// The config as loaded by the server, including all defaults it filled in.
    #[serde(default)]
    pub original: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub build_date: String,
    #[serde(default)]
    pub go_version: String,
}

#[async_trait]
pub trait AlertmanagerApi: Send + Sync {
    /// Asks the server to re-read its config files without restarting.
    async fn reload(&self) -> Result<()>;

    async fn status(&self) -> Result<AlertmanagerStatus>;

    async fn version(&self) -> Result<String> {
        Ok(self.status().await?.version_info.version)
    }

    /// The config the server is currently running with.
    async fn config(&self) -> Result<RawConfig> {
        let status = self.status().await?;
        RawConfig::from_yaml(&status.config.original).context(ParseReportedConfigSnafu)
    }
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub web_route_prefix: String,
    pub timeout: Duration,
    pub https: bool,
    /// PEM encoded CA certificate to trust in addition to the system roots.
    pub ca_cert: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: API_PORT,
            web_route_prefix: String::new(),
            timeout: DEFAULT_TIMEOUT,
            https: false,
            ca_cert: None,
        }
    }
}

/// [`AlertmanagerApi`] over HTTP(S).
#[derive(Clone, Debug)]
pub struct AlertmanagerClient {
    http: reqwest::Client,
    base_url: Url,
}

impl AlertmanagerClient {
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let scheme = if options.https {
            "https"
        } else {
            "http"
        };
        let base_url = base_url(scheme, &options.host, options.port, &options.web_route_prefix)?;

        let mut builder = reqwest::Client::builder().timeout(options.timeout);
        if let Some(ca_cert) = &options.ca_cert {
            let certificate =
                Certificate::from_pem(ca_cert.as_bytes()).context(ParseCaCertificateSnafu)?;
            builder = builder.add_root_certificate(certificate);
        }
        let http = builder.build().context(BuildClientSnafu)?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sends the request up to [`ATTEMPTS`] times and returns the body of the first `200 OK`.
    async fn send(&self, method: Method, path: &str) -> Result<Vec<u8>> {
        let url = self.base_url.join(path).context(InvalidBaseUrlSnafu)?;

        let mut attempt = 1;
        loop {
            match self.send_once(method.clone(), &url).await {
                Ok(body) => return Ok(body),
                Err(error) if attempt >= ATTEMPTS => return Err(error),
                Err(error) => {
                    debug!(
                        %url,
                        attempt,
                        error = &error as &dyn std::error::Error,
                        "request failed, retrying"
                    );
                }
            }
            attempt += 1;
            tokio::time::sleep(RETRY_PAUSE).await;
        }
    }

    async fn send_once(&self, method: Method, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .http
            .request(method, url.clone())
            .send()
            .await
            .context(RequestSnafu { url: url.as_str() })?;

        let status = response.status();
        if status != StatusCode::OK {
            return UnexpectedStatusSnafu {
                url: url.as_str(),
                status: status.as_u16(),
            }
            .fail();
        }

        let body = response
            .bytes()
            .await
            .context(RequestSnafu { url: url.as_str() })?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl AlertmanagerApi for AlertmanagerClient {
    async fn reload(&self) -> Result<()> {
        let body = self.send(Method::POST, "-/reload").await?;
        if !body.is_empty() {
            warn!(
                response = %String::from_utf8_lossy(&body),
                "reload returned a non-empty response"
            );
        }
        Ok(())
    }

    async fn status(&self) -> Result<AlertmanagerStatus> {
        let body = self.send(Method::GET, "api/v2/status").await?;
        serde_json::from_slice(&body).context(DecodeStatusSnafu {
            url: self.base_url.as_str(),
        })
    }
}

/// `<scheme>://<host>:<port>/<prefix>/`, the trailing slash makes relative joins keep the prefix.
fn base_url(scheme: &str, host: &str, port: u16, web_route_prefix: &str) -> Result<Url> {
    let prefix = web_route_prefix.trim_matches('/');
    let url = if prefix.is_empty() {
        format!("{scheme}://{host}:{port}/")
    } else {
        format!("{scheme}://{host}:{port}/{prefix}/")
    };
    Url::parse(&url).context(InvalidBaseUrlSnafu)
}
