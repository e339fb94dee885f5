//! Operator-facing options and the settings derived from them.
use serde::{Deserialize, Deserializer};
use snafu::{ResultExt, Snafu};
use url::Url;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid external URL {url:?}"))]
    InvalidExternalUrl { source: url::ParseError, url: String },
}

/// Options set by the operator on the deployment. Blank strings count as unset.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CharmOptions {
    /// A complete Alertmanager config (YAML). Must not contain a `templates` section.
    #[serde(deserialize_with = "blank_as_none")]
    pub config_file: Option<String>,

    /// Notification templates, rendered to a separate file.
    #[serde(deserialize_with = "blank_as_none")]
    pub templates_file: Option<String>,

    /// The URL Alertmanager is reachable under from outside, e.g. behind an ingress.
    #[serde(deserialize_with = "blank_as_none")]
    pub web_external_url: Option<String>,
}

impl CharmOptions {
    pub fn config_file(&self) -> Option<&str> {
        non_blank(self.config_file.as_deref())
    }

    pub fn templates_file(&self) -> Option<&str> {
        non_blank(self.templates_file.as_deref())
    }

    pub fn web_external_url(&self) -> Option<&str> {
        non_blank(self.web_external_url.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.trim().is_empty()))
}

/// The URL Alertmanager advertises (`--web.external-url`).
///
/// The `web_external_url` option wins; otherwise the URL is built from the unit's FQDN.
pub fn external_url(options: &CharmOptions, fqdn: &str, api_port: u16, tls: bool) -> Result<Url> {
    let url = match options.web_external_url() {
        Some(url) => url.trim().to_owned(),
        None => {
            let scheme = if tls { "https" } else { "http" };
            format!("{scheme}://{fqdn}:{api_port}")
        }
    };
    Url::parse(&url).context(InvalidExternalUrlSnafu { url })
}

/// The path component of the external URL, which Alertmanager serves all routes under.
pub fn web_route_prefix(external_url: &Url) -> String {
    match external_url.path().trim_end_matches('/') {
        "" => "/".to_owned(),
        path => path.to_owned(),
    }
}
