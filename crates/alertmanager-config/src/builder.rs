//! Renders the full set of configuration artifacts for one reconciliation pass.
//!
//! [`ConfigBuilder`] is not a _pure_ builder: on top of collecting inputs it injects the
//! charm-managed template file reference and the deployment topology labels into the routing
//! tree, and derives the amtool and web (TLS) configs from ports and paths.
use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tracing::error;

use crate::{RawConfig, raw::type_name, yaml};

/// Labels describing the deployment identity. They are always part of `route.group_by`.
pub const TOPOLOGY_LABELS: [&str; 3] = ["juju_application", "juju_model", "juju_model_uuid"];

pub const DEFAULT_API_PORT: u16 = 9093;
pub const DEFAULT_TEMPLATES_PATH: &str = "/etc/alertmanager/templates.tmpl";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "templates section must be supplied separately, use the templates option instead"
    ))]
    InlineTemplates,

    #[snafu(display("must provide both cert and key files, only the {provided} was given"))]
    IncompleteTlsServerConfig { provided: &'static str },

    #[snafu(display("route must be a mapping, found {found}"))]
    InvalidRoute { found: &'static str },

    #[snafu(display("route.group_by must be a list of label names"))]
    InvalidGroupBy,

    #[snafu(display("failed to render the {artifact} config"))]
    Render {
        source: yaml::Error,
        artifact: &'static str,
    },
}

/// All configuration files managed for the workload, and their contents.
///
/// Two suites built from identical inputs are byte-identical.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ConfigSuite {
    /// The main `alertmanager.yml`.
    pub alertmanager: String,

    /// The exporter-toolkit web config, only present when TLS is enabled.
    pub web: Option<String>,

    /// Notification templates, only present when templates were supplied.
    pub templates: Option<String>,

    /// Helper config pointing amtool at the local server.
    pub amtool: String,
}

#[derive(Serialize)]
struct WebConfig<'a> {
    tls_server_config: TlsServerConfig<'a>,
}

#[derive(Serialize)]
struct TlsServerConfig<'a> {
    cert_file: &'a str,
    key_file: &'a str,
}

#[derive(Serialize)]
struct AmtoolConfig {
    #[serde(rename = "alertmanager.url")]
    alertmanager_url: String,
}

/// Builds a [`ConfigSuite`].
///
/// Starts out with the compiled-in [default config](RawConfig::default_config), no templates
/// and TLS disabled.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    api_port: u16,
    web_route_prefix: String,
    config: RawConfig,
    templates: Option<String>,
    templates_path: String,
    cert_file: Option<String>,
    key_file: Option<String>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            api_port: DEFAULT_API_PORT,
            web_route_prefix: "/".to_owned(),
            config: RawConfig::default_config(),
            templates: None,
            templates_path: DEFAULT_TEMPLATES_PATH.to_owned(),
            cert_file: None,
            key_file: None,
        }
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_port(&mut self, api_port: u16) -> &mut Self {
        self.api_port = api_port;
        self
    }

    /// Sets the route prefix the web server is exposed under.
    ///
    /// The prefix is normalized to have a leading `/` and no trailing `/`.
    pub fn web_route_prefix(&mut self, web_route_prefix: &str) -> &mut Self {
        self.web_route_prefix = format!("/{}", web_route_prefix.trim_matches('/'));
        self
    }

    /// Replaces the main config. [`None`] keeps whatever was set before (initially the default).
    pub fn config_opt(&mut self, config: Option<RawConfig>) -> &mut Self {
        if let Some(config) = config {
            self.config = config;
        }
        self
    }

    pub fn config(&mut self, config: RawConfig) -> &mut Self {
        self.config_opt(Some(config))
    }

    pub fn templates_opt(&mut self, templates: Option<String>) -> &mut Self {
        if templates.is_some() {
            self.templates = templates;
        }
        self
    }

    pub fn templates(&mut self, templates: impl Into<String>) -> &mut Self {
        self.templates_opt(Some(templates.into()))
    }

    /// Overrides the path the templates file is referenced under in the main config.
    pub fn templates_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.templates_path = path.into();
        self
    }

    /// Sets the server certificate and key paths. Both or neither must be given by the time
    /// [`Self::build`] is called.
    pub fn tls_server_config(
        &mut self,
        cert_file: Option<String>,
        key_file: Option<String>,
    ) -> &mut Self {
        self.cert_file = cert_file;
        self.key_file = key_file;
        self
    }

    pub fn build(&self) -> Result<ConfigSuite> {
        Ok(ConfigSuite {
            alertmanager: self.render_alertmanager_config()?,
            web: self.render_web_config()?,
            templates: self.templates.clone(),
            amtool: self.render_amtool_config()?,
        })
    }

    fn render_alertmanager_config(&self) -> Result<String> {
        let mut config = self.config.clone();

        if config.has_inline_templates() {
            error!(
                "alertmanager config file must not have a 'templates' section; use the 'templates' option instead"
            );
            return InlineTemplatesSnafu.fail();
        }
        // Drop the empty placeholder Alertmanager writes back on its own.
        config.remove("templates");

        if self.templates.is_some() {
            config.insert(
                "templates",
                Value::Array(vec![Value::String(self.templates_path.clone())]),
            );
        }

        add_topology_to_group_by(&mut config)?;

        yaml::to_string(&config).context(RenderSnafu {
            artifact: "alertmanager",
        })
    }

    fn render_web_config(&self) -> Result<Option<String>> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert_file), Some(key_file)) => {
                // https://prometheus.io/docs/prometheus/latest/configuration/https/
                let web_config = WebConfig {
                    tls_server_config: TlsServerConfig {
                        cert_file,
                        key_file,
                    },
                };
                yaml::to_string(&web_config)
                    .map(Some)
                    .context(RenderSnafu { artifact: "web" })
            }
            (Some(_), None) => IncompleteTlsServerConfigSnafu {
                provided: "cert file",
            }
            .fail(),
            (None, Some(_)) => IncompleteTlsServerConfigSnafu {
                provided: "key file",
            }
            .fail(),
            (None, None) => Ok(None),
        }
    }

    fn render_amtool_config(&self) -> Result<String> {
        // amtool always runs in the same container as alertmanager, so localhost is reachable.
        let scheme = if self.cert_file.is_some() && self.key_file.is_some() {
            "https"
        } else {
            "http"
        };
        let url = format!(
            "{scheme}://localhost:{port}{prefix}",
            port = self.api_port,
            prefix = self.web_route_prefix
        );
        let amtool_config = AmtoolConfig {
            alertmanager_url: format!("{}/", url.trim_end_matches('/')),
        };

        yaml::to_string(&amtool_config).context(RenderSnafu { artifact: "amtool" })
    }
}

/// Extends `route.group_by` with the [`TOPOLOGY_LABELS`].
///
/// This is a set union: user supplied labels are kept, nothing is duplicated and the result is
/// sorted so the rendered config does not depend on input order.
fn add_topology_to_group_by(config: &mut RawConfig) -> Result<()> {
    let route = config
        .get_mut("route")
        .map(std::mem::take)
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    let mut route = match route {
        Value::Object(route) => route,
        // A missing route only happens for configs that never pass validation, keep going so
        // the validator gets to report it.
        Value::Null => serde_json::Map::new(),
        other => {
            return InvalidRouteSnafu {
                found: type_name(&other),
            }
            .fail();
        }
    };

    let mut group_by = BTreeSet::new();
    match route.remove("group_by") {
        None | Some(Value::Null) => {}
        Some(Value::Array(labels)) => {
            for label in labels {
                let Value::String(label) = label else {
                    return InvalidGroupBySnafu.fail();
                };
                group_by.insert(label);
            }
        }
        Some(_) => return InvalidGroupBySnafu.fail(),
    }
    group_by.extend(TOPOLOGY_LABELS.iter().map(|label| (*label).to_owned()));

    route.insert(
        "group_by".to_owned(),
        Value::Array(group_by.into_iter().map(Value::String).collect()),
    );
    config.insert("route", Value::Object(route));
    Ok(())
}
