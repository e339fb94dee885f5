//! Picks the one authoritative config source out of the local options, the remote relation
//! and the compiled-in default.
use alertmanager_config::{RawConfig, raw};
use snafu::{ResultExt, Snafu};
use strum::Display;
use tracing::debug;

use crate::{options::CharmOptions, remote::RemoteConfiguration};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Multiple configs detected"))]
    MultipleConfigs,

    #[snafu(display("the config_file option is not valid YAML"))]
    ParseLocalConfig { source: raw::Error },
}

/// Where the effective config came from.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigSource {
    Default,
    Local,
    Remote,
}

/// The config and templates to build the [`ConfigSuite`](alertmanager_config::ConfigSuite)
/// from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedConfig {
    pub source: ConfigSource,

    /// [`None`] means the default config.
    pub config: Option<RawConfig>,
    pub templates: Option<String>,
}

/// Resolves the config sources. At most one non-default source may be present, both
/// together are an error and never merged.
///
/// Templates follow the config: a remote config brings its own templates, otherwise the
/// `templates_file` option is used.
pub fn resolve(
    options: &CharmOptions,
    remote: Option<&RemoteConfiguration>,
) -> Result<ResolvedConfig> {
    let local = options
        .config_file()
        .map(RawConfig::from_yaml)
        .transpose()
        .context(ParseLocalConfigSnafu)?
        .filter(|config| !config.is_empty());

    let resolved = match (local, remote) {
        (Some(_), Some(_)) => return MultipleConfigsSnafu.fail(),
        (Some(config), None) => ResolvedConfig {
            source: ConfigSource::Local,
            config: Some(config),
            templates: options.templates_file().map(str::to_owned),
        },
        (None, Some(remote)) => ResolvedConfig {
            source: ConfigSource::Remote,
            config: Some(remote.config.clone()),
            templates: remote.joined_templates(),
        },
        (None, None) => ResolvedConfig {
            source: ConfigSource::Default,
            config: None,
            templates: options.templates_file().map(str::to_owned),
        },
    };

    debug!(source = %resolved.source, "resolved config source");
    Ok(resolved)
}
