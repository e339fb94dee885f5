//! Command line interface of the `alertmanager-operator` binary.
//!
//! The binary runs single reconciliation steps offline: rendering the desired files,
//! validating a config and printing the service command line. All of them take the same
//! [`InputArguments`] a reconciliation pass would see.
use std::path::{Path, PathBuf};

use clap::{Args, Parser};
use snafu::{ResultExt, Snafu};

use crate::{
    options::CharmOptions,
    peers::{PeerAddress, PeerSet},
    reconciler::{ReconcileInputs, TlsMaterial},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read {path:?}"))]
    ReadInput {
        source: std::io::Error,
        path: PathBuf,
    },
}

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(name = "alertmanager-operator", author, version, about)]
pub enum Command {
    /// Render all managed files and print them, or write them below a directory.
    Render(RenderArguments),

    /// Validate an Alertmanager config file.
    Validate(ValidateArguments),

    /// Print the service command line.
    CommandLine(InputArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct RenderArguments {
    /// Write the files below this directory instead of printing them.
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    #[command(flatten)]
    pub inputs: InputArguments,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct ValidateArguments {
    /// The config to validate. Files listed in its `templates` section are inlined, as when
    /// publishing the config to a remote application.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// The inputs of a reconciliation pass, taken from files and flags.
#[derive(Debug, Default, PartialEq, Eq, Args)]
pub struct InputArguments {
    /// Alertmanager config to use instead of the default one.
    #[arg(long, value_name = "FILE", env = "ALERTMANAGER_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Notification templates.
    #[arg(long, value_name = "FILE", env = "ALERTMANAGER_TEMPLATES_FILE")]
    pub templates_file: Option<PathBuf>,

    /// The URL Alertmanager is reachable under from outside.
    #[arg(long, env = "ALERTMANAGER_WEB_EXTERNAL_URL")]
    pub web_external_url: Option<String>,

    /// Fully qualified domain name of the unit.
    #[arg(long, env = "ALERTMANAGER_FQDN", default_value = "localhost")]
    pub fqdn: String,

    /// URL (or address) of a peer replica. May be repeated.
    #[arg(long = "peer", value_name = "URL")]
    pub peers: Vec<String>,

    /// PEM encoded server certificate, enables TLS.
    #[arg(long, value_name = "FILE", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM encoded server private key.
    #[arg(long, value_name = "FILE", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// PEM encoded CA certificate to add to the trust store.
    #[arg(long, value_name = "FILE", requires = "tls_cert")]
    pub tls_ca: Option<PathBuf>,
}

impl InputArguments {
    /// Reads all referenced files.
    pub async fn load(&self) -> Result<ReconcileInputs> {
        let options = CharmOptions {
            config_file: read_opt(self.config_file.as_deref()).await?,
            templates_file: read_opt(self.templates_file.as_deref()).await?,
            web_external_url: self.web_external_url.clone(),
        };

        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsMaterial {
                cert: read(cert).await?,
                key: read(key).await?,
                ca: read_opt(self.tls_ca.as_deref()).await?,
            }),
            _ => None,
        };

        let peers: PeerSet = self
            .peers
            .iter()
            .enumerate()
            .map(|(index, url)| (format!("peer/{index}"), PeerAddress::from_url(url.as_str())))
            .collect();

        Ok(ReconcileInputs {
            options,
            remote: None,
            peers,
            fqdn: self.fqdn.clone(),
            tls,
        })
    }
}

async fn read(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .context(ReadInputSnafu { path })
}

async fn read_opt(path: Option<&Path>) -> Result<Option<String>> {
    match path {
        Some(path) => Ok(Some(read(path).await?)),
        None => Ok(None),
    }
}
