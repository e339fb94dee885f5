//! The single reconciliation entrypoint.
//!
//! Every trigger (option change, peer join or departure, remote configuration change,
//! certificate rotation, periodic tick) ends up in [`Reconciler::reconcile`]. A pass gathers
//! all inputs, recomputes the complete desired state, diffs it against what was applied last
//! time and only then touches the workload. Calling it repeatedly with the same inputs is a
//! no-op after the first call.
use alertmanager_config::{ConfigBuilder, ConfigSuite, RawConfig, builder, validation};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, error, info, warn};

use crate::{
    client::{AlertmanagerApi, ClientOptions},
    constants::{
        AMTOOL_CONFIG_PATH, API_PORT, CA_CERT_PATH, CONFIG_PATH, HA_PORT, KEY_PATH,
        SERVER_CERT_PATH, TEMPLATES_PATH, WEB_CONFIG_PATH,
    },
    container::Container,
    manifest::{self, FileSystemManifest},
    options::{self, CharmOptions},
    peers::PeerSet,
    remote::RemoteConfiguration,
    sources::{self, ConfigSource},
    state::ReconcilerState,
    status::{Status, StatusError, error_message},
    workload::{self, ConfigUpdate, WorkloadManager, WorkloadSettings, WorkloadState},
};

pub const WAITING_FOR_CONTAINER: &str = "Waiting for pod startup to complete";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to resolve the config source"))]
    ResolveSources { source: sources::Error },

    #[snafu(display("failed to determine the external URL"))]
    ExternalUrl { source: options::Error },

    #[snafu(display("failed to build the config"))]
    BuildConfig { source: builder::Error },

    #[snafu(display("invalid config"))]
    InvalidConfig { source: validation::Errors },

    #[snafu(display("failed to update the service layer"))]
    UpdateLayer { source: workload::Error },

    #[snafu(display("failed to push updated config/templates"))]
    ApplyManifest { source: manifest::Error },

    #[snafu(display("config file rejected by amtool"))]
    CheckConfig { source: workload::Error },

    #[snafu(display("failed to observe the workload"))]
    ObserveWorkload { source: workload::Error },

    #[snafu(display("failed to start the workload"))]
    StartService { source: workload::Error },

    #[snafu(display("failed to restart the workload to join its peers"))]
    RestartService { source: workload::Error },

    #[snafu(display("failed to update the running config"))]
    UpdateConfig { source: workload::Error },
}

impl Error {
    fn workload_error(&self) -> Option<&workload::Error> {
        match self {
            Self::UpdateLayer { source }
            | Self::CheckConfig { source }
            | Self::ObserveWorkload { source }
            | Self::StartService { source }
            | Self::RestartService { source }
            | Self::UpdateConfig { source } => Some(source),
            _ => None,
        }
    }
}

impl StatusError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn status(&self) -> Status {
        if let Some(workload::Error::ContainerNotReady { .. }) = self.workload_error() {
            return Status::Waiting(WAITING_FOR_CONTAINER.to_owned());
        }

        match self {
            Self::ResolveSources {
                source: source @ sources::Error::MultipleConfigs,
            } => Status::Blocked(source.to_string()),
            _ => Status::Blocked(error_message(self)),
        }
    }
}

/// TLS material for the web server, as PEM documents.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlsMaterial {
    pub cert: String,
    pub key: String,
    pub ca: Option<String>,
}

/// Everything a pass reads. None of it changes during a pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcileInputs {
    pub options: CharmOptions,

    /// Already validated remote configuration, see
    /// [`RemoteConfigurationConsumer::read`](crate::remote::RemoteConfigurationConsumer::read).
    pub remote: Option<RemoteConfiguration>,
    pub peers: PeerSet,

    /// The unit's fully qualified domain name.
    pub fqdn: String,
    pub tls: Option<TlsMaterial>,
}

impl ReconcileInputs {
    pub fn new(fqdn: impl Into<String>) -> Self {
        Self {
            fqdn: fqdn.into(),
            ..Self::default()
        }
    }

    /// How to reach the local control API with these inputs.
    pub fn client_options(&self) -> Result<ClientOptions> {
        let external_url = self.external_url()?;
        Ok(ClientOptions {
            web_route_prefix: options::web_route_prefix(&external_url),
            https: self.tls.is_some(),
            ca_cert: self.tls.as_ref().and_then(|tls| tls.ca.clone()),
            ..ClientOptions::default()
        })
    }

    fn external_url(&self) -> Result<url::Url> {
        options::external_url(&self.options, &self.fqdn, API_PORT, self.tls.is_some())
            .context(ExternalUrlSnafu)
    }
}

/// The complete desired state, recomputed from scratch on every pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DesiredState {
    pub source: ConfigSource,
    pub suite: ConfigSuite,
    pub manifest: FileSystemManifest,
    pub settings: WorkloadSettings,
    pub peer_addresses: Vec<String>,
}

impl DesiredState {
    /// Resolves, builds and validates. Nothing is applied if this fails.
    pub fn compute(inputs: &ReconcileInputs) -> Result<Self> {
        let resolved =
            sources::resolve(&inputs.options, inputs.remote.as_ref()).context(ResolveSourcesSnafu)?;
        let external_url = inputs.external_url()?;
        let tls_enabled = inputs.tls.is_some();

        let config = resolved.config.unwrap_or_else(RawConfig::default_config);
        let mut builder = ConfigBuilder::new();
        builder
            .api_port(API_PORT)
            .web_route_prefix(&options::web_route_prefix(&external_url))
            .config(config.clone())
            .templates_opt(resolved.templates)
            .templates_path(TEMPLATES_PATH);
        if tls_enabled {
            builder.tls_server_config(
                Some(SERVER_CERT_PATH.to_owned()),
                Some(KEY_PATH.to_owned()),
            );
        }
        let suite = builder.build().context(BuildConfigSnafu)?;
        validation::validate(&config).context(InvalidConfigSnafu)?;

        Ok(Self {
            source: resolved.source,
            manifest: manifest_for(&suite, inputs.tls.as_ref()),
            suite,
            settings: WorkloadSettings {
                external_url: external_url.to_string(),
                tls_enabled,
                ..WorkloadSettings::default()
            },
            peer_addresses: inputs.peers.cluster_addresses(HA_PORT),
        })
    }
}

/// Every managed path, with tombstones for artifacts the current inputs do not produce.
fn manifest_for(suite: &ConfigSuite, tls: Option<&TlsMaterial>) -> FileSystemManifest {
    let mut manifest = FileSystemManifest::new();
    manifest
        .add_file(CONFIG_PATH, suite.alertmanager.clone())
        .add_file(AMTOOL_CONFIG_PATH, suite.amtool.clone())
        .file_opt(WEB_CONFIG_PATH, suite.web.clone())
        .file_opt(TEMPLATES_PATH, suite.templates.clone())
        .file_opt(SERVER_CERT_PATH, tls.map(|tls| tls.cert.clone()))
        .file_opt(KEY_PATH, tls.map(|tls| tls.key.clone()))
        .file_opt(CA_CERT_PATH, tls.and_then(|tls| tls.ca.clone()));
    manifest
}

/// What a pass did to the Alertmanager service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceAction {
    None,
    /// The service was not running and has been started.
    Started,
    /// Restarted to pick up a changed peer set.
    Restarted,
    /// A changed config was handed to the running service.
    ConfigUpdated(ConfigUpdate),
}

/// What a pass did, and the state to hand to the next one.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileOutcome {
    pub status: Status,
    pub state: ReconcilerState,
    pub source: Option<ConfigSource>,
    pub workload_state: WorkloadState,
    pub layer_updated: bool,
    pub config_written: bool,
    pub service_action: ServiceAction,
    pub workload_version: Option<String>,
}

impl ReconcileOutcome {
    fn new(state: &ReconcilerState) -> Self {
        Self {
            status: Status::Active,
            state: state.clone(),
            source: None,
            workload_state: WorkloadState::NotReady,
            layer_updated: false,
            config_written: false,
            service_action: ServiceAction::None,
            workload_version: None,
        }
    }
}

pub struct Reconciler<'a> {
    container: &'a dyn Container,
    api: &'a dyn AlertmanagerApi,
}

impl<'a> Reconciler<'a> {
    pub fn new(container: &'a dyn Container, api: &'a dyn AlertmanagerApi) -> Self {
        Self { container, api }
    }

    /// Runs one pass. Errors never escape: they are logged and turned into the status of
    /// the returned outcome.
    #[tracing::instrument(skip_all, fields(fqdn = %inputs.fqdn))]
    pub async fn reconcile(
        &self,
        inputs: &ReconcileInputs,
        state: &ReconcilerState,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::new(state);

        if !self.container.can_connect().await {
            info!("workload container is not reachable yet");
            outcome.status = Status::Waiting(WAITING_FOR_CONTAINER.to_owned());
            return outcome;
        }

        match self.run(inputs, &mut outcome).await {
            Ok(()) => outcome.status = Status::Active,
            Err(err) => {
                let status = err.status();
                if status.is_blocked() {
                    error!(
                        category = err.category(),
                        error = &err as &dyn std::error::Error,
                        "reconciliation failed"
                    );
                    outcome.workload_state = WorkloadState::Blocked;
                } else {
                    info!(
                        category = err.category(),
                        error = &err as &dyn std::error::Error,
                        "reconciliation postponed"
                    );
                }
                outcome.status = status;
            }
        }
        outcome
    }

    async fn run(&self, inputs: &ReconcileInputs, outcome: &mut ReconcileOutcome) -> Result<()> {
        let desired = DesiredState::compute(inputs)?;
        outcome.source = Some(desired.source);
        let has_peers = !desired.peer_addresses.is_empty();

        let manager = WorkloadManager::new(self.container, self.api, desired.settings.clone());
        outcome.layer_updated = manager
            .update_layer(&desired.peer_addresses)
            .await
            .context(UpdateLayerSnafu)?;

        // A write that fails halfway leaves the files in an unknown state, so the hash only
        // comes back once the manifest is known to be on disk and accepted.
        let last_applied = outcome.state.config_hash.take();
        let applied_hash = desired
            .manifest
            .apply_if_changed(self.container, last_applied.as_deref())
            .await
            .context(ApplyManifestSnafu)?;
        let config_changed = applied_hash.is_some();
        if config_changed {
            outcome.config_written = true;

            if inputs.tls.as_ref().is_some_and(|tls| tls.ca.is_some()) {
                self.refresh_trust_store().await;
            }
            manager.check_config().await.context(CheckConfigSnafu)?;
        } else {
            outcome.state.config_hash = last_applied;
        }

        let workload_state = manager.observe().await.context(ObserveWorkloadSnafu)?;
        if workload_state != WorkloadState::Running {
            manager.start_service().await.context(StartServiceSnafu)?;
            outcome.service_action = ServiceAction::Started;
            outcome.state.launched_with_peers = has_peers;
        } else if has_peers && !outcome.state.launched_with_peers {
            // The command line only takes effect on a restart, and peers must be joined.
            manager.restart_service().await.context(RestartServiceSnafu)?;
            outcome.service_action = ServiceAction::Restarted;
            outcome.state.launched_with_peers = true;
        } else if config_changed {
            let update = manager
                .reload_with_fallback()
                .await
                .context(UpdateConfigSnafu)?;
            outcome.service_action = ServiceAction::ConfigUpdated(update);
        }

        if let Some(hash) = applied_hash {
            outcome.state.config_hash = Some(hash);
        }
        outcome.state.peer_addresses = desired.peer_addresses;
        outcome.workload_state = manager.observe().await.context(ObserveWorkloadSnafu)?;

        outcome.workload_version = match manager.version().await {
            Ok(version) => version,
            Err(err) => {
                debug!(
                    error = &err as &dyn std::error::Error,
                    "failed to query the workload version"
                );
                None
            }
        };
        if outcome.workload_version.is_none() {
            debug!("cannot set workload version at this time: could not get Alertmanager version");
        }

        Ok(())
    }

    async fn refresh_trust_store(&self) {
        match self
            .container
            .exec(&["update-ca-certificates", "--fresh"])
            .await
        {
            Ok(output) if output.success() => debug!("refreshed the trust store"),
            Ok(output) => warn!(
                exit_code = output.exit_code,
                stderr = output.stderr,
                "failed to refresh the trust store"
            ),
            Err(err) => warn!(
                error = &err as &dyn std::error::Error,
                "failed to refresh the trust store"
            ),
        }
    }
}
