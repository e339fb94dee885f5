//! Manages the Alertmanager process: its supervisor layer, config checks, reloads and restarts.
//!
//! The process moves through `NotReady → LayerAbsent → Running`, and on a config change
//! through `Reloading → Running`, falling back to `Restarting → Running`. When both reload
//! and restart fail the manager reports [`Error::ConfigUpdateFailure`], which ends up as a
//! blocked status. Nothing here retries on its own.
use std::sync::LazyLock;

use regex::Regex;
use snafu::{ResultExt, Snafu};
use strum::Display;
use tracing::{debug, info, warn};

use crate::{
    client::{self, AlertmanagerApi},
    constants::{
        AMTOOL_PATH, API_PORT, CONFIG_PATH, EXE_NAME, HA_PORT, LAYER_NAME, SERVICE_NAME,
        STORAGE_PATH, WEB_CONFIG_PATH,
    },
    container::{self, Container, Layer, Override, Service, Startup},
};

static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"version (\d*\.\d*\.\d*)").expect("failed to compile version regex")
});

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("cannot {operation}: the workload container is not ready"))]
    ContainerNotReady { operation: &'static str },

    #[snafu(display("failed to read the supervisor plan"))]
    GetPlan { source: container::Error },

    #[snafu(display("failed to install the alertmanager layer"))]
    AddLayer { source: container::Error },

    #[snafu(display("failed to start the alertmanager service"))]
    Replan { source: container::Error },

    #[snafu(display("cannot restart: the alertmanager service does not exist yet"))]
    ServiceMissing,

    #[snafu(display("failed to restart the alertmanager service"))]
    Restart { source: container::Error },

    #[snafu(display("failed to query whether the alertmanager service is running"))]
    QueryService { source: container::Error },

    #[snafu(display("failed to run {command:?}"))]
    Exec {
        source: container::Error,
        command: String,
    },

    #[snafu(display("config check failed with exit code {exit_code}: {stderr}"))]
    ConfigCheckFailed {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },

    #[snafu(display("hot reload ({reload}) and service restart both failed, is the config valid?"))]
    ConfigUpdateFailure {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        reload: client::Error,
    },
}

/// Observable lifecycle states of the workload.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum WorkloadState {
    NotReady,
    LayerAbsent,
    Stopped,
    Running,
    Reloading,
    Restarting,
    Blocked,
}

/// How a config change was picked up by the running process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigUpdate {
    Reloaded,
    Restarted,
}

/// Everything that goes into the service command line, apart from the peers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkloadSettings {
    pub api_port: u16,
    pub ha_port: u16,
    pub config_path: String,
    pub storage_path: String,
    pub web_config_path: String,
    pub external_url: String,
    pub tls_enabled: bool,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            api_port: API_PORT,
            ha_port: HA_PORT,
            config_path: CONFIG_PATH.to_owned(),
            storage_path: STORAGE_PATH.to_owned(),
            web_config_path: WEB_CONFIG_PATH.to_owned(),
            external_url: format!("http://localhost:{API_PORT}/"),
            tls_enabled: false,
        }
    }
}

impl WorkloadSettings {
    /// The full Alertmanager command line.
    ///
    /// `peer_addresses` are emitted sorted. An empty peer set leaves the cluster listen
    /// address empty, which disables HA mode.
    pub fn command(&self, peer_addresses: &[String]) -> String {
        let listen_address = if peer_addresses.is_empty() {
            String::new()
        } else {
            format!("0.0.0.0:{}", self.ha_port)
        };

        let mut args = vec![
            EXE_NAME.to_owned(),
            format!("--config.file={}", self.config_path),
            format!("--storage.path={}", self.storage_path),
            format!("--web.listen-address=:{}", self.api_port),
            format!("--cluster.listen-address={listen_address}"),
            format!("--web.external-url={}", self.external_url),
        ];
        if self.tls_enabled {
            args.push(format!("--web.config.file={}", self.web_config_path));
        }

        let mut peers: Vec<_> = peer_addresses
            .iter()
            .map(|address| format!("--cluster.peer={address}"))
            .collect();
        peers.sort();
        peers.dedup();
        args.extend(peers);

        args.join(" ")
    }

    pub fn layer(&self, peer_addresses: &[String]) -> Layer {
        Layer {
            summary: "alertmanager layer".to_owned(),
            description: "supervisor config layer for alertmanager".to_owned(),
            services: [(SERVICE_NAME.to_owned(), Service {
                override_: Override::Replace,
                summary: "alertmanager service".to_owned(),
                command: self.command(peer_addresses),
                startup: Startup::Enabled,
            })]
            .into(),
        }
    }
}

pub struct WorkloadManager<'a> {
    container: &'a dyn Container,
    api: &'a dyn AlertmanagerApi,
    settings: WorkloadSettings,
}

impl<'a> WorkloadManager<'a> {
    pub fn new(
        container: &'a dyn Container,
        api: &'a dyn AlertmanagerApi,
        settings: WorkloadSettings,
    ) -> Self {
        Self {
            container,
            api,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkloadSettings {
        &self.settings
    }

    pub async fn is_ready(&self) -> bool {
        self.container.can_connect().await
    }

    async fn ensure_ready(&self, operation: &'static str) -> Result<()> {
        if self.is_ready().await {
            Ok(())
        } else {
            ContainerNotReadySnafu { operation }.fail()
        }
    }

    pub async fn observe(&self) -> Result<WorkloadState> {
        if !self.is_ready().await {
            return Ok(WorkloadState::NotReady);
        }
        let plan = self.container.get_plan().await.context(GetPlanSnafu)?;
        if !plan.services.contains_key(SERVICE_NAME) {
            return Ok(WorkloadState::LayerAbsent);
        }
        let running = self
            .container
            .is_running(SERVICE_NAME)
            .await
            .context(QueryServiceSnafu)?;
        Ok(if running {
            WorkloadState::Running
        } else {
            WorkloadState::Stopped
        })
    }

    /// Installs the service layer if it differs from what the supervisor has.
    ///
    /// Returns `true` if a new layer was installed. Installing does not restart anything.
    #[tracing::instrument(skip(self))]
    pub async fn update_layer(&self, peer_addresses: &[String]) -> Result<bool> {
        self.ensure_ready("update layer").await?;

        let desired = self.settings.layer(peer_addresses);
        let plan = self.container.get_plan().await.context(GetPlanSnafu)?;
        if plan.services.get(SERVICE_NAME) == desired.services.get(SERVICE_NAME) {
            debug!("service layer is up to date");
            return Ok(false);
        }

        info!("installing updated service layer");
        self.container
            .add_layer(LAYER_NAME, &desired)
            .await
            .context(AddLayerSnafu)?;
        Ok(true)
    }

    /// Starts the service according to the current plan.
    pub async fn start_service(&self) -> Result<()> {
        self.ensure_ready("start service").await?;
        info!(service = SERVICE_NAME, "starting service");
        self.container.replan().await.context(ReplanSnafu)
    }

    pub async fn restart_service(&self) -> Result<()> {
        self.ensure_ready("restart service").await?;

        let plan = self.container.get_plan().await.context(GetPlanSnafu)?;
        if !plan.services.contains_key(SERVICE_NAME) {
            return ServiceMissingSnafu.fail();
        }

        info!(
            service = SERVICE_NAME,
            state = %WorkloadState::Restarting,
            "restarting service"
        );
        self.container
            .restart(SERVICE_NAME)
            .await
            .context(RestartSnafu)
    }

    /// Runs `amtool check-config` against the written config file.
    #[tracing::instrument(skip(self))]
    pub async fn check_config(&self) -> Result<()> {
        self.ensure_ready("check config").await?;

        let command = [AMTOOL_PATH, "check-config", self.settings.config_path.as_str()];
        let output = self
            .container
            .exec(&command)
            .await
            .context(ExecSnafu {
                command: command.join(" "),
            })?;

        if output.success() {
            debug!(stdout = output.stdout, "config check passed");
            Ok(())
        } else {
            ConfigCheckFailedSnafu {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
            }
            .fail()
        }
    }

    /// Makes the running process pick up the config on disk.
    ///
    /// A hot reload is tried first. Only if that fails is the service restarted, exactly once.
    #[tracing::instrument(skip(self))]
    pub async fn reload_with_fallback(&self) -> Result<ConfigUpdate> {
        self.ensure_ready("reload").await?;

        // The server fills in defaults, so the snapshots are only compared with each other.
        let before = self.api.config().await.ok();

        debug!(state = %WorkloadState::Reloading, "reloading config");
        let update = match self.api.reload().await {
            Ok(()) => ConfigUpdate::Reloaded,
            Err(reload) => {
                warn!(
                    error = &reload as &dyn std::error::Error,
                    "config reload via HTTP POST failed, restarting service"
                );
                match self.restart_service().await {
                    Ok(()) => ConfigUpdate::Restarted,
                    Err(restart) => {
                        return Err(restart).context(ConfigUpdateFailureSnafu { reload });
                    }
                }
            }
        };

        let after = self.api.config().await.ok();
        match (before, after) {
            (Some(before), Some(after)) if before == after => {
                warn!("config remained the same after a reload");
            }
            (Some(_), Some(_)) => {}
            _ => warn!("cannot determine if reload succeeded"),
        }

        Ok(update)
    }

    /// The workload version as reported by `alertmanager --version`.
    pub async fn version(&self) -> Result<Option<String>> {
        self.ensure_ready("read version").await?;

        let command = [EXE_NAME, "--version"];
        let output = self
            .container
            .exec(&command)
            .await
            .context(ExecSnafu {
                command: command.join(" "),
            })?;

        // Output looks like: alertmanager, version 0.23.0 (branch: HEAD, ...)
        let version = [&output.stdout, &output.stderr].into_iter().find_map(|text| {
            VERSION_REGEX
                .captures(text)
                .and_then(|captures| captures.get(1))
                .map(|version| version.as_str().to_owned())
        });
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use alertmanager_config::RawConfig;
    use rstest::rstest;

    use super::*;
    use crate::testing::{FakeApi, FakeContainer};

    fn peers(addresses: &[&str]) -> Vec<String> {
        addresses.iter().map(|address| (*address).to_owned()).collect()
    }

    #[test]
    fn command_without_peers_disables_ha() {
        let command = WorkloadSettings::default().command(&[]);
        assert_eq!(
            command,
            "alertmanager --config.file=/etc/alertmanager/alertmanager.yml \
             --storage.path=/alertmanager --web.listen-address=:9093 \
             --cluster.listen-address= --web.external-url=http://localhost:9093/"
        );
    }

    #[rstest]
    #[case(&["10.0.0.1:9094", "10.0.0.2:9094"])]
    #[case(&["10.0.0.2:9094", "10.0.0.1:9094"])]
    fn peers_join_sorted(#[case] addresses: &[&str]) {
        let command = WorkloadSettings::default().command(&peers(addresses));

        assert!(command.contains("--cluster.listen-address=0.0.0.0:9094"));
        let first = command
            .find("--cluster.peer=10.0.0.1")
            .expect("first peer present");
        let second = command
            .find("--cluster.peer=10.0.0.2")
            .expect("second peer present");
        assert!(first < second);
    }

    #[test]
    fn tls_adds_web_config() {
        let settings = WorkloadSettings {
            tls_enabled: true,
            ..WorkloadSettings::default()
        };
        assert!(
            settings
                .command(&[])
                .ends_with("--web.config.file=/etc/alertmanager/alertmanager-web-config.yml")
        );
    }

    #[tokio::test]
    async fn update_layer_installs_only_on_change() {
        let container = FakeContainer::new();
        let api = FakeApi::new();
        let manager = WorkloadManager::new(&container, &api, WorkloadSettings::default());

        assert!(manager.update_layer(&[]).await.expect("layer installs"));
        assert!(!manager.update_layer(&[]).await.expect("layer is current"));
        assert!(
            manager
                .update_layer(&peers(&["10.0.0.1:9094"]))
                .await
                .expect("layer installs")
        );

        let state = container.state();
        assert_eq!(state.layers.len(), 2);
        assert_eq!(state.restarts, 0);
        assert_eq!(state.replans, 0);
    }

    #[tokio::test]
    async fn operations_fail_fast_when_not_ready() {
        let container = FakeContainer::new();
        container.state().reachable = false;
        let api = FakeApi::new();
        let manager = WorkloadManager::new(&container, &api, WorkloadSettings::default());

        assert!(matches!(
            manager.update_layer(&[]).await,
            Err(Error::ContainerNotReady { .. })
        ));
        assert!(matches!(
            manager.reload_with_fallback().await,
            Err(Error::ContainerNotReady { .. })
        ));
        assert_eq!(
            manager.observe().await.expect("observable"),
            WorkloadState::NotReady
        );
    }

    #[tokio::test]
    async fn reload_success_does_not_restart() {
        let container = FakeContainer::new();
        let api = FakeApi::serving(&container);
        let manager = WorkloadManager::new(&container, &api, WorkloadSettings::default());
        manager.update_layer(&[]).await.expect("layer installs");
        container
            .push(CONFIG_PATH, "route: {receiver: dummy}\n")
            .await
            .expect("config written");
        api.load_from(&container);
        let before = api.config().await.expect("config is served");

        container
            .push(CONFIG_PATH, "route: {receiver: updated}\n")
            .await
            .expect("config written");
        let update = manager.reload_with_fallback().await.expect("reload works");

        assert_eq!(update, ConfigUpdate::Reloaded);
        assert_eq!(api.state().reloads, 1);
        // Snapshots before and after the reload.
        assert_eq!(api.state().status_calls, 2);
        assert_eq!(container.state().restarts, 0);

        let after = api.config().await.expect("config is served");
        assert_ne!(before, after);
        assert_eq!(
            after,
            RawConfig::from_yaml("route: {receiver: updated}").expect("test YAML is valid")
        );
    }

    #[tokio::test]
    async fn failed_reload_restarts_exactly_once() {
        let container = FakeContainer::new();
        let api = FakeApi::new();
        api.state().reload_ok = false;
        let manager = WorkloadManager::new(&container, &api, WorkloadSettings::default());
        manager.update_layer(&[]).await.expect("layer installs");

        let update = manager.reload_with_fallback().await.expect("restart works");

        assert_eq!(update, ConfigUpdate::Restarted);
        assert_eq!(api.state().reloads, 1);
        assert_eq!(container.state().restarts, 1);
    }

    #[tokio::test]
    async fn failed_reload_and_restart_is_config_update_failure() {
        let container = FakeContainer::new();
        container.state().fail_restart = true;
        let api = FakeApi::new();
        api.state().reload_ok = false;
        let manager = WorkloadManager::new(&container, &api, WorkloadSettings::default());
        manager.update_layer(&[]).await.expect("layer installs");

        let error = manager
            .reload_with_fallback()
            .await
            .expect_err("update fails");

        assert!(matches!(error, Error::ConfigUpdateFailure { .. }));
        assert_eq!(container.state().restarts, 0);
        assert_eq!(api.state().reloads, 1);
    }

    #[tokio::test]
    async fn restart_requires_service() {
        let container = FakeContainer::new();
        let api = FakeApi::new();
        let manager = WorkloadManager::new(&container, &api, WorkloadSettings::default());

        assert!(matches!(
            manager.restart_service().await,
            Err(Error::ServiceMissing)
        ));
    }

    #[tokio::test]
    async fn check_config_reports_amtool_failure() {
        let container = FakeContainer::new();
        let api = FakeApi::new();
        let manager = WorkloadManager::new(&container, &api, WorkloadSettings::default());

        manager.check_config().await.expect("config passes");
        assert_eq!(container.state().execs, vec![vec![
            "/usr/bin/amtool",
            "check-config",
            "/etc/alertmanager/alertmanager.yml"
        ]]);

        container.reject_config();
        assert!(matches!(
            manager.check_config().await,
            Err(Error::ConfigCheckFailed { exit_code: 1, .. })
        ));
    }

    #[tokio::test]
    async fn version_is_parsed_from_output() {
        let container = FakeContainer::new();
        let api = FakeApi::new();
        let manager = WorkloadManager::new(&container, &api, WorkloadSettings::default());

        assert_eq!(
            manager.version().await.expect("version"),
            Some("0.27.0".to_owned())
        );

        container
            .state()
            .exec_results
            .insert(EXE_NAME.to_owned(), container::ExecOutput::default());
        assert_eq!(manager.version().await.expect("version"), None);
    }

    #[tokio::test]
    async fn observe_tracks_lifecycle() {
        let container = FakeContainer::new();
        let api = FakeApi::new();
        let manager = WorkloadManager::new(&container, &api, WorkloadSettings::default());

        assert_eq!(manager.observe().await.expect("observable"), WorkloadState::LayerAbsent);
        manager.update_layer(&[]).await.expect("layer installs");
        assert_eq!(manager.observe().await.expect("observable"), WorkloadState::Stopped);
        manager.start_service().await.expect("service starts");
        assert_eq!(manager.observe().await.expect("observable"), WorkloadState::Running);
    }
}
