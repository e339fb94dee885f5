//! In-memory stand-ins for the container and the HTTP control API, recording every call.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

use alertmanager_config::RawConfig;
use async_trait::async_trait;

use crate::{
    client::{self, AlertmanagerApi, AlertmanagerStatus, ClusterStatus, ConfigStatus, VersionInfo},
    constants::{AMTOOL_PATH, CONFIG_PATH, EXE_NAME},
    container::{self, Container, ExecOutput, Layer, Plan},
};

#[derive(Debug)]
pub struct FakeContainerState {
    pub reachable: bool,
    pub files: BTreeMap<String, String>,
    pub pushes: Vec<String>,
    pub removals: Vec<String>,
    pub execs: Vec<Vec<String>>,
    pub layers: Vec<Layer>,
    pub plan: Plan,
    pub replans: usize,
    pub restarts: usize,
    pub running: bool,
    pub fail_restart: bool,
    /// Paths whose removal fails.
    pub fail_removals: BTreeSet<String>,
    /// Canned results keyed by program name. Unknown programs exit 0 with no output.
    pub exec_results: BTreeMap<String, ExecOutput>,
}

impl Default for FakeContainerState {
    fn default() -> Self {
        Self {
            reachable: true,
            files: BTreeMap::new(),
            pushes: Vec::new(),
            removals: Vec::new(),
            execs: Vec::new(),
            layers: Vec::new(),
            plan: Plan::default(),
            replans: 0,
            restarts: 0,
            running: false,
            fail_restart: false,
            fail_removals: BTreeSet::new(),
            exec_results: BTreeMap::from([(EXE_NAME.to_owned(), ExecOutput {
                stdout: "alertmanager, version 0.27.0 (branch: HEAD, revision: 0f65e8f)".to_owned(),
                ..ExecOutput::default()
            })]),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeContainer(Arc<Mutex<FakeContainerState>>);

impl FakeContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeContainerState> {
        self.0.lock().expect("fake container lock is not poisoned")
    }

    /// Makes `amtool check-config` fail.
    pub fn reject_config(&self) {
        self.state()
            .exec_results
            .insert(AMTOOL_PATH.to_owned(), ExecOutput {
                stdout: String::new(),
                stderr: "Checking '/etc/alertmanager/alertmanager.yml'  FAILED".to_owned(),
                exit_code: 1,
            });
    }

    fn check_reachable(&self) -> container::Result<()> {
        if self.state().reachable {
            Ok(())
        } else {
            Err(container::Error::Unreachable)
        }
    }
}

#[async_trait]
impl Container for FakeContainer {
    async fn can_connect(&self) -> bool {
        self.state().reachable
    }

    async fn push(&self, path: &str, content: &str) -> container::Result<()> {
        self.check_reachable()?;
        let mut state = self.state();
        state.pushes.push(path.to_owned());
        state.files.insert(path.to_owned(), content.to_owned());
        Ok(())
    }

    async fn remove_path(&self, path: &str) -> container::Result<()> {
        self.check_reachable()?;
        let mut state = self.state();
        if state.fail_removals.contains(path) {
            return Err(container::Error::Operation {
                operation: "remove",
                target: path.to_owned(),
                message: "permission denied".to_owned(),
            });
        }
        state.removals.push(path.to_owned());
        state.files.retain(|file, _| !file.starts_with(path));
        Ok(())
    }

    async fn exec(&self, command: &[&str]) -> container::Result<ExecOutput> {
        self.check_reachable()?;
        let mut state = self.state();
        state
            .execs
            .push(command.iter().map(|arg| (*arg).to_owned()).collect());
        let program = command.first().copied().unwrap_or_default();
        Ok(state.exec_results.get(program).cloned().unwrap_or_default())
    }

    async fn add_layer(&self, _name: &str, layer: &Layer) -> container::Result<()> {
        self.check_reachable()?;
        let mut state = self.state();
        state.layers.push(layer.clone());
        state.plan.services.extend(layer.services.clone());
        Ok(())
    }

    async fn replan(&self) -> container::Result<()> {
        self.check_reachable()?;
        let mut state = self.state();
        state.replans += 1;
        state.running = !state.plan.services.is_empty();
        Ok(())
    }

    async fn restart(&self, service: &str) -> container::Result<()> {
        self.check_reachable()?;
        let mut state = self.state();
        if state.fail_restart {
            return Err(container::Error::Operation {
                operation: "restart",
                target: service.to_owned(),
                message: "service exited during startup".to_owned(),
            });
        }
        state.restarts += 1;
        state.running = true;
        Ok(())
    }

    async fn get_plan(&self) -> container::Result<Plan> {
        self.check_reachable()?;
        Ok(self.state().plan.clone())
    }

    async fn is_running(&self, service: &str) -> container::Result<bool> {
        self.check_reachable()?;
        let state = self.state();
        Ok(state.running && state.plan.services.contains_key(service))
    }
}

#[derive(Debug)]
pub struct FakeApiState {
    pub reload_ok: bool,
    pub reloads: usize,
    pub status_calls: usize,
    pub config: Option<RawConfig>,
    pub version: String,
}

impl Default for FakeApiState {
    fn default() -> Self {
        Self {
            reload_ok: true,
            reloads: 0,
            status_calls: 0,
            config: None,
            version: "0.27.0".to_owned(),
        }
    }
}

/// Serves the config most recently pushed to [`CONFIG_PATH`] once it has been (re)loaded.
#[derive(Debug, Default)]
pub struct FakeApi {
    state: Mutex<FakeApiState>,
    disk: Option<Arc<Mutex<FakeContainerState>>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// An API whose successful reloads pick up the config pushed to `container`.
    pub fn serving(container: &FakeContainer) -> Self {
        Self {
            state: Mutex::default(),
            disk: Some(Arc::clone(&container.0)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeApiState> {
        self.state.lock().expect("fake API lock is not poisoned")
    }

    /// Simulates the server picking up whatever is on disk in `container`.
    pub fn load_from(&self, container: &FakeContainer) {
        let config = config_on_disk(&container.state());
        self.state().config = config;
    }
}

#[async_trait]
impl AlertmanagerApi for FakeApi {
    async fn reload(&self) -> client::Result<()> {
        let mut state = self.state();
        state.reloads += 1;
        if state.reload_ok {
            if let Some(disk) = &self.disk {
                let disk = disk.lock().expect("fake container lock is not poisoned");
                state.config = config_on_disk(&disk);
            }
            Ok(())
        } else {
            Err(client::Error::UnexpectedStatus {
                url: "http://localhost:9093/-/reload".to_owned(),
                status: 500,
            })
        }
    }

    async fn status(&self) -> client::Result<AlertmanagerStatus> {
        let mut state = self.state();
        state.status_calls += 1;
        let original = match &state.config {
            Some(config) => alertmanager_config::yaml::to_string(config).unwrap_or_default(),
            None => String::new(),
        };
        Ok(AlertmanagerStatus {
            cluster: ClusterStatus::default(),
            config: ConfigStatus { original },
            version_info: VersionInfo {
                version: state.version.clone(),
                ..VersionInfo::default()
            },
            uptime: None,
        })
    }
}

fn config_on_disk(state: &FakeContainerState) -> Option<RawConfig> {
    state
        .files
        .get(CONFIG_PATH)
        .and_then(|yaml| RawConfig::from_yaml(yaml).ok())
}
