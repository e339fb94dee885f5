//! The control surface of the workload container, as offered by the host's process supervisor.
//!
//! The supervisor runs services described by named [`Layer`]s. Layers are merged into a
//! [`Plan`]; a service only picks up a changed command line once it is (re)started or the plan
//! is re-applied with [`Container::replan`].
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("cannot connect to the workload container"))]
    Unreachable,

    #[snafu(display("failed to {operation} {target:?} in the workload container: {message}"))]
    Operation {
        operation: &'static str,
        target: String,
        message: String,
    },
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Override {
    Merge,
    #[default]
    Replace,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Startup {
    #[default]
    Enabled,
    Disabled,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Service {
    #[serde(rename = "override")]
    pub override_: Override,
    pub summary: String,
    pub command: String,
    pub startup: Startup,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Layer {
    pub summary: String,
    pub description: String,
    pub services: BTreeMap<String, Service>,
}

/// The combined view of all layers the supervisor currently knows about.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Plan {
    pub services: BTreeMap<String, Service>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait Container: Send + Sync {
    /// Returns `true` if the supervisor accepts requests.
    async fn can_connect(&self) -> bool;

    /// Writes `content` to `path`, creating parent directories as needed.
    async fn push(&self, path: &str, content: &str) -> Result<()>;

    /// Removes `path` recursively. Removing a missing path is not an error.
    async fn remove_path(&self, path: &str) -> Result<()>;

    /// Runs `command` to completion. A non-zero exit code is reported in the output, not
    /// as an error.
    async fn exec(&self, command: &[&str]) -> Result<ExecOutput>;

    /// Adds `layer` under `name`, merging it into an existing layer of the same name.
    async fn add_layer(&self, name: &str, layer: &Layer) -> Result<()>;

    /// Brings the running services in line with the current plan.
    async fn replan(&self) -> Result<()>;

    async fn restart(&self, service: &str) -> Result<()>;

    async fn get_plan(&self) -> Result<Plan>;

    async fn is_running(&self, service: &str) -> Result<bool>;
}
