//! State carried from one reconciliation pass to the next.
//!
//! Every field is a cache: losing the state (e.g. on a restart of the operator) only causes a
//! redundant write, reload or restart on the next pass, never a wrong end state.
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse the reconciler state"))]
    Parse { source: serde_json::Error },

    #[snafu(display("failed to serialize the reconciler state"))]
    Serialize { source: serde_json::Error },
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerState {
    /// Hash of the last manifest that was written and passed the config check.
    pub config_hash: Option<String>,

    /// Whether the service was started or restarted with a non-empty peer set.
    pub launched_with_peers: bool,

    /// The peer addresses of the last successful pass.
    pub peer_addresses: Vec<String>,
}

impl ReconcilerState {
    /// Loads persisted state. A blank document is the initial state.
    pub fn from_json(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(input).context(ParseSnafu)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context(SerializeSnafu)
    }
}
