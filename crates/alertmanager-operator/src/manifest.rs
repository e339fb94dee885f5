//! The desired state of configuration files inside the workload container.
use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::container::{self, Container};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to write {path:?}"))]
    Push {
        source: container::Error,
        path: String,
    },

    #[snafu(display("failed to remove {path:?}"))]
    Remove {
        source: container::Error,
        path: String,
    },
}

/// Maps file paths to their desired content. A `None` content is a tombstone: the path is
/// removed (recursively) if it exists.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileSystemManifest {
    files: BTreeMap<String, Option<String>>,
}

impl FileSystemManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.files.insert(path.into(), Some(content.into()));
        self
    }

    pub fn delete_file(&mut self, path: impl Into<String>) -> &mut Self {
        self.files.insert(path.into(), None);
        self
    }

    /// Adds the file when `content` is given, a tombstone otherwise.
    pub fn file_opt(&mut self, path: impl Into<String>, content: Option<String>) -> &mut Self {
        self.files.insert(path.into(), content);
        self
    }

    pub fn get(&self, path: &str) -> Option<Option<&str>> {
        self.files.get(path).map(Option::as_deref)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// A stable digest over every path and its content (or tombstone).
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0]);
            match content {
                Some(content) => {
                    hasher.update([1]);
                    hasher.update(content.as_bytes());
                }
                None => hasher.update([2]),
            }
            hasher.update([0]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Writes every file and removes every tombstoned path.
    pub async fn apply(&self, container: &dyn Container) -> Result<()> {
        for (path, content) in &self.files {
            match content {
                Some(content) => {
                    debug!(path, "writing file");
                    container.push(path, content).await.context(PushSnafu { path })?;
                }
                None => {
                    container.remove_path(path).await.context(RemoveSnafu { path })?;
                }
            }
        }
        Ok(())
    }

    /// Applies the manifest unless its hash equals `last_applied`.
    ///
    /// Returns the new hash if anything was applied. The caller decides when the hash counts
    /// as applied, so a failed follow-up step can force the next pass to write again.
    pub async fn apply_if_changed(
        &self,
        container: &dyn Container,
        last_applied: Option<&str>,
    ) -> Result<Option<String>> {
        let hash = self.hash();
        if last_applied == Some(hash.as_str()) {
            debug!(hash, "manifest unchanged, skipping write");
            return Ok(None);
        }

        self.apply(container).await?;
        Ok(Some(hash))
    }
}
