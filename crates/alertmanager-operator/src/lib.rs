//! Reconciles a supervised Alertmanager workload with its desired configuration.
//!
//! The entrypoint is [`reconciler::Reconciler::reconcile`]. It is driven by a host runtime
//! that provides the [`container::Container`] control surface, the relation data bags (see
//! [`remote`]) and the peer set.
pub mod cli;
pub mod client;
pub mod constants;
pub mod container;
pub mod logging;
pub mod manifest;
pub mod options;
pub mod peers;
pub mod reconciler;
pub mod remote;
pub mod sources;
pub mod state;
pub mod status;
pub mod workload;

#[cfg(test)]
pub(crate) mod testing;
