//! Building and validating Alertmanager configuration.
//!
//! This crate is free of I/O: it turns a [`RawConfig`] plus operator supplied inputs into a
//! rendered [`ConfigSuite`], and checks configs against Alertmanager's accepted grammar.
pub mod builder;
pub mod raw;
pub mod validation;
pub mod yaml;

pub use builder::{ConfigBuilder, ConfigSuite, TOPOLOGY_LABELS};
pub use raw::RawConfig;
