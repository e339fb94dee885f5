//! Exchange of Alertmanager configuration with a remote application over a relation.
//!
//! The provider side publishes a config plus templates into its application data bag, the
//! consumer side (this operator) reads, validates and watches it. Relation data bags are
//! string-to-string maps: the config travels as a JSON document under
//! [`REMOTE_CONFIG_KEY`], the templates as a JSON list of strings under
//! [`REMOTE_TEMPLATES_KEY`].
use std::{collections::BTreeMap, path::Path};

use alertmanager_config::{RawConfig, raw, validation};
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, error, info, warn};

use crate::constants::{REMOTE_CONFIG_KEY, REMOTE_TEMPLATES_KEY};

type Result<T, E = Error> = std::result::Result<T, E>;

/// A relation data bag, keyed by field name.
pub type DataBag = BTreeMap<String, String>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read config file {path:?}"))]
    ReadConfigFile {
        source: std::io::Error,
        path: String,
    },

    #[snafu(display("failed to parse config file {path:?}"))]
    ParseConfigFile { source: raw::Error, path: String },

    #[snafu(display("the templates section of {path:?} must be a list of file paths"))]
    InvalidTemplatesSection { path: String },

    #[snafu(display("relation data has no {REMOTE_CONFIG_KEY:?} field"))]
    MissingConfig,

    #[snafu(display("failed to parse the remote config"))]
    ParseRemoteConfig { source: raw::Error },

    #[snafu(display("failed to parse the remote templates"))]
    ParseRemoteTemplates { source: serde_json::Error },

    #[snafu(display("the config has invalid top-level keys: {source}"))]
    InvalidMainKeys { source: validation::Errors },

    #[snafu(display("failed to write relation data"))]
    WriteRelationData { source: RelationError },
}

/// Failure reported by the host when writing relation data.
#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct RelationError {
    pub message: String,
}

/// Access to the single (limit 1) remote configuration relation.
pub trait Relation {
    /// Only the leader may write application data.
    fn is_leader(&self) -> bool;

    /// The data the remote application published, [`None`] if there is no relation.
    fn remote_app_data(&self) -> Option<DataBag>;

    fn set_app_data(&mut self, key: &str, value: &str) -> Result<(), RelationError>;
}

/// The typed payload of the relation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteConfiguration {
    pub config: RawConfig,
    pub templates: Vec<String>,
}

impl RemoteConfiguration {
    pub fn to_data_bag(&self) -> DataBag {
        BTreeMap::from([
            (REMOTE_CONFIG_KEY.to_owned(), self.config.to_json()),
            (
                REMOTE_TEMPLATES_KEY.to_owned(),
                Value::from(self.templates.clone()).to_string(),
            ),
        ])
    }

    /// Parses relation data. A missing templates field means no templates.
    pub fn from_data_bag(data: &DataBag) -> Result<Self> {
        let config = data.get(REMOTE_CONFIG_KEY).context(MissingConfigSnafu)?;
        let config = RawConfig::from_json(config).context(ParseRemoteConfigSnafu)?;

        let templates = match data.get(REMOTE_TEMPLATES_KEY) {
            Some(templates) => {
                serde_json::from_str(templates).context(ParseRemoteTemplatesSnafu)?
            }
            None => Vec::new(),
        };

        Ok(Self { config, templates })
    }

    /// The templates as a single file.
    pub fn joined_templates(&self) -> Option<String> {
        if self.templates.is_empty() {
            None
        } else {
            Some(self.templates.join("\n"))
        }
    }
}

/// Reads a config file for publishing.
///
/// Alertmanager configs reference template files from a `templates` section. Those files are
/// read and their contents moved into [`RemoteConfiguration::templates`], and the section is
/// dropped from the config. Template files that do not exist are skipped.
pub async fn load_config_file(path: impl AsRef<Path>) -> Result<RemoteConfiguration> {
    let path = path.as_ref();
    let display_path = path.display().to_string();

    let content = tokio::fs::read_to_string(path)
        .await
        .context(ReadConfigFileSnafu {
            path: &display_path,
        })?;
    let mut config = RawConfig::from_yaml(&content).context(ParseConfigFileSnafu {
        path: &display_path,
    })?;

    let template_paths = match config.remove("templates") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => entries
            .into_iter()
            .map(|entry| match entry {
                Value::String(entry) => Ok(entry),
                _ => InvalidTemplatesSectionSnafu {
                    path: &display_path,
                }
                .fail(),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return InvalidTemplatesSectionSnafu { path: display_path }.fail();
        }
    };

    let mut templates = Vec::with_capacity(template_paths.len());
    for template_path in template_paths {
        match tokio::fs::read_to_string(&template_path).await {
            Ok(template) => templates.push(template),
            Err(err) => warn!(
                path = template_path,
                error = &err as &dyn std::error::Error,
                "skipping unreadable templates file"
            ),
        }
    }

    Ok(RemoteConfiguration { config, templates })
}

/// Publishes configuration to the remote relation.
pub struct RemoteConfigurationProvider<R> {
    relation: R,
}

impl<R: Relation> RemoteConfigurationProvider<R> {
    pub fn new(relation: R) -> Self {
        Self { relation }
    }

    pub fn relation(&self) -> &R {
        &self.relation
    }

    /// Writes `configuration` to the relation.
    ///
    /// Returns `false` without writing anything on non-leader units. A config with keys
    /// outside the allowed top-level set (which excludes `templates`) is rejected.
    pub fn publish(&mut self, configuration: &RemoteConfiguration) -> Result<bool> {
        if !self.relation.is_leader() {
            debug!("not the leader, skipping publishing remote configuration");
            return Ok(false);
        }

        validation::validate_main_keys(&configuration.config).context(InvalidMainKeysSnafu)?;

        for (key, value) in configuration.to_data_bag() {
            self.relation
                .set_app_data(&key, &value)
                .context(WriteRelationDataSnafu)?;
        }
        info!(
            templates = configuration.templates.len(),
            "published remote configuration"
        );
        Ok(true)
    }

    /// Loads `path` with [`load_config_file`] and publishes the result.
    pub async fn publish_file(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let configuration = load_config_file(path).await?;
        self.publish(&configuration)
    }
}

/// Raised when the data published by the remote application changed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteConfigurationChanged {
    /// The configuration in effect, see [`RemoteConfigurationConsumer::read`].
    pub configuration: Option<RemoteConfiguration>,
}

type ChangedHandler = Box<dyn FnMut(&RemoteConfigurationChanged) + Send>;

/// Relation data classified by [`RemoteConfigurationConsumer`].
enum Published {
    /// No config, or an empty one.
    Nothing,
    Valid(RemoteConfiguration),
    Invalid,
}

/// Reads and validates configuration published by a remote application.
///
/// The last configuration that passed validation stays in effect while the remote
/// application publishes invalid data.
#[derive(Default)]
pub struct RemoteConfigurationConsumer {
    last_seen: Option<Option<DataBag>>,
    last_valid: Option<RemoteConfiguration>,
    handlers: Vec<ChangedHandler>,
}

impl RemoteConfigurationConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler called for every [`RemoteConfigurationChanged`].
    pub fn on_changed(
        &mut self,
        handler: impl FnMut(&RemoteConfigurationChanged) + Send + 'static,
    ) -> &mut Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// The remote configuration in effect, if any.
    ///
    /// Invalid data is discarded as a whole and logged, never partially applied. The last
    /// valid configuration is returned instead. Removing the relation, its config field or
    /// publishing an empty config withdraws the remote configuration.
    pub fn read(&mut self, relation: &impl Relation) -> Option<RemoteConfiguration> {
        let data = relation.remote_app_data();
        self.accept(data.as_ref())
    }

    fn accept(&mut self, data: Option<&DataBag>) -> Option<RemoteConfiguration> {
        match data.map_or(Published::Nothing, Self::parse) {
            Published::Nothing => self.last_valid = None,
            Published::Valid(configuration) => self.last_valid = Some(configuration),
            Published::Invalid if self.last_valid.is_some() => {
                warn!("keeping the last valid remote configuration");
            }
            Published::Invalid => {}
        }
        self.last_valid.clone()
    }

    fn parse(data: &DataBag) -> Published {
        let configuration = match RemoteConfiguration::from_data_bag(data) {
            Ok(configuration) => configuration,
            Err(Error::MissingConfig) => {
                warn!("remote configuration relation exists, but no config has been provided");
                return Published::Nothing;
            }
            Err(err) => {
                error!(
                    error = &err as &dyn std::error::Error,
                    "discarding malformed remote configuration"
                );
                return Published::Invalid;
            }
        };

        if configuration.config.is_empty() {
            debug!("remote configuration is empty");
            return Published::Nothing;
        }

        match validation::validate(&configuration.config) {
            Ok(()) => Published::Valid(configuration),
            Err(errors) => {
                error!(%errors, "remote configuration failed validation, discarding it");
                Published::Invalid
            }
        }
    }

    /// Compares the relation data with what was seen last time, and notifies the registered
    /// handlers if it changed. The first observation always counts as a change.
    pub fn observe(&mut self, relation: &impl Relation) -> Option<RemoteConfigurationChanged> {
        let data = relation.remote_app_data();
        if self.last_seen.as_ref() == Some(&data) {
            return None;
        }

        let event = RemoteConfigurationChanged {
            configuration: self.accept(data.as_ref()),
        };
        self.last_seen = Some(data);

        for handler in &mut self.handlers {
            handler(&event);
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use indoc::indoc;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Default)]
    struct FakeRelation {
        leader: bool,
        remote: Option<DataBag>,
        local: DataBag,
    }

    impl Relation for FakeRelation {
        fn is_leader(&self) -> bool {
            self.leader
        }

        fn remote_app_data(&self) -> Option<DataBag> {
            self.remote.clone()
        }

        fn set_app_data(&mut self, key: &str, value: &str) -> Result<(), RelationError> {
            self.local.insert(key.to_owned(), value.to_owned());
            Ok(())
        }
    }

    fn remote(config: &str, templates: Option<&str>) -> FakeRelation {
        let mut data = DataBag::from([(REMOTE_CONFIG_KEY.to_owned(), config.to_owned())]);
        if let Some(templates) = templates {
            data.insert(REMOTE_TEMPLATES_KEY.to_owned(), templates.to_owned());
        }
        FakeRelation {
            remote: Some(data),
            ..FakeRelation::default()
        }
    }

    fn valid_config() -> RemoteConfiguration {
        RemoteConfiguration {
            config: RawConfig::default_config(),
            templates: vec![r#"{{ define "x" }}x{{ end }}"#.to_owned()],
        }
    }

    #[test]
    fn valid_remote_configuration_is_read() {
        let relation = FakeRelation {
            remote: Some(valid_config().to_data_bag()),
            ..FakeRelation::default()
        };
        assert_eq!(
            RemoteConfigurationConsumer::new().read(&relation),
            Some(valid_config())
        );
    }

    #[test]
    fn invalid_remote_configuration_is_discarded() {
        let relation = remote(r#"{"some": "invalid_config"}"#, None);
        assert_eq!(RemoteConfigurationConsumer::new().read(&relation), None);
    }

    #[test]
    fn invalid_update_keeps_the_last_valid_configuration() {
        let mut consumer = RemoteConfigurationConsumer::new();
        let mut relation = FakeRelation {
            remote: Some(valid_config().to_data_bag()),
            ..FakeRelation::default()
        };
        assert_eq!(consumer.read(&relation), Some(valid_config()));

        relation.remote = remote(r#"{"some": "invalid_config"}"#, None).remote;
        assert_eq!(consumer.read(&relation), Some(valid_config()));

        relation.remote = Some(DataBag::new());
        assert_eq!(consumer.read(&relation), None);

        relation.remote = Some(valid_config().to_data_bag());
        assert_eq!(consumer.read(&relation), Some(valid_config()));
        relation.remote = None;
        assert_eq!(consumer.read(&relation), None);
    }

    #[test]
    fn malformed_templates_discard_everything() {
        let relation = remote(&RawConfig::default_config().to_json(), Some("not json"));
        assert_eq!(RemoteConfigurationConsumer::new().read(&relation), None);
    }

    #[test]
    fn missing_or_empty_config_is_no_config() {
        let mut consumer = RemoteConfigurationConsumer::new();
        assert_eq!(consumer.read(&FakeRelation::default()), None);
        assert_eq!(
            consumer.read(&FakeRelation {
                remote: Some(DataBag::new()),
                ..FakeRelation::default()
            }),
            None
        );
        assert_eq!(consumer.read(&remote("{}", Some("[]"))), None);
    }

    #[test]
    fn changes_are_raised_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut consumer = RemoteConfigurationConsumer::new();
        let handler_seen = Arc::clone(&seen);
        consumer.on_changed(move |event| {
            handler_seen
                .lock()
                .expect("lock is not poisoned")
                .push(event.configuration.is_some());
        });

        let mut relation = FakeRelation::default();
        assert!(consumer.observe(&relation).is_some());
        assert!(consumer.observe(&relation).is_none());

        relation.remote = Some(valid_config().to_data_bag());
        let event = consumer.observe(&relation).expect("change is raised");
        assert_eq!(event.configuration, Some(valid_config()));
        assert!(consumer.observe(&relation).is_none());

        relation.remote = None;
        assert!(consumer.observe(&relation).is_some());

        assert_eq!(*seen.lock().expect("lock is not poisoned"), vec![
            false, true, false
        ]);
    }

    #[test]
    fn only_the_leader_publishes() {
        let mut provider = RemoteConfigurationProvider::new(FakeRelation::default());
        assert!(!provider.publish(&valid_config()).expect("publish is a no-op"));
        assert!(provider.relation().local.is_empty());

        let mut provider = RemoteConfigurationProvider::new(FakeRelation {
            leader: true,
            ..FakeRelation::default()
        });
        assert!(provider.publish(&valid_config()).expect("publish works"));

        let local = &provider.relation().local;
        assert_eq!(
            serde_json::from_str::<Value>(&local[REMOTE_TEMPLATES_KEY]).expect("valid JSON"),
            json!([r#"{{ define "x" }}x{{ end }}"#])
        );
        assert_eq!(
            RawConfig::from_json(&local[REMOTE_CONFIG_KEY]).expect("valid JSON"),
            RawConfig::default_config()
        );
    }

    #[test]
    fn invalid_main_keys_are_not_published() {
        let mut provider = RemoteConfigurationProvider::new(FakeRelation {
            leader: true,
            ..FakeRelation::default()
        });
        let configuration = RemoteConfiguration {
            config: RawConfig::from_yaml("route: {receiver: a}\nsome: key")
                .expect("test YAML is valid"),
            templates: Vec::new(),
        };

        assert!(matches!(
            provider.publish(&configuration),
            Err(Error::InvalidMainKeys { .. })
        ));
        assert!(provider.relation().local.is_empty());
    }

    #[tokio::test]
    async fn config_file_templates_are_inlined() {
        let dir = tempfile::tempdir().expect("temp dir");
        let template_path = dir.path().join("slack.tmpl");
        tokio::fs::write(&template_path, r#"{{ define "slack.title" }}t{{ end }}"#)
            .await
            .expect("template written");

        let config_path = dir.path().join("alertmanager.yml");
        let config = format!(
            indoc! {"
                route:
                  receiver: dummy
                receivers:
                  - name: dummy
                templates:
                  - {existing}
                  - {missing}
            "},
            existing = template_path.display(),
            missing = dir.path().join("missing.tmpl").display(),
        );
        tokio::fs::write(&config_path, config)
            .await
            .expect("config written");

        let configuration = load_config_file(&config_path).await.expect("config loads");

        assert!(!configuration.config.contains_key("templates"));
        assert_eq!(configuration.templates, vec![
            r#"{{ define "slack.title" }}t{{ end }}"#
        ]);
    }

    #[tokio::test]
    async fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(matches!(
            load_config_file(dir.path().join("nope.yml")).await,
            Err(Error::ReadConfigFile { .. })
        ));
    }
}
