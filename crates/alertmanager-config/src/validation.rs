//! Structural validation of Alertmanager configs.
//!
//! The accepted grammar is described by a tree of static [`Schema`]s: every mapping has a
//! closed set of allowed keys, some of which are required, and groups of keys that are
//! mutually exclusive or must appear together. Validation never mutates its input and
//! collects every problem it finds instead of stopping at the first one.
//!
//! Beyond the tree shape, [`validate`] cross-checks references: every receiver named in the
//! routing tree must be defined (exactly once), and every time interval a route refers to
//! must exist.

use std::{collections::BTreeSet, fmt::Display, sync::LazyLock};

use regex::Regex;
use serde_json::{Map, Value};
use snafu::Snafu;

use crate::{RawConfig, raw::type_name};

/// Keys allowed at the top level of the main config.
pub const TOP_LEVEL_KEYS: [&str; 7] = [
    "global",
    "inhibit_rules",
    "mute_time_intervals",
    "receivers",
    "route",
    "templates",
    "time_intervals",
];

const LABEL_NAME_FMT: &str = "[a-zA-Z_][a-zA-Z0-9_]*";
const DURATION_FMT: &str = r"((\d+)y)?((\d+)w)?((\d+)d)?((\d+)h)?((\d+)m)?((\d+)s)?((\d+)ms)?";
const TIME_FMT: &str = "([01][0-9]|2[0-3]):[0-5][0-9]|24:00";
const WEEKDAY_FMT: &str = "(?i:monday|tuesday|wednesday|thursday|friday|saturday|sunday)";
const DAY_OF_MONTH_FMT: &str = "-?(3[01]?|[12][0-9]?|[4-9])";
const MONTH_FMT: &str = "(?i:january|february|march|april|may|june|july|august|september|october|november|december)|1[0-2]|[1-9]";

// Lazily initialized regular expressions
static LABEL_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{LABEL_NAME_FMT}$")).expect("failed to compile label name regex")
});

static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^({DURATION_FMT}|0)$")).expect("failed to compile duration regex")
});

static TIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^({TIME_FMT})$")).expect("failed to compile time regex")
});

static WEEKDAY_RANGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{WEEKDAY_FMT}(:{WEEKDAY_FMT})?$"))
        .expect("failed to compile weekday range regex")
});

static DAY_OF_MONTH_RANGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{DAY_OF_MONTH_FMT}(:{DAY_OF_MONTH_FMT})?$"))
        .expect("failed to compile day of month range regex")
});

static MONTH_RANGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^({MONTH_FMT})(:({MONTH_FMT}))?$"))
        .expect("failed to compile month range regex")
});

static YEAR_RANGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^2[0-9]{3}(:[2-9][0-9]{3})?$").expect("failed to compile year range regex")
});

type Result<T = (), E = Errors> = std::result::Result<T, E>;

/// A collection of errors discovered during validation.
#[derive(Debug)]
pub struct Errors(Vec<Error>);

impl Errors {
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Errors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            let prefix = match i {
                0 => "",
                _ => ", ",
            };
            write!(f, "{prefix}{error}")?;
        }
        Ok(())
    }
}
impl std::error::Error for Errors {}

impl IntoIterator for Errors {
    type IntoIter = std::vec::IntoIter<Error>;
    type Item = Error;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A single validation error.
#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("config is empty"))]
    EmptyConfig,

    #[snafu(display("{path}: unknown field"))]
    UnknownField { path: String },

    #[snafu(display("{path}: missing required field"))]
    MissingField { path: String },

    #[snafu(display("{path}: expected {expected}, found {found}"))]
    WrongType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[snafu(display("{path}: {value:?} is not a valid {format}"))]
    InvalidFormat {
        path: String,
        value: String,
        format: &'static str,
    },

    #[snafu(display("{path}: {value:?} must be one of {allowed:?}"))]
    NotAllowed {
        path: String,
        value: String,
        allowed: &'static [&'static str],
    },

    #[snafu(display("{path}: must not be empty"))]
    EmptyList { path: String },

    #[snafu(display("{path}: exactly one of {fields:?} must be set"))]
    ExactlyOneOf {
        path: String,
        fields: &'static [&'static str],
    },

    #[snafu(display("{path}: at most one of {fields:?} may be set"))]
    MutuallyExclusive {
        path: String,
        fields: &'static [&'static str],
    },

    #[snafu(display("{path}: at least one of {fields:?} must be set"))]
    AtLeastOneOf {
        path: String,
        fields: &'static [&'static str],
    },

    #[snafu(display("{path}: {fields:?} must be set together"))]
    SetTogether {
        path: String,
        fields: &'static [&'static str],
    },

    #[snafu(display("{path}: receiver {receiver:?} is not defined"))]
    UndefinedReceiver { path: String, receiver: String },

    #[snafu(display("receiver {name:?} is defined more than once"))]
    DuplicateReceiver { name: String },

    #[snafu(display("{path}: time interval {name:?} is not defined"))]
    UndefinedTimeInterval { path: String, name: String },
}

/// Validates the full main config: the schema tree plus cross references.
pub fn validate(config: &RawConfig) -> Result {
    if config.is_empty() {
        return Err(Errors(vec![Error::EmptyConfig]));
    }

    let mut validator = Validator::default();
    validator.object("", config.as_map(), &CONFIG);
    validator.receiver_references(config);
    validator.time_interval_references(config);
    validator.finish()
}

/// Checks only that every top-level key is allowed, with `templates` excluded (templates
/// travel separately from the main config).
pub fn validate_main_keys(config: &RawConfig) -> Result {
    let errors: Vec<_> = config
        .keys()
        .filter(|key| *key == "templates" || !TOP_LEVEL_KEYS.contains(key))
        .map(|key| Error::UnknownField {
            path: key.to_owned(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Errors(errors))
    }
}

/// String formats checked with a regex.
#[derive(Clone, Copy, Debug)]
enum Format {
    Duration,
    LabelName,
    /// A label name, or the `...` wildcard which disables grouping.
    GroupByLabel,
    Time,
    WeekdayRange,
    DayOfMonthRange,
    MonthRange,
    YearRange,
}

impl Format {
    fn name(self) -> &'static str {
        match self {
            Self::Duration => "duration",
            Self::LabelName | Self::GroupByLabel => "label name",
            Self::Time => "time of day (HH:MM)",
            Self::WeekdayRange => "weekday range",
            Self::DayOfMonthRange => "day of month range",
            Self::MonthRange => "month range",
            Self::YearRange => "year range",
        }
    }

    fn matches(self, value: &str) -> bool {
        match self {
            // The regex alone would accept "".
            Self::Duration => !value.is_empty() && DURATION_REGEX.is_match(value),
            Self::LabelName => LABEL_NAME_REGEX.is_match(value),
            Self::GroupByLabel => value == "..." || LABEL_NAME_REGEX.is_match(value),
            Self::Time => TIME_REGEX.is_match(value),
            Self::WeekdayRange => WEEKDAY_RANGE_REGEX.is_match(value),
            Self::DayOfMonthRange => DAY_OF_MONTH_RANGE_REGEX.is_match(value),
            Self::MonthRange => MONTH_RANGE_REGEX.is_match(value),
            Self::YearRange => YEAR_RANGE_REGEX.is_match(value),
        }
    }
}

#[derive(Debug)]
enum Kind {
    String,
    Bool,
    Number,
    Format(Format),
    Enum(&'static [&'static str]),
    /// A mapping of arbitrary keys to strings.
    StringMap,
    /// A mapping of label names to strings (matchers, label values or regexes).
    LabelMap,
    Object(&'static Schema),
    Any,
}

#[derive(Debug)]
enum Shape {
    Single,
    List,
}

#[derive(Debug)]
struct Field {
    name: &'static str,
    kind: Kind,
    shape: Shape,
}

const fn one(name: &'static str, kind: Kind) -> Field {
    Field {
        name,
        kind,
        shape: Shape::Single,
    }
}

const fn list(name: &'static str, kind: Kind) -> Field {
    Field {
        name,
        kind,
        shape: Shape::List,
    }
}

const fn string(name: &'static str) -> Field {
    one(name, Kind::String)
}

const fn boolean(name: &'static str) -> Field {
    one(name, Kind::Bool)
}

const fn object(name: &'static str, schema: &'static Schema) -> Field {
    one(name, Kind::Object(schema))
}

/// The allowed shape of one mapping in the config tree.
#[derive(Debug)]
struct Schema {
    fields: &'static [Field],
    required: &'static [&'static str],
    /// Fields that must be non-empty lists when present.
    non_empty: &'static [&'static str],
    exactly_one_of: &'static [&'static [&'static str]],
    at_most_one_of: &'static [&'static [&'static str]],
    at_least_one_of: &'static [&'static [&'static str]],
    all_or_none: &'static [&'static [&'static str]],
}

impl Schema {
    const EMPTY: Self = Self {
        fields: &[],
        required: &[],
        non_empty: &[],
        exactly_one_of: &[],
        at_most_one_of: &[],
        at_least_one_of: &[],
        all_or_none: &[],
    };

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

static CONFIG: Schema = Schema {
    required: &["route", "receivers"],
    non_empty: &["receivers"],
    fields: &[
        object("global", &GLOBAL),
        object("route", &ROUTE),
        list("receivers", Kind::Object(&RECEIVER)),
        list("inhibit_rules", Kind::Object(&INHIBIT_RULE)),
        list("time_intervals", Kind::Object(&TIME_INTERVAL)),
        list("mute_time_intervals", Kind::Object(&TIME_INTERVAL)),
        list("templates", Kind::String),
    ],
    ..Schema::EMPTY
};

static GLOBAL: Schema = Schema {
    at_most_one_of: &[
        &["slack_api_url", "slack_api_url_file"],
        &["opsgenie_api_key", "opsgenie_api_key_file"],
        &["smtp_auth_password", "smtp_auth_password_file"],
    ],
    fields: &[
        object("http_config", &HTTP_CONFIG),
        one("resolve_timeout", Kind::Format(Format::Duration)),
        string("smtp_from"),
        string("smtp_smarthost"),
        string("smtp_hello"),
        string("smtp_auth_username"),
        string("smtp_auth_password"),
        string("smtp_auth_password_file"),
        string("smtp_auth_identity"),
        string("smtp_auth_secret"),
        boolean("smtp_require_tls"),
        string("slack_api_url"),
        string("slack_api_url_file"),
        string("victorops_api_key"),
        string("victorops_api_key_file"),
        string("victorops_api_url"),
        string("pagerduty_url"),
        string("opsgenie_api_key"),
        string("opsgenie_api_key_file"),
        string("opsgenie_api_url"),
        string("wechat_api_url"),
        string("wechat_api_secret"),
        string("wechat_api_corp_id"),
        string("telegram_api_url"),
        string("webex_api_url"),
    ],
    ..Schema::EMPTY
};

static HTTP_CONFIG: Schema = Schema {
    at_most_one_of: &[&["basic_auth", "authorization", "oauth2"]],
    fields: &[
        object("basic_auth", &BASIC_AUTH),
        object("authorization", &AUTHORIZATION),
        object("oauth2", &OAUTH2),
        string("proxy_url"),
        boolean("follow_redirects"),
        boolean("enable_http2"),
        object("tls_config", &TLS_CONFIG),
    ],
    ..Schema::EMPTY
};

static TLS_CONFIG: Schema = Schema {
    fields: &[
        string("ca_file"),
        string("cert_file"),
        string("key_file"),
        string("server_name"),
        boolean("insecure_skip_verify"),
        string("min_version"),
    ],
    ..Schema::EMPTY
};

static BASIC_AUTH: Schema = Schema {
    required: &["username"],
    exactly_one_of: &[&["password", "password_file"]],
    fields: &[
        string("username"),
        string("password"),
        string("password_file"),
    ],
    ..Schema::EMPTY
};

static AUTHORIZATION: Schema = Schema {
    exactly_one_of: &[&["credentials", "credentials_file"]],
    fields: &[
        string("type"),
        string("credentials"),
        string("credentials_file"),
    ],
    ..Schema::EMPTY
};

static OAUTH2: Schema = Schema {
    required: &["client_id", "token_url"],
    at_most_one_of: &[&["client_secret", "client_secret_file"]],
    fields: &[
        string("client_id"),
        string("client_secret"),
        string("client_secret_file"),
        list("scopes", Kind::String),
        string("token_url"),
        one("endpoint_params", Kind::StringMap),
    ],
    ..Schema::EMPTY
};

static ROUTE: Schema = Schema {
    fields: &[
        string("receiver"),
        list("group_by", Kind::Format(Format::GroupByLabel)),
        boolean("continue"),
        one("match", Kind::LabelMap),
        one("match_re", Kind::LabelMap),
        list("matchers", Kind::String),
        one("group_wait", Kind::Format(Format::Duration)),
        one("group_interval", Kind::Format(Format::Duration)),
        one("repeat_interval", Kind::Format(Format::Duration)),
        list("mute_time_intervals", Kind::String),
        list("active_time_intervals", Kind::String),
        list("routes", Kind::Object(&ROUTE)),
    ],
    ..Schema::EMPTY
};

static RECEIVER: Schema = Schema {
    required: &["name"],
    fields: &[
        string("name"),
        list("discord_configs", Kind::Object(&DISCORD_CONFIG)),
        list("email_configs", Kind::Object(&EMAIL_CONFIG)),
        list("msteams_configs", Kind::Object(&MSTEAMS_CONFIG)),
        list("opsgenie_configs", Kind::Object(&OPSGENIE_CONFIG)),
        list("pagerduty_configs", Kind::Object(&PAGERDUTY_CONFIG)),
        list("pushover_configs", Kind::Object(&PUSHOVER_CONFIG)),
        list("slack_configs", Kind::Object(&SLACK_CONFIG)),
        list("sns_configs", Kind::Object(&SNS_CONFIG)),
        list("telegram_configs", Kind::Object(&TELEGRAM_CONFIG)),
        list("victorops_configs", Kind::Object(&VICTOROPS_CONFIG)),
        list("webhook_configs", Kind::Object(&WEBHOOK_CONFIG)),
        list("wechat_configs", Kind::Object(&WECHAT_CONFIG)),
    ],
    ..Schema::EMPTY
};

static DISCORD_CONFIG: Schema = Schema {
    exactly_one_of: &[&["webhook_url", "webhook_url_file"]],
    fields: &[
        boolean("send_resolved"),
        string("webhook_url"),
        string("webhook_url_file"),
        string("title"),
        string("message"),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static EMAIL_CONFIG: Schema = Schema {
    required: &["to"],
    at_most_one_of: &[&["auth_password", "auth_password_file"]],
    fields: &[
        boolean("send_resolved"),
        string("to"),
        string("from"),
        string("smarthost"),
        string("hello"),
        string("auth_username"),
        string("auth_password"),
        string("auth_password_file"),
        string("auth_secret"),
        string("auth_identity"),
        boolean("require_tls"),
        object("tls_config", &TLS_CONFIG),
        string("html"),
        string("text"),
        one("headers", Kind::StringMap),
    ],
    ..Schema::EMPTY
};

static MSTEAMS_CONFIG: Schema = Schema {
    exactly_one_of: &[&["webhook_url", "webhook_url_file"]],
    fields: &[
        boolean("send_resolved"),
        string("webhook_url"),
        string("webhook_url_file"),
        string("title"),
        string("summary"),
        string("text"),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static OPSGENIE_CONFIG: Schema = Schema {
    at_most_one_of: &[&["api_key", "api_key_file"]],
    fields: &[
        boolean("send_resolved"),
        string("api_key"),
        string("api_key_file"),
        string("api_url"),
        string("message"),
        string("description"),
        string("source"),
        one("details", Kind::StringMap),
        list("responders", Kind::Object(&OPSGENIE_RESPONDER)),
        string("tags"),
        string("note"),
        one("priority", Kind::Enum(&["P1", "P2", "P3", "P4", "P5"])),
        boolean("update_alerts"),
        string("entity"),
        string("actions"),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static OPSGENIE_RESPONDER: Schema = Schema {
    required: &["type"],
    exactly_one_of: &[&["id", "name", "username"]],
    fields: &[
        string("id"),
        string("name"),
        string("username"),
        one(
            "type",
            Kind::Enum(&["team", "teams", "user", "escalation", "schedule"]),
        ),
    ],
    ..Schema::EMPTY
};

static PAGERDUTY_CONFIG: Schema = Schema {
    exactly_one_of: &[&[
        "routing_key",
        "routing_key_file",
        "service_key",
        "service_key_file",
    ]],
    fields: &[
        boolean("send_resolved"),
        string("routing_key"),
        string("routing_key_file"),
        string("service_key"),
        string("service_key_file"),
        string("url"),
        string("client"),
        string("client_url"),
        string("description"),
        string("severity"),
        one("details", Kind::StringMap),
        list("images", Kind::Object(&PAGERDUTY_IMAGE)),
        list("links", Kind::Object(&PAGERDUTY_LINK)),
        string("component"),
        string("group"),
        string("class"),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static PAGERDUTY_IMAGE: Schema = Schema {
    required: &["src"],
    fields: &[string("src"), string("alt"), string("href")],
    ..Schema::EMPTY
};

static PAGERDUTY_LINK: Schema = Schema {
    required: &["href"],
    fields: &[string("href"), string("text")],
    ..Schema::EMPTY
};

static PUSHOVER_CONFIG: Schema = Schema {
    exactly_one_of: &[&["user_key", "user_key_file"], &["token", "token_file"]],
    fields: &[
        boolean("send_resolved"),
        string("user_key"),
        string("user_key_file"),
        string("token"),
        string("token_file"),
        string("title"),
        string("message"),
        string("url"),
        string("priority"),
        one("retry", Kind::Format(Format::Duration)),
        one("expire", Kind::Format(Format::Duration)),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static SLACK_CONFIG: Schema = Schema {
    at_most_one_of: &[&["api_url", "api_url_file"]],
    fields: &[
        boolean("send_resolved"),
        string("api_url"),
        string("api_url_file"),
        string("channel"),
        string("icon_emoji"),
        string("icon_url"),
        boolean("link_names"),
        string("username"),
        list("actions", Kind::Object(&SLACK_ACTION)),
        string("callback_id"),
        string("color"),
        string("fallback"),
        list("fields", Kind::Object(&SLACK_FIELD)),
        string("footer"),
        list("mrkdwn_in", Kind::String),
        string("pretext"),
        boolean("short_fields"),
        string("text"),
        string("title"),
        string("title_link"),
        string("image_url"),
        string("thumb_url"),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static SLACK_ACTION: Schema = Schema {
    required: &["type", "text"],
    fields: &[
        string("type"),
        string("text"),
        string("url"),
        string("style"),
        string("name"),
        string("value"),
        one("confirm", Kind::Any),
    ],
    ..Schema::EMPTY
};

static SLACK_FIELD: Schema = Schema {
    required: &["title", "value"],
    fields: &[string("title"), string("value"), boolean("short")],
    ..Schema::EMPTY
};

static SNS_CONFIG: Schema = Schema {
    at_least_one_of: &[&["topic_arn", "phone_number", "target_arn"]],
    fields: &[
        boolean("send_resolved"),
        string("api_url"),
        object("sigv4", &SIGV4_CONFIG),
        string("topic_arn"),
        string("subject"),
        string("phone_number"),
        string("target_arn"),
        string("message"),
        one("attributes", Kind::StringMap),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static SIGV4_CONFIG: Schema = Schema {
    all_or_none: &[&["access_key", "secret_key"]],
    fields: &[
        string("region"),
        string("access_key"),
        string("secret_key"),
        string("profile"),
        string("role_arn"),
    ],
    ..Schema::EMPTY
};

static TELEGRAM_CONFIG: Schema = Schema {
    at_most_one_of: &[&["bot_token", "bot_token_file"]],
    fields: &[
        boolean("send_resolved"),
        string("api_url"),
        string("bot_token"),
        string("bot_token_file"),
        one("chat_id", Kind::Number),
        string("message"),
        boolean("disable_notifications"),
        one(
            "parse_mode",
            Kind::Enum(&["MarkdownV2", "Markdown", "HTML", ""]),
        ),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static VICTOROPS_CONFIG: Schema = Schema {
    required: &["routing_key"],
    at_most_one_of: &[&["api_key", "api_key_file"]],
    fields: &[
        boolean("send_resolved"),
        string("api_key"),
        string("api_key_file"),
        string("api_url"),
        string("routing_key"),
        string("message_type"),
        string("entity_display_name"),
        string("state_message"),
        string("monitoring_tool"),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static WEBHOOK_CONFIG: Schema = Schema {
    exactly_one_of: &[&["url", "url_file"]],
    fields: &[
        boolean("send_resolved"),
        string("url"),
        string("url_file"),
        one("max_alerts", Kind::Number),
        one("timeout", Kind::Format(Format::Duration)),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static WECHAT_CONFIG: Schema = Schema {
    fields: &[
        boolean("send_resolved"),
        string("api_secret"),
        string("api_url"),
        string("corp_id"),
        string("message"),
        one("message_type", Kind::Enum(&["text", "markdown"])),
        string("agent_id"),
        string("to_user"),
        string("to_party"),
        string("to_tag"),
        object("http_config", &HTTP_CONFIG),
    ],
    ..Schema::EMPTY
};

static INHIBIT_RULE: Schema = Schema {
    at_least_one_of: &[
        &["source_match", "source_match_re", "source_matchers"],
        &["target_match", "target_match_re", "target_matchers"],
    ],
    fields: &[
        one("source_match", Kind::LabelMap),
        one("source_match_re", Kind::LabelMap),
        list("source_matchers", Kind::String),
        one("target_match", Kind::LabelMap),
        one("target_match_re", Kind::LabelMap),
        list("target_matchers", Kind::String),
        list("equal", Kind::Format(Format::LabelName)),
    ],
    ..Schema::EMPTY
};

static TIME_INTERVAL: Schema = Schema {
    required: &["name", "time_intervals"],
    fields: &[
        string("name"),
        list("time_intervals", Kind::Object(&TIME_INTERVAL_DEFINITION)),
    ],
    ..Schema::EMPTY
};

static TIME_INTERVAL_DEFINITION: Schema = Schema {
    fields: &[
        list("times", Kind::Object(&TIME_RANGE)),
        list("weekdays", Kind::Format(Format::WeekdayRange)),
        list("days_of_month", Kind::Format(Format::DayOfMonthRange)),
        list("months", Kind::Format(Format::MonthRange)),
        list("years", Kind::Format(Format::YearRange)),
        string("location"),
    ],
    ..Schema::EMPTY
};

static TIME_RANGE: Schema = Schema {
    required: &["start_time", "end_time"],
    fields: &[
        one("start_time", Kind::Format(Format::Time)),
        one("end_time", Kind::Format(Format::Time)),
    ],
    ..Schema::EMPTY
};

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

/// `null` counts as unset, the same way Alertmanager treats an empty YAML value.
fn is_set(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).is_some_and(|value| !value.is_null())
}

#[derive(Default)]
struct Validator {
    errors: Vec<Error>,
}

impl Validator {
    fn finish(self) -> Result {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Errors(self.errors))
        }
    }

    fn wrong_type(&mut self, path: &str, expected: &'static str, found: &Value) {
        self.errors.push(Error::WrongType {
            path: path.to_owned(),
            expected,
            found: type_name(found),
        });
    }

    fn object(&mut self, path: &str, map: &Map<String, Value>, schema: &Schema) {
        for (key, value) in map {
            let field_path = join(path, key);
            match schema.field(key) {
                Some(_) if value.is_null() => {}
                Some(field) => self.field(&field_path, value, field),
                None => self.errors.push(Error::UnknownField { path: field_path }),
            }
        }

        for field in schema.required {
            if !is_set(map, field) {
                self.errors.push(Error::MissingField {
                    path: join(path, field),
                });
            }
        }

        for field in schema.non_empty {
            if map
                .get(*field)
                .and_then(Value::as_array)
                .is_some_and(Vec::is_empty)
            {
                self.errors.push(Error::EmptyList {
                    path: join(path, field),
                });
            }
        }

        let count = |group: &[&str]| group.iter().filter(|field| is_set(map, field)).count();
        let group_path = || if path.is_empty() { "<root>" } else { path }.to_owned();

        for &group in schema.exactly_one_of {
            if count(group) != 1 {
                self.errors.push(Error::ExactlyOneOf {
                    path: group_path(),
                    fields: group,
                });
            }
        }
        for &group in schema.at_most_one_of {
            if count(group) > 1 {
                self.errors.push(Error::MutuallyExclusive {
                    path: group_path(),
                    fields: group,
                });
            }
        }
        for &group in schema.at_least_one_of {
            if count(group) == 0 {
                self.errors.push(Error::AtLeastOneOf {
                    path: group_path(),
                    fields: group,
                });
            }
        }
        for &group in schema.all_or_none {
            let count = count(group);
            if count != 0 && count != group.len() {
                self.errors.push(Error::SetTogether {
                    path: group_path(),
                    fields: group,
                });
            }
        }
    }

    fn field(&mut self, path: &str, value: &Value, field: &Field) {
        match field.shape {
            Shape::Single => self.value(path, value, &field.kind),
            Shape::List => {
                let Some(items) = value.as_array() else {
                    self.wrong_type(path, "a list", value);
                    return;
                };
                for (index, item) in items.iter().enumerate() {
                    self.value(&format!("{path}[{index}]"), item, &field.kind);
                }
            }
        }
    }

    fn value(&mut self, path: &str, value: &Value, kind: &Kind) {
        match *kind {
            Kind::Any => {}
            Kind::String => {
                if !value.is_string() {
                    self.wrong_type(path, "a string", value);
                }
            }
            Kind::Bool => {
                if !value.is_boolean() {
                    self.wrong_type(path, "a boolean", value);
                }
            }
            Kind::Number => {
                if !value.is_number() {
                    self.wrong_type(path, "a number", value);
                }
            }
            Kind::Format(format) => match value.as_str() {
                Some(text) if format.matches(text) => {}
                Some(text) => self.errors.push(Error::InvalidFormat {
                    path: path.to_owned(),
                    value: text.to_owned(),
                    format: format.name(),
                }),
                None => self.wrong_type(path, "a string", value),
            },
            Kind::Enum(allowed) => match value.as_str() {
                Some(text) if allowed.contains(&text) => {}
                Some(text) => self.errors.push(Error::NotAllowed {
                    path: path.to_owned(),
                    value: text.to_owned(),
                    allowed,
                }),
                None => self.wrong_type(path, "a string", value),
            },
            Kind::StringMap | Kind::LabelMap => {
                let Some(map) = value.as_object() else {
                    self.wrong_type(path, "a mapping", value);
                    return;
                };
                for (key, value) in map {
                    let entry_path = join(path, key);
                    if matches!(kind, Kind::LabelMap) && !LABEL_NAME_REGEX.is_match(key) {
                        self.errors.push(Error::InvalidFormat {
                            path: entry_path.clone(),
                            value: key.clone(),
                            format: Format::LabelName.name(),
                        });
                    }
                    if !value.is_string() {
                        self.wrong_type(&entry_path, "a string", value);
                    }
                }
            }
            Kind::Object(schema) => match value.as_object() {
                Some(map) => self.object(path, map, schema),
                None => self.wrong_type(path, "a mapping", value),
            },
        }
    }

    fn receiver_references(&mut self, config: &RawConfig) {
        let mut defined = BTreeSet::new();
        for receiver in config
            .get("receivers")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(name) = receiver.get("name").and_then(Value::as_str) {
                if !defined.insert(name) {
                    self.errors.push(Error::DuplicateReceiver {
                        name: name.to_owned(),
                    });
                }
            }
        }

        if let Some(route) = config.get("route") {
            self.route_receivers("route", route, &defined);
        }
    }

    fn route_receivers(&mut self, path: &str, route: &Value, defined: &BTreeSet<&str>) {
        if let Some(receiver) = route.get("receiver").and_then(Value::as_str) {
            if !defined.contains(receiver) {
                self.errors.push(Error::UndefinedReceiver {
                    path: join(path, "receiver"),
                    receiver: receiver.to_owned(),
                });
            }
        } else if path == "route" && route.is_object() {
            self.errors.push(Error::MissingField {
                path: join(path, "receiver"),
            });
        }

        for (index, child) in route
            .get("routes")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
        {
            self.route_receivers(&format!("{path}.routes[{index}]"), child, defined);
        }
    }

    fn time_interval_references(&mut self, config: &RawConfig) {
        let defined: BTreeSet<&str> = ["time_intervals", "mute_time_intervals"]
            .into_iter()
            .filter_map(|key| config.get(key).and_then(Value::as_array))
            .flatten()
            .filter_map(|interval| interval.get("name").and_then(Value::as_str))
            .collect();

        if let Some(route) = config.get("route") {
            self.route_time_intervals("route", route, &defined);
        }
    }

    fn route_time_intervals(&mut self, path: &str, route: &Value, defined: &BTreeSet<&str>) {
        for key in ["mute_time_intervals", "active_time_intervals"] {
            for (index, name) in route
                .get(key)
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .enumerate()
            {
                if let Some(name) = name.as_str() {
                    if !defined.contains(name) {
                        self.errors.push(Error::UndefinedTimeInterval {
                            path: format!("{path}.{key}[{index}]"),
                            name: name.to_owned(),
                        });
                    }
                }
            }
        }

        for (index, child) in route
            .get("routes")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
        {
            self.route_time_intervals(&format!("{path}.routes[{index}]"), child, defined);
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    fn config(yaml: &str) -> RawConfig {
        RawConfig::from_yaml(yaml).expect("test YAML is valid")
    }

    fn errors(yaml: &str) -> Vec<Error> {
        validate(&config(yaml))
            .expect_err("config is invalid")
            .into_iter()
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        validate(&RawConfig::default_config()).expect("default config is valid");
    }

    #[test]
    fn complex_config_is_valid() {
        let config = config(indoc! {r#"
            global:
              resolve_timeout: 5m
              http_config:
                basic_auth:
                  username: admin
                  password_file: /etc/secrets/password
                tls_config:
                  insecure_skip_verify: false
            route:
              receiver: team-pager
              group_by: ['...']
              group_wait: 30s
              group_interval: 1h30m
              repeat_interval: 4h
              routes:
                - receiver: team-mail
                  matchers: ['severity="warning"']
                  mute_time_intervals: [offhours]
                  continue: true
                - receiver: team-pager
                  match_re:
                    service: ^(foo1|foo2|baz)$
            receivers:
              - name: team-pager
                pagerduty_configs:
                  - routing_key: abc
                    severity: '{{ .CommonLabels.severity }}'
                    details:
                      summary: '{{ .CommonAnnotations.summary }}'
              - name: team-mail
                email_configs:
                  - to: team@example.org
                    headers:
                      Subject: alert
                webhook_configs:
                  - url: http://127.0.0.1:5001/
                    max_alerts: 10
            inhibit_rules:
              - source_matchers: ['severity="critical"']
                target_matchers: ['severity="warning"']
                equal: [alertname, cluster]
            time_intervals:
              - name: offhours
                time_intervals:
                  - times:
                      - start_time: '17:00'
                        end_time: '24:00'
                    weekdays: ['monday:friday']
                    days_of_month: ['1:15', '-3:-1']
                    months: ['January:march', '12']
                    years: ['2024:2030']
            templates: []
        "#});

        validate(&config).expect("config is valid");
    }

    #[test]
    fn empty_config_is_invalid() {
        assert_eq!(errors(""), vec![Error::EmptyConfig]);
    }

    #[test]
    fn unknown_top_level_key() {
        let errors = errors(r#"{"some": "invalid_config"}"#);
        assert!(errors.contains(&Error::UnknownField {
            path: "some".to_owned()
        }));
        assert!(errors.contains(&Error::MissingField {
            path: "route".to_owned()
        }));
        assert!(errors.contains(&Error::MissingField {
            path: "receivers".to_owned()
        }));
    }

    #[test]
    fn root_route_requires_receiver() {
        let errors = errors(indoc! {"
            route:
              group_wait: 30s
            receivers:
              - name: dummy
        "});
        assert_eq!(errors, vec![Error::MissingField {
            path: "route.receiver".to_owned()
        }]);
    }

    #[test]
    fn empty_receivers_are_rejected() {
        let errors = errors(indoc! {"
            route:
              receiver: dummy
            receivers: []
        "});
        assert!(errors.contains(&Error::EmptyList {
            path: "receivers".to_owned()
        }));
        assert!(errors.contains(&Error::UndefinedReceiver {
            path: "route.receiver".to_owned(),
            receiver: "dummy".to_owned()
        }));
    }

    #[test]
    fn nested_route_references_are_checked() {
        let errors = errors(indoc! {"
            route:
              receiver: dummy
              routes:
                - receiver: dummy
                  routes:
                    - receiver: missing
                      active_time_intervals: [weekends]
            receivers:
              - name: dummy
              - name: dummy
        "});

        assert_eq!(errors, vec![
            Error::DuplicateReceiver {
                name: "dummy".to_owned()
            },
            Error::UndefinedReceiver {
                path: "route.routes[0].routes[0].receiver".to_owned(),
                receiver: "missing".to_owned()
            },
            Error::UndefinedTimeInterval {
                path: "route.routes[0].routes[0].active_time_intervals[0]".to_owned(),
                name: "weekends".to_owned()
            },
        ]);
    }

    #[rstest]
    #[case::neither("webhook_configs: [{send_resolved: true}]")]
    #[case::both("webhook_configs: [{url: 'http://a', url_file: /b}]")]
    #[case::pagerduty_neither("pagerduty_configs: [{severity: critical}]")]
    #[case::pagerduty_both("pagerduty_configs: [{routing_key: a, service_key: b}]")]
    #[case::discord("discord_configs: [{title: t}]")]
    fn exactly_one_of_is_enforced(#[case] integration: &str) {
        let errors = errors(&format!(
            "route: {{receiver: dummy}}\nreceivers:\n  - name: dummy\n    {integration}\n"
        ));
        assert!(
            matches!(errors.as_slice(), [Error::ExactlyOneOf { .. }]),
            "{errors:?}"
        );
    }

    #[test]
    fn nested_integration_items_are_checked() {
        let errors = errors(indoc! {"
            route:
              receiver: dummy
            receivers:
              - name: dummy
                pagerduty_configs:
                  - routing_key: abc
                    images: [{alt: logo}]
                    links: [{href: 'http://example.org', text: docs}]
                slack_configs:
                  - channel: '#alerts'
                    fields: [{title: t, short: true}]
        "});

        assert_eq!(errors, vec![
            Error::MissingField {
                path: "receivers[0].pagerduty_configs[0].images[0].src".to_owned()
            },
            Error::MissingField {
                path: "receivers[0].slack_configs[0].fields[0].value".to_owned()
            },
        ]);
    }

    #[rstest]
    #[case("30s", true)]
    #[case("1h30m", true)]
    #[case("1y2w3d4h5m6s7ms", true)]
    #[case("250ms", true)]
    #[case("0", true)]
    #[case("", false)]
    #[case("5 minutes", false)]
    #[case("1.5h", false)]
    #[case("m5", false)]
    fn durations(#[case] input: &str, #[case] valid: bool) {
        assert_eq!(Format::Duration.matches(input), valid);
    }

    #[rstest]
    #[case(Format::Time, "00:00", true)]
    #[case(Format::Time, "23:59", true)]
    #[case(Format::Time, "24:00", true)]
    #[case(Format::Time, "24:01", false)]
    #[case(Format::Time, "9:00", false)]
    #[case(Format::WeekdayRange, "Monday", true)]
    #[case(Format::WeekdayRange, "monday:FRIDAY", true)]
    #[case(Format::WeekdayRange, "mon", false)]
    #[case(Format::DayOfMonthRange, "1:31", true)]
    #[case(Format::DayOfMonthRange, "-7:-1", true)]
    #[case(Format::DayOfMonthRange, "32", false)]
    #[case(Format::MonthRange, "1:12", true)]
    #[case(Format::MonthRange, "may:August", true)]
    #[case(Format::MonthRange, "13", false)]
    #[case(Format::YearRange, "2020:2025", true)]
    #[case(Format::YearRange, "1999", false)]
    #[case(Format::GroupByLabel, "...", true)]
    #[case(Format::GroupByLabel, "juju_model", true)]
    #[case(Format::LabelName, "...", false)]
    #[case(Format::LabelName, "0abc", false)]
    fn formats(#[case] format: Format, #[case] input: &str, #[case] valid: bool) {
        assert_eq!(format.matches(input), valid, "{input:?} as {format:?}");
    }

    #[test]
    fn wrong_types_report_their_path() {
        let errors = errors(indoc! {"
            route:
              receiver: dummy
              group_wait: 30
              continue: 'yes'
            receivers:
              - name: dummy
                telegram_configs:
                  - chat_id: '123'
                    parse_mode: Markdown
        "});

        assert_eq!(errors, vec![
            Error::WrongType {
                path: "receivers[0].telegram_configs[0].chat_id".to_owned(),
                expected: "a number",
                found: "a string"
            },
            Error::WrongType {
                path: "route.continue".to_owned(),
                expected: "a boolean",
                found: "a string"
            },
            Error::WrongType {
                path: "route.group_wait".to_owned(),
                expected: "a string",
                found: "a number"
            },
        ]);
    }

    #[test]
    fn mutually_exclusive_auth() {
        let errors = errors(indoc! {"
            global:
              http_config:
                basic_auth: {username: a, password: b}
                authorization: {credentials: c}
            route: {receiver: dummy}
            receivers: [{name: dummy}]
        "});
        assert_eq!(errors, vec![Error::MutuallyExclusive {
            path: "global.http_config".to_owned(),
            fields: &["basic_auth", "authorization", "oauth2"]
        }]);
    }

    #[test]
    fn label_maps_require_label_names() {
        let errors = errors(indoc! {"
            route:
              receiver: dummy
              match:
                bad-label: x
            receivers: [{name: dummy}]
        "});
        assert_eq!(errors, vec![Error::InvalidFormat {
            path: "route.match.bad-label".to_owned(),
            value: "bad-label".to_owned(),
            format: "label name"
        }]);
    }

    #[test]
    fn inhibit_rules_need_source_and_target() {
        let errors = errors(indoc! {"
            route: {receiver: dummy}
            receivers: [{name: dummy}]
            inhibit_rules:
              - equal: [alertname]
        "});
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn errors_display_joined() {
        let errors = validate(&config("route: {}\nreceivers: [{}]")).expect_err("invalid");
        assert_eq!(
            errors.to_string(),
            "receivers[0].name: missing required field, route.receiver: missing required field"
        );
    }

    #[rstest]
    #[case("route: {receiver: a}\nreceivers: [{name: a}]", true)]
    #[case("global: {}\ninhibit_rules: []\ntime_intervals: []", true)]
    #[case("route: {receiver: a}\ntemplates: [/a.tmpl]", false)]
    #[case("some: invalid_config", false)]
    fn main_keys(#[case] input: &str, #[case] valid: bool) {
        assert_eq!(validate_main_keys(&config(input)).is_ok(), valid);
    }
}
