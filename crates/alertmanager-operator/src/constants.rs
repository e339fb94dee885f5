pub const SERVICE_NAME: &str = "alertmanager";
pub const LAYER_NAME: &str = "alertmanager";
pub const EXE_NAME: &str = "alertmanager";
pub const AMTOOL_PATH: &str = "/usr/bin/amtool";

pub const API_PORT: u16 = 9093;
/// The cluster (gossip) port. All replicas listen on the same one.
pub const HA_PORT: u16 = 9094;

pub const CONFIG_PATH: &str = "/etc/alertmanager/alertmanager.yml";
pub const WEB_CONFIG_PATH: &str = "/etc/alertmanager/alertmanager-web-config.yml";
pub const TEMPLATES_PATH: &str = "/etc/alertmanager/templates.tmpl";
pub const AMTOOL_CONFIG_PATH: &str = "/etc/amtool/config.yml";
/// Holds alertmanager data such as `nflogs` and `silences`.
pub const STORAGE_PATH: &str = "/alertmanager";

pub const SERVER_CERT_PATH: &str = "/etc/alertmanager/alertmanager.cert.pem";
pub const KEY_PATH: &str = "/etc/alertmanager/alertmanager.key.pem";
pub const CA_CERT_PATH: &str = "/usr/local/share/ca-certificates/cos-ca.crt";

pub const REMOTE_CONFIG_KEY: &str = "alertmanager_config";
pub const REMOTE_TEMPLATES_KEY: &str = "alertmanager_templates";

pub const APP_NAME: &str = "alertmanager-operator";
pub const LOG_ENV: &str = "ALERTMANAGER_OPERATOR_LOG";
