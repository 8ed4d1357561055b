use crate::subsystems::Subsystem;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MiddlewareConfig {
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub store: StoreConf,
    pub pool_size: usize,
    pub sensor_interval_secs: u64,
    pub history_key: HistoryKey,
    /// Threshold overrides, e.g. `cooling: 28`
    pub limits: HashMap<Subsystem, f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    pub connect_attempts: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConf {
    /// JSON-lines history file; `null` keeps history in memory only
    pub path: Option<String>,
}

/// Which key history records are written and recovered under.
///
/// `Instance` uses the role-qualified controller name, so a promoted standby
/// looks up a name that never wrote anything and recovers nothing.
/// `Subsystem` uses the stable subsystem key and carries state across failovers.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKey {
    #[default]
    Instance,
    Subsystem,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            http: HttpConf::default(),
            store: StoreConf::default(),
            pool_size: 3,
            sensor_interval_secs: 30,
            history_key: HistoryKey::Instance,
            limits: HashMap::new(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            keep_alive_secs: 15,
            connect_timeout_ms: 5000,
            connect_attempts: 5,
            retry_backoff_ms: 500,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:18812".into() }
    }
}

impl Default for StoreConf {
    fn default() -> Self {
        Self { path: Some("./data/history.jsonl".into()) }
    }
}

impl MqttConf {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl MiddlewareConfig {
    pub fn sensor_interval(&self) -> Duration {
        Duration::from_secs(self.sensor_interval_secs.max(1))
    }

    /// Parses YAML; blank text yields the defaults.
    pub fn from_yaml(txt: &str) -> Result<Self, serde_yaml::Error> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt)
    }

    /// `AGRO_MQTT_HOST`, `AGRO_MQTT_PORT` and `AGRO_HTTP_BIND` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("AGRO_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Ok(port) = std::env::var("AGRO_MQTT_PORT") {
            match port.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => warn!(%port, "AGRO_MQTT_PORT is not a port number, ignored"),
            }
        }
        if let Ok(bind) = std::env::var("AGRO_HTTP_BIND") {
            self.http.bind = bind;
        }
    }
}

pub async fn load_config() -> MiddlewareConfig {
    let path = std::env::var("AGRO_MIDDLEWARE_CONFIG").unwrap_or_else(|_| "middleware.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        MiddlewareConfig::from_yaml(&txt).unwrap_or_else(|e| {
            warn!(%path, error = %e, "invalid config, using defaults");
            MiddlewareConfig::default()
        })
    } else {
        info!(%path, "no config file, using defaults");
        MiddlewareConfig::default()
    };
    cfg.apply_env_overrides();
    cfg
}
