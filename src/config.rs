#![forbid(unsafe_code)]

use crate::error::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Top-level configuration. Loaded from a YAML file plus `CAUSEWAY__`
/// environment overrides; immutable after `load`.
#[derive(Debug, Clone, Deserialize)]
pub struct CausewayConfig {
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
    #[serde(default = "default_startup_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_startup_timeout_ms(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Retention window for correlated replies, independent of (and typically
    /// longer than) any single route's reply timeout.
    #[serde(default = "default_cache_expire_ms")]
    pub expire_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expire_ms: default_cache_expire_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub schema_registry_url: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// One configured endpoint: an HTTP path bound to a request channel and,
/// optionally, a response channel to await a correlated reply on.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub subject: Option<SubjectConfig>,
    pub request: ChannelConfig,
    #[serde(default)]
    pub response: Option<ChannelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub path: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub response: Option<ResponseConfig>,
}

/// Rendered when a route has no response channel, and used as the status and
/// content-type base when a reply is awaited.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseConfig {
    #[serde(default = "default_http_code")]
    pub http_code: u16,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub body: String,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            http_code: default_http_code(),
            content_type: default_content_type(),
            body: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubjectConfig {
    pub name: String,
    /// Version 0 means "latest".
    #[serde(default = "default_subject_version")]
    pub version: i32,
}

/// A broker topic plus its serialization and timing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub topic: String,
    #[serde(default = "default_serializer")]
    pub serializer: SerializerKind,
    #[serde(default = "generated_id")]
    pub client_id: String,
    #[serde(default = "generated_id")]
    pub group_id: String,
    #[serde(default = "default_channel_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub acks: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    Avro,
    Json,
}

impl SerializerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SerializerKind::Avro => "avro",
            SerializerKind::Json => "json",
        }
    }
}

impl CausewayConfig {
    /// Load from the default location (`config/causeway.yaml`), an explicit
    /// path, and `CAUSEWAY__` environment variables, in ascending precedence.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::with_name("config/causeway").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Yaml));
        }

        let config: CausewayConfig = builder
            .add_source(Environment::with_prefix("CAUSEWAY").separator("__"))
            .build()
            .map_err(|err| Error::Config(err.to_string()))?
            .try_deserialize()
            .map_err(|err| Error::Config(err.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Route-table invariants, checked once before any component starts.
    pub fn validate(&self) -> Result<()> {
        if self.routes.is_empty() {
            return Err(Error::Config("route table is empty".to_string()));
        }

        let mut seen_paths = HashSet::new();
        for route in &self.routes {
            let path = &route.endpoint.path;

            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "route `{}`: path `{path}` must start with '/'",
                    route.name
                )));
            }
            if !seen_paths.insert(path.clone()) {
                return Err(Error::Config(format!(
                    "route `{}`: path `{path}` is declared more than once",
                    route.name
                )));
            }
            if route.endpoint.methods.is_empty() {
                return Err(Error::Config(format!(
                    "route `{}`: methods must not be empty",
                    route.name
                )));
            }

            validate_channel(&route.name, "request", &route.request)?;
            if let Some(response) = &route.response {
                validate_channel(&route.name, "response", response)?;
                if response.serializer == SerializerKind::Avro && route.subject.is_none() {
                    return Err(Error::Config(format!(
                        "route `{}`: response channel uses the avro serializer but the route \
                         declares no subject",
                        route.name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn route_by_path(&self, path: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|route| route.endpoint.path == path)
    }
}

fn validate_channel(route: &str, role: &str, channel: &ChannelConfig) -> Result<()> {
    if channel.topic.is_empty() {
        return Err(Error::Config(format!(
            "route `{route}`: {role} channel topic must not be empty"
        )));
    }
    if channel.timeout_ms < 1 {
        return Err(Error::Config(format!(
            "route `{route}`: {role} channel timeout_ms must be >= 1"
        )));
    }
    Ok(())
}

fn default_startup_timeout_ms() -> u64 {
    45_000
}

fn default_check_interval_ms() -> u64 {
    1000
}

fn default_channel_timeout_ms() -> u64 {
    1000
}

fn default_cache_expire_ms() -> u64 {
    15_000
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_methods() -> Vec<String> {
    vec!["post".to_string()]
}

fn default_http_code() -> u16 {
    200
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_subject_version() -> i32 {
    1
}

fn default_serializer() -> SerializerKind {
    SerializerKind::Avro
}

fn generated_id() -> String {
    Uuid::new_v4().to_string()
}
