//! Configuration management for the gateway.
//!
//! Route configuration is a JSON document mapping namespaces to provider entries. It comes
//! from the `CONFIG` environment variable or from a file named by `CONFIG_FILE` (with
//! `${VAR}` expansion). Server settings are read from the environment with the `config`
//! crate. Everything is loaded once at startup and validated as a whole.

use crate::core::error::ConfigError;
use regex::Regex;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::sync::OnceLock;

/// Namespace that is omitted from advertised model ids.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    /// Plain bearer tokens accepted by the protected endpoints
    pub api_keys: Vec<String>,
}

impl AppConfig {
    /// Load the full configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server = ServerConfig::from_env()?;
        let gateway = GatewayConfig::from_env()?;
        let raw_keys =
            std::env::var("API_KEY_LIST").map_err(|_| ConfigError::MissingEnv("API_KEY_LIST"))?;
        let api_keys = parse_api_key_list(&raw_keys)?;

        Ok(Self {
            server,
            gateway,
            api_keys,
        })
    }
}

/// Server-specific configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Tokio worker threads; detected from the cgroup CPU quota when unset
    #[serde(default)]
    pub workers: Option<usize>,

    /// Upstream transport timeout in seconds
    pub request_timeout_secs: u64,

    /// Whether to verify SSL certificates for upstream requests
    pub verify_ssl: bool,

    /// Directory for hourly access log files
    pub access_log_dir: String,

    /// Whether access records are also written to files
    pub access_log_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            request_timeout_secs: default_request_timeout(),
            verify_ssl: true,
            access_log_dir: default_access_log_dir(),
            access_log_enabled: true,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout() -> u64 {
    600
}

fn default_access_log_dir() -> String {
    "logs".to_string()
}

impl ServerConfig {
    /// Read `HOST`, `PORT`, `WORKERS`, `REQUEST_TIMEOUT_SECS`, `VERIFY_SSL`,
    /// `ACCESS_LOG_DIR` and `ACCESS_LOG_ENABLED` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    pub fn from_environment(environment: config::Environment) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .set_default("host", default_host())?
            .set_default("port", i64::from(default_port()))?
            .set_default("request_timeout_secs", default_request_timeout() as i64)?
            .set_default("verify_ssl", true)?
            .set_default("access_log_dir", default_access_log_dir())?
            .set_default("access_log_enabled", true)?
            .add_source(environment.try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Split a comma-separated token list, trimming whitespace and dropping empty entries.
pub fn parse_api_key_list(raw: &str) -> Result<Vec<String>, ConfigError> {
    let keys: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();

    if keys.is_empty() {
        return Err(ConfigError::Invalid(
            "API_KEY_LIST must contain at least one token".to_string(),
        ));
    }
    Ok(keys)
}

// ============================================================================
// Route configuration
// ============================================================================

/// Validated namespace → providers mapping, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub namespaces: Vec<NamespaceConfig>,
}

#[derive(Debug, Clone)]
pub struct NamespaceConfig {
    pub name: String,
    pub providers: Vec<ProviderConfig>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGatewayConfig {
    #[serde(alias = "config")]
    namespace: OrderedMap<Vec<ProviderConfig>>,
}

/// One provider entry, discriminated by its `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// A single endpoint/credential pair; the upstream style follows from the fields given
    Direct(DirectConfig),

    /// A single OpenAI-compatible endpoint; `base_url` is required
    #[serde(rename = "openai")]
    OpenAi(DirectConfig),

    /// A single Azure OpenAI resource; `azure_endpoint` and `api_version` are required
    Azure(DirectConfig),

    /// Several credentials sharing one base URL, picked per call by weight
    #[serde(alias = "key_pool")]
    WeightedPool(PoolConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectConfig {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub azure_endpoint: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(alias = "model_list")]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    pub base_url: String,
    pub api_keys: PoolKeys,
    #[serde(alias = "model_list")]
    pub models: Vec<String>,
}

/// Accepted spellings of a pool's credential list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PoolKeys {
    /// `["k1", {"api_key": "k2", "weight": 3}]`
    List(Vec<PoolKey>),
    /// `{"k1": 1, "k2": 3}`
    Weighted(OrderedMap<i64>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PoolKey {
    Plain(String),
    Weighted { api_key: String, weight: i64 },
}

/// Which `type` tag declared a direct entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectFlavor {
    /// `direct`: OpenAI or Azure, decided by which fields are present
    Any,
    OpenAi,
    Azure,
}

/// Where a direct provider sends its requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamTarget {
    OpenAi {
        base_url: String,
    },
    Azure {
        endpoint: String,
        api_version: String,
    },
}

impl GatewayConfig {
    /// Load from `CONFIG`, falling back to the file named by `CONFIG_FILE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(text) = std::env::var("CONFIG") {
            return Self::from_json(&text);
        }
        if let Ok(path) = std::env::var("CONFIG_FILE") {
            return Self::load(&path);
        }
        Err(ConfigError::MissingEnv("CONFIG"))
    }

    /// Load a JSON file, expanding `${VAR}` references first.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&expand_env_vars(&content))
    }

    /// Parse and validate. Either the whole document is accepted or nothing is.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: RawGatewayConfig = serde_json::from_str(text)?;
        let config = GatewayConfig {
            namespaces: raw
                .namespace
                .0
                .into_iter()
                .map(|(name, providers)| NamespaceConfig { name, providers })
                .collect(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for namespace in &self.namespaces {
            if namespace.name.is_empty() || namespace.name.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "namespace name `{}` must be non-empty and must not contain `/`",
                    namespace.name
                )));
            }

            for (index, provider) in namespace.providers.iter().enumerate() {
                let invalid = |reason: String| ConfigError::InvalidProvider {
                    namespace: namespace.name.clone(),
                    index,
                    reason,
                };

                provider.validate().map_err(invalid)?;

                // Bare ids are split on the first `/`, so these could never be reached.
                if namespace.name == DEFAULT_NAMESPACE {
                    if let Some(model) = provider.models().iter().find(|m| m.contains('/')) {
                        return Err(invalid(format!(
                            "model `{}` in the default namespace must not contain `/`",
                            model
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl ProviderConfig {
    pub fn models(&self) -> &[String] {
        match self {
            ProviderConfig::Direct(c) | ProviderConfig::OpenAi(c) | ProviderConfig::Azure(c) => {
                &c.models
            }
            ProviderConfig::WeightedPool(c) => &c.models,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProviderConfig::Direct(_) | ProviderConfig::OpenAi(_) | ProviderConfig::Azure(_) => {
                "direct"
            }
            ProviderConfig::WeightedPool(_) => "weighted_pool",
        }
    }

    fn validate(&self) -> Result<(), String> {
        let models = self.models();
        if models.is_empty() {
            return Err("at least one model is required".to_string());
        }
        let mut seen = HashSet::new();
        for model in models {
            if model.is_empty() {
                return Err("model names must not be empty".to_string());
            }
            if !seen.insert(model.as_str()) {
                return Err(format!("model `{}` is declared twice", model));
            }
        }

        match self {
            ProviderConfig::Direct(c) => c.target(DirectFlavor::Any).map(|_| ()),
            ProviderConfig::OpenAi(c) => c.target(DirectFlavor::OpenAi).map(|_| ()),
            ProviderConfig::Azure(c) => c.target(DirectFlavor::Azure).map(|_| ()),
            ProviderConfig::WeightedPool(c) => c.members().map(|_| ()),
        }
    }
}

impl DirectConfig {
    /// Resolve the upstream target, holding the entry to the fields its tag requires.
    pub fn target(&self, flavor: DirectFlavor) -> Result<UpstreamTarget, String> {
        match flavor {
            DirectFlavor::Any => {}
            DirectFlavor::OpenAi => {
                if self.base_url.is_none() {
                    return Err("`base_url` is required for type `openai`".to_string());
                }
                if self.azure_endpoint.is_some() {
                    return Err("`azure_endpoint` is not allowed for type `openai`".to_string());
                }
            }
            DirectFlavor::Azure => {
                if self.azure_endpoint.is_none() {
                    return Err("`azure_endpoint` is required for type `azure`".to_string());
                }
                if self.base_url.is_some() {
                    return Err("`base_url` is not allowed for type `azure`".to_string());
                }
            }
        }

        match (&self.base_url, &self.azure_endpoint) {
            (Some(base_url), None) => Ok(UpstreamTarget::OpenAi {
                base_url: base_url.clone(),
            }),
            (None, Some(endpoint)) => {
                let api_version = self
                    .api_version
                    .clone()
                    .ok_or_else(|| "`api_version` is required with `azure_endpoint`".to_string())?;
                Ok(UpstreamTarget::Azure {
                    endpoint: endpoint.clone(),
                    api_version,
                })
            }
            (Some(_), Some(_)) => {
                Err("`base_url` and `azure_endpoint` are mutually exclusive".to_string())
            }
            (None, None) => Err("one of `base_url` or `azure_endpoint` is required".to_string()),
        }
    }
}

impl PoolConfig {
    /// Credentials with their weights, in declaration order.
    pub fn members(&self) -> Result<Vec<(String, u32)>, String> {
        let raw: Vec<(String, i64)> = match &self.api_keys {
            PoolKeys::List(keys) => keys
                .iter()
                .map(|k| match k {
                    PoolKey::Plain(key) => (key.clone(), 1),
                    PoolKey::Weighted { api_key, weight } => (api_key.clone(), *weight),
                })
                .collect(),
            PoolKeys::Weighted(map) => map.0.clone(),
        };

        if raw.is_empty() {
            return Err("a weighted pool needs at least one api key".to_string());
        }

        let members: Vec<(String, u32)> = raw
            .into_iter()
            .map(|(key, weight)| {
                if weight <= 0 {
                    return Err(format!("weight must be a positive integer, got {}", weight));
                }
                let weight = u32::try_from(weight)
                    .map_err(|_| format!("weight {} is too large", weight))?;
                Ok((key, weight))
            })
            .collect::<Result<_, String>>()?;

        // Selection sums the weights in u32.
        members
            .iter()
            .try_fold(0u32, |total, (_, weight)| total.checked_add(*weight))
            .ok_or_else(|| format!("total pool weight exceeds {}", u32::MAX))?;

        Ok(members)
    }
}

/// A JSON object kept in document order. Duplicate keys are rejected.
#[derive(Debug, Clone)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object with unique keys")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, V)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(key) = access.next_key::<String>()? {
                    if entries.iter().any(|(existing, _)| existing == &key) {
                        return Err(de::Error::custom(format!("duplicate key `{}`", key)));
                    }
                    let value = access.next_value()?;
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}. Values are JSON-escaped so
/// they can sit inside string literals.
fn expand_env_vars(content: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-?([^}]*))?\}").expect("env expansion pattern is valid")
    });

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let expanded = std::env::var(var_name).unwrap_or_else(|_| default_value.to_string());
        json_escape(&expanded)
    })
    .to_string()
}

fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
