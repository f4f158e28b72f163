use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub routing: RoutingConfig,
    pub limits: LimitsConfig,
    pub resilience: ResilienceConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub allow_external_knowledge: bool,
    pub action_system_prompt: Option<String>,
    pub knowledge_system_prompt: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LimitsConfig {
    pub max_requests: i64,
    pub window_seconds: i64,
}

#[derive(Clone, Debug)]
pub struct ResilienceConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub disabled: bool,
    pub combo_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub allow_external_knowledge: Option<bool>,
    pub rate_max_requests: Option<i64>,
    pub rate_window_seconds: Option<i64>,
    pub cache_disabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://vaxel.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            routing: RoutingConfig {
                allow_external_knowledge: true,
                action_system_prompt: None,
                knowledge_system_prompt: None,
            },
            limits: LimitsConfig { max_requests: 30, window_seconds: 60 },
            resilience: ResilienceConfig { failure_threshold: 5, reset_timeout_secs: 60 },
            cache: CacheConfig { disabled: false, combo_ttl_secs: 86_400 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            "disabled" => Ok(Self::Disabled),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama|disabled)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("vaxel.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(allow_external_knowledge) = routing.allow_external_knowledge {
                self.routing.allow_external_knowledge = allow_external_knowledge;
            }
            if let Some(action_system_prompt) = routing.action_system_prompt {
                self.routing.action_system_prompt = Some(action_system_prompt);
            }
            if let Some(knowledge_system_prompt) = routing.knowledge_system_prompt {
                self.routing.knowledge_system_prompt = Some(knowledge_system_prompt);
            }
        }

        if let Some(limits) = patch.limits {
            if let Some(max_requests) = limits.max_requests {
                self.limits.max_requests = max_requests;
            }
            if let Some(window_seconds) = limits.window_seconds {
                self.limits.window_seconds = window_seconds;
            }
        }

        if let Some(resilience) = patch.resilience {
            if let Some(failure_threshold) = resilience.failure_threshold {
                self.resilience.failure_threshold = failure_threshold;
            }
            if let Some(reset_timeout_secs) = resilience.reset_timeout_secs {
                self.resilience.reset_timeout_secs = reset_timeout_secs;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(disabled) = cache.disabled {
                self.cache.disabled = disabled;
            }
            if let Some(combo_ttl_secs) = cache.combo_ttl_secs {
                self.cache.combo_ttl_secs = combo_ttl_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("VAXEL_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("VAXEL_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("VAXEL_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("VAXEL_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("VAXEL_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("VAXEL_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("VAXEL_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("VAXEL_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("VAXEL_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("VAXEL_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("VAXEL_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("VAXEL_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("VAXEL_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("VAXEL_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("VAXEL_SERVER_PORT") {
            self.server.port = parse_u16("VAXEL_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("VAXEL_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("VAXEL_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("VAXEL_ROUTING_ALLOW_EXTERNAL_KNOWLEDGE") {
            self.routing.allow_external_knowledge =
                parse_bool("VAXEL_ROUTING_ALLOW_EXTERNAL_KNOWLEDGE", &value)?;
        }
        if let Some(value) = read_env("VAXEL_ROUTING_ACTION_SYSTEM_PROMPT") {
            self.routing.action_system_prompt = Some(value);
        }
        if let Some(value) = read_env("VAXEL_ROUTING_KNOWLEDGE_SYSTEM_PROMPT") {
            self.routing.knowledge_system_prompt = Some(value);
        }

        if let Some(value) = read_env("VAXEL_LIMITS_MAX_REQUESTS") {
            self.limits.max_requests = parse_i64("VAXEL_LIMITS_MAX_REQUESTS", &value)?;
        }
        if let Some(value) = read_env("VAXEL_LIMITS_WINDOW_SECONDS") {
            self.limits.window_seconds = parse_i64("VAXEL_LIMITS_WINDOW_SECONDS", &value)?;
        }

        if let Some(value) = read_env("VAXEL_RESILIENCE_FAILURE_THRESHOLD") {
            self.resilience.failure_threshold =
                parse_u32("VAXEL_RESILIENCE_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("VAXEL_RESILIENCE_RESET_TIMEOUT_SECS") {
            self.resilience.reset_timeout_secs =
                parse_u64("VAXEL_RESILIENCE_RESET_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("VAXEL_CACHE_DISABLED") {
            self.cache.disabled = parse_bool("VAXEL_CACHE_DISABLED", &value)?;
        }
        if let Some(value) = read_env("VAXEL_CACHE_COMBO_TTL_SECS") {
            self.cache.combo_ttl_secs = parse_u64("VAXEL_CACHE_COMBO_TTL_SECS", &value)?;
        }

        let log_level = read_env("VAXEL_LOGGING_LEVEL").or_else(|| read_env("VAXEL_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("VAXEL_LOGGING_FORMAT").or_else(|| read_env("VAXEL_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(allow_external_knowledge) = overrides.allow_external_knowledge {
            self.routing.allow_external_knowledge = allow_external_knowledge;
        }
        if let Some(rate_max_requests) = overrides.rate_max_requests {
            self.limits.max_requests = rate_max_requests;
        }
        if let Some(rate_window_seconds) = overrides.rate_window_seconds {
            self.limits.window_seconds = rate_window_seconds;
        }
        if let Some(cache_disabled) = overrides.cache_disabled {
            self.cache.disabled = cache_disabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_resilience(&self.resilience)?;
        validate_cache(&self.cache)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("vaxel.toml"), PathBuf::from("config/vaxel.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
        LlmProvider::Disabled => {}
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_resilience(resilience: &ResilienceConfig) -> Result<(), ConfigError> {
    if resilience.failure_threshold == 0 {
        return Err(ConfigError::Validation(
            "resilience.failure_threshold must be greater than zero".to_string(),
        ));
    }

    if resilience.reset_timeout_secs == 0 || resilience.reset_timeout_secs > 3600 {
        return Err(ConfigError::Validation(
            "resilience.reset_timeout_secs must be in range 1..=3600".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.combo_ttl_secs < 60 {
        return Err(ConfigError::Validation(
            "cache.combo_ttl_secs must be at least 60".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    routing: Option<RoutingPatch>,
    limits: Option<LimitsPatch>,
    resilience: Option<ResiliencePatch>,
    cache: Option<CachePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    allow_external_knowledge: Option<bool>,
    action_system_prompt: Option<String>,
    knowledge_system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitsPatch {
    max_requests: Option<i64>,
    window_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ResiliencePatch {
    failure_threshold: Option<u32>,
    reset_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    disabled: Option<bool>,
    combo_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
