use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use vaxel_agent::classifier::{Classifier, DEFAULT_ACTION_PROMPT, DEFAULT_KNOWLEDGE_PROMPT};
use vaxel_agent::combo_cache::{AgentComboCache, ComboCacheSettings};
use vaxel_agent::dispatcher::{Dispatcher, DispatcherParts};
use vaxel_agent::llm::{build_llm_client, LlmError};
use vaxel_agent::pool::{default_worker_configs, CatalogWorkerFactory, LazyWorkerPool};
use vaxel_agent::retriever::SmartRetriever;
use vaxel_agent::tools::{ToolCatalog, ToolIndex};
use vaxel_core::config::{AppConfig, ConfigError, LoadOptions};
use vaxel_core::resilience::{
    BreakerConfig, BreakerRegistry, RateLimitConfig, SlidingWindowRateLimiter,
};
use vaxel_core::routing::{action_rules, knowledge_rules};
use vaxel_db::repositories::{SqlComboCacheRepository, SqlFeedbackRepository};
use vaxel_db::{connect_with_settings, migrations, DbPool};

const DEFAULT_TOOL_LIMIT: usize = 4;

/// Explicitly constructed process context. Everything the request handlers
/// need hangs off this struct; nothing lives in module globals.
pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub dispatcher: Arc<Dispatcher>,
    pub combo_cache: Arc<AgentComboCache>,
    pub breakers: Arc<BreakerRegistry>,
    pub limiter: Arc<SlidingWindowRateLimiter>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client construction failed: {0}")]
    Llm(#[source] LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm = build_llm_client(&config.llm).map_err(BootstrapError::Llm)?;
    let catalog = ToolCatalog::builtin();

    let feedback = Arc::new(SqlFeedbackRepository::new(db_pool.clone()));
    let combo_cache = Arc::new(AgentComboCache::new(
        Arc::new(SqlComboCacheRepository::new(db_pool.clone())),
        ComboCacheSettings {
            ttl_secs: config.cache.combo_ttl_secs,
            start_disabled: config.cache.disabled,
            ..ComboCacheSettings::default()
        },
    ));
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig {
        failure_threshold: config.resilience.failure_threshold,
        reset_timeout: std::time::Duration::from_secs(config.resilience.reset_timeout_secs),
    }));
    let limiter = Arc::new(SlidingWindowRateLimiter::new(RateLimitConfig {
        max_requests: config.limits.max_requests,
        window_seconds: config.limits.window_seconds,
    }));

    let action_prompt = config
        .routing
        .action_system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_ACTION_PROMPT.to_string());
    let knowledge_prompt = config
        .routing
        .knowledge_system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_KNOWLEDGE_PROMPT.to_string());

    // Domain tool adapters (weather, transit, marketplace) are registered by
    // the deployment; the scaffold wires none.
    let dispatcher = Arc::new(Dispatcher::new(DispatcherParts {
        action: Classifier::new(action_rules(), llm.clone(), action_prompt),
        knowledge: Classifier::new(
            knowledge_rules(config.routing.allow_external_knowledge),
            llm.clone(),
            knowledge_prompt,
        ),
        pool: LazyWorkerPool::new(
            default_worker_configs(DEFAULT_TOOL_LIMIT),
            Arc::new(CatalogWorkerFactory::new(catalog.clone(), llm, None)),
        ),
        retriever: SmartRetriever::new(ToolIndex::build(&catalog), feedback.clone()),
        feedback,
        combo_cache: combo_cache.clone(),
        breakers: breakers.clone(),
        limiter: limiter.clone(),
    }));

    Ok(Application { config, db_pool, dispatcher, combo_cache, breakers, limiter })
}
