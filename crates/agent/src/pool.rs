use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

use crate::graph::{AgentGraph, LlmAgentGraph, ToolInvoker};
use crate::llm::LlmClient;
use crate::tools::ToolCatalog;

/// Static configuration for one worker. Created at process configuration
/// time, immutable thereafter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    pub name: String,
    pub primary_namespaces: Vec<String>,
    pub fallback_namespaces: Vec<String>,
    pub tool_limit: usize,
}

/// A constructed worker: the compiled agent graph plus an immutable snapshot
/// of the tool ids that were available when it was built.
pub struct WorkerHandle {
    name: String,
    available_tool_ids: Vec<String>,
    graph: Arc<dyn AgentGraph>,
}

impl WorkerHandle {
    pub fn new(name: impl Into<String>, available_tool_ids: Vec<String>, graph: Arc<dyn AgentGraph>) -> Self {
        Self { name: name.into(), available_tool_ids, graph }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn available_tool_ids(&self) -> &[String] {
        &self.available_tool_ids
    }

    pub fn graph(&self) -> Arc<dyn AgentGraph> {
        self.graph.clone()
    }
}

#[derive(Debug, Error)]
pub enum WorkerBuildError {
    #[error("worker `{worker}` construction failed: {message}")]
    Construction { worker: String, message: String },
}

/// Builds a worker from its config. Construction is expensive (tool registry
/// build, retrieval tuning, graph compile), which is why the pool guards it
/// with single-flight semantics.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn build(&self, config: &WorkerConfig) -> Result<WorkerHandle, WorkerBuildError>;
}

/// On-demand worker cache. Each configured name is constructed at most once
/// for the pool's lifetime; concurrent first accesses share one construction
/// through a per-name once-cell. Unknown names return `None` without
/// touching any lock.
pub struct LazyWorkerPool {
    configs: HashMap<String, WorkerConfig>,
    order: Vec<String>,
    factory: Arc<dyn WorkerFactory>,
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<WorkerHandle>>>>>,
}

impl LazyWorkerPool {
    pub fn new(configs: Vec<WorkerConfig>, factory: Arc<dyn WorkerFactory>) -> Self {
        let order: Vec<String> = configs.iter().map(|config| config.name.clone()).collect();
        let configs = configs.into_iter().map(|config| (config.name.clone(), config)).collect();
        Self { configs, order, factory, cells: Mutex::new(HashMap::new()) }
    }

    /// Configured worker names in declaration order. Pure config read.
    pub fn available_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Membership test. Pure config read, never constructs.
    pub fn contains(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    pub fn config(&self, name: &str) -> Option<&WorkerConfig> {
        self.configs.get(name)
    }

    pub async fn get(&self, name: &str) -> Result<Option<Arc<WorkerHandle>>, WorkerBuildError> {
        let Some(config) = self.configs.get(name) else {
            return Ok(None);
        };

        let cell = {
            let mut cells = self.cells.lock().expect("worker pool lock");
            cells.entry(name.to_string()).or_default().clone()
        };

        let handle = cell
            .get_or_try_init(|| async {
                info!(
                    event_name = "dispatch.pool.construct",
                    worker = %config.name,
                    "constructing worker"
                );
                self.factory.build(config).await.map(Arc::new)
            })
            .await?;

        Ok(Some(handle.clone()))
    }

    /// Drop every constructed worker. Returns how many were constructed.
    /// Static configuration is untouched; the next `get` reconstructs.
    pub fn clear(&self) -> usize {
        let mut cells = self.cells.lock().expect("worker pool lock");
        let constructed = cells.values().filter(|cell| cell.initialized()).count();
        cells.clear();
        constructed
    }
}

/// Default factory: snapshots the worker's namespace tools from the catalog
/// and compiles an LLM agent loop over them.
pub struct CatalogWorkerFactory {
    catalog: ToolCatalog,
    llm: Arc<dyn LlmClient>,
    invoker: Option<Arc<dyn ToolInvoker>>,
}

impl CatalogWorkerFactory {
    pub fn new(
        catalog: ToolCatalog,
        llm: Arc<dyn LlmClient>,
        invoker: Option<Arc<dyn ToolInvoker>>,
    ) -> Self {
        Self { catalog, llm, invoker }
    }
}

#[async_trait]
impl WorkerFactory for CatalogWorkerFactory {
    async fn build(&self, config: &WorkerConfig) -> Result<WorkerHandle, WorkerBuildError> {
        let mut namespaces = config.primary_namespaces.clone();
        namespaces.extend(config.fallback_namespaces.iter().cloned());
        let available_tool_ids = self.catalog.namespace_tool_ids(&namespaces);
        if available_tool_ids.is_empty() {
            return Err(WorkerBuildError::Construction {
                worker: config.name.clone(),
                message: format!("no tools in namespaces {namespaces:?}"),
            });
        }

        let system_prompt = format!(
            "You are the `{}` worker of a conversational assistant. Answer in the user's language.",
            config.name
        );
        let graph =
            Arc::new(LlmAgentGraph::new(self.llm.clone(), self.invoker.clone(), system_prompt));

        Ok(WorkerHandle::new(config.name.clone(), available_tool_ids, graph))
    }
}

/// The worker set växel ships with: one worker per route member of both
/// taxonomies, each scoped to its namespace with a broader fallback.
pub fn default_worker_configs(tool_limit: usize) -> Vec<WorkerConfig> {
    let worker = |name: &str, primary: &[&str], fallback: &[&str]| WorkerConfig {
        name: name.to_string(),
        primary_namespaces: primary.iter().map(|namespace| namespace.to_string()).collect(),
        fallback_namespaces: fallback.iter().map(|namespace| namespace.to_string()).collect(),
        tool_limit,
    };

    vec![
        worker("web", &["action.web"], &[]),
        worker("media", &["action.media"], &["action.web"]),
        worker("travel", &["action.travel"], &["action.web"]),
        worker("data", &["action.data"], &["action.web"]),
        worker("docs", &["knowledge.docs"], &["knowledge.internal"]),
        worker("internal", &["knowledge.internal"], &[]),
        worker("external", &["knowledge.external"], &["knowledge.internal"]),
    ]
}
