//! Worker dispatch - route classification, tool retrieval and agent execution
//!
//! This crate is the decision layer of the växel backend: given a user query
//! it picks a route, fetches the worker that serves it, hands the worker a
//! bounded set of relevant tools, runs the agent loop, and records what
//! happened so future retrieval improves.
//!
//! # Architecture
//!
//! A dispatch walks a fixed pipeline:
//! 1. **Rate gate** (`vaxel_core::resilience`) - per-channel sliding window
//! 2. **Classification** (`classifier`) - rule tier first, LLM fallback last
//! 3. **Combo cache** (`combo_cache`) - reuse a previously resolved selection
//! 4. **Worker pool** (`pool`) - lazy, single-flight worker construction
//! 5. **Retrieval** (`retriever`) - namespace-scoped, feedback-biased ranking
//! 6. **Execution** (`graph`) - breaker-gated agent loop with loop detection
//!
//! # Key Types
//!
//! - `Dispatcher` - composition root for one request (see `dispatcher`)
//! - `LlmClient` - pluggable trait for OpenAI/Anthropic/Ollama
//! - `AgentGraph` - the capability surface a worker exposes (invoke, stream)
//!
//! # Safety Principle
//!
//! The LLM never decides whether a call is allowed. Rate limits, breakers
//! and loop guards are deterministic code and always run before or around
//! the model, never inside it.

pub mod classifier;
pub mod combo_cache;
pub mod dispatcher;
pub mod graph;
pub mod guardrails;
pub mod llm;
pub mod pool;
pub mod retriever;
pub mod tools;
