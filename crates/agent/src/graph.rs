use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::guardrails::{LoopDecision, ToolLoopGuard};
use crate::llm::{LlmClient, LlmError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentRequest {
    pub correlation_id: String,
    pub query: String,
    pub tool_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    pub used_tool_ids: Vec<String>,
    pub steps: u32,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("tool `{tool_id}` failed: {message}")]
    Tool { tool_id: String, message: String },
    #[error("agent loop exceeded {max_steps} steps")]
    StepBudgetExhausted { max_steps: u32 },
}

/// Capability surface a compiled worker exposes to the dispatcher. Exactly
/// the two operations the dispatch layer needs; nothing passes through.
#[async_trait]
pub trait AgentGraph: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentReply, GraphError>;

    /// Streamed variant of `invoke`; chunks arrive on the returned channel.
    async fn stream(&self, request: AgentRequest) -> Result<mpsc::Receiver<String>, GraphError>;
}

/// Executes one tool call on behalf of the agent loop. Implementations live
/// outside this crate (weather, transit, marketplace adapters).
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool_id: &str, input: &str) -> Result<String, GraphError>;
}

const DEFAULT_MAX_STEPS: u32 = 4;
const DEFAULT_LOOP_REPEATS: u32 = 3;

/// LLM-driven agent loop. Each turn the model either answers directly or
/// requests one tool call on a `TOOL:<id> <input>` line; tool output is fed
/// back into the next turn. The loop guard stops identical retries and the
/// step budget bounds the whole exchange.
pub struct LlmAgentGraph {
    llm: Arc<dyn LlmClient>,
    invoker: Option<Arc<dyn ToolInvoker>>,
    system_prompt: String,
    max_steps: u32,
    loop_repeats: u32,
}

impl LlmAgentGraph {
    pub fn new(llm: Arc<dyn LlmClient>, invoker: Option<Arc<dyn ToolInvoker>>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            invoker,
            system_prompt: system_prompt.into(),
            max_steps: DEFAULT_MAX_STEPS,
            loop_repeats: DEFAULT_LOOP_REPEATS,
        }
    }

    pub fn with_limits(mut self, max_steps: u32, loop_repeats: u32) -> Self {
        self.max_steps = max_steps.max(1);
        self.loop_repeats = loop_repeats;
        self
    }

    fn prompt_for(&self, tool_ids: &[String]) -> String {
        format!(
            "{}\nAvailable tools: {}.\nTo call a tool, reply with a single line `TOOL:<tool_id> <input>`. Otherwise answer the user directly.",
            self.system_prompt,
            tool_ids.join(", ")
        )
    }
}

fn parse_tool_directive(reply: &str) -> Option<(String, String)> {
    let line = reply.trim().lines().next()?.trim();
    let rest = line.strip_prefix("TOOL:")?;
    let mut parts = rest.trim().splitn(2, char::is_whitespace);
    let tool_id = parts.next()?.trim();
    if tool_id.is_empty() {
        return None;
    }
    let input = parts.next().unwrap_or("").trim();
    Some((tool_id.to_string(), input.to_string()))
}

#[async_trait]
impl AgentGraph for LlmAgentGraph {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentReply, GraphError> {
        let prompt = self.prompt_for(&request.tool_ids);
        let mut transcript = request.query.clone();
        let mut guard = ToolLoopGuard::new(self.loop_repeats);
        let mut used_tool_ids: Vec<String> = Vec::new();

        for step in 1..=self.max_steps {
            let reply = self.llm.complete(&prompt, &transcript).await?;

            let Some((tool_id, input)) = parse_tool_directive(&reply) else {
                return Ok(AgentReply { text: reply, used_tool_ids, steps: step });
            };

            if !request.tool_ids.iter().any(|id| *id == tool_id) {
                return Err(GraphError::Tool {
                    tool_id,
                    message: "tool is not available to this worker".to_string(),
                });
            }

            if let LoopDecision::Degrade { user_message, .. } = guard.observe(&tool_id, &input) {
                return Ok(AgentReply { text: user_message, used_tool_ids, steps: step });
            }

            let invoker = self.invoker.as_ref().ok_or_else(|| GraphError::Tool {
                tool_id: tool_id.clone(),
                message: "no tool invoker configured".to_string(),
            })?;

            let output = invoker.invoke(&tool_id, &input).await?;
            if !used_tool_ids.contains(&tool_id) {
                used_tool_ids.push(tool_id.clone());
            }
            transcript.push_str(&format!("\n[{tool_id}] {output}"));
        }

        Err(GraphError::StepBudgetExhausted { max_steps: self.max_steps })
    }

    async fn stream(&self, request: AgentRequest) -> Result<mpsc::Receiver<String>, GraphError> {
        let reply = self.invoke(request).await?;
        let (sender, receiver) = mpsc::channel(16);
        tokio::spawn(async move {
            for word in reply.text.split_inclusive(' ') {
                if sender.send(word.to_string()).await.is_err() {
                    break;
                }
            }
        });
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{
        parse_tool_directive, AgentGraph, AgentRequest, GraphError, LlmAgentGraph, ToolInvoker,
    };
    use crate::llm::{LlmClient, LlmError};

    /// Replays a scripted sequence of replies.
    struct ScriptedLlm {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|reply| reply.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            self.replies
                .lock()
                .expect("script lock")
                .pop()
                .ok_or_else(|| LlmError::Transport("script exhausted".to_string()))
        }
    }

    struct RecordingInvoker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolInvoker for RecordingInvoker {
        async fn invoke(&self, tool_id: &str, _input: &str) -> Result<String, GraphError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{tool_id} output"))
        }
    }

    fn request(tool_ids: &[&str]) -> AgentRequest {
        AgentRequest {
            correlation_id: "corr-1".to_string(),
            query: "vad blir vädret imorgon".to_string(),
            tool_ids: tool_ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[test]
    fn tool_directive_parsing() {
        assert_eq!(
            parse_tool_directive("TOOL:smhi_forecast stockholm imorgon"),
            Some(("smhi_forecast".to_string(), "stockholm imorgon".to_string()))
        );
        assert_eq!(
            parse_tool_directive("  TOOL:web_search  "),
            Some(("web_search".to_string(), String::new()))
        );
        assert_eq!(parse_tool_directive("Det blir sol imorgon."), None);
        assert_eq!(parse_tool_directive("TOOL:"), None);
    }

    #[tokio::test]
    async fn direct_answer_returns_without_tool_calls() {
        let llm = Arc::new(ScriptedLlm::new(&["Det blir sol imorgon."]));
        let invoker = Arc::new(RecordingInvoker { calls: AtomicUsize::new(0) });
        let graph = LlmAgentGraph::new(llm, Some(invoker.clone()), "assistant");

        let reply = graph.invoke(request(&["smhi_forecast"])).await.expect("invoke");
        assert_eq!(reply.text, "Det blir sol imorgon.");
        assert!(reply.used_tool_ids.is_empty());
        assert_eq!(reply.steps, 1);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_call_output_feeds_the_next_turn() {
        let llm = Arc::new(ScriptedLlm::new(&[
            "TOOL:smhi_forecast stockholm imorgon",
            "Imorgon blir det 18 grader och sol.",
        ]));
        let invoker = Arc::new(RecordingInvoker { calls: AtomicUsize::new(0) });
        let graph = LlmAgentGraph::new(llm, Some(invoker.clone()), "assistant");

        let reply = graph.invoke(request(&["smhi_forecast"])).await.expect("invoke");
        assert_eq!(reply.used_tool_ids, vec!["smhi_forecast".to_string()]);
        assert_eq!(reply.steps, 2);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
        assert!(reply.text.contains("18 grader"));
    }

    #[tokio::test]
    async fn repeated_identical_tool_calls_degrade_gracefully() {
        let llm = Arc::new(ScriptedLlm::new(&[
            "TOOL:smhi_forecast stockholm",
            "TOOL:smhi_forecast stockholm",
            "TOOL:smhi_forecast stockholm",
            "never reached",
        ]));
        let invoker = Arc::new(RecordingInvoker { calls: AtomicUsize::new(0) });
        let graph =
            LlmAgentGraph::new(llm, Some(invoker.clone()), "assistant").with_limits(10, 3);

        let reply = graph.invoke(request(&["smhi_forecast"])).await.expect("invoke");
        assert!(reply.text.contains("stopped retrying"));
        // The third identical attempt is blocked before reaching the tool.
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_tool_request_is_a_tool_error() {
        let llm = Arc::new(ScriptedLlm::new(&["TOOL:rm_rf everything"]));
        let invoker = Arc::new(RecordingInvoker { calls: AtomicUsize::new(0) });
        let graph = LlmAgentGraph::new(llm, Some(invoker), "assistant");

        let error = graph.invoke(request(&["smhi_forecast"])).await.expect_err("must fail");
        assert!(matches!(error, GraphError::Tool { ref tool_id, .. } if tool_id == "rm_rf"));
    }

    #[tokio::test]
    async fn step_budget_bounds_the_loop() {
        let llm = Arc::new(ScriptedLlm::new(&[
            "TOOL:smhi_forecast a",
            "TOOL:smhi_forecast b",
            "TOOL:smhi_forecast c",
        ]));
        let invoker = Arc::new(RecordingInvoker { calls: AtomicUsize::new(0) });
        let graph = LlmAgentGraph::new(llm, Some(invoker), "assistant").with_limits(3, 5);

        let error = graph.invoke(request(&["smhi_forecast"])).await.expect_err("must fail");
        assert!(matches!(error, GraphError::StepBudgetExhausted { max_steps: 3 }));
    }

    #[tokio::test]
    async fn stream_delivers_the_reply_in_chunks() {
        let llm = Arc::new(ScriptedLlm::new(&["Det blir sol imorgon."]));
        let graph = LlmAgentGraph::new(llm, None, "assistant");

        let mut receiver = graph.stream(request(&[])).await.expect("stream");
        let mut collected = String::new();
        while let Some(chunk) = receiver.recv().await {
            collected.push_str(&chunk);
        }
        assert_eq!(collected, "Det blir sol imorgon.");
    }
}
