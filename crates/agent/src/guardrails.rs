#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopDecision {
    Allow,
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

/// Detects an agent stuck re-issuing the same tool call within one dispatch.
/// Tracking is per guard instance; the dispatcher creates a fresh guard for
/// every request.
pub struct ToolLoopGuard {
    max_repeats: u32,
    last_call: Option<(String, String)>,
    repeats: u32,
}

impl ToolLoopGuard {
    pub fn new(max_repeats: u32) -> Self {
        Self { max_repeats: max_repeats.max(2), last_call: None, repeats: 0 }
    }

    /// Record one attempted tool call and decide whether it may proceed.
    pub fn observe(&mut self, tool_id: &str, input: &str) -> LoopDecision {
        let call = (tool_id.to_string(), input.to_string());
        if self.last_call.as_ref() == Some(&call) {
            self.repeats += 1;
        } else {
            self.last_call = Some(call);
            self.repeats = 1;
        }

        if self.repeats >= self.max_repeats {
            return LoopDecision::Degrade {
                reason_code: "tool_call_loop",
                user_message:
                    "I keep getting the same result from that source, so I stopped retrying. Here is what I have so far."
                        .to_string(),
                fallback_path: "summarize_partial_results",
            };
        }

        LoopDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::{LoopDecision, ToolLoopGuard};

    #[test]
    fn distinct_calls_are_always_allowed() {
        let mut guard = ToolLoopGuard::new(3);
        assert_eq!(guard.observe("smhi_forecast", "stockholm"), LoopDecision::Allow);
        assert_eq!(guard.observe("sl_departures", "stockholm c"), LoopDecision::Allow);
        assert_eq!(guard.observe("smhi_forecast", "göteborg"), LoopDecision::Allow);
    }

    #[test]
    fn identical_calls_trip_the_guard_at_the_configured_count() {
        let mut guard = ToolLoopGuard::new(3);
        assert_eq!(guard.observe("smhi_forecast", "stockholm"), LoopDecision::Allow);
        assert_eq!(guard.observe("smhi_forecast", "stockholm"), LoopDecision::Allow);

        let decision = guard.observe("smhi_forecast", "stockholm");
        let (reason_code, user_message, fallback_path) = match decision {
            LoopDecision::Degrade { reason_code, user_message, fallback_path } => {
                (reason_code, user_message, fallback_path)
            }
            LoopDecision::Allow => ("", String::new(), ""),
        };

        assert_eq!(reason_code, "tool_call_loop");
        assert!(user_message.contains("stopped retrying"));
        assert_eq!(fallback_path, "summarize_partial_results");
    }

    #[test]
    fn changing_the_input_resets_the_repeat_count() {
        let mut guard = ToolLoopGuard::new(2);
        assert_eq!(guard.observe("web_search", "kattbilder"), LoopDecision::Allow);
        assert_eq!(guard.observe("web_search", "hundbilder"), LoopDecision::Allow);
        assert_eq!(guard.observe("web_search", "kattbilder"), LoopDecision::Allow);
        assert!(matches!(
            guard.observe("web_search", "kattbilder"),
            LoopDecision::Degrade { .. }
        ));
    }

    #[test]
    fn repeat_budget_is_clamped_to_a_sane_minimum() {
        // A budget of 0 or 1 would degrade every first call.
        let mut guard = ToolLoopGuard::new(0);
        assert_eq!(guard.observe("web_search", "x"), LoopDecision::Allow);
    }
}
