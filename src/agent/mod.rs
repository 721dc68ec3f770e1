//! Main orchestrator - implements the bounded turn loop
//!
//! ATTEMPT(n) → VERIFY → RETRY? → FINALIZE
//!
//! One attempt is up to `max_steps` model steps under a single deadline.
//! Tool calls requested in a step run concurrently and are joined before
//! the next step. At most `max_retries + 1` attempts run per turn.

pub mod prompt;

use crate::budget::SpendTracker;
use crate::config::AgentConfig;
use crate::error::{AgentError, ErrorKind};
use crate::llm::{GenerationRequest, TextGenerator};
use crate::models::{
    AgentMessage, ChatMessage, ChatResponse, TokenUsage, ToolCallRecord, ToolCallRequest,
};
use crate::state::{ConversationStore, StoredTurn};
use crate::tools::market::DATA_AGE_FIELD;
use crate::tools::{ToolDefinition, ToolName, ToolRegistry};
use crate::verification::{
    disclaimer, hallucination, ConfidenceSignals, HallucinationResult, ResponseVerifier, Verdict,
};
use crate::Result;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of the single trailing line of a streamed response
pub const METADATA_SENTINEL: &str = "__METADATA__";

/// Confidence below which a caution sentence is appended
const CAUTION_THRESHOLD: f64 = 0.7;

const STREAM_BUFFER: usize = 64;

/// Per-turn state; never shared across requests
#[derive(Default)]
struct TurnState {
    messages: Vec<AgentMessage>,
    tool_log: Vec<ToolCallRecord>,
    usage: TokenUsage,
}

/// The attempt that survived verification
struct AcceptedAttempt {
    text: String,
    grounding: HallucinationResult,
    /// Verification still failed when the retry budget ran out
    verification_failed: bool,
}

/// Main orchestrator that coordinates model, tools and verification
pub struct Orchestrator {
    generator: Arc<dyn TextGenerator>,
    registry: Arc<ToolRegistry>,
    verifier: ResponseVerifier,
    config: AgentConfig,
    spend: Arc<SpendTracker>,
    store: Option<Arc<dyn ConversationStore>>,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        registry: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self {
            generator,
            registry,
            verifier: ResponseVerifier::new(config.accuracy_tolerance),
            spend: Arc::new(SpendTracker::from_config(&config)),
            config,
            store: None,
        }
    }

    /// Share a spend tracker across orchestrators
    pub fn with_spend_tracker(mut self, spend: Arc<SpendTracker>) -> Self {
        self.spend = spend;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer `message` given prior `history`
    pub async fn chat(&self, history: &[ChatMessage], message: &str) -> Result<ChatResponse> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AgentError::ValidationError("message must not be empty".to_string()));
        }

        let started = Instant::now();
        let reservation = self.spend.reserve(self.config.budget_reservation_usd)?;

        let mut state = TurnState::default();
        let outcome = self.run_attempts(history, message, &mut state).await;

        let actual_cost = self.config.cost_of(&state.usage);
        self.spend.settle(reservation, actual_cost);
        debug!(
            prompt_tokens = state.usage.prompt_tokens,
            completion_tokens = state.usage.completion_tokens,
            cost_usd = actual_cost,
            "Turn cost settled"
        );

        let accepted = outcome?;
        Ok(self.finalize(accepted, state, started))
    }

    /// `chat`, then persist the finished turn under `conversation_id`.
    /// Persistence failures are logged and ignored.
    pub async fn chat_turn(
        &self,
        conversation_id: Uuid,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<ChatResponse> {
        let response = self.chat(history, message).await?;

        if let Some(store) = &self.store {
            let turn = StoredTurn {
                conversation_id,
                user_message: message.to_string(),
                response: response.clone(),
                created_at: Utc::now(),
            };
            if let Err(e) = store.append_turn(turn).await {
                warn!(conversation_id = %conversation_id, error = %e, "Failed to persist turn");
            }
        }

        Ok(response)
    }

    /// Streaming variant of `chat_turn`.
    ///
    /// Emits the verified message in whitespace-delimited chunks, then one
    /// line `__METADATA__{json}` with the remaining response fields, or
    /// with `{"error": {"type", "message"}}` when the turn failed.
    pub fn chat_stream(
        self: Arc<Self>,
        conversation_id: Uuid,
        history: Vec<ChatMessage>,
        message: String,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let metadata = match self.chat_turn(conversation_id, &history, &message).await {
                Ok(response) => {
                    for chunk in response.message.split_inclusive(char::is_whitespace) {
                        if tx.send(chunk.to_string()).await.is_err() {
                            debug!("Stream receiver dropped");
                            return;
                        }
                    }
                    response_metadata(&response, conversation_id)
                }
                Err(e) => error_metadata(&e),
            };

            if tx
                .send(format!("\n{}{}\n", METADATA_SENTINEL, metadata))
                .await
                .is_err()
            {
                debug!("Stream receiver dropped before metadata");
            }
        });

        rx
    }

    //
    // ================= Attempt Loop =================
    //

    async fn run_attempts(
        &self,
        history: &[ChatMessage],
        message: &str,
        state: &mut TurnState,
    ) -> Result<AcceptedAttempt> {
        let mut base: Vec<AgentMessage> = history.iter().map(AgentMessage::from).collect();
        base.push(AgentMessage::User {
            text: message.to_string(),
        });

        let tools = self.registry.definitions();
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            state.messages = base.clone();
            state.tool_log.clear();

            info!(attempt, max_attempts, "Orchestrator: starting attempt");
            let system_prompt = prompt::system_prompt(attempt);

            let text = match tokio::time::timeout(
                self.config.attempt_timeout,
                self.run_attempt(&system_prompt, &tools, state),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    let millis = self.config.attempt_timeout.as_millis() as u64;
                    warn!(attempt, timeout_ms = millis, "Attempt timed out");
                    return Err(AgentError::Timeout(millis));
                }
            };

            let verdict = self.verifier.verify(&text, &state.tool_log);
            match verdict {
                Verdict::Accepted(grounding) => {
                    info!(attempt, score = grounding.score, "Verification passed");
                    return Ok(AcceptedAttempt {
                        text,
                        grounding,
                        verification_failed: false,
                    });
                }
                Verdict::Inaccurate(_) | Verdict::Ungrounded(_) if attempt < max_attempts => {
                    warn!(attempt, "Verification failed - retrying");
                }
                Verdict::Inaccurate(outcome) => {
                    warn!(
                        attempt,
                        mismatches = outcome.mismatches.len(),
                        "Verification failed - retries exhausted, accepting"
                    );
                    let results: Vec<Value> =
                        state.tool_log.iter().map(|r| r.result.clone()).collect();
                    return Ok(AcceptedAttempt {
                        grounding: hallucination::check(&text, &results),
                        text,
                        verification_failed: true,
                    });
                }
                Verdict::Ungrounded(grounding) => {
                    warn!(
                        attempt,
                        score = grounding.score,
                        "Grounding failed - retries exhausted, accepting"
                    );
                    return Ok(AcceptedAttempt {
                        text,
                        grounding,
                        verification_failed: true,
                    });
                }
            }
        }
    }

    /// One attempt: step the model until it answers or the step budget
    /// runs out. The last step is offered no tools.
    async fn run_attempt(
        &self,
        system_prompt: &str,
        tools: &[ToolDefinition],
        state: &mut TurnState,
    ) -> Result<String> {
        let max_steps = self.config.max_steps.max(1);

        for step in 1..=max_steps {
            let offered: &[ToolDefinition] = if step < max_steps { tools } else { &[] };
            let request = GenerationRequest {
                system_prompt,
                messages: &state.messages,
                tools: offered,
            };

            let output = self.generator.generate(&request).await?;
            state.usage.add(output.usage);
            debug!(step, tool_calls = output.tool_calls.len(), "Model step complete");

            if output.is_final() {
                return Ok(output.text);
            }

            if step == max_steps {
                warn!(
                    dropped_calls = output.tool_calls.len(),
                    "Step budget exhausted with pending tool calls"
                );
                return Ok(if output.text.trim().is_empty() {
                    prompt::STEP_LIMIT_FALLBACK.to_string()
                } else {
                    output.text
                });
            }

            let records = self.execute_calls(&output.tool_calls).await;

            state.messages.push(AgentMessage::Assistant {
                text: output.text,
                tool_calls: output.tool_calls.clone(),
            });
            for (call, record) in output.tool_calls.iter().zip(&records) {
                state.messages.push(AgentMessage::ToolResult {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    result: record.result.clone(),
                });
            }
            state.tool_log.extend(records);
        }

        Ok(prompt::STEP_LIMIT_FALLBACK.to_string())
    }

    /// Run every call of one step concurrently and wait for all of them.
    /// Failures, including panics, come back as inline error results.
    async fn execute_calls(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallRecord> {
        let handles: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let registry = self.registry.clone();
                tokio::spawn(async move { execute_tool(&registry, call).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(calls)
            .map(|(joined, call)| match joined {
                Ok(record) => record,
                Err(e) => {
                    warn!(tool_name = %call.tool_name, error = %e, "Tool task aborted");
                    failed_record(call, format!("Tool task failed: {}", e), 0)
                }
            })
            .collect()
    }

    //
    // ================= Finalize =================
    //

    fn finalize(
        &self,
        accepted: AcceptedAttempt,
        state: TurnState,
        started: Instant,
    ) -> ChatResponse {
        let tool_errors = state.tool_log.iter().filter(|r| r.is_error()).count();

        let signals = ConfidenceSignals {
            tool_call_count: state.tool_log.len(),
            has_errors: accepted.verification_failed,
            response_length: accepted.text.chars().count(),
            hallucination_score: Some(accepted.grounding.score),
            tool_errors: Some(tool_errors),
            data_age_minutes: data_age_minutes(&state.tool_log),
        };
        let confidence = self.config.confidence_model.assess(&signals);

        let mut message = disclaimer::enforce(&accepted.text);
        if confidence < CAUTION_THRESHOLD {
            message.push_str("\n\n");
            message.push_str(prompt::LOW_CONFIDENCE_NOTE);
        }
        if accepted.grounding.should_warn {
            message.push_str("\n\n");
            message.push_str(prompt::UNVERIFIED_CLAIMS_NOTE);
        }

        let disclaimers =
            disclaimer::contextual_disclaimers(state.tool_log.iter().map(|r| r.tool_name.as_str()));

        info!(
            confidence,
            tool_calls = state.tool_log.len(),
            tool_errors,
            flagged_claims = accepted.grounding.flagged_claims.len(),
            "Turn complete"
        );

        ChatResponse {
            message,
            confidence,
            disclaimer: disclaimer::DISCLAIMER.to_string(),
            disclaimers,
            tool_calls: state.tool_log,
            usage: state.usage,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

async fn execute_tool(registry: &ToolRegistry, call: ToolCallRequest) -> ToolCallRecord {
    let started = Instant::now();

    let outcome = match registry.get(&call.tool_name) {
        Some(tool) => tool.execute(&call.args).await,
        None => Err(AgentError::ToolNotFound(call.tool_name.clone())),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => {
            debug!(tool_name = %call.tool_name, duration_ms, "Tool executed");
            ToolCallRecord {
                tool_name: call.tool_name,
                args: call.args,
                result,
                duration_ms,
                error: None,
            }
        }
        Err(e) => {
            warn!(tool_name = %call.tool_name, error = %e, "Tool failed");
            failed_record(&call, e.to_string(), duration_ms)
        }
    }
}

fn failed_record(call: &ToolCallRequest, message: String, duration_ms: u64) -> ToolCallRecord {
    ToolCallRecord {
        tool_name: call.tool_name.clone(),
        args: call.args.clone(),
        result: json!({ "error": true, "message": message }),
        duration_ms,
        error: Some(message),
    }
}

/// Staleness of the oldest quote any market tool returned this turn
fn data_age_minutes(records: &[ToolCallRecord]) -> Option<f64> {
    records
        .iter()
        .filter(|r| !r.is_error() && r.tool_name == ToolName::MarketContext.as_str())
        .filter_map(|r| r.result.get(DATA_AGE_FIELD).and_then(Value::as_f64))
        .reduce(f64::max)
}

fn response_metadata(response: &ChatResponse, conversation_id: Uuid) -> Value {
    json!({
        "conversationId": conversation_id,
        "confidence": response.confidence,
        "disclaimer": response.disclaimer,
        "disclaimers": response.disclaimers,
        "toolCalls": response.tool_calls,
        "usage": response.usage,
        "durationMs": response.duration_ms,
    })
}

fn error_metadata(error: &AgentError) -> Value {
    let kind: ErrorKind = error.kind();
    json!({ "error": { "type": kind, "message": error.to_string() } })
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelStep, ScriptedGenerator};
    use crate::state::InMemoryConversationStore;
    use crate::tools::{create_default_registry, InMemoryDataSource, Tool};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn call(tool_name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest {
            call_id: Uuid::new_v4().to_string(),
            tool_name: tool_name.to_string(),
            args,
        }
    }

    fn sample_registry() -> Arc<ToolRegistry> {
        let source = Arc::new(InMemoryDataSource::sample(Utc::now()));
        Arc::new(create_default_registry(source))
    }

    fn orchestrator(generator: Arc<ScriptedGenerator>, config: AgentConfig) -> Orchestrator {
        Orchestrator::new(generator, sample_registry(), config)
    }

    /// Sleeps, then records that it finished
    struct SlowTool {
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> ToolName {
            ToolName::MarketContext
        }

        fn description(&self) -> &'static str {
            "slow"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object" })
        }

        async fn execute(&self, _args: &Value) -> Result<Value> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(json!({ "quotes": [] }))
        }
    }

    struct PanickingTool;

    #[async_trait::async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> ToolName {
            ToolName::ComplianceChecker
        }

        fn description(&self) -> &'static str {
            "panics"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object" })
        }

        async fn execute(&self, _args: &Value) -> Result<Value> {
            panic!("rule table missing");
        }
    }

    #[tokio::test]
    async fn test_grounded_answer_with_tool() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            ModelStep::calls(vec![call("portfolio_summary", json!({}))]).with_usage(100, 10),
            ModelStep::answer(
                "Your portfolio is worth $19,750.00 with a 23.44% return \
                 on a cost basis of $16,000.00.",
            )
            .with_usage(200, 30),
        ]));
        let orchestrator = orchestrator(generator.clone(), AgentConfig::default());

        let response = assert_ok!(orchestrator.chat(&[], "How is my portfolio doing?").await);

        assert_eq!(generator.call_count(), 2);
        assert_eq!(response.tool_calls.len(), 1);
        assert!(response.tool_calls[0].error.is_none());
        assert_eq!(response.usage.prompt_tokens, 300);
        assert_eq!(response.usage.completion_tokens, 40);
        assert!((response.confidence - 0.95).abs() < 1e-9);
        assert!(response.message.starts_with("Your portfolio is worth $19,750.00"));
        assert!(response.message.contains(disclaimer::DISCLAIMER));
        assert!(!response.message.contains(prompt::LOW_CONFIDENCE_NOTE));
        assert_eq!(
            response.disclaimers,
            vec![disclaimer::contextual_disclaimer(ToolName::PortfolioSummary).to_string()]
        );
    }

    #[tokio::test]
    async fn test_retry_bound() {
        for max_retries in [0, 1, 3] {
            let generator = Arc::new(ScriptedGenerator::repeating(ModelStep::answer(
                "Your portfolio returned 87.5% last year.",
            )));
            let config = AgentConfig {
                max_retries,
                ..AgentConfig::default()
            };
            let orchestrator = orchestrator(generator.clone(), config);

            let response = assert_ok!(orchestrator.chat(&[], "What was my return?").await);

            assert_eq!(generator.call_count(), max_retries as usize + 1);
            // never refuses; answers with mitigation instead
            assert!(response.message.contains(prompt::LOW_CONFIDENCE_NOTE));
            assert!(response.message.contains(prompt::UNVERIFIED_CLAIMS_NOTE));
            assert!(response.confidence < CAUTION_THRESHOLD);
        }
    }

    #[tokio::test]
    async fn test_retry_adds_corrective_note_and_clears_tool_log() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            ModelStep::calls(vec![call("portfolio_summary", json!({}))]),
            ModelStep::answer("Your portfolio is worth $45,000.00 today."),
            ModelStep::answer("I can describe your holdings, but no figures are available."),
        ]));
        let orchestrator = orchestrator(generator.clone(), AgentConfig::default());

        let response = assert_ok!(orchestrator.chat(&[], "What is it worth?").await);

        assert_eq!(generator.call_count(), 3);
        let prompts = generator.system_prompts().await;
        assert!(!prompts[0].contains(prompt::RETRY_NOTE));
        assert!(prompts[2].contains(prompt::RETRY_NOTE));
        // the second attempt made no tool calls
        assert!(response.tool_calls.is_empty());
        assert!(response.disclaimers.is_empty());
    }

    #[tokio::test]
    async fn test_tool_errors_stay_inline() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanickingTool));
        for tool in ToolName::ALL {
            if tool != ToolName::ComplianceChecker {
                if let Some(existing) = sample_registry().get(tool.as_str()) {
                    registry.register(existing);
                }
            }
        }

        let generator = Arc::new(ScriptedGenerator::new(vec![
            ModelStep::calls(vec![
                call("web_search", json!({ "query": "AAPL" })),
                call("compliance_checker", json!({})),
                call("portfolio_summary", json!({})),
            ]),
            ModelStep::answer(
                "Some checks could not run, but your holdings summary is available above.",
            ),
        ]));
        let orchestrator = Orchestrator::new(generator, Arc::new(registry), AgentConfig::default());

        let response = assert_ok!(orchestrator.chat(&[], "Check my portfolio").await);

        assert_eq!(response.tool_calls.len(), 3);
        assert!(response.tool_calls[0].is_error());
        assert_eq!(response.tool_calls[0].result["error"], json!(true));
        assert!(response.tool_calls[1].is_error());
        assert!(!response.tool_calls[2].is_error());
        // 0.95 - 2 * 0.10
        assert!((response.confidence - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_timeout() {
        let generator = Arc::new(
            ScriptedGenerator::repeating(ModelStep::answer("late"))
                .with_delay(Duration::from_millis(200)),
        );
        let config = AgentConfig {
            attempt_timeout: Duration::from_millis(50),
            ..AgentConfig::default()
        };
        let orchestrator = orchestrator(generator.clone(), config);

        let err = orchestrator.chat(&[], "Hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(50)));
        assert_eq!(err.kind(), ErrorKind::TimeoutError);
        // timeouts are not retried
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_late_tool_result_after_timeout() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool {
            delay: Duration::from_millis(150),
            finished: finished.clone(),
        }));

        let quiet = "Markets were quiet today, nothing notable to report here.";
        let generator = Arc::new(
            ScriptedGenerator::new(vec![ModelStep::calls(vec![call(
                "market_context",
                json!({}),
            )])])
            .with_fallback(ModelStep::answer(quiet)),
        );
        let config = AgentConfig {
            attempt_timeout: Duration::from_millis(50),
            ..AgentConfig::default()
        };
        let orchestrator = Orchestrator::new(generator, Arc::new(registry), config);

        let err = orchestrator.chat(&[], "Any market news?").await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
        assert!(!finished.load(Ordering::SeqCst));

        // the detached tool finishes on its own and its result is dropped
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(finished.load(Ordering::SeqCst));

        let response = assert_ok!(orchestrator.chat(&[], "Any market news?").await);
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_budget_rejected_before_model_call() {
        let generator = Arc::new(ScriptedGenerator::repeating(ModelStep::answer("hi")));
        let orchestrator = orchestrator(generator.clone(), AgentConfig::default())
            .with_spend_tracker(Arc::new(SpendTracker::new(0.01)));

        let err = orchestrator.chat(&[], "Hello").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BudgetExceeded);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_spend_settled_to_actual_cost() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            ModelStep::answer("Happy to help with questions about your portfolio any time.")
                .with_usage(1000, 1000),
        ]));
        let spend = Arc::new(SpendTracker::new(1.0));
        let orchestrator =
            orchestrator(generator, AgentConfig::default()).with_spend_tracker(spend.clone());

        assert_ok!(orchestrator.chat(&[], "Hi").await);
        // 1k prompt + 1k completion tokens at default prices
        assert!((spend.spent_today() - 0.0005).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let orchestrator = orchestrator(generator.clone(), AgentConfig::default());

        let err = orchestrator.chat(&[], "   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_market_data_lowers_confidence() {
        let source = Arc::new(InMemoryDataSource::sample(Utc::now() - ChronoDuration::minutes(95)));
        let registry = Arc::new(create_default_registry(source));
        let generator = Arc::new(ScriptedGenerator::new(vec![
            ModelStep::calls(vec![call("market_context", json!({ "symbols": ["AAPL"] }))]),
            ModelStep::answer(
                "AAPL is trading at $190.00 today, up 1.01% from the previous close.",
            ),
        ]));
        let orchestrator = Orchestrator::new(generator, registry, AgentConfig::default());

        let response = assert_ok!(orchestrator.chat(&[], "How is Apple doing?").await);

        // quotes are about 100 minutes old: 0.95 - 0.07
        assert!(
            response.confidence > 0.87 && response.confidence < 0.89,
            "{}",
            response.confidence
        );
        assert_eq!(
            response.disclaimers,
            vec![disclaimer::contextual_disclaimer(ToolName::MarketContext).to_string()]
        );
    }

    #[tokio::test]
    async fn test_step_budget_offers_no_tools_on_last_step() {
        let generator = Arc::new(
            ScriptedGenerator::new(vec![])
                .with_fallback(ModelStep::calls(vec![call("portfolio_summary", json!({}))])),
        );
        let config = AgentConfig {
            max_steps: 2,
            max_retries: 0,
            ..AgentConfig::default()
        };
        let orchestrator = orchestrator(generator.clone(), config);

        let response = assert_ok!(orchestrator.chat(&[], "Summarize").await);
        assert_eq!(generator.call_count(), 2);
        assert_eq!(response.tool_calls.len(), 1);
        assert!(response.message.starts_with(prompt::STEP_LIMIT_FALLBACK));
    }

    #[tokio::test]
    async fn test_history_is_forwarded() {
        let generator = Arc::new(ScriptedGenerator::new(vec![ModelStep::answer(
            "You asked about diversification earlier; nothing has changed since.",
        )]));
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator =
            orchestrator(generator, AgentConfig::default()).with_store(store.clone());

        let id = Uuid::new_v4();
        let history = vec![
            ChatMessage::user("Am I diversified?"),
            ChatMessage::assistant("Mostly, yes."),
        ];
        assert_ok!(orchestrator.chat_turn(id, &history, "Anything new?").await);

        let turns = assert_ok!(store.load_turns(id).await);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].user_message, "Anything new?");
    }

    const STREAMED_ANSWER: &str =
        "Your portfolio is worth $19,750.00 in total across your three holdings.";

    #[tokio::test]
    async fn test_stream_chunks_then_metadata() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            ModelStep::calls(vec![call("portfolio_summary", json!({}))]),
            ModelStep::answer(STREAMED_ANSWER),
        ]));
        let orchestrator = Arc::new(orchestrator(generator, AgentConfig::default()));

        let mut rx = orchestrator.chat_stream(Uuid::new_v4(), vec![], "Worth?".to_string());
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }

        let sentinel_lines: Vec<&String> =
            chunks.iter().filter(|c| c.contains(METADATA_SENTINEL)).collect();
        assert_eq!(sentinel_lines.len(), 1);
        assert!(chunks.last().unwrap().contains(METADATA_SENTINEL));

        let body: String = chunks[..chunks.len() - 1].concat();
        assert!(body.starts_with(STREAMED_ANSWER));
        assert!(body.contains(disclaimer::DISCLAIMER));

        let line = chunks.last().unwrap().trim();
        let metadata: Value = serde_json::from_str(&line[METADATA_SENTINEL.len()..]).unwrap();
        assert!(metadata["confidence"].as_f64().unwrap() > 0.9);
        assert_eq!(metadata["toolCalls"].as_array().unwrap().len(), 1);
        assert!(metadata.get("message").is_none());
    }

    #[tokio::test]
    async fn test_stream_error_sentinel() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let orchestrator = Arc::new(
            orchestrator(generator, AgentConfig::default())
                .with_spend_tracker(Arc::new(SpendTracker::new(0.0))),
        );

        let mut rx = orchestrator.chat_stream(Uuid::new_v4(), vec![], "Hi".to_string());
        let line = rx.recv().await.unwrap();
        assert!(rx.recv().await.is_none());

        let metadata: Value =
            serde_json::from_str(&line.trim()[METADATA_SENTINEL.len()..]).unwrap();
        assert_eq!(metadata["error"]["type"], json!("budget_exceeded"));
    }
}
