//! Text-generation boundary
//!
//! One `generate` call is one model step: the model either answers or asks
//! for tool calls. The orchestrator owns the step loop, so generators stay
//! stateless apart from their HTTP client.

pub mod gemini;
pub use gemini::GeminiGenerator;

use crate::error::AgentError;
use crate::models::{AgentMessage, TokenUsage, ToolCallRequest};
use crate::tools::ToolDefinition;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Everything the model sees for one step
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub system_prompt: &'a str,
    pub messages: &'a [AgentMessage],
    pub tools: &'a [ToolDefinition],
}

/// Output of a single model step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelStep {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
}

impl ModelStep {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
        };
        self
    }

    /// A step without tool calls ends the attempt
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<ModelStep>;
}

/// Replays queued steps in order. Once the queue is drained it keeps
/// returning the fallback step, or fails if there is none.
pub struct ScriptedGenerator {
    steps: Mutex<VecDeque<Result<ModelStep>>>,
    fallback: Option<ModelStep>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    system_prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(steps: Vec<ModelStep>) -> Self {
        Self::from_results(steps.into_iter().map(Ok).collect())
    }

    pub fn from_results(steps: Vec<Result<ModelStep>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: None,
            delay: None,
            calls: AtomicUsize::new(0),
            system_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `step`
    pub fn repeating(step: ModelStep) -> Self {
        Self::new(Vec::new()).with_fallback(step)
    }

    pub fn with_fallback(mut self, step: ModelStep) -> Self {
        self.fallback = Some(step);
        self
    }

    /// Sleep before every step
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// System prompts seen so far, one per call
    pub async fn system_prompts(&self) -> Vec<String> {
        self.system_prompts.lock().await.clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<ModelStep> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.system_prompts
            .lock()
            .await
            .push(request.system_prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.steps.lock().await.pop_front() {
            Some(step) => step,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AgentError::ApiError("Scripted generator exhausted".to_string())),
        }
    }
}
