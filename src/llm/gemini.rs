//! Gemini `generateContent` client with function calling
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{GenerationRequest, ModelStep, TextGenerator};
use crate::error::AgentError;
use crate::models::{AgentMessage, TokenUsage, ToolCallRequest};
use crate::tools::ToolDefinition;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::env;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Schema keywords the function-declaration format accepts
const SCHEMA_KEYS: &[&str] = &[
    "type",
    "description",
    "enum",
    "items",
    "properties",
    "required",
    "minimum",
    "maximum",
    "minItems",
    "maxItems",
    "nullable",
];

pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiGenerator {
    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
        })
    }

    /// Reads `GEMINI_API_KEY` and optional `GEMINI_MODEL`
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                AgentError::ValidationError("GEMINI_API_KEY not configured".to_string())
            })?;
        let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(api_key, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<ModelStep> {
        let url = format!("{}/{}:generateContent", BASE_URL, self.model);
        let body = build_request(request);

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AgentError::ApiError(format!("Gemini request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Gemini API error response: {}", error_text);
            return Err(AgentError::ApiError(format!(
                "Gemini returned {}: {}",
                status, error_text
            )));
        }

        let parsed: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AgentError::ApiError(format!("Gemini parse error: {}", e))
        })?;

        into_step(parsed)
    }
}

//
// ================= Wire Types =================
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

//
// ================= Mapping =================
//

fn text_part(text: &str) -> Part {
    Part {
        text: Some(text.to_string()),
        ..Default::default()
    }
}

fn build_request(request: &GenerationRequest<'_>) -> GeminiRequest {
    let mut contents: Vec<Content> = Vec::with_capacity(request.messages.len());

    for message in request.messages {
        match message {
            AgentMessage::User { text } => contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![text_part(text)],
            }),
            AgentMessage::Assistant { text, tool_calls } => {
                let mut parts = Vec::with_capacity(tool_calls.len() + 1);
                if !text.is_empty() {
                    parts.push(text_part(text));
                }
                parts.extend(tool_calls.iter().map(|call| Part {
                    function_call: Some(FunctionCall {
                        name: call.tool_name.clone(),
                        args: call.args.clone(),
                    }),
                    ..Default::default()
                }));
                contents.push(Content {
                    role: Some("model".to_string()),
                    parts,
                });
            }
            AgentMessage::ToolResult {
                tool_name, result, ..
            } => {
                let part = Part {
                    function_response: Some(FunctionResponse {
                        name: tool_name.clone(),
                        response: json!({ "content": result }),
                    }),
                    ..Default::default()
                };
                // Responses to one step's calls share a single turn
                match contents.last_mut() {
                    Some(last)
                        if last.role.as_deref() == Some("user")
                            && last.parts.iter().all(|p| p.function_response.is_some()) =>
                    {
                        last.parts.push(part)
                    }
                    _ => contents.push(Content {
                        role: Some("user".to_string()),
                        parts: vec![part],
                    }),
                }
            }
        }
    }

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![ToolDeclarations {
            function_declarations: request.tools.iter().map(declaration).collect(),
        }]
    };

    GeminiRequest {
        contents,
        system_instruction: Content {
            role: None,
            parts: vec![text_part(request.system_prompt)],
        },
        tools,
        generation_config: GenerationConfig {
            temperature: 0.2,
            max_output_tokens: 2048,
        },
    }
}

fn declaration(tool: &ToolDefinition) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.as_str().to_string(),
        description: tool.description.clone(),
        parameters: sanitize_schema(&tool.parameters),
    }
}

/// Drop JSON-schema keywords the declaration format rejects
fn sanitize_schema(schema: &Value) -> Value {
    let Some(object) = schema.as_object() else {
        return schema.clone();
    };

    let mut out = Map::new();
    for (key, value) in object {
        if !SCHEMA_KEYS.contains(&key.as_str()) {
            continue;
        }
        let value = match key.as_str() {
            "items" => sanitize_schema(value),
            "properties" => Value::Object(
                value
                    .as_object()
                    .map(|props| {
                        props
                            .iter()
                            .map(|(name, prop)| (name.clone(), sanitize_schema(prop)))
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            _ => value.clone(),
        };
        out.insert(key.clone(), value);
    }
    Value::Object(out)
}

fn into_step(response: GeminiResponse) -> Result<ModelStep> {
    let usage = response
        .usage_metadata
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::ApiError("No candidates in Gemini response".to_string()))?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(AgentError::ApiError(
            "Gemini blocked the response for safety".to_string(),
        ));
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.parts {
        if let Some(chunk) = part.text {
            text.push_str(&chunk);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCallRequest {
                call_id: format!("call_{}", Uuid::new_v4().simple()),
                tool_name: call.name,
                args: call.args,
            });
        }
    }

    Ok(ModelStep {
        text,
        tool_calls,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolName;

    #[test]
    fn test_request_serialization() {
        let messages = vec![
            AgentMessage::User {
                text: "How is my portfolio doing?".to_string(),
            },
            AgentMessage::Assistant {
                text: String::new(),
                tool_calls: vec![
                    ToolCallRequest {
                        call_id: "a".to_string(),
                        tool_name: "portfolio_summary".to_string(),
                        args: json!({}),
                    },
                    ToolCallRequest {
                        call_id: "b".to_string(),
                        tool_name: "market_context".to_string(),
                        args: json!({ "symbols": ["AAPL"] }),
                    },
                ],
            },
            AgentMessage::ToolResult {
                call_id: "a".to_string(),
                tool_name: "portfolio_summary".to_string(),
                result: json!({ "totalValue": 19750.0 }),
            },
            AgentMessage::ToolResult {
                call_id: "b".to_string(),
                tool_name: "market_context".to_string(),
                result: json!({ "quotes": [] }),
            },
        ];
        let tools = vec![ToolDefinition {
            name: ToolName::PortfolioSummary,
            description: "summary".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }];
        let request = GenerationRequest {
            system_prompt: "You are a portfolio assistant",
            messages: &messages,
            tools: &tools,
        };

        let json = serde_json::to_value(build_request(&request)).unwrap();

        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], json!("model"));
        assert_eq!(contents[1]["parts"].as_array().unwrap().len(), 2);
        assert_eq!(
            contents[1]["parts"][1]["functionCall"]["name"],
            json!("market_context")
        );
        // both tool results merged into one turn
        assert_eq!(contents[2]["parts"].as_array().unwrap().len(), 2);
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["content"]["totalValue"],
            json!(19750.0)
        );
        assert_eq!(
            json["tools"][0]["functionDeclarations"][0]["name"],
            json!("portfolio_summary")
        );
        assert_eq!(
            json["systemInstruction"]["parts"][0]["text"],
            json!("You are a portfolio assistant")
        );
    }

    #[test]
    fn test_sanitize_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "weight": { "type": "number", "exclusiveMinimum": 0, "maximum": 1 },
                "start": { "type": "string", "format": "date" },
                "map": { "type": "object", "additionalProperties": { "type": "number" } }
            }
        });

        let clean = sanitize_schema(&schema);
        assert_eq!(clean["properties"]["weight"], json!({ "type": "number", "maximum": 1 }));
        assert_eq!(clean["properties"]["start"], json!({ "type": "string" }));
        assert_eq!(clean["properties"]["map"], json!({ "type": "object" }));
    }

    #[test]
    fn test_response_into_step() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Checking. " },
                        { "functionCall": { "name": "tax_estimator", "args": { "taxYear": 2025 } } }
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 120, "candidatesTokenCount": 30, "totalTokenCount": 150 }
        }))
        .unwrap();

        let step = into_step(response).unwrap();
        assert_eq!(step.text, "Checking. ");
        assert_eq!(step.tool_calls.len(), 1);
        assert_eq!(step.tool_calls[0].tool_name, "tax_estimator");
        assert_eq!(step.tool_calls[0].args["taxYear"], json!(2025));
        assert_eq!(step.usage.total(), 150);
    }

    #[test]
    fn test_empty_candidates() {
        let response: GeminiResponse = serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(matches!(into_step(response), Err(AgentError::ApiError(_))));
    }
}
