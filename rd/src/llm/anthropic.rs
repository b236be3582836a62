//! Anthropic Messages API client
//!
//! Structured output is obtained by forcing a single tool whose input
//! schema is the requested JSON schema; the tool_use input block is the
//! structured value.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{LlmClient, LlmError, StructuredRequest, StructuredResponse, TokenUsage};
use crate::config::LlmConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic API client
#[derive(Debug)]
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl AnthropicClient {
    /// Create a client from configuration, reading the API key from the
    /// environment variable named in the config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            LlmError::Unavailable(format!("environment variable {} not set", config.api_key_env))
        })?;

        // Generous transport-level ceiling; the gateway enforces the real
        // per-call deadline.
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds * 2))
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            api_key,
            base_url: config.base_url.clone(),
            http,
        })
    }

    fn build_body(&self, request: &StructuredRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": [{
                "role": "user",
                "content": request.prompt,
            }],
            "tools": [{
                "name": request.schema_name,
                "description": "Record the structured answer.",
                "input_schema": request.schema,
            }],
            "tool_choice": {"type": "tool", "name": request.schema_name},
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ApiContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse { input: serde_json::Value },
    #[serde(rename = "text")]
    Text {
        #[allow(dead_code)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn structured(&self, request: StructuredRequest) -> Result<StructuredResponse, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ApiResponse = response.json().await?;
        let value = parsed
            .content
            .into_iter()
            .find_map(|block| match block {
                ApiContentBlock::ToolUse { input } => Some(input),
                _ => None,
            })
            .ok_or_else(|| LlmError::SchemaInvalid("response carried no tool_use block".into()))?;

        Ok(StructuredResponse {
            value,
            model: request.model,
            usage: TokenUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_body_forces_schema_tool() {
        let client = AnthropicClient {
            api_key: "test-key".into(),
            base_url: "https://api.anthropic.com".into(),
            http: Client::new(),
        };
        let request = StructuredRequest {
            system: "You are a research engine.".into(),
            prompt: "Decompose this question.".into(),
            schema_name: "task_decomposition".into(),
            schema: serde_json::json!({"type": "object", "required": ["tasks"]}),
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 4096,
        };

        let body = client.build_body(&request);
        assert_eq!(body["tool_choice"]["type"], "tool");
        assert_eq!(body["tool_choice"]["name"], "task_decomposition");
        assert_eq!(body["tools"][0]["input_schema"]["required"][0], "tasks");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_api_response_extracts_tool_use() {
        let raw = serde_json::json!({
            "content": [
                {"type": "text", "text": "thinking"},
                {"type": "tool_use", "id": "tu_1", "name": "task_decomposition",
                 "input": {"tasks": []}},
            ],
            "usage": {"input_tokens": 100, "output_tokens": 20},
        });
        let parsed: ApiResponse = serde_json::from_value(raw).unwrap();
        let value = parsed
            .content
            .into_iter()
            .find_map(|block| match block {
                ApiContentBlock::ToolUse { input } => Some(input),
                _ => None,
            })
            .unwrap();
        assert_eq!(value["tasks"], serde_json::json!([]));
    }

    #[test]
    fn test_missing_key_is_unavailable() {
        let config = LlmConfig {
            api_key_env: "RD_TEST_KEY_THAT_DOES_NOT_EXIST".into(),
            ..LlmConfig::default()
        };
        let err = AnthropicClient::from_config(&config).unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }
}
