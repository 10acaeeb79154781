//! Wire formats for the OpenAI-compatible and Anthropic Messages APIs

use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, ChatRequest, ModelInfo, RawResponse, Role, Usage};

/// Output budget sent to Anthropic when the caller sets none
pub const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
pub struct OpenAiChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl<'a> OpenAiChatRequest<'a> {
    pub fn new(request: &'a ChatRequest, model: &'a str) -> Self {
        Self {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    pub message: OpenAiChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl OpenAiChatResponse {
    /// Convert into the neutral response, `None` when there is no choice
    pub fn into_raw(self, requested_model: &str) -> Option<RawResponse> {
        let choice = self.choices.into_iter().next()?;
        Some(RawResponse {
            content: choice.message.content.unwrap_or_default(),
            model: self.model.unwrap_or_else(|| requested_model.to_owned()),
            usage: self.usage.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenAiModelList {
    #[serde(default)]
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct AnthropicRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AnthropicMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

impl<'a> AnthropicRequest<'a> {
    /// System messages are joined into the top-level `system` field
    pub fn new(request: &'a ChatRequest, model: &'a str) -> Self {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages = request
            .messages
            .iter()
            .filter_map(|m| match m.role {
                Role::System => None,
                Role::User => Some(AnthropicMessage {
                    role: "user",
                    content: &m.content,
                }),
                Role::Assistant => Some(AnthropicMessage {
                    role: "assistant",
                    content: &m.content,
                }),
            })
            .collect();

        Self {
            model,
            max_tokens: request.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            // Anthropic caps temperature at 1.0
            temperature: request.temperature.map(|t| t.min(1.0)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl AnthropicResponse {
    pub fn into_raw(self, requested_model: &str) -> RawResponse {
        let content = self
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = self.usage.unwrap_or_default();

        RawResponse {
            content,
            model: self.model.unwrap_or_else(|| requested_model.to_owned()),
            usage: Usage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage.input_tokens + usage.output_tokens,
            },
            finish_reason: self.stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_openai_body_parses() {
        let body = r#"{"choices":[{"message":{"content":"ok"}}],"usage":{"total_tokens":10}}"#;
        let parsed: OpenAiChatResponse = serde_json::from_str(body).unwrap();
        let raw = parsed.into_raw("gpt-oss-20b").unwrap();

        assert_eq!(raw.content, "ok");
        assert_eq!(raw.model, "gpt-oss-20b");
        assert_eq!(raw.usage.total(), 10);
    }

    #[test]
    fn openai_without_choices_is_none() {
        let parsed: OpenAiChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(parsed.into_raw("m").is_none());
    }

    #[test]
    fn anthropic_request_lifts_system_messages() {
        let request = ChatRequest::new(vec![
            ChatMessage::system("be terse"),
            ChatMessage::system("Context:\n{}"),
            ChatMessage::user("hello"),
        ])
        .with_temperature(1.7);
        let wire = AnthropicRequest::new(&request, "claude");

        assert_eq!(wire.system.as_deref(), Some("be terse\n\nContext:\n{}"));
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.max_tokens, ANTHROPIC_DEFAULT_MAX_TOKENS);
        assert_eq!(wire.temperature, Some(1.0));
    }

    #[test]
    fn anthropic_text_blocks_are_joined() {
        let body = serde_json::json!({
            "model": "claude-3-5-haiku-latest",
            "content": [{"type": "text", "text": "a"}, {"type": "tool_use"}, {"type": "text", "text": "b"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 4, "output_tokens": 2}
        });
        let parsed: AnthropicResponse = serde_json::from_value(body).unwrap();
        let raw = parsed.into_raw("x");

        assert_eq!(raw.content, "ab");
        assert_eq!(raw.usage.total(), 6);
        assert_eq!(raw.finish_reason.as_deref(), Some("end_turn"));
    }
}
