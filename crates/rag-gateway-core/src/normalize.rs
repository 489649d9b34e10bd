//! Response normalization.
//!
//! [`to_canonical`] turns whatever the backend returned into a
//! [`GenerationResult`]; [`to_openai_envelope`] renders a canonical result
//! as an OpenAI `chat.completion` object for clients that expect that
//! contract.
//!
//! Both Ollama-native and OpenAI-compatible field names are recognised:
//!
//! | Canonical | Ollama | OpenAI |
//! |-----------|--------|--------|
//! | text (chat) | `message.content` | `choices[0].message.content` |
//! | text (completion) | `response` | `choices[0].text` |
//! | prompt tokens | `prompt_eval_count` | `usage.prompt_tokens` |
//! | completion tokens | `eval_count` | `usage.completion_tokens` |
//! | finish reason | `done_reason` | `choices[0].finish_reason` |

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::endpoint::Endpoint;
use crate::models::GenerationResult;

/// Normalize a raw upstream payload produced by `endpoint`.
///
/// Fails only when no text can be found in the expected place.
pub fn to_canonical(raw: &Value, endpoint: Endpoint) -> Result<GenerationResult> {
    let first_choice = raw.pointer("/choices/0");
    let text = match endpoint {
        Endpoint::Chat => raw
            .pointer("/message/content")
            .or_else(|| first_choice.and_then(|c| c.pointer("/message/content")))
            .and_then(Value::as_str),
        Endpoint::Completion => raw
            .get("response")
            .or_else(|| first_choice.and_then(|c| c.get("text")))
            .and_then(Value::as_str),
    }
    .ok_or_else(|| {
        anyhow!(
            "Invalid {} response: no generated text found",
            endpoint.as_str()
        )
    })?;

    let prompt_token_count = raw
        .get("prompt_eval_count")
        .or_else(|| raw.pointer("/usage/prompt_tokens"))
        .and_then(Value::as_u64);
    let completion_token_count = raw
        .get("eval_count")
        .or_else(|| raw.pointer("/usage/completion_tokens"))
        .and_then(Value::as_u64);
    let finish_reason = raw
        .get("done_reason")
        .or_else(|| first_choice.and_then(|c| c.get("finish_reason")))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(GenerationResult {
        text: text.to_string(),
        prompt_token_count,
        completion_token_count,
        finish_reason,
    })
}

/// OpenAI-compatible `chat.completion` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiCompletion {
    pub id: String,
    pub object: String,
    /// Unix seconds.
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAiChoice>,
    pub usage: OpenAiUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiChoice {
    pub index: u32,
    pub message: OpenAiMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Render a canonical result as an OpenAI envelope stamped with now.
pub fn to_openai_envelope(result: &GenerationResult, model: &str) -> OpenAiCompletion {
    to_openai_envelope_at(result, model, Utc::now())
}

/// Like [`to_openai_envelope`] with an explicit clock.
pub fn to_openai_envelope_at(
    result: &GenerationResult,
    model: &str,
    now: DateTime<Utc>,
) -> OpenAiCompletion {
    let prompt_tokens = result.prompt_token_count.unwrap_or(0);
    let completion_tokens = result.completion_token_count.unwrap_or(0);
    OpenAiCompletion {
        id: format!("chatcmpl-{}", now.timestamp_millis()),
        object: "chat.completion".to_string(),
        created: now.timestamp(),
        model: model.to_string(),
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiMessage {
                role: "assistant".to_string(),
                content: result.text.clone(),
            },
            finish_reason: result
                .finish_reason
                .clone()
                .unwrap_or_else(|| "stop".to_string()),
        }],
        usage: OpenAiUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_ollama_shape() {
        let raw = json!({
            "model": "llama3:8b",
            "message": {"role": "assistant", "content": "Hello!"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 12,
            "eval_count": 4
        });
        let r = to_canonical(&raw, Endpoint::Chat).unwrap();
        assert_eq!(r.text, "Hello!");
        assert_eq!(r.prompt_token_count, Some(12));
        assert_eq!(r.completion_token_count, Some(4));
        assert_eq!(r.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_chat_openai_shape() {
        let raw = json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi"},
                "finish_reason": "length"
            }],
            "usage": {"prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10}
        });
        let r = to_canonical(&raw, Endpoint::Chat).unwrap();
        assert_eq!(r.text, "Hi");
        assert_eq!(r.prompt_token_count, Some(7));
        assert_eq!(r.completion_token_count, Some(3));
        assert_eq!(r.finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn test_completion_passthrough() {
        let raw = json!({"response": "42", "done": true});
        let r = to_canonical(&raw, Endpoint::Completion).unwrap();
        assert_eq!(r.text, "42");
        assert_eq!(r.prompt_token_count, None);
        assert_eq!(r.finish_reason, None);
    }

    #[test]
    fn test_missing_text_is_error() {
        let raw = json!({"response": "wrong field for chat"});
        assert!(to_canonical(&raw, Endpoint::Chat).is_err());
    }

    #[test]
    fn test_envelope_usage_and_content() {
        let result = GenerationResult {
            text: "hi".to_string(),
            prompt_token_count: Some(3),
            completion_token_count: Some(2),
            finish_reason: None,
        };
        let env = to_openai_envelope(&result, "llama3:8b");
        assert_eq!(env.usage.total_tokens, 5);
        assert_eq!(env.choices.len(), 1);
        assert_eq!(env.choices[0].message.content, "hi");
        assert_eq!(env.choices[0].message.role, "assistant");
        assert_eq!(env.choices[0].finish_reason, "stop");
        assert_eq!(env.object, "chat.completion");
    }

    #[test]
    fn test_envelope_missing_counts_default_to_zero() {
        let result = GenerationResult {
            text: "x".to_string(),
            completion_token_count: Some(9),
            ..Default::default()
        };
        let env = to_openai_envelope(&result, "m");
        assert_eq!(env.usage.prompt_tokens, 0);
        assert_eq!(env.usage.total_tokens, 9);
    }

    #[test]
    fn test_envelope_total_saturates_on_huge_counts() {
        let raw = json!({"response": "x", "prompt_eval_count": u64::MAX, "eval_count": 1});
        let result = to_canonical(&raw, Endpoint::Completion).unwrap();
        let env = to_openai_envelope(&result, "m");
        assert_eq!(env.usage.prompt_tokens, u64::MAX);
        assert_eq!(env.usage.completion_tokens, 1);
        assert_eq!(env.usage.total_tokens, u64::MAX);
    }

    #[test]
    fn test_envelope_id_from_clock() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let env = to_openai_envelope_at(&GenerationResult::default(), "m", now);
        assert_eq!(env.id, "chatcmpl-1700000000000");
        assert_eq!(env.created, 1_700_000_000);
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["choices"][0]["index"], 0);
    }
}
