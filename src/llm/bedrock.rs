//! Bedrock Converse API client.
//!
//! Requests are authenticated with a Bedrock API key sent as a bearer token.
//! With streaming enabled the client calls `converse-stream` and assembles the
//! reply from `contentBlockDelta` events; otherwise it calls `converse`.

use crate::error::{DatabotError, DatabotResult};
use crate::llm::eventstream::{Message, MessageDecoder};
use crate::llm::{BEDROCK_API_KEY_ENV, BedrockConfig, ChatModel};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use zeroize::Zeroizing;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct ConverseResponse {
    output: ConverseOutput,
}

#[derive(Debug, Deserialize)]
struct ConverseOutput {
    message: Option<ConverseMessage>,
}

#[derive(Debug, Deserialize)]
struct ConverseMessage {
    #[serde(default)]
    content: Vec<JsonValue>,
}

/// Chat model backed by Amazon Bedrock.
pub struct BedrockChat {
    client: reqwest::Client,
    config: BedrockConfig,
    api_key: Option<Zeroizing<String>>,
}

impl BedrockChat {
    pub fn new(config: BedrockConfig, api_key: Option<String>) -> DatabotResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DatabotError::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            api_key: api_key.filter(|k| !k.trim().is_empty()).map(Zeroizing::new),
        })
    }

    /// Build a client reading the API key from `AWS_BEARER_TOKEN_BEDROCK`.
    ///
    /// A missing key is not an error here; calls fail until one is provided.
    pub fn from_env(config: BedrockConfig) -> DatabotResult<Self> {
        let chat = Self::new(config, std::env::var(BEDROCK_API_KEY_ENV).ok())?;
        if chat.api_key.is_none() {
            warn!(
                env = BEDROCK_API_KEY_ENV,
                "No Bedrock API key configured; sql_db_query_checker will fail until it is set"
            );
        }
        Ok(chat)
    }

    pub fn config(&self) -> &BedrockConfig {
        &self.config
    }

    fn url(&self, operation: &str) -> DatabotResult<Url> {
        let mut url = Url::parse(&self.config.endpoint_url()).map_err(|e| {
            DatabotError::configuration(format!("Invalid Bedrock endpoint: {}", e))
        })?;
        url.path_segments_mut()
            .map_err(|_| DatabotError::configuration("Invalid Bedrock endpoint"))?
            .pop_if_empty()
            .push("model")
            .push(&self.config.model_id)
            .push(operation);
        Ok(url)
    }

    fn body(&self, system: &str, prompt: &str) -> JsonValue {
        let mut body = json!({
            "messages": [{"role": "user", "content": [{"text": prompt}]}],
            "inferenceConfig": {
                "temperature": self.config.temperature,
                "maxTokens": self.config.max_tokens,
            },
        });
        if !system.is_empty() {
            body["system"] = json!([{"text": system}]);
        }
        body
    }

    async fn send(&self, operation: &str, system: &str, prompt: &str) -> DatabotResult<reqwest::Response> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            DatabotError::configuration(format!(
                "Bedrock API key missing; set {}",
                BEDROCK_API_KEY_ENV
            ))
        })?;

        let response = self
            .client
            .post(self.url(operation)?)
            .bearer_auth(api_key.as_str())
            .json(&self.body(system, prompt))
            .send()
            .await
            .map_err(|e| DatabotError::llm(format!("Bedrock request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<JsonValue>(&text)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(text);
        Err(DatabotError::llm(format!(
            "Bedrock returned HTTP {}: {}",
            status.as_u16(),
            message
        )))
    }

    async fn converse(&self, system: &str, prompt: &str) -> DatabotResult<String> {
        let response: ConverseResponse = self
            .send("converse", system, prompt)
            .await?
            .json()
            .await
            .map_err(|e| DatabotError::llm(format!("Invalid Bedrock response: {}", e)))?;

        let text = response
            .output
            .message
            .map(|m| {
                m.content
                    .iter()
                    .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
                    .collect::<String>()
            })
            .unwrap_or_default();
        Ok(text)
    }

    async fn converse_stream(&self, system: &str, prompt: &str) -> DatabotResult<String> {
        let response = self.send("converse-stream", system, prompt).await?;
        let mut stream = response.bytes_stream();
        let mut decoder = MessageDecoder::new();
        let mut text = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| DatabotError::llm(format!("Bedrock stream interrupted: {}", e)))?;
            decoder.push(&chunk);
            while let Some(message) = decoder.next_message()? {
                if let Some(delta) = handle_stream_message(&message)? {
                    text.push_str(&delta);
                }
            }
        }

        if decoder.buffered() > 0 {
            return Err(DatabotError::llm("Bedrock stream ended mid-frame"));
        }
        Ok(text)
    }
}

/// Extract delta text from an event, or turn an exception into an error.
fn handle_stream_message(message: &Message) -> DatabotResult<Option<String>> {
    match message.message_type() {
        Some("event") => {}
        Some("exception") | Some("error") => {
            let kind = message
                .header_str(":exception-type")
                .or_else(|| message.header_str(":error-code"))
                .unwrap_or("unknown");
            let detail = serde_json::from_slice::<JsonValue>(&message.payload)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .or_else(|| message.header_str(":error-message").map(String::from))
                .unwrap_or_default();
            return Err(DatabotError::llm(format!("Bedrock {}: {}", kind, detail)));
        }
        other => {
            debug!(message_type = ?other, "Ignoring event stream frame");
            return Ok(None);
        }
    }

    if message.event_type() != Some("contentBlockDelta") {
        return Ok(None);
    }
    let payload: JsonValue = serde_json::from_slice(&message.payload)
        .map_err(|e| DatabotError::llm(format!("Invalid contentBlockDelta payload: {}", e)))?;
    Ok(payload
        .pointer("/delta/text")
        .and_then(|t| t.as_str())
        .map(String::from))
}

#[async_trait]
impl ChatModel for BedrockChat {
    async fn complete(&self, system: &str, prompt: &str) -> DatabotResult<String> {
        debug!(model = %self.config.model_id, streaming = self.config.streaming, "Calling Bedrock");
        if self.config.streaming {
            self.converse_stream(system, prompt).await
        } else {
            self.converse(system, prompt).await
        }
    }

    fn model(&self) -> &str {
        &self.config.model_id
    }
}

impl std::fmt::Debug for BedrockChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedrockChat")
            .field("config", &self.config)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::eventstream::encode_message;

    fn chat(key: Option<&str>) -> BedrockChat {
        BedrockChat::new(BedrockConfig::default(), key.map(String::from)).unwrap()
    }

    #[test]
    fn test_url_keeps_model_id_in_one_segment() {
        let url = chat(Some("k")).url("converse-stream").unwrap();
        assert_eq!(
            url.as_str(),
            "https://bedrock-runtime.eu-central-1.amazonaws.com/model/anthropic.claude-3-5-sonnet-20240620-v1:0/converse-stream"
        );
    }

    #[test]
    fn test_body_uses_zero_temperature() {
        let body = chat(Some("k")).body("sys", "hello");
        assert_eq!(body["inferenceConfig"]["temperature"], 0.0);
        assert_eq!(body["messages"][0]["content"][0]["text"], "hello");
        assert_eq!(body["system"][0]["text"], "sys");
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let err = chat(None).complete("", "hi").await.unwrap_err();
        assert!(matches!(err, DatabotError::Configuration { .. }));
        assert!(err.to_string().contains(BEDROCK_API_KEY_ENV));

        let err = chat(Some("  ")).complete("", "hi").await.unwrap_err();
        assert!(matches!(err, DatabotError::Configuration { .. }));
    }

    #[test]
    fn test_stream_exception_becomes_llm_error() {
        let frame = encode_message(
            &[
                (":message-type", "exception"),
                (":exception-type", "throttlingException"),
            ],
            br#"{"message":"Too many requests"}"#,
        );
        let mut decoder = MessageDecoder::new();
        decoder.push(&frame);
        let message = decoder.next_message().unwrap().unwrap();
        let err = handle_stream_message(&message).unwrap_err();
        assert!(matches!(err, DatabotError::Llm { .. }));
        assert!(err.to_string().contains("throttlingException: Too many requests"));
    }

    #[test]
    fn test_non_delta_events_ignored() {
        let frame = encode_message(
            &[(":message-type", "event"), (":event-type", "messageStop")],
            br#"{"stopReason":"end_turn"}"#,
        );
        let mut decoder = MessageDecoder::new();
        decoder.push(&frame);
        let message = decoder.next_message().unwrap().unwrap();
        assert_eq!(handle_stream_message(&message).unwrap(), None);
    }

    #[test]
    fn test_debug_redacts_key() {
        assert!(!format!("{:?}", chat(Some("secret-key"))).contains("secret-key"));
    }
}
