//! Chat model abstraction.
//!
//! The toolkit only needs single-turn completions, so the trait is small.
//! [`BedrockChat`] is the production implementation.

pub mod bedrock;
pub mod eventstream;

pub use bedrock::BedrockChat;

use crate::error::DatabotResult;
use async_trait::async_trait;

/// Model used by the agent-facing tools.
pub const DATABOT_AGENT_MODEL: &str = "anthropic.claude-3-5-sonnet-20240620-v1:0";

/// Environment variable holding the Bedrock API key.
pub const BEDROCK_API_KEY_ENV: &str = "AWS_BEARER_TOKEN_BEDROCK";

/// Trait for chat model backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one prompt under a system instruction and return the reply text.
    async fn complete(&self, system: &str, prompt: &str) -> DatabotResult<String>;

    /// Get the model name.
    fn model(&self) -> &str;
}

/// Bedrock client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BedrockConfig {
    pub model_id: String,
    pub region: String,
    pub streaming: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Overrides `https://bedrock-runtime.<region>.amazonaws.com`
    pub endpoint: Option<String>,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            model_id: DATABOT_AGENT_MODEL.to_string(),
            region: "eu-central-1".to_string(),
            streaming: true,
            temperature: 0.0,
            max_tokens: 2048,
            endpoint: None,
        }
    }
}

impl BedrockConfig {
    /// Runtime endpoint base URL.
    pub fn endpoint_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", self.region))
            .trim_end_matches('/')
            .to_string()
    }
}
