use std::time::Duration;

use async_trait::async_trait;
use nlsql_types::CompletionRequest;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CompletionEngine, LlmError};

/// Which chat-completions URL/auth scheme to speak.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatApiFlavor {
    /// `{base_url}/chat/completions` with a bearer token.
    OpenAi,
    /// `{base_url}/openai/deployments/{model}/chat/completions?api-version=...` with an `api-key` header.
    Azure { api_version: String },
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat-completions client for OpenAI-compatible and Azure OpenAI endpoints.
pub struct HttpChatEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    flavor: ChatApiFlavor,
}

impl HttpChatEngine {
    pub fn new(
        base_url: String,
        model: String,
        api_key: Option<String>,
        flavor: ChatApiFlavor,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::new(format!("client build error: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            flavor,
        })
    }

    fn url(&self) -> String {
        match &self.flavor {
            ChatApiFlavor::OpenAi => format!("{}/chat/completions", self.base_url),
            ChatApiFlavor::Azure { api_version } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, self.model, api_version
            ),
        }
    }
}

#[async_trait]
impl CompletionEngine for HttpChatEngine {
    async fn complete(&self, req: CompletionRequest) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(req.turns.len() + 1);
        if !req.system.is_empty() {
            messages.push(ChatMessage {
                role: "system".into(),
                content: Some(req.system),
            });
        }
        for turn in req.turns {
            messages.push(ChatMessage {
                role: turn.role.as_str().into(),
                content: Some(turn.content),
            });
        }

        let body = ChatRequest {
            // Azure selects the model through the deployment path.
            model: match self.flavor {
                ChatApiFlavor::OpenAi => Some(self.model.as_str()),
                ChatApiFlavor::Azure { .. } => None,
            },
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream: false,
        };

        let mut http = self.client.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            http = match self.flavor {
                ChatApiFlavor::OpenAi => http.bearer_auth(key),
                ChatApiFlavor::Azure { .. } => http.header("api-key", key),
            };
        }

        let resp = http
            .send()
            .await
            .map_err(|e| LlmError::new(format!("HTTP error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(LlmError::new(format!("HTTP status: {status} {detail}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::new(format!("response parse error: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::new("completion had no choices"))?;
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}
