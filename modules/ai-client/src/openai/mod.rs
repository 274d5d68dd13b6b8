mod client;
pub(crate) mod types;

use async_trait::async_trait;

use crate::error::AiError;
use crate::traits::{ChatCompletion, ChatModel};

use client::OpenAiClient;
use types::{accepts_temperature, ChatRequest, WireMessage};

// =============================================================================
// OpenAi
// =============================================================================

/// Client for OpenAI and any endpoint speaking the same chat-completions API.
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(client::OPENAI_API_URL)
    }

    fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key, self.http.clone());
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }
}

#[async_trait]
impl ChatModel for OpenAi {
    async fn complete(&self, request: ChatCompletion) -> Result<String, AiError> {
        let temperature = request
            .temperature
            .filter(|_| accepts_temperature(&request.model));
        let wire = ChatRequest {
            messages: request.messages.iter().map(WireMessage::from).collect(),
            model: request.model,
            temperature,
        };

        let response = self.client().chat(&wire, request.timeout).await?;
        Ok(response.text())
    }
}
