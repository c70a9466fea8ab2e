use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use chatgpt::types::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shown through the parser when a provider answers with an unexpected body.
pub const MISSING_CONTENT_TEXT: &str = "AI分析失败，请稍后重试。";

/// How a provider lays out its two answer sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseFormat {
    /// `【分析结果】：...` / `【医学建议】：...`
    BracketTagged,
    /// `### 分析结果` / `### 医学建议`
    MarkdownHeading,
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bracket" | "bracket-tagged" => Ok(ResponseFormat::BracketTagged),
            "markdown" | "markdown-heading" => Ok(ResponseFormat::MarkdownHeading),
            other => Err(format!(
                "unknown response format '{}' (expected 'bracket' or 'markdown')",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub endpoint_url: String,
    pub credential: String,
    pub model_id: String,
    pub response_format: ResponseFormat,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// `None` keeps the HTTP client's default.
    pub timeout: Option<Duration>,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request to {provider} failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} answered with HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
}

/// Text of a successful reply plus the model the provider says answered.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReply {
    pub content: String,
    pub model: Option<String>,
}

pub trait CompletionProvider: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionReply, ProviderError>> + Send + 'a>>;
    fn name(&self) -> &str;
    fn response_format(&self) -> ResponseFormat;
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completion endpoint reached over HTTP with a bearer credential.
pub struct HttpProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(config, builder.build()?))
    }

    pub fn with_client(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    async fn send(&self, request: &CompletionRequest) -> Result<CompletionReply, ProviderError> {
        let body = ChatCompletionBody {
            model: &self.config.model_id,
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: request.system.clone(),
                },
                ChatMessage {
                    role: Role::User,
                    content: request.prompt.clone(),
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let transport = |source| ProviderError::Transport {
            provider: self.config.name.clone(),
            source,
        };

        let response = self
            .client
            .post(&self.config.endpoint_url)
            .bearer_auth(&self.config.credential)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: self.config.name.clone(),
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        Ok(reply_from_body(&text))
    }
}

/// A body without `choices[0].message.content` still counts as an answer; its
/// text is replaced so the parser fallback has something to show.
fn reply_from_body(body: &str) -> CompletionReply {
    match serde_json::from_str::<ChatCompletionResponse>(body) {
        Ok(parsed) => {
            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_else(|| MISSING_CONTENT_TEXT.to_string());
            CompletionReply {
                content,
                model: parsed.model,
            }
        }
        Err(e) => {
            log::warn!("Unexpected completion body: {}", e);
            CompletionReply {
                content: MISSING_CONTENT_TEXT.to_string(),
                model: None,
            }
        }
    }
}

impl CompletionProvider for HttpProvider {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionReply, ProviderError>> + Send + 'a>> {
        Box::pin(self.send(request))
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn response_format(&self) -> ResponseFormat {
        self.config.response_format
    }
}
