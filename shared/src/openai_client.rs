use async_trait::async_trait;
use openai::chat::{ChatCompletionMessage, ChatCompletionMessageRole};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::openai_settings::{endpoint_for, EndpointKind};

/// Transport-level failure of a single backend call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("http error: {0}")]
    Http(u16),
    #[error("timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("empty output")]
    EmptyOutput,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,
}

/// Call against the structured ("responses") endpoint.
#[derive(Debug, Clone)]
pub struct StructuredCall {
    pub model: String,
    pub input: String,
    pub force_json: bool,
    pub temperature: Option<f32>,
}

/// Call against the conversational endpoint.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub model: String,
    pub messages: Vec<ChatCompletionMessage>,
    pub force_json: bool,
    pub temperature: Option<f32>,
}

/// The two response shapes the backend answers with.
#[derive(Debug, Clone)]
pub enum BackendResponse {
    Structured(ResponsesBody),
    Conversational(ChatBody),
}

impl BackendResponse {
    /// Text carried by the response, empty when there is none.
    pub fn output_text(&self) -> String {
        match self {
            BackendResponse::Structured(body) => body.text(),
            BackendResponse::Conversational(body) => body.text(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesBody {
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub output: Vec<ResponsesOutputItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesOutputItem {
    #[serde(default)]
    pub content: Vec<ResponsesContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesContent {
    #[serde(default)]
    pub text: Option<ContentText>,
}

/// Content text is either a bare string or `{ "value": ... }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentText {
    Plain(String),
    Wrapped { value: String },
}

impl ContentText {
    fn as_str(&self) -> &str {
        match self {
            ContentText::Plain(s) => s,
            ContentText::Wrapped { value } => value,
        }
    }
}

impl ResponsesBody {
    pub fn text(&self) -> String {
        if let Some(text) = self.output_text.as_deref().filter(|t| !t.is_empty()) {
            return text.to_string();
        }
        self.output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter_map(|c| c.text.as_ref().map(ContentText::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatBody {
    pub fn text(&self) -> String {
        self.choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default()
    }
}

/// A remote natural-language generation backend.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn structured(&self, call: StructuredCall) -> Result<BackendResponse, BackendError>;
    async fn conversational(&self, call: ChatCall) -> Result<BackendResponse, BackendError>;
}

pub fn msg(role: ChatCompletionMessageRole, txt: &str) -> ChatCompletionMessage {
    ChatCompletionMessage {
        role,
        content: Some(txt.to_string()),
        ..Default::default()
    }
}

#[derive(Serialize)]
struct FormatSpec {
    #[serde(rename = "type")]
    kind: &'static str,
}

const JSON_FORMAT: FormatSpec = FormatSpec { kind: "json_object" };

#[derive(Serialize)]
struct TextOptions {
    format: FormatSpec,
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatCompletionMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<FormatSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// OpenAI-compatible HTTP backend.
///
/// # Example
/// ```rust,no_run
/// use shared::openai_client::{GenerationBackend, OpenAiBackend, StructuredCall};
///
/// #[tokio::main]
/// async fn main() {
///     let backend = OpenAiBackend::new(
///         reqwest::Client::new(),
///         std::env::var("OPENAI_API_KEY").unwrap_or_default(),
///         "https://api.openai.com",
///     );
///     let call = StructuredCall {
///         model: "gpt-5-mini".into(),
///         input: "Return {\"ok\": true}".into(),
///         force_json: true,
///         temperature: None,
///     };
///     match backend.structured(call).await {
///         Ok(resp) => println!("{}", resp.output_text()),
///         Err(e) => eprintln!("backend error: {e}"),
///     }
/// }
/// ```
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(client: Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        kind: EndpointKind,
        body: &B,
    ) -> Result<R, BackendError> {
        if self.api_key.trim().is_empty() {
            return Err(BackendError::MissingApiKey);
        }
        let url = endpoint_for(&self.base_url, kind);
        let res = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(%url, "network error to backend: {e}");
                BackendError::Network(e.to_string())
            })?;

        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        debug!(
            status = %status,
            "\u{2190} body = {}",
            String::from_utf8_lossy(&bytes[..bytes.len().min(1024)])
        );

        if !status.is_success() {
            return Err(BackendError::Http(status.as_u16()));
        }
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn structured(&self, call: StructuredCall) -> Result<BackendResponse, BackendError> {
        let req = ResponsesRequest {
            model: &call.model,
            input: &call.input,
            text: call.force_json.then_some(TextOptions {
                format: JSON_FORMAT,
            }),
            temperature: call.temperature,
        };
        debug!("\u{2192} responses request: model = {}", req.model);
        let body: ResponsesBody = self.post(EndpointKind::Responses, &req).await?;
        Ok(BackendResponse::Structured(body))
    }

    async fn conversational(&self, call: ChatCall) -> Result<BackendResponse, BackendError> {
        let req = ChatRequest {
            model: &call.model,
            messages: &call.messages,
            response_format: call.force_json.then_some(JSON_FORMAT),
            temperature: call.temperature,
        };
        debug!(
            "\u{2192} chat request: model = {}, messages = {}",
            req.model,
            req.messages.len()
        );
        let body: ChatBody = self.post(EndpointKind::ChatCompletions, &req).await?;
        Ok(BackendResponse::Conversational(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_prefers_output_text() {
        let body: ResponsesBody =
            serde_json::from_str(r#"{"output_text":"{\"a\":1}","output":[]}"#).unwrap();
        assert_eq!(body.text(), "{\"a\":1}");
    }

    #[test]
    fn responses_joins_content_parts() {
        let body: ResponsesBody = serde_json::from_str(
            r#"{"output":[
                {"type":"reasoning","content":[]},
                {"type":"message","content":[{"text":"{\"a\":"},{"text":{"value":"1}"}}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(BackendResponse::Structured(body).output_text(), "{\"a\":1}");
    }

    #[test]
    fn chat_reads_first_choice() {
        let body: ChatBody = serde_json::from_str(
            r#"{"model":"gpt-4o","choices":[{"index":0,"message":{"role":"assistant","content":"hi"}}]}"#,
        )
        .unwrap();
        assert_eq!(BackendResponse::Conversational(body).output_text(), "hi");
        assert_eq!(ChatBody::default().text(), "");
    }

    #[test]
    fn requests_omit_unset_options() {
        let req = ResponsesRequest {
            model: "m",
            input: "p",
            text: None,
            temperature: None,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({"model": "m", "input": "p"})
        );
        let req = ChatRequest {
            model: "m",
            messages: &[],
            response_format: Some(JSON_FORMAT),
            temperature: Some(0.5),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["response_format"]["type"], "json_object");
        assert_eq!(v["temperature"], 0.5);
    }
}
