//! `POST /chat`: plain conversational text, no JSON coercion.

use actix_web::{web, HttpResponse};
use openai::chat::ChatCompletionMessageRole;
use serde::{Deserialize, Serialize};
use shared::openai_client::msg;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ApiError, ErrorCode};
use crate::routes::success;
use crate::session::AnonSession;
use crate::state::AppState;

const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<ChatRole> for ChatCompletionMessageRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::System => ChatCompletionMessageRole::System,
            ChatRole::User => ChatCompletionMessageRole::User,
            ChatRole::Assistant => ChatCompletionMessageRole::Assistant,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.messages.is_empty() {
            return Err(ApiError::invalid_request("messages must not be empty"));
        }
        for (i, m) in self.messages.iter().enumerate() {
            let len = m.content.trim().chars().count();
            if len == 0 || len > MAX_MESSAGE_CHARS {
                return Err(ApiError::invalid_request(format!(
                    "messages[{i}].content must be 1 to {MAX_MESSAGE_CHARS} characters"
                )));
            }
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ApiError::invalid_request("temperature must be between 0 and 2"));
            }
        }
        Ok(())
    }
}

pub async fn chat(
    state: web::Data<AppState>,
    session: AnonSession,
    body: web::Json<ChatRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    body.validate()?;

    let messages = body
        .messages
        .iter()
        .map(|m| msg(m.role.into(), m.content.trim()))
        .collect();
    let model_hint = body.model.as_deref().map(str::trim).filter(|m| !m.is_empty());

    let text = state
        .generator
        .generate_text(messages, model_hint, body.temperature, &CancellationToken::new())
        .await
        .map_err(|e| ApiError::from_pipeline(e, ErrorCode::ChatAiFailed))?;

    info!(strategy = %text.strategy, model = %text.model, "chat answered");
    Ok(success(
        &session,
        ChatResponse {
            content: text.content,
            model: text.model,
        },
    ))
}
