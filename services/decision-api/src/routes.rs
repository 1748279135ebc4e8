use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse, Responder};
use serde::Serialize;
use shared::dto::Worry;

use crate::error::ApiError;
use crate::session::{context_token, AnonSession, ContextError};
use crate::state::AppState;
use crate::{analysis, chat, framing, questions};

const MAX_WORRY_CHARS: usize = 2000;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessEnvelope<T> {
    is_success: bool,
    data: T,
}

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse { status: "ok" })
}

/// Wraps `data` in the success envelope and sets a freshly minted session
/// cookie.
pub fn success<T: Serialize>(session: &AnonSession, data: T) -> HttpResponse {
    let mut builder = HttpResponse::Ok();
    session.apply(&mut builder);
    builder.json(SuccessEnvelope {
        is_success: true,
        data,
    })
}

pub fn ensure_worry(worry: &Worry) -> Result<(), ApiError> {
    let content = worry.content.trim();
    if content.is_empty() {
        return Err(ApiError::invalid_request("worry.content must not be empty"));
    }
    if content.chars().count() > MAX_WORRY_CHARS {
        return Err(ApiError::invalid_request(format!(
            "worry.content must be at most {MAX_WORRY_CHARS} characters"
        )));
    }
    Ok(())
}

/// Resolves the caller's context token and checks it belongs to the session.
pub fn require_context(
    state: &AppState,
    req: &HttpRequest,
    session: &AnonSession,
    body_field: Option<&str>,
) -> Result<String, ApiError> {
    let anon_id = session.require_presented()?;
    let token = context_token(req, body_field).ok_or(ContextError::MissingSessionContext)?;
    state.contexts.validate(&token, anon_id)?;
    Ok(token)
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::invalid_request(format!("invalid request body: {err}")).into()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .route("/health", web::get().to(health))
        .route("/framing", web::post().to(framing::framing))
        .route("/generate-questions", web::post().to(questions::generate_questions))
        .route("/analyze", web::post().to(analysis::analyze))
        .route("/chat", web::post().to(chat::chat));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worry_content_bounds() {
        let worry = |content: &str| Worry {
            content: content.into(),
            category: None,
        };
        assert!(ensure_worry(&worry("Should I move?")).is_ok());
        assert!(ensure_worry(&worry("   ")).is_err());
        assert!(ensure_worry(&worry(&"x".repeat(MAX_WORRY_CHARS + 1))).is_err());
    }
}
