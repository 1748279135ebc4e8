//! Anonymous session identity and the context-token gate binding one
//! workflow's stages together.

use std::collections::HashMap;
use std::future::{ready, Ready};
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest, HttpResponseBuilder};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const ANON_COOKIE: &str = "anon_id";
pub const ANON_HEADER: &str = "x-anon-id";
pub const CONTEXT_HEADER: &str = "x-context-id";

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("anonymous session id is missing")]
    MissingAnonId,
    #[error("context id is missing")]
    MissingSessionContext,
    #[error("context id is unknown, expired or bound to another session")]
    InvalidSessionContext,
}

/// Anonymous caller identity from the `anon_id` cookie or `x-anon-id`
/// header. A fresh id is minted when the request carries neither.
#[derive(Debug, Clone)]
pub struct AnonSession {
    pub id: String,
    pub minted: bool,
}

impl AnonSession {
    pub fn from_request_parts(req: &HttpRequest) -> Self {
        let presented = req
            .cookie(ANON_COOKIE)
            .map(|c| c.value().trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| {
                req.headers()
                    .get(ANON_HEADER)
                    .and_then(|h| h.to_str().ok())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            });
        match presented {
            Some(id) => Self { id, minted: false },
            None => Self {
                id: Uuid::new_v4().to_string(),
                minted: true,
            },
        }
    }

    /// The id, refusing one minted for this very request.
    pub fn require_presented(&self) -> Result<&str, ContextError> {
        if self.minted {
            Err(ContextError::MissingAnonId)
        } else {
            Ok(&self.id)
        }
    }

    /// Sets the `anon_id` cookie when the id was minted for this request.
    pub fn apply(&self, builder: &mut HttpResponseBuilder) {
        if self.minted {
            builder.cookie(
                Cookie::build(ANON_COOKIE, self.id.clone())
                    .path("/")
                    .http_only(true)
                    .same_site(SameSite::Lax)
                    .max_age(time::Duration::days(365))
                    .finish(),
            );
        }
    }
}

impl FromRequest for AnonSession {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(Self::from_request_parts(req)))
    }
}

/// Context token from the `x-context-id` header, else the body field.
pub fn context_token(req: &HttpRequest, body_field: Option<&str>) -> Option<String> {
    req.headers()
        .get(CONTEXT_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| body_field.map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
}

/// Issues and checks opaque tokens bound to one anonymous session.
pub trait ContextStore: Send + Sync {
    fn issue(&self, anon_id: &str) -> String;
    fn validate(&self, token: &str, anon_id: &str) -> Result<(), ContextError>;
    /// Drops expired tokens and returns how many were removed.
    fn purge_expired(&self) -> usize;
}

#[derive(Debug)]
struct ContextEntry {
    anon_id: String,
    issued_at: Instant,
}

#[derive(Debug, Clone)]
pub struct InMemoryContextStore {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, ContextEntry>>>,
}

impl InMemoryContextStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContextStore for InMemoryContextStore {
    fn issue(&self, anon_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.entries.write().insert(
            token.clone(),
            ContextEntry {
                anon_id: anon_id.to_string(),
                issued_at: Instant::now(),
            },
        );
        token
    }

    fn validate(&self, token: &str, anon_id: &str) -> Result<(), ContextError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ContextError::MissingSessionContext);
        }
        let entries = self.entries.read();
        match entries.get(token) {
            Some(entry) if entry.anon_id == anon_id && entry.issued_at.elapsed() < self.ttl => Ok(()),
            _ => Err(ContextError::InvalidSessionContext),
        }
    }

    fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.issued_at.elapsed() < self.ttl);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, remaining = entries.len(), "purged expired context tokens");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn token_is_bound_to_issuing_session() {
        let store = InMemoryContextStore::new(Duration::from_secs(60));
        let token = store.issue("session-x");
        assert_eq!(store.validate(&token, "session-x"), Ok(()));
        assert_eq!(
            store.validate(&token, "session-y"),
            Err(ContextError::InvalidSessionContext)
        );
        assert_eq!(
            store.validate("  ", "session-x"),
            Err(ContextError::MissingSessionContext)
        );
        assert_eq!(
            store.validate("never-issued", "session-x"),
            Err(ContextError::InvalidSessionContext)
        );
    }

    #[test]
    fn expired_tokens_are_rejected_and_purged() {
        let store = InMemoryContextStore::new(Duration::ZERO);
        let token = store.issue("session-x");
        assert_eq!(
            store.validate(&token, "session-x"),
            Err(ContextError::InvalidSessionContext)
        );
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn cookie_wins_over_header_and_absence_mints() {
        let req = TestRequest::default()
            .cookie(Cookie::new(ANON_COOKIE, "from-cookie"))
            .insert_header((ANON_HEADER, "from-header"))
            .to_http_request();
        let session = AnonSession::from_request_parts(&req);
        assert_eq!(session.id, "from-cookie");
        assert!(!session.minted);

        let req = TestRequest::default()
            .insert_header((ANON_HEADER, "from-header"))
            .to_http_request();
        assert_eq!(AnonSession::from_request_parts(&req).id, "from-header");

        let session = AnonSession::from_request_parts(&TestRequest::default().to_http_request());
        assert!(session.minted);
        assert_eq!(session.require_presented(), Err(ContextError::MissingAnonId));
    }

    #[test]
    fn context_header_beats_body_field() {
        let req = TestRequest::default()
            .insert_header((CONTEXT_HEADER, "hdr"))
            .to_http_request();
        assert_eq!(context_token(&req, Some("body")).as_deref(), Some("hdr"));
        let req = TestRequest::default().to_http_request();
        assert_eq!(context_token(&req, Some(" body ")).as_deref(), Some("body"));
        assert_eq!(context_token(&req, None), None);
    }
}
