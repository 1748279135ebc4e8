//! Central registry for the generation backend's endpoints and defaults.

/// Base URL used when no `OPENAI_BASE_URL` is configured.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";

/// Model used when neither the request nor the configuration names one.
pub const DEFAULT_MODEL: &str = "gpt-5-mini";

/// Path of the structured ("responses") endpoint.
pub const RESPONSES_PATH: &str = "/v1/responses";

/// Path of the conversational ("chat completions") endpoint.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Sampling temperature for free-text generation when none is given.
pub const DEFAULT_TEXT_TEMPERATURE: f32 = 0.5;

/// Models of the reasoning family reject an explicit sampling temperature.
const FIXED_TEMPERATURE_PREFIXES: &[&str] = &["gpt-5", "o1", "o3", "o4"];

/// Which of the two request shapes a call is made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Responses,
    ChatCompletions,
}

impl EndpointKind {
    pub fn path(self) -> &'static str {
        match self {
            EndpointKind::Responses => RESPONSES_PATH,
            EndpointKind::ChatCompletions => CHAT_COMPLETIONS_PATH,
        }
    }
}

/// Joins the configured base with the endpoint path, tolerating a trailing
/// slash or an already present `/v1` suffix on the base.
pub fn endpoint_for(base: &str, kind: EndpointKind) -> String {
    let base = base.trim().trim_end_matches('/');
    let base = base.strip_suffix("/v1").unwrap_or(base);
    format!("{}{}", base, kind.path())
}

/// Returns the model hint when it is non-blank, the fallback otherwise.
pub fn resolve_model<'a>(hint: Option<&'a str>, fallback: &'a str) -> &'a str {
    hint.map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(fallback)
}

/// Drops the temperature for models that only accept their default.
pub fn effective_temperature(model: &str, temperature: Option<f32>) -> Option<f32> {
    if FIXED_TEMPERATURE_PREFIXES
        .iter()
        .any(|prefix| model.starts_with(prefix))
    {
        None
    } else {
        temperature
    }
}
