//! Tiered structured generation against an unreliable backend.
//!
//! Strategies are tried strictly in order, once each. A strategy only counts
//! as successful when its output yields a JSON candidate that passes
//! validation; any failure (transport, timeout, extraction, schema or
//! degenerate output) moves on to the next strategy.

use std::sync::Arc;
use std::time::Duration;

use openai::chat::{ChatCompletionMessage, ChatCompletionMessageRole};
use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{FailureInfo, PipelineError};
use crate::json_extract::{extract_json, ExtractedCandidate};
use crate::openai_client::{
    msg, BackendError, BackendResponse, ChatCall, GenerationBackend, StructuredCall,
};
use crate::openai_settings::{effective_temperature, resolve_model, DEFAULT_TEXT_TEMPERATURE};
use crate::validation::{validate_candidate, Payload, SchemaRef, ValidatedResult};

/// System message of the conversational JSON strategy.
pub const JSON_ONLY_SYSTEM_PROMPT: &str = "You only ever respond with a single valid JSON object.";

/// Appended to the prompt for the plain-text strategy.
pub const HARDENING_SUFFIX: &str = "\n\nIMPORTANT: Return ONLY a JSON object. Do not wrap the JSON in code fences or add any extra text.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter, AsRefStr)]
pub enum Strategy {
    PrimaryStructured,
    SecondaryChat,
    PlainTextFallback,
}

/// One strategy tried during a generation call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationAttempt {
    pub strategy: Strategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureInfo>,
}

impl GenerationAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt_text: String,
    pub expected_shape: &'static SchemaRef,
    pub model_hint: Option<String>,
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
}

impl GenerationRequest {
    pub fn for_payload<T: Payload>(prompt_text: impl Into<String>) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            expected_shape: T::SCHEMA,
            model_hint: None,
            temperature: None,
            timeout: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_hint = model;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Fallbacks applied when a request leaves a parameter open.
#[derive(Debug, Clone)]
pub struct GenerationDefaults {
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

/// A validated payload together with the attempt log that produced it.
#[derive(Debug, Clone)]
pub struct Generated<T> {
    pub value: T,
    pub warnings: Vec<String>,
    pub strategy: Strategy,
    pub attempts: Vec<GenerationAttempt>,
}

/// Free text produced for a conversation.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub content: String,
    pub model: String,
    pub strategy: Strategy,
}

#[derive(Clone)]
pub struct StructuredGenerator {
    backend: Arc<dyn GenerationBackend>,
    defaults: GenerationDefaults,
}

impl StructuredGenerator {
    pub fn new(backend: Arc<dyn GenerationBackend>, defaults: GenerationDefaults) -> Self {
        Self { backend, defaults }
    }

    pub fn defaults(&self) -> &GenerationDefaults {
        &self.defaults
    }

    /// Generate and validate a `T` using its schema.
    pub async fn generate<T: Payload>(
        &self,
        req: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Generated<T>, PipelineError> {
        self.generate_with(req, cancel, validate_candidate::<T>).await
    }

    /// Generate with a caller-provided acceptance step. `accept` runs on every
    /// extracted candidate; an error sends the pipeline to the next strategy.
    pub async fn generate_with<T, F>(
        &self,
        req: &GenerationRequest,
        cancel: &CancellationToken,
        accept: F,
    ) -> Result<Generated<T>, PipelineError>
    where
        F: Fn(&ExtractedCandidate) -> Result<ValidatedResult<T>, PipelineError>,
    {
        let model = resolve_model(req.model_hint.as_deref(), &self.defaults.model).to_string();
        let temperature = effective_temperature(&model, req.temperature.or(self.defaults.temperature));
        let timeout = req.timeout.unwrap_or(self.defaults.timeout);
        let schema = req.expected_shape.name;

        let mut attempts: Vec<GenerationAttempt> = Vec::with_capacity(3);
        let mut last: Option<PipelineError> = None;

        for strategy in Strategy::iter() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Canceled);
            }
            debug!(%strategy, schema, %model, "trying generation strategy");
            let call = self.invoke(strategy, &model, &req.prompt_text, temperature, timeout, cancel);
            let raw = match call.await {
                Ok(raw) => raw,
                Err(PipelineError::Canceled) => {
                    info!(%strategy, schema, "generation canceled");
                    return Err(PipelineError::Canceled);
                }
                Err(err) => {
                    warn!(%strategy, schema, error = %err, "generation strategy failed");
                    attempts.push(GenerationAttempt {
                        strategy,
                        raw_output: None,
                        error: Some(err.info()),
                    });
                    last = Some(err);
                    continue;
                }
            };

            match extract_json(&raw).and_then(|candidate| accept(&candidate)) {
                Ok(validated) => {
                    attempts.push(GenerationAttempt {
                        strategy,
                        raw_output: Some(raw),
                        error: None,
                    });
                    info!(%strategy, schema, attempts = attempts.len(), "structured generation succeeded");
                    return Ok(Generated {
                        value: validated.value,
                        warnings: validated.warnings,
                        strategy,
                        attempts,
                    });
                }
                Err(err) => {
                    warn!(%strategy, schema, error = %err, "generation output rejected");
                    attempts.push(GenerationAttempt {
                        strategy,
                        raw_output: Some(raw),
                        error: Some(err.info()),
                    });
                    last = Some(err);
                }
            }
        }

        let last = last.unwrap_or(PipelineError::NoJsonFound);
        error!(schema, attempts = attempts.len(), "all generation strategies exhausted: {last}");
        Err(PipelineError::GenerationFailed {
            attempts,
            last: Box::new(last),
        })
    }

    /// Free-text answer for a conversation: the structured endpoint with the
    /// transcript as input first, then the conversational endpoint.
    pub async fn generate_text(
        &self,
        messages: Vec<ChatCompletionMessage>,
        model_hint: Option<&str>,
        temperature: Option<f32>,
        cancel: &CancellationToken,
    ) -> Result<GeneratedText, PipelineError> {
        let model = resolve_model(model_hint, &self.defaults.model).to_string();
        let temperature = effective_temperature(&model, Some(temperature.unwrap_or(DEFAULT_TEXT_TEMPERATURE)));
        let timeout = self.defaults.timeout;

        let structured = self.backend.structured(StructuredCall {
            model: model.clone(),
            input: transcript(&messages),
            force_json: false,
            temperature,
        });
        let first = self.bounded(Strategy::PrimaryStructured, structured, timeout, cancel).await;
        let first_err = match first {
            Ok(content) => {
                return Ok(GeneratedText {
                    content,
                    model,
                    strategy: Strategy::PrimaryStructured,
                })
            }
            Err(PipelineError::Canceled) => return Err(PipelineError::Canceled),
            Err(err) => err,
        };
        warn!(strategy = %Strategy::PrimaryStructured, error = %first_err, "text generation failed");

        let chat = self.backend.conversational(ChatCall {
            model: model.clone(),
            messages,
            force_json: false,
            temperature,
        });
        match self.bounded(Strategy::SecondaryChat, chat, timeout, cancel).await {
            Ok(content) => Ok(GeneratedText {
                content,
                model,
                strategy: Strategy::SecondaryChat,
            }),
            Err(PipelineError::Canceled) => Err(PipelineError::Canceled),
            Err(err) => {
                error!(error = %err, "text generation exhausted");
                let attempts = vec![
                    GenerationAttempt {
                        strategy: Strategy::PrimaryStructured,
                        raw_output: None,
                        error: Some(first_err.info()),
                    },
                    GenerationAttempt {
                        strategy: Strategy::SecondaryChat,
                        raw_output: None,
                        error: Some(err.info()),
                    },
                ];
                Err(PipelineError::GenerationFailed {
                    attempts,
                    last: Box::new(err),
                })
            }
        }
    }

    async fn invoke(
        &self,
        strategy: Strategy,
        model: &str,
        prompt: &str,
        temperature: Option<f32>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let call = match strategy {
            Strategy::PrimaryStructured => self.backend.structured(StructuredCall {
                model: model.to_string(),
                input: prompt.to_string(),
                force_json: true,
                temperature,
            }),
            // JSON mode on chat is left at the model's default temperature
            Strategy::SecondaryChat => self.backend.conversational(ChatCall {
                model: model.to_string(),
                messages: vec![
                    msg(ChatCompletionMessageRole::System, JSON_ONLY_SYSTEM_PROMPT),
                    msg(ChatCompletionMessageRole::User, prompt),
                ],
                force_json: true,
                temperature: None,
            }),
            Strategy::PlainTextFallback => self.backend.conversational(ChatCall {
                model: model.to_string(),
                messages: vec![msg(ChatCompletionMessageRole::User, &harden_prompt(prompt))],
                force_json: false,
                temperature,
            }),
        };
        self.bounded(strategy, call, timeout, cancel).await
    }

    /// Runs one backend call under the timeout and the cancellation token and
    /// returns its non-blank output text.
    async fn bounded<Fut>(
        &self,
        strategy: Strategy,
        call: Fut,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError>
    where
        Fut: std::future::Future<Output = Result<BackendResponse, BackendError>>,
    {
        let unavailable = |cause: BackendError| PipelineError::BackendUnavailable { strategy, cause };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Canceled),
            res = tokio::time::timeout(timeout, call) => match res {
                Ok(res) => res.map_err(unavailable)?,
                Err(_) => {
                    return Err(unavailable(BackendError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }))
                }
            },
        };
        let text = response.output_text();
        if text.trim().is_empty() {
            return Err(unavailable(BackendError::EmptyOutput));
        }
        Ok(text)
    }
}

pub fn harden_prompt(prompt: &str) -> String {
    format!("{prompt}{HARDENING_SUFFIX}")
}

/// Collapses a conversation into `ROLE: content` lines.
fn transcript(messages: &[ChatCompletionMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = serde_json::to_value(&m.role)
                .ok()
                .and_then(|v| v.as_str().map(str::to_uppercase))
                .unwrap_or_else(|| "USER".into());
            format!("{}: {}", role, m.content.as_deref().unwrap_or_default())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai_client::{ChatBody, ResponsesBody};
    use crate::validation::{FieldSpec, JsonKind};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::collections::VecDeque;

    const VERDICT_FIELDS: [FieldSpec; 2] = [
        FieldSpec::label("choiceALabel"),
        FieldSpec::required("score", JsonKind::Number),
    ];
    const VERDICT_SCHEMA: SchemaRef = SchemaRef {
        name: "verdict",
        fields: &VERDICT_FIELDS,
    };

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Verdict {
        choice_a_label: String,
        score: f64,
    }

    impl Payload for Verdict {
        const SCHEMA: &'static SchemaRef = &VERDICT_SCHEMA;
    }

    #[derive(Debug, Clone)]
    enum Seen {
        Structured(StructuredCall),
        Chat(ChatCall),
    }

    /// Answers each call with the next scripted result, in call order.
    #[derive(Default)]
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<String, BackendError>>>,
        seen: Mutex<Vec<Seen>>,
        delay: Option<Duration>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<&str, BackendError>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().map(|r| r.map(str::to_string)).collect()),
                ..Default::default()
            }
        }

        async fn next(&self) -> Result<String, BackendError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Err(BackendError::Http(500)))
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn structured(&self, call: StructuredCall) -> Result<BackendResponse, BackendError> {
            self.seen.lock().push(Seen::Structured(call));
            let text = self.next().await?;
            Ok(BackendResponse::Structured(ResponsesBody {
                output_text: Some(text),
                output: vec![],
            }))
        }

        async fn conversational(&self, call: ChatCall) -> Result<BackendResponse, BackendError> {
            self.seen.lock().push(Seen::Chat(call));
            let text = self.next().await?;
            let body: ChatBody = serde_json::from_value(serde_json::json!({
                "choices": [{"message": {"content": text}}]
            }))
            .unwrap();
            Ok(BackendResponse::Conversational(body))
        }
    }

    fn defaults() -> GenerationDefaults {
        GenerationDefaults {
            model: "gpt-4o-mini".into(),
            temperature: Some(0.2),
            timeout: Duration::from_secs(5),
        }
    }

    fn generator(backend: Arc<ScriptedBackend>) -> StructuredGenerator {
        StructuredGenerator::new(backend, defaults())
    }

    #[tokio::test]
    async fn primary_success_uses_single_attempt() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(
            r#"{"choiceALabel":"Stay","score":0.8}"#,
        )]));
        let req = GenerationRequest::for_payload::<Verdict>("decide");
        let out = generator(backend.clone())
            .generate::<Verdict>(&req, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.strategy, Strategy::PrimaryStructured);
        assert_eq!(out.value.choice_a_label, "Stay");
        assert_eq!(out.value.score, 0.8);
        assert_eq!(out.attempts.len(), 1);
        assert!(out.attempts[0].succeeded());

        let seen = backend.seen.lock();
        match &seen[0] {
            Seen::Structured(call) => {
                assert!(call.force_json);
                assert_eq!(call.input, "decide");
                assert_eq!(call.model, "gpt-4o-mini");
                assert_eq!(call.temperature, Some(0.2));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn falls_through_all_three_strategies_in_order() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::Http(400)),
            Ok("I'd rather explain in prose."),
            Ok("```json\n{\"choiceALabel\":\"Move abroad\",\"score\":1}\n```"),
        ]));
        let req = GenerationRequest::for_payload::<Verdict>("decide");
        let out = generator(backend.clone())
            .generate::<Verdict>(&req, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.strategy, Strategy::PlainTextFallback);
        let order: Vec<Strategy> = out.attempts.iter().map(|a| a.strategy).collect();
        assert_eq!(
            order,
            vec![
                Strategy::PrimaryStructured,
                Strategy::SecondaryChat,
                Strategy::PlainTextFallback
            ]
        );
        assert_eq!(out.attempts[0].error.as_ref().unwrap().kind, "BackendUnavailable");
        assert_eq!(out.attempts[1].error.as_ref().unwrap().kind, "NoJsonFound");
        assert!(out.attempts[2].succeeded());

        let seen = backend.seen.lock();
        match (&seen[1], &seen[2]) {
            (Seen::Chat(secondary), Seen::Chat(plain)) => {
                assert!(secondary.force_json);
                assert_eq!(secondary.messages.len(), 2);
                assert_eq!(
                    secondary.messages[0].content.as_deref(),
                    Some(JSON_ONLY_SYSTEM_PROMPT)
                );
                assert!(!plain.force_json);
                assert_eq!(plain.messages.len(), 1);
                assert!(plain.messages[0]
                    .content
                    .as_deref()
                    .unwrap()
                    .ends_with(HARDENING_SUFFIX));
            }
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[tokio::test]
    async fn degenerate_output_advances_and_exhaustion_keeps_last_cause() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(r#"{"choiceALabel":"A","score":1}"#),
            Ok(r#"{"choiceALabel":"선택 A","score":1}"#),
            Ok(r#"{"choiceALabel":"Stay"}"#),
        ]));
        let req = GenerationRequest::for_payload::<Verdict>("decide");
        let err = generator(backend)
            .generate::<Verdict>(&req, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PipelineError::GenerationFailed { attempts, last } => {
                assert_eq!(attempts.len(), 3);
                assert_eq!(attempts[0].error.as_ref().unwrap().kind, "DegenerateOutput");
                assert!(attempts.iter().all(|a| a.raw_output.is_some()));
                match *last {
                    PipelineError::SchemaViolation { ref path, .. } => assert_eq!(path, "score"),
                    ref other => panic!("unexpected last cause {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_output_counts_as_unavailable() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("   "),
            Ok(r#"{"choiceALabel":"Stay","score":2}"#),
        ]));
        let req = GenerationRequest::for_payload::<Verdict>("decide");
        let out = generator(backend)
            .generate::<Verdict>(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.strategy, Strategy::SecondaryChat);
        assert!(out.attempts[0]
            .error
            .as_ref()
            .unwrap()
            .message
            .contains("empty output"));
    }

    #[tokio::test]
    async fn slow_backend_times_out_every_strategy() {
        let backend = Arc::new(ScriptedBackend {
            delay: Some(Duration::from_millis(300)),
            ..ScriptedBackend::new(vec![])
        });
        let req = GenerationRequest::for_payload::<Verdict>("decide")
            .with_timeout(Duration::from_millis(20));
        let err = generator(backend)
            .generate::<Verdict>(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            PipelineError::GenerationFailed { attempts, last } => {
                assert_eq!(attempts.len(), 3);
                assert!(matches!(
                    *last,
                    PipelineError::BackendUnavailable {
                        strategy: Strategy::PlainTextFallback,
                        cause: BackendError::Timeout { timeout_ms: 20 }
                    }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_stops_without_trying_later_strategies() {
        let backend = Arc::new(ScriptedBackend {
            delay: Some(Duration::from_secs(5)),
            ..ScriptedBackend::new(vec![Ok("{}")])
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let req = GenerationRequest::for_payload::<Verdict>("decide");
        let err = generator(backend.clone())
            .generate::<Verdict>(&req, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Canceled));
        assert_eq!(backend.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn text_generation_falls_back_to_chat() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::Http(404)),
            Ok("Take a walk first."),
        ]));
        let messages = vec![
            msg(ChatCompletionMessageRole::System, "be brief"),
            msg(ChatCompletionMessageRole::User, "hello"),
        ];
        let out = generator(backend.clone())
            .generate_text(messages, Some("gpt-4o"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.content, "Take a walk first.");
        assert_eq!(out.model, "gpt-4o");
        assert_eq!(out.strategy, Strategy::SecondaryChat);

        let seen = backend.seen.lock();
        match &seen[0] {
            Seen::Structured(call) => {
                assert_eq!(call.input, "SYSTEM: be brief\nUSER: hello");
                assert_eq!(call.temperature, Some(DEFAULT_TEXT_TEMPERATURE));
                assert!(!call.force_json);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }
}
