//! `POST /framing`: turns a worry into two labelled options and issues the
//! context token for the rest of the flow.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use shared::dto::{Axis, Worry};
use shared::error::PipelineError;
use shared::generation::GenerationRequest;
use shared::validation::{is_degenerate_label, FieldSpec, JsonKind, Payload, SchemaRef};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ApiError, ErrorCode};
use crate::inflight::Step;
use crate::prompts::framing_prompt;
use crate::routes::{ensure_worry, success};
use crate::session::AnonSession;
use crate::state::AppState;

const FRAMING_FIELDS: [FieldSpec; 12] = [
    FieldSpec::non_empty("summary", JsonKind::String),
    FieldSpec::label("choiceALabel"),
    FieldSpec::label("choiceBLabel"),
    FieldSpec::non_empty("aHint", JsonKind::String),
    FieldSpec::non_empty("bHint", JsonKind::String),
    FieldSpec::optional("cta", JsonKind::String),
    FieldSpec::required("axis", JsonKind::Object),
    FieldSpec::label("axis.axisA"),
    FieldSpec::label("axis.axisB"),
    FieldSpec::non_empty("axis.rationaleA", JsonKind::String),
    FieldSpec::non_empty("axis.rationaleB", JsonKind::String),
    FieldSpec::optional("axis.keywords", JsonKind::Array),
];

const FRAMING_SCHEMA: SchemaRef = SchemaRef {
    name: "framing",
    fields: &FRAMING_FIELDS,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramingPayload {
    pub summary: String,
    pub choice_a_label: String,
    pub choice_b_label: String,
    pub a_hint: String,
    pub b_hint: String,
    #[serde(default)]
    pub cta: Option<String>,
    pub axis: Axis,
}

impl Payload for FramingPayload {
    const SCHEMA: &'static SchemaRef = &FRAMING_SCHEMA;

    fn check(&self, _warnings: &mut Vec<String>) -> Result<(), PipelineError> {
        if self.choice_a_label.trim().eq_ignore_ascii_case(self.choice_b_label.trim()) {
            return Err(PipelineError::degenerate("choiceBLabel", self.choice_b_label.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct FramingRequest {
    pub worry: Worry,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Hints {
    pub a: String,
    pub b: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Framing {
    pub summary: String,
    pub choice_a_label: String,
    pub choice_b_label: String,
    pub hints: Hints,
    pub cta: String,
    pub axis: Axis,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FramingResponse {
    pub framing: Framing,
    pub context_id: String,
}

pub async fn generate_framing(
    state: &AppState,
    worry: &Worry,
    cancel: &CancellationToken,
) -> Result<Framing, PipelineError> {
    let req = GenerationRequest::for_payload::<FramingPayload>(framing_prompt(worry));
    let generated = state.generator.generate::<FramingPayload>(&req, cancel).await?;
    let ai = generated.value;

    let cta = ai
        .cta
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty() && !is_degenerate_label(c))
        .unwrap_or(&state.framing_cta)
        .to_string();

    Ok(Framing {
        summary: ai.summary.trim().to_string(),
        choice_a_label: ai.choice_a_label.trim().to_string(),
        choice_b_label: ai.choice_b_label.trim().to_string(),
        hints: Hints {
            a: ai.a_hint.trim().to_string(),
            b: ai.b_hint.trim().to_string(),
        },
        cta,
        axis: ai.axis,
    })
}

pub async fn framing(
    state: web::Data<AppState>,
    session: AnonSession,
    body: web::Json<FramingRequest>,
) -> Result<HttpResponse, ApiError> {
    let FramingRequest { worry } = body.into_inner();
    ensure_worry(&worry)?;

    let guard = state.inflight.begin(&session.id, Step::Framing);
    let framing = generate_framing(&state, &worry, guard.token())
        .await
        .map_err(|e| ApiError::from_pipeline(e, ErrorCode::FramingAiFailed))?;

    let context_id = state.contexts.issue(&session.id);
    info!(minted = session.minted, "framing generated, context issued");
    Ok(success(
        &session,
        FramingResponse {
            framing,
            context_id,
        },
    ))
}
