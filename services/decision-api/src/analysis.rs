//! `POST /analyze`: narrative analysis from the backend blended with the
//! deterministic answer score. When every generation strategy fails the
//! deterministic score alone is returned.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use shared::dto::{Axis, Labels, Question, Side, UserAnswer, Worry};
use shared::error::PipelineError;
use shared::generation::GenerationRequest;
use shared::scoring::{
    blend, score, AxisAlignmentScore, BlendedDecision, DeterministicScore, ScoringPolicy,
};
use shared::validation::{
    is_degenerate_label, normalize_confidence, validate_candidate, FieldSpec, JsonKind, Payload,
    SchemaRef, ValidatedResult,
};
use strum_macros::Display;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ApiError, ErrorCode};
use crate::inflight::Step;
use crate::prompts::analysis_prompt;
use crate::routes::{ensure_worry, require_context, success};
use crate::session::AnonSession;
use crate::state::AppState;

const ANALYSIS_FIELDS: [FieldSpec; 23] = [
    FieldSpec::required("recommendedChoice", JsonKind::String),
    FieldSpec::optional("choiceALabel", JsonKind::String),
    FieldSpec::optional("choiceBLabel", JsonKind::String),
    FieldSpec::optional("confidence", JsonKind::Number),
    FieldSpec::non_empty("summary", JsonKind::String),
    FieldSpec::required("actionSteps", JsonKind::Array),
    FieldSpec::non_empty("actionSteps[]", JsonKind::String),
    FieldSpec::optional("actionGuide", JsonKind::Object),
    FieldSpec::optional("rationale", JsonKind::Object),
    FieldSpec::non_empty("rationale.overview", JsonKind::String),
    FieldSpec::optional("axisAlignment", JsonKind::Object),
    FieldSpec::required("axisAlignment.scoreA", JsonKind::Number),
    FieldSpec::required("axisAlignment.scoreB", JsonKind::Number),
    FieldSpec::required("personalityTraits", JsonKind::Array),
    FieldSpec::non_empty("personalityTraits[].name", JsonKind::String),
    FieldSpec::required("personalityTraits[].score", JsonKind::Number),
    FieldSpec::required("personalityTraits[].level", JsonKind::String),
    FieldSpec::required("personalityTraits[].leansTo", JsonKind::String),
    FieldSpec::required("decisionFactors", JsonKind::Array),
    FieldSpec::non_empty("decisionFactors[].name", JsonKind::String),
    FieldSpec::required("decisionFactors[].score", JsonKind::Number),
    FieldSpec::required("decisionFactors[].level", JsonKind::String),
    FieldSpec::required("decisionFactors[].side", JsonKind::String),
];

const ANALYSIS_SCHEMA: SchemaRef = SchemaRef {
    name: "analysis",
    fields: &ANALYSIS_FIELDS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lean {
    A,
    B,
    #[serde(rename = "neutral")]
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityTrait {
    pub name: String,
    pub score: f64,
    pub level: Level,
    pub leans_to: Lean,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub related_questions: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionFactor {
    pub name: String,
    pub score: f64,
    pub level: Level,
    pub side: Side,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub related_questions: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideStep {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionGuide {
    #[serde(default)]
    pub steps: Vec<GuideStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyReason {
    pub name: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub related_questions: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rationale {
    pub overview: String,
    #[serde(default)]
    pub key_reasons: Vec<KeyReason>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAxisAlignment {
    pub score_a: f64,
    pub score_b: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    pub recommended_choice: Side,
    #[serde(default)]
    pub choice_a_label: Option<String>,
    #[serde(default)]
    pub choice_b_label: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub summary: String,
    pub action_steps: Vec<String>,
    #[serde(default)]
    pub action_guide: Option<ActionGuide>,
    #[serde(default)]
    pub rationale: Option<Rationale>,
    #[serde(default)]
    pub axis_alignment: Option<RawAxisAlignment>,
    pub personality_traits: Vec<PersonalityTrait>,
    pub decision_factors: Vec<DecisionFactor>,
}

impl Payload for AnalysisPayload {
    const SCHEMA: &'static SchemaRef = &ANALYSIS_SCHEMA;
}

/// A backend payload together with the label pair it will be presented with.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub payload: AnalysisPayload,
    pub labels: (String, String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub worry: Worry,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub responses: Vec<UserAnswer>,
    #[serde(default)]
    pub labels: Option<Labels>,
    #[serde(default)]
    pub axis: Option<Axis>,
    #[serde(default)]
    pub context_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResultSource {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(flatten)]
    pub decision: BlendedDecision,
    pub recommended_choice: Side,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_choice_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_choice_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice_a_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice_b_label: Option<String>,
    pub confidence: f64,
    pub deterministic: DeterministicScore,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis_alignment: Option<AxisAlignmentScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_confidence: Option<f64>,
    pub summary: String,
    pub action_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_guide: Option<ActionGuide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<Rationale>,
    pub personality_traits: Vec<PersonalityTrait>,
    pub decision_factors: Vec<DecisionFactor>,
    pub source: ResultSource,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub result: AnalysisResult,
}

/// Caller labels win when both are given; they must not be degenerate.
pub fn caller_labels(labels: Option<&Labels>) -> Result<Option<(String, String)>, PipelineError> {
    match labels.and_then(Labels::complete_pair) {
        Some((a, b)) if is_degenerate_label(&a) || is_degenerate_label(&b) => {
            Err(PipelineError::InvalidInputLabels)
        }
        pair => Ok(pair),
    }
}

fn backend_labels(payload: &AnalysisPayload) -> Result<(String, String), PipelineError> {
    let pick = |field: &str, label: Option<&str>| {
        let label = label.map(str::trim).unwrap_or("");
        if is_degenerate_label(label) {
            Err(PipelineError::degenerate(field, label))
        } else {
            Ok(label.to_string())
        }
    };
    Ok((
        pick("choiceALabel", payload.choice_a_label.as_deref())?,
        pick("choiceBLabel", payload.choice_b_label.as_deref())?,
    ))
}

/// Validates a candidate and settles its labels. Without caller labels the
/// backend's own must be usable, otherwise the next strategy is tried.
pub fn accept_candidate(
    candidate: &shared::json_extract::ExtractedCandidate,
    caller: Option<&(String, String)>,
) -> Result<ValidatedResult<Accepted>, PipelineError> {
    let validated = validate_candidate::<AnalysisPayload>(candidate)?;
    let labels = match caller {
        Some(pair) => pair.clone(),
        None => backend_labels(&validated.value)?,
    };
    Ok(validated.map(|payload| Accepted { payload, labels }))
}

fn labelled(side: Side, labels: &(String, String)) -> (String, String) {
    match side {
        Side::A => (labels.0.clone(), labels.1.clone()),
        Side::B => (labels.1.clone(), labels.0.clone()),
    }
}

fn fraction(percent: u8) -> f64 {
    normalize_confidence(f64::from(percent) / 100.0)
}

/// Blends the backend's axis alignment into the answer score.
pub fn compose(
    accepted: Accepted,
    answers: &[UserAnswer],
    policy: &ScoringPolicy,
    mut warnings: Vec<String>,
) -> AnalysisResult {
    let Accepted { payload, labels } = accepted;
    let deterministic = score(answers, policy);

    let axis = payload
        .axis_alignment
        .and_then(|raw| AxisAlignmentScore::from_raw(raw.score_a, raw.score_b))
        .map(|(axis, warning)| {
            warnings.extend(warning);
            axis
        });
    let decision = blend(deterministic, axis, policy);
    if payload.recommended_choice != decision.recommended_side {
        warnings.push(format!(
            "backend recommended {} but the blended score favours {}",
            payload.recommended_choice, decision.recommended_side
        ));
    }

    let (recommended_label, other_label) = labelled(decision.recommended_side, &labels);
    AnalysisResult {
        decision,
        recommended_choice: decision.recommended_side,
        recommended_choice_label: Some(recommended_label),
        other_choice_label: Some(other_label),
        choice_a_label: Some(labels.0),
        choice_b_label: Some(labels.1),
        confidence: fraction(decision.confidence_percent),
        deterministic,
        axis_alignment: axis,
        backend_confidence: payload.confidence.map(normalize_confidence),
        summary: payload.summary.trim().to_string(),
        action_steps: payload
            .action_steps
            .into_iter()
            .map(|s| s.trim().to_string())
            .collect(),
        action_guide: payload.action_guide,
        rationale: payload.rationale,
        personality_traits: payload.personality_traits,
        decision_factors: payload.decision_factors,
        source: ResultSource::Generated,
        warnings,
    }
}

/// Labels for a result built without the backend: the caller's, then the
/// request axis poles. `None` leaves the result unlabelled.
pub fn fallback_labels(
    caller: Option<(String, String)>,
    axis: Option<&Axis>,
) -> Option<(String, String)> {
    caller.or_else(|| {
        axis.map(|a| (a.axis_a.trim(), a.axis_b.trim()))
            .filter(|(a, b)| !is_degenerate_label(a) && !is_degenerate_label(b))
            .map(|(a, b)| (a.to_string(), b.to_string()))
    })
}

/// Result from the answer score alone.
pub fn fallback(
    labels: Option<(String, String)>,
    answers: &[UserAnswer],
    policy: &ScoringPolicy,
    cause: &PipelineError,
) -> AnalysisResult {
    let deterministic = score(answers, policy);
    let decision = BlendedDecision::from(deterministic);
    let side = decision.recommended_side;
    let ranked = labels.as_ref().map(|pair| labelled(side, pair));
    let (recommended, other) = match &ranked {
        Some((r, o)) => (format!("\"{r}\""), format!("\"{o}\"")),
        None => (format!("option {side}"), format!("option {}", side.other())),
    };

    AnalysisResult {
        decision,
        recommended_choice: side,
        summary: format!(
            "Your answers lean towards {recommended} ({}%) over {other} ({}%).",
            decision.confidence_percent,
            100 - decision.confidence_percent
        ),
        action_steps: vec![
            format!("Write down what {recommended} would look like in a month."),
            "Revisit the questions where you hesitated.".to_string(),
            "Set a date by which you will decide.".to_string(),
        ],
        recommended_choice_label: ranked.as_ref().map(|p| p.0.clone()),
        other_choice_label: ranked.map(|p| p.1),
        choice_a_label: labels.as_ref().map(|l| l.0.clone()),
        choice_b_label: labels.map(|l| l.1),
        confidence: fraction(decision.confidence_percent),
        deterministic,
        axis_alignment: None,
        backend_confidence: None,
        action_guide: None,
        rationale: None,
        personality_traits: Vec::new(),
        decision_factors: Vec::new(),
        source: ResultSource::Fallback,
        warnings: vec![format!("analysis generation unavailable: {}", cause.root_cause())],
    }
}

pub async fn run(
    state: &AppState,
    body: &AnalyzeRequest,
    cancel: &CancellationToken,
) -> Result<AnalysisResult, PipelineError> {
    let caller = caller_labels(body.labels.as_ref())?;
    let prompt = analysis_prompt(&body.worry, &body.questions, &body.responses, body.axis.as_ref());
    let req = GenerationRequest::for_payload::<AnalysisPayload>(prompt);

    let generated = state
        .generator
        .generate_with(&req, cancel, |candidate| {
            accept_candidate(candidate, caller.as_ref())
        })
        .await;

    match generated {
        Ok(generated) => Ok(compose(
            generated.value,
            &body.responses,
            &state.policy,
            generated.warnings,
        )),
        Err(err @ PipelineError::GenerationFailed { .. }) => {
            warn!(error = %err, "analysis falling back to the answer score");
            let labels = fallback_labels(caller, body.axis.as_ref());
            Ok(fallback(labels, &body.responses, &state.policy, &err))
        }
        Err(err) => Err(err),
    }
}

pub async fn analyze(
    state: web::Data<AppState>,
    req: HttpRequest,
    session: AnonSession,
    body: web::Json<AnalyzeRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let context_id = require_context(&state, &req, &session, body.context_id.as_deref())?;
    ensure_worry(&body.worry)?;

    let guard = state.inflight.begin(&context_id, Step::Analysis);
    let result = run(&state, &body, guard.token())
        .await
        .map_err(|e| ApiError::from_pipeline(e, ErrorCode::AnalysisAiFailed))?;

    info!(
        source = %result.source,
        side = %result.recommended_choice,
        confidence = result.decision.confidence_percent,
        "analysis complete"
    );
    Ok(success(&session, AnalyzeResponse { result }))
}
