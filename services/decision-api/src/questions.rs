//! `POST /generate-questions`: ten A/B questions along the framing's axis.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use shared::dto::{Axis, Choice, Question, Side, Worry};
use shared::error::PipelineError;
use shared::generation::GenerationRequest;
use shared::validation::{is_degenerate_label, FieldSpec, JsonKind, Payload, SchemaRef};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ApiError, ErrorCode};
use crate::inflight::Step;
use crate::prompts::questions_prompt;
use crate::routes::{ensure_worry, require_context, success};
use crate::session::AnonSession;
use crate::state::AppState;

pub const QUESTION_COUNT: usize = 10;

const QUESTIONS_FIELDS: [FieldSpec; 4] = [
    FieldSpec::non_empty("questions|items|list[]", JsonKind::Object),
    FieldSpec::non_empty("questions|items|list[].text|question|title", JsonKind::String),
    FieldSpec::non_empty("questions|items|list[].choices|options|answers", JsonKind::Array),
    FieldSpec::required("questions|items|list[].choices|options|answers[]", JsonKind::Any),
];

const QUESTIONS_SCHEMA: SchemaRef = SchemaRef {
    name: "questions",
    fields: &QUESTIONS_FIELDS,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawChoice {
    Text(String),
    Full {
        #[serde(alias = "text")]
        content: String,
        #[serde(default)]
        description: Option<String>,
    },
}

impl RawChoice {
    fn content(&self) -> &str {
        match self {
            RawChoice::Text(text) => text,
            RawChoice::Full { content, .. } => content,
        }
    }

    fn into_choice(self, id: Side) -> Choice {
        let (content, description) = match self {
            RawChoice::Text(text) => (text, None),
            RawChoice::Full {
                content,
                description,
            } => (content, description),
        };
        Choice {
            id,
            content: content.trim().to_string(),
            description: description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestion {
    #[serde(alias = "question", alias = "title")]
    pub text: String,
    #[serde(alias = "options", alias = "answers")]
    pub choices: Vec<RawChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionsPayload {
    #[serde(alias = "items", alias = "list")]
    pub questions: Vec<RawQuestion>,
}

impl Payload for QuestionsPayload {
    const SCHEMA: &'static SchemaRef = &QUESTIONS_SCHEMA;

    fn check(&self, warnings: &mut Vec<String>) -> Result<(), PipelineError> {
        if self.questions.len() < QUESTION_COUNT {
            return Err(PipelineError::schema(
                "questions",
                format!("at least {QUESTION_COUNT} questions, got {}", self.questions.len()),
            ));
        }
        for (i, q) in self.questions.iter().take(QUESTION_COUNT).enumerate() {
            if q.choices.len() < 2 {
                return Err(PipelineError::schema(
                    format!("questions[{i}].choices"),
                    "two choices",
                ));
            }
            for (j, choice) in q.choices.iter().take(2).enumerate() {
                if is_degenerate_label(choice.content()) {
                    return Err(PipelineError::degenerate(
                        format!("questions[{i}].choices[{j}]"),
                        choice.content(),
                    ));
                }
            }
        }
        if self.questions.len() > QUESTION_COUNT {
            warnings.push(format!(
                "received {} questions, kept the first {QUESTION_COUNT}",
                self.questions.len()
            ));
        }
        Ok(())
    }
}

impl QuestionsPayload {
    /// The first ten questions numbered 1..=10 with an A and a B choice.
    pub fn into_questions(self) -> Vec<Question> {
        self.questions
            .into_iter()
            .take(QUESTION_COUNT)
            .zip(1u8..)
            .map(|(raw, id)| {
                let mut choices = raw.choices.into_iter();
                let a = choices.next().map(|c| c.into_choice(Side::A));
                let b = choices.next().map(|c| c.into_choice(Side::B));
                Question {
                    id,
                    text: raw.text.trim().to_string(),
                    choices: a.into_iter().chain(b).collect(),
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionsRequest {
    pub worry: Worry,
    #[serde(default)]
    pub axis: Option<Axis>,
    #[serde(default)]
    pub context_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuestionsResponse {
    pub questions: Vec<Question>,
}

pub async fn generate(
    state: &AppState,
    worry: &Worry,
    axis: Option<&Axis>,
    cancel: &CancellationToken,
) -> Result<Vec<Question>, PipelineError> {
    let req = GenerationRequest::for_payload::<QuestionsPayload>(questions_prompt(worry, axis));
    let generated = state.generator.generate::<QuestionsPayload>(&req, cancel).await?;
    for warning in &generated.warnings {
        info!(%warning, "questions normalized");
    }
    Ok(generated.value.into_questions())
}

pub async fn generate_questions(
    state: web::Data<AppState>,
    req: HttpRequest,
    session: AnonSession,
    body: web::Json<QuestionsRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let context_id = require_context(&state, &req, &session, body.context_id.as_deref())?;
    ensure_worry(&body.worry)?;

    let guard = state.inflight.begin(&context_id, Step::Questions);
    let questions = generate(&state, &body.worry, body.axis.as_ref(), guard.token())
        .await
        .map_err(|e| ApiError::from_pipeline(e, ErrorCode::QuestionsAiFailed))?;

    Ok(success(&session, QuestionsResponse { questions }))
}
