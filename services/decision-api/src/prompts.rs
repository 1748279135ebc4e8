use shared::dto::{Axis, Question, Side, UserAnswer, Worry};

const UNSPECIFIED: &str = "(unspecified)";

const FRAMING_TEMPLATE: &str = r#"You are a coach who restructures a person's dilemma into two clear, opposing options.
Write concisely, in the language of the input.

Output ONLY a JSON object with this shape (no comments, all values strings):
{
  "summary": string,
  "choiceALabel": string,
  "choiceBLabel": string,
  "aHint": string,
  "bHint": string,
  "cta": string,
  "axis": { "axisA": string, "axisB": string, "rationaleA": string, "rationaleB": string, "keywords": [string] }
}

[Guidelines]
- choiceALabel/choiceBLabel are 10 to 24 characters and describe the option itself.
- Never use bare side markers such as "A", "B", "Option A" or "B plan" as labels.
- Both labels sit on the same axis (e.g. stability vs challenge) and point in opposite directions.
- summary quotes both labels as "{choiceALabel} vs {choiceBLabel}".
- aHint/bHint give one neutral sentence about how each option would be carried out.
- axis names the underlying value behind each option with a one-sentence rationale.

[Input]
Content: {content}
Category: {category}"#;

const QUESTIONS_TEMPLATE: &str = r#"You help a person decide between two options by asking exactly 10 A/B questions.
Write in the language of the input.

[Structure]
- Questions 1-3 are general, 4-7 concrete, 8-10 about values and priorities.
- Every question offers two opposing choices; A leans towards "{axis_a}", B towards "{axis_b}".
- Each choice has a short content and a one-sentence description.

[Decision axis]
A: {axis_a} ({rationale_a})
B: {axis_b} ({rationale_b})

Output ONLY a JSON object:
{
  "questions": [
    { "text": string, "choices": [ { "id": "A", "content": string, "description": string }, { "id": "B", "content": string, "description": string } ] }
  ]
}

[Input]
Content: {content}
Category: {category}"#;

const ANALYSIS_TEMPLATE: &str = r#"You are a calm, neutral coach analysing a person's dilemma from their answers to A/B questions.
The result feeds charts, so output ONLY a JSON object (no comments) in the language of the input:
{
  "recommendedChoice": "A" | "B",
  "choiceALabel": string,
  "choiceBLabel": string,
  "confidence": number,
  "summary": string,
  "actionSteps": [string],
  "actionGuide": { "steps": [ { "title": string, "description": string } ], "nextSuggestion": string },
  "rationale": { "overview": string, "keyReasons": [ { "name": string, "detail": string, "weight": number, "relatedQuestions": [number] } ] },
  "axisAlignment": { "scoreA": number, "scoreB": number },
  "personalityTraits": [ { "name": string, "score": number, "level": "low" | "medium" | "high", "leansTo": "A" | "B" | "neutral", "evidence": string, "relatedQuestions": [number] } ],
  "decisionFactors": [ { "name": string, "score": number, "level": "low" | "medium" | "high", "side": "A" | "B", "evidence": string, "relatedQuestions": [number] } ]
}

[Guidelines]
- axisAlignment scores are percentages summing to 100.
- Labels describe the options; never answer with bare "A" or "B".
- Ground every reason, trait and factor in specific question numbers.

[Decision axis]
A: {axis_a} ({rationale_a})
B: {axis_b} ({rationale_b})
Keywords: {keywords}

[Questions]
{questions}

[Answers]
{answers}

[Input]
Content: {content}
Category: {category}"#;

pub fn framing_prompt(worry: &Worry) -> String {
    FRAMING_TEMPLATE
        .replace("{content}", &worry.compact_content())
        .replace("{category}", worry.category_or(UNSPECIFIED))
}

pub fn questions_prompt(worry: &Worry, axis: Option<&Axis>) -> String {
    with_axis(QUESTIONS_TEMPLATE, axis)
        .replace("{content}", &worry.compact_content())
        .replace("{category}", worry.category_or(UNSPECIFIED))
}

pub fn analysis_prompt(
    worry: &Worry,
    questions: &[Question],
    answers: &[UserAnswer],
    axis: Option<&Axis>,
) -> String {
    let keywords = axis
        .and_then(|a| a.keywords.as_ref())
        .map(|k| {
            k.iter()
                .map(|w| w.trim())
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| "(none)".into());

    with_axis(ANALYSIS_TEMPLATE, axis)
        .replace("{keywords}", &keywords)
        .replace("{questions}", &question_lines(questions))
        .replace("{answers}", &answer_lines(answers))
        .replace("{content}", &worry.compact_content())
        .replace("{category}", worry.category_or(UNSPECIFIED))
}

fn with_axis(template: &str, axis: Option<&Axis>) -> String {
    let field = |f: fn(&Axis) -> &str| {
        axis.map(f)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNSPECIFIED)
            .to_string()
    };
    template
        .replace("{axis_a}", &field(|a| a.axis_a.as_str()))
        .replace("{axis_b}", &field(|a| a.axis_b.as_str()))
        .replace("{rationale_a}", &field(|a| a.rationale_a.as_str()))
        .replace("{rationale_b}", &field(|a| a.rationale_b.as_str()))
}

fn question_lines(questions: &[Question]) -> String {
    questions
        .iter()
        .map(|q| {
            let choice = |side: Side| {
                q.choice(side)
                    .map(|c| match c.description.as_deref() {
                        Some(d) if !d.trim().is_empty() => format!("{} ({})", c.content, d.trim()),
                        _ => c.content.clone(),
                    })
                    .unwrap_or_default()
            };
            format!("- Q{}. {}\n  A) {}\n  B) {}", q.id, q.text, choice(Side::A), choice(Side::B))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn answer_lines(answers: &[UserAnswer]) -> String {
    answers
        .iter()
        .map(|a| format!("- Q{}: {}", a.question_id, a.side))
        .collect::<Vec<_>>()
        .join("\n")
}
