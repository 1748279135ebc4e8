//! Domain types exchanged between the HTTP surface and the pipeline.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// One of the two poles of a binary choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// The user's free-text dilemma.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worry {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Worry {
    /// Content with every whitespace run collapsed to a single space.
    pub fn compact_content(&self) -> String {
        self.content.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn category_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(fallback)
    }
}

/// A pair of opposing decision dimensions with supporting rationale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Axis {
    pub axis_a: String,
    pub axis_b: String,
    pub rationale_a: String,
    pub rationale_b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    pub id: Side,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: u8,
    pub text: String,
    pub choices: Vec<Choice>,
}

impl Question {
    pub fn choice(&self, side: Side) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == side)
    }
}

/// The side picked for one question, as collected by the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswer {
    pub question_id: i64,
    #[serde(rename = "answer", alias = "side")]
    pub side: Side,
}

impl UserAnswer {
    pub fn new(question_id: i64, side: Side) -> Self {
        Self { question_id, side }
    }
}

/// Caller-supplied label pair from an earlier stage of the flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Labels {
    #[serde(default)]
    pub choice_a_label: Option<String>,
    #[serde(default)]
    pub choice_b_label: Option<String>,
}

impl Labels {
    /// Both labels trimmed, only when both are present and non-blank.
    pub fn complete_pair(&self) -> Option<(String, String)> {
        let a = self.choice_a_label.as_deref().map(str::trim).unwrap_or("");
        let b = self.choice_b_label.as_deref().map(str::trim).unwrap_or("");
        if a.is_empty() || b.is_empty() {
            None
        } else {
            Some((a.to_string(), b.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_accepts_answer_or_side_key() {
        let a: UserAnswer = serde_json::from_str(r#"{"questionId":3,"answer":"B"}"#).unwrap();
        let b: UserAnswer = serde_json::from_str(r#"{"questionId":3,"side":"B"}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.side, Side::B);
    }

    #[test]
    fn answer_accepts_any_integer_id() {
        let far: UserAnswer = serde_json::from_str(r#"{"questionId":300,"answer":"A"}"#).unwrap();
        assert_eq!(far.question_id, 300);
        let negative: UserAnswer = serde_json::from_str(r#"{"questionId":-1,"side":"B"}"#).unwrap();
        assert_eq!(negative.question_id, -1);
    }

    #[test]
    fn partial_labels_are_not_a_pair() {
        let labels = Labels {
            choice_a_label: Some("  keep the current job ".into()),
            choice_b_label: None,
        };
        assert!(labels.complete_pair().is_none());

        let labels = Labels {
            choice_b_label: Some("take the offer".into()),
            ..labels
        };
        assert_eq!(
            labels.complete_pair(),
            Some(("keep the current job".into(), "take the offer".into()))
        );
    }

    #[test]
    fn worry_content_is_compacted() {
        let worry = Worry {
            content: "quit\n\n my   job?".into(),
            category: Some("  ".into()),
        };
        assert_eq!(worry.compact_content(), "quit my job?");
        assert_eq!(worry.category_or("(unspecified)"), "(unspecified)");
    }
}
