//! Question inputs and debater position assignment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of exam question being debated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Multiple-choice: the judge must select one alternative label.
    Mcq,
    /// Dissertative: the judge synthesizes a free-text answer.
    OpenEnded,
}

impl std::fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mcq => write!(f, "mcq"),
            Self::OpenEnded => write!(f, "open_ended"),
        }
    }
}

/// One answer alternative of a multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    /// Label offered to the agents (e.g. "A").
    pub label: String,
    /// Alternative text.
    pub text: String,
}

/// Immutable question input. Created at dataset load; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub kind: QuestionKind,
    /// Present (and required, >= 2 entries) only for `Mcq`.
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    /// Withheld from agents; used only to mark the judge decision correct.
    #[serde(default)]
    pub gold_answer: Option<String>,
    /// Exam category (e.g. "Direito Administrativo"), carried to the record.
    #[serde(default)]
    pub category: Option<String>,
}

impl Question {
    /// Labels offered by this question, in dataset order.
    pub fn labels(&self) -> Vec<String> {
        self.alternatives.iter().map(|a| a.label.clone()).collect()
    }

    /// Whether `label` is one of the offered alternatives.
    pub fn has_label(&self, label: &str) -> bool {
        self.alternatives.iter().any(|a| a.label == label)
    }
}

/// Error raised when a position assignment violates the setup rules.
///
/// These are configuration errors: they abort the batch before any
/// external call is issued and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("debaters must hold different alternatives, both drew '{0}'")]
    DuplicateLabel(String),
    #[error("label '{0}' is not among the offered alternatives")]
    UnknownLabel(String),
    #[error("mcq question needs at least 2 alternatives, got {0}")]
    TooFewAlternatives(usize),
}

/// The alternative each debater defends in a multiple-choice debate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionAssignment {
    pub debater_x: String,
    pub debater_y: String,
}

impl PositionAssignment {
    /// Build an assignment, enforcing the distinct-label invariant and
    /// that both labels belong to the question's alternative set.
    pub fn new(question: &Question, x: String, y: String) -> Result<Self, PositionError> {
        if question.alternatives.len() < 2 {
            return Err(PositionError::TooFewAlternatives(
                question.alternatives.len(),
            ));
        }
        if !question.has_label(&x) {
            return Err(PositionError::UnknownLabel(x));
        }
        if !question.has_label(&y) {
            return Err(PositionError::UnknownLabel(y));
        }
        if x == y {
            return Err(PositionError::DuplicateLabel(x));
        }
        Ok(Self {
            debater_x: x,
            debater_y: y,
        })
    }
}
