//! Turns, judge decisions, and the per-question debate record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::citations::Citation;
use crate::question::PositionAssignment;

/// Agent role within one question's debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebaterRole {
    DebaterX,
    DebaterY,
    Judge,
}

impl std::fmt::Display for DebaterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DebaterX => write!(f, "debater_x"),
            Self::DebaterY => write!(f, "debater_y"),
            Self::Judge => write!(f, "judge"),
        }
    }
}

/// Round a turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Round {
    Opening,
    Rebuttal,
    Synthesis,
}

impl std::fmt::Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::Rebuttal => write!(f, "rebuttal"),
            Self::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// One agent invocation's output. Immutable once created: the orchestrator
/// builds it right after a successful call and never touches it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: DebaterRole,
    pub round: Round,
    /// Verbatim completion text as returned by the external call.
    pub raw_text: String,
    /// Decoded argument/rebuttal body used for prompting later turns.
    pub text: String,
    pub citations: Vec<Citation>,
    pub parse_errors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        role: DebaterRole,
        round: Round,
        raw_text: String,
        text: String,
        extraction: crate::citations::Extraction,
    ) -> Self {
        Self {
            role,
            round,
            raw_text,
            text,
            citations: extraction.citations,
            parse_errors: extraction.parse_errors,
            created_at: Utc::now(),
        }
    }
}

/// The judge's verdict for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JudgeDecision {
    /// MCQ: the selected alternative label, guaranteed to be one of the
    /// offered alternatives by the orchestrator's label validation.
    SelectedLabel { label: String, rationale: String },
    /// Open-ended: a synthesized free-text answer.
    Synthesis {
        final_answer: String,
        rationale: String,
    },
}

/// Terminal outcome of one question's debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    Complete,
    /// Completed, but at least one turn needed a format-repair re-prompt.
    Partial,
    Failed,
}

impl std::fmt::Display for DebateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate outcome for one question. Built incrementally by the session
/// state machine; frozen once `status` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateRecord {
    pub question_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positions: Option<PositionAssignment>,
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeDecision>,
    /// Citations extracted from the judge's rationale/answer text.
    #[serde(default)]
    pub citations_used: Vec<Citation>,
    pub status: DebateStatus,
    /// Failure point tag when `status == Failed` (e.g. "rebuttal:debater_y").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// MCQ only: judge decision matched the withheld gold answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl DebateRecord {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            DebateStatus::Complete | DebateStatus::Partial | DebateStatus::Failed
        )
    }

    /// Total parse errors across all turns.
    pub fn parse_error_count(&self) -> usize {
        self.turns.iter().map(|t| t.parse_errors.len()).sum()
    }

    fn turn(&self, role: DebaterRole, round: Round) -> Option<&Turn> {
        self.turns
            .iter()
            .find(|t| t.role == role && t.round == round)
    }

    /// Downstream result shape: rounds keyed `round_1`/`round_2`, debater
    /// bodies keyed `argument` (openings) or `rebuttal`, judge block with
    /// `decision` for MCQ or `final_answer` for open-ended.
    pub fn to_output_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("question_id".into(), json!(self.question_id));
        obj.insert("status".into(), json!(self.status.to_string()));

        if let Some(cat) = &self.category {
            obj.insert("category".into(), json!(cat));
        }
        if let Some(pos) = &self.positions {
            obj.insert(
                "positions".into(),
                json!({"debater_x": pos.debater_x, "debater_y": pos.debater_y}),
            );
        }

        let mut debate = serde_json::Map::new();
        let round_json = |round: Round, body_key: &str| -> Option<Value> {
            let mut entry = serde_json::Map::new();
            for role in [DebaterRole::DebaterX, DebaterRole::DebaterY] {
                if let Some(turn) = self.turn(role, round) {
                    entry.insert(
                        role.to_string(),
                        json!({
                            body_key: turn.text,
                            "citations": turn.citations,
                        }),
                    );
                }
            }
            (!entry.is_empty()).then(|| Value::Object(entry))
        };
        if let Some(r1) = round_json(Round::Opening, "argument") {
            debate.insert("round_1".into(), r1);
        }
        if let Some(r2) = round_json(Round::Rebuttal, "rebuttal") {
            debate.insert("round_2".into(), r2);
        }
        obj.insert("debate".into(), Value::Object(debate));

        if let Some(judge) = &self.judge {
            let mut block = serde_json::Map::new();
            match judge {
                JudgeDecision::SelectedLabel { label, rationale } => {
                    block.insert("decision".into(), json!(label));
                    block.insert("rationale".into(), json!(rationale));
                }
                JudgeDecision::Synthesis {
                    final_answer,
                    rationale,
                } => {
                    block.insert("final_answer".into(), json!(final_answer));
                    block.insert("rationale".into(), json!(rationale));
                    block.insert("citations_used".into(), json!(self.citations_used));
                }
            }
            if let Some(correct) = self.correct {
                block.insert("correct".into(), json!(correct));
            }
            obj.insert("judge".into(), Value::Object(block));
        }

        if let Some(failure) = &self.failure {
            obj.insert("failure".into(), json!(failure));
        }
        obj.insert("elapsed_ms".into(), json!(self.elapsed_ms));
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::Extraction;

    fn turn(role: DebaterRole, round: Round, text: &str) -> Turn {
        Turn::new(
            role,
            round,
            format!("{{\"argument\":\"{text}\"}}"),
            text.to_string(),
            Extraction::default(),
        )
    }

    fn record() -> DebateRecord {
        DebateRecord {
            question_id: "q-1".to_string(),
            category: Some("Direito Administrativo".to_string()),
            positions: Some(PositionAssignment {
                debater_x: "A".to_string(),
                debater_y: "C".to_string(),
            }),
            turns: vec![
                turn(DebaterRole::DebaterX, Round::Opening, "defendo A"),
                turn(DebaterRole::DebaterY, Round::Opening, "defendo C"),
                turn(DebaterRole::DebaterX, Round::Rebuttal, "rebato C"),
                turn(DebaterRole::DebaterY, Round::Rebuttal, "rebato A"),
            ],
            judge: Some(JudgeDecision::SelectedLabel {
                label: "C".to_string(),
                rationale: "o argumento de Y prevalece".to_string(),
            }),
            citations_used: vec![],
            status: DebateStatus::Complete,
            failure: None,
            correct: Some(true),
            elapsed_ms: 1234,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_output_json_mcq_shape() {
        let out = record().to_output_json();
        assert_eq!(out["question_id"], "q-1");
        assert_eq!(out["status"], "complete");
        assert_eq!(out["positions"]["debater_x"], "A");
        assert_eq!(out["positions"]["debater_y"], "C");
        assert_eq!(out["debate"]["round_1"]["debater_x"]["argument"], "defendo A");
        assert_eq!(out["debate"]["round_2"]["debater_y"]["rebuttal"], "rebato A");
        assert_eq!(out["judge"]["decision"], "C");
        assert_eq!(out["judge"]["correct"], true);
        assert!(out.get("failure").is_none());
    }

    #[test]
    fn test_output_json_open_ended_shape() {
        let mut rec = record();
        rec.positions = None;
        rec.correct = None;
        rec.judge = Some(JudgeDecision::Synthesis {
            final_answer: "a resposta sintetizada".to_string(),
            rationale: "fundamentos".to_string(),
        });
        let out = rec.to_output_json();
        assert!(out.get("positions").is_none());
        assert_eq!(out["judge"]["final_answer"], "a resposta sintetizada");
        assert!(out["judge"].get("decision").is_none());
        assert!(out["judge"]["citations_used"].is_array());
    }

    #[test]
    fn test_output_json_failed_keeps_partial_rounds() {
        let mut rec = record();
        rec.turns.truncate(2);
        rec.judge = None;
        rec.correct = None;
        rec.status = DebateStatus::Failed;
        rec.failure = Some("rebuttal:debater_x".to_string());
        let out = rec.to_output_json();
        assert_eq!(out["status"], "failed");
        assert_eq!(out["failure"], "rebuttal:debater_x");
        assert!(out["debate"]["round_1"]["debater_y"]["argument"].is_string());
        assert!(out["debate"].get("round_2").is_none());
        assert!(out.get("judge").is_none());
    }

    #[test]
    fn test_role_and_round_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&DebaterRole::DebaterX).unwrap(),
            "\"debater_x\""
        );
        assert_eq!(serde_json::to_string(&Round::Rebuttal).unwrap(), "\"rebuttal\"");
        assert_eq!(
            serde_json::to_string(&DebateStatus::Partial).unwrap(),
            "\"partial\""
        );
    }

    #[test]
    fn test_record_roundtrips_through_json() {
        let rec = record();
        let text = serde_json::to_string(&rec).unwrap();
        let back: DebateRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_parse_error_count_sums_turns() {
        let mut rec = record();
        rec.turns[0].parse_errors.push("year".to_string());
        rec.turns[3].parse_errors.push("year".to_string());
        assert_eq!(rec.parse_error_count(), 2);
    }
}
