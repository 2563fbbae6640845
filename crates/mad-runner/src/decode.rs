//! Decoding of role-turn completions into validated payloads.
//!
//! Models are instructed to answer with a JSON object, but completions
//! routinely arrive wrapped in prose or code fences. Decoding slices out
//! the outermost object, validates the fields the role/round requires,
//! and reports everything else as an explicit `Malformed` variant so the
//! orchestrator can issue its one clarifying re-prompt instead of
//! propagating a deserialization panic from deep in the call stack.

use serde::Deserialize;

/// Shape the orchestrator expects for the turn being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    Opening,
    Rebuttal,
    JudgeMcq,
    JudgeSynthesis,
}

/// Validated payload of one role turn.
#[derive(Debug, Clone, PartialEq)]
pub enum RolePayload {
    Opening {
        /// Label restated by an MCQ debater; absent for open-ended.
        position: Option<String>,
        argument: String,
    },
    Rebuttal {
        rebuttal: String,
    },
    JudgeMcq {
        decision: String,
        rationale: String,
    },
    JudgeSynthesis {
        final_answer: String,
        rationale: String,
    },
}

impl RolePayload {
    /// Free text of the turn, the input to citation extraction.
    pub fn body(&self) -> &str {
        match self {
            Self::Opening { argument, .. } => argument,
            Self::Rebuttal { rebuttal } => rebuttal,
            Self::JudgeMcq { rationale, .. } => rationale,
            Self::JudgeSynthesis { final_answer, .. } => final_answer,
        }
    }
}

/// Decode outcome. `Malformed` carries the reason handed back to the model
/// in the clarifying re-prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Valid(RolePayload),
    Malformed { reason: String },
}

#[derive(Deserialize)]
struct OpeningWire {
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    argument: Option<String>,
}

#[derive(Deserialize)]
struct RebuttalWire {
    #[serde(default)]
    rebuttal: Option<String>,
    // Some models echo the prompt's wording instead of the field name.
    #[serde(default)]
    counter_argument: Option<String>,
}

#[derive(Deserialize)]
struct JudgeWire {
    #[serde(default)]
    decision: Option<String>,
    #[serde(default)]
    final_answer: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
}

/// Slice the outermost JSON object out of a completion that may be wrapped
/// in prose or code fences.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn malformed(reason: impl Into<String>) -> Decoded {
    Decoded::Malformed {
        reason: reason.into(),
    }
}

fn non_empty(value: Option<String>, field: &str) -> Result<String, Decoded> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(malformed(format!("missing required field '{field}'"))),
    }
}

/// Decode one completion against the expected role-turn shape.
pub fn decode_turn(raw: &str, expected: ExpectedShape) -> Decoded {
    let Some(json) = extract_json_object(raw) else {
        return malformed("no JSON object found in completion");
    };

    match expected {
        ExpectedShape::Opening => {
            let wire: OpeningWire = match serde_json::from_str(json) {
                Ok(w) => w,
                Err(e) => return malformed(format!("invalid JSON: {e}")),
            };
            match non_empty(wire.argument, "argument") {
                Ok(argument) => Decoded::Valid(RolePayload::Opening {
                    position: wire.position,
                    argument,
                }),
                Err(d) => d,
            }
        }
        ExpectedShape::Rebuttal => {
            let wire: RebuttalWire = match serde_json::from_str(json) {
                Ok(w) => w,
                Err(e) => return malformed(format!("invalid JSON: {e}")),
            };
            match non_empty(wire.rebuttal.or(wire.counter_argument), "rebuttal") {
                Ok(rebuttal) => Decoded::Valid(RolePayload::Rebuttal { rebuttal }),
                Err(d) => d,
            }
        }
        ExpectedShape::JudgeMcq => {
            let wire: JudgeWire = match serde_json::from_str(json) {
                Ok(w) => w,
                Err(e) => return malformed(format!("invalid JSON: {e}")),
            };
            let decision = match non_empty(wire.decision, "decision") {
                Ok(d) => d,
                Err(d) => return d,
            };
            match non_empty(wire.rationale, "rationale") {
                Ok(rationale) => Decoded::Valid(RolePayload::JudgeMcq {
                    decision: decision.trim().to_string(),
                    rationale,
                }),
                Err(d) => d,
            }
        }
        ExpectedShape::JudgeSynthesis => {
            let wire: JudgeWire = match serde_json::from_str(json) {
                Ok(w) => w,
                Err(e) => return malformed(format!("invalid JSON: {e}")),
            };
            let final_answer = match non_empty(wire.final_answer, "final_answer") {
                Ok(a) => a,
                Err(d) => return d,
            };
            match non_empty(wire.rationale, "rationale") {
                Ok(rationale) => Decoded::Valid(RolePayload::JudgeSynthesis {
                    final_answer,
                    rationale,
                }),
                Err(d) => d,
            }
        }
    }
}
