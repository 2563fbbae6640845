//! Per-question debate state machine — phases, transitions, session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::citations::Citation;
use crate::question::{PositionAssignment, Question, QuestionKind};
use crate::turn::{DebateRecord, DebateStatus, JudgeDecision, Turn};

/// Phase of one question's debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    /// Session created; positions not yet assigned.
    Init,
    /// Debaters are producing opening arguments.
    Opening,
    /// Debaters are producing rebuttals.
    Rebuttal,
    /// Judge has been invoked.
    Judged,
    /// Record finalized successfully.
    Complete,
    /// Retry budgets exhausted; partial turns retained.
    Failed,
}

impl DebatePhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Valid transitions from this phase. Any non-terminal phase may fail;
    /// Opening may skip straight to Judged when rounds <= 1.
    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Init => &[Self::Opening, Self::Failed],
            Self::Opening => &[Self::Rebuttal, Self::Judged, Self::Failed],
            Self::Rebuttal => &[Self::Judged, Self::Failed],
            Self::Judged => &[Self::Complete, Self::Failed],
            Self::Complete | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Opening => write!(f, "opening"),
            Self::Rebuttal => write!(f, "rebuttal"),
            Self::Judged => write!(f, "judged"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid phase transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

/// Tracks one question's debate as it is driven: current phase, transition
/// history, and the record being accumulated. Consumed by [`into_record`]
/// once a terminal phase is reached.
///
/// [`into_record`]: QuestionSession::into_record
#[derive(Debug)]
pub struct QuestionSession {
    pub question_id: String,
    pub phase: DebatePhase,
    pub transitions: Vec<PhaseTransition>,
    kind: QuestionKind,
    category: Option<String>,
    gold_answer: Option<String>,
    positions: Option<PositionAssignment>,
    turns: Vec<Turn>,
    judge: Option<JudgeDecision>,
    citations_used: Vec<Citation>,
    failure: Option<String>,
    /// Format-repair re-prompts used; > 0 downgrades Complete to Partial.
    repairs: u32,
    started: std::time::Instant,
    created_at: DateTime<Utc>,
}

impl QuestionSession {
    pub fn new(question: &Question) -> Self {
        Self {
            question_id: question.id.clone(),
            phase: DebatePhase::Init,
            transitions: Vec::new(),
            kind: question.kind,
            category: question.category.clone(),
            gold_answer: question.gold_answer.clone(),
            positions: None,
            turns: Vec::new(),
            judge: None,
            citations_used: Vec::new(),
            failure: None,
            repairs: 0,
            started: std::time::Instant::now(),
            created_at: Utc::now(),
        }
    }

    /// Transition to a new phase with a reason.
    pub fn transition(&mut self, to: DebatePhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }

    /// Record the MCQ position assignment. Must happen before leaving Init.
    pub fn assign_positions(&mut self, positions: PositionAssignment) {
        debug_assert_eq!(self.phase, DebatePhase::Init);
        self.positions = Some(positions);
    }

    /// Init → Opening.
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        self.transition(DebatePhase::Opening, "debate started")
    }

    /// Opening → Rebuttal.
    pub fn advance_to_rebuttal(&mut self) -> Result<(), TransitionError> {
        self.transition(DebatePhase::Rebuttal, "openings recorded")
    }

    /// Opening/Rebuttal → Judged.
    pub fn advance_to_judged(&mut self) -> Result<(), TransitionError> {
        self.transition(DebatePhase::Judged, "transcript handed to judge")
    }

    /// Append a completed turn to the record under construction.
    pub fn push_turn(&mut self, turn: Turn) {
        debug_assert!(!self.phase.is_terminal());
        self.turns.push(turn);
    }

    /// Turns recorded so far, in creation order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Count one clarifying format-repair re-prompt.
    pub fn note_repair(&mut self) {
        self.repairs += 1;
    }

    pub fn repairs(&self) -> u32 {
        self.repairs
    }

    /// Judged → Complete. For MCQ, marks `correct` against the withheld
    /// gold answer if one was provided.
    pub fn complete(
        &mut self,
        judge: JudgeDecision,
        citations_used: Vec<Citation>,
    ) -> Result<(), TransitionError> {
        self.transition(DebatePhase::Complete, "judge decision recorded")?;
        self.judge = Some(judge);
        self.citations_used = citations_used;
        Ok(())
    }

    /// Any non-terminal phase → Failed, tagged with the failure point
    /// (e.g. "rebuttal:debater_y"). Turns produced so far are retained.
    pub fn fail(&mut self, point: &str) -> Result<(), TransitionError> {
        self.transition(DebatePhase::Failed, point)?;
        self.failure = Some(point.to_string());
        Ok(())
    }

    /// Finalize into an immutable record. Callable only in a terminal phase.
    pub fn into_record(self) -> DebateRecord {
        debug_assert!(self.phase.is_terminal());
        let status = match self.phase {
            DebatePhase::Failed => DebateStatus::Failed,
            _ if self.repairs > 0 => DebateStatus::Partial,
            _ => DebateStatus::Complete,
        };
        let correct = match (&self.kind, &self.judge, &self.gold_answer) {
            (
                QuestionKind::Mcq,
                Some(JudgeDecision::SelectedLabel { label, .. }),
                Some(gold),
            ) => Some(label == gold),
            _ => None,
        };
        DebateRecord {
            question_id: self.question_id,
            category: self.category,
            positions: self.positions,
            turns: self.turns,
            judge: self.judge,
            citations_used: self.citations_used,
            status,
            failure: self.failure,
            correct,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            created_at: self.created_at,
        }
    }
}
