//! Multi-Agent Debate core — Legal Exam Edition
//!
//! Pure, synchronous building blocks for running adversarial debates over
//! legal exam questions:
//! - question inputs and debater position assignment
//! - turns, judge decisions, and the per-question debate record
//! - the per-question phase state machine
//! - citation extraction/normalization for Brazilian statutory text
//! - the batch checkpoint store for crash recovery
//!
//! # Debate Flow
//!
//! ```text
//! Init → Opening → Rebuttal → Judged → Complete
//!   │       │    (rounds=2)      │
//!   │       └────────────────────┘
//!   │          (rounds<=1)
//!   └─ any non-terminal phase → Failed (partial turns retained)
//! ```
//!
//! The async layer that drives external model calls lives in the
//! `mad-runner` crate; nothing here touches the network.

pub mod checkpoint;
pub mod citations;
pub mod question;
pub mod state;
pub mod turn;

pub use checkpoint::{
    BatchCheckpoint, CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
pub use citations::{extract, Citation, CitationType, Extraction, Span};
pub use question::{
    Alternative, PositionAssignment, PositionError, Question, QuestionKind,
};
pub use state::{DebatePhase, PhaseTransition, QuestionSession, TransitionError};
pub use turn::{DebateRecord, DebateStatus, DebaterRole, JudgeDecision, Round, Turn};
