//! Batch execution over a question set, with checkpoint/resume.

use debate::{
    BatchCheckpoint, CheckpointError, CheckpointStore, DebateRecord, DebateStatus, Question,
    QuestionKind,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::driver::DebateDriver;

/// Batch identity and checkpoint cadence.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_id: String,
    /// Save a checkpoint after every this many completed questions.
    pub checkpoint_every: usize,
}

/// Batch-level failure. Configuration errors abort before any call is
/// issued; checkpoint errors abort at the boundary they occur on.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid batch configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Aggregate counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
    /// Citation parse errors summed across all turns.
    pub parse_errors: usize,
    /// MCQ records whose judge decision matched the gold answer.
    pub correct: usize,
    /// MCQ records that were marked against a gold answer.
    pub marked: usize,
}

impl BatchSummary {
    /// MCQ accuracy over the marked records, when any exist.
    pub fn accuracy(&self) -> Option<f64> {
        (self.marked > 0).then(|| self.correct as f64 / self.marked as f64)
    }
}

/// Iterates a question set through the driver, sequentially: external rate
/// limits dominate throughput, so parallelism belongs at the batch-partition
/// level (disjoint batch ids), never inside one batch.
pub struct BatchRunner<S: CheckpointStore> {
    driver: DebateDriver,
    store: S,
    config: BatchConfig,
}

impl<S: CheckpointStore> BatchRunner<S> {
    pub fn new(driver: DebateDriver, store: S, config: BatchConfig) -> Self {
        Self {
            driver,
            store,
            config,
        }
    }

    /// Fatal pre-flight checks. Nothing is silently corrected: a bad round
    /// count, a zero checkpoint interval, or a degenerate MCQ question
    /// aborts before the first external call.
    fn validate(&self, questions: &[Question]) -> Result<(), BatchError> {
        if self.config.checkpoint_every == 0 {
            return Err(BatchError::Config(
                "checkpoint interval must be at least 1".to_string(),
            ));
        }
        if self.driver.config().rounds > 2 {
            return Err(BatchError::Config(format!(
                "round count must be 0, 1 or 2, got {}",
                self.driver.config().rounds
            )));
        }
        for q in questions {
            if q.kind != QuestionKind::Mcq {
                continue;
            }
            if q.alternatives.len() < 2 {
                return Err(BatchError::Config(format!(
                    "mcq question '{}' offers {} alternatives, need at least 2",
                    q.id,
                    q.alternatives.len()
                )));
            }
            let mut labels: Vec<&str> = q.alternatives.iter().map(|a| a.label.as_str()).collect();
            labels.sort_unstable();
            labels.dedup();
            if labels.len() < q.alternatives.len() {
                return Err(BatchError::Config(format!(
                    "mcq question '{}' repeats alternative labels",
                    q.id
                )));
            }
        }
        Ok(())
    }

    /// Run the batch to completion, resuming from a checkpoint if one
    /// exists. Per-question failures never abort the run; they land as
    /// `Failed` records and are counted in the summary.
    pub async fn run(
        &mut self,
        questions: &[Question],
    ) -> Result<(BatchSummary, Vec<DebateRecord>), BatchError> {
        self.validate(questions)?;

        let mut records = match self.store.load(&self.config.batch_id)? {
            Some(checkpoint) => {
                info!(
                    batch_id = %self.config.batch_id,
                    resume_index = checkpoint.last_completed_question_index,
                    "resuming from checkpoint"
                );
                checkpoint.completed_records
            }
            None => Vec::new(),
        };
        if records.len() > questions.len() {
            return Err(BatchError::Config(format!(
                "checkpoint holds {} records but the batch has only {} questions",
                records.len(),
                questions.len()
            )));
        }
        // Resuming against a different question file would silently mix
        // batches; the checkpointed prefix must match id-for-id.
        for (record, question) in records.iter().zip(questions) {
            if record.question_id != question.id {
                return Err(BatchError::Config(format!(
                    "checkpoint for batch '{}' records question '{}' where the \
                     question set has '{}'",
                    self.config.batch_id, record.question_id, question.id
                )));
            }
        }

        let start = records.len();
        for (index, question) in questions.iter().enumerate().skip(start) {
            info!(
                question_id = %question.id,
                index,
                total = questions.len(),
                "running question"
            );
            let record = self.driver.run_question(question).await;
            match record.status {
                DebateStatus::Failed => warn!(
                    question_id = %record.question_id,
                    failure = record.failure.as_deref().unwrap_or("unknown"),
                    "question recorded as failed"
                ),
                status => info!(
                    question_id = %record.question_id,
                    %status,
                    elapsed_ms = record.elapsed_ms,
                    "question recorded"
                ),
            }
            records.push(record);

            // Question boundaries only: a checkpoint never holds a
            // half-written record.
            let done = records.len();
            if done % self.config.checkpoint_every == 0 && done < questions.len() {
                self.store
                    .save(&BatchCheckpoint::new(&self.config.batch_id, records.clone()))?;
            }
        }

        self.store.clear(&self.config.batch_id)?;
        let summary = summarize(&records);
        info!(
            batch_id = %self.config.batch_id,
            complete = summary.complete,
            partial = summary.partial,
            failed = summary.failed,
            parse_errors = summary.parse_errors,
            accuracy = summary.accuracy().unwrap_or(f64::NAN),
            "batch finished"
        );
        Ok((summary, records))
    }
}

fn summarize(records: &[DebateRecord]) -> BatchSummary {
    let mut summary = BatchSummary {
        total: records.len(),
        ..BatchSummary::default()
    };
    for record in records {
        match record.status {
            DebateStatus::Complete => summary.complete += 1,
            DebateStatus::Partial => summary.partial += 1,
            DebateStatus::Failed => summary.failed += 1,
        }
        summary.parse_errors += record.parse_error_count();
        if let Some(correct) = record.correct {
            summary.marked += 1;
            if correct {
                summary.correct += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CallConstraints, GenerateClient, GenerateError};
    use crate::driver::DriverConfig;
    use crate::retry::{RetryPolicy, RetryingCaller};
    use async_trait::async_trait;
    use chrono::Utc;
    use debate::MemoryCheckpointStore;
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::Arc;

    struct NeverCalled;

    #[async_trait]
    impl GenerateClient for NeverCalled {
        async fn generate(
            &self,
            _prompt: &str,
            _constraints: &CallConstraints,
        ) -> Result<String, GenerateError> {
            panic!("configuration errors must abort before any call");
        }
    }

    fn runner(rounds: u8, checkpoint_every: usize) -> BatchRunner<MemoryCheckpointStore> {
        let driver = DebateDriver::with_rng(
            RetryingCaller::new(Arc::new(NeverCalled), RetryPolicy::default()),
            DriverConfig {
                rounds,
                ..DriverConfig::default()
            },
            StdRng::seed_from_u64(7),
        );
        BatchRunner::new(
            driver,
            MemoryCheckpointStore::new(),
            BatchConfig {
                batch_id: "test".to_string(),
                checkpoint_every,
            },
        )
    }

    fn mcq(id: &str, alternatives: usize) -> Question {
        use debate::{Alternative, QuestionKind};
        Question {
            id: id.to_string(),
            text: "t".to_string(),
            kind: QuestionKind::Mcq,
            alternatives: ["A", "B", "C", "D"][..alternatives]
                .iter()
                .map(|l| Alternative {
                    label: l.to_string(),
                    text: l.to_string(),
                })
                .collect(),
            gold_answer: None,
            category: None,
        }
    }

    #[tokio::test]
    async fn test_round_count_over_two_is_fatal() {
        let mut r = runner(3, 10);
        let err = r.run(&[mcq("q", 4)]).await.unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[tokio::test]
    async fn test_zero_checkpoint_interval_is_fatal() {
        let mut r = runner(2, 0);
        let err = r.run(&[mcq("q", 4)]).await.unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[tokio::test]
    async fn test_degenerate_mcq_is_fatal() {
        let mut r = runner(2, 10);
        let err = r.run(&[mcq("ok", 4), mcq("bad", 1)]).await.unwrap_err();
        match err {
            BatchError::Config(msg) => assert!(msg.contains("bad")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_labels_are_fatal() {
        let mut r = runner(2, 10);
        let mut q = mcq("dup", 4);
        for alt in &mut q.alternatives {
            alt.label = "A".to_string();
        }
        let err = r.run(&[q]).await.unwrap_err();
        match err {
            BatchError::Config(msg) => assert!(msg.contains("dup")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resume_rejects_mismatched_question_set() {
        let store = MemoryCheckpointStore::new();
        let done = DebateRecord {
            question_id: "other".to_string(),
            category: None,
            positions: None,
            turns: vec![],
            judge: None,
            citations_used: vec![],
            status: DebateStatus::Complete,
            failure: None,
            correct: None,
            elapsed_ms: 0,
            created_at: Utc::now(),
        };
        store
            .save(&BatchCheckpoint::new("test", vec![done]))
            .unwrap();
        let driver = DebateDriver::with_rng(
            RetryingCaller::new(Arc::new(NeverCalled), RetryPolicy::default()),
            DriverConfig::default(),
            StdRng::seed_from_u64(7),
        );
        let mut r = BatchRunner::new(
            driver,
            store,
            BatchConfig {
                batch_id: "test".to_string(),
                checkpoint_every: 10,
            },
        );
        let err = r.run(&[mcq("q-1", 4), mcq("q-2", 4)]).await.unwrap_err();
        match err {
            BatchError::Config(msg) => assert!(msg.contains("other")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_summary_counts_and_accuracy() {
        let record = |status, correct| DebateRecord {
            question_id: "q".to_string(),
            category: None,
            positions: None,
            turns: vec![],
            judge: None,
            citations_used: vec![],
            status,
            failure: None,
            correct,
            elapsed_ms: 0,
            created_at: Utc::now(),
        };
        let summary = summarize(&[
            record(DebateStatus::Complete, Some(true)),
            record(DebateStatus::Complete, Some(false)),
            record(DebateStatus::Partial, Some(true)),
            record(DebateStatus::Failed, None),
        ]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.complete, 2);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.marked, 3);
        assert_eq!(summary.correct, 2);
        assert!((summary.accuracy().unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy_absent_without_marked_records() {
        assert!(summarize(&[]).accuracy().is_none());
    }
}
