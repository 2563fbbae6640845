//! Per-question debate orchestration.
//!
//! Drives one question through the core phase state machine: position
//! assignment, the concurrent opening pair, sequential rebuttals, and the
//! judge, with citation extraction on every successful turn. Later turns
//! are data-dependent on earlier ones, so apart from the two mutually
//! independent openings (`tokio::join!`) at most one call is in flight.

use debate::{
    extract, DebateRecord, DebaterRole, JudgeDecision, PositionAssignment, PositionError,
    Question, QuestionKind, QuestionSession, Round, Turn,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::client::CallConstraints;
use crate::decode::{decode_turn, Decoded, ExpectedShape, RolePayload};
use crate::prompts;
use crate::retry::{CallError, RetryingCaller};

const OPENING_SCHEMA: &str = r#"{"position": "<alternativa>", "argument": "..."}"#;
const REBUTTAL_SCHEMA: &str = r#"{"rebuttal": "..."}"#;

/// Per-role output token budgets.
#[derive(Debug, Clone, Copy)]
pub struct RoleBudgets {
    pub opening: u32,
    pub rebuttal: u32,
    pub judge: u32,
    /// Flat budget for all open-ended turns.
    pub open_ended: u32,
}

impl Default for RoleBudgets {
    fn default() -> Self {
        Self {
            opening: 350,
            rebuttal: 300,
            judge: 300,
            open_ended: 2000,
        }
    }
}

/// Orchestration knobs for one driver.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    /// 0 = single debater, 1 = openings only, 2 = openings + rebuttals.
    pub rounds: u8,
    pub temperature: f32,
    pub budgets: RoleBudgets,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rounds: 2,
            temperature: 0.7,
            budgets: RoleBudgets::default(),
        }
    }
}

#[derive(Debug, Error)]
enum TurnError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("malformed turn after clarification: {0}")]
    Malformed(String),
}

/// Where and why a question failed; `point` becomes the record's failure tag.
struct Failure {
    point: String,
    error: String,
}

impl Failure {
    fn new(point: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            point: point.into(),
            error: error.to_string(),
        }
    }
}

/// Drives one question at a time through the debate protocol.
pub struct DebateDriver {
    caller: RetryingCaller,
    config: DriverConfig,
    rng: StdRng,
}

impl DebateDriver {
    pub fn new(caller: RetryingCaller, config: DriverConfig) -> Self {
        Self::with_rng(caller, config, StdRng::from_os_rng())
    }

    /// Injectable RNG for reproducible position assignment in tests.
    pub fn with_rng(caller: RetryingCaller, config: DriverConfig, rng: StdRng) -> Self {
        Self {
            caller,
            config,
            rng,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Run one question to a terminal record. Never panics or errors: every
    /// failure path lands in a `Failed` record with the partial turns kept.
    pub async fn run_question(&mut self, question: &Question) -> DebateRecord {
        let mut session = QuestionSession::new(question);
        if let Err(failure) = self.drive(question, &mut session).await {
            warn!(
                question_id = %question.id,
                point = %failure.point,
                error = %failure.error,
                "question failed"
            );
            if !session.phase.is_terminal() {
                session
                    .fail(&failure.point)
                    .unwrap_or_else(|e| error!(error = %e, "could not mark session failed"));
            }
        }
        session.into_record()
    }

    async fn drive(
        &mut self,
        question: &Question,
        session: &mut QuestionSession,
    ) -> Result<(), Failure> {
        let is_mcq = question.kind == QuestionKind::Mcq;
        let rounds = self.config.rounds;

        let positions = if is_mcq && rounds > 0 {
            let pos = self
                .draw_positions(question)
                .map_err(|e| Failure::new("init:positions", e))?;
            debug!(
                question_id = %question.id,
                debater_x = %pos.debater_x,
                debater_y = %pos.debater_y,
                "positions assigned"
            );
            session.assign_positions(pos.clone());
            Some(pos)
        } else {
            None
        };

        session
            .begin()
            .map_err(|e| Failure::new("init:transition", e))?;

        let opening_constraints = self.constraints(is_mcq, self.config.budgets.opening);

        // Openings. With rounds = 0 a single debater answers unopposed;
        // otherwise both open independently and concurrently.
        let mut openings: Vec<(DebaterRole, String)> = Vec::new();
        if rounds == 0 {
            let prompt = prompts::open_opening(question, false);
            let body = self
                .debater_turn(
                    session,
                    DebaterRole::DebaterX,
                    Round::Opening,
                    prompt,
                    ExpectedShape::Opening,
                    opening_constraints,
                    OPENING_SCHEMA,
                )
                .await
                .map_err(|e| Failure::new("opening:debater_x", e))?;
            openings.push((DebaterRole::DebaterX, body));
        } else {
            let (prompt_x, prompt_y) = match &positions {
                Some(pos) => (
                    prompts::mcq_opening(question, &pos.debater_x),
                    prompts::mcq_opening(question, &pos.debater_y),
                ),
                None => (
                    prompts::open_opening(question, false),
                    prompts::open_opening(question, true),
                ),
            };
            let (rx, ry) = tokio::join!(
                self.call_role(prompt_x, ExpectedShape::Opening, opening_constraints, OPENING_SCHEMA),
                self.call_role(prompt_y, ExpectedShape::Opening, opening_constraints, OPENING_SCHEMA),
            );
            // Record whichever openings succeeded before failing the question.
            let mut first_failure: Option<Failure> = None;
            for (role, result) in [(DebaterRole::DebaterX, rx), (DebaterRole::DebaterY, ry)] {
                match result {
                    Ok((payload, raw, repairs)) => {
                        let body = payload.body().to_string();
                        Self::record_turn(session, role, Round::Opening, raw, &body, repairs);
                        openings.push((role, body));
                    }
                    Err(e) if first_failure.is_none() => {
                        first_failure = Some(Failure::new(format!("opening:{role}"), e));
                    }
                    Err(_) => {}
                }
            }
            if let Some(failure) = first_failure {
                return Err(failure);
            }
        }

        // Rebuttals, sequential x then y. Each sees its own opening plus the
        // opponent's opening.
        if rounds == 2 {
            session
                .advance_to_rebuttal()
                .map_err(|e| Failure::new("rebuttal:transition", e))?;
            let rebuttal_constraints = self.constraints(is_mcq, self.config.budgets.rebuttal);
            let x_open = opening_body(&openings, DebaterRole::DebaterX);
            let y_open = opening_body(&openings, DebaterRole::DebaterY);

            for (role, own, opponent) in [
                (DebaterRole::DebaterX, x_open.clone(), y_open.clone()),
                (DebaterRole::DebaterY, y_open, x_open),
            ] {
                let prompt = match &positions {
                    Some(pos) => {
                        let label = match role {
                            DebaterRole::DebaterX => &pos.debater_x,
                            _ => &pos.debater_y,
                        };
                        prompts::mcq_rebuttal(question, label, &own, &opponent)
                    }
                    None => prompts::open_rebuttal(question, &own, &opponent),
                };
                self.debater_turn(
                    session,
                    role,
                    Round::Rebuttal,
                    prompt,
                    ExpectedShape::Rebuttal,
                    rebuttal_constraints,
                    REBUTTAL_SCHEMA,
                )
                .await
                .map_err(|e| Failure::new(format!("rebuttal:{role}"), e))?;
            }
        }

        session
            .advance_to_judged()
            .map_err(|e| Failure::new("judged:transition", e))?;
        self.judge(question, session).await
    }

    /// Judge turn: full ordered transcript in, validated decision out.
    async fn judge(
        &self,
        question: &Question,
        session: &mut QuestionSession,
    ) -> Result<(), Failure> {
        let is_mcq = question.kind == QuestionKind::Mcq;
        let constraints = self.constraints(is_mcq, self.config.budgets.judge);
        let transcript = session_transcript(session);

        let (decision, raw, body) = if is_mcq {
            let schema = r#"{"decision": "<alternativa>", "rationale": "..."}"#;
            let prompt = prompts::mcq_judge(question, &transcript);
            let (payload, raw, repairs) = self
                .call_role(prompt.clone(), ExpectedShape::JudgeMcq, constraints, schema)
                .await
                .map_err(|e| Failure::new("judged:judge", e))?;
            for _ in 0..repairs {
                session.note_repair();
            }
            let RolePayload::JudgeMcq {
                mut decision,
                mut rationale,
            } = payload
            else {
                return Err(Failure::new("judged:judge", "unexpected payload shape"));
            };
            let mut raw = raw;

            // A label outside the offered set is a validation failure, not a
            // debate outcome: one reminder re-prompt, then the question fails.
            if !question.has_label(&decision) {
                warn!(question_id = %question.id, label = %decision, "judge label outside offered set");
                session.note_repair();
                let reminder = prompts::judge_label_reminder(&prompt, &decision, &question.labels());
                raw = self
                    .caller
                    .invoke(&reminder, &constraints)
                    .await
                    .map_err(|e| Failure::new("judged:judge", e))?;
                match decode_turn(&raw, ExpectedShape::JudgeMcq) {
                    Decoded::Valid(RolePayload::JudgeMcq {
                        decision: second,
                        rationale: second_rationale,
                    }) if question.has_label(&second) => {
                        decision = second;
                        rationale = second_rationale;
                    }
                    _ => {
                        return Err(Failure::new(
                            "judged:invalid_label",
                            format!("judge decision '{decision}' not in offered set"),
                        ))
                    }
                }
            }
            let body = rationale.clone();
            (
                JudgeDecision::SelectedLabel {
                    label: decision,
                    rationale,
                },
                raw,
                body,
            )
        } else {
            let schema = r#"{"final_answer": "...", "rationale": "..."}"#;
            let prompt = prompts::open_judge(question, &transcript);
            let (payload, raw, repairs) = self
                .call_role(prompt, ExpectedShape::JudgeSynthesis, constraints, schema)
                .await
                .map_err(|e| Failure::new("judged:judge", e))?;
            for _ in 0..repairs {
                session.note_repair();
            }
            let RolePayload::JudgeSynthesis {
                final_answer,
                rationale,
            } = payload
            else {
                return Err(Failure::new("judged:judge", "unexpected payload shape"));
            };
            let body = final_answer.clone();
            (
                JudgeDecision::Synthesis {
                    final_answer,
                    rationale,
                },
                raw,
                body,
            )
        };

        let extraction = extract(&body);
        let citations_used = extraction.citations.clone();
        session.push_turn(Turn::new(
            DebaterRole::Judge,
            Round::Synthesis,
            raw,
            body,
            extraction,
        ));
        session
            .complete(decision, citations_used)
            .map_err(|e| Failure::new("judged:transition", e))
    }

    /// One debater call recorded into the session.
    #[allow(clippy::too_many_arguments)]
    async fn debater_turn(
        &self,
        session: &mut QuestionSession,
        role: DebaterRole,
        round: Round,
        prompt: String,
        shape: ExpectedShape,
        constraints: CallConstraints,
        schema: &str,
    ) -> Result<String, TurnError> {
        let (payload, raw, repairs) = self.call_role(prompt, shape, constraints, schema).await?;
        let body = payload.body().to_string();
        Self::record_turn(session, role, round, raw, &body, repairs);
        Ok(body)
    }

    fn record_turn(
        session: &mut QuestionSession,
        role: DebaterRole,
        round: Round,
        raw: String,
        body: &str,
        repairs: u32,
    ) {
        for _ in 0..repairs {
            session.note_repair();
        }
        let extraction = extract(body);
        debug!(
            %role,
            %round,
            citations = extraction.citations.len(),
            parse_errors = extraction.parse_errors.len(),
            "turn recorded"
        );
        session.push_turn(Turn::new(role, round, raw, body.to_string(), extraction));
    }

    /// Invoke + decode, with exactly one clarifying re-prompt on malformed
    /// output. Returns the number of repairs spent (0 or 1).
    async fn call_role(
        &self,
        prompt: String,
        shape: ExpectedShape,
        constraints: CallConstraints,
        schema: &str,
    ) -> Result<(RolePayload, String, u32), TurnError> {
        let raw = self.caller.invoke(&prompt, &constraints).await?;
        match decode_turn(&raw, shape) {
            Decoded::Valid(payload) => Ok((payload, raw, 0)),
            Decoded::Malformed { reason } => {
                warn!(%reason, "malformed turn, issuing clarifying re-prompt");
                let repaired = prompts::clarify(&prompt, &reason, schema);
                let raw = self.caller.invoke(&repaired, &constraints).await?;
                match decode_turn(&raw, shape) {
                    Decoded::Valid(payload) => Ok((payload, raw, 1)),
                    Decoded::Malformed { reason } => Err(TurnError::Malformed(reason)),
                }
            }
        }
    }

    fn constraints(&self, is_mcq: bool, mcq_budget: u32) -> CallConstraints {
        CallConstraints {
            max_tokens: if is_mcq {
                mcq_budget
            } else {
                self.config.budgets.open_ended
            },
            temperature: self.config.temperature,
            json_object: true,
        }
    }

    /// Random draw without replacement: reject any draw where both roles
    /// land on the same label.
    fn draw_positions(&mut self, question: &Question) -> Result<PositionAssignment, PositionError> {
        let labels = question.labels();
        if labels.len() < 2 {
            return Err(PositionError::TooFewAlternatives(labels.len()));
        }
        // The rejection loop only terminates with two distinct labels on offer.
        if labels.iter().all(|l| *l == labels[0]) {
            return Err(PositionError::DuplicateLabel(labels[0].clone()));
        }
        loop {
            let x = &labels[self.rng.random_range(0..labels.len())];
            let y = &labels[self.rng.random_range(0..labels.len())];
            if x != y {
                return PositionAssignment::new(question, x.clone(), y.clone());
            }
        }
    }
}

fn opening_body(openings: &[(DebaterRole, String)], role: DebaterRole) -> String {
    openings
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, body)| body.clone())
        .unwrap_or_default()
}

/// Ordered transcript handed to the judge.
fn session_transcript(session: &QuestionSession) -> String {
    session
        .turns()
        .iter()
        .map(|t| format!("[{} / {}]\n{}", t.role, t.round, t.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
