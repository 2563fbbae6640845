//! Async runner for multi-agent debates over legal exam questions.
//!
//! Composes the pure `debate` core with an external generation capability:
//! - `client`: the `GenerateClient` trait and an OpenAI-compatible HTTP
//!   implementation
//! - `retry`: bounded retry with exponential backoff
//! - `decode`: validated decode of role-turn JSON
//! - `prompts`: role prompt builders
//! - `driver`: per-question orchestration
//! - `batch`: sequential batch execution with checkpoint/resume
//! - `config`: explicit runner configuration

pub mod batch;
pub mod client;
pub mod config;
pub mod decode;
pub mod driver;
pub mod prompts;
pub mod retry;

pub use batch::{BatchConfig, BatchError, BatchRunner, BatchSummary};
pub use client::{CallConstraints, ClientConfig, GenerateClient, GenerateError, HttpGenerateClient};
pub use config::RunnerConfig;
pub use decode::{decode_turn, Decoded, ExpectedShape, RolePayload};
pub use driver::{DebateDriver, DriverConfig, RoleBudgets};
pub use retry::{CallError, RetryPolicy, RetryingCaller};
