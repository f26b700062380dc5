//! The seam between the session controller and whatever generates and grades challenges.
//!
//! Production uses the OpenAI client (`crate::openai::OpenAI`); tests inject `fake::FakeTutor`.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AnswerKind, Challenge, Difficulty, Feedback};

#[derive(Debug, Error)]
pub enum TutorError {
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("API error (HTTP {status}): {message}")]
  Api { status: u16, message: String },
  #[error("model returned an empty response")]
  EmptyResponse,
  #[error("JSON parse error: {0}")]
  Parse(#[from] serde_json::Error),
}

/// Remote generation + grading. One request/response round trip per call; no retries, no caching.
#[async_trait]
pub trait QueryTutor: Send + Sync {
  async fn generate_challenge(
    &self,
    difficulty: Difficulty,
    excluded_topics: &[String],
  ) -> Result<Challenge, TutorError>;

  async fn validate_answer(
    &self,
    challenge: &Challenge,
    answer: &str,
    kind: AnswerKind,
  ) -> Result<Feedback, TutorError>;
}
