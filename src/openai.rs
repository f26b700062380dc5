//! Minimal OpenAI client implementing `QueryTutor`.
//!
//! Both operations are a single chat.completions call with a JSON schema response format.
//! The message content is parsed straight into the domain type: no repair, no retry.
//! Calls are instrumented and log model names, latencies and response sizes (not contents).
//!
//! NOTE: We never log the API key.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, instrument};

use crate::config::{OpenAiSettings, Prompts, Temperatures};
use crate::domain::{AnswerKind, Challenge, Difficulty, Feedback};
use crate::tutor::{QueryTutor, TutorError};
use crate::util::{fill_template, join_or_none, trunc_for_log};

#[derive(Clone)]
pub struct OpenAI {
  client: reqwest::Client,
  api_key: String,
  pub base_url: String,
  pub model: String,
  prompts: Prompts,
  temperatures: Temperatures,
}

impl OpenAI {
  pub fn new(settings: &OpenAiSettings, prompts: Prompts, temperatures: Temperatures) -> Result<Self, TutorError> {
    let mut builder = reqwest::Client::builder();
    if let Some(t) = settings.timeout {
      builder = builder.timeout(t);
    }
    Ok(Self {
      client: builder.build()?,
      api_key: settings.api_key.clone(),
      base_url: settings.base_url.trim_end_matches('/').to_string(),
      model: settings.model.clone(),
      prompts,
      temperatures,
    })
  }

  /// Structured chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, system, user, schema_name, schema), fields(model = %self.model, schema = %schema_name))]
  async fn chat_structured<T: DeserializeOwned>(
    &self,
    system: &str,
    user: &str,
    schema_name: &str,
    schema: Value,
    temperature: f32,
  ) -> Result<T, TutorError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: &self.model,
      messages: vec![
        ChatMessageReq { role: "system", content: system },
        ChatMessageReq { role: "user", content: user },
      ],
      temperature,
      response_format: ResponseFormat::json_schema(schema_name, schema),
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, concat!("querymaster/", env!("CARGO_PKG_VERSION")))
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 300));
      return Err(TutorError::Api { status: status.as_u16(), message });
    }

    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    parse_content(body)
  }
}

#[async_trait]
impl QueryTutor for OpenAI {
  #[instrument(level = "info", skip(self, difficulty, excluded_topics), fields(%difficulty, excluded = excluded_topics.len()))]
  async fn generate_challenge(&self, difficulty: Difficulty, excluded_topics: &[String]) -> Result<Challenge, TutorError> {
    let user = challenge_prompt(&self.prompts, difficulty, excluded_topics);
    let start = Instant::now();
    let result = self
      .chat_structured::<Challenge>(&self.prompts.challenge_system, &user, "challenge", challenge_schema(), self.temperatures.generation)
      .await;
    let elapsed = start.elapsed();

    match &result {
      Ok(ch) => info!(
        target: "challenge",
        ?elapsed,
        challenge_id = %ch.id,
        topic = %ch.topic,
        question_preview = %trunc_for_log(&ch.question, 60),
        "Challenge generated"
      ),
      Err(e) => error!(target: "challenge", ?elapsed, error = %e, "Model call failed during challenge generation"),
    }
    result
  }

  #[instrument(level = "info", skip(self, challenge, answer, kind), fields(challenge_id = %challenge.id, kind = kind.label(), answer_len = answer.len()))]
  async fn validate_answer(&self, challenge: &Challenge, answer: &str, kind: AnswerKind) -> Result<Feedback, TutorError> {
    let user = validation_prompt(&self.prompts, challenge, answer, kind);
    let start = Instant::now();
    let result = self
      .chat_structured::<Feedback>(&self.prompts.validation_system, &user, "feedback", feedback_schema(), self.temperatures.validation)
      .await;
    let elapsed = start.elapsed();

    match &result {
      Ok(fb) => info!(target: "challenge", ?elapsed, correct = fb.is_correct, "Answer graded"),
      Err(e) => error!(target: "challenge", ?elapsed, error = %e, "Model call failed during validation"),
    }
    result
  }
}

/// How large the schema should be at each level.
fn level_models(difficulty: Difficulty) -> &'static str {
  match difficulty {
    Difficulty::Beginner => "Use 1 simple model.",
    Difficulty::Intermediate | Difficulty::Advanced =>
      "MUST use 2 or 3 related models (ForeignKey, ManyToMany) to test JOINs and relationships.",
  }
}

/// Query concepts the question should exercise at each level.
fn level_concepts(difficulty: Difficulty) -> &'static str {
  match difficulty {
    Difficulty::Beginner => "basic filtering (filter, exclude), ordering (order_by), and simple field selection.",
    Difficulty::Intermediate => "relationships (select_related, prefetch_related), aggregations (Count, Sum, Avg), and annotations.",
    Difficulty::Advanced => "complex subqueries, F expressions, Q objects, window functions, or the raw SQL equivalent for optimization.",
  }
}

pub fn challenge_prompt(prompts: &Prompts, difficulty: Difficulty, excluded_topics: &[String]) -> String {
  let excluded = join_or_none(excluded_topics);
  fill_template(
    &prompts.challenge_user_template,
    &[
      ("difficulty", difficulty.as_str()),
      ("level_models", level_models(difficulty)),
      ("level_concepts", level_concepts(difficulty)),
      ("excluded_topics", excluded.as_str()),
    ],
  )
}

pub fn validation_prompt(prompts: &Prompts, challenge: &Challenge, answer: &str, kind: AnswerKind) -> String {
  fill_template(
    &prompts.validation_user_template,
    &[
      ("question", challenge.question.as_str()),
      ("models", challenge.models.as_str()),
      ("kind", kind.label()),
      ("dialect", kind.dialect()),
      ("answer", answer),
    ],
  )
}

pub fn challenge_schema() -> Value {
  json!({
    "type": "object",
    "properties": {
      "id": { "type": "string" },
      "models": { "type": "string", "description": "Formatted multi-line Django model code" },
      "tableName": { "type": "string" },
      "question": { "type": "string" },
      "difficulty": { "type": "string" },
      "topic": { "type": "string" }
    },
    "required": ["id", "models", "tableName", "question", "difficulty", "topic"],
    "additionalProperties": false
  })
}

pub fn feedback_schema() -> Value {
  json!({
    "type": "object",
    "properties": {
      "isCorrect": { "type": "boolean" },
      "explanation": { "type": "string" },
      "correctVersion": { "type": "string" },
      "improvement": { "type": "string" }
    },
    "required": ["isCorrect", "explanation"]
  })
}

fn parse_content<T: DeserializeOwned>(body: ChatCompletionResponse) -> Result<T, TutorError> {
  let text = body.choices.into_iter().next()
    .and_then(|c| c.message.content)
    .unwrap_or_default();
  let text = text.trim();
  if text.is_empty() {
    return Err(TutorError::EmptyResponse);
  }
  Ok(serde_json::from_str::<T>(text)?)
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessageReq<'a>>,
  temperature: f32,
  response_format: ResponseFormat<'a>,
}
#[derive(Serialize)]
struct ChatMessageReq<'a> { role: &'static str, content: &'a str }

#[derive(Serialize)]
struct ResponseFormat<'a> {
  #[serde(rename = "type")]
  kind: &'static str,
  json_schema: JsonSchemaFormat<'a>,
}
#[derive(Serialize)]
struct JsonSchemaFormat<'a> { name: &'a str, schema: Value }

impl<'a> ResponseFormat<'a> {
  fn json_schema(name: &'a str, schema: Value) -> Self {
    Self { kind: "json_schema", json_schema: JsonSchemaFormat { name, schema } }
  }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
