//! Domain models: difficulty levels, answer kinds, challenges and feedback.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Level selected by the learner. Drives prompt wording and the point award.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
  #[default]
  Beginner,
  Intermediate,
  Advanced,
}

impl Difficulty {
  #[allow(dead_code)]
  pub const ALL: [Difficulty; 3] = [Difficulty::Beginner, Difficulty::Intermediate, Difficulty::Advanced];

  /// Points awarded for each answer kind verified at this level.
  pub fn points(self) -> u32 {
    match self {
      Difficulty::Beginner => 5,
      Difficulty::Intermediate => 10,
      Difficulty::Advanced => 20,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Difficulty::Beginner => "Beginner",
      Difficulty::Intermediate => "Intermediate",
      Difficulty::Advanced => "Advanced",
    }
  }
}

impl std::fmt::Display for Difficulty {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The two answer modalities a learner submits for every challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
  Sql,
  Orm,
}

impl AnswerKind {
  #[allow(dead_code)]
  pub const ALL: [AnswerKind; 2] = [AnswerKind::Sql, AnswerKind::Orm];

  /// Upper-case label used in prompts and user-facing messages.
  pub fn label(self) -> &'static str {
    match self {
      AnswerKind::Sql => "SQL",
      AnswerKind::Orm => "ORM",
    }
  }

  /// What the grader should check syntax against.
  pub fn dialect(self) -> &'static str {
    match self {
      AnswerKind::Sql => "PostgreSQL/Standard SQL",
      AnswerKind::Orm => "Django ORM",
    }
  }
}

impl std::str::FromStr for AnswerKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "sql" => Ok(AnswerKind::Sql),
      "orm" => Ok(AnswerKind::Orm),
      other => Err(format!("unknown answer kind '{other}' (expected 'sql' or 'orm')")),
    }
  }
}

/// One value per answer kind, so both kinds are always handled symmetrically.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PerKind<T> {
  pub sql: T,
  pub orm: T,
}

impl<T> PerKind<T> {
  pub fn map<U>(&self, mut f: impl FnMut(AnswerKind, &T) -> U) -> PerKind<U> {
    PerKind { sql: f(AnswerKind::Sql, &self.sql), orm: f(AnswerKind::Orm, &self.orm) }
  }

  pub fn iter(&self) -> impl Iterator<Item = (AnswerKind, &T)> {
    [(AnswerKind::Sql, &self.sql), (AnswerKind::Orm, &self.orm)].into_iter()
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = (AnswerKind, &mut T)> {
    [(AnswerKind::Sql, &mut self.sql), (AnswerKind::Orm, &mut self.orm)].into_iter()
  }
}

impl<T> Index<AnswerKind> for PerKind<T> {
  type Output = T;

  fn index(&self, kind: AnswerKind) -> &T {
    match kind {
      AnswerKind::Sql => &self.sql,
      AnswerKind::Orm => &self.orm,
    }
  }
}

impl<T> IndexMut<AnswerKind> for PerKind<T> {
  fn index_mut(&mut self, kind: AnswerKind) -> &mut T {
    match kind {
      AnswerKind::Sql => &mut self.sql,
      AnswerKind::Orm => &mut self.orm,
    }
  }
}

/// A schema + question pair, produced wholesale by the model.
/// Every field is opaque text; nothing here is parsed locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
  pub id: String,
  /// Model definitions (schema) shown to the learner.
  pub models: String,
  pub table_name: String,
  pub question: String,
  pub difficulty: String,
  pub topic: String,
}

/// Verdict and explanation for one submitted answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
  pub is_correct: bool,
  pub explanation: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub correct_version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub improvement: Option<String>,
}
