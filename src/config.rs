//! Runtime configuration.
//!
//! `Settings` is read once from the environment at startup and passed down explicitly;
//! nothing else in the crate reads env vars. Prompts may be overridden from a TOML file
//! (`AGENT_CONFIG_PATH`), see `AgentConfig`.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug)]
pub struct Settings {
  pub addr: SocketAddr,
  pub static_dir: String,
  /// Sessions idle this long with no socket attached are dropped.
  pub session_idle: Duration,
  pub openai: OpenAiSettings,
  pub agent: AgentConfig,
}

#[derive(Clone, Debug)]
pub struct OpenAiSettings {
  /// Passed through as-is; an empty key only fails once the API rejects it.
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub timeout: Option<Duration>,
}

impl Default for OpenAiSettings {
  fn default() -> Self {
    Self {
      api_key: String::new(),
      base_url: "https://api.openai.com/v1".into(),
      model: "gpt-4o-mini".into(),
      timeout: None,
    }
  }
}

impl Settings {
  pub fn from_env() -> Self {
    Self::from_lookup(|k| std::env::var(k).ok())
  }

  /// Build from any key lookup; `from_env` passes `std::env::var`.
  pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
    let port = get("PORT").and_then(|p| p.parse::<u16>().ok()).unwrap_or(3000);
    let defaults = OpenAiSettings::default();
    let openai = OpenAiSettings {
      api_key: get("OPENAI_API_KEY").unwrap_or_default(),
      base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
      model: get("OPENAI_MODEL").unwrap_or(defaults.model),
      timeout: get("OPENAI_TIMEOUT_SECS")
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .map(Duration::from_secs),
    };
    let agent = get("AGENT_CONFIG_PATH")
      .and_then(|path| load_agent_config(&path))
      .unwrap_or_default();

    Self {
      addr: SocketAddr::from(([0, 0, 0, 0], port)),
      static_dir: get("STATIC_DIR").unwrap_or_else(|| "./static".into()),
      session_idle: Duration::from_secs(
        get("SESSION_IDLE_SECS").and_then(|s| s.parse::<u64>().ok()).filter(|s| *s > 0).unwrap_or(1800),
      ),
      openai,
      agent,
    }
  }
}

/// Optional TOML overrides.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub temperatures: Temperatures,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Temperatures {
  pub generation: f32,
  pub validation: f32,
}

impl Default for Temperatures {
  fn default() -> Self {
    Self { generation: 0.9, validation: 0.2 }
  }
}

/// Prompt templates. Placeholders are `{name}` and are filled by `util::fill_template`.
///
/// Generation: `{difficulty}`, `{level_models}`, `{level_concepts}`, `{excluded_topics}`.
/// Validation: `{question}`, `{models}`, `{kind}`, `{dialect}`, `{answer}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub challenge_system: String,
  pub challenge_user_template: String,
  pub validation_system: String,
  pub validation_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      challenge_system: "Act as a Django and SQL expert educator. Respond ONLY with JSON matching the requested schema.".into(),
      challenge_user_template: "Generate a new database challenge for a user at the {difficulty} level.\n\
        \n\
        Rules:\n\
        1. Provide a realistic Django model definition (Python code). {level_models}\n\
        2. The models string MUST include actual newlines (\\n) for proper code formatting.\n\
        3. Define a practical question that requires writing a query.\n\
        4. The question should focus on {difficulty} concepts: {level_concepts}\n\
        5. Ensure the topic is different from: {excluded_topics}.\n\
        \n\
        Output the result in JSON format.".into(),
      validation_system: "You grade database query exercises. Be precise and concise. Respond ONLY with JSON matching the requested schema.".into(),
      validation_user_template: "Challenge Question: {question}\n\
        Models:\n\
        {models}\n\
        \n\
        User {kind} Answer:\n\
        {answer}\n\
        \n\
        Validate this {kind} solution.\n\
        1. Check for syntax correctness for {dialect}.\n\
        2. Check if it logically solves the question based on the provided models.\n\
        3. Provide clear explanations.\n\
        4. If incorrect, provide the corrected version (formatted with newlines).\n\
        5. If correct, provide a best practice tip or improvement.\n\
        \n\
        Return as JSON.".into(),
    }
  }
}

/// Read and parse the TOML file at `path`. IO/parse errors are logged and yield None.
pub fn load_agent_config(path: &str) -> Option<AgentConfig> {
  match std::fs::read_to_string(path) {
    Ok(s) => match toml::from_str::<AgentConfig>(&s) {
      Ok(cfg) => {
        info!(target: "querymaster", %path, "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "querymaster", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "querymaster", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |k| map.get(k).cloned()
  }

  #[test]
  fn defaults_apply_when_env_is_empty() {
    let s = Settings::from_lookup(lookup(&[]));
    assert_eq!(s.addr.port(), 3000);
    assert_eq!(s.static_dir, "./static");
    assert_eq!(s.session_idle, Duration::from_secs(1800));
    assert_eq!(s.openai.api_key, "");
    assert_eq!(s.openai.base_url, "https://api.openai.com/v1");
    assert_eq!(s.openai.model, "gpt-4o-mini");
    assert!(s.openai.timeout.is_none());
    assert!(s.agent.prompts.challenge_user_template.contains("{excluded_topics}"));
  }

  #[test]
  fn env_values_override_defaults() {
    let s = Settings::from_lookup(lookup(&[
      ("PORT", "8088"),
      ("OPENAI_API_KEY", "sk-test"),
      ("OPENAI_MODEL", "gpt-4o"),
      ("OPENAI_TIMEOUT_SECS", "30"),
      ("STATIC_DIR", "/srv/ui"),
      ("SESSION_IDLE_SECS", "120"),
    ]));
    assert_eq!(s.session_idle, Duration::from_secs(120));
    assert_eq!(s.addr.port(), 8088);
    assert_eq!(s.openai.api_key, "sk-test");
    assert_eq!(s.openai.model, "gpt-4o");
    assert_eq!(s.openai.timeout, Some(Duration::from_secs(30)));
    assert_eq!(s.static_dir, "/srv/ui");
  }

  #[test]
  fn bad_port_falls_back() {
    let s = Settings::from_lookup(lookup(&[("PORT", "http"), ("OPENAI_TIMEOUT_SECS", "0")]));
    assert_eq!(s.addr.port(), 3000);
    assert!(s.openai.timeout.is_none());
  }

  #[test]
  fn toml_overrides_only_named_prompts() {
    let cfg: AgentConfig = toml::from_str(
      r#"
        [prompts]
        validation_system = "Grade strictly."

        [temperatures]
        generation = 0.5
      "#,
    )
    .unwrap();
    assert_eq!(cfg.prompts.validation_system, "Grade strictly.");
    assert_eq!(cfg.prompts.challenge_system, Prompts::default().challenge_system);
    assert_eq!(cfg.temperatures.generation, 0.5);
    assert_eq!(cfg.temperatures.validation, 0.2);
  }

  #[test]
  fn missing_config_file_yields_none() {
    assert!(load_agent_config("/definitely/not/here.toml").is_none());
  }
}
