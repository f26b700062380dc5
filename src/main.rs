//! QueryMaster · SQL + Django ORM practice backend
//!
//! - Axum HTTP + WebSocket API, one in-memory session per learner
//! - Challenge generation and answer grading via an OpenAI-compatible API
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   OPENAI_API_KEY      : credential passed to the model API (empty if unset)
//!   OPENAI_BASE_URL     : default "https://api.openai.com/v1"
//!   OPENAI_MODEL        : default "gpt-4o-mini"
//!   OPENAI_TIMEOUT_SECS : optional request timeout
//!   STATIC_DIR          : default "./static"
//!   SESSION_IDLE_SECS   : drop sessions idle this long with no socket (default 1800)
//!   AGENT_CONFIG_PATH   : path to TOML config (prompt + temperature overrides)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod tutor;
mod openai;
mod controller;
mod session;
mod state;
mod protocol;
mod errors;
mod routes;

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Settings;
use crate::openai::OpenAI;
use crate::routes::build_router;
use crate::state::{spawn_session_sweeper, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let settings = Settings::from_env();
  if settings.openai.api_key.is_empty() {
    warn!(target: "querymaster", "OPENAI_API_KEY is not set; model calls will be rejected");
  }

  let openai = OpenAI::new(&settings.openai, settings.agent.prompts.clone(), settings.agent.temperatures.clone())?;
  info!(target: "querymaster", base_url = %openai.base_url, model = %openai.model, "Model client ready");

  let state = Arc::new(AppState::new(Arc::new(openai)));
  spawn_session_sweeper(state.clone(), settings.session_idle);
  let app = build_router(state, &settings.static_dir);

  let listener = TcpListener::bind(settings.addr).await?;
  info!(target: "querymaster", addr = %settings.addr, static_dir = %settings.static_dir, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "querymaster", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "querymaster", error = %e, "Failed to listen for Ctrl+C");
    std::future::pending::<()>().await;
  }
  info!(target: "querymaster", "Shutdown signal received");
}
