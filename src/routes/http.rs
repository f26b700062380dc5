//! HTTP endpoint handlers. These are thin wrappers that forward to the session.
//! Each handler awaits the whole operation (including any model call) and returns
//! the resulting state snapshot.

use std::sync::Arc;
use axum::{extract::{Path, State}, http::StatusCode, Json, response::IntoResponse};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::controller::StateView;
use crate::domain::AnswerKind;
use crate::errors::ApiError;
use crate::protocol::*;
use crate::session::Session;
use crate::state::AppState;

async fn find_session(state: &AppState, id: Uuid) -> Result<Arc<Session>, ApiError> {
  state.get_session(&id).await.ok_or_else(|| ApiError::unknown_session(id))
}

fn parse_kind(raw: &str) -> Result<AnswerKind, ApiError> {
  raw.parse::<AnswerKind>().map_err(ApiError::BadRequest)
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

/// New session; loads its first challenge before answering.
#[instrument(level = "info", skip(state))]
pub async fn http_create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let session = state.create_session().await;
  let view = session.fetch().await;
  info!(target: "challenge", session = %session.id, loaded = view.challenge.is_some(), "HTTP session started");
  (StatusCode::CREATED, Json(SessionOut { session_id: session.id, state: view }))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<StateView>, ApiError> {
  let session = find_session(&state, id).await?;
  Ok(Json(session.snapshot().await))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_delete_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  if state.remove_session(&id).await {
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::unknown_session(id))
  }
}

#[instrument(level = "info", skip(state, body), fields(%id, difficulty = %body.difficulty))]
pub async fn http_put_difficulty(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
  Json(body): Json<DifficultyIn>,
) -> Result<Json<StateView>, ApiError> {
  let session = find_session(&state, id).await?;
  Ok(Json(session.select_difficulty(body.difficulty).await))
}

#[instrument(level = "info", skip(state, body), fields(%id, %kind, text_len = body.text.len()))]
pub async fn http_put_answer(
  State(state): State<Arc<AppState>>,
  Path((id, kind)): Path<(Uuid, String)>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<StateView>, ApiError> {
  let kind = parse_kind(&kind)?;
  let session = find_session(&state, id).await?;
  Ok(Json(session.edit_answer(kind, body.text).await))
}

#[instrument(level = "info", skip(state), fields(%id, %kind))]
pub async fn http_post_validate(
  State(state): State<Arc<AppState>>,
  Path((id, kind)): Path<(Uuid, String)>,
) -> Result<Json<StateView>, ApiError> {
  let kind = parse_kind(&kind)?;
  let session = find_session(&state, id).await?;
  let view = session.validate(kind).await;
  info!(target: "challenge", session = %id, kind = kind.label(), score = view.score, "HTTP validate finished");
  Ok(Json(view))
}

#[instrument(level = "info", skip(state), fields(%id, %kind))]
pub async fn http_post_reveal(
  State(state): State<Arc<AppState>>,
  Path((id, kind)): Path<(Uuid, String)>,
) -> Result<Json<StateView>, ApiError> {
  let kind = parse_kind(&kind)?;
  let session = find_session(&state, id).await?;
  Ok(Json(session.toggle_reveal(kind).await))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_post_next(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<StateView>, ApiError> {
  let session = find_session(&state, id).await?;
  Ok(Json(session.advance().await))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_post_retry(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<StateView>, ApiError> {
  let session = find_session(&state, id).await?;
  Ok(Json(session.fetch().await))
}
