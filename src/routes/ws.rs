//! WebSocket upgrade + message loop.
//!
//! The socket is bound to one session. Every state change of that session is pushed as a
//! `state` message. Client actions are applied in arrival order; the model calls they
//! trigger run as separate tasks, so SQL and ORM grading can overlap.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    Query, State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, error, instrument, debug};

use crate::errors::ApiError;
use crate::protocol::{ClientWsMessage, ServerWsMessage, WsQuery};
use crate::session::{Action, Session};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
  Query(q): Query<WsQuery>,
) -> Result<impl IntoResponse, ApiError> {
  let session = match q.session {
    Some(id) => state.get_session(&id).await.ok_or_else(|| ApiError::unknown_session(id))?,
    None => {
      let session = state.create_session().await;
      let first = session.clone();
      tokio::spawn(async move { first.fetch().await; });
      session
    }
  };
  info!(target: "querymaster", session = %session.id, "WebSocket upgrade requested");
  Ok(ws.on_upgrade(move |socket| handle_ws(socket, session)))
}

#[instrument(level = "info", skip(socket, session), fields(session = %session.id))]
async fn handle_ws(socket: WebSocket, session: Arc<Session>) {
  info!(target: "querymaster", "WebSocket connected");
  let (mut sink, mut stream) = socket.split();
  let (tx, mut rx) = mpsc::unbounded_channel::<ServerWsMessage>();

  // Current state first, then every change.
  let mut updates = session.subscribe();
  let _ = tx.send(ServerWsMessage::Session { session_id: session.id });
  let _ = tx.send(ServerWsMessage::State { state: updates.borrow_and_update().clone() });
  let forward = tokio::spawn({
    let tx = tx.clone();
    async move {
      while updates.changed().await.is_ok() {
        let state = updates.borrow_and_update().clone();
        if tx.send(ServerWsMessage::State { state }).is_err() { break; }
      }
    }
  });

  let writer = tokio::spawn(async move {
    while let Some(msg) = rx.recv().await {
      let out = serde_json::to_string(&msg).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
      });
      if let Err(e) = sink.send(Message::Text(out)).await {
        error!(target: "querymaster", error = %e, "WS send error");
        break;
      }
    }
  });

  while let Some(Ok(msg)) = stream.next().await {
    match msg {
      Message::Text(txt) => match serde_json::from_str::<ClientWsMessage>(&txt) {
        Ok(incoming) => {
          debug!(target: "querymaster", "WS received: {:?}", &incoming);
          if let Some(reply) = handle_client_ws(incoming, &session).await {
            let _ = tx.send(reply);
          }
        }
        Err(e) => { let _ = tx.send(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }); }
      },
      Message::Close(_) => break,
      // Pings are answered by the protocol layer.
      _ => {}
    }
  }

  forward.abort();
  drop(tx);
  let _ = writer.await;
  info!(target: "querymaster", "WebSocket disconnected");
}

fn to_action(msg: ClientWsMessage) -> Option<Action> {
  match msg {
    ClientWsMessage::Ping => None,
    ClientWsMessage::SelectDifficulty { difficulty } => Some(Action::SelectDifficulty(difficulty)),
    ClientWsMessage::EditAnswer { kind, text } => Some(Action::EditAnswer(kind, text)),
    ClientWsMessage::Validate { kind } => Some(Action::Validate(kind)),
    ClientWsMessage::ToggleReveal { kind } => Some(Action::ToggleReveal(kind)),
    ClientWsMessage::Next => Some(Action::Advance),
    ClientWsMessage::Retry => Some(Action::Fetch),
  }
}

/// Apply one client message. State changes reach the client through the update stream;
/// only direct replies are returned here.
async fn handle_client_ws(msg: ClientWsMessage, session: &Arc<Session>) -> Option<ServerWsMessage> {
  let action = match to_action(msg) {
    Some(a) => a,
    None => return Some(ServerWsMessage::Pong),
  };
  let (pending, _) = session.begin(action).await;
  if let Some(pending) = pending {
    let session = session.clone();
    tokio::spawn(async move { session.finish(pending).await; });
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::AnswerKind;
  use crate::tutor::fake::FakeTutor;

  #[tokio::test]
  async fn ping_gets_pong_and_actions_reply_through_updates() {
    let session = Arc::new(Session::new(uuid::Uuid::new_v4(), Default::default(), Arc::new(FakeTutor::new())));
    assert!(matches!(handle_client_ws(ClientWsMessage::Ping, &session).await, Some(ServerWsMessage::Pong)));

    let mut rx = session.subscribe();
    let reply = handle_client_ws(ClientWsMessage::Retry, &session).await;
    assert!(reply.is_none());
    let view = rx.wait_for(|v| v.challenge.is_some()).await.unwrap().clone();
    assert!(!view.loading);

    handle_client_ws(ClientWsMessage::EditAnswer { kind: AnswerKind::Sql, text: "SELECT 1".into() }, &session).await;
    handle_client_ws(ClientWsMessage::Validate { kind: AnswerKind::Sql }, &session).await;
    let view = rx.wait_for(|v| v.answers.sql.feedback.is_some()).await.unwrap().clone();
    assert_eq!(view.score, 5);
  }

  #[test]
  fn next_and_retry_map_to_controller_actions() {
    assert!(matches!(to_action(ClientWsMessage::Next), Some(Action::Advance)));
    assert!(matches!(to_action(ClientWsMessage::Retry), Some(Action::Fetch)));
    assert!(to_action(ClientWsMessage::Ping).is_none());
  }
}
