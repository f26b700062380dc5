//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::controller::StateView;
use crate::domain::{AnswerKind, Difficulty};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    SelectDifficulty {
        difficulty: Difficulty,
    },
    EditAnswer {
        kind: AnswerKind,
        text: String,
    },
    Validate {
        kind: AnswerKind,
    },
    ToggleReveal {
        kind: AnswerKind,
    },
    Next,
    Retry,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Session {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
    State {
        state: StateView,
    },
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub session: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct SessionOut {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    pub state: StateView,
}

#[derive(Debug, Deserialize)]
pub struct DifficultyIn {
    pub difficulty: Difficulty,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    pub text: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
