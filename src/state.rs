//! Application state: the tutor client and the in-memory session registry.
//!
//! Sessions live only as long as the process; nothing is persisted. Idle sessions without a
//! connected socket are swept out, see `spawn_session_sweeper`.

use std::{collections::HashMap, sync::Arc, time::{Duration, Instant}};

use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::Difficulty;
use crate::session::Session;
use crate::tutor::QueryTutor;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<Uuid, Arc<Session>>>>,
    pub tutor: Arc<dyn QueryTutor>,
}

impl AppState {
    pub fn new(tutor: Arc<dyn QueryTutor>) -> Self {
        Self { sessions: Arc::new(RwLock::new(HashMap::new())), tutor }
    }

    /// Register a fresh session at the default difficulty. The caller starts the first fetch.
    #[instrument(level = "info", skip(self))]
    pub async fn create_session(&self) -> Arc<Session> {
        let id = Uuid::new_v4();
        let session = Arc::new(Session::new(id, Difficulty::default(), self.tutor.clone()));
        let active = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id, session.clone());
            sessions.len()
        };
        info!(target: "querymaster", session = %id, active, "Session created");
        session
    }

    pub async fn get_session(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    #[instrument(level = "info", skip(self), fields(session = %id))]
    pub async fn remove_session(&self, id: &Uuid) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!(target: "querymaster", session = %id, "Session removed");
        }
        removed
    }

    /// Drop every session that has been idle for `ttl` as of `now` and has no subscriber.
    /// Returns how many were removed.
    pub async fn sweep_expired(&self, ttl: Duration, now: Instant) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(ttl, now));
        let removed = before - sessions.len();
        if removed > 0 {
            info!(target: "querymaster", removed, active = sessions.len(), "Expired idle sessions");
        }
        removed
    }
}

/// Periodically expire sessions idle for longer than `ttl`.
pub fn spawn_session_sweeper(state: Arc<AppState>, ttl: Duration) -> JoinHandle<()> {
    let period = (ttl / 4).max(Duration::from_secs(1));
    debug!(target: "querymaster", ttl_secs = ttl.as_secs(), period_secs = period.as_secs(), "Session sweeper started");
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(period);
        loop {
            ticks.tick().await;
            state.sweep_expired(ttl, Instant::now()).await;
        }
    })
}
