//! One learner session: the interaction state behind a lock, plus the tutor calls.
//!
//! Every operation follows the same shape: lock, begin, publish, unlock, await the
//! tutor, lock, complete, publish. The lock is never held across a remote call, so the
//! SQL and ORM validations of one session can be in flight at the same time.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::controller::{Applied, FetchTicket, InteractionState, StateView, ValidateTicket};
use crate::domain::{AnswerKind, Difficulty};
use crate::tutor::QueryTutor;

pub struct Session {
    pub id: Uuid,
    state: Mutex<InteractionState>,
    tutor: Arc<dyn QueryTutor>,
    updates: watch::Sender<StateView>,
    last_active: StdMutex<Instant>,
}

impl Session {
    pub fn new(id: Uuid, difficulty: Difficulty, tutor: Arc<dyn QueryTutor>) -> Self {
        let state = InteractionState::new(difficulty);
        let (updates, _) = watch::channel(state.view());
        Self { id, state: Mutex::new(state), tutor, updates, last_active: StdMutex::new(Instant::now()) }
    }

    pub async fn snapshot(&self) -> StateView {
        self.touch();
        self.state.lock().await.view()
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// True once nothing has used the session for `ttl` as of `now` and no socket is
    /// subscribed to its updates.
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        let last = *self.last_active.lock().unwrap_or_else(|e| e.into_inner());
        self.updates.receiver_count() == 0 && now.saturating_duration_since(last) >= ttl
    }

    /// Receives a fresh view after every state change.
    pub fn subscribe(&self) -> watch::Receiver<StateView> {
        self.updates.subscribe()
    }

    fn publish(&self, st: &InteractionState) -> StateView {
        let view = st.view();
        self.updates.send_replace(view.clone());
        view
    }

    /// Apply `f` under the lock and publish the result.
    async fn mutate<R>(&self, f: impl FnOnce(&mut InteractionState) -> R) -> (R, StateView) {
        self.touch();
        let mut st = self.state.lock().await;
        let out = f(&mut st);
        let view = self.publish(&st);
        (out, view)
    }

    /// Apply the synchronous half of `action`. Returns the outbound call still to be made, if any.
    /// Callers that need ordering (the WebSocket loop) await this in arrival order and may run
    /// `finish` concurrently.
    #[instrument(level = "info", skip(self, action), fields(session = %self.id, action = action.name()))]
    pub async fn begin(&self, action: Action) -> (Option<Pending>, StateView) {
        self.mutate(|st| match action {
            Action::SelectDifficulty(level) => {
                let t = st.select_difficulty(level);
                if t.is_none() {
                    debug!(target: "challenge", %level, "Difficulty unchanged");
                }
                t.map(Pending::Fetch)
            }
            Action::Fetch => Some(Pending::Fetch(st.retry())),
            Action::EditAnswer(kind, text) => {
                st.edit_answer(kind, text);
                None
            }
            Action::Validate(kind) => {
                let t = st.begin_validate(kind);
                if t.is_none() {
                    debug!(target: "challenge", kind = kind.label(), "Nothing to validate");
                }
                t.map(Pending::Validate)
            }
            Action::ToggleReveal(kind) => {
                st.toggle_reveal(kind);
                None
            }
            Action::Advance => {
                let t = st.advance();
                if t.is_none() {
                    debug!(target: "challenge", "Advance blocked: both answers need a verdict");
                }
                t.map(Pending::Fetch)
            }
        })
        .await
    }

    /// Make the remote call for a pending action and apply its response.
    pub async fn finish(&self, pending: Pending) -> StateView {
        match pending {
            Pending::Fetch(ticket) => {
                let result = self.tutor.generate_challenge(ticket.difficulty, &ticket.excluded_topics).await;
                let (applied, view) = self.mutate(|st| st.complete_fetch(&ticket, result)).await;
                info!(target: "challenge", session = %self.id, difficulty = %ticket.difficulty, ?applied, "Challenge fetch finished");
                view
            }
            Pending::Validate(ticket) => {
                let result = self.tutor.validate_answer(&ticket.challenge, &ticket.answer, ticket.kind).await;
                let (applied, view) = self.mutate(|st| st.complete_validate(&ticket, result)).await;
                if applied == Applied::Stored {
                    info!(target: "challenge", session = %self.id, kind = ticket.kind.label(), score = view.score, "Answer verdict stored");
                }
                view
            }
        }
    }

    /// `begin` then `finish`; returns the final state.
    pub async fn perform(&self, action: Action) -> StateView {
        match self.begin(action).await {
            (Some(pending), _) => self.finish(pending).await,
            (None, view) => view,
        }
    }

    pub async fn select_difficulty(&self, level: Difficulty) -> StateView {
        self.perform(Action::SelectDifficulty(level)).await
    }

    /// Load a challenge for the active difficulty (initial load and retry).
    pub async fn fetch(&self) -> StateView {
        self.perform(Action::Fetch).await
    }

    pub async fn edit_answer(&self, kind: AnswerKind, text: String) -> StateView {
        self.perform(Action::EditAnswer(kind, text)).await
    }

    pub async fn validate(&self, kind: AnswerKind) -> StateView {
        self.perform(Action::Validate(kind)).await
    }

    pub async fn toggle_reveal(&self, kind: AnswerKind) -> StateView {
        self.perform(Action::ToggleReveal(kind)).await
    }

    pub async fn advance(&self) -> StateView {
        self.perform(Action::Advance).await
    }
}

/// Everything a learner can do to a session.
#[derive(Debug)]
pub enum Action {
    SelectDifficulty(Difficulty),
    Fetch,
    EditAnswer(AnswerKind, String),
    Validate(AnswerKind),
    ToggleReveal(AnswerKind),
    Advance,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::SelectDifficulty(_) => "select_difficulty",
            Action::Fetch => "fetch",
            Action::EditAnswer(..) => "edit_answer",
            Action::Validate(_) => "validate",
            Action::ToggleReveal(_) => "toggle_reveal",
            Action::Advance => "advance",
        }
    }
}

/// An outbound tutor call that `begin` has committed to.
#[derive(Debug)]
pub enum Pending {
    Fetch(FetchTicket),
    Validate(ValidateTicket),
}
