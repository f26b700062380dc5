//! Interaction state for one learner: the current challenge, the SQL and ORM answer
//! slots, the score and the topic history.
//!
//! Every transition is synchronous. Operations that need the remote tutor are split in
//! two: `begin_*` mutates the state and returns a ticket describing the outbound call,
//! `complete_*` applies the response. Tickets carry a token; a response whose token no
//! longer matches (the learner edited the answer, changed difficulty or moved on in the
//! meantime) is discarded instead of overwriting newer state.

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{AnswerKind, Challenge, Difficulty, Feedback, PerKind};
use crate::tutor::TutorError;

pub const FETCH_FAILED_MESSAGE: &str = "Failed to load challenge. Please check your API key or connection.";

pub fn validation_failed_message(kind: AnswerKind) -> String {
    format!("Validation for {} failed.", kind.label())
}

/// Per-kind state: the answer buffer and everything derived from submitting it.
#[derive(Clone, Debug, Default)]
pub struct KindSlot {
    pub answer: String,
    pub feedback: Option<Feedback>,
    pub in_flight: bool,
    pub revealed: bool,
    /// Points already granted for this kind on the current challenge.
    pub awarded: bool,
    token: u64,
}

#[derive(Clone, Debug)]
pub struct FetchTicket {
    pub token: u64,
    pub difficulty: Difficulty,
    pub excluded_topics: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ValidateTicket {
    pub kind: AnswerKind,
    pub token: u64,
    pub difficulty: Difficulty,
    pub challenge: Challenge,
    pub answer: String,
}

/// Outcome of applying a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Stored,
    Failed,
    Stale,
}

#[derive(Clone, Debug, Default)]
pub struct InteractionState {
    difficulty: Difficulty,
    challenge: Option<Challenge>,
    slots: PerKind<KindSlot>,
    loading: bool,
    error: Option<String>,
    score: u32,
    topics: Vec<String>,
    fetch_token: u64,
}

impl InteractionState {
    pub fn new(difficulty: Difficulty) -> Self {
        Self { difficulty, ..Self::default() }
    }

    #[allow(dead_code)]
    pub fn difficulty(&self) -> Difficulty { self.difficulty }
    #[allow(dead_code)]
    pub fn challenge(&self) -> Option<&Challenge> { self.challenge.as_ref() }
    #[allow(dead_code)]
    pub fn slot(&self, kind: AnswerKind) -> &KindSlot { &self.slots[kind] }
    #[allow(dead_code)]
    pub fn is_loading(&self) -> bool { self.loading }
    #[allow(dead_code)]
    pub fn error(&self) -> Option<&str> { self.error.as_deref() }
    #[allow(dead_code)]
    pub fn score(&self) -> u32 { self.score }
    #[allow(dead_code)]
    pub fn topics(&self) -> &[String] { &self.topics }

    /// Switch level. Selecting the active level does nothing.
    pub fn select_difficulty(&mut self, level: Difficulty) -> Option<FetchTicket> {
        if level == self.difficulty {
            return None;
        }
        self.difficulty = level;
        Some(self.begin_fetch())
    }

    /// Reset every per-challenge field and start loading a new challenge.
    /// The current challenge stays visible until the response lands.
    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.loading = true;
        self.error = None;
        for (_, slot) in self.slots.iter_mut() {
            let token = slot.token + 1;
            *slot = KindSlot { token, ..KindSlot::default() };
        }
        self.fetch_token += 1;
        FetchTicket {
            token: self.fetch_token,
            difficulty: self.difficulty,
            excluded_topics: self.topics.clone(),
        }
    }

    /// Explicit retry after a failed load; same request as any other fetch.
    pub fn retry(&mut self) -> FetchTicket {
        self.begin_fetch()
    }

    pub fn complete_fetch(&mut self, ticket: &FetchTicket, result: Result<Challenge, TutorError>) -> Applied {
        if ticket.token != self.fetch_token {
            debug!(target: "challenge", token = ticket.token, current = self.fetch_token, "Discarding stale challenge response");
            return Applied::Stale;
        }
        self.loading = false;
        match result {
            Ok(challenge) => {
                self.challenge = Some(challenge);
                Applied::Stored
            }
            Err(e) => {
                warn!(target: "challenge", difficulty = %ticket.difficulty, error = %e, "Challenge generation failed");
                self.error = Some(FETCH_FAILED_MESSAGE.to_string());
                Applied::Failed
            }
        }
    }

    /// Overwrite an answer buffer. Any verdict for the previous text no longer applies,
    /// including one still on its way.
    pub fn edit_answer(&mut self, kind: AnswerKind, text: impl Into<String>) {
        let slot = &mut self.slots[kind];
        slot.answer = text.into();
        slot.feedback = None;
        slot.revealed = false;
        slot.in_flight = false;
        slot.token += 1;
    }

    /// Start grading `kind`. Nothing to do without a challenge, while a new challenge is
    /// loading, with an empty buffer, while a request for this kind is outstanding, or once
    /// it is verified.
    pub fn begin_validate(&mut self, kind: AnswerKind) -> Option<ValidateTicket> {
        if self.loading {
            return None;
        }
        let challenge = self.challenge.clone()?;
        let difficulty = self.difficulty;
        let slot = &mut self.slots[kind];
        if slot.answer.is_empty() || slot.in_flight {
            return None;
        }
        if slot.feedback.as_ref().is_some_and(|f| f.is_correct) {
            return None;
        }
        slot.in_flight = true;
        slot.token += 1;
        Some(ValidateTicket {
            kind,
            token: slot.token,
            difficulty,
            challenge,
            answer: slot.answer.clone(),
        })
    }

    pub fn complete_validate(&mut self, ticket: &ValidateTicket, result: Result<Feedback, TutorError>) -> Applied {
        let slot = &mut self.slots[ticket.kind];
        if ticket.token != slot.token {
            debug!(target: "challenge", kind = ticket.kind.label(), token = ticket.token, current = slot.token, "Discarding stale verdict");
            return Applied::Stale;
        }
        slot.in_flight = false;
        match result {
            Ok(feedback) => {
                if feedback.is_correct && !slot.awarded {
                    slot.awarded = true;
                    self.score += ticket.difficulty.points();
                }
                slot.feedback = Some(feedback);
                Applied::Stored
            }
            Err(e) => {
                warn!(target: "challenge", kind = ticket.kind.label(), error = %e, "Answer validation failed");
                self.error = Some(validation_failed_message(ticket.kind));
                Applied::Failed
            }
        }
    }

    pub fn toggle_reveal(&mut self, kind: AnswerKind) {
        let slot = &mut self.slots[kind];
        slot.revealed = !slot.revealed;
    }

    pub fn can_advance(&self) -> bool {
        self.slots.iter().all(|(_, s)| s.feedback.is_some())
    }

    /// Move past the current challenge: remember its topic so the next one avoids it.
    pub fn advance(&mut self) -> Option<FetchTicket> {
        if !self.can_advance() {
            return None;
        }
        if let Some(c) = &self.challenge {
            self.topics.push(c.topic.clone());
        }
        Some(self.begin_fetch())
    }

    pub fn view(&self) -> StateView {
        let slots = self.slots.map(|_, s| {
            let correct = s.feedback.as_ref().map(|f| f.is_correct);
            KindView {
                answer: s.answer.clone(),
                feedback: s.feedback.clone(),
                validating: s.in_flight,
                revealed: s.revealed,
                can_submit: self.challenge.is_some() && !self.loading && !s.answer.is_empty() && !s.in_flight && correct != Some(true),
                can_reveal: correct == Some(false),
                show_solution: s.revealed
                    && correct == Some(false)
                    && s.feedback.as_ref().is_some_and(|f| f.correct_version.is_some()),
                show_tip: correct == Some(true) && s.feedback.as_ref().is_some_and(|f| f.improvement.is_some()),
                status: match correct {
                    None => KindStatus::Pending,
                    Some(true) => KindStatus::Verified,
                    Some(false) => KindStatus::ReviewRequired,
                },
            }
        });
        StateView {
            difficulty: self.difficulty,
            challenge: self.challenge.clone(),
            sql_placeholder: format!(
                "SELECT ... FROM {} ...",
                self.challenge.as_ref().map(|c| c.table_name.as_str()).unwrap_or("table_name")
            ),
            answers: slots,
            loading: self.loading,
            error: self.error.clone(),
            score: self.score,
            topics: self.topics.clone(),
            can_advance: self.can_advance() && !self.loading,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KindStatus {
    Pending,
    Verified,
    ReviewRequired,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindView {
    pub answer: String,
    pub feedback: Option<Feedback>,
    pub validating: bool,
    pub revealed: bool,
    pub can_submit: bool,
    pub can_reveal: bool,
    pub show_solution: bool,
    pub show_tip: bool,
    pub status: KindStatus,
}

/// Everything the UI renders, as one snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub difficulty: Difficulty,
    pub challenge: Option<Challenge>,
    pub sql_placeholder: String,
    pub answers: PerKind<KindView>,
    pub loading: bool,
    pub error: Option<String>,
    pub score: u32,
    pub topics: Vec<String>,
    pub can_advance: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tutor::fake::{challenge, verdict};

    fn failure() -> TutorError {
        TutorError::EmptyResponse
    }

    fn loaded(difficulty: Difficulty, topic: &str) -> InteractionState {
        let mut st = InteractionState::new(difficulty);
        let t = st.begin_fetch();
        assert_eq!(st.complete_fetch(&t, Ok(challenge(topic))), Applied::Stored);
        st
    }

    fn submit(st: &mut InteractionState, kind: AnswerKind, text: &str, correct: bool) -> Applied {
        st.edit_answer(kind, text);
        let t = st.begin_validate(kind).expect("validation should start");
        st.complete_validate(&t, Ok(verdict(correct)))
    }

    #[test]
    fn selecting_active_difficulty_is_a_noop() {
        let mut st = loaded(Difficulty::Beginner, "filtering");
        st.edit_answer(AnswerKind::Sql, "SELECT 1");
        assert!(st.select_difficulty(Difficulty::Beginner).is_none());
        assert!(!st.is_loading());
        assert_eq!(st.slot(AnswerKind::Sql).answer, "SELECT 1");
    }

    #[test]
    fn selecting_new_difficulty_resets_and_fetches() {
        let mut st = loaded(Difficulty::Beginner, "filtering");
        submit(&mut st, AnswerKind::Sql, "SELECT 1", false);
        let ticket = st.select_difficulty(Difficulty::Advanced).expect("refetch");
        assert_eq!(ticket.difficulty, Difficulty::Advanced);
        assert!(st.is_loading());
        for kind in AnswerKind::ALL {
            let s = st.slot(kind);
            assert!(s.answer.is_empty() && s.feedback.is_none() && !s.revealed && !s.in_flight);
        }
    }

    #[test]
    fn edit_clears_feedback_and_reveal_for_that_kind_only() {
        let mut st = loaded(Difficulty::Beginner, "filtering");
        submit(&mut st, AnswerKind::Sql, "SELECT *", false);
        submit(&mut st, AnswerKind::Orm, "Author.objects.all()", false);
        st.toggle_reveal(AnswerKind::Sql);
        st.toggle_reveal(AnswerKind::Orm);

        st.edit_answer(AnswerKind::Sql, "SELECT name");
        let sql = st.slot(AnswerKind::Sql);
        assert_eq!(sql.answer, "SELECT name");
        assert!(sql.feedback.is_none());
        assert!(!sql.revealed);
        let orm = st.slot(AnswerKind::Orm);
        assert!(orm.feedback.is_some());
        assert!(orm.revealed);
    }

    #[test]
    fn validate_without_challenge_or_text_issues_nothing() {
        let mut st = InteractionState::new(Difficulty::Beginner);
        st.edit_answer(AnswerKind::Sql, "SELECT 1");
        assert!(st.begin_validate(AnswerKind::Sql).is_none());

        let mut st = loaded(Difficulty::Beginner, "filtering");
        assert!(st.begin_validate(AnswerKind::Sql).is_none());
        assert!(!st.slot(AnswerKind::Sql).in_flight);
    }

    #[test]
    fn validate_marks_in_flight_and_carries_the_answer() {
        let mut st = loaded(Difficulty::Intermediate, "joins");
        st.edit_answer(AnswerKind::Orm, "Author.objects.count()");
        let t = st.begin_validate(AnswerKind::Orm).unwrap();
        assert_eq!(t.answer, "Author.objects.count()");
        assert_eq!(t.challenge.topic, "joins");
        assert!(st.slot(AnswerKind::Orm).in_flight);
        assert!(!st.slot(AnswerKind::Sql).in_flight);
        assert!(st.begin_validate(AnswerKind::Orm).is_none(), "one request per kind at a time");
    }

    #[test]
    fn correct_verdict_awards_points_by_difficulty() {
        for (difficulty, expected) in [(Difficulty::Beginner, 5), (Difficulty::Intermediate, 10), (Difficulty::Advanced, 20)] {
            let mut st = loaded(difficulty, "t");
            submit(&mut st, AnswerKind::Sql, "SELECT 1", true);
            assert_eq!(st.score(), expected);
        }
    }

    #[test]
    fn incorrect_verdict_awards_nothing() {
        let mut st = loaded(Difficulty::Advanced, "t");
        submit(&mut st, AnswerKind::Sql, "SELECT 1", false);
        assert_eq!(st.score(), 0);
    }

    #[test]
    fn stored_verdict_is_awarded_once() {
        let mut st = loaded(Difficulty::Beginner, "t");
        submit(&mut st, AnswerKind::Sql, "SELECT 1", true);
        let _ = st.view();
        let _ = st.view();
        assert!(st.begin_validate(AnswerKind::Sql).is_none(), "verified kind cannot be resubmitted");
        // Editing and verifying again on the same challenge does not pay twice.
        submit(&mut st, AnswerKind::Sql, "SELECT 1;", true);
        assert_eq!(st.score(), 5);
    }

    #[test]
    fn beginner_round_trip_then_advance() {
        let mut st = loaded(Difficulty::Beginner, "filtering");
        submit(&mut st, AnswerKind::Sql, "SELECT * FROM app_author", true);
        assert_eq!(st.score(), 5);
        assert!(st.advance().is_none(), "ORM not validated yet");
        submit(&mut st, AnswerKind::Orm, "Author.objects.all()", true);
        assert_eq!(st.score(), 10);

        let ticket = st.advance().expect("both kinds validated");
        assert_eq!(st.topics(), &["filtering".to_string()]);
        assert_eq!(ticket.excluded_topics, vec!["filtering".to_string()]);
        assert!(st.is_loading());
        assert_eq!(st.score(), 10);
    }

    #[test]
    fn advance_requires_both_verdicts_not_both_correct() {
        let mut st = loaded(Difficulty::Beginner, "filtering");
        submit(&mut st, AnswerKind::Sql, "x", false);
        assert!(!st.can_advance());
        submit(&mut st, AnswerKind::Orm, "y", false);
        assert!(st.can_advance());
        assert!(st.advance().is_some());
    }

    #[test]
    fn toggle_reveal_touches_only_its_flag() {
        let mut st = loaded(Difficulty::Beginner, "t");
        submit(&mut st, AnswerKind::Sql, "x", false);
        submit(&mut st, AnswerKind::Orm, "y", true);
        let before = st.view();
        st.toggle_reveal(AnswerKind::Sql);
        let after = st.view();
        assert!(after.answers.sql.revealed);
        assert!(after.answers.sql.show_solution);
        assert_eq!(after.answers.sql.feedback, before.answers.sql.feedback);
        assert_eq!(after.answers.orm, before.answers.orm);
        assert_eq!(after.score, before.score);
        st.toggle_reveal(AnswerKind::Sql);
        assert!(!st.slot(AnswerKind::Sql).revealed);
    }

    #[test]
    fn failed_first_load_keeps_slot_empty_and_retry_refetches() {
        let mut st = InteractionState::new(Difficulty::Beginner);
        let t = st.begin_fetch();
        assert_eq!(st.complete_fetch(&t, Err(failure())), Applied::Failed);
        assert!(!st.is_loading());
        assert!(st.challenge().is_none());
        assert_eq!(st.error(), Some(FETCH_FAILED_MESSAGE));

        let retry = st.retry();
        assert_eq!(retry.difficulty, Difficulty::Beginner);
        assert!(st.is_loading());
        assert!(st.error().is_none());
        st.complete_fetch(&retry, Ok(challenge("aggregates")));
        assert_eq!(st.challenge().map(|c| c.topic.as_str()), Some("aggregates"));
    }

    #[test]
    fn failed_refetch_keeps_previous_challenge() {
        let mut st = loaded(Difficulty::Beginner, "filtering");
        let t = st.retry();
        st.complete_fetch(&t, Err(failure()));
        assert_eq!(st.challenge().map(|c| c.topic.as_str()), Some("filtering"));
    }

    #[test]
    fn validation_failure_names_the_kind_and_allows_resubmit() {
        let mut st = loaded(Difficulty::Beginner, "t");
        st.edit_answer(AnswerKind::Orm, "Author.objects");
        let t = st.begin_validate(AnswerKind::Orm).unwrap();
        assert_eq!(st.complete_validate(&t, Err(failure())), Applied::Failed);
        assert_eq!(st.error(), Some("Validation for ORM failed."));
        assert!(!st.slot(AnswerKind::Orm).in_flight);
        assert!(st.begin_validate(AnswerKind::Orm).is_some());
    }

    #[test]
    fn verdict_for_edited_answer_is_discarded() {
        let mut st = loaded(Difficulty::Beginner, "t");
        st.edit_answer(AnswerKind::Sql, "SELECT 1");
        let t = st.begin_validate(AnswerKind::Sql).unwrap();
        st.edit_answer(AnswerKind::Sql, "SELECT 2");
        assert_eq!(st.complete_validate(&t, Ok(verdict(true))), Applied::Stale);
        assert!(st.slot(AnswerKind::Sql).feedback.is_none());
        assert_eq!(st.score(), 0);
    }

    #[test]
    fn verdict_from_previous_challenge_is_discarded() {
        let mut st = loaded(Difficulty::Beginner, "t");
        st.edit_answer(AnswerKind::Sql, "SELECT 1");
        let t = st.begin_validate(AnswerKind::Sql).unwrap();
        let fetch = st.select_difficulty(Difficulty::Advanced).unwrap();
        st.complete_fetch(&fetch, Ok(challenge("windows")));
        assert_eq!(st.complete_validate(&t, Ok(verdict(true))), Applied::Stale);
        assert_eq!(st.score(), 0);
        assert!(st.slot(AnswerKind::Sql).feedback.is_none());
    }

    #[test]
    fn answer_typed_during_a_load_is_not_graded_against_the_old_challenge() {
        let mut st = loaded(Difficulty::Beginner, "old");
        let fetch = st.select_difficulty(Difficulty::Advanced).unwrap();
        st.edit_answer(AnswerKind::Sql, "SELECT * FROM app_author");
        assert!(!st.view().answers.sql.can_submit);
        assert!(st.begin_validate(AnswerKind::Sql).is_none());

        assert_eq!(st.complete_fetch(&fetch, Ok(challenge("new"))), Applied::Stored);
        let v = st.view();
        assert!(v.answers.sql.can_submit);
        assert_eq!(v.answers.sql.answer, "SELECT * FROM app_author");
        let t = st.begin_validate(AnswerKind::Sql).expect("validation should start once loaded");
        assert_eq!(t.challenge.topic, "new");
        assert_eq!(st.complete_validate(&t, Ok(verdict(true))), Applied::Stored);
        assert_eq!(st.score(), 20);
    }

    #[test]
    fn superseded_fetch_response_is_discarded() {
        let mut st = InteractionState::new(Difficulty::Beginner);
        let first = st.begin_fetch();
        let second = st.select_difficulty(Difficulty::Intermediate).unwrap();
        assert_eq!(st.complete_fetch(&second, Ok(challenge("joins"))), Applied::Stored);
        assert_eq!(st.complete_fetch(&first, Ok(challenge("filtering"))), Applied::Stale);
        assert_eq!(st.challenge().map(|c| c.topic.as_str()), Some("joins"));
    }

    #[test]
    fn view_derives_placeholder_and_flags() {
        let st = InteractionState::new(Difficulty::Beginner);
        let v = st.view();
        assert_eq!(v.sql_placeholder, "SELECT ... FROM table_name ...");
        assert!(!v.can_advance);
        assert!(!v.answers.sql.can_submit);

        let mut st = loaded(Difficulty::Beginner, "t");
        st.edit_answer(AnswerKind::Sql, "SELECT 1");
        let v = st.view();
        assert_eq!(v.sql_placeholder, "SELECT ... FROM app_author ...");
        assert!(v.answers.sql.can_submit);
        assert!(!v.answers.orm.can_submit);
        assert_eq!(v.answers.sql.status, KindStatus::Pending);

        submit(&mut st, AnswerKind::Sql, "SELECT 1", true);
        let v = st.view();
        assert_eq!(v.answers.sql.status, KindStatus::Verified);
        assert!(v.answers.sql.show_tip);
        assert!(!v.answers.sql.can_reveal);
        assert!(!v.answers.sql.can_submit);
    }
}
