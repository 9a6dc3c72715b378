use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::sync::{CrudFacade, FilterSet, RemoteQuery, Selection};

use super::session_lifecycle::{plan_action, ActorRole, SessionAction, TransitionContext};
use super::session_model::{Session, SESSIONS_COLLECTION};

/// Workflow operations that move a session through its lifecycle.
///
/// Each call reads the authoritative session, validates the transition and
/// issues one update. Open views pick the change up from the feed.
#[async_trait]
pub trait SessionServiceTrait: Send + Sync {
    /// Teacher opens the lesson builder (`scheduled -> building`).
    async fn open_lesson_builder(&self, session_id: &str) -> Result<Session>;

    /// Saves lesson content and marks the session ready (`building -> ready`).
    async fn save_lesson(&self, session_id: &str, content: Map<String, Value>)
        -> Result<Session>;

    /// Starts a ready session on its date, or resumes one in progress.
    async fn start_session(&self, session_id: &str, today: NaiveDate) -> Result<Session>;

    /// Saves attendance and completes the session (`in_progress -> completed`).
    async fn record_attendance(
        &self,
        session_id: &str,
        attendance: Map<String, Value>,
    ) -> Result<Session>;

    /// Administrative cancel from any non-terminal status.
    async fn cancel_session(&self, session_id: &str, role: ActorRole) -> Result<Session>;
}

pub struct SessionService {
    query: Arc<dyn RemoteQuery<Session>>,
    writer: CrudFacade<Session>,
    clock: Arc<dyn Fn() -> NaiveDate + Send + Sync>,
}

impl SessionService {
    pub fn new(query: Arc<dyn RemoteQuery<Session>>, writer: CrudFacade<Session>) -> Self {
        Self {
            query,
            writer,
            clock: Arc::new(|| chrono::Local::now().date_naive()),
        }
    }

    /// Replaces the clock used for "today" in guards that are not given a date.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    async fn load(&self, session_id: &str) -> Result<Session> {
        let filter = FilterSet::new().eq("id", session_id);
        let mut rows = self
            .query
            .fetch(SESSIONS_COLLECTION, &filter, &Selection::All)
            .await
            .map_err(|failure| Error::fetch(SESSIONS_COLLECTION, failure))?;
        match rows.pop() {
            Some(session) => Ok(session),
            None => Err(Error::not_found(SESSIONS_COLLECTION, session_id)),
        }
    }

    async fn perform(
        &self,
        session_id: &str,
        action: SessionAction,
        ctx: TransitionContext,
    ) -> Result<Session> {
        let session = self.load(session_id).await?;
        let action_name = action.name();
        let patch = match plan_action(&session, action, &ctx) {
            Ok(patch) => patch,
            Err(err) => {
                warn!(
                    "[Sessions] rejected action on {} (status {}): {}",
                    session_id, session.status, err
                );
                return Err(err.into());
            }
        };

        let Some(patch) = patch else {
            debug!(
                "[Sessions] {} needs no write for {}",
                action_name, session_id
            );
            return Ok(session);
        };

        let updated = self.writer.update(session_id, patch).await?;
        info!(
            "[Sessions] {} moved {} -> {}",
            session_id, session.status, updated.status
        );
        Ok(updated)
    }

    fn today(&self) -> NaiveDate {
        (self.clock)()
    }
}

#[async_trait]
impl SessionServiceTrait for SessionService {
    async fn open_lesson_builder(&self, session_id: &str) -> Result<Session> {
        let ctx = TransitionContext::new(self.today(), ActorRole::Teacher);
        self.perform(session_id, SessionAction::OpenBuilder, ctx)
            .await
    }

    async fn save_lesson(
        &self,
        session_id: &str,
        content: Map<String, Value>,
    ) -> Result<Session> {
        let ctx = TransitionContext::new(self.today(), ActorRole::Teacher);
        self.perform(session_id, SessionAction::SaveLesson(content), ctx)
            .await
    }

    async fn start_session(&self, session_id: &str, today: NaiveDate) -> Result<Session> {
        let ctx = TransitionContext::new(today, ActorRole::Teacher);
        self.perform(session_id, SessionAction::Start, ctx).await
    }

    async fn record_attendance(
        &self,
        session_id: &str,
        attendance: Map<String, Value>,
    ) -> Result<Session> {
        let ctx = TransitionContext::new(self.today(), ActorRole::Teacher);
        self.perform(session_id, SessionAction::RecordAttendance(attendance), ctx)
            .await
    }

    async fn cancel_session(&self, session_id: &str, role: ActorRole) -> Result<Session> {
        let ctx = TransitionContext::new(self.today(), role);
        self.perform(session_id, SessionAction::Cancel, ctx).await
    }
}
