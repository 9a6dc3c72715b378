//! Session lifecycle state machine and the guard predicates the UI consumes.
//!
//! ```text
//! scheduled -> building -> ready -> in_progress -> completed
//!      \           \         \          \
//!       +-----------+---------+----------+--> cancelled
//! ```
//!
//! `completed` and `cancelled` are terminal. Date-based grouping (past,
//! today, upcoming) is independent of status: a session whose date has
//! passed keeps its status and stays actionable.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::session_model::{Session, SessionStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Session cannot move from {from} to {to}")]
    NotAllowed {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Lesson plan must be saved before the session is ready")]
    LessonPlanIncomplete,

    #[error("Session is scheduled for {session_date} and cannot start on {today}")]
    NotToday {
        session_date: NaiveDate,
        today: NaiveDate,
    },

    #[error("Attendance must be taken before the session is completed")]
    AttendanceNotTaken,

    #[error("Cancelling a session requires an administrator")]
    NotAuthorized,
}

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Teacher,
    Student,
}

/// Inputs to guard evaluation besides the session itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    pub today: NaiveDate,
    pub role: ActorRole,
}

impl TransitionContext {
    pub fn new(today: NaiveDate, role: ActorRole) -> Self {
        Self { today, role }
    }
}

/// Statuses reachable in one step from `from`.
pub fn next_states(from: SessionStatus) -> &'static [SessionStatus] {
    use SessionStatus::*;
    match from {
        Scheduled => &[Building, Cancelled],
        Building => &[Ready, Cancelled],
        Ready => &[InProgress, Cancelled],
        InProgress => &[Completed, Cancelled],
        Completed | Cancelled => &[],
    }
}

pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
    next_states(from).contains(&to)
}

/// Checks that `before -> after` is a legal edge and that its guard holds.
/// Guards read the post-action session (`after`) so a save that sets
/// `lesson_plan_completed` can move the session to `ready` in one write.
pub fn validate_transition(
    before: &Session,
    after: &Session,
    ctx: &TransitionContext,
) -> Result<(), TransitionError> {
    use SessionStatus::*;
    let (from, to) = (before.status, after.status);
    if !can_transition(from, to) {
        return Err(TransitionError::NotAllowed { from, to });
    }
    match (from, to) {
        (Building, Ready) if !after.lesson_plan_completed => {
            Err(TransitionError::LessonPlanIncomplete)
        }
        (Ready, InProgress) if before.session_date != ctx.today => Err(TransitionError::NotToday {
            session_date: before.session_date,
            today: ctx.today,
        }),
        (InProgress, Completed) if !after.attendance_taken => {
            Err(TransitionError::AttendanceNotTaken)
        }
        (_, Cancelled) if ctx.role != ActorRole::Admin => Err(TransitionError::NotAuthorized),
        _ => Ok(()),
    }
}

pub fn can_build_lesson(session: &Session) -> bool {
    matches!(
        session.status,
        SessionStatus::Scheduled | SessionStatus::Building
    )
}

pub fn can_start_session(session: &Session, today: NaiveDate) -> bool {
    session.status == SessionStatus::Ready && session.session_date == today
}

pub fn can_resume(session: &Session) -> bool {
    session.status == SessionStatus::InProgress
}

/// The start button's two faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAction {
    Start,
    Resume,
}

impl StartAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Start => "Start session",
            Self::Resume => "Resume session",
        }
    }
}

/// Which start/resume action is offered for `session` today, if any.
pub fn start_action(session: &Session, today: NaiveDate) -> Option<StartAction> {
    if can_resume(session) {
        Some(StartAction::Resume)
    } else if can_start_session(session, today) {
        Some(StartAction::Start)
    } else {
        None
    }
}

/// Date-only grouping of sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTimeframe {
    Past,
    Today,
    Upcoming,
}

impl SessionTimeframe {
    pub fn of(session: &Session, today: NaiveDate) -> Self {
        match session.session_date.cmp(&today) {
            std::cmp::Ordering::Less => Self::Past,
            std::cmp::Ordering::Equal => Self::Today,
            std::cmp::Ordering::Greater => Self::Upcoming,
        }
    }
}

/// Splits sessions into (past, today, upcoming), preserving order.
pub fn partition_by_timeframe(
    sessions: &[Session],
    today: NaiveDate,
) -> (Vec<Session>, Vec<Session>, Vec<Session>) {
    let mut past = Vec::new();
    let mut current = Vec::new();
    let mut upcoming = Vec::new();
    for session in sessions {
        match SessionTimeframe::of(session, today) {
            SessionTimeframe::Past => past.push(session.clone()),
            SessionTimeframe::Today => current.push(session.clone()),
            SessionTimeframe::Upcoming => upcoming.push(session.clone()),
        }
    }
    (past, current, upcoming)
}

/// UI-triggered actions that may move a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Teacher opens the lesson builder.
    OpenBuilder,
    /// Builder save; carries the lesson content fields.
    SaveLesson(Map<String, Value>),
    /// Start, or resume when already in progress.
    Start,
    /// Attendance save; carries attendance fields.
    RecordAttendance(Map<String, Value>),
    Cancel,
}

impl SessionAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenBuilder => "open_builder",
            Self::SaveLesson(_) => "save_lesson",
            Self::Start => "start",
            Self::RecordAttendance(_) => "record_attendance",
            Self::Cancel => "cancel",
        }
    }
}

/// Computes the partial update for `action` on `session`.
///
/// `Ok(None)` means the action is valid but needs no write (re-opening the
/// builder, resuming a running session).
pub fn plan_action(
    session: &Session,
    action: SessionAction,
    ctx: &TransitionContext,
) -> Result<Option<Map<String, Value>>, TransitionError> {
    use SessionStatus::*;
    let mut after = session.clone();
    let mut patch = Map::new();

    match action {
        SessionAction::OpenBuilder => match session.status {
            Building => return Ok(None),
            _ => after.status = Building,
        },
        SessionAction::SaveLesson(content) => {
            merge_content(&mut patch, content);
            after.lesson_plan_completed = true;
            after.status = Ready;
            patch.insert("lesson_plan_completed".to_string(), Value::Bool(true));
        }
        SessionAction::Start => match session.status {
            InProgress => return Ok(None),
            _ => after.status = InProgress,
        },
        SessionAction::RecordAttendance(fields) => {
            merge_content(&mut patch, fields);
            after.attendance_taken = true;
            after.status = Completed;
            patch.insert("attendance_taken".to_string(), Value::Bool(true));
        }
        SessionAction::Cancel => after.status = Cancelled,
    }

    validate_transition(session, &after, ctx)?;
    patch.insert(
        "status".to_string(),
        Value::String(after.status.as_str().to_string()),
    );
    Ok(Some(patch))
}

fn merge_content(patch: &mut Map<String, Value>, content: Map<String, Value>) {
    for (key, value) in content {
        if key != "id" && key != "status" {
            patch.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).expect("valid date")
    }

    fn session(status: SessionStatus, date: NaiveDate) -> Session {
        let mut session = Session::new("s-1", date);
        session.status = status;
        session
    }

    fn teacher(today: NaiveDate) -> TransitionContext {
        TransitionContext::new(today, ActorRole::Teacher)
    }

    #[test]
    fn only_listed_transitions_are_legal() {
        use SessionStatus::*;
        let legal = [
            (Scheduled, Building),
            (Building, Ready),
            (Ready, InProgress),
            (InProgress, Completed),
            (Scheduled, Cancelled),
            (Building, Cancelled),
            (Ready, Cancelled),
            (InProgress, Cancelled),
        ];
        for from in SessionStatus::ALL {
            for to in SessionStatus::ALL {
                assert_eq!(
                    can_transition(from, to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(next_states(SessionStatus::Completed).is_empty());
        assert!(next_states(SessionStatus::Cancelled).is_empty());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(!SessionStatus::Ready.is_terminal());
    }

    #[test]
    fn validate_rejects_illegal_edge() {
        let before = session(SessionStatus::Scheduled, day(2));
        let after = session(SessionStatus::InProgress, day(2));
        assert_eq!(
            validate_transition(&before, &after, &teacher(day(2))),
            Err(TransitionError::NotAllowed {
                from: SessionStatus::Scheduled,
                to: SessionStatus::InProgress
            })
        );
    }

    #[test]
    fn ready_requires_saved_lesson_plan() {
        let before = session(SessionStatus::Building, day(2));
        let mut after = session(SessionStatus::Ready, day(2));
        assert_eq!(
            validate_transition(&before, &after, &teacher(day(2))),
            Err(TransitionError::LessonPlanIncomplete)
        );
        after.lesson_plan_completed = true;
        assert_eq!(validate_transition(&before, &after, &teacher(day(2))), Ok(()));
    }

    #[test]
    fn start_requires_session_date_today() {
        let ready = session(SessionStatus::Ready, day(3));
        assert!(matches!(
            plan_action(&ready, SessionAction::Start, &teacher(day(2))),
            Err(TransitionError::NotToday { .. })
        ));
        let patch = plan_action(&ready, SessionAction::Start, &teacher(day(3)))
            .expect("start allowed")
            .expect("status change");
        assert_eq!(patch.get("status"), Some(&json!("in_progress")));
    }

    #[test]
    fn start_on_running_session_is_resume() {
        let running = session(SessionStatus::InProgress, day(1));
        assert_eq!(
            plan_action(&running, SessionAction::Start, &teacher(day(5))),
            Ok(None)
        );
        assert_eq!(start_action(&running, day(5)), Some(StartAction::Resume));
        assert_eq!(StartAction::Resume.label(), "Resume session");
    }

    #[test]
    fn save_lesson_marks_plan_and_moves_to_ready() {
        let building = session(SessionStatus::Building, day(4));
        let mut content = Map::new();
        content.insert("lesson_title".to_string(), json!("Fractions"));
        content.insert("status".to_string(), json!("completed"));
        content.insert("id".to_string(), json!("other"));

        let patch = plan_action(&building, SessionAction::SaveLesson(content), &teacher(day(1)))
            .expect("save allowed")
            .expect("patch");
        assert_eq!(patch.get("status"), Some(&json!("ready")));
        assert_eq!(patch.get("lesson_plan_completed"), Some(&json!(true)));
        assert_eq!(patch.get("lesson_title"), Some(&json!("Fractions")));
        assert!(patch.get("id").is_none());
    }

    #[test]
    fn save_lesson_outside_builder_is_rejected() {
        let scheduled = session(SessionStatus::Scheduled, day(4));
        assert!(matches!(
            plan_action(&scheduled, SessionAction::SaveLesson(Map::new()), &teacher(day(1))),
            Err(TransitionError::NotAllowed { .. })
        ));
    }

    #[test]
    fn open_builder_is_idempotent_while_building() {
        let scheduled = session(SessionStatus::Scheduled, day(4));
        let patch = plan_action(&scheduled, SessionAction::OpenBuilder, &teacher(day(1)))
            .expect("open allowed")
            .expect("patch");
        assert_eq!(patch.get("status"), Some(&json!("building")));

        let building = session(SessionStatus::Building, day(4));
        assert_eq!(
            plan_action(&building, SessionAction::OpenBuilder, &teacher(day(1))),
            Ok(None)
        );

        let ready = session(SessionStatus::Ready, day(4));
        assert!(plan_action(&ready, SessionAction::OpenBuilder, &teacher(day(1))).is_err());
    }

    #[test]
    fn attendance_completes_running_session() {
        let running = session(SessionStatus::InProgress, day(2));
        let patch = plan_action(
            &running,
            SessionAction::RecordAttendance(Map::new()),
            &teacher(day(2)),
        )
        .expect("attendance allowed")
        .expect("patch");
        assert_eq!(patch.get("status"), Some(&json!("completed")));
        assert_eq!(patch.get("attendance_taken"), Some(&json!(true)));
    }

    #[test]
    fn cancel_requires_admin_and_non_terminal_state() {
        let ready = session(SessionStatus::Ready, day(2));
        assert_eq!(
            plan_action(&ready, SessionAction::Cancel, &teacher(day(2))),
            Err(TransitionError::NotAuthorized)
        );
        let admin = TransitionContext::new(day(2), ActorRole::Admin);
        assert!(plan_action(&ready, SessionAction::Cancel, &admin)
            .expect("cancel allowed")
            .is_some());

        let completed = session(SessionStatus::Completed, day(2));
        assert!(matches!(
            plan_action(&completed, SessionAction::Cancel, &admin),
            Err(TransitionError::NotAllowed { .. })
        ));
    }

    #[test]
    fn guard_predicates() {
        let today = day(10);
        assert!(can_build_lesson(&session(SessionStatus::Scheduled, today)));
        assert!(can_build_lesson(&session(SessionStatus::Building, today)));
        assert!(!can_build_lesson(&session(SessionStatus::Ready, today)));

        assert!(can_start_session(&session(SessionStatus::Ready, today), today));
        assert!(!can_start_session(&session(SessionStatus::Ready, day(9)), today));
        assert!(!can_start_session(&session(SessionStatus::Building, today), today));

        assert!(can_resume(&session(SessionStatus::InProgress, day(1))));
        assert_eq!(
            start_action(&session(SessionStatus::Ready, today), today),
            Some(StartAction::Start)
        );
        assert_eq!(start_action(&session(SessionStatus::Ready, day(11)), today), None);
    }

    #[test]
    fn past_sessions_keep_their_status() {
        let today = day(10);
        let overdue = session(SessionStatus::Ready, day(8));
        assert_eq!(SessionTimeframe::of(&overdue, today), SessionTimeframe::Past);
        assert_eq!(overdue.status, SessionStatus::Ready);
        assert!(!can_build_lesson(&overdue));

        let sessions = vec![
            session(SessionStatus::Scheduled, day(9)),
            session(SessionStatus::Building, day(10)),
            session(SessionStatus::Ready, day(12)),
            session(SessionStatus::Scheduled, day(1)),
        ];
        let (past, current, upcoming) = partition_by_timeframe(&sessions, today);
        assert_eq!(past.len(), 2);
        assert_eq!(current.len(), 1);
        assert_eq!(upcoming.len(), 1);
        assert!(can_build_lesson(&past[0]));
    }
}
