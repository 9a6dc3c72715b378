//! Session domain model.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::Entity;

/// Collection holding scheduled sessions.
pub const SESSIONS_COLLECTION: &str = "sessions";

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Building,
    Ready,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 6] = [
        SessionStatus::Scheduled,
        SessionStatus::Building,
        SessionStatus::Ready,
        SessionStatus::InProgress,
        SessionStatus::Completed,
        SessionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Building => "building",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled teaching occurrence.
///
/// Fields the lifecycle does not care about are kept in `extra` so a session
/// read from the feed round-trips without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub session_date: NaiveDate,
    #[serde(default)]
    pub lesson_plan_completed: bool,
    #[serde(default)]
    pub attendance_taken: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    pub fn new(id: impl Into<String>, session_date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Scheduled,
            session_date,
            lesson_plan_completed: false,
            attendance_taken: false,
            teacher_id: None,
            class_id: None,
            extra: Map::new(),
        }
    }
}

impl Entity for Session {
    fn id(&self) -> &str {
        &self.id
    }

    fn field(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(Value::String(self.id.clone())),
            "status" => Some(Value::String(self.status.as_str().to_string())),
            "session_date" => Some(Value::String(
                self.session_date.format("%Y-%m-%d").to_string(),
            )),
            "lesson_plan_completed" => Some(Value::Bool(self.lesson_plan_completed)),
            "attendance_taken" => Some(Value::Bool(self.attendance_taken)),
            "teacher_id" => self.teacher_id.clone().map(Value::String),
            "class_id" => self.class_id.clone().map(Value::String),
            other => self.extra.get(other).cloned(),
        }
    }
}
