//! Score-change events and their task-argument encoding.
//!
//! Events cross the dispatch boundary as a flat JSON object of task
//! arguments:
//!
//! ```json
//! {
//!   "user": 42,
//!   "course_id": "course-v1:edX+DemoX+2024",
//!   "usage_id": "block-v1:edX+DemoX+2024+type@problem+block@p1",
//!   "points_earned": 5.0,
//!   "points_possible": 10.0
//! }
//! ```
//!
//! `user`, `course_id`, and `usage_id` are required. The point values are
//! informational: grading always re-reads the score store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RecalcError;
use crate::keys::{CourseKey, LearnerId, UsageKey};

/// A learner's score on one leaf changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub learner: LearnerId,
    pub course: CourseKey,
    /// The scored leaf, always bound to `course`.
    pub usage: UsageKey,
    pub points_earned: Option<f64>,
    pub points_possible: Option<f64>,
}

impl ScoreEvent {
    pub fn new(learner: LearnerId, course: CourseKey, usage: &UsageKey) -> Self {
        let usage = usage.map_into_course(&course);
        Self {
            learner,
            course,
            usage,
            points_earned: None,
            points_possible: None,
        }
    }

    pub fn with_points(mut self, earned: f64, possible: f64) -> Self {
        self.points_earned = Some(earned);
        self.points_possible = Some(possible);
        self
    }

    /// Parse raw task arguments.
    ///
    /// Validates every required field before returning, so a malformed
    /// event fails without touching any collaborator.
    pub fn from_task_args(args: &Map<String, Value>) -> Result<Self, RecalcError> {
        let user = match args.get("user") {
            None | Some(Value::Null) => return Err(RecalcError::MissingField("user")),
            Some(user) => user,
        };
        let course_id = required_str(args, "course_id")?;
        let usage_id = required_str(args, "usage_id")?;

        let learner = match user {
            Value::Number(n) => n.as_u64().map(LearnerId).ok_or(RecalcError::InvalidField {
                field: "user",
                reason: format!("'{}' is not a learner id", n),
            })?,
            Value::String(s) => s.parse()?,
            other => {
                return Err(RecalcError::InvalidField {
                    field: "user",
                    reason: format!("expected number or string, got {}", other),
                })
            }
        };

        let course: CourseKey = course_id.parse()?;
        let usage = UsageKey::parse_in_course(usage_id, &course)?;

        Ok(Self {
            learner,
            course,
            usage,
            points_earned: optional_f64(args, "points_earned")?,
            points_possible: optional_f64(args, "points_possible")?,
        })
    }

    /// Encode as task arguments, the inverse of [`from_task_args`](Self::from_task_args).
    pub fn to_task_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("user".into(), Value::from(self.learner.0));
        args.insert("course_id".into(), Value::from(self.course.to_string()));
        args.insert("usage_id".into(), Value::from(self.usage.to_string()));
        if let Some(earned) = self.points_earned {
            args.insert("points_earned".into(), Value::from(earned));
        }
        if let Some(possible) = self.points_possible {
            args.insert("points_possible".into(), Value::from(possible));
        }
        args
    }
}

fn required_str<'a>(
    args: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, RecalcError> {
    match args.get(field) {
        None | Some(Value::Null) => Err(RecalcError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(RecalcError::InvalidField {
            field,
            reason: format!("expected string, got {}", other),
        }),
    }
}

fn optional_f64(args: &Map<String, Value>, field: &'static str) -> Result<Option<f64>, RecalcError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(RecalcError::InvalidField {
            field,
            reason: format!("expected number, got {}", other),
        }),
    }
}
