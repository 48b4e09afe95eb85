//! Opaque identifiers for courses, content blocks, and learners.
//!
//! | Type | Canonical form |
//! |------|----------------|
//! | [`CourseKey`] | `course-v1:{org}+{course}+{run}` |
//! | [`UsageKey`] | `block-v1:{org}+{course}+{run}+type@{type}+block@{id}` |
//! | [`LearnerId`] | decimal integer |
//!
//! The deprecated slash-separated course form (`{org}/{course}/{run}`) and
//! the legacy `i4x://{org}/{course}/{type}/{id}` usage form are accepted on
//! input; keys always render in canonical form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RecalcError;

const COURSE_PREFIX: &str = "course-v1:";
const BLOCK_PREFIX: &str = "block-v1:";
const LEGACY_USAGE_PREFIX: &str = "i4x://";

fn valid_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '~' | '%'))
}

/// Identifies one course offering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CourseKey {
    org: String,
    course: String,
    run: String,
}

impl CourseKey {
    pub fn new(
        org: impl Into<String>,
        course: impl Into<String>,
        run: impl Into<String>,
    ) -> Result<Self, RecalcError> {
        let key = Self {
            org: org.into(),
            course: course.into(),
            run: run.into(),
        };
        if [&key.org, &key.course, &key.run]
            .iter()
            .all(|p| valid_part(p))
        {
            Ok(key)
        } else {
            Err(RecalcError::InvalidKey {
                kind: "course",
                value: format!("{}+{}+{}", key.org, key.course, key.run),
            })
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn course(&self) -> &str {
        &self.course
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    /// Build a usage key for a block inside this course.
    pub fn make_usage_key(&self, block_type: &str, block_id: &str) -> UsageKey {
        UsageKey::new(self.clone(), block_type, block_id)
    }

    /// Like [`CourseKey::make_usage_key`], but rejects parts that would not
    /// parse back from the rendered key.
    pub fn try_usage_key(&self, block_type: &str, block_id: &str) -> Result<UsageKey, RecalcError> {
        UsageKey::try_new(self.clone(), block_type, block_id)
    }
}

impl FromStr for CourseKey {
    type Err = RecalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RecalcError::InvalidKey {
            kind: "course",
            value: s.to_string(),
        };

        let parts: Vec<&str> = if let Some(rest) = s.strip_prefix(COURSE_PREFIX) {
            rest.split('+').collect()
        } else {
            s.split('/').collect()
        };

        match parts.as_slice() {
            [org, course, run] => CourseKey::new(*org, *course, *run).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}+{}+{}", COURSE_PREFIX, self.org, self.course, self.run)
    }
}

impl TryFrom<String> for CourseKey {
    type Error = RecalcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CourseKey> for String {
    fn from(key: CourseKey) -> Self {
        key.to_string()
    }
}

/// Identifies one block (course, chapter, sequential, vertical, problem…)
/// inside a course.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UsageKey {
    course: CourseKey,
    block_type: String,
    block_id: String,
}

impl UsageKey {
    /// Build a key from parts. Block type and id are trusted as-is; use
    /// [`FromStr`] for untrusted input.
    pub fn new(course: CourseKey, block_type: &str, block_id: &str) -> Self {
        Self {
            course,
            block_type: block_type.to_string(),
            block_id: block_id.to_string(),
        }
    }

    /// Build a key from untrusted parts, applying the same character rules
    /// as [`FromStr`].
    pub fn try_new(course: CourseKey, block_type: &str, block_id: &str) -> Result<Self, RecalcError> {
        if valid_part(block_type) && valid_part(block_id) {
            Ok(Self::new(course, block_type, block_id))
        } else {
            Err(RecalcError::InvalidKey {
                kind: "usage",
                value: format!("type@{}+block@{}", block_type, block_id),
            })
        }
    }

    pub fn course_key(&self) -> &CourseKey {
        &self.course
    }

    pub fn block_type(&self) -> &str {
        &self.block_type
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    /// Re-bind this key onto `course`, keeping block type and id.
    ///
    /// Events may carry usage keys minted under a different run or in the
    /// legacy form; the event's course key is authoritative.
    pub fn map_into_course(&self, course: &CourseKey) -> UsageKey {
        UsageKey {
            course: course.clone(),
            block_type: self.block_type.clone(),
            block_id: self.block_id.clone(),
        }
    }

    /// Parse either canonical or legacy form and re-bind onto `course`.
    pub fn parse_in_course(s: &str, course: &CourseKey) -> Result<UsageKey, RecalcError> {
        if let Some(rest) = s.strip_prefix(LEGACY_USAGE_PREFIX) {
            let parts: Vec<&str> = rest.split('/').collect();
            return match parts.as_slice() {
                [_org, _course, block_type, block_id]
                    if valid_part(block_type) && valid_part(block_id) =>
                {
                    Ok(UsageKey::new(course.clone(), block_type, block_id))
                }
                _ => Err(RecalcError::InvalidKey {
                    kind: "usage",
                    value: s.to_string(),
                }),
            };
        }
        let key: UsageKey = s.parse()?;
        Ok(key.map_into_course(course))
    }
}

impl FromStr for UsageKey {
    type Err = RecalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RecalcError::InvalidKey {
            kind: "usage",
            value: s.to_string(),
        };

        let rest = s.strip_prefix(BLOCK_PREFIX).ok_or_else(invalid)?;
        let parts: Vec<&str> = rest.split('+').collect();
        let [org, course, run, type_part, block_part] = parts.as_slice() else {
            return Err(invalid());
        };

        let block_type = type_part.strip_prefix("type@").ok_or_else(invalid)?;
        let block_id = block_part.strip_prefix("block@").ok_or_else(invalid)?;
        if !valid_part(block_type) || !valid_part(block_id) {
            return Err(invalid());
        }

        let course = CourseKey::new(*org, *course, *run).map_err(|_| invalid())?;
        Ok(UsageKey::new(course, block_type, block_id))
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}+{}+{}+type@{}+block@{}",
            BLOCK_PREFIX,
            self.course.org,
            self.course.course,
            self.course.run,
            self.block_type,
            self.block_id
        )
    }
}

impl TryFrom<String> for UsageKey {
    type Error = RecalcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UsageKey> for String {
    fn from(key: UsageKey) -> Self {
        key.to_string()
    }
}

/// Identifies a learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearnerId(pub u64);

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LearnerId {
    type Err = RecalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(LearnerId)
            .map_err(|_| RecalcError::InvalidField {
                field: "user",
                reason: format!("'{}' is not a learner id", s),
            })
    }
}
