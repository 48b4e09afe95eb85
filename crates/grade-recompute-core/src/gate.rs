//! Feature gate deciding whether persistent subsection grades are on.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::keys::CourseKey;

/// Side-effect-free predicate consulted once at the start of every run.
pub trait FeatureGate: Send + Sync {
    fn enabled(&self, course: &CourseKey) -> bool;
}

/// Deployment-wide switch plus an optional per-course allow list.
///
/// - `enabled = false` disables recalculation everywhere.
/// - `enabled_for_all_courses = true` enables it everywhere else.
/// - Otherwise only courses listed in `courses` are enabled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistentGradesFlag {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub enabled_for_all_courses: bool,
    #[serde(default)]
    pub courses: BTreeSet<CourseKey>,
}

impl PersistentGradesFlag {
    pub fn enabled_for_all() -> Self {
        Self {
            enabled: true,
            enabled_for_all_courses: true,
            courses: BTreeSet::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enabled_for(courses: impl IntoIterator<Item = CourseKey>) -> Self {
        Self {
            enabled: true,
            enabled_for_all_courses: false,
            courses: courses.into_iter().collect(),
        }
    }
}

impl FeatureGate for PersistentGradesFlag {
    fn enabled(&self, course: &CourseKey) -> bool {
        if !self.enabled {
            return false;
        }
        self.enabled_for_all_courses || self.courses.contains(course)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> CourseKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_global_switch_overrides_everything() {
        let mut flag = PersistentGradesFlag::enabled_for([c("course-v1:a+b+c")]);
        flag.enabled = false;
        flag.enabled_for_all_courses = true;
        assert!(!flag.enabled(&c("course-v1:a+b+c")));
    }

    #[test]
    fn test_enabled_for_all() {
        assert!(PersistentGradesFlag::enabled_for_all().enabled(&c("course-v1:x+y+z")));
    }

    #[test]
    fn test_per_course_allow_list() {
        let flag = PersistentGradesFlag::enabled_for([c("course-v1:a+b+c")]);
        assert!(flag.enabled(&c("course-v1:a+b+c")));
        assert!(!flag.enabled(&c("course-v1:a+b+other")));
    }

    #[test]
    fn test_default_is_disabled() {
        assert!(!PersistentGradesFlag::disabled().enabled(&c("course-v1:a+b+c")));
    }

    #[test]
    fn test_deserialize_from_toml_shape() {
        let flag: PersistentGradesFlag = serde_json::from_value(serde_json::json!({
            "enabled": true,
            "courses": ["course-v1:a+b+c"]
        }))
        .unwrap();
        assert!(flag.enabled(&c("course-v1:a+b+c")));
        assert!(!flag.enabled_for_all_courses);
    }
}
