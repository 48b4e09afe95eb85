//! `gradectl score set`: record a raw score and fire the score-changed
//! signal, which queues a recalculation through the dispatcher.

use anyhow::{bail, Result};

use grade_recompute_core::grade::Score;
use grade_recompute_core::store::ScoreStore;
use grade_recompute_core::{CourseKey, LearnerId, ScoreEvent, UsageKey};

use crate::config::Config;
use crate::service::GradeService;

/// Parse a usage key given on the command line. Besides full keys, a short
/// `type/id` form is accepted and bound to `course`.
pub fn parse_usage(course: &CourseKey, s: &str) -> Result<UsageKey> {
    if s.contains(':') {
        return Ok(UsageKey::parse_in_course(s, course)?);
    }
    match s.split_once('/') {
        Some((block_type, block_id)) if !block_type.is_empty() && !block_id.is_empty() => {
            Ok(course.try_usage_key(block_type, block_id)?)
        }
        _ => bail!("usage '{}' must be a usage key or type/id", s),
    }
}

pub async fn run_set_score(
    config: &Config,
    user: u64,
    course: &str,
    usage: &str,
    earned: f64,
    possible: f64,
) -> Result<()> {
    if earned < 0.0 || possible < 0.0 {
        bail!("earned and possible must be >= 0");
    }
    let course: CourseKey = course.parse()?;
    let usage = parse_usage(&course, usage)?;
    let learner = LearnerId(user);

    let service = GradeService::connect(config).await?;
    service
        .store
        .record_score(learner, &usage, Score::new(earned, possible))
        .await?;
    println!("Recorded {}/{} for learner {} on {}", earned, possible, learner, usage);

    let dispatcher = service.dispatcher(config);
    let event = ScoreEvent::new(learner, course, &usage).with_points(earned, possible);
    let task = dispatcher.score_changed(&event).await?;
    let summary = dispatcher.shutdown().await?;
    service.close().await;

    println!("Recalculation task {}", task);
    println!("  updated: {}", summary.updated);
    println!("  skipped: {}", summary.skipped);
    println!("  failed:  {}", summary.failed);
    if summary.failed > 0 {
        bail!("recalculation failed; see log output");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usage_short_form() {
        let course: CourseKey = "course-v1:edX+DemoX+2024".parse().unwrap();
        let usage = parse_usage(&course, "problem/p1").unwrap();
        assert_eq!(usage, course.make_usage_key("problem", "p1"));
    }

    #[test]
    fn test_parse_usage_full_key_rebinds_course() {
        let course: CourseKey = "course-v1:edX+DemoX+2024".parse().unwrap();
        let usage = parse_usage(&course, "block-v1:edX+DemoX+2024+type@problem+block@p1").unwrap();
        assert_eq!(usage.course_key(), &course);
    }

    #[test]
    fn test_parse_usage_rejects_garbage() {
        let course: CourseKey = "course-v1:edX+DemoX+2024".parse().unwrap();
        assert!(parse_usage(&course, "p1").is_err());
        assert!(parse_usage(&course, "problem/").is_err());
        assert!(parse_usage(&course, "problem/Problem 1").is_err());
    }
}
