//! Learner-specific views of a subsection.
//!
//! Visibility depends on who is asking and when, so a [`LearnerView`] is
//! always computed fresh from the shared snapshot and never cached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use crate::keys::{LearnerId, UsageKey};
use crate::structure::{BlockData, CourseStructure};

/// The learner attributes access rules read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learner {
    pub id: LearnerId,
    pub username: String,
    #[serde(default)]
    pub is_staff: bool,
    /// Group ids across all partitions the learner belongs to.
    #[serde(default)]
    pub groups: BTreeSet<u32>,
}

impl Learner {
    pub fn new(id: LearnerId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            is_staff: false,
            groups: BTreeSet::new(),
        }
    }
}

/// The part of one subsection a learner can reach.
#[derive(Debug, Clone)]
pub struct LearnerView {
    structure: Arc<CourseStructure>,
    subsection: UsageKey,
    visible: Vec<UsageKey>,
    members: HashSet<UsageKey>,
}

impl LearnerView {
    pub fn empty(structure: Arc<CourseStructure>, subsection: UsageKey) -> Self {
        Self {
            structure,
            subsection,
            visible: Vec::new(),
            members: HashSet::new(),
        }
    }

    fn push(&mut self, usage: UsageKey) {
        if self.members.insert(usage.clone()) {
            self.visible.push(usage);
        }
    }

    pub fn subsection(&self) -> &UsageKey {
        &self.subsection
    }

    pub fn structure(&self) -> &CourseStructure {
        &self.structure
    }

    /// Block data of the subsection itself, if the learner can see it.
    pub fn subsection_block(&self) -> Option<&BlockData> {
        if self.visible.first() == Some(&self.subsection) {
            self.structure.block(&self.subsection)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn contains(&self, usage: &UsageKey) -> bool {
        self.members.contains(usage)
    }

    /// Visible block keys, subsection first, then breadth-first.
    pub fn block_keys(&self) -> &[UsageKey] {
        &self.visible
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BlockData> {
        self.visible
            .iter()
            .filter_map(move |usage| self.structure.block(usage))
    }

    /// Visible blocks that carry a score.
    pub fn scorable_blocks(&self) -> impl Iterator<Item = &BlockData> {
        self.blocks().filter(|block| block.has_score)
    }
}

/// Produces a learner's view of one subsection.
pub trait Materializer: Send + Sync {
    fn materialize(
        &self,
        learner: &Learner,
        subsection: &UsageKey,
        structure: &Arc<CourseStructure>,
        now: DateTime<Utc>,
    ) -> LearnerView;
}

/// Standard visibility rules.
///
/// A block, and everything below it, is hidden from a non-staff learner
/// when it is staff-only, has not started yet, or restricts a partition to
/// groups the learner is not in. Staff see everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessRules;

impl AccessRules {
    pub fn can_see(&self, learner: &Learner, block: &BlockData, now: DateTime<Utc>) -> bool {
        if learner.is_staff {
            return true;
        }
        if block.visible_to_staff_only {
            return false;
        }
        if matches!(block.start, Some(start) if start > now) {
            return false;
        }
        block
            .group_access
            .values()
            .filter(|groups| !groups.is_empty())
            .all(|groups| !groups.is_disjoint(&learner.groups))
    }
}

impl Materializer for AccessRules {
    fn materialize(
        &self,
        learner: &Learner,
        subsection: &UsageKey,
        structure: &Arc<CourseStructure>,
        now: DateTime<Utc>,
    ) -> LearnerView {
        let mut view = LearnerView::empty(Arc::clone(structure), subsection.clone());

        let Some(root) = structure.block(subsection) else {
            return view;
        };
        if !self.can_see(learner, root, now) {
            return view;
        }

        let mut seen: HashSet<&UsageKey> = HashSet::from([subsection]);
        let mut queue = VecDeque::from([subsection]);
        while let Some(usage) = queue.pop_front() {
            view.push(usage.clone());
            for child in structure.children(usage) {
                if seen.contains(child) {
                    continue;
                }
                let visible = structure
                    .block(child)
                    .map(|block| self.can_see(learner, block, now))
                    .unwrap_or(false);
                if visible {
                    seen.insert(child);
                    queue.push_back(child);
                }
            }
        }

        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::CourseKey;
    use crate::structure::CourseStructureBuilder;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        structure: Arc<CourseStructure>,
        seq: UsageKey,
        open: UsageKey,
        staff_only: UsageKey,
        future: UsageKey,
        cohort_a: UsageKey,
        under_staff_only: UsageKey,
    }

    fn fixture() -> Fixture {
        let c: CourseKey = "course-v1:edX+DemoX+2024".parse().unwrap();
        let root = c.make_usage_key("course", "course");
        let seq = c.make_usage_key("sequential", "s1");
        let open = c.make_usage_key("problem", "open");
        let staff_only = c.make_usage_key("vertical", "staff");
        let under_staff_only = c.make_usage_key("problem", "hidden");
        let future = c.make_usage_key("problem", "future");
        let cohort_a = c.make_usage_key("problem", "cohort_a");

        let mut staff_block = BlockData::new(staff_only.clone());
        staff_block.visible_to_staff_only = true;
        let mut future_block = BlockData::new(future.clone());
        future_block.start = Some(now() + Duration::days(7));
        let mut cohort_block = BlockData::new(cohort_a.clone());
        cohort_block.group_access.insert(50, BTreeSet::from([1]));

        let structure = CourseStructureBuilder::new(c, 1, root.clone())
            .block(BlockData::new(root.clone()))
            .child(&root, BlockData::new(seq.clone()))
            .child(&seq, BlockData::new(open.clone()))
            .child(&seq, staff_block)
            .child(&staff_only, BlockData::new(under_staff_only.clone()))
            .child(&seq, future_block)
            .child(&seq, cohort_block)
            .build()
            .unwrap();

        Fixture {
            structure: Arc::new(structure),
            seq,
            open,
            staff_only,
            future,
            cohort_a,
            under_staff_only,
        }
    }

    #[test]
    fn test_student_sees_only_open_content() {
        let f = fixture();
        let learner = Learner::new(LearnerId(42), "learner");
        let view = AccessRules.materialize(&learner, &f.seq, &f.structure, now());

        assert!(view.contains(&f.seq));
        assert!(view.block_keys().iter().all(|k| view.contains(k)));
        assert!(view.contains(&f.open));
        assert!(!view.contains(&f.staff_only));
        assert!(!view.contains(&f.under_staff_only));
        assert!(!view.contains(&f.future));
        assert!(!view.contains(&f.cohort_a));
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_group_member_sees_cohort_content() {
        let f = fixture();
        let mut learner = Learner::new(LearnerId(7), "cohort");
        learner.groups.insert(1);
        let view = AccessRules.materialize(&learner, &f.seq, &f.structure, now());
        assert!(view.contains(&f.cohort_a));
    }

    #[test]
    fn test_staff_sees_everything() {
        let f = fixture();
        let mut staff = Learner::new(LearnerId(1), "staff");
        staff.is_staff = true;
        let view = AccessRules.materialize(&staff, &f.seq, &f.structure, now());
        assert_eq!(view.len(), 6);
    }

    #[test]
    fn test_started_content_becomes_visible() {
        let f = fixture();
        let learner = Learner::new(LearnerId(42), "learner");
        let later = now() + Duration::days(8);
        let view = AccessRules.materialize(&learner, &f.seq, &f.structure, later);
        assert!(view.contains(&f.future));
    }

    #[test]
    fn test_absent_subsection_yields_empty_view() {
        let f = fixture();
        let learner = Learner::new(LearnerId(42), "learner");
        let gone = f.seq.course_key().make_usage_key("sequential", "deleted");
        let view = AccessRules.materialize(&learner, &gone, &f.structure, now());
        assert!(view.is_empty());
        assert!(view.subsection_block().is_none());
        assert_eq!(view.subsection(), &gone);
    }

    #[test]
    fn test_views_are_per_learner() {
        let f = fixture();
        let mut member = Learner::new(LearnerId(7), "cohort");
        member.groups.insert(1);
        let outsider = Learner::new(LearnerId(8), "outsider");

        let a = AccessRules.materialize(&member, &f.seq, &f.structure, now());
        let b = AccessRules.materialize(&outsider, &f.seq, &f.structure, now());
        assert!(a.contains(&f.cohort_a));
        assert!(!b.contains(&f.cohort_a));
    }
}
