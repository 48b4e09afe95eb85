//! Block transformers and the affected-subsection resolver.
//!
//! Transformers run once per snapshot build (the collect phase) and attach
//! derived fields to blocks, so per-event work is a lookup rather than a
//! graph walk.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::keys::UsageKey;
use crate::structure::CourseStructure;

/// Name under which the grades transformer stores its fields.
pub const GRADES_TRANSFORMER: &str = "grades";
/// Field holding the subsections that aggregate a block's score.
pub const SUBSECTIONS_FIELD: &str = "subsections";
/// Block type of an aggregation unit.
pub const SUBSECTION_BLOCK_TYPE: &str = "sequential";

/// Derives per-block data during a snapshot build.
pub trait BlockTransformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compute and store fields via
    /// [`CourseStructure::set_transformer_block_field`].
    fn collect(&self, structure: &mut CourseStructure);
}

/// Records, for every block, the subsections whose grade includes it.
pub struct GradesTransformer;

impl BlockTransformer for GradesTransformer {
    fn name(&self) -> &'static str {
        GRADES_TRANSFORMER
    }

    fn collect(&self, structure: &mut CourseStructure) {
        let mut subsections: HashMap<UsageKey, BTreeSet<UsageKey>> = HashMap::new();

        for usage in structure.topological_order() {
            let mut set: BTreeSet<UsageKey> = structure
                .parents(usage)
                .iter()
                .filter_map(|parent| subsections.get(parent))
                .flatten()
                .cloned()
                .collect();
            if usage.block_type() == SUBSECTION_BLOCK_TYPE {
                set.insert(usage.clone());
            }
            subsections.insert(usage.clone(), set);
        }

        for (usage, set) in subsections {
            let value = Value::Array(set.iter().map(|s| Value::from(s.to_string())).collect());
            structure.set_transformer_block_field(
                &usage,
                GRADES_TRANSFORMER,
                SUBSECTIONS_FIELD,
                value,
            );
        }
    }
}

/// Subsections whose grade depends on `leaf`.
///
/// Returns the empty set when `leaf` is not in the snapshot (content
/// deleted after the event was queued). Depends only on its arguments.
pub fn affected_subsections(structure: &CourseStructure, leaf: &UsageKey) -> BTreeSet<UsageKey> {
    let Some(Value::Array(items)) =
        structure.transformer_block_field(leaf, GRADES_TRANSFORMER, SUBSECTIONS_FIELD)
    else {
        return BTreeSet::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let parsed = item.as_str().map(str::parse::<UsageKey>);
            match parsed {
                Some(Ok(key)) => Some(key),
                _ => {
                    tracing::warn!(%leaf, value = %item, "ignoring malformed subsection entry");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::CourseKey;
    use crate::structure::{BlockData, CourseStructureBuilder};

    fn course() -> CourseKey {
        "course-v1:edX+DemoX+2024".parse().unwrap()
    }

    #[test]
    fn test_leaf_maps_to_enclosing_sequential() {
        let c = course();
        let root = c.make_usage_key("course", "course");
        let ch = c.make_usage_key("chapter", "c1");
        let seq = c.make_usage_key("sequential", "s1");
        let vert = c.make_usage_key("vertical", "v1");
        let p = c.make_usage_key("problem", "p1");

        let s = CourseStructureBuilder::new(c, 1, root.clone())
            .block(BlockData::new(root.clone()))
            .child(&root, BlockData::new(ch.clone()))
            .child(&ch, BlockData::new(seq.clone()))
            .child(&seq, BlockData::new(vert.clone()))
            .child(&vert, BlockData::new(p.clone()))
            .build()
            .unwrap();

        assert_eq!(affected_subsections(&s, &p), BTreeSet::from([seq.clone()]));
        assert_eq!(affected_subsections(&s, &seq), BTreeSet::from([seq]));
        assert!(affected_subsections(&s, &ch).is_empty());
        assert!(affected_subsections(&s, &root).is_empty());
    }

    #[test]
    fn test_shared_leaf_maps_to_both_subsections() {
        let c = course();
        let root = c.make_usage_key("course", "course");
        let s1 = c.make_usage_key("sequential", "s1");
        let s2 = c.make_usage_key("sequential", "s2");
        let p = c.make_usage_key("problem", "p1");

        let mut builder = CourseStructureBuilder::new(c, 1, root.clone())
            .block(BlockData::new(root.clone()))
            .child(&root, BlockData::new(s1.clone()))
            .child(&root, BlockData::new(s2.clone()))
            .child(&s1, BlockData::new(p.clone()));
        builder.add_edge(s2.clone(), p.clone());
        let s = builder.build().unwrap();

        assert_eq!(affected_subsections(&s, &p), BTreeSet::from([s1, s2]));
    }

    #[test]
    fn test_absent_leaf_is_empty() {
        let c = course();
        let root = c.make_usage_key("course", "course");
        let s = CourseStructureBuilder::new(c.clone(), 1, root.clone())
            .block(BlockData::new(root))
            .build()
            .unwrap();
        let gone = c.make_usage_key("problem", "deleted");
        assert!(affected_subsections(&s, &gone).is_empty());
    }
}
