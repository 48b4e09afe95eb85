//! Immutable course structure snapshots.
//!
//! A [`CourseStructure`] is a point-in-time DAG of a course's blocks,
//! rooted at the course block, annotated with per-block transformer data.
//! It is assembled once by [`CourseStructureBuilder`], which validates the
//! graph and runs every registered transformer's collect phase, and is then
//! shared read-only behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::error::RecalcError;
use crate::keys::{CourseKey, UsageKey};
use crate::transform::{BlockTransformer, GradesTransformer};

/// Attributes of one block that grading and access rules read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockData {
    pub usage: UsageKey,
    #[serde(default)]
    pub display_name: String,
    /// Counts toward the graded total.
    #[serde(default)]
    pub graded: bool,
    /// Directly scorable leaf.
    #[serde(default)]
    pub has_score: bool,
    /// Rescales the leaf's raw score to this many points.
    #[serde(default)]
    pub weight: Option<f64>,
    /// Raw points possible when the learner has no recorded score.
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub visible_to_staff_only: bool,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Partition id → groups allowed to see the block.
    #[serde(default)]
    pub group_access: BTreeMap<u32, BTreeSet<u32>>,
}

impl BlockData {
    pub fn new(usage: UsageKey) -> Self {
        Self {
            usage,
            display_name: String::new(),
            graded: false,
            has_score: false,
            weight: None,
            max_score: None,
            visible_to_staff_only: false,
            start: None,
            group_access: BTreeMap::new(),
        }
    }

    pub fn block_type(&self) -> &str {
        self.usage.block_type()
    }
}

/// Per-block transformer data: transformer name → field name → value.
pub type TransformerData = BTreeMap<String, BTreeMap<String, Value>>;

/// A validated, immutable snapshot of one course's content graph.
#[derive(Debug, Clone)]
pub struct CourseStructure {
    course: CourseKey,
    version: u64,
    root: UsageKey,
    blocks: HashMap<UsageKey, BlockData>,
    children: HashMap<UsageKey, Vec<UsageKey>>,
    parents: HashMap<UsageKey, Vec<UsageKey>>,
    order: Vec<UsageKey>,
    transformer_data: HashMap<UsageKey, TransformerData>,
}

impl CourseStructure {
    pub fn course(&self) -> &CourseKey {
        &self.course
    }

    /// Content version the snapshot was built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> &UsageKey {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn has_block(&self, usage: &UsageKey) -> bool {
        self.blocks.contains_key(usage)
    }

    pub fn block(&self, usage: &UsageKey) -> Option<&BlockData> {
        self.blocks.get(usage)
    }

    pub fn children(&self, usage: &UsageKey) -> &[UsageKey] {
        self.children.get(usage).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents(&self, usage: &UsageKey) -> &[UsageKey] {
        self.parents.get(usage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Blocks in topological order: every parent precedes its children.
    pub fn topological_order(&self) -> &[UsageKey] {
        &self.order
    }

    /// Read a field a transformer collected for `usage`.
    pub fn transformer_block_field(
        &self,
        usage: &UsageKey,
        transformer: &str,
        field: &str,
    ) -> Option<&Value> {
        self.transformer_data
            .get(usage)?
            .get(transformer)?
            .get(field)
    }

    /// Record a transformer field. Only reachable during the collect phase;
    /// published snapshots are shared immutably.
    pub fn set_transformer_block_field(
        &mut self,
        usage: &UsageKey,
        transformer: &str,
        field: &str,
        value: Value,
    ) {
        self.transformer_data
            .entry(usage.clone())
            .or_default()
            .entry(transformer.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }
}

/// Assembles and validates a [`CourseStructure`].
///
/// ```rust
/// use grade_recompute_core::keys::CourseKey;
/// use grade_recompute_core::structure::{BlockData, CourseStructureBuilder};
///
/// let course: CourseKey = "course-v1:edX+DemoX+2024".parse().unwrap();
/// let root = course.make_usage_key("course", "course");
/// let seq = course.make_usage_key("sequential", "s1");
///
/// let structure = CourseStructureBuilder::new(course, 1, root.clone())
///     .block(BlockData::new(root.clone()))
///     .child(&root, BlockData::new(seq.clone()))
///     .build()
///     .unwrap();
/// assert_eq!(structure.children(&root), &[seq]);
/// ```
pub struct CourseStructureBuilder {
    course: CourseKey,
    version: u64,
    root: UsageKey,
    blocks: HashMap<UsageKey, BlockData>,
    edges: Vec<(UsageKey, UsageKey)>,
    transformers: Vec<Box<dyn BlockTransformer>>,
}

impl CourseStructureBuilder {
    /// Start a builder with the grades transformer registered.
    pub fn new(course: CourseKey, version: u64, root: UsageKey) -> Self {
        Self {
            course,
            version,
            root,
            blocks: HashMap::new(),
            edges: Vec::new(),
            transformers: vec![Box::new(GradesTransformer)],
        }
    }

    pub fn block(mut self, block: BlockData) -> Self {
        self.add_block(block);
        self
    }

    /// Add `block` as the last child of `parent`.
    pub fn child(mut self, parent: &UsageKey, block: BlockData) -> Self {
        let child = block.usage.clone();
        self.add_block(block);
        self.add_edge(parent.clone(), child);
        self
    }

    pub fn add_block(&mut self, block: BlockData) {
        self.blocks.insert(block.usage.clone(), block);
    }

    pub fn add_edge(&mut self, parent: UsageKey, child: UsageKey) {
        self.edges.push((parent, child));
    }

    /// Validate the graph, prune blocks unreachable from the root, compute
    /// the topological order, and run every transformer's collect phase.
    pub fn build(self) -> Result<CourseStructure, RecalcError> {
        if !self.blocks.contains_key(&self.root) {
            return Err(RecalcError::InvalidStructure(format!(
                "root block {} is missing",
                self.root
            )));
        }

        if let Some(foreign) = self
            .blocks
            .keys()
            .find(|usage| usage.course_key() != &self.course)
        {
            return Err(RecalcError::InvalidStructure(format!(
                "block {} does not belong to {}",
                foreign, self.course
            )));
        }

        let mut children: HashMap<UsageKey, Vec<UsageKey>> = HashMap::new();
        for (parent, child) in &self.edges {
            for end in [parent, child] {
                if !self.blocks.contains_key(end) {
                    return Err(RecalcError::InvalidStructure(format!(
                        "edge references unknown block {}",
                        end
                    )));
                }
            }
            let siblings = children.entry(parent.clone()).or_default();
            if !siblings.contains(child) {
                siblings.push(child.clone());
            }
        }

        // Reachability from the root.
        let mut reachable: BTreeSet<UsageKey> = BTreeSet::new();
        let mut queue = VecDeque::from([self.root.clone()]);
        while let Some(usage) = queue.pop_front() {
            if reachable.insert(usage.clone()) {
                for child in children.get(&usage).into_iter().flatten() {
                    queue.push_back(child.clone());
                }
            }
        }

        let mut blocks = self.blocks;
        let pruned = blocks.len() - reachable.len();
        if pruned > 0 {
            tracing::debug!(course = %self.course, pruned, "dropping unreachable blocks");
            blocks.retain(|usage, _| reachable.contains(usage));
            children.retain(|usage, _| reachable.contains(usage));
        }

        let mut parents: HashMap<UsageKey, Vec<UsageKey>> = HashMap::new();
        for (parent, kids) in &children {
            for child in kids {
                parents.entry(child.clone()).or_default().push(parent.clone());
            }
        }
        for list in parents.values_mut() {
            list.sort();
        }

        let order = topological_order(&self.root, &blocks, &children, &parents)?;

        let mut structure = CourseStructure {
            course: self.course,
            version: self.version,
            root: self.root,
            blocks,
            children,
            parents,
            order,
            transformer_data: HashMap::new(),
        };

        for transformer in &self.transformers {
            tracing::trace!(course = %structure.course, transformer = transformer.name(), "collect");
            transformer.collect(&mut structure);
        }

        Ok(structure)
    }
}

/// Kahn's algorithm, seeded from the root, visiting children in outline
/// order. Fails if the graph has a cycle.
fn topological_order(
    root: &UsageKey,
    blocks: &HashMap<UsageKey, BlockData>,
    children: &HashMap<UsageKey, Vec<UsageKey>>,
    parents: &HashMap<UsageKey, Vec<UsageKey>>,
) -> Result<Vec<UsageKey>, RecalcError> {
    let mut indegree: HashMap<&UsageKey, usize> = blocks
        .keys()
        .map(|usage| (usage, parents.get(usage).map(Vec::len).unwrap_or(0)))
        .collect();

    let mut order = Vec::with_capacity(blocks.len());
    let mut queue: VecDeque<&UsageKey> = VecDeque::new();
    if indegree.get(root) == Some(&0) {
        queue.push_back(root);
    }

    while let Some(usage) = queue.pop_front() {
        order.push(usage.clone());
        for child in children.get(usage).into_iter().flatten() {
            if let Some(deg) = indegree.get_mut(child) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if order.len() != blocks.len() {
        return Err(RecalcError::InvalidStructure(
            "course outline contains a cycle".to_string(),
        ));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course() -> CourseKey {
        "course-v1:edX+DemoX+2024".parse().unwrap()
    }

    #[test]
    fn test_build_simple_tree() {
        let c = course();
        let root = c.make_usage_key("course", "course");
        let ch = c.make_usage_key("chapter", "c1");
        let seq = c.make_usage_key("sequential", "s1");
        let p = c.make_usage_key("problem", "p1");

        let s = CourseStructureBuilder::new(c, 3, root.clone())
            .block(BlockData::new(root.clone()))
            .child(&root, BlockData::new(ch.clone()))
            .child(&ch, BlockData::new(seq.clone()))
            .child(&seq, BlockData::new(p.clone()))
            .build()
            .unwrap();

        assert_eq!(s.len(), 4);
        assert_eq!(s.version(), 3);
        assert_eq!(s.topological_order(), &[root, ch, seq.clone(), p.clone()]);
        assert_eq!(s.parents(&p), &[seq]);
    }

    #[test]
    fn test_missing_root_rejected() {
        let c = course();
        let root = c.make_usage_key("course", "course");
        let err = CourseStructureBuilder::new(c, 1, root).build().unwrap_err();
        assert!(matches!(err, RecalcError::InvalidStructure(_)));
    }

    #[test]
    fn test_cycle_rejected() {
        let c = course();
        let root = c.make_usage_key("course", "course");
        let a = c.make_usage_key("chapter", "a");
        let b = c.make_usage_key("sequential", "b");
        let mut builder = CourseStructureBuilder::new(c, 1, root.clone())
            .block(BlockData::new(root.clone()))
            .child(&root, BlockData::new(a.clone()))
            .child(&a, BlockData::new(b.clone()));
        builder.add_edge(b, a);
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_edge_rejected() {
        let c = course();
        let root = c.make_usage_key("course", "course");
        let ghost = c.make_usage_key("chapter", "ghost");
        let mut builder =
            CourseStructureBuilder::new(c, 1, root.clone()).block(BlockData::new(root.clone()));
        builder.add_edge(root, ghost);
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_foreign_block_rejected() {
        let c = course();
        let other: CourseKey = "course-v1:edX+Other+2024".parse().unwrap();
        let root = c.make_usage_key("course", "course");
        let stray = other.make_usage_key("chapter", "c1");
        let err = CourseStructureBuilder::new(c, 1, root.clone())
            .block(BlockData::new(root.clone()))
            .child(&root, BlockData::new(stray))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("does not belong"));
    }

    #[test]
    fn test_unreachable_blocks_pruned() {
        let c = course();
        let root = c.make_usage_key("course", "course");
        let orphan = c.make_usage_key("problem", "orphan");
        let s = CourseStructureBuilder::new(c, 1, root.clone())
            .block(BlockData::new(root))
            .block(BlockData::new(orphan.clone()))
            .build()
            .unwrap();
        assert!(!s.has_block(&orphan));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_dag_block_with_two_parents() {
        let c = course();
        let root = c.make_usage_key("course", "course");
        let s1 = c.make_usage_key("sequential", "s1");
        let s2 = c.make_usage_key("sequential", "s2");
        let shared = c.make_usage_key("problem", "shared");
        let mut builder = CourseStructureBuilder::new(c, 1, root.clone())
            .block(BlockData::new(root.clone()))
            .child(&root, BlockData::new(s1.clone()))
            .child(&root, BlockData::new(s2.clone()))
            .child(&s1, BlockData::new(shared.clone()));
        builder.add_edge(s2.clone(), shared.clone());
        let s = builder.build().unwrap();
        assert_eq!(s.parents(&shared), &[s1, s2]);
        assert_eq!(s.topological_order().last(), Some(&shared));
    }
}
