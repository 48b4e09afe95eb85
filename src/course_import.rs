//! Course outline import.
//!
//! An outline is a nested TOML document describing one course:
//!
//! ```toml
//! course = "course-v1:edX+DemoX+2024"
//!
//! [root]
//! type = "course"
//! id = "course"
//! display_name = "Demo Course"
//!
//! [[root.children]]
//! type = "chapter"
//! id = "week1"
//!
//! [[root.children.children]]
//! type = "sequential"
//! id = "hw1"
//! display_name = "Homework 1"
//! graded = true
//!
//! [[root.children.children.children]]
//! type = "problem"
//! id = "p1"
//! max_score = 10.0
//! ```
//!
//! `graded` is inherited by descendants unless they override it. A block
//! with `max_score` (or an explicit `has_score = true`) is scorable.
//! `links = ["problem/p1"]` adds an existing block as an extra child, which
//! is how one leaf ends up under several subsections.
//!
//! The outline is validated by building a [`CourseStructure`] before any
//! row is written; the write itself is a single transaction that replaces
//! the course's blocks and edges and bumps its version. Block types and ids
//! must survive a round trip through the rendered usage key.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use grade_recompute_core::structure::{BlockData, CourseStructure, CourseStructureBuilder};
use grade_recompute_core::{CourseKey, UsageKey};

use crate::config::Config;
use crate::service::GradeService;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize)]
pub struct Outline {
    pub course: CourseKey,
    pub root: OutlineNode,
}

#[derive(Debug, Deserialize)]
pub struct OutlineNode {
    #[serde(rename = "type")]
    pub block_type: String,
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub graded: Option<bool>,
    #[serde(default)]
    pub has_score: Option<bool>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub visible_to_staff_only: bool,
    /// RFC 3339 release date.
    #[serde(default)]
    pub start: Option<String>,
    /// Partition id → allowed group ids.
    #[serde(default)]
    pub group_access: BTreeMap<String, Vec<u32>>,
    /// Extra children defined elsewhere in the outline, as `type/id`.
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub children: Vec<OutlineNode>,
}

/// What an import wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub course: CourseKey,
    pub version: u64,
    pub blocks: usize,
    pub edges: usize,
    pub subsections: usize,
}

pub fn parse_outline(content: &str) -> Result<Outline> {
    toml::from_str(content).with_context(|| "Failed to parse course outline")
}

/// Flattened outline: blocks in definition order and edges in child order.
struct Flattened {
    blocks: Vec<BlockData>,
    edges: Vec<(UsageKey, UsageKey)>,
}

fn flatten(outline: &Outline) -> Result<Flattened> {
    let mut flat = Flattened {
        blocks: Vec::new(),
        edges: Vec::new(),
    };
    let mut seen = BTreeSet::new();
    let mut links = Vec::new();
    walk(&outline.course, &outline.root, false, &mut flat, &mut seen, &mut links)?;

    for (parent, link) in links {
        let Some((block_type, block_id)) = link.split_once('/') else {
            bail!("link '{}' under {} must be written as type/id", link, parent);
        };
        let child = outline
            .course
            .try_usage_key(block_type, block_id)
            .with_context(|| format!("link '{}' under {} is not a valid block reference", link, parent))?;
        if !seen.contains(&child) {
            bail!("link '{}' under {} points at an undefined block", link, parent);
        }
        flat.edges.push((parent, child));
    }
    Ok(flat)
}

fn walk(
    course: &CourseKey,
    node: &OutlineNode,
    inherited_graded: bool,
    flat: &mut Flattened,
    seen: &mut BTreeSet<UsageKey>,
    links: &mut Vec<(UsageKey, String)>,
) -> Result<UsageKey> {
    if node.block_type.is_empty() || node.id.is_empty() {
        bail!("every outline block needs a non-empty type and id");
    }
    let usage = course
        .try_usage_key(&node.block_type, &node.id)
        .with_context(|| {
            format!(
                "block '{}/{}' may only use letters, digits, '_', '-', '.', '~' and '%'",
                node.block_type, node.id
            )
        })?;
    if !seen.insert(usage.clone()) {
        bail!("block {} is defined twice; use `links` to reuse it", usage);
    }

    let graded = node.graded.unwrap_or(inherited_graded);
    let mut block = BlockData::new(usage.clone());
    block.display_name = node.display_name.clone().unwrap_or_else(|| node.id.clone());
    block.graded = graded;
    block.has_score = node.has_score.unwrap_or(node.max_score.is_some());
    block.weight = node.weight;
    block.max_score = node.max_score;
    block.visible_to_staff_only = node.visible_to_staff_only;
    block.start = node.start.as_deref().map(parse_start).transpose()?;
    for (partition, groups) in &node.group_access {
        let partition: u32 = partition
            .parse()
            .with_context(|| format!("group_access partition '{}' on {} is not a number", partition, usage))?;
        block.group_access.insert(partition, groups.iter().copied().collect());
    }
    if let Some(weight) = block.weight {
        if weight < 0.0 {
            bail!("weight on {} must be >= 0", usage);
        }
    }
    flat.blocks.push(block);

    for child in &node.children {
        let child_usage = walk(course, child, graded, flat, seen, links)?;
        flat.edges.push((usage.clone(), child_usage));
    }
    for link in &node.links {
        links.push((usage.clone(), link.clone()));
    }
    Ok(usage)
}

fn parse_start(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("start '{}' is not an RFC 3339 timestamp", s))?
        .with_timezone(&Utc))
}

/// Validate an outline by building the snapshot it describes.
pub fn validate(outline: &Outline, version: u64) -> Result<CourseStructure> {
    let flat = flatten(outline)?;
    let root = outline
        .course
        .try_usage_key(&outline.root.block_type, &outline.root.id)?;
    let mut builder = CourseStructureBuilder::new(outline.course.clone(), version, root);
    for block in flat.blocks {
        builder.add_block(block);
    }
    for (parent, child) in flat.edges {
        builder.add_edge(parent, child);
    }
    Ok(builder.build()?)
}

/// Replace a course's content with `outline`, bumping its version.
///
/// Returns the snapshot that was written so callers can publish it.
pub async fn import_outline(
    store: &SqliteStore,
    outline: &Outline,
) -> Result<(ImportSummary, CourseStructure)> {
    let pool: &SqlitePool = store.pool();
    let version = store.course_version(&outline.course).await?.unwrap_or(0) + 1;

    let structure = validate(outline, version)
        .with_context(|| format!("Invalid outline for {}", outline.course))?;
    let flat = flatten(outline)?;
    let course_id = outline.course.to_string();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO courses (course_key, version, root, updated_at) VALUES (?, ?, ?, ?)
        ON CONFLICT(course_key) DO UPDATE SET
            version = excluded.version,
            root = excluded.root,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&course_id)
    .bind(version as i64)
    .bind(structure.root().to_string())
    .bind(Utc::now().timestamp())
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM course_edges WHERE course_key = ?")
        .bind(&course_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM course_blocks WHERE course_key = ?")
        .bind(&course_id)
        .execute(&mut *tx)
        .await?;

    // Only blocks that survived pruning are stored.
    let mut blocks = 0;
    for block in flat.blocks.iter().filter(|b| structure.has_block(&b.usage)) {
        sqlx::query(
            "INSERT INTO course_blocks (course_key, usage_key, block_type, data_json) VALUES (?, ?, ?, ?)",
        )
        .bind(&course_id)
        .bind(block.usage.to_string())
        .bind(block.block_type())
        .bind(serde_json::to_string(block)?)
        .execute(&mut *tx)
        .await?;
        blocks += 1;
    }

    let mut edges = 0;
    for parent in structure.topological_order() {
        for (position, child) in structure.children(parent).iter().enumerate() {
            sqlx::query(
                "INSERT INTO course_edges (course_key, parent, child, position) VALUES (?, ?, ?, ?)",
            )
            .bind(&course_id)
            .bind(parent.to_string())
            .bind(child.to_string())
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
            edges += 1;
        }
    }

    tx.commit().await?;

    let subsections = structure
        .topological_order()
        .iter()
        .filter(|u| u.block_type() == grade_recompute_core::transform::SUBSECTION_BLOCK_TYPE)
        .count();

    tracing::info!(course = %outline.course, version, blocks, edges, "course outline imported");
    let summary = ImportSummary {
        course: outline.course.clone(),
        version,
        blocks,
        edges,
        subsections,
    };
    Ok((summary, structure))
}

/// CLI entry point for `gradectl course import`.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read outline: {}", path.display()))?;
    let outline = parse_outline(&content)?;

    let service = GradeService::connect(config).await?;
    let summary = service.import_outline(&outline).await?;
    service.close().await;

    println!("Imported {}", summary.course);
    println!("  version:     {}", summary.version);
    println!("  blocks:      {}", summary.blocks);
    println!("  edges:       {}", summary.edges);
    println!("  subsections: {}", summary.subsections);
    Ok(())
}
