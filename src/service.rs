//! Wiring of the recalculation pipeline from configuration.

use anyhow::Result;
use std::sync::Arc;

use grade_recompute_core::cache::StructureCache;
use grade_recompute_core::Recalculator;

use crate::config::Config;
use crate::course_import::{self, ImportSummary, Outline};
use crate::db;
use crate::dispatch::TaskDispatcher;
use crate::sqlite_store::SqliteStore;

/// Everything a command needs to record scores and recalculate grades.
pub struct GradeService {
    pub store: Arc<SqliteStore>,
    pub structures: Arc<StructureCache>,
    pub recalculator: Arc<Recalculator>,
}

impl GradeService {
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let store = Arc::new(SqliteStore::new(pool));
        let structures = Arc::new(StructureCache::new(
            store.clone(),
            &config.cache.settings(),
        ));
        let recalculator = Recalculator::with_store(
            Arc::new(config.grades.clone()),
            structures.clone(),
            store.clone(),
        );

        Ok(Self {
            store,
            structures,
            recalculator: Arc::new(recalculator),
        })
    }

    /// Import an outline and publish its snapshot to the structure cache,
    /// replacing whatever version was cached before.
    pub async fn import_outline(&self, outline: &Outline) -> Result<ImportSummary> {
        let (summary, structure) = course_import::import_outline(&self.store, outline).await?;
        self.structures.replace(structure).await;
        Ok(summary)
    }

    pub fn dispatcher(&self, config: &Config) -> TaskDispatcher {
        TaskDispatcher::start(Arc::clone(&self.recalculator), &config.worker)
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course_import::parse_outline;
    use crate::migrate;
    use grade_recompute_core::cache::StructureLoader;
    use grade_recompute_core::transform::affected_subsections;
    use tempfile::TempDir;

    const V1: &str = r#"
course = "course-v1:edX+DemoX+2024"
[root]
type = "course"
id = "course"
[[root.children]]
type = "sequential"
id = "hw1"
[[root.children.children]]
type = "problem"
id = "p1"
max_score = 1.0
"#;

    const V2: &str = r#"
course = "course-v1:edX+DemoX+2024"
[root]
type = "course"
id = "course"
[[root.children]]
type = "sequential"
id = "hw1"
[[root.children.children]]
type = "problem"
id = "p1"
max_score = 1.0
[[root.children]]
type = "sequential"
id = "review"
links = ["problem/p1"]
"#;

    #[tokio::test]
    async fn test_reimport_replaces_cached_snapshot() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::with_db(tmp.path().join("grades.sqlite"));
        let service = GradeService::connect(&cfg).await.unwrap();
        migrate::apply(service.store.pool()).await.unwrap();

        let v1 = parse_outline(V1).unwrap();
        service.import_outline(&v1).await.unwrap();
        let cached = service.structures.load(&v1.course).await.unwrap().unwrap();
        assert_eq!(cached.version(), 1);
        let p1 = v1.course.make_usage_key("problem", "p1");
        assert_eq!(affected_subsections(&cached, &p1).len(), 1);

        let v2 = parse_outline(V2).unwrap();
        let summary = service.import_outline(&v2).await.unwrap();
        assert_eq!(summary.version, 2);

        let cached = service.structures.load(&v2.course).await.unwrap().unwrap();
        assert_eq!(cached.version(), 2);
        assert_eq!(affected_subsections(&cached, &p1).len(), 2);

        service.close().await;
    }
}
