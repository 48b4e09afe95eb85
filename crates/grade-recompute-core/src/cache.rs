//! Course structure cache.
//!
//! [`StructureCache`] sits in front of a [`StructureProvider`] (the
//! expensive build from durable course content) and hands out shared,
//! immutable `Arc<CourseStructure>` snapshots. Course edits publish a new
//! snapshot wholesale via [`StructureCache::replace`]; stale entries also
//! age out after the configured TTL. Nothing mutates a snapshot in place.

use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::keys::CourseKey;
use crate::structure::CourseStructure;

/// Builds a snapshot from durable course content.
#[async_trait]
pub trait StructureProvider: Send + Sync {
    /// Build a fresh snapshot. `Ok(None)` means the course does not exist.
    async fn build(&self, course: &CourseKey) -> Result<Option<CourseStructure>>;
}

/// Hands out snapshots, building on a miss.
#[async_trait]
pub trait StructureLoader: Send + Sync {
    /// `Ok(None)` means the course does not exist.
    async fn load(&self, course: &CourseKey) -> Result<Option<Arc<CourseStructure>>>;
}

/// Capacity and expiry for [`StructureCache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_courses: u64,
    /// Snapshots older than this are rebuilt on next access.
    pub time_to_live: Option<Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_courses: 256,
            time_to_live: Some(Duration::from_secs(24 * 3600)),
        }
    }
}

/// Bounded, TTL'd snapshot cache keyed by course.
pub struct StructureCache {
    provider: Arc<dyn StructureProvider>,
    cache: Cache<CourseKey, Arc<CourseStructure>>,
}

impl StructureCache {
    pub fn new(provider: Arc<dyn StructureProvider>, settings: &CacheSettings) -> Self {
        let mut builder = Cache::builder().max_capacity(settings.max_courses);
        if let Some(ttl) = settings.time_to_live {
            builder = builder.time_to_live(ttl);
        }
        Self {
            provider,
            cache: builder.build(),
        }
    }

    /// Publish a freshly built snapshot, replacing any cached one.
    pub async fn replace(&self, structure: CourseStructure) -> Arc<CourseStructure> {
        let structure = Arc::new(structure);
        self.cache
            .insert(structure.course().clone(), Arc::clone(&structure))
            .await;
        structure
    }
}

#[async_trait]
impl StructureLoader for StructureCache {
    async fn load(&self, course: &CourseKey) -> Result<Option<Arc<CourseStructure>>> {
        if let Some(hit) = self.cache.get(course).await {
            tracing::trace!(%course, version = hit.version(), "structure cache hit");
            return Ok(Some(hit));
        }

        tracing::debug!(%course, "structure cache miss, building snapshot");
        let Some(structure) = self.provider.build(course).await? else {
            return Ok(None);
        };
        Ok(Some(self.replace(structure).await))
    }
}
