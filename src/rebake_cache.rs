//! Rebake Status Cache (C14, spec §4.15): a 30s TTL cache over
//! `GET /projects/:id/comic/rebake-status`'s per-scene rebake snapshot, so
//! scrolling the Builder scene list doesn't re-fetch it on every render.

use crate::error::Result;
use crate::http::{HttpClient, RequestKind};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebakeBadge {
    Pending,
    Outdated,
    Current,
    NoPublish,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneRebakeStatus {
    pub scene_id: String,
    pub status: RebakeBadge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RebakeSummary {
    pub pending: u32,
    pub outdated: u32,
    pub current: u32,
    pub no_publish: u32,
    pub total: u32,
}

/// The full snapshot `GET /projects/:id/comic/rebake-status` returns
/// (spec §4.15).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RebakeStatusSnapshot {
    pub project_telops_comic: bool,
    pub scenes: Vec<SceneRebakeStatus>,
    pub summary: RebakeSummary,
}

impl RebakeStatusSnapshot {
    /// The badge a single scene's rebake-status row renders.
    pub fn scene_status(&self, scene_id: &str) -> Option<RebakeBadge> {
        self.scenes.iter().find(|s| s.scene_id == scene_id).map(|s| s.status)
    }
}

struct Entry {
    snapshot: RebakeStatusSnapshot,
    cached_at: Instant,
}

/// `window.rebakeStatusCache` (spec §5). Invalidation happens explicitly,
/// not only by TTL expiry -- any write that could change bake eligibility
/// (comic rebake, bulk rebake, or a chat-edit that requests auto-rebake)
/// calls [`invalidate`] rather than waiting out the TTL.
#[derive(Default)]
pub struct RebakeStatusCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl RebakeStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cached, still-fresh snapshot for `project_id`, or `None`
    /// if absent/expired -- the caller is expected to refetch and [`put`].
    pub fn get(&self, project_id: &str) -> Option<RebakeStatusSnapshot> {
        let entries = self.entries.read().unwrap();
        entries.get(project_id).and_then(|entry| {
            if entry.cached_at.elapsed() < TTL {
                Some(entry.snapshot.clone())
            } else {
                None
            }
        })
    }

    pub fn put(&self, project_id: &str, snapshot: RebakeStatusSnapshot) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            project_id.to_string(),
            Entry {
                snapshot,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, project_id: &str) {
        self.entries.write().unwrap().remove(project_id);
    }

    pub fn invalidate_all(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unconditionally fetches the current rebake snapshot (spec §6: `GET
/// /projects/:id/comic/rebake-status`), bypassing the cache.
pub async fn fetch_rebake_status(http: &Arc<dyn HttpClient>, project_id: &str) -> Result<RebakeStatusSnapshot> {
    let body = http
        .get(&format!("/projects/{project_id}/comic/rebake-status"), RequestKind::LightRead)
        .await?;
    Ok(serde_json::from_value(body)?)
}

/// Cache-first read: returns the cached snapshot if still fresh, otherwise
/// fetches, caches, and returns the new one.
pub async fn get_or_fetch_rebake_status(
    http: &Arc<dyn HttpClient>,
    cache: &RebakeStatusCache,
    project_id: &str,
) -> Result<RebakeStatusSnapshot> {
    if let Some(snapshot) = cache.get(project_id) {
        return Ok(snapshot);
    }
    let snapshot = fetch_rebake_status(http, project_id).await?;
    cache.put(project_id, snapshot.clone());
    Ok(snapshot)
}

/// Triggers a full comic rebake (spec §6: `POST /projects/:id/comic/rebake`)
/// and invalidates the cached snapshot, since the rebake changes every
/// scene's status.
pub async fn trigger_rebake(http: &Arc<dyn HttpClient>, cache: &RebakeStatusCache, project_id: &str) -> Result<()> {
    http.post(&format!("/projects/{project_id}/comic/rebake"), json!({}), RequestKind::SynchronousBulk)
        .await?;
    cache.invalidate(project_id);
    Ok(())
}
