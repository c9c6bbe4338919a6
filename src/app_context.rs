//! `AppContext`: the single owner of every shared mutable slot the legacy
//! implementation kept on `window.*` (spec §5 "Shared resources", §9
//! "Global mutable state"). Components take `&AppContext` (or an `Arc` of
//! it) instead of reaching for module-level globals; nothing in this crate
//! defines a `static` for request-scoped state.

use crate::http::HttpClient;
use crate::model::{PatchRequest, Scene, VideoBuild};
use crate::notify::{ButtonStateRegistry, Toaster};
use crate::preflight::PreflightReport;
use crate::project_store::ProjectStore;
use crate::rebake_cache::RebakeStatusCache;
use crate::supervisor::JobSupervisor;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// `window.chatEditState` (spec §5): the in-progress chat-edit session,
/// owned here so C12 and C16 can both read/write it without a global.
#[derive(Debug, Clone, Default)]
pub struct ChatEditState {
    pub playback_context: Option<crate::playback_context::PlaybackContext>,
    pub pending_scroll_to_build_id: Option<String>,
    pub send_in_flight: bool,
    pub apply_in_flight: bool,
}

pub struct AppContext {
    pub http: Arc<dyn HttpClient>,
    pub store: ProjectStore,
    pub supervisor: JobSupervisor,
    pub toaster: Toaster,
    pub buttons: ButtonStateRegistry,
    pub rebake_cache: RebakeStatusCache,

    /// `window.lastLoadedScenes`.
    last_loaded_scenes: RwLock<Vec<Scene>>,
    /// `window.videoBuildListCache`.
    video_build_cache: RwLock<Vec<VideoBuild>>,
    /// `window.videoBuildPreflightCache`.
    preflight_cache: RwLock<Option<PreflightReport>>,
    /// `window.missingAudioSceneIds`.
    missing_audio_scene_ids: RwLock<HashSet<String>>,
    /// `window.videoBuildStartInFlight`.
    video_build_start_in_flight: RwLock<bool>,
    /// `window.videoBuildRefreshUrlInFlight[buildId]`.
    video_build_refresh_in_flight: RwLock<HashSet<String>>,
    /// `window.chatEditState`.
    chat_edit_state: RwLock<ChatEditState>,
    /// Outstanding chat-edit patch requests, keyed by id (for the explain panel).
    patches: RwLock<Vec<PatchRequest>>,
}

impl AppContext {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            store: ProjectStore::new(),
            supervisor: JobSupervisor::new(),
            toaster: Toaster::new(),
            buttons: ButtonStateRegistry::new(),
            rebake_cache: RebakeStatusCache::new(),
            last_loaded_scenes: RwLock::new(Vec::new()),
            video_build_cache: RwLock::new(Vec::new()),
            preflight_cache: RwLock::new(None),
            missing_audio_scene_ids: RwLock::new(HashSet::new()),
            video_build_start_in_flight: RwLock::new(false),
            video_build_refresh_in_flight: RwLock::new(HashSet::new()),
            chat_edit_state: RwLock::new(ChatEditState::default()),
            patches: RwLock::new(Vec::new()),
        }
    }

    pub fn set_last_loaded_scenes(&self, scenes: Vec<Scene>) {
        *self.last_loaded_scenes.write().unwrap() = scenes;
    }

    pub fn last_loaded_scenes(&self) -> Vec<Scene> {
        self.last_loaded_scenes.read().unwrap().clone()
    }

    pub fn set_video_build_cache(&self, builds: Vec<VideoBuild>) {
        *self.video_build_cache.write().unwrap() = builds;
    }

    pub fn video_build_cache(&self) -> Vec<VideoBuild> {
        self.video_build_cache.read().unwrap().clone()
    }

    pub fn set_preflight_cache(&self, report: PreflightReport) {
        *self.preflight_cache.write().unwrap() = Some(report);
    }

    pub fn preflight_cache(&self) -> Option<PreflightReport> {
        self.preflight_cache.read().unwrap().clone()
    }

    pub fn invalidate_preflight_cache(&self) {
        *self.preflight_cache.write().unwrap() = None;
    }

    /// `can_generate` is cached and is the source of truth for the
    /// "generate" build button (spec §4.10).
    pub fn can_generate(&self) -> bool {
        self.preflight_cache()
            .is_some_and(|report| report.can_generate)
    }

    pub fn set_missing_audio_scene_ids(&self, ids: HashSet<String>) {
        *self.missing_audio_scene_ids.write().unwrap() = ids;
    }

    pub fn missing_audio_scene_ids(&self) -> HashSet<String> {
        self.missing_audio_scene_ids.read().unwrap().clone()
    }

    /// Anti-double-submit guard (spec §4.11, §5). Returns `true` iff this
    /// call acquired the flag; a second concurrent caller gets `false` and
    /// must silently no-op.
    pub fn try_start_video_build_submit(&self) -> bool {
        let mut flag = self.video_build_start_in_flight.write().unwrap();
        if *flag {
            false
        } else {
            *flag = true;
            true
        }
    }

    pub fn finish_video_build_submit(&self) {
        *self.video_build_start_in_flight.write().unwrap() = false;
    }

    pub fn try_start_refresh_url(&self, build_id: &str) -> bool {
        self.video_build_refresh_in_flight
            .write()
            .unwrap()
            .insert(build_id.to_string())
    }

    pub fn finish_refresh_url(&self, build_id: &str) {
        self.video_build_refresh_in_flight
            .write()
            .unwrap()
            .remove(build_id);
    }

    pub fn chat_edit_state(&self) -> ChatEditState {
        self.chat_edit_state.read().unwrap().clone()
    }

    pub fn with_chat_edit_state<R>(&self, f: impl FnOnce(&mut ChatEditState) -> R) -> R {
        f(&mut self.chat_edit_state.write().unwrap())
    }

    pub fn push_patch(&self, patch: PatchRequest) {
        self.patches.write().unwrap().push(patch);
    }

    pub fn patches(&self) -> Vec<PatchRequest> {
        self.patches.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StaticHttpClient;

    fn ctx() -> AppContext {
        AppContext::new(Arc::new(StaticHttpClient::new()))
    }

    #[test]
    fn video_build_submit_guard_is_single_admission() {
        let ctx = ctx();
        assert!(ctx.try_start_video_build_submit());
        assert!(!ctx.try_start_video_build_submit());
        ctx.finish_video_build_submit();
        assert!(ctx.try_start_video_build_submit());
    }

    #[test]
    fn refresh_url_guard_is_per_build_id() {
        let ctx = ctx();
        assert!(ctx.try_start_refresh_url("b1"));
        assert!(!ctx.try_start_refresh_url("b1"));
        assert!(ctx.try_start_refresh_url("b2"));
        ctx.finish_refresh_url("b1");
        assert!(ctx.try_start_refresh_url("b1"));
    }

    #[test]
    fn can_generate_reflects_cached_preflight() {
        let ctx = ctx();
        assert!(!ctx.can_generate());
    }
}
