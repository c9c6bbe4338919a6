//! Tab Router (C15, spec §4.15): persists the last active tab across
//! reloads and delegates every access decision to [`crate::lifecycle`]
//! rather than duplicating the gating rules.

use crate::lifecycle::{can_access, TabId};
use crate::model::ProjectStatus;

/// Storage seam (spec §4.15: "localStorage-backed"). A real UI backs this
/// with `localStorage`; tests use an in-memory double.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

const STORAGE_KEY: &str = "lastActiveTab";

fn tab_to_key(tab: TabId) -> &'static str {
    match tab {
        TabId::Input => "input",
        TabId::Styles => "styles",
        TabId::SceneSplit => "scene_split",
        TabId::Builder => "builder",
        TabId::Export => "export",
        TabId::VideoBuild => "video_build",
    }
}

fn key_to_tab(key: &str) -> Option<TabId> {
    match key {
        "input" => Some(TabId::Input),
        "styles" => Some(TabId::Styles),
        "scene_split" => Some(TabId::SceneSplit),
        "builder" => Some(TabId::Builder),
        "export" => Some(TabId::Export),
        "video_build" => Some(TabId::VideoBuild),
        _ => None,
    }
}

pub struct TabRouter<S: Storage> {
    storage: S,
}

impl<S: Storage> TabRouter<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Restores the persisted tab, falling back to `Input` if nothing was
    /// stored, the stored value is unrecognized, or the project's current
    /// status no longer permits access to it (spec §4.15: a tab that was
    /// valid before a project reset must not silently become selected).
    pub fn restore(&self, status: ProjectStatus) -> TabId {
        self.storage
            .get(STORAGE_KEY)
            .and_then(|raw| key_to_tab(&raw))
            .filter(|tab| can_access(*tab, status))
            .unwrap_or(TabId::Input)
    }

    /// Attempts to navigate to `tab`. Persists and returns `true` only if
    /// the project's status currently permits the tab; otherwise the
    /// router leaves the stored value untouched and returns `false`.
    pub fn navigate(&self, tab: TabId, status: ProjectStatus) -> bool {
        if !can_access(tab, status) {
            return false;
        }
        self.storage.set(STORAGE_KEY, tab_to_key(tab));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStorage {
        values: Mutex<Option<String>>,
    }

    impl Storage for MemoryStorage {
        fn get(&self, _key: &str) -> Option<String> {
            self.values.lock().unwrap().clone()
        }

        fn set(&self, _key: &str, value: &str) {
            *self.values.lock().unwrap() = Some(value.to_string());
        }
    }

    #[test]
    fn restore_defaults_to_input_when_nothing_stored() {
        let router = TabRouter::new(MemoryStorage::default());
        assert_eq!(router.restore(ProjectStatus::Created), TabId::Input);
    }

    #[test]
    fn navigate_then_restore_round_trips() {
        let router = TabRouter::new(MemoryStorage::default());
        assert!(router.navigate(TabId::SceneSplit, ProjectStatus::Uploaded));
        assert_eq!(router.restore(ProjectStatus::Uploaded), TabId::SceneSplit);
    }

    #[test]
    fn navigate_refuses_a_tab_the_status_does_not_permit() {
        let router = TabRouter::new(MemoryStorage::default());
        assert!(!router.navigate(TabId::Builder, ProjectStatus::Created));
        // Nothing was persisted, so restore still falls back to Input.
        assert_eq!(router.restore(ProjectStatus::Created), TabId::Input);
    }

    #[test]
    fn restore_falls_back_when_project_regressed_below_the_stored_tab() {
        let router = TabRouter::new(MemoryStorage::default());
        router.navigate(TabId::Builder, ProjectStatus::Formatted);
        // Project later fails; the stored Builder tab is no longer valid.
        assert_eq!(router.restore(ProjectStatus::Failed), TabId::Input);
    }
}
