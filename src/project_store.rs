//! Process-wide mutable record of the current project (C3, spec §4.3).
//!
//! The legacy implementation kept two untyped globals (`window.currentProject`
//! plus a second "window-scope" alias) in sync by convention, and the spec
//! explicitly calls out historical drift between them as a bug class this
//! component exists to close. A typed `RwLock<Option<Project>>` has no
//! second slot to drift from -- `update_current_project` is the only write
//! path and every reader goes through the same lock.

use crate::model::Project;
use std::sync::RwLock;

#[derive(Default)]
pub struct ProjectStore {
    current: RwLock<Option<Project>>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The *only* mutator. Replaces the whole project in one atomic write.
    pub fn update_current_project(&self, project: Project) {
        tracing::debug!(project_id = %project.id, status = ?project.status, "project store updated");
        *self.current.write().unwrap() = Some(project);
    }

    pub fn clear(&self) {
        *self.current.write().unwrap() = None;
    }

    /// Canonical getter; all UI reads go through this.
    pub fn current(&self) -> Option<Project> {
        self.current.read().unwrap().clone()
    }

    pub fn current_id(&self) -> Option<String> {
        self.current.read().unwrap().as_ref().map(|p| p.id.clone())
    }
}
