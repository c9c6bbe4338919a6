//! Toast notifications and button-state lifecycle (C2, spec §4.2).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub message: String,
    pub severity: Severity,
}

/// Non-queued: the latest toast wins and is shown for [`Toaster::DURATION`].
/// Matches the legacy "latest wins" semantics exactly -- a second toast
/// before the first's timer elapses replaces it rather than stacking.
pub struct Toaster {
    current: Mutex<Option<Toast>>,
}

impl Default for Toaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Toaster {
    pub const DURATION: Duration = Duration::from_secs(3);

    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    pub fn show(&self, message: impl Into<String>, severity: Severity) {
        let message = message.into();
        tracing::debug!(%message, ?severity, "toast shown");
        *self.current.lock().unwrap() = Some(Toast { message, severity });
    }

    pub fn current(&self) -> Option<Toast> {
        self.current.lock().unwrap().clone()
    }

    /// Called when the 3s display window elapses; idempotent.
    pub fn clear(&self) {
        *self.current.lock().unwrap() = None;
    }
}

/// A button's rendered state, independent of *why* it is in that state --
/// [`crate::supervisor`] and friends compute the reason, this just carries
/// the label/enabled pair the surface renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonView {
    pub label: String,
    pub enabled: bool,
}

/// Tracks the original label per button id so it can be restored exactly,
/// safe under repeated start/stop calls from the same or different
/// supervisors touching the same button.
#[derive(Default)]
pub struct ButtonStateRegistry {
    original_labels: Mutex<HashMap<String, String>>,
}

impl ButtonStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the button to a loading view, remembering `original_label` the
    /// first time (repeated calls do not clobber the remembered original).
    pub fn set_loading(&self, id: &str, original_label: &str, loading_label: &str) -> ButtonView {
        let mut labels = self.original_labels.lock().unwrap();
        labels
            .entry(id.to_string())
            .or_insert_with(|| original_label.to_string());
        ButtonView {
            label: loading_label.to_string(),
            enabled: false,
        }
    }

    /// Restores the remembered original label, or falls back to `fallback`
    /// if this id was never put into loading state.
    pub fn release(&self, id: &str, fallback: &str) -> ButtonView {
        let mut labels = self.original_labels.lock().unwrap();
        let label = labels.remove(id).unwrap_or_else(|| fallback.to_string());
        ButtonView {
            label,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_toast_wins() {
        let toaster = Toaster::new();
        toaster.show("first", Severity::Info);
        toaster.show("second", Severity::Error);
        let current = toaster.current().unwrap();
        assert_eq!(current.message, "second");
        assert_eq!(current.severity, Severity::Error);
    }

    #[test]
    fn button_state_restores_original_across_repeated_calls() {
        let registry = ButtonStateRegistry::new();
        let loading = registry.set_loading("btn1", "画像生成", "生成中...");
        assert!(!loading.enabled);
        // A second set_loading before release must not overwrite the remembered original.
        let loading2 = registry.set_loading("btn1", "IGNORED", "生成中 50%");
        assert_eq!(loading2.label, "生成中 50%");

        let released = registry.release("btn1", "fallback");
        assert_eq!(released.label, "画像生成");
        assert!(released.enabled);
    }

    #[test]
    fn release_without_prior_loading_uses_fallback() {
        let registry = ButtonStateRegistry::new();
        let released = registry.release("never-started", "再生成");
        assert_eq!(released.label, "再生成");
        assert!(released.enabled);
    }
}
