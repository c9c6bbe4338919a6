//! Client-side control plane for the scene-based video production
//! pipeline's browser UI.
//!
//! This crate owns no rendering: it is the orchestration layer a UI
//! framework sits on top of -- HTTP client, job supervision, lifecycle
//! gating, and the chat-edit pipeline -- ported out of the page-global
//! mutable state the legacy implementation kept on `window.*` into typed,
//! lock-guarded components behind [`app_context::AppContext`].

pub mod app_context;
pub mod builder_wizard;
pub mod bulk_audio;
pub mod bulk_image;
pub mod chat_edit;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod playback_context;
pub mod preflight;
pub mod project_store;
pub mod rebake_cache;
pub mod scene_edit;
pub mod scene_format;
pub mod supervisor;
pub mod tab_router;
pub mod video_build;

pub use app_context::AppContext;
pub use error::{Error, Result};
