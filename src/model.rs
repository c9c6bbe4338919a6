//! Server-authoritative data model (spec §3).
//!
//! The client only ever holds short-lived mirror copies of these types;
//! nothing here is mutated except by replacing a whole value read back from
//! the server (see [`crate::project_store`]).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Text,
    Audio,
}

/// `preserve|ai` is the canonical (server) vocabulary; `raw|optimized` is the
/// legacy UI vocabulary. Both directions normalize at the UI boundary
/// (spec §3, §4.6, §9 "Preserving legacy split-mode vocabulary").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    Preserve,
    Ai,
}

impl SplitMode {
    pub fn from_legacy(s: &str) -> Option<Self> {
        match s {
            "preserve" | "raw" => Some(Self::Preserve),
            "ai" | "optimized" => Some(Self::Ai),
            _ => None,
        }
    }

    /// The legacy UI label for this mode.
    pub fn legacy_label(self) -> &'static str {
        match self {
            Self::Preserve => "raw",
            Self::Ai => "optimized",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPreset {
    YtLong,
    ShortVertical,
    YtShorts,
    Reels,
    TikTok,
}

impl OutputPreset {
    pub fn aspect_ratio(self) -> &'static str {
        match self {
            Self::YtLong => "16:9",
            Self::ShortVertical | Self::YtShorts | Self::Reels | Self::TikTok => "9:16",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::YtLong => "YouTube (long form)",
            Self::ShortVertical => "Vertical short",
            Self::YtShorts => "YouTube Shorts",
            Self::Reels => "Instagram Reels",
            Self::TikTok => "TikTok",
        }
    }
}

/// Ordered project lifecycle (spec §4.4). `Failed` sits off to the side and
/// is reachable from any in-progress status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Created,
    Uploaded,
    Transcribing,
    Transcribed,
    Parsing,
    Parsed,
    Formatting,
    Formatted,
    GeneratingImages,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub source_type: SourceType,
    pub source_text: Option<String>,
    pub status: ProjectStatus,
    pub split_mode: SplitMode,
    pub target_scene_count: u32,
    #[serde(default)]
    pub settings: ProjectSettings,
    pub output_preset: OutputPreset,
    pub narration_voice_override: Option<String>,
}

impl Project {
    pub const MIN_TARGET_SCENE_COUNT: u32 = 1;
    pub const MAX_TARGET_SCENE_COUNT: u32 = 200;
    pub const MAX_BUILDABLE_SCENE_COUNT: usize = 100;

    pub fn target_scene_count_in_range(count: u32) -> bool {
        (Self::MIN_TARGET_SCENE_COUNT..=Self::MAX_TARGET_SCENE_COUNT).contains(&count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayAssetType {
    Image,
    Comic,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextRenderMode {
    Baked,
    Remotion,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtteranceStatus {
    pub total: u32,
    pub with_audio: u32,
    pub total_duration_ms: u64,
    pub is_ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SfxCue {
    pub name: String,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    pub volume: f32,
    pub r#loop: bool,
    pub r2_url: Option<String>,
    /// 1-based within-scene index, the handle chat-edit actions address
    /// cues by (`sfx.set_volume`, `sfx.remove`, ...).
    pub display_number: u32,
}

/// A per-assigned-character override for a scene, layer C in the trait
/// hierarchy (spec §4.9): overrides the project-defined layers B
/// (character default) and A (global default) for this scene only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneTrait {
    pub character_key: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneBgm {
    pub track_id: String,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    pub volume_override: Option<f32>,
    pub loop_override: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: String,
    pub scene_id: String,
    pub status: GenerationStatus,
    pub r2_url: Option<String>,
    pub prompt: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub is_active: bool,
}

impl GenerationRecord {
    /// Only completed records with a URL are eligible for adoption/download.
    pub fn is_adoptable(&self) -> bool {
        self.status == GenerationStatus::Completed && self.r2_url.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    /// 1-based, dense within the visible set; negative once hidden.
    pub idx: i32,
    pub role: String,
    pub title: String,
    pub dialogue: String,
    pub bullets: Vec<String>,
    pub image_prompt: String,
    pub style_preset_id: Option<String>,
    pub display_asset_type: DisplayAssetType,
    pub text_render_mode: TextRenderMode,
    pub duration_override_ms: Option<u64>,
    pub chunk_id: Option<String>,
    pub hidden_at: Option<chrono::DateTime<chrono::Utc>>,

    pub active_image: Option<GenerationRecord>,
    pub active_comic: Option<GenerationRecord>,
    pub active_video: Option<GenerationRecord>,
    pub latest_image: Option<GenerationRecord>,

    /// At most 3 assigned image characters (spec §3 invariant).
    pub characters: Vec<String>,
    pub voice_character: Option<String>,
    pub utterance_status: UtteranceStatus,
    pub scene_bgm: Option<SceneBgm>,
    pub sfx: Vec<SfxCue>,
    pub motion_preset_id: Option<String>,
    #[serde(default)]
    pub scene_traits: Vec<SceneTrait>,
}

impl Scene {
    pub const MAX_IMAGE_CHARACTERS: usize = 3;

    pub fn is_hidden(&self) -> bool {
        self.hidden_at.is_some() || self.idx < 0
    }

    /// Invariant: display_asset_type=comic ⇒ text_render_mode=baked.
    pub fn display_mode_is_consistent(&self) -> bool {
        self.display_asset_type != DisplayAssetType::Comic
            || self.text_render_mode == TextRenderMode::Baked
    }

    /// Invariant: voice character, if set, must be an assigned image
    /// character, or null (narrator).
    pub fn voice_character_is_consistent(&self) -> bool {
        match &self.voice_character {
            None => true,
            Some(voice) => self.characters.iter().any(|c| c == voice),
        }
    }

    pub fn image_character_count_is_valid(&self) -> bool {
        self.characters.len() <= Self::MAX_IMAGE_CHARACTERS
    }

    pub fn adopted_asset(&self) -> Option<&GenerationRecord> {
        match self.display_asset_type {
            DisplayAssetType::Image => self.active_image.as_ref(),
            DisplayAssetType::Comic => self.active_comic.as_ref(),
            DisplayAssetType::Video => self.active_video.as_ref(),
        }
    }

    pub fn has_adopted_asset(&self) -> bool {
        self.adopted_asset().is_some_and(GenerationRecord::is_adoptable)
    }

    pub fn has_any_audio(&self) -> bool {
        self.voice_character.is_some() || self.utterance_status.with_audio > 0
    }

    pub fn has_bgm(&self) -> bool {
        self.scene_bgm.is_some()
    }

    pub fn has_sfx(&self) -> bool {
        !self.sfx.is_empty()
    }
}

/// Invariant checks over a whole visible-scene list (spec §8.1).
pub fn visible_idx_is_dense(scenes: &[Scene]) -> bool {
    let mut visible: Vec<i32> = scenes
        .iter()
        .filter(|s| !s.is_hidden())
        .map(|s| s.idx)
        .collect();
    visible.sort_unstable();
    let mut seen = HashSet::new();
    for idx in &visible {
        if !seen.insert(*idx) {
            return false;
        }
    }
    visible
        .iter()
        .enumerate()
        .all(|(i, idx)| *idx == i32::try_from(i + 1).unwrap_or(i32::MAX))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoBuildStatus {
    Queued,
    Validating,
    Submitted,
    Rendering,
    Uploading,
    RetryWait,
    Completed,
    Failed,
    Cancelled,
}

impl VideoBuildStatus {
    /// Statuses the poller keeps refreshing (spec §4.11).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued
                | Self::Validating
                | Self::Submitted
                | Self::Rendering
                | Self::Uploading
                | Self::RetryWait
        )
    }

    /// `RetryWait` is active but not refreshed -- the server cron retries it.
    pub fn should_refresh(self) -> bool {
        self.is_active() && self != Self::RetryWait
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionSummary {
    pub has_voice: bool,
    pub has_bgm: bool,
    pub has_sfx: bool,
    pub is_silent: bool,
    pub balloon_count: u32,
    pub balloon_policy_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoBuild {
    pub id: String,
    pub project_id: String,
    pub status: VideoBuildStatus,
    pub progress_percent: u8,
    pub progress_stage: String,
    pub settings_json: serde_json::Value,
    pub expression_summary: Option<ExpressionSummary>,
    pub download_url: Option<String>,
    pub render_started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub render_completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub retry_count: u32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub generated_video_build_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Draft,
    DryRunOk,
    DryRunFailed,
    ApplyOk,
    ApplyFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRequest {
    pub id: String,
    pub user_message: String,
    pub ops_json: serde_json::Value,
    pub source: String,
    pub status: PatchStatus,
    pub generated_video_build_id: Option<String>,
}
