//! Preflight Validator (C10, spec §4.10): classifies a project's readiness
//! for a final build into required (blocking) and recommended (warning-only)
//! buckets.

use crate::model::{ExpressionSummary, OutputPreset, Project, Scene};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputPresetSummary {
    pub id: String,
    pub label: String,
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub has_bgm: bool,
    pub has_sfx: bool,
    pub has_voice: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalloonPolicySummary {
    pub total: u32,
    pub always_on: u32,
    pub voice_window: u32,
    pub manual_window: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceError {
    pub scene_id: String,
    pub with_audio: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightReport {
    pub is_ready: bool,
    pub can_generate: bool,
    pub ready_count: u32,
    pub total_count: u32,
    pub missing: Vec<String>,
    pub warnings: Vec<String>,
    pub utterance_errors: Vec<UtteranceError>,
    pub validation: ValidationSummary,
    pub output_preset: OutputPresetSummary,
    pub balloon_policy_summary: BalloonPolicySummary,
    pub expression_summary: Option<ExpressionSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryColor {
    Green,
    Amber,
    Red,
}

impl PreflightReport {
    /// UI color: red when anything blocks the build or the scene cap is
    /// exceeded, amber when only warnings remain, green when fully ready.
    pub fn summary_color(&self) -> SummaryColor {
        if !self.missing.is_empty() || self.total_count as usize > Project::MAX_BUILDABLE_SCENE_COUNT {
            SummaryColor::Red
        } else if !self.warnings.is_empty() {
            SummaryColor::Amber
        } else {
            SummaryColor::Green
        }
    }
}

fn output_preset_summary(preset: OutputPreset) -> OutputPresetSummary {
    let id = match preset {
        OutputPreset::YtLong => "yt_long",
        OutputPreset::ShortVertical => "short_vertical",
        OutputPreset::YtShorts => "yt_shorts",
        OutputPreset::Reels => "reels",
        OutputPreset::TikTok => "tiktok",
    };
    OutputPresetSummary {
        id: id.to_string(),
        label: preset.label().to_string(),
        aspect_ratio: preset.aspect_ratio().to_string(),
    }
}

/// Runs the preflight classification over the project's visible scenes
/// (spec §4.10, §8 boundary: scene count > 100 always fails regardless of
/// asset readiness; audio-job-in-flight gates `can_generate` from outside
/// this function via the caller combining it with the bulk-audio lock).
pub fn run_preflight(project: &Project, scenes: &[Scene], bulk_audio_in_flight: bool) -> PreflightReport {
    let visible: Vec<&Scene> = scenes.iter().filter(|s| !s.is_hidden()).collect();
    let total_count = u32::try_from(visible.len()).unwrap_or(u32::MAX);

    let mut missing = Vec::new();
    let mut ready_count = 0u32;
    for scene in &visible {
        if scene.has_adopted_asset() {
            ready_count += 1;
        } else {
            missing.push(format!(
                "scene {} has no adopted {:?} asset",
                scene.idx, scene.display_asset_type
            ));
        }
    }

    if visible.len() > Project::MAX_BUILDABLE_SCENE_COUNT {
        missing.push(format!(
            "project has {} scenes, exceeding the {}-scene build cap",
            visible.len(),
            Project::MAX_BUILDABLE_SCENE_COUNT
        ));
    }

    let has_voice = visible.iter().any(|s| s.has_any_audio());
    let has_bgm = visible.iter().any(|s| s.has_bgm());
    let has_sfx = visible.iter().any(|s| s.has_sfx());

    let mut warnings = Vec::new();
    if !has_voice && !has_bgm && !has_sfx {
        warnings.push("silent video: no voice, BGM, or SFX detected".to_string());
    }

    let utterance_errors: Vec<UtteranceError> = visible
        .iter()
        .filter(|s| s.utterance_status.total > 0 && !s.utterance_status.is_ready)
        .map(|s| UtteranceError {
            scene_id: s.id.clone(),
            with_audio: s.utterance_status.with_audio,
            total: s.utterance_status.total,
        })
        .collect();
    if !utterance_errors.is_empty() {
        warnings.push(format!(
            "{} scene(s) have incomplete utterance audio",
            utterance_errors.len()
        ));
    }

    let is_ready = missing.is_empty();
    let can_generate = is_ready && !bulk_audio_in_flight;

    PreflightReport {
        is_ready,
        can_generate,
        ready_count,
        total_count,
        missing,
        warnings,
        utterance_errors,
        validation: ValidationSummary {
            has_bgm,
            has_sfx,
            has_voice,
        },
        output_preset: output_preset_summary(project.output_preset),
        balloon_policy_summary: BalloonPolicySummary::default(),
        expression_summary: Some(ExpressionSummary {
            has_voice,
            has_bgm,
            has_sfx,
            is_silent: !has_voice && !has_bgm && !has_sfx,
            balloon_count: 0,
            balloon_policy_summary: "none".to_string(),
        }),
    }
}
