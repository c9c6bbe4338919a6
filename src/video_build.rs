//! Video Build Controller (C11, spec §4.11): builds the SSOT submission
//! payload, gates submission behind preflight + the audio-missing
//! three-way confirm, polls every active build lane, refreshes expired
//! download URLs, tracks monthly usage, and derives the per-lane
//! view-model the Export tab renders.

use crate::app_context::AppContext;
use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestKind};
use crate::model::{OutputPreset, VideoBuild, VideoBuildStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionsSettings {
    pub enabled: bool,
    pub position: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BgmSettings {
    pub enabled: bool,
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    pub preset: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelopCustomStyle {
    pub text_color: String,
    pub stroke_color: String,
    pub stroke_width: f32,
    pub bg_color: String,
    pub bg_opacity: f32,
    pub font_family: String,
    pub font_weight: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelopTypography {
    pub max_lines: u32,
    pub line_height: f32,
    pub letter_spacing: f32,
    pub overflow_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelopSettings {
    pub enabled: bool,
    pub style_preset: String,
    pub size_preset: String,
    pub position_preset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_style: Option<TelopCustomStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typography: Option<TelopTypography>,
}

/// The full submission payload, SSOT-aligned (spec §4.11).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoBuildSubmission {
    #[serde(skip)]
    pub project_id: String,
    pub output_preset: OutputPreset,
    pub captions: CaptionsSettings,
    pub bgm: BgmSettings,
    pub motion: MotionSettings,
    pub telops: TelopSettings,
}

/// Builds the exact JSON body the submit endpoint expects (spec §4.11,
/// §6). Kept as a pure function so the anti-double-submit guard in
/// [`AppContext`] can wrap the network call without this module needing
/// to know about that guard.
pub fn build_submission_payload(submission: &VideoBuildSubmission) -> Value {
    json!({
        "output_preset": submission.output_preset,
        "captions": submission.captions,
        "bgm": submission.bgm,
        "motion": submission.motion,
        "telops": submission.telops,
    })
}

/// The three-way decision spec §4.11 requires whenever an audio-missing
/// condition is detected before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMissingChoice {
    GenerateFirst,
    SkipSilent,
    Cancel,
}

/// Whether a plain confirm or the three-way audio-missing dialog applies
/// before submitting (spec §4.11): preflight must already be OK, and no
/// audio job may be in flight, before either path is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitConfirmPrompt {
    Simple,
    AudioMissingThreeWay,
}

pub fn submit_confirm_prompt(has_missing_audio_scenes: bool) -> SubmitConfirmPrompt {
    if has_missing_audio_scenes {
        SubmitConfirmPrompt::AudioMissingThreeWay
    } else {
        SubmitConfirmPrompt::Simple
    }
}

/// Submits a build, guarded by the single-admission `videoBuildStartInFlight`
/// flag (spec §4.11 "Anti-double-submit"). Refuses outright when
/// `can_generate()` is false (preflight not OK, or a bulk-audio job holds
/// the lock) or a submission is already in flight; always releases the
/// flag, success or failure.
pub async fn submit_video_build(ctx: &AppContext, submission: &VideoBuildSubmission) -> Result<VideoBuild> {
    if !ctx.can_generate() {
        return Err(Error::validation(
            "cannot submit a video build until preflight is ready and no bulk-audio job is in flight",
        ));
    }
    if !ctx.try_start_video_build_submit() {
        return Err(Error::conflict("a video build submission is already in flight"));
    }
    let result = ctx
        .http
        .post(
            &format!("/projects/{}/video-builds", submission.project_id),
            build_submission_payload(submission),
            RequestKind::SynchronousBulk,
        )
        .await;
    ctx.finish_video_build_submit();
    Ok(serde_json::from_value(result?)?)
}

/// Refreshes every build this list considers active via
/// `POST .../refresh` (spec §4.11); `RetryWait` builds are skipped since a
/// server-side cron retries them without client polling
/// ([`VideoBuildStatus::should_refresh`]). Monthly usage is refetched once
/// whenever any build in this batch transitioned to a terminal status.
pub async fn refresh_active_builds(http: &Arc<dyn HttpClient>, cached: &[VideoBuild]) -> Result<RefreshOutcome> {
    let mut refreshed = Vec::with_capacity(cached.len());
    let mut newly_terminal = false;
    for build in cached {
        if build.status.should_refresh() {
            let body = http
                .post(
                    &format!("/video-builds/{}/refresh", build.id),
                    json!({}),
                    RequestKind::Poll,
                )
                .await?;
            let updated: VideoBuild = serde_json::from_value(body)?;
            if updated.status.is_terminal() {
                newly_terminal = true;
            }
            refreshed.push(updated);
        } else {
            refreshed.push(build.clone());
        }
    }
    Ok(RefreshOutcome {
        builds: refreshed,
        should_refresh_usage: newly_terminal,
    })
}

pub struct RefreshOutcome {
    pub builds: Vec<VideoBuild>,
    pub should_refresh_usage: bool,
}

/// Refetches a single build to get the freshest presigned download URL
/// (spec §4.11 "URL freshness"): always called before opening a preview
/// or chat-edit session against a build.
pub async fn refetch_build(http: &Arc<dyn HttpClient>, build_id: &str) -> Result<VideoBuild> {
    let body = http
        .get(&format!("/video-builds/{build_id}"), RequestKind::LightRead)
        .await?;
    Ok(serde_json::from_value(body)?)
}

/// The "URL取得" button for a completed build with no URL (older records):
/// invokes `.../refresh` same as the poller, guarded per-build-id by
/// `videoBuildRefreshUrlInFlight` (spec §4.11).
pub async fn refresh_download_url(ctx: &AppContext, build_id: &str) -> Result<String> {
    if !ctx.try_start_refresh_url(build_id) {
        return Err(Error::conflict(format!("a URL refresh for build {build_id} is already in flight")));
    }
    let result = ctx
        .http
        .post(
            &format!("/video-builds/{build_id}/refresh"),
            json!({}),
            RequestKind::LightRead,
        )
        .await;
    ctx.finish_refresh_url(build_id);

    let body = result?;
    let build: VideoBuild = serde_json::from_value(body)?;
    build
        .download_url
        .ok_or_else(|| Error::validation("refresh response missing `download_url`"))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VideoBuildUsage {
    pub builds_used: u32,
    pub builds_limit: u32,
}

impl VideoBuildUsage {
    pub fn is_over_limit(self) -> bool {
        self.builds_used >= self.builds_limit
    }
}

pub async fn fetch_monthly_usage(http: &Arc<dyn HttpClient>) -> Result<VideoBuildUsage> {
    let body = http.get("/video-builds/usage", RequestKind::LightRead).await?;
    Ok(serde_json::from_value(body)?)
}

/// `pendingScrollToBuildId` highlight-ring logic (spec §4.11): a
/// newly-created or -completed build scrolls into view with a fading
/// highlight ring exactly once, then the pending marker is cleared.
pub fn should_highlight(build_id: &str, pending_scroll_to_build_id: Option<&str>) -> bool {
    pending_scroll_to_build_id == Some(build_id)
}

/// The Export tab's per-lane rendering: one row per build, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildLaneView {
    pub build_id: String,
    pub label: String,
    pub progress_percent: u8,
    pub is_retrying: bool,
    pub is_active: bool,
    pub download_url: Option<String>,
    pub needs_url_refresh_button: bool,
    pub error_message: Option<String>,
    pub highlighted: bool,
}

pub fn lane_view(build: &VideoBuild, pending_scroll_to_build_id: Option<&str>) -> BuildLaneView {
    let label = match build.status {
        VideoBuildStatus::Queued => "待機中",
        VideoBuildStatus::Validating => "検証中",
        VideoBuildStatus::Submitted => "送信済み",
        VideoBuildStatus::Rendering => "レンダリング中",
        VideoBuildStatus::Uploading => "アップロード中",
        VideoBuildStatus::RetryWait => "再試行待ち",
        VideoBuildStatus::Completed => "完了",
        VideoBuildStatus::Failed => "失敗",
        VideoBuildStatus::Cancelled => "キャンセル済み",
    };
    BuildLaneView {
        build_id: build.id.clone(),
        label: label.to_string(),
        progress_percent: build.progress_percent,
        is_retrying: build.status == VideoBuildStatus::RetryWait,
        is_active: build.status.is_active(),
        download_url: build.download_url.clone(),
        needs_url_refresh_button: build.status == VideoBuildStatus::Completed && build.download_url.is_none(),
        error_message: build.error_message.clone(),
        highlighted: should_highlight(&build.id, pending_scroll_to_build_id),
    }
}

pub fn lane_views(builds: &[VideoBuild], pending_scroll_to_build_id: Option<&str>) -> Vec<BuildLaneView> {
    builds.iter().map(|b| lane_view(b, pending_scroll_to_build_id)).collect()
}
