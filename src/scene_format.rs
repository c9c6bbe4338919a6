//! Scene Format Orchestrator (C6, spec §4.6): drives the
//! transcribe -> parse -> format chain (branching on source type), tracks
//! per-chunk progress for `preserve` mode, and exposes the retry/reset
//! operations the Scene Split tab uses when a chunk fails.

use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestKind};
use crate::model::{SourceType, SplitMode};
use crate::supervisor::{JobKind, JobPoll, JobSupervisor, WatchOutcome};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Total watch budget for the format chain (spec §5: same 10min budget as
/// other per-entity jobs).
pub const FORMAT_TIMEOUT: Duration = Duration::from_secs(600);

/// Sleep between chain steps to let the backend settle (spec §4.6).
pub const STEP_SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SceneFormatChunk {
    pub id: String,
    pub status: ChunkStatus,
    pub error_message: Option<String>,
}

/// `preserve` mode formats per-chunk and can retry individual chunks;
/// `ai` mode reformats the whole transcript in one pass and has no chunk
/// concept (spec §4.6, §3 "Preserving legacy split-mode vocabulary").
pub fn chunks_are_applicable(mode: SplitMode) -> bool {
    mode == SplitMode::Preserve
}

/// Chunks eligible for a retry request -- only ones that terminally failed.
pub fn retryable_chunk_ids(chunks: &[SceneFormatChunk]) -> Vec<String> {
    chunks
        .iter()
        .filter(|c| c.status == ChunkStatus::Failed)
        .map(|c| c.id.clone())
        .collect()
}

pub fn all_chunks_settled(chunks: &[SceneFormatChunk]) -> bool {
    chunks
        .iter()
        .all(|c| matches!(c.status, ChunkStatus::Completed | ChunkStatus::Failed))
}

/// What a reset clears (spec §4.6: reset returns the project to
/// `Uploaded` and drops every downstream artifact so the chain can be
/// re-run from scratch with a different split mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetPlan {
    pub clears_scenes: bool,
    pub clears_chunks: bool,
    pub reverts_status_to_uploaded: bool,
}

pub fn reset_plan() -> ResetPlan {
    ResetPlan {
        clears_scenes: true,
        clears_chunks: true,
        reverts_status_to_uploaded: true,
    }
}

/// Where `source_type`/the running chain currently sits, gating which
/// prerequisite steps still need to run (spec §4.6: "each prerequisite
/// step is invoked only if the current status is before it").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChainStatus {
    Uploaded,
    Transcribed,
    Parsed,
    Formatted,
}

/// The ordered step list for a given `source_type` (spec §4.6):
/// `text`: parse -> format; `audio`: transcribe -> parse -> format.
fn required_steps(source_type: SourceType) -> &'static [ChainStatus] {
    match source_type {
        SourceType::Text => &[ChainStatus::Parsed, ChainStatus::Formatted],
        SourceType::Audio => &[ChainStatus::Transcribed, ChainStatus::Parsed, ChainStatus::Formatted],
    }
}

/// The per-tick batch status a polled `ai`-mode format run reports (spec
/// §4.6): a format run is not simply pending/completed/failed, it's a
/// chunk-batch accounting the orchestrator must act on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatBatchStatus {
    Formatted,
    Failed,
    InProgress,
}

#[derive(Debug, Clone)]
pub struct FormatBatchTick {
    pub total_chunks: u32,
    pub processed: u32,
    pub processing: u32,
    pub pending: u32,
    pub failed: u32,
    pub status: FormatBatchStatus,
    pub run_id: Option<String>,
}

/// The action the orchestrator takes in response to one batch tick (spec
/// §4.6's three branches, in the order they're checked).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    /// `pending > 0 ∧ processing == 0`: the backend is idle between
    /// batches, re-POST `/format` to resume.
    ResumeBatch,
    /// `pending == 0 ∧ processing == 0 ∧ status != formatted`: one more
    /// POST triggers the final merge.
    TriggerFinalMerge,
    /// Nothing to do this tick but keep watching.
    Wait,
}

pub fn batch_action(tick: &FormatBatchTick) -> BatchAction {
    if tick.pending > 0 && tick.processing == 0 {
        BatchAction::ResumeBatch
    } else if tick.pending == 0 && tick.processing == 0 && tick.status != FormatBatchStatus::Formatted {
        BatchAction::TriggerFinalMerge
    } else {
        BatchAction::Wait
    }
}

/// Whether the "show failed chunks" link should be surfaced this tick.
pub fn should_show_failed_chunks(tick: &FormatBatchTick) -> bool {
    tick.failed > 0
}

struct FormatStatusPoll {
    http: Arc<dyn HttpClient>,
    project_id: String,
}

impl FormatStatusPoll {
    async fn tick(&self) -> Result<FormatBatchTick> {
        let body = self
            .http
            .get(
                &format!("/projects/{}/format/status", self.project_id),
                RequestKind::Poll,
            )
            .await?;
        let status_str = body
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::validation("format status response missing `status`"))?;
        let status = match status_str {
            "formatted" => FormatBatchStatus::Formatted,
            "failed" => FormatBatchStatus::Failed,
            _ => FormatBatchStatus::InProgress,
        };
        let field = |name: &str| body.get(name).and_then(serde_json::Value::as_u64).unwrap_or(0) as u32;
        Ok(FormatBatchTick {
            total_chunks: field("total_chunks"),
            processed: field("processed"),
            processing: field("processing"),
            pending: field("pending"),
            failed: field("failed"),
            status,
            run_id: body.get("run_id").and_then(|v| v.as_str()).map(str::to_string),
        })
    }
}

#[async_trait]
impl JobPoll for FormatStatusPoll {
    async fn poll(&self) -> Result<crate::supervisor::PollResult> {
        let tick = self.tick().await?;
        let status = match tick.status {
            FormatBatchStatus::Formatted => crate::supervisor::PollStatus::Completed,
            FormatBatchStatus::Failed => crate::supervisor::PollStatus::Failed,
            FormatBatchStatus::InProgress => crate::supervisor::PollStatus::Pending,
        };
        Ok(crate::supervisor::PollResult {
            status,
            run_id: tick.run_id,
            message: None,
        })
    }
}

async fn post_step(http: &Arc<dyn HttpClient>, project_id: &str, step: &str, body: serde_json::Value) -> Result<serde_json::Value> {
    http.post(
        &format!("/projects/{project_id}/{step}"),
        body,
        RequestKind::SynchronousBulk,
    )
    .await
}

/// Drives the `preserve`-mode batch-resume protocol to completion (spec
/// §4.6): re-POSTs `/format` whenever the backend goes idle between
/// batches, issues one final POST to trigger the merge, and aborts with a
/// warning if the server reports a different `run_id` mid-watch (a mode
/// change raced the format run out from under it).
async fn drive_ai_format_batch(
    http: &Arc<dyn HttpClient>,
    supervisor: &JobSupervisor,
    project_id: &str,
    expected_run_id: Option<String>,
    mut on_progress: impl FnMut(u8) + Send,
) -> Result<WatchOutcome> {
    let poll = FormatStatusPoll {
        http: Arc::clone(http),
        project_id: project_id.to_string(),
    };
    let start = std::time::Instant::now();
    loop {
        asupersync::time::sleep(crate::supervisor::TICK_INTERVAL).await;
        if !supervisor.is_in_flight(JobKind::SceneFormat, project_id) {
            return Ok(WatchOutcome::Aborted {
                reason: "watch was stopped externally".to_string(),
            });
        }
        let elapsed = start.elapsed();
        if elapsed > FORMAT_TIMEOUT {
            supervisor.stop(JobKind::SceneFormat, project_id);
            return Ok(WatchOutcome::TimedOut);
        }
        on_progress(crate::supervisor::fake_progress_percent(elapsed));

        let tick = match poll.tick().await {
            Ok(tick) => tick,
            Err(err) if err.is_transient() => {
                tracing::warn!(project_id, error = %err, "transient format poll error, retrying");
                continue;
            }
            Err(err) => {
                supervisor.stop(JobKind::SceneFormat, project_id);
                return Ok(WatchOutcome::Aborted { reason: err.to_string() });
            }
        };

        if let (Some(expected), Some(observed)) = (&expected_run_id, &tick.run_id) {
            if expected != observed {
                supervisor.stop(JobKind::SceneFormat, project_id);
                return Ok(WatchOutcome::RunIdMismatch {
                    observed_run_id: observed.clone(),
                });
            }
        }

        match tick.status {
            FormatBatchStatus::Formatted => {
                supervisor.stop(JobKind::SceneFormat, project_id);
                return Ok(WatchOutcome::Completed { message: None });
            }
            FormatBatchStatus::Failed => {
                supervisor.stop(JobKind::SceneFormat, project_id);
                return Ok(WatchOutcome::Failed { message: None });
            }
            FormatBatchStatus::InProgress => match batch_action(&tick) {
                BatchAction::ResumeBatch | BatchAction::TriggerFinalMerge => {
                    post_step(http, project_id, "format", json!({ "split_mode": SplitMode::Ai })).await?;
                }
                BatchAction::Wait => {}
            },
        }
    }
}

/// The `preserve`-mode integrity report the backend returns immediately
/// (spec §4.6): the orchestrator validates `integrity_check.status ==
/// passed` and reports the preserved character count before treating the
/// chain as complete.
#[derive(Debug, Clone)]
pub struct PreserveIntegrityReport {
    pub passed: bool,
    pub preserved_chars: u64,
}

fn parse_preserve_response(body: &serde_json::Value) -> Result<PreserveIntegrityReport> {
    let passed = body
        .get("integrity_check")
        .and_then(|v| v.get("status"))
        .and_then(|v| v.as_str())
        .map(|s| s == "passed")
        .ok_or_else(|| Error::integrity("preserve-mode format response missing `integrity_check.status`"))?;
    let preserved_chars = body
        .get("preserved_chars")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    Ok(PreserveIntegrityReport { passed, preserved_chars })
}

/// Whether switching from `ai` to `preserve` needs the two-stage
/// confirmation (spec §4.6): earlier AI-generated scenes would be
/// destroyed, so this is never a single-click action.
pub fn mode_change_requires_confirmation(current_mode: SplitMode, requested_mode: SplitMode) -> bool {
    current_mode == SplitMode::Ai && requested_mode == SplitMode::Preserve
}

/// Kicks off the chain for `source_type`, skipping any prerequisite step
/// the project's `current_status` already satisfies, sleeping ≈1s between
/// steps (spec §4.6). `preserve` mode resolves synchronously once
/// `format` returns and its integrity check passes; `ai` mode hands off to
/// the batch-resume watch.
pub async fn run_scene_format_chain(
    http: &Arc<dyn HttpClient>,
    supervisor: &JobSupervisor,
    project_id: &str,
    source_type: SourceType,
    current_status: ChainStatus,
    split_mode: SplitMode,
    on_progress: impl FnMut(u8) + Send,
) -> Result<WatchOutcome> {
    for step in required_steps(source_type) {
        if current_status >= *step {
            continue;
        }
        match step {
            ChainStatus::Transcribed => {
                post_step(http, project_id, "transcribe", json!({})).await?;
            }
            ChainStatus::Parsed => {
                post_step(http, project_id, "parse", json!({})).await?;
            }
            ChainStatus::Formatted => {
                let body = post_step(http, project_id, "format", json!({ "split_mode": split_mode })).await?;
                if split_mode == SplitMode::Preserve {
                    let report = parse_preserve_response(&body)?;
                    if !report.passed {
                        return Err(Error::integrity("preserve-mode integrity check failed"));
                    }
                    return Ok(WatchOutcome::Completed { message: None });
                }
                let run_id = body.get("run_id").and_then(|v| v.as_str()).map(str::to_string);
                supervisor.start(JobKind::SceneFormat, project_id, run_id.clone())?;
                return drive_ai_format_batch(http, supervisor, project_id, run_id, on_progress).await;
            }
            ChainStatus::Uploaded => unreachable!("uploaded is never a required step"),
        }
        asupersync::time::sleep(STEP_SETTLE_DELAY).await;
    }
    // Every required step was already satisfied by `current_status`.
    Ok(WatchOutcome::Completed { message: None })
}

/// Retries the given failed chunks (spec §6: `POST /text_chunks/:id/retry`).
pub async fn retry_chunks(http: &Arc<dyn HttpClient>, chunk_ids: &[String]) -> Result<()> {
    for id in chunk_ids {
        http.post(&format!("/text_chunks/{id}/retry"), json!({}), RequestKind::LightRead)
            .await?;
    }
    Ok(())
}

/// Fetches the current per-chunk list (spec §6: `GET /projects/:id/chunks`).
pub async fn fetch_chunks(http: &Arc<dyn HttpClient>, project_id: &str) -> Result<Vec<SceneFormatChunk>> {
    let body = http
        .get(&format!("/projects/{project_id}/chunks"), RequestKind::LightRead)
        .await?;
    let chunks = body
        .get("chunks")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::validation("chunks response missing `chunks` array"))?;
    chunks
        .iter()
        .map(|c| {
            let id = c
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::validation("chunk missing `id`"))?
                .to_string();
            let status = match c.get("status").and_then(|v| v.as_str()) {
                Some("completed") => ChunkStatus::Completed,
                Some("failed") => ChunkStatus::Failed,
                Some("processing") => ChunkStatus::Processing,
                _ => ChunkStatus::Pending,
            };
            let error_message = c.get("error_message").and_then(|v| v.as_str()).map(str::to_string);
            Ok(SceneFormatChunk { id, status, error_message })
        })
        .collect()
}
