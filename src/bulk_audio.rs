//! Bulk Audio Job (C8, spec §4.8): generates narration audio for every
//! scene missing it. Polls on its own 2s cadence (tighter than the 5s
//! default other job kinds use, since audio synthesis per scene is fast
//! and the UI shows a live per-scene checklist), and supports resuming an
//! already-running job across a page reload plus an explicit cancel.

use crate::error::Result;
use crate::http::{HttpClient, RequestKind};
use crate::supervisor::{JobKind, JobPoll, JobSupervisor, PollStatus, WatchOutcome};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const AUDIO_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const BULK_AUDIO_TIMEOUT: Duration = Duration::from_secs(15 * 60);

struct BulkAudioStatusPoll {
    http: Arc<dyn HttpClient>,
    project_id: String,
}

#[async_trait]
impl JobPoll for BulkAudioStatusPoll {
    async fn poll(&self) -> Result<crate::supervisor::PollResult> {
        let body = self
            .http
            .get(
                &format!("/projects/{}/audio/bulk-status", self.project_id),
                RequestKind::Poll,
            )
            .await?;
        let status = body.get("status").and_then(|v| v.as_str()).unwrap_or("pending");
        let run_id = body
            .get("run_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let message = body
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let status = match status {
            "completed" => PollStatus::Completed,
            "failed" => PollStatus::Failed,
            _ => PollStatus::Pending,
        };
        Ok(crate::supervisor::PollResult {
            status,
            run_id,
            message,
        })
    }
}

/// Drives the bulk audio job's own 2s tick loop to completion. Unlike
/// [`JobSupervisor::run_watch`], this owns its own sleep cadence rather
/// than the shared 5s `TICK_INTERVAL`, while still using the supervisor's
/// in-flight registry for idempotent start/stop and run-id mismatch
/// detection.
async fn watch_bulk_audio(
    supervisor: &JobSupervisor,
    project_id: &str,
    poll: BulkAudioStatusPoll,
    mut on_progress: impl FnMut(u8) + Send,
) -> WatchOutcome {
    let start = Instant::now();
    loop {
        asupersync::time::sleep(AUDIO_POLL_INTERVAL).await;

        if !supervisor.is_in_flight(JobKind::Audio, project_id) {
            return WatchOutcome::Aborted {
                reason: "watch was stopped externally".to_string(),
            };
        }
        let elapsed = start.elapsed();
        if elapsed > BULK_AUDIO_TIMEOUT {
            supervisor.stop(JobKind::Audio, project_id);
            return WatchOutcome::TimedOut;
        }

        on_progress(crate::supervisor::fake_progress_percent(elapsed));

        match poll.poll().await {
            Ok(result) if result.status.is_terminal() => {
                supervisor.stop(JobKind::Audio, project_id);
                return match result.status {
                    PollStatus::Completed => WatchOutcome::Completed {
                        message: result.message,
                    },
                    PollStatus::Failed => WatchOutcome::Failed {
                        message: result.message,
                    },
                    PollStatus::Pending => unreachable!("checked is_terminal above"),
                };
            }
            Ok(_) => {}
            Err(err) if err.is_transient() => {
                tracing::warn!(project_id, error = %err, "transient bulk-audio poll error, retrying");
            }
            Err(err) => {
                supervisor.stop(JobKind::Audio, project_id);
                return WatchOutcome::Aborted {
                    reason: err.to_string(),
                };
            }
        }
    }
}

/// Starts a fresh bulk audio job for scenes missing narration.
pub async fn start_bulk_audio(
    http: &Arc<dyn HttpClient>,
    supervisor: &JobSupervisor,
    project_id: &str,
    missing_audio_scene_ids: &[String],
    on_progress: impl FnMut(u8) + Send,
) -> Result<WatchOutcome> {
    let start_body = http
        .post(
            &format!("/projects/{project_id}/audio/bulk-generate"),
            json!({ "scene_ids": missing_audio_scene_ids }),
            RequestKind::SynchronousBulk,
        )
        .await?;
    let run_id = start_body
        .get("run_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    supervisor.start(JobKind::Audio, project_id, run_id)?;
    let poll = BulkAudioStatusPoll {
        http: Arc::clone(http),
        project_id: project_id.to_string(),
    };
    Ok(watch_bulk_audio(supervisor, project_id, poll, on_progress).await)
}

/// Re-attaches to a bulk audio job already in flight (e.g. after a page
/// reload restores `window.missingAudioSceneIds` from the server's current
/// project snapshot). No new start request is sent.
pub async fn resume_bulk_audio(
    http: &Arc<dyn HttpClient>,
    supervisor: &JobSupervisor,
    project_id: &str,
    on_progress: impl FnMut(u8) + Send,
) -> Result<WatchOutcome> {
    if !supervisor.is_in_flight(JobKind::Audio, project_id) {
        supervisor.start(JobKind::Audio, project_id, None)?;
    }
    let poll = BulkAudioStatusPoll {
        http: Arc::clone(http),
        project_id: project_id.to_string(),
    };
    Ok(watch_bulk_audio(supervisor, project_id, poll, on_progress).await)
}

/// Cancels a running bulk audio job: tells the server, then drops the
/// local watch regardless of whether the server call succeeds, since a
/// user-initiated cancel should always free the UI's audio-in-flight gate.
pub async fn cancel_bulk_audio(
    http: &Arc<dyn HttpClient>,
    supervisor: &JobSupervisor,
    project_id: &str,
) -> Result<()> {
    let result = http
        .post(
            &format!("/projects/{project_id}/audio/bulk-cancel"),
            json!({}),
            RequestKind::LightRead,
        )
        .await;
    supervisor.stop(JobKind::Audio, project_id);
    result.map(|_| ())
}
