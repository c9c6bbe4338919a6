//! Bulk Image Generator (C7, spec §4.7): `all` mode is a single synchronous
//! backend call with a background per-scene-card poll; `pending/failed` mode
//! is a client-driven one-at-a-time queue. The two sub-modes have genuinely
//! different shapes (see bulk_audio.rs's custom-loop precedent) so they get
//! two distinct drivers rather than one shared watch.

use crate::error::Result;
use crate::http::{HttpClient, RequestKind};
use crate::model::Scene;
use crate::supervisor::{fake_progress_percent, JobKind, JobPoll, JobSupervisor, PollResult, PollStatus, WatchOutcome};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `all` mode's single synchronous call budget (spec §4.7).
pub const ALL_MODE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Background per-scene-card poll cadence while `all` mode runs (spec §4.7).
pub const ALL_MODE_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// `pending/failed` mode's total client-driven queue budget (spec §5).
pub const BULK_IMAGE_TIMEOUT: Duration = Duration::from_secs(25 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkImageMode {
    All,
    PendingOrFailed,
}

/// Scene ids the bulk job will (re)generate under `mode`.
pub fn target_scene_ids(scenes: &[Scene], mode: BulkImageMode) -> Vec<String> {
    scenes
        .iter()
        .filter(|s| !s.is_hidden())
        .filter(|s| match mode {
            BulkImageMode::All => true,
            BulkImageMode::PendingOrFailed => !s.has_adopted_asset(),
        })
        .map(|s| s.id.clone())
        .collect()
}

struct GenerateImagesStatusPoll {
    http: Arc<dyn HttpClient>,
    project_id: String,
}

#[async_trait]
impl JobPoll for GenerateImagesStatusPoll {
    async fn poll(&self) -> Result<PollResult> {
        let body = self
            .http
            .get(
                &format!("/projects/{}/generate-images/status", self.project_id),
                RequestKind::Poll,
            )
            .await?;
        let status = body.get("status").and_then(|v| v.as_str()).unwrap_or("pending");
        let run_id = body.get("run_id").and_then(|v| v.as_str()).map(str::to_string);
        let message = body.get("message").and_then(|v| v.as_str()).map(str::to_string);
        let status = match status {
            "completed" => PollStatus::Completed,
            "failed" => PollStatus::Failed,
            _ => PollStatus::Pending,
        };
        Ok(PollResult { status, run_id, message })
    }
}

/// A `pending/failed`-mode queue tick: how many scenes are currently
/// generating and how many remain untouched (spec §4.7).
#[derive(Debug, Clone)]
struct QueueTick {
    generating: u32,
    pending: u32,
}

async fn fetch_queue_tick(http: &Arc<dyn HttpClient>, project_id: &str) -> Result<QueueTick> {
    let body = http
        .get(
            &format!("/projects/{project_id}/generate-images/status"),
            RequestKind::Poll,
        )
        .await?;
    let field = |name: &str| body.get(name).and_then(serde_json::Value::as_u64).unwrap_or(0) as u32;
    Ok(QueueTick {
        generating: field("generating"),
        pending: field("pending"),
    })
}

/// Outcome of trying to start a bulk run: the lock might already be held
/// by another bulk run, in which case no request is even sent.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkImageStartOutcome {
    Started(WatchOutcome),
    AlreadyRunning,
    NothingToGenerate,
}

/// `all` mode (spec §4.7): a single synchronous `POST
/// /projects/:id/generate-all-images` with its own 10-minute timeout, then a
/// background 3s poll of `GET /projects/:id/generate-images/status` purely
/// to drive per-scene-card progress until the backend reports completion.
async fn run_all_mode(
    http: &Arc<dyn HttpClient>,
    supervisor: &JobSupervisor,
    project_id: &str,
    mut on_progress: impl FnMut(u8) + Send,
) -> Result<WatchOutcome> {
    let start_body = http
        .post(
            &format!("/projects/{project_id}/generate-all-images"),
            json!({}),
            RequestKind::SynchronousBulk,
        )
        .await?;
    let run_id = start_body.get("run_id").and_then(|v| v.as_str()).map(str::to_string);
    supervisor.start(JobKind::Image, project_id, run_id.clone())?;

    let poll = GenerateImagesStatusPoll {
        http: Arc::clone(http),
        project_id: project_id.to_string(),
    };
    let start = Instant::now();
    loop {
        asupersync::time::sleep(ALL_MODE_POLL_INTERVAL).await;
        if !supervisor.is_in_flight(JobKind::Image, project_id) {
            return Ok(WatchOutcome::Aborted {
                reason: "watch was stopped externally".to_string(),
            });
        }
        let elapsed = start.elapsed();
        if elapsed > ALL_MODE_TIMEOUT {
            supervisor.stop(JobKind::Image, project_id);
            return Ok(WatchOutcome::TimedOut);
        }
        on_progress(fake_progress_percent(elapsed));

        let result = match poll.poll().await {
            Ok(result) => result,
            Err(err) if err.is_transient() => {
                tracing::warn!(project_id, error = %err, "transient generate-images poll error, retrying");
                continue;
            }
            Err(err) => {
                supervisor.stop(JobKind::Image, project_id);
                return Ok(WatchOutcome::Aborted { reason: err.to_string() });
            }
        };

        if let (Some(expected), Some(observed)) = (&run_id, &result.run_id) {
            if expected != observed {
                supervisor.stop(JobKind::Image, project_id);
                return Ok(WatchOutcome::RunIdMismatch {
                    observed_run_id: observed.clone(),
                });
            }
        }

        if result.status.is_terminal() {
            supervisor.stop(JobKind::Image, project_id);
            return Ok(match result.status {
                PollStatus::Completed => WatchOutcome::Completed { message: result.message },
                _ => WatchOutcome::Failed { message: result.message },
            });
        }
    }
}

/// `pending/failed` mode (spec §4.7): a client-driven queue over `targets`.
/// Issues `POST /scenes/:id/generate-image` one scene at a time, only once
/// `generating == 0`; calls `POST /projects/:id/generate-images` to advance
/// the batch once `pending == 0 ∧ generating == 0`.
async fn run_queue_mode(
    http: &Arc<dyn HttpClient>,
    supervisor: &JobSupervisor,
    project_id: &str,
    targets: &[String],
    mut on_progress: impl FnMut(u8) + Send,
) -> Result<WatchOutcome> {
    supervisor.start(JobKind::Image, project_id, None)?;
    let start = Instant::now();
    let mut remaining: Vec<String> = targets.to_vec();

    loop {
        if !supervisor.is_in_flight(JobKind::Image, project_id) {
            return Ok(WatchOutcome::Aborted {
                reason: "watch was stopped externally".to_string(),
            });
        }
        let elapsed = start.elapsed();
        if elapsed > BULK_IMAGE_TIMEOUT {
            supervisor.stop(JobKind::Image, project_id);
            return Ok(WatchOutcome::TimedOut);
        }
        on_progress(fake_progress_percent(elapsed));

        let tick = match fetch_queue_tick(http, project_id).await {
            Ok(tick) => tick,
            Err(err) if err.is_transient() => {
                tracing::warn!(project_id, error = %err, "transient generate-images poll error, retrying");
                asupersync::time::sleep(ALL_MODE_POLL_INTERVAL).await;
                continue;
            }
            Err(err) => {
                supervisor.stop(JobKind::Image, project_id);
                return Ok(WatchOutcome::Aborted { reason: err.to_string() });
            }
        };

        if tick.generating == 0 {
            if let Some(next) = remaining.pop() {
                http.post(
                    &format!("/scenes/{next}/generate-image"),
                    json!({}),
                    RequestKind::LightRead,
                )
                .await?;
            } else if tick.pending == 0 {
                http.post(
                    &format!("/projects/{project_id}/generate-images"),
                    json!({}),
                    RequestKind::LightRead,
                )
                .await?;
                supervisor.stop(JobKind::Image, project_id);
                return Ok(WatchOutcome::Completed { message: None });
            }
        }

        asupersync::time::sleep(ALL_MODE_POLL_INTERVAL).await;
    }
}

/// Acquires the bulk lock, dispatches to the mode-appropriate driver, and
/// always releases the lock on every exit path (spec §4.7, §5
/// "isBulkImageGenerating").
pub async fn run_bulk_image_generation(
    http: &Arc<dyn HttpClient>,
    supervisor: &JobSupervisor,
    project_id: &str,
    scenes: &[Scene],
    mode: BulkImageMode,
    on_progress: impl FnMut(u8) + Send,
) -> Result<BulkImageStartOutcome> {
    let targets = target_scene_ids(scenes, mode);
    if targets.is_empty() {
        return Ok(BulkImageStartOutcome::NothingToGenerate);
    }

    if !supervisor.try_lock_bulk_image() {
        return Ok(BulkImageStartOutcome::AlreadyRunning);
    }

    let result = match mode {
        BulkImageMode::All => run_all_mode(http, supervisor, project_id, on_progress).await,
        BulkImageMode::PendingOrFailed => run_queue_mode(http, supervisor, project_id, &targets, on_progress).await,
    };

    supervisor.unlock_bulk_image();
    result.map(BulkImageStartOutcome::Started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StaticHttpClient;
    use crate::model::{DisplayAssetType, GenerationRecord, GenerationStatus, TextRenderMode, UtteranceStatus};
    use serde_json::json;

    fn scene(id: &str, idx: i32, adopted: bool) -> Scene {
        Scene {
            id: id.to_string(),
            idx,
            role: "body".into(),
            title: String::new(),
            dialogue: String::new(),
            bullets: vec![],
            image_prompt: String::new(),
            style_preset_id: None,
            display_asset_type: DisplayAssetType::Image,
            text_render_mode: TextRenderMode::None,
            duration_override_ms: None,
            chunk_id: None,
            hidden_at: None,
            active_image: if adopted {
                Some(GenerationRecord {
                    id: "g1".into(),
                    scene_id: id.to_string(),
                    status: GenerationStatus::Completed,
                    r2_url: Some("https://cdn/x.png".into()),
                    prompt: String::new(),
                    model: None,
                    provider: None,
                    error_message: None,
                    created_at: chrono::Utc::now(),
                    is_active: true,
                })
            } else {
                None
            },
            active_comic: None,
            active_video: None,
            latest_image: None,
            characters: vec![],
            voice_character: None,
            utterance_status: UtteranceStatus::default(),
            scene_bgm: None,
            sfx: vec![],
            motion_preset_id: None,
            scene_traits: vec![],
        }
    }

    #[test]
    fn all_mode_targets_every_visible_scene() {
        let scenes = vec![scene("s1", 1, true), scene("s2", 2, false)];
        let targets = target_scene_ids(&scenes, BulkImageMode::All);
        assert_eq!(targets, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn pending_or_failed_mode_excludes_adopted_scenes() {
        let scenes = vec![scene("s1", 1, true), scene("s2", 2, false)];
        let targets = target_scene_ids(&scenes, BulkImageMode::PendingOrFailed);
        assert_eq!(targets, vec!["s2".to_string()]);
    }

    fn run<F: std::future::Future>(fut: F) -> F::Output {
        asupersync::test_utils::run_test(|| fut)
    }

    #[test]
    fn second_concurrent_bulk_run_is_refused_without_a_request() {
        run(async {
            let http = Arc::new(StaticHttpClient::new());
            let http_dyn: Arc<dyn HttpClient> = http.clone();
            let supervisor = JobSupervisor::new();
            assert!(supervisor.try_lock_bulk_image());

            let scenes = vec![scene("s1", 1, false)];
            let outcome = run_bulk_image_generation(
                &http_dyn,
                &supervisor,
                "p1",
                &scenes,
                BulkImageMode::All,
                |_| {},
            )
            .await
            .unwrap();
            assert_eq!(outcome, BulkImageStartOutcome::AlreadyRunning);
            assert!(http.requests().is_empty());
        });
    }

    #[test]
    fn empty_target_set_skips_the_lock_entirely() {
        run(async {
            let http = Arc::new(StaticHttpClient::new());
            let http_dyn: Arc<dyn HttpClient> = http.clone();
            let supervisor = JobSupervisor::new();
            let scenes = vec![scene("s1", 1, true)];
            let outcome = run_bulk_image_generation(
                &http_dyn,
                &supervisor,
                "p1",
                &scenes,
                BulkImageMode::PendingOrFailed,
                |_| {},
            )
            .await
            .unwrap();
            assert_eq!(outcome, BulkImageStartOutcome::NothingToGenerate);
            assert!(supervisor.try_lock_bulk_image(), "lock must not be held after a no-op");
        });
    }

    #[test]
    fn all_mode_posts_generate_all_images_then_watches_status() {
        run(async {
            let http = Arc::new(StaticHttpClient::new());
            let http_dyn: Arc<dyn HttpClient> = http.clone();
            http.push_ok("POST", "/projects/p1/generate-all-images", json!({"run_id": "r1"}));
            http.push_ok(
                "GET",
                "/projects/p1/generate-images/status",
                json!({"status": "completed", "run_id": "r1"}),
            );

            let supervisor = JobSupervisor::new();
            let scenes = vec![scene("s1", 1, false)];
            let outcome = run_bulk_image_generation(
                &http_dyn,
                &supervisor,
                "p1",
                &scenes,
                BulkImageMode::All,
                |_| {},
            )
            .await
            .unwrap();
            assert!(matches!(outcome, BulkImageStartOutcome::Started(WatchOutcome::Completed { .. })));
            assert!(!supervisor.is_bulk_image_generating());
            let requests = http.requests();
            assert_eq!(requests[0].path, "/projects/p1/generate-all-images");
            assert_eq!(requests[1].path, "/projects/p1/generate-images/status");
        });
    }

    #[test]
    fn queue_mode_generates_one_scene_at_a_time_then_advances_the_batch() {
        run(async {
            let http = Arc::new(StaticHttpClient::new());
            let http_dyn: Arc<dyn HttpClient> = http.clone();
            http.push_ok(
                "GET",
                "/projects/p1/generate-images/status",
                json!({"generating": 0, "pending": 1}),
            );
            http.push_ok("POST", "/scenes/s2/generate-image", json!({}));
            http.push_ok(
                "GET",
                "/projects/p1/generate-images/status",
                json!({"generating": 0, "pending": 0}),
            );
            http.push_ok("POST", "/projects/p1/generate-images", json!({}));

            let supervisor = JobSupervisor::new();
            let scenes = vec![scene("s1", 1, true), scene("s2", 2, false)];
            let outcome = run_bulk_image_generation(
                &http_dyn,
                &supervisor,
                "p1",
                &scenes,
                BulkImageMode::PendingOrFailed,
                |_| {},
            )
            .await
            .unwrap();
            assert!(matches!(outcome, BulkImageStartOutcome::Started(WatchOutcome::Completed { .. })));
            let requests = http.requests();
            assert_eq!(requests[1].path, "/scenes/s2/generate-image");
            assert_eq!(requests[3].path, "/projects/p1/generate-images");
        });
    }
}
