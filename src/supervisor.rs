//! Job Supervisor (C5, spec §4.5): the per-entity in-flight registry, the
//! fake-progress curve, the 5s polling loop with transient-error tolerance,
//! run-id mismatch detection, and timeout recovery.
//!
//! Per the "Coroutine-style orchestration" design note (spec §9), each watch
//! is modeled as an owned value with an explicit `stop()` rather than a raw
//! timer id in a shared map -- [`WatchHandle`] is that value; [`JobSupervisor`]
//! is the registry of handles, not of timer ids.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Image,
    Audio,
    Video,
    Build,
    SceneFormat,
    BulkAudio,
}

pub const TICK_INTERVAL: Duration = Duration::from_secs(5);
pub const CONSECUTIVE_TRANSIENT_TOLERANCE: u32 = 3;

/// Per-(kind, entity) watch bookkeeping the registry owns.
#[derive(Debug, Clone)]
struct WatchState {
    started_at: Instant,
    attempts: u32,
    consecutive_failures: u32,
    expected_run_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Completed,
    Failed,
}

impl PollStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct PollResult {
    pub status: PollStatus,
    /// The server's correlation token for this run, if the endpoint reports one.
    pub run_id: Option<String>,
    pub message: Option<String>,
}

#[async_trait]
pub trait JobPoll: Send + Sync {
    async fn poll(&self) -> Result<PollResult>;
}

/// Why a watch stopped. Exactly one of these terminates a `run_watch` call.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    Completed { message: Option<String> },
    Failed { message: Option<String> },
    /// Elapsed past the total watch budget with no terminal status.
    TimedOut,
    /// The poll reported a different `run_id` than the one this watch expects:
    /// another run started underneath it.
    RunIdMismatch { observed_run_id: String },
    /// A non-transient error, or 3 consecutive transient errors.
    Aborted { reason: String },
}

/// The fake-progress curve (spec §4.5): 0-45s linear to 80%, 45-90s linear
/// to 95%, >=90s clamped at 95%. Never reaches 100% from the timer alone --
/// only a terminal status does that.
#[must_use]
pub fn fake_progress_percent(elapsed: Duration) -> u8 {
    let secs = elapsed.as_secs_f64();
    let percent = if secs <= 45.0 {
        (secs / 45.0) * 80.0
    } else if secs <= 90.0 {
        80.0 + ((secs - 45.0) / 45.0) * 15.0
    } else {
        95.0
    };
    percent.clamp(0.0, 95.0).round() as u8
}

pub struct JobSupervisor {
    in_flight: Mutex<HashMap<(JobKind, String), WatchState>>,
    bulk_image_generating: AtomicBool,
    scene_processing: Mutex<HashSet<String>>,
}

impl Default for JobSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            bulk_image_generating: AtomicBool::new(false),
            scene_processing: Mutex::new(HashSet::new()),
        }
    }

    /// Idempotent start: refuses a second watch on the same (kind, entity)
    /// unless the caller supplies the same `expected_run_id`.
    pub fn start(
        &self,
        kind: JobKind,
        entity_id: &str,
        expected_run_id: Option<String>,
    ) -> Result<()> {
        let mut guard = self.in_flight.lock().unwrap();
        let key = (kind, entity_id.to_string());
        if let Some(existing) = guard.get(&key) {
            if existing.expected_run_id != expected_run_id {
                return Err(Error::conflict(format!(
                    "{entity_id} already has a {kind:?} job in flight"
                )));
            }
            return Ok(());
        }
        guard.insert(
            key,
            WatchState {
                started_at: Instant::now(),
                attempts: 0,
                consecutive_failures: 0,
                expected_run_id,
            },
        );
        Ok(())
    }

    pub fn is_in_flight(&self, kind: JobKind, entity_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap()
            .contains_key(&(kind, entity_id.to_string()))
    }

    pub fn stop(&self, kind: JobKind, entity_id: &str) {
        self.in_flight
            .lock()
            .unwrap()
            .remove(&(kind, entity_id.to_string()));
    }

    /// Exclusive lock over project-wide bulk image generation (spec §5):
    /// refuses individual scene image jobs while held.
    pub fn try_lock_bulk_image(&self) -> bool {
        self.bulk_image_generating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn unlock_bulk_image(&self) {
        self.bulk_image_generating.store(false, Ordering::SeqCst);
    }

    pub fn is_bulk_image_generating(&self) -> bool {
        self.bulk_image_generating.load(Ordering::SeqCst)
    }

    /// Per-scene save/generate mutex (spec §4.5 `sceneProcessing`).
    pub fn try_lock_scene(&self, scene_id: &str) -> bool {
        self.scene_processing
            .lock()
            .unwrap()
            .insert(scene_id.to_string())
    }

    pub fn unlock_scene(&self, scene_id: &str) {
        self.scene_processing.lock().unwrap().remove(scene_id);
    }

    fn record_attempt(&self, kind: JobKind, entity_id: &str) -> Option<(Instant, u32)> {
        let mut guard = self.in_flight.lock().unwrap();
        let state = guard.get_mut(&(kind, entity_id.to_string()))?;
        state.attempts += 1;
        Some((state.started_at, state.attempts))
    }

    fn record_transient_failure(&self, kind: JobKind, entity_id: &str) -> u32 {
        let mut guard = self.in_flight.lock().unwrap();
        if let Some(state) = guard.get_mut(&(kind, entity_id.to_string())) {
            state.consecutive_failures += 1;
            state.consecutive_failures
        } else {
            0
        }
    }

    fn reset_transient_failures(&self, kind: JobKind, entity_id: &str) {
        let mut guard = self.in_flight.lock().unwrap();
        if let Some(state) = guard.get_mut(&(kind, entity_id.to_string())) {
            state.consecutive_failures = 0;
        }
    }

    /// Drives a poll loop to completion. `total_timeout` is the job-kind
    /// budget (10min for image/scene-format jobs, 25min for the bulk image
    /// sequencer, spec §5). `on_progress` is invoked with the fake-progress
    /// percent on every tick that doesn't terminate the watch.
    pub async fn run_watch<P: JobPoll>(
        &self,
        kind: JobKind,
        entity_id: &str,
        poll: P,
        total_timeout: Duration,
        mut on_progress: impl FnMut(u8) + Send,
    ) -> WatchOutcome {
        loop {
            asupersync::time::sleep(TICK_INTERVAL).await;

            let Some((started_at, _attempts)) = self.record_attempt(kind, entity_id) else {
                return WatchOutcome::Aborted {
                    reason: "watch was stopped externally".to_string(),
                };
            };
            let elapsed = started_at.elapsed();
            if elapsed > total_timeout {
                self.stop(kind, entity_id);
                return WatchOutcome::TimedOut;
            }

            on_progress(fake_progress_percent(elapsed));

            match poll.poll().await {
                Ok(result) => {
                    self.reset_transient_failures(kind, entity_id);

                    let expected_run_id = {
                        let guard = self.in_flight.lock().unwrap();
                        guard
                            .get(&(kind, entity_id.to_string()))
                            .and_then(|s| s.expected_run_id.clone())
                    };
                    if let (Some(expected), Some(observed)) = (&expected_run_id, &result.run_id) {
                        if expected != observed {
                            self.stop(kind, entity_id);
                            return WatchOutcome::RunIdMismatch {
                                observed_run_id: observed.clone(),
                            };
                        }
                    }

                    if result.status.is_terminal() {
                        self.stop(kind, entity_id);
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
                }
                Err(err) if err.is_transient() => {
                    // A 524 on the poll itself is exactly this path: transient,
                    // absorbed, the watch stays alive (spec §4.5).
                    let failures = self.record_transient_failure(kind, entity_id);
                    tracing::warn!(?kind, entity_id, failures, error = %err, "transient poll error");
                    if failures >= CONSECUTIVE_TRANSIENT_TOLERANCE {
                        self.stop(kind, entity_id);
                        return WatchOutcome::Aborted {
                            reason: format!(
                                "{CONSECUTIVE_TRANSIENT_TOLERANCE} consecutive transient errors: {err}"
                            ),
                        };
                    }
                }
                Err(err) => {
                    tracing::warn!(?kind, entity_id, error = %err, "non-transient poll error, aborting");
                    self.stop(kind, entity_id);
                    return WatchOutcome::Aborted {
                        reason: err.to_string(),
                    };
                }
            }
        }
    }
}

/// Image-kind timeout recovery (spec §4.5): before giving up, call the
/// status endpoint with a `force_cleanup` hint once. `Completed` there is
/// treated as success; `Generating` restarts the watch once with a fresh
/// clock; anything else is a hard failure.
pub async fn recover_image_timeout<P: JobPoll>(
    supervisor: &JobSupervisor,
    entity_id: &str,
    force_cleanup_poll: P,
    retry_poll: P,
    total_timeout: Duration,
    mut on_progress: impl FnMut(u8) + Send,
) -> WatchOutcome {
    match force_cleanup_poll.poll().await {
        Ok(result) if result.status == PollStatus::Completed => WatchOutcome::Completed {
            message: result.message,
        },
        Ok(result) if result.status == PollStatus::Pending => {
            if supervisor.start(JobKind::Image, entity_id, None).is_err() {
                return WatchOutcome::Aborted {
                    reason: "could not restart watch after force_cleanup".to_string(),
                };
            }
            supervisor
                .run_watch(
                    JobKind::Image,
                    entity_id,
                    retry_poll,
                    total_timeout,
                    &mut on_progress,
                )
                .await
        }
        Ok(result) => WatchOutcome::Failed {
            message: result.message,
        },
        Err(err) => WatchOutcome::Aborted {
            reason: err.to_string(),
        },
    }
}

/// Button state derivation (spec §4.5 table): a pure function of
/// `(asset present, in-flight, bulk lock, comic already adopted)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageButtonState {
    Idle,
    Running,
    Completed,
    Failed,
    Locked,
    Disallowed,
}

impl ImageButtonState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "画像生成",
            Self::Running => "生成中",
            Self::Completed | Self::Failed => "再生成",
            Self::Locked => "一括処理中",
            Self::Disallowed => "再生成不可",
        }
    }

    pub fn enabled(self) -> bool {
        matches!(self, Self::Idle | Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageAssetState {
    pub has_any_attempt: bool,
    pub last_failed: bool,
    pub comic_adopted: bool,
}

pub fn derive_image_button_state(
    asset: ImageAssetState,
    in_flight: bool,
    bulk_locked: bool,
) -> ImageButtonState {
    if asset.comic_adopted {
        return ImageButtonState::Disallowed;
    }
    if in_flight {
        return ImageButtonState::Running;
    }
    if bulk_locked {
        return ImageButtonState::Locked;
    }
    if !asset.has_any_attempt {
        return ImageButtonState::Idle;
    }
    if asset.last_failed {
        ImageButtonState::Failed
    } else {
        ImageButtonState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    struct ScriptedPoll {
        responses: Mutex<Vec<Result<PollResult>>>,
    }

    #[async_trait]
    impl JobPoll for ScriptedPoll {
        async fn poll(&self) -> Result<PollResult> {
            let mut r = self.responses.lock().unwrap();
            if r.is_empty() {
                return Ok(PollResult {
                    status: PollStatus::Pending,
                    run_id: None,
                    message: None,
                });
            }
            r.remove(0)
        }
    }

    fn run<F: std::future::Future>(fut: F) -> F::Output {
        asupersync::test_utils::run_test(|| fut)
    }

    #[test]
    fn fake_progress_curve_matches_spec_breakpoints() {
        assert_eq!(fake_progress_percent(Duration::from_secs(0)), 0);
        assert_eq!(fake_progress_percent(Duration::from_secs(45)), 80);
        assert_eq!(fake_progress_percent(Duration::from_secs(90)), 95);
        assert_eq!(fake_progress_percent(Duration::from_secs(600)), 95);
        // Never exceeds 95 from the timer alone.
        assert!(fake_progress_percent(Duration::from_secs(10_000)) <= 95);
    }

    #[test]
    fn start_is_idempotent_but_refuses_without_matching_run_id() {
        let sup = JobSupervisor::new();
        sup.start(JobKind::Image, "scene-1", None).unwrap();
        assert!(sup.start(JobKind::Image, "scene-1", Some("run-x".into())).is_err());
        // Same expected_run_id (None == None) is fine.
        assert!(sup.start(JobKind::Image, "scene-1", None).is_ok());
    }

    #[test]
    fn bulk_image_lock_is_exclusive() {
        let sup = JobSupervisor::new();
        assert!(sup.try_lock_bulk_image());
        assert!(!sup.try_lock_bulk_image());
        sup.unlock_bulk_image();
        assert!(sup.try_lock_bulk_image());
    }

    #[test]
    fn watch_completes_on_terminal_status() {
        run(async {
            let sup = JobSupervisor::new();
            sup.start(JobKind::Image, "scene-1", None).unwrap();
            let poll = ScriptedPoll {
                responses: Mutex::new(vec![
                    Ok(PollResult {
                        status: PollStatus::Pending,
                        run_id: None,
                        message: None,
                    }),
                    Ok(PollResult {
                        status: PollStatus::Completed,
                        run_id: None,
                        message: Some("done".into()),
                    }),
                ]),
            };
            let progress = Arc::new(AtomicU32::new(0));
            let progress2 = Arc::clone(&progress);
            let outcome = sup
                .run_watch(
                    JobKind::Image,
                    "scene-1",
                    poll,
                    Duration::from_secs(600),
                    move |p| {
                        progress2.store(u32::from(p), Ordering::SeqCst);
                    },
                )
                .await;
            assert_eq!(
                outcome,
                WatchOutcome::Completed {
                    message: Some("done".into())
                }
            );
            assert!(!sup.is_in_flight(JobKind::Image, "scene-1"));
        });
    }

    #[test]
    fn three_consecutive_transient_errors_abort() {
        run(async {
            let sup = JobSupervisor::new();
            sup.start(JobKind::Video, "scene-2", None).unwrap();
            let poll = ScriptedPoll {
                responses: Mutex::new(vec![
                    Err(Error::transient("network blip")),
                    Err(Error::transient("network blip")),
                    Err(Error::transient("network blip")),
                ]),
            };
            let outcome = sup
                .run_watch(JobKind::Video, "scene-2", poll, Duration::from_secs(600), |_| {})
                .await;
            assert!(matches!(outcome, WatchOutcome::Aborted { .. }));
        });
    }

    #[test]
    fn non_transient_error_aborts_immediately() {
        run(async {
            let sup = JobSupervisor::new();
            sup.start(JobKind::Video, "scene-3", None).unwrap();
            let poll = ScriptedPoll {
                responses: Mutex::new(vec![Err(Error::validation("bad scene id"))]),
            };
            let outcome = sup
                .run_watch(JobKind::Video, "scene-3", poll, Duration::from_secs(600), |_| {})
                .await;
            assert!(matches!(outcome, WatchOutcome::Aborted { .. }));
        });
    }

    #[test]
    fn run_id_mismatch_aborts_with_observed_id() {
        run(async {
            let sup = JobSupervisor::new();
            sup.start(JobKind::SceneFormat, "proj-1", Some("run-a".into()))
                .unwrap();
            let poll = ScriptedPoll {
                responses: Mutex::new(vec![Ok(PollResult {
                    status: PollStatus::Pending,
                    run_id: Some("run-b".into()),
                    message: None,
                })]),
            };
            let outcome = sup
                .run_watch(
                    JobKind::SceneFormat,
                    "proj-1",
                    poll,
                    Duration::from_secs(600),
                    |_| {},
                )
                .await;
            assert_eq!(
                outcome,
                WatchOutcome::RunIdMismatch {
                    observed_run_id: "run-b".to_string()
                }
            );
        });
    }

    #[test]
    fn image_button_state_prioritizes_comic_adopted_over_everything() {
        let asset = ImageAssetState {
            has_any_attempt: true,
            last_failed: false,
            comic_adopted: true,
        };
        assert_eq!(
            derive_image_button_state(asset, true, true),
            ImageButtonState::Disallowed
        );
    }

    #[test]
    fn image_button_state_table() {
        let no_asset = ImageAssetState {
            has_any_attempt: false,
            last_failed: false,
            comic_adopted: false,
        };
        assert_eq!(
            derive_image_button_state(no_asset, false, false),
            ImageButtonState::Idle
        );

        let failed = ImageAssetState {
            has_any_attempt: true,
            last_failed: true,
            comic_adopted: false,
        };
        assert_eq!(
            derive_image_button_state(failed, false, false),
            ImageButtonState::Failed
        );

        assert_eq!(
            derive_image_button_state(no_asset, false, true),
            ImageButtonState::Locked
        );
        assert_eq!(
            derive_image_button_state(no_asset, true, false),
            ImageButtonState::Running
        );
    }
}
