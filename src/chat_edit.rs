//! Chat-Edit Pipeline (C12, spec §4.12): turns a free-text chat message
//! into a classified [`Intent`] (regex-first, AI-fallback), resolves
//! `_contextual` scene references against the playback context, and
//! drives the dry-run -> apply two-phase commit against the backend.

use crate::app_context::AppContext;
use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestKind};
use crate::model::{PatchRequest, PatchStatus};
use crate::playback_context::{fallback_scene_idx, PlaybackContext};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::OnceLock;

pub const INTENT_SCHEMA_VERSION: &str = "rilarc_intent_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// `actions.is_empty()` -- the pipeline replies conversationally and
    /// stops; nothing is sent to the dry-run endpoint.
    Conversation,
    /// At least one action needs disambiguation. A proposal card is
    /// rendered; nothing is sent to the server until the user confirms.
    Suggestion,
    /// Every action is explicit: proceeds straight to dry-run.
    DirectEdit,
}

/// The op vocabulary spec §4.12 enumerates. Kept as `&str` constants
/// rather than a Rust enum because the wire schema (and the AI fallback's
/// output) treats `op` as an open string -- membership is checked at the
/// edges ([`is_known_op`]), not via the type system.
pub mod ops {
    pub const BGM_SET_VOLUME: &str = "bgm.set_volume";
    pub const BGM_SET_LOOP: &str = "bgm.set_loop";
    pub const SFX_SET_VOLUME: &str = "sfx.set_volume";
    pub const SFX_SET_TIMING: &str = "sfx.set_timing";
    pub const SFX_REMOVE: &str = "sfx.remove";
    pub const BALLOON_ADJUST_WINDOW: &str = "balloon.adjust_window";
    pub const BALLOON_SET_POLICY: &str = "balloon.set_policy";
    pub const TELOP_SET_ENABLED: &str = "telop.set_enabled";
    pub const TELOP_SET_ENABLED_SCENE: &str = "telop.set_enabled_scene";
    pub const TELOP_SET_POSITION: &str = "telop.set_position";
    pub const TELOP_SET_SIZE: &str = "telop.set_size";
    pub const MOTION_SET_PRESET: &str = "motion.set_preset";
    pub const MOTION_SET_PRESET_BULK: &str = "motion.set_preset_bulk";

    pub const ALL: &[&str] = &[
        BGM_SET_VOLUME,
        BGM_SET_LOOP,
        SFX_SET_VOLUME,
        SFX_SET_TIMING,
        SFX_REMOVE,
        BALLOON_ADJUST_WINDOW,
        BALLOON_SET_POLICY,
        TELOP_SET_ENABLED,
        TELOP_SET_ENABLED_SCENE,
        TELOP_SET_POSITION,
        TELOP_SET_SIZE,
        MOTION_SET_PRESET,
        MOTION_SET_PRESET_BULK,
    ];

    /// Actions that never target a scene -- these are never ambiguous on
    /// the "no playback context" ground (spec §4.12 Mode B).
    pub fn is_project_scoped(op: &str) -> bool {
        matches!(
            op,
            BGM_SET_VOLUME
                | BGM_SET_LOOP
                | TELOP_SET_ENABLED
                | TELOP_SET_POSITION
                | TELOP_SET_SIZE
                | MOTION_SET_PRESET_BULK
        )
    }
}

pub fn is_known_op(op: &str) -> bool {
    ops::ALL.contains(&op)
}

/// A single scene-targeting operation inside an [`Intent`]. `target` is
/// either an explicit 1-based scene index, the literal `"_contextual"`
/// sentinel, or `null` for a project-scoped op, resolved by
/// [`resolve_target`] before any request is sent. `_contextual` is
/// stripped from the wire payload after resolution (spec §9: "it must be
/// stripped before network serialization").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub op: String,
    #[serde(default)]
    pub target: Value,
    #[serde(default)]
    pub params: Value,
}

impl Action {
    pub fn new(op: impl Into<String>, target: Value, params: Value) -> Self {
        Self {
            op: op.into(),
            target,
            params,
        }
    }

    fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub schema: String,
    pub mode: ChatMode,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub reply: Option<String>,
}

impl Intent {
    pub fn conversation(reply: impl Into<String>) -> Self {
        Self {
            schema: INTENT_SCHEMA_VERSION.to_string(),
            mode: ChatMode::Conversation,
            actions: vec![],
            reply: Some(reply.into()),
        }
    }

    fn with_actions(actions: Vec<Action>) -> Self {
        Self {
            schema: INTENT_SCHEMA_VERSION.to_string(),
            mode: ChatMode::DirectEdit,
            actions,
            reply: None,
        }
    }
}

/// Resolves one action's target against the current playback context.
/// Returns the resolved scene index (irrelevant for project-scoped ops)
/// and whether the no-playback-context fallback path was taken, so the
/// caller can surface a warning (spec §9 Open Question: the fallback
/// warns but never fails the pipeline).
pub fn resolve_target(action: &Action, playback_context: Option<&PlaybackContext>) -> (i32, bool) {
    if let Some(idx) = action.target.as_i64() {
        return (i32::try_from(idx).unwrap_or(1), false);
    }
    if action.target.as_str() == Some("_contextual") {
        return match playback_context {
            Some(ctx) => (ctx.scene_idx, false),
            None => (fallback_scene_idx(), true),
        };
    }
    (fallback_scene_idx(), true)
}

/// Strips the `_contextual` sentinel out of an action before it's
/// serialized to the wire (spec §9): replaces `target` with the resolved
/// numeric scene index, or `null` for a project-scoped op.
pub fn normalize_for_wire(action: &Action, playback_context: Option<&PlaybackContext>) -> Action {
    let mut normalized = action.clone();
    if ops::is_project_scoped(&action.op) {
        normalized.target = Value::Null;
    } else {
        let (idx, _fell_back) = resolve_target(action, playback_context);
        normalized.target = json!(idx);
    }
    normalized
}

/// Per-action `isActionExplicit` predicate (spec §4.12 Step C). An action
/// is explicit when it needs no further disambiguation: project-scoped
/// ops always are; scene-scoped ops are explicit when they carry a
/// numeric target, or `_contextual` with a playback context available;
/// and its params must already be within the validated range (an
/// out-of-range value is ambiguous, not a hard error, until dry-run
/// actually rejects it).
pub fn is_action_explicit(action: &Action, has_playback_context: bool) -> bool {
    if !is_known_op(&action.op) {
        return false;
    }
    let target_explicit = if ops::is_project_scoped(&action.op) {
        true
    } else {
        match action.target.as_i64() {
            Some(_) => true,
            None => action.target.as_str() == Some("_contextual") && has_playback_context,
        }
    };
    target_explicit && params_in_range(action)
}

fn params_in_range(action: &Action) -> bool {
    match action.op.as_str() {
        ops::BGM_SET_VOLUME | ops::SFX_SET_VOLUME => {
            action.param_f64("volume").is_some_and(|v| (0.0..=1.0).contains(&v))
        }
        ops::BALLOON_SET_POLICY => matches!(
            action.param_str("policy"),
            Some("always_on" | "voice_window" | "manual_window")
        ),
        ops::TELOP_SET_POSITION => matches!(action.param_str("position_preset"), Some("top" | "center" | "bottom")),
        ops::TELOP_SET_SIZE => matches!(action.param_str("size_preset"), Some("sm" | "md" | "lg")),
        ops::BALLOON_ADJUST_WINDOW => {
            // Open Question (spec §9): both delta_* and absolute_* present
            // in one action is the ambiguous case dry-run must reject; here
            // it simply makes the action non-explicit so Mode B intervenes
            // with a confirmation step instead of silently picking one.
            let has_delta = action.params.get("delta_start_ms").is_some() || action.params.get("delta_end_ms").is_some();
            let has_absolute =
                action.params.get("absolute_start_ms").is_some() || action.params.get("absolute_end_ms").is_some();
            !(has_delta && has_absolute) && (has_delta || has_absolute)
        }
        _ => true,
    }
}

/// Classifies a parsed [`Intent`]'s actions into one of the three modes
/// (spec §4.12 Step C). The three modes partition the input space: empty
/// actions is always Conversation; otherwise DirectEdit iff every action
/// is explicit, Suggestion otherwise.
pub fn classify_mode(actions: &[Action], has_playback_context: bool) -> ChatMode {
    if actions.is_empty() {
        return ChatMode::Conversation;
    }
    if actions.iter().all(|a| is_action_explicit(a, has_playback_context)) {
        ChatMode::DirectEdit
    } else {
        ChatMode::Suggestion
    }
}

fn motion_preset_id(label: &str) -> &'static str {
    match label {
        "ズームイン" => "zoom_in",
        "ズームアウト" => "zoom_out",
        "パン" => "pan",
        "スライド" => "slide",
        _ => "auto",
    }
}

fn balloon_policy_id(label: &str) -> &'static str {
    match label {
        "出しっぱなし" => "always_on",
        "手動" => "manual_window",
        _ => "voice_window",
    }
}

struct Patterns {
    bgm_volume: Regex,
    bgm_loop_on: Regex,
    bgm_loop_off: Regex,
    sfx_volume: Regex,
    sfx_remove: Regex,
    balloon_policy: Regex,
    telop_enable_scene: Regex,
    telop_enable_project: Regex,
    telop_position: Regex,
    telop_size: Regex,
    motion_scene: Regex,
    motion_bulk: Regex,
}

impl Patterns {
    fn compile() -> Self {
        Self {
            bgm_volume: Regex::new(r"(?i)BGM\s*(?:の)?\s*音量\s*(?:を)?\s*(\d+)\s*%").unwrap(),
            bgm_loop_on: Regex::new(r"(?i)BGM\s*(?:を)?\s*ループ(?:させ)?(?:て)?(?!.*(?:オフ|しない))").unwrap(),
            bgm_loop_off: Regex::new(r"(?i)BGM\s*(?:の)?\s*ループ\s*(?:を)?\s*(?:オフ|しない)").unwrap(),
            sfx_volume: Regex::new(r"(?i)シーン\s*(\d+)\s*(?:の)?\s*SFX\s*(\d+)\s*(?:の)?\s*音量\s*(?:を)?\s*(\d+)\s*%")
                .unwrap(),
            sfx_remove: Regex::new(r"(?i)シーン\s*(\d+)\s*(?:の)?\s*SFX\s*(\d+)\s*(?:を)?\s*削除").unwrap(),
            balloon_policy: Regex::new(
                r"(?i)シーン\s*(\d+)\s*(?:の)?\s*バブル\s*(\d+)\s*(?:を)?\s*(出しっぱなし|喋る時だけ|発話中だけ|手動)",
            )
            .unwrap(),
            telop_enable_scene: Regex::new(r"(?i)(?:この|シーン\s*(\d+)\s*の)\s*テロップ\s*(?:を)?\s*(表示|非表示)")
                .unwrap(),
            telop_enable_project: Regex::new(r"(?i)^テロップ\s*(?:を)?\s*(表示|非表示)").unwrap(),
            telop_position: Regex::new(r"(?i)テロップ\s*(?:を)?\s*(上|中央|下)\s*に").unwrap(),
            telop_size: Regex::new(r"(?i)テロップ\s*(?:を)?\s*(小さく|普通に|大きく)").unwrap(),
            motion_scene: Regex::new(
                r"(?i)(?:この|シーン\s*(\d+)\s*の)\s*モーション\s*(?:を)?\s*(ズームイン|ズームアウト|パン|スライド|自動)",
            )
            .unwrap(),
            motion_bulk: Regex::new(
                r"(?i)(?:すべての|全)\s*シーン\s*の\s*モーション\s*(?:を)?\s*(ズームイン|ズームアウト|パン|スライド|自動)",
            )
            .unwrap(),
        }
    }
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(Patterns::compile)
}

/// Regex-first deterministic matcher (spec §4.12 Step A): Japanese
/// imperative phrasings for volume percents, policy verbs, enable/position/
/// size toggles and motion presets. The first pattern that matches wins.
/// Falls through to the AI fallback (returns `None`) when nothing matches.
pub fn parse_regex(message: &str) -> Option<Intent> {
    let p = patterns();

    if let Some(caps) = p.sfx_volume.captures(message) {
        let scene_idx: i64 = caps[1].parse().ok()?;
        let cue_no: i64 = caps[2].parse().ok()?;
        let volume: f64 = caps[3].parse::<f64>().ok()? / 100.0;
        return Some(Intent::with_actions(vec![Action::new(
            ops::SFX_SET_VOLUME,
            json!(scene_idx),
            json!({ "cue_no": cue_no, "volume": volume }),
        )]));
    }
    if let Some(caps) = p.sfx_remove.captures(message) {
        let scene_idx: i64 = caps[1].parse().ok()?;
        let cue_no: i64 = caps[2].parse().ok()?;
        return Some(Intent::with_actions(vec![Action::new(
            ops::SFX_REMOVE,
            json!(scene_idx),
            json!({ "cue_no": cue_no }),
        )]));
    }
    if let Some(caps) = p.balloon_policy.captures(message) {
        let scene_idx: i64 = caps[1].parse().ok()?;
        let balloon_no: i64 = caps[2].parse().ok()?;
        let policy = balloon_policy_id(&caps[3]);
        return Some(Intent::with_actions(vec![Action::new(
            ops::BALLOON_SET_POLICY,
            json!(scene_idx),
            json!({ "balloon_no": balloon_no, "policy": policy }),
        )]));
    }
    if let Some(caps) = p.bgm_volume.captures(message) {
        let volume: f64 = caps[1].parse::<f64>().ok()? / 100.0;
        return Some(Intent::with_actions(vec![Action::new(
            ops::BGM_SET_VOLUME,
            Value::Null,
            json!({ "volume": volume }),
        )]));
    }
    if p.bgm_loop_off.is_match(message) {
        return Some(Intent::with_actions(vec![Action::new(
            ops::BGM_SET_LOOP,
            Value::Null,
            json!({ "loop": false }),
        )]));
    }
    if p.bgm_loop_on.is_match(message) {
        return Some(Intent::with_actions(vec![Action::new(
            ops::BGM_SET_LOOP,
            Value::Null,
            json!({ "loop": true }),
        )]));
    }
    if let Some(caps) = p.telop_enable_scene.captures(message) {
        let enabled = &caps[2] == "表示";
        let target = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .map_or_else(|| json!("_contextual"), |idx| json!(idx));
        return Some(Intent::with_actions(vec![Action::new(
            ops::TELOP_SET_ENABLED_SCENE,
            target,
            json!({ "enabled": enabled }),
        )]));
    }
    if let Some(caps) = p.telop_enable_project.captures(message) {
        let enabled = &caps[1] == "表示";
        return Some(Intent::with_actions(vec![Action::new(
            ops::TELOP_SET_ENABLED,
            Value::Null,
            json!({ "enabled": enabled }),
        )]));
    }
    if let Some(caps) = p.telop_position.captures(message) {
        let preset = match &caps[1] {
            "上" => "top",
            "下" => "bottom",
            _ => "center",
        };
        return Some(Intent::with_actions(vec![Action::new(
            ops::TELOP_SET_POSITION,
            Value::Null,
            json!({ "position_preset": preset }),
        )]));
    }
    if let Some(caps) = p.telop_size.captures(message) {
        let preset = match &caps[1] {
            "小さく" => "sm",
            "大きく" => "lg",
            _ => "md",
        };
        return Some(Intent::with_actions(vec![Action::new(
            ops::TELOP_SET_SIZE,
            Value::Null,
            json!({ "size_preset": preset }),
        )]));
    }
    if let Some(caps) = p.motion_bulk.captures(message) {
        let preset_id = motion_preset_id(&caps[1]);
        return Some(Intent::with_actions(vec![Action::new(
            ops::MOTION_SET_PRESET_BULK,
            Value::Null,
            json!({ "preset_id": preset_id }),
        )]));
    }
    if let Some(caps) = p.motion_scene.captures(message) {
        let preset_id = motion_preset_id(&caps[2]);
        let target = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .map_or_else(|| json!("_contextual"), |idx| json!(idx));
        return Some(Intent::with_actions(vec![Action::new(ops::MOTION_SET_PRESET, target, json!({ "preset_id": preset_id }))]));
    }
    None
}

/// Seam for the AI fallback parser (spec §4.12): anything the regex
/// fast-path doesn't recognize goes through a model call that returns a
/// schema-validated [`Intent`]. Kept as a trait so tests can supply a
/// scripted double instead of a real model client.
#[async_trait]
pub trait AiIntentSource: Send + Sync {
    async fn parse(&self, message: &str, playback_context: Option<&PlaybackContext>) -> Result<Intent>;
}

/// The HTTP-backed AI fallback: `POST /projects/:id/chat-edits/parse-ai`
/// (spec §6) carrying the user message plus the current playback context.
pub struct HttpAiIntentSource {
    http: Arc<dyn HttpClient>,
    project_id: String,
}

impl HttpAiIntentSource {
    pub fn new(http: Arc<dyn HttpClient>, project_id: impl Into<String>) -> Self {
        Self {
            http,
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl AiIntentSource for HttpAiIntentSource {
    async fn parse(&self, message: &str, playback_context: Option<&PlaybackContext>) -> Result<Intent> {
        let body = self
            .http
            .post(
                &format!("/projects/{}/chat-edits/parse-ai", self.project_id),
                json!({
                    "user_message": message,
                    "playback_context": playback_context,
                }),
                RequestKind::LightRead,
            )
            .await?;
        Ok(serde_json::from_value(body)?)
    }
}

/// Regex-first, AI-fallback parser (spec §4.12).
pub struct IntentParser {
    ai: Arc<dyn AiIntentSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Regex,
    Ai,
}

impl ParseMode {
    /// The `source` field a [`PatchRequest`] records (spec §3).
    pub fn as_source(self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::Ai => "ai",
        }
    }
}

pub struct ParsedIntent {
    pub intent: Intent,
    pub parse_mode: ParseMode,
}

impl IntentParser {
    pub fn new(ai: Arc<dyn AiIntentSource>) -> Self {
        Self { ai }
    }

    pub async fn parse(&self, message: &str, playback_context: Option<&PlaybackContext>) -> Result<ParsedIntent> {
        if let Some(intent) = parse_regex(message) {
            return Ok(ParsedIntent {
                intent,
                parse_mode: ParseMode::Regex,
            });
        }
        let intent = self.ai.parse(message, playback_context).await?;
        Ok(ParsedIntent {
            intent,
            parse_mode: ParseMode::Ai,
        })
    }
}

/// One entry in the dry-run change summary (spec §4.12 Step D): the UI
/// renders one row per change, with an icon keyed on `kind`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeSummaryEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: Value,
    pub detail: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunSummary {
    pub changes: Vec<ChangeSummaryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct DryRunBody {
    ok: bool,
    patch_request_id: String,
    resolved_ops: u32,
    summary: DryRunSummary,
    #[serde(default)]
    comic_regeneration_required: Vec<String>,
    requires_confirmation: bool,
    #[serde(default)]
    telop_settings_override: Option<Value>,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// Everything the Step D explain panel needs, plus the [`PatchRequest`]
/// the rest of the pipeline threads through to `apply`.
#[derive(Debug, Clone)]
pub struct DryRunOutcome {
    pub patch: PatchRequest,
    pub resolved_ops: u32,
    pub summary: DryRunSummary,
    pub comic_regeneration_required: Vec<String>,
    pub requires_confirmation: bool,
    pub telop_settings_override: Option<Value>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Starts the two-phase commit: validates the intent's actions against
/// current project state without applying them (spec §4.12 Step D).
pub async fn dry_run(
    http: &Arc<dyn HttpClient>,
    project_id: &str,
    user_message: &str,
    intent: &Intent,
    source: &str,
    video_build_id: Option<&str>,
) -> Result<DryRunOutcome> {
    let body = http
        .post(
            &format!("/projects/{project_id}/chat-edits/dry-run"),
            json!({
                "user_message": user_message,
                "intent": intent,
                "video_build_id": video_build_id,
            }),
            RequestKind::LightRead,
        )
        .await?;
    let response: DryRunBody = serde_json::from_value(body)?;
    let status = if response.ok {
        PatchStatus::DryRunOk
    } else {
        PatchStatus::DryRunFailed
    };
    let patch = PatchRequest {
        id: response.patch_request_id,
        user_message: user_message.to_string(),
        ops_json: json!(intent.actions),
        source: source.to_string(),
        status,
        generated_video_build_id: None,
    };
    Ok(DryRunOutcome {
        patch,
        resolved_ops: response.resolved_ops,
        summary: response.summary,
        comic_regeneration_required: response.comic_regeneration_required,
        requires_confirmation: response.requires_confirmation,
        telop_settings_override: response.telop_settings_override,
        errors: response.errors,
        warnings: response.warnings,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AutoRebake {
    #[serde(default)]
    requested: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ApplyBody {
    ok: bool,
    #[serde(default)]
    new_video_build_id: Option<String>,
    #[serde(default)]
    auto_rebake: AutoRebake,
}

/// Result of a successful `apply` call: the updated patch, plus whether a
/// rebake notice should be surfaced (spec §4.12 Step E).
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub patch: PatchRequest,
    pub auto_rebake_requested: bool,
}

/// Commits a previously dry-run patch (spec §4.12 Step E). Refuses to
/// apply a patch whose dry-run didn't succeed, since applying an
/// unvalidated patch would skip the whole point of the two-phase commit.
/// On success: captures the new build id into `pendingScrollToBuildId` so
/// the Export tab auto-scrolls to it, and invalidates the rebake cache
/// when the server reports `auto_rebake.requested`.
pub async fn apply(ctx: &AppContext, project_id: &str, patch: &PatchRequest) -> Result<ApplyOutcome> {
    if patch.status != PatchStatus::DryRunOk {
        return Err(Error::validation(format!(
            "cannot apply patch {} before a successful dry-run",
            patch.id
        )));
    }
    let body = ctx
        .http
        .post(
            &format!("/projects/{project_id}/chat-edits/apply"),
            json!({ "patch_request_id": patch.id }),
            RequestKind::LightRead,
        )
        .await?;
    let response: ApplyBody = serde_json::from_value(body)?;
    let status = if response.ok {
        PatchStatus::ApplyOk
    } else {
        PatchStatus::ApplyFailed
    };
    let updated = PatchRequest {
        status,
        generated_video_build_id: response.new_video_build_id.clone(),
        ..patch.clone()
    };
    if let Some(build_id) = &response.new_video_build_id {
        ctx.with_chat_edit_state(|s| s.pending_scroll_to_build_id = Some(build_id.clone()));
    }
    if response.auto_rebake.requested {
        ctx.rebake_cache.invalidate(project_id);
    }
    Ok(ApplyOutcome {
        patch: updated,
        auto_rebake_requested: response.auto_rebake.requested,
    })
}

/// One row in the chat-edit explain panel (spec §4.12): what the user
/// asked, how it was classified and why, which actions (if any) needed
/// disambiguation, and the resulting patch's outcome.
#[derive(Debug, Clone)]
pub struct ExplainRecord {
    pub user_message: String,
    pub mode: ChatMode,
    pub action_count: usize,
    pub rejected_actions: Vec<Action>,
    pub context: Option<PlaybackContext>,
    pub mode_reason: String,
    pub patch_status: Option<PatchStatus>,
}

pub fn explain_record(
    user_message: &str,
    intent: &Intent,
    context: Option<&PlaybackContext>,
    patch: Option<&PatchRequest>,
) -> ExplainRecord {
    let has_context = context.is_some();
    let mode = classify_mode(&intent.actions, has_context);
    let rejected_actions: Vec<Action> = intent
        .actions
        .iter()
        .filter(|a| !is_action_explicit(a, has_context))
        .cloned()
        .collect();
    let mode_reason = match mode {
        ChatMode::Conversation => "no actions parsed from the message".to_string(),
        ChatMode::DirectEdit => "every action was explicit".to_string(),
        ChatMode::Suggestion => format!("{} action(s) required disambiguation", rejected_actions.len()),
    };
    ExplainRecord {
        user_message: user_message.to_string(),
        mode,
        action_count: intent.actions.len(),
        rejected_actions,
        context: context.cloned(),
        mode_reason,
        patch_status: patch.map(|p| p.status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StaticHttpClient;

    fn compiled_intent_schema() -> jsonschema::Validator {
        let schema_path =
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("docs/schema/chat_edit_intent.json");
        let raw = std::fs::read_to_string(&schema_path).unwrap();
        let schema: serde_json::Value = serde_json::from_str(&raw).unwrap();
        jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)
            .unwrap()
    }

    fn ctx(scene_idx: i32) -> PlaybackContext {
        PlaybackContext {
            scene_id: format!("s{scene_idx}"),
            scene_idx,
            scene_offset_ms: 0,
            position_within_scene_ms: 0,
        }
    }

    /// Every intent the regex fast-path produces must still validate
    /// against the published schema. This fails loudly if a future field
    /// gets added to [`Intent`]/[`Action`] without updating
    /// `docs/schema/chat_edit_intent.json` alongside it.
    #[test]
    fn regex_and_conversation_intents_satisfy_the_published_schema() {
        let schema = compiled_intent_schema();

        let balloon = parse_regex("シーン2のバブル1を出しっぱなしに").unwrap();
        let value = serde_json::to_value(&normalize_for_wire(&balloon.actions[0], None)).unwrap();
        assert!(schema.is_valid(&value), "balloon intent failed schema: {value}");

        let conversation = Intent::conversation("こんにちは");
        let value = serde_json::to_value(&conversation).unwrap();
        assert!(schema.is_valid(&value), "conversation intent failed schema: {value}");
    }

    #[test]
    fn schema_rejects_an_unknown_mode() {
        let schema = compiled_intent_schema();
        let value = json!({
            "schema": "rilarc_intent_v1",
            "mode": "not_a_real_mode",
            "actions": []
        });
        assert!(!schema.is_valid(&value));
    }

    #[test]
    fn balloon_policy_phrasing_resolves_to_set_policy() {
        let intent = parse_regex("シーン2のバブル1を出しっぱなしに").unwrap();
        let a = &intent.actions[0];
        assert_eq!(a.op, ops::BALLOON_SET_POLICY);
        assert_eq!(a.target, json!(2));
        assert_eq!(a.params["balloon_no"], json!(1));
        assert_eq!(a.params["policy"], json!("always_on"));
    }

    #[test]
    fn balloon_voice_window_phrasing() {
        let intent = parse_regex("シーン3のバブル2を喋る時だけ表示").unwrap();
        assert_eq!(intent.actions[0].params["policy"], json!("voice_window"));
    }

    #[test]
    fn bgm_volume_percent_phrasing() {
        let intent = parse_regex("BGMの音量を50%に").unwrap();
        let a = &intent.actions[0];
        assert_eq!(a.op, ops::BGM_SET_VOLUME);
        assert!(a.target.is_null());
        assert!((a.params["volume"].as_f64().unwrap() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn sfx_volume_and_remove_phrasings() {
        let intent = parse_regex("シーン1のSFX2の音量を80%に").unwrap();
        assert_eq!(intent.actions[0].op, ops::SFX_SET_VOLUME);
        assert_eq!(intent.actions[0].params["cue_no"], json!(2));

        let intent = parse_regex("シーン1のSFX2を削除").unwrap();
        assert_eq!(intent.actions[0].op, ops::SFX_REMOVE);
    }

    #[test]
    fn telop_enable_and_position_and_size_phrasings() {
        let intent = parse_regex("テロップを非表示").unwrap();
        assert_eq!(intent.actions[0].op, ops::TELOP_SET_ENABLED);
        assert_eq!(intent.actions[0].params["enabled"], json!(false));

        let intent = parse_regex("テロップを上に").unwrap();
        assert_eq!(intent.actions[0].params["position_preset"], json!("top"));

        let intent = parse_regex("テロップを大きく").unwrap();
        assert_eq!(intent.actions[0].params["size_preset"], json!("lg"));
    }

    #[test]
    fn motion_bulk_and_contextual_scene_phrasings() {
        let intent = parse_regex("すべてのシーンのモーションをズームインに").unwrap();
        assert_eq!(intent.actions[0].op, ops::MOTION_SET_PRESET_BULK);
        assert_eq!(intent.actions[0].params["preset_id"], json!("zoom_in"));

        let intent = parse_regex("このシーンのモーションをパンに").unwrap();
        assert_eq!(intent.actions[0].op, ops::MOTION_SET_PRESET);
        assert_eq!(intent.actions[0].target, json!("_contextual"));
    }

    #[test]
    fn regex_returns_none_for_unrecognized_phrasing() {
        assert!(parse_regex("このプロジェクトについて教えて").is_none());
    }

    #[test]
    fn contextual_target_resolves_against_playback_context() {
        let action = Action::new(ops::MOTION_SET_PRESET, json!("_contextual"), json!({"preset_id": "pan"}));
        let (idx, fell_back) = resolve_target(&action, Some(&ctx(2)));
        assert_eq!(idx, 2);
        assert!(!fell_back);
    }

    #[test]
    fn contextual_target_falls_back_to_scene_one_without_context() {
        let action = Action::new(ops::MOTION_SET_PRESET, json!("_contextual"), json!({"preset_id": "pan"}));
        let (idx, fell_back) = resolve_target(&action, None);
        assert_eq!(idx, 1);
        assert!(fell_back);
    }

    #[test]
    fn explicit_numeric_target_passes_through_unchanged() {
        let action = Action::new(ops::MOTION_SET_PRESET, json!(5), json!({"preset_id": "pan"}));
        let (idx, fell_back) = resolve_target(&action, None);
        assert_eq!(idx, 5);
        assert!(!fell_back);
    }

    #[test]
    fn mode_a_conversation_iff_zero_actions() {
        assert_eq!(classify_mode(&[], false), ChatMode::Conversation);
        assert_eq!(classify_mode(&[], true), ChatMode::Conversation);
    }

    #[test]
    fn mode_c_direct_edit_when_every_action_is_explicit() {
        let actions = vec![Action::new(ops::BGM_SET_VOLUME, Value::Null, json!({"volume": 0.5}))];
        assert_eq!(classify_mode(&actions, false), ChatMode::DirectEdit);
    }

    #[test]
    fn mode_b_suggestion_when_contextual_target_has_no_playback_context() {
        let actions = vec![Action::new(
            ops::MOTION_SET_PRESET,
            json!("_contextual"),
            json!({"preset_id": "zoom_in"}),
        )];
        assert_eq!(classify_mode(&actions, false), ChatMode::Suggestion);
        assert_eq!(classify_mode(&actions, true), ChatMode::DirectEdit);
    }

    #[test]
    fn mode_b_suggestion_when_a_volume_param_is_out_of_range() {
        let actions = vec![Action::new(ops::BGM_SET_VOLUME, Value::Null, json!({"volume": 1.5}))];
        assert_eq!(classify_mode(&actions, false), ChatMode::Suggestion);
    }

    #[test]
    fn mode_b_suggestion_when_balloon_window_mixes_delta_and_absolute() {
        let actions = vec![Action::new(
            ops::BALLOON_ADJUST_WINDOW,
            json!(1),
            json!({"delta_start_ms": 100, "absolute_end_ms": 2000}),
        )];
        assert_eq!(classify_mode(&actions, false), ChatMode::Suggestion);
    }

    #[test]
    fn normalize_for_wire_resolves_contextual_and_nulls_project_scoped() {
        let scene_action = Action::new(ops::MOTION_SET_PRESET, json!("_contextual"), json!({"preset_id": "pan"}));
        assert_eq!(normalize_for_wire(&scene_action, Some(&ctx(4))).target, json!(4));

        let project_action = Action::new(ops::BGM_SET_VOLUME, json!(3), json!({"volume": 0.5}));
        assert!(normalize_for_wire(&project_action, None).target.is_null());
    }

    struct ScriptedAi {
        intent: Intent,
    }

    #[async_trait]
    impl AiIntentSource for ScriptedAi {
        async fn parse(&self, _message: &str, _ctx: Option<&PlaybackContext>) -> Result<Intent> {
            Ok(self.intent.clone())
        }
    }

    fn run<F: std::future::Future>(fut: F) -> F::Output {
        asupersync::test_utils::run_test(|| fut)
    }

    #[test]
    fn parser_prefers_regex_over_ai_fallback() {
        run(async {
            let ai = Arc::new(ScriptedAi {
                intent: Intent::conversation("should not be used"),
            });
            let parser = IntentParser::new(ai);
            let parsed = parser.parse("テロップを非表示", None).await.unwrap();
            assert_eq!(parsed.parse_mode, ParseMode::Regex);
            assert_eq!(parsed.intent.actions[0].op, ops::TELOP_SET_ENABLED);
        });
    }

    #[test]
    fn parser_falls_back_to_ai_when_regex_misses() {
        run(async {
            let ai = Arc::new(ScriptedAi {
                intent: Intent::conversation("hi there"),
            });
            let parser = IntentParser::new(ai);
            let parsed = parser.parse("こんにちは", None).await.unwrap();
            assert_eq!(parsed.parse_mode, ParseMode::Ai);
            assert_eq!(parsed.intent.mode, ChatMode::Conversation);
        });
    }

    fn app_ctx() -> AppContext {
        AppContext::new(Arc::new(StaticHttpClient::new()))
    }

    #[test]
    fn apply_refuses_a_patch_without_a_successful_dry_run() {
        run(async {
            let ctx = app_ctx();
            let patch = PatchRequest {
                id: "patch-1".into(),
                user_message: "balloon always_on".into(),
                ops_json: json!({}),
                source: "regex".into(),
                status: PatchStatus::Draft,
                generated_video_build_id: None,
            };
            let err = apply(&ctx, "p1", &patch).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        });
    }

    #[test]
    fn dry_run_then_apply_round_trips_through_the_http_client() {
        run(async {
            let http = Arc::new(StaticHttpClient::new());
            let scripted_ctx = AppContext::new(http.clone() as Arc<dyn HttpClient>);
            http.push_ok(
                "POST",
                "/projects/p1/chat-edits/dry-run",
                json!({
                    "ok": true,
                    "patch_request_id": "patch-1",
                    "resolved_ops": 1,
                    "summary": {"changes": [{"type": "balloon", "target": 2, "detail": "policy -> always_on"}]},
                    "comic_regeneration_required": [],
                    "requires_confirmation": false,
                    "errors": [],
                    "warnings": []
                }),
            );
            http.push_ok(
                "POST",
                "/projects/p1/chat-edits/apply",
                json!({
                    "ok": true,
                    "new_video_build_id": "b42",
                    "auto_rebake": {"requested": true}
                }),
            );

            let intent = parse_regex("シーン2のバブル1を出しっぱなしに").unwrap();
            let dry_run_outcome = dry_run(&scripted_ctx.http, "p1", "バブル1を出しっぱなしに", &intent, "regex", None)
                .await
                .unwrap();
            assert_eq!(dry_run_outcome.patch.status, PatchStatus::DryRunOk);
            assert_eq!(dry_run_outcome.resolved_ops, 1);

            let applied = apply(&scripted_ctx, "p1", &dry_run_outcome.patch).await.unwrap();
            assert_eq!(applied.patch.status, PatchStatus::ApplyOk);
            assert_eq!(applied.patch.generated_video_build_id.as_deref(), Some("b42"));
            assert!(applied.auto_rebake_requested);
            assert_eq!(
                scripted_ctx.chat_edit_state().pending_scroll_to_build_id.as_deref(),
                Some("b42")
            );
        });
    }

    #[test]
    fn explain_record_lists_rejected_actions_for_suggestion_mode() {
        let intent = Intent::with_actions(vec![Action::new(
            ops::MOTION_SET_PRESET,
            json!("_contextual"),
            json!({"preset_id": "zoom_in"}),
        )]);
        let record = explain_record("このシーンのモーションをズームインに", &intent, None, None);
        assert_eq!(record.mode, ChatMode::Suggestion);
        assert_eq!(record.rejected_actions.len(), 1);
        assert!(record.mode_reason.contains('1'));
    }
}
