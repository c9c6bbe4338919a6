//! Scene Edit Transaction (C9, spec §4.9): the scene editor modal's
//! Characters/Traits tabs, dirty-tracked and saved as one atomic
//! `save-edit-context` call, plus an Utterances tab and four independent
//! sub-transactions (motion, duration override, BGM, SFX) that each save
//! on their own without requiring the main form to be dirty or saved
//! first.

use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestKind};
use crate::model::{Scene, SceneBgm, SceneTrait, SfxCue};
use crate::supervisor::JobSupervisor;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

/// Where the modal was opened from (spec §4.9): hides the "chat edit"
/// shortcut when opened from Builder, since that surface already has its
/// own editing affordances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenSource {
    Builder,
    VideoBuild,
}

impl OpenSource {
    pub fn shows_chat_edit_shortcut(self) -> bool {
        self != Self::Builder
    }
}

/// The Characters + Traits tabs' editable state -- the part saved
/// atomically via `save-edit-context` (spec §4.9). Image characters are
/// compared by set equality, voice character by equality, and traits by
/// per-key string equality after trim, matching the modal's `isDirty`
/// computation.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneEditForm {
    pub image_character_keys: Vec<String>,
    pub voice_character_key: Option<String>,
    pub scene_traits: Vec<SceneTrait>,
}

impl SceneEditForm {
    pub fn from_scene(scene: &Scene) -> Self {
        Self {
            image_character_keys: scene.characters.clone(),
            voice_character_key: scene.voice_character.clone(),
            scene_traits: scene.scene_traits.clone(),
        }
    }

    /// Invariant mirrored from [`Scene::image_character_count_is_valid`]:
    /// the form must reject a 4th character before the user ever saves.
    pub fn character_count_is_valid(&self) -> bool {
        self.image_character_keys.len() <= Scene::MAX_IMAGE_CHARACTERS
    }

    /// Mirrors [`Scene::voice_character_is_consistent`] at the form level,
    /// so the modal can disable Save instead of surfacing a server error.
    pub fn voice_character_is_consistent(&self) -> bool {
        match &self.voice_character_key {
            None => true,
            Some(voice) => self.image_character_keys.iter().any(|c| c == voice),
        }
    }

    fn image_characters_set(&self) -> HashSet<&str> {
        self.image_character_keys.iter().map(String::as_str).collect()
    }

    fn traits_are_equal(&self, other: &Self) -> bool {
        let normalize = |traits: &[SceneTrait]| -> Vec<(String, String)> {
            let mut pairs: Vec<(String, String)> = traits
                .iter()
                .map(|t| (t.character_key.clone(), t.text.trim().to_string()))
                .collect();
            pairs.sort();
            pairs
        };
        normalize(&self.scene_traits) == normalize(&other.scene_traits)
    }
}

/// Tracks a baseline snapshot against the in-progress edit and reports
/// which fields changed, so the modal can warn on navigate-away and the
/// save request can include only what's needed for an audit trail.
pub struct SceneEditTransaction {
    scene_id: String,
    open_source: OpenSource,
    baseline: SceneEditForm,
    pub working: SceneEditForm,
}

impl SceneEditTransaction {
    pub fn open(scene: &Scene, open_source: OpenSource) -> Self {
        let form = SceneEditForm::from_scene(scene);
        Self {
            scene_id: scene.id.clone(),
            open_source,
            baseline: form.clone(),
            working: form,
        }
    }

    pub fn shows_chat_edit_shortcut(&self) -> bool {
        self.open_source.shows_chat_edit_shortcut()
    }

    /// `isDirty`: image-chars by set equality, voice char by equality,
    /// traits by per-key string equality after trim (spec §4.9).
    pub fn is_dirty(&self) -> bool {
        self.working.image_characters_set() != self.baseline.image_characters_set()
            || self.working.voice_character_key != self.baseline.voice_character_key
            || !self.working.traits_are_equal(&self.baseline)
    }

    /// Label the Save button reflects: "変更なし" when clean, "保存" otherwise.
    pub fn save_button_label(&self) -> &'static str {
        if self.is_dirty() {
            "保存"
        } else {
            "変更なし"
        }
    }

    pub fn dirty_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.working.image_characters_set() != self.baseline.image_characters_set() {
            fields.push("image_character_keys");
        }
        if self.working.voice_character_key != self.baseline.voice_character_key {
            fields.push("voice_character_key");
        }
        if !self.working.traits_are_equal(&self.baseline) {
            fields.push("scene_traits");
        }
        fields
    }

    /// Saves the Characters + Traits tabs atomically via a single
    /// `POST /scenes/:id/save-edit-context`, guarded by the scene lock so
    /// a concurrent bulk job can't race a manual edit on the same scene
    /// (spec §4.5 `sceneProcessing`, §4.9). A no-op when nothing is dirty.
    pub async fn save(&mut self, http: &Arc<dyn HttpClient>, supervisor: &JobSupervisor) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        if !self.working.character_count_is_valid() {
            return Err(Error::validation(format!(
                "at most {} image characters are allowed",
                Scene::MAX_IMAGE_CHARACTERS
            )));
        }
        if !self.working.voice_character_is_consistent() {
            return Err(Error::validation(
                "voice character must be one of the scene's assigned characters",
            ));
        }

        if !supervisor.try_lock_scene(&self.scene_id) {
            return Err(Error::conflict(format!(
                "scene {} is being processed by another operation",
                self.scene_id
            )));
        }
        let result = http
            .post(
                &format!("/scenes/{}/save-edit-context", self.scene_id),
                json!({
                    "image_character_keys": self.working.image_character_keys,
                    "voice_character_key": self.working.voice_character_key,
                    "scene_traits": self.working.scene_traits,
                }),
                RequestKind::LightRead,
            )
            .await;
        supervisor.unlock_scene(&self.scene_id);

        result?;
        self.baseline = self.working.clone();
        Ok(())
    }
}

/// Client-side extraction helper for the Traits tab (spec §4.9): proposes
/// trait candidates from a scene's dialogue and image prompt. Sentences
/// that read as spoken dialogue (quoted, or ending in a sentence-final
/// particle) are excluded; the remainder is treated as visual vocabulary
/// (adjectives/nouns describing appearance) and offered as a candidate.
pub fn extract_trait_candidates(dialogue: &str, image_prompt: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    for segment in image_prompt.split(|c| c == ',' || c == '、' || c == '。') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        if is_dialogue_like(segment, dialogue) {
            continue;
        }
        if !candidates.iter().any(|c: &String| c == segment) {
            candidates.push(segment.to_string());
        }
    }
    candidates
}

fn is_dialogue_like(segment: &str, dialogue: &str) -> bool {
    let quoted = segment.starts_with('「') || segment.starts_with('"') || segment.starts_with('『');
    let sentence_final = segment.ends_with(['よ', 'ね', 'わ', '!', '?', '！', '？']);
    let echoes_dialogue = !dialogue.is_empty() && dialogue.contains(segment);
    quoted || sentence_final || echoes_dialogue
}

/// One line of the Utterances tab (spec §4.9): per-line speaker
/// assignment, derived from splitting `scene.dialogue` on newlines since
/// the server models dialogue as a single authored block and leaves
/// per-line speaker bookkeeping to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceLine {
    pub line_index: u32,
    pub text: String,
    pub speaker_character: Option<String>,
}

pub fn utterance_lines(scene: &Scene) -> Vec<UtteranceLine> {
    scene
        .dialogue
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| UtteranceLine {
            line_index: u32::try_from(i).unwrap_or(u32::MAX),
            text: line.trim().to_string(),
            speaker_character: scene.voice_character.clone(),
        })
        .collect()
}

/// Invokes per-line voice generation (spec §4.9: "invokes C5 for audio"),
/// POSTing one job-start request per line and leaving progress tracking to
/// the caller's supervisor watch.
pub async fn generate_utterance_audio(
    http: &Arc<dyn HttpClient>,
    scene_id: &str,
    line: &UtteranceLine,
) -> Result<()> {
    http.post(
        &format!("/scenes/{scene_id}/utterances/{}/generate-audio", line.line_index),
        json!({ "speaker_character": line.speaker_character }),
        RequestKind::LightRead,
    )
    .await?;
    Ok(())
}

/// Independent sub-transaction: motion preset. Saves immediately on
/// change, not gated by the main form's dirty state (spec §4.9).
pub async fn save_motion_preset(http: &Arc<dyn HttpClient>, scene_id: &str, motion_preset_id: Option<&str>) -> Result<()> {
    http.put(
        &format!("/scenes/{scene_id}/motion"),
        json!({ "motion_preset_id": motion_preset_id }),
        RequestKind::LightRead,
    )
    .await?;
    Ok(())
}

/// Independent sub-transaction: duration override in milliseconds, or
/// `None` to clear back to the derived (audio-based) duration.
pub async fn save_duration_override(
    http: &Arc<dyn HttpClient>,
    scene_id: &str,
    duration_override_ms: Option<u64>,
) -> Result<()> {
    http.put(
        &format!("/scenes/{scene_id}/duration"),
        json!({ "duration_override_ms": duration_override_ms }),
        RequestKind::LightRead,
    )
    .await?;
    Ok(())
}

/// Independent sub-transaction: scene BGM track assignment.
pub async fn save_scene_bgm(http: &Arc<dyn HttpClient>, scene_id: &str, bgm: Option<&SceneBgm>) -> Result<()> {
    http.put(&format!("/scenes/{scene_id}/bgm"), json!({ "bgm": bgm }), RequestKind::LightRead)
        .await?;
    Ok(())
}

/// Independent sub-transaction: the scene's SFX cue list, replaced
/// wholesale (cues are cheap to re-send; there's no incremental diffing).
pub async fn save_scene_sfx(http: &Arc<dyn HttpClient>, scene_id: &str, sfx: &[SfxCue]) -> Result<()> {
    http.put(&format!("/scenes/{scene_id}/sfx"), json!({ "sfx": sfx }), RequestKind::LightRead)
        .await?;
    Ok(())
}
