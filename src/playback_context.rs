//! Playback Context Tracker (C16, spec §4.16): derives "which scene is
//! playing right now" from a cursor position in the stitched preview
//! timeline, so chat-edit's `_contextual` scene references and the
//! Builder's scroll-to-playing-scene behavior share one walk.

use crate::model::Scene;

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackContext {
    pub scene_id: String,
    pub scene_idx: i32,
    pub scene_offset_ms: u64,
    pub position_within_scene_ms: u64,
}

fn scene_duration_ms(scene: &Scene) -> u64 {
    scene
        .duration_override_ms
        .unwrap_or(scene.utterance_status.total_duration_ms)
}

/// Walks the visible, index-ordered scene list accumulating durations
/// until `cursor_ms` falls inside one -- the client-side analogue of a
/// server-side timeline index (spec §4.16). Scenes with zero duration are
/// still walked (they consume no cursor range, so playback never stalls
/// on them) but are preferred as a fallback landing spot via clamping.
pub fn playback_context_at(scenes: &[Scene], cursor_ms: u64) -> Option<PlaybackContext> {
    let mut visible: Vec<&Scene> = scenes.iter().filter(|s| !s.is_hidden()).collect();
    visible.sort_by_key(|s| s.idx);

    let mut offset = 0u64;
    let mut last: Option<&Scene> = None;
    for scene in &visible {
        let duration = scene_duration_ms(scene);
        if cursor_ms < offset + duration || duration == 0 {
            return Some(PlaybackContext {
                scene_id: scene.id.clone(),
                scene_idx: scene.idx,
                scene_offset_ms: offset,
                position_within_scene_ms: cursor_ms.saturating_sub(offset),
            });
        }
        offset += duration;
        last = Some(scene);
    }

    // Cursor past the end of the stitched timeline: clamp to the last
    // visible scene rather than returning `None`, matching the legacy
    // behavior of never losing playback context mid-session.
    last.map(|scene| PlaybackContext {
        scene_id: scene.id.clone(),
        scene_idx: scene.idx,
        scene_offset_ms: offset.saturating_sub(scene_duration_ms(scene)),
        position_within_scene_ms: scene_duration_ms(scene),
    })
}

/// Fallback used by chat-edit's `_contextual` normalization when no
/// playback context is available (spec §4.12 Open Question: falls back to
/// `scene_idx = 1` with a warning rather than rejecting the command).
pub fn fallback_scene_idx() -> i32 {
    1
}
