//! Builder Wizard (C13, spec §4.13): a pure projection of a
//! [`PreflightReport`] into the four step cards the Builder tab renders.
//! This module holds no state of its own -- everything it needs comes in
//! through the report, which [`crate::app_context::AppContext`] caches.

use crate::preflight::PreflightReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Scenes,
    Images,
    Audio,
    Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Complete,
    InProgress,
    Blocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepCard {
    pub kind: StepKind,
    pub state: StepState,
    pub title: &'static str,
    pub detail: String,
}

fn scenes_card(report: &PreflightReport) -> StepCard {
    let state = if report.total_count == 0 {
        StepState::Blocked
    } else if report.missing.iter().any(|m| m.contains("scene cap")) {
        StepState::Blocked
    } else {
        StepState::Complete
    };
    StepCard {
        kind: StepKind::Scenes,
        state,
        title: "シーン",
        detail: format!("{} シーン", report.total_count),
    }
}

fn images_card(report: &PreflightReport) -> StepCard {
    let state = if report.total_count == 0 {
        StepState::Blocked
    } else if report.ready_count == report.total_count {
        StepState::Complete
    } else if report.ready_count > 0 {
        StepState::InProgress
    } else {
        StepState::Blocked
    };
    StepCard {
        kind: StepKind::Images,
        state,
        title: "画像",
        detail: format!("{}/{} 準備完了", report.ready_count, report.total_count),
    }
}

fn audio_card(report: &PreflightReport) -> StepCard {
    let state = if report.validation.has_voice {
        StepState::Complete
    } else if report.utterance_errors.is_empty() {
        StepState::Blocked
    } else {
        StepState::InProgress
    };
    StepCard {
        kind: StepKind::Audio,
        state,
        title: "音声",
        detail: if report.validation.has_voice {
            "音声あり".to_string()
        } else {
            "音声なし".to_string()
        },
    }
}

fn expression_card(report: &PreflightReport) -> StepCard {
    let summary = report.expression_summary.as_ref();
    let state = match summary {
        Some(s) if !s.is_silent => StepState::Complete,
        Some(_) => StepState::InProgress,
        None => StepState::Blocked,
    };
    let detail = match summary {
        Some(s) if s.is_silent => "サイレント動画".to_string(),
        Some(s) => format!(
            "BGM:{} SFX:{}",
            if s.has_bgm { "あり" } else { "なし" },
            if s.has_sfx { "あり" } else { "なし" }
        ),
        None => "未計算".to_string(),
    };
    StepCard {
        kind: StepKind::Expression,
        state,
        title: "演出",
        detail,
    }
}

/// Projects a report into the four step cards in fixed display order.
pub fn step_cards(report: &PreflightReport) -> Vec<StepCard> {
    vec![
        scenes_card(report),
        images_card(report),
        audio_card(report),
        expression_card(report),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::{BalloonPolicySummary, OutputPresetSummary, ValidationSummary};
    use crate::model::ExpressionSummary;

    fn report() -> PreflightReport {
        PreflightReport {
            is_ready: false,
            can_generate: false,
            ready_count: 1,
            total_count: 2,
            missing: vec!["scene 2 has no adopted asset".to_string()],
            warnings: vec![],
            utterance_errors: vec![],
            validation: ValidationSummary {
                has_bgm: false,
                has_sfx: false,
                has_voice: true,
            },
            output_preset: OutputPresetSummary {
                id: "yt_long".into(),
                label: "YouTube (long form)".into(),
                aspect_ratio: "16:9".into(),
            },
            balloon_policy_summary: BalloonPolicySummary::default(),
            expression_summary: Some(ExpressionSummary {
                has_voice: true,
                has_bgm: false,
                has_sfx: false,
                is_silent: false,
                balloon_count: 0,
                balloon_policy_summary: "none".into(),
            }),
        }
    }

    #[test]
    fn produces_four_cards_in_fixed_order() {
        let cards = step_cards(&report());
        assert_eq!(cards.len(), 4);
        assert_eq!(cards[0].kind, StepKind::Scenes);
        assert_eq!(cards[1].kind, StepKind::Images);
        assert_eq!(cards[2].kind, StepKind::Audio);
        assert_eq!(cards[3].kind, StepKind::Expression);
    }

    #[test]
    fn images_card_is_in_progress_when_partially_ready() {
        let cards = step_cards(&report());
        assert_eq!(cards[1].state, StepState::InProgress);
        assert_eq!(cards[1].detail, "1/2 準備完了");
    }

    #[test]
    fn audio_card_is_complete_when_voice_present() {
        let cards = step_cards(&report());
        assert_eq!(cards[2].state, StepState::Complete);
    }

    #[test]
    fn expression_card_reflects_non_silent_summary() {
        let cards = step_cards(&report());
        assert_eq!(cards[3].state, StepState::Complete);
    }

    #[test]
    fn scenes_card_blocks_when_over_cap() {
        let mut r = report();
        r.missing = vec!["project has 150 scenes, exceeding the 100-scene build cap".to_string()];
        let cards = step_cards(&r);
        assert_eq!(cards[0].state, StepState::Blocked);
    }
}
