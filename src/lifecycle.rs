//! Lifecycle state machine (C4, spec §4.4): maps project status to
//! permitted user actions -- tab gating, reset eligibility, progress bar.

use crate::model::ProjectStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabId {
    Input,
    Styles,
    SceneSplit,
    Builder,
    Export,
    VideoBuild,
}

impl TabId {
    /// Minimum status required to access this tab (spec §4.4 table).
    pub fn min_status(self) -> Option<ProjectStatus> {
        match self {
            Self::Input | Self::Styles => None,
            Self::SceneSplit => Some(ProjectStatus::Uploaded),
            Self::Builder => Some(ProjectStatus::Formatted),
            Self::Export | Self::VideoBuild => Some(ProjectStatus::Completed),
        }
    }
}

/// `true` iff `status` meets or exceeds the tab's minimum, per the ordered
/// lifecycle (`Failed` never satisfies a minimum beyond `Created`, since it
/// sits off to the side rather than being reachable by comparison).
pub fn can_access(tab: TabId, status: ProjectStatus) -> bool {
    match tab.min_status() {
        None => true,
        Some(min) => status != ProjectStatus::Failed && status >= min,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressBar {
    pub percent: u8,
    pub step_index: u8,
    pub message: String,
    pub next_tab: Option<TabId>,
}

/// Hint derived from preflight, used only to refine the `formatted` message
/// (spec §4.4: "ready_count/total_count... advises moving to Video Build;
/// if partial, it advises returning to Builder").
#[derive(Debug, Clone, Copy)]
pub struct ReadinessHint {
    pub ready_count: u32,
    pub total_count: u32,
}

const STEP_ORDER: &[ProjectStatus] = &[
    ProjectStatus::Created,
    ProjectStatus::Uploaded,
    ProjectStatus::Transcribing,
    ProjectStatus::Transcribed,
    ProjectStatus::Parsing,
    ProjectStatus::Parsed,
    ProjectStatus::Formatting,
    ProjectStatus::Formatted,
    ProjectStatus::GeneratingImages,
    ProjectStatus::Completed,
];

pub fn update_progress_bar(status: ProjectStatus, hint: Option<ReadinessHint>) -> ProgressBar {
    if status == ProjectStatus::Failed {
        return ProgressBar {
            percent: 0,
            step_index: 0,
            message: "プロジェクトの処理に失敗しました".to_string(),
            next_tab: None,
        };
    }

    let step_index = STEP_ORDER
        .iter()
        .position(|s| *s == status)
        .unwrap_or(0);
    #[allow(clippy::cast_possible_truncation)]
    let percent = ((step_index as f64 / (STEP_ORDER.len() - 1) as f64) * 100.0).round() as u8;

    let (message, next_tab) = match status {
        ProjectStatus::Created => ("テキストまたは音声をアップロードしてください".to_string(), Some(TabId::Input)),
        ProjectStatus::Uploaded => ("文字起こし・分割を開始できます".to_string(), Some(TabId::SceneSplit)),
        ProjectStatus::Transcribing => ("文字起こし中...".to_string(), None),
        ProjectStatus::Transcribed => ("シーン分割を開始できます".to_string(), Some(TabId::SceneSplit)),
        ProjectStatus::Parsing => ("解析中...".to_string(), None),
        ProjectStatus::Parsed => ("シーンのフォーマットを開始できます".to_string(), Some(TabId::SceneSplit)),
        ProjectStatus::Formatting => ("シーンをフォーマット中...".to_string(), None),
        ProjectStatus::Formatted => formatted_message(hint),
        ProjectStatus::GeneratingImages => ("画像を生成中...".to_string(), Some(TabId::Builder)),
        ProjectStatus::Completed => ("動画の書き出しができます".to_string(), Some(TabId::Export)),
        ProjectStatus::Failed => unreachable!("handled above"),
    };

    ProgressBar {
        percent,
        step_index: step_index as u8,
        message,
        next_tab,
    }
}

fn formatted_message(hint: Option<ReadinessHint>) -> (String, Option<TabId>) {
    match hint {
        Some(h) if h.total_count > 0 && h.ready_count == h.total_count => (
            "すべてのシーンの準備が完了しました。動画生成に進みましょう".to_string(),
            Some(TabId::VideoBuild),
        ),
        Some(h) if h.total_count > 0 => (
            format!(
                "{}/{} シーンの準備ができています。ビルダーで続きを作成してください",
                h.ready_count, h.total_count
            ),
            Some(TabId::Builder),
        ),
        _ => (
            "ビルダーでシーンの素材を作成してください".to_string(),
            Some(TabId::Builder),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_and_styles_always_accessible() {
        assert!(can_access(TabId::Input, ProjectStatus::Created));
        assert!(can_access(TabId::Styles, ProjectStatus::Created));
    }

    #[test]
    fn scene_split_requires_uploaded() {
        assert!(!can_access(TabId::SceneSplit, ProjectStatus::Created));
        assert!(can_access(TabId::SceneSplit, ProjectStatus::Uploaded));
        assert!(can_access(TabId::SceneSplit, ProjectStatus::Formatted));
    }

    #[test]
    fn builder_requires_formatted() {
        assert!(!can_access(TabId::Builder, ProjectStatus::Uploaded));
        assert!(can_access(TabId::Builder, ProjectStatus::Formatted));
    }

    #[test]
    fn export_and_video_build_require_completed() {
        assert!(!can_access(TabId::Export, ProjectStatus::Formatted));
        assert!(can_access(TabId::VideoBuild, ProjectStatus::Completed));
    }

    #[test]
    fn failed_status_blocks_every_gated_tab() {
        assert!(!can_access(TabId::SceneSplit, ProjectStatus::Failed));
        assert!(!can_access(TabId::Builder, ProjectStatus::Failed));
        assert!(!can_access(TabId::VideoBuild, ProjectStatus::Failed));
        // Ungated tabs remain reachable even from a failed project.
        assert!(can_access(TabId::Input, ProjectStatus::Failed));
    }

    #[test]
    fn formatted_progress_message_depends_on_readiness_hint() {
        let all_ready = update_progress_bar(
            ProjectStatus::Formatted,
            Some(ReadinessHint {
                ready_count: 3,
                total_count: 3,
            }),
        );
        assert_eq!(all_ready.next_tab, Some(TabId::VideoBuild));

        let partial = update_progress_bar(
            ProjectStatus::Formatted,
            Some(ReadinessHint {
                ready_count: 1,
                total_count: 3,
            }),
        );
        assert_eq!(partial.next_tab, Some(TabId::Builder));
        assert!(partial.message.contains('1'));
    }

    #[test]
    fn failed_progress_is_zero_percent() {
        let bar = update_progress_bar(ProjectStatus::Failed, None);
        assert_eq!(bar.percent, 0);
        assert!(bar.next_tab.is_none());
    }

    #[test]
    fn percent_is_monotonic_across_step_order() {
        let mut last = -1i32;
        for status in STEP_ORDER {
            let bar = update_progress_bar(*status, None);
            assert!(i32::from(bar.percent) >= last);
            last = i32::from(bar.percent);
        }
    }
}
