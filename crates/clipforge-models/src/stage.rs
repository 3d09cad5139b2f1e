//! Pipeline stages and their fixed progress weights.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The six pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Materialise raw video and subtitle
    Ingest,
    /// Parse and chunk the subtitle file
    Subtitle,
    /// Outline and timeline extraction via the language model
    Analyze,
    /// Scoring, titling and clustering of candidate intervals
    Highlight,
    /// Cut clip and collection files
    Export,
    /// Finalise metadata and signal completion
    Done,
}

/// All stages in execution order.
pub const ALL_STAGES: [Stage; 6] = [
    Stage::Ingest,
    Stage::Subtitle,
    Stage::Analyze,
    Stage::Highlight,
    Stage::Export,
    Stage::Done,
];

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Subtitle => "subtitle",
            Stage::Analyze => "analyze",
            Stage::Highlight => "highlight",
            Stage::Export => "export",
            Stage::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingest" => Some(Stage::Ingest),
            "subtitle" => Some(Stage::Subtitle),
            "analyze" => Some(Stage::Analyze),
            "highlight" => Some(Stage::Highlight),
            "export" => Some(Stage::Export),
            "done" => Some(Stage::Done),
            _ => None,
        }
    }

    /// 1-based position, matching the project row's `current_stage` counter.
    pub fn index(&self) -> u8 {
        match self {
            Stage::Ingest => 1,
            Stage::Subtitle => 2,
            Stage::Analyze => 3,
            Stage::Highlight => 4,
            Stage::Export => 5,
            Stage::Done => 6,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        ALL_STAGES.get(index.checked_sub(1)? as usize).copied()
    }

    /// Fixed share of overall project progress.
    pub fn weight(&self) -> u8 {
        match self {
            Stage::Ingest => 10,
            Stage::Subtitle => 15,
            Stage::Analyze => 20,
            Stage::Highlight => 25,
            Stage::Export => 20,
            Stage::Done => 10,
        }
    }

    /// Percent emitted when entering this stage: the sum of prior weights.
    pub fn enter_percent(&self) -> u8 {
        ALL_STAGES
            .iter()
            .take_while(|s| **s != *self)
            .map(|s| s.weight())
            .sum()
    }

    /// Percent emitted when leaving this stage.
    ///
    /// One short of the stage boundary for every stage except Done, so that
    /// 100 is only ever emitted by Done.
    pub fn leave_percent(&self) -> u8 {
        if *self == Stage::Done {
            100
        } else {
            self.enter_percent() + self.weight() - 1
        }
    }

    /// Scale a sub-progress fraction in [0,100] into this stage's window.
    pub fn scaled_percent(&self, sub_percent: u8) -> u8 {
        let sub = sub_percent.min(100) as u32;
        let base = self.enter_percent() as u32;
        let span = self.weight() as u32;
        (base + span * sub / 100) as u8
    }

    pub fn next(&self) -> Option<Stage> {
        ALL_STAGES.get(self.index() as usize).copied()
    }
}

/// Result summary returned by a stage handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageSummary {
    /// Items produced (chunks, intervals, clips, ...)
    pub items: u32,
    /// Non-fatal warnings surfaced to the log
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StageSummary {
    pub fn with_items(items: u32) -> Self {
        Self {
            items,
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_100() {
        let total: u32 = ALL_STAGES.iter().map(|s| s.weight() as u32).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn enter_percents() {
        assert_eq!(Stage::Ingest.enter_percent(), 0);
        assert_eq!(Stage::Subtitle.enter_percent(), 10);
        assert_eq!(Stage::Analyze.enter_percent(), 25);
        assert_eq!(Stage::Highlight.enter_percent(), 45);
        assert_eq!(Stage::Export.enter_percent(), 70);
        assert_eq!(Stage::Done.enter_percent(), 90);
    }

    #[test]
    fn only_done_emits_100() {
        for stage in ALL_STAGES {
            if stage == Stage::Done {
                assert_eq!(stage.leave_percent(), 100);
            } else {
                assert!(stage.leave_percent() < stage.enter_percent() + stage.weight());
            }
        }
    }

    #[test]
    fn scaled_percent_stays_in_window() {
        assert_eq!(Stage::Analyze.scaled_percent(0), 25);
        assert_eq!(Stage::Analyze.scaled_percent(50), 35);
        assert_eq!(Stage::Analyze.scaled_percent(100), 45);
        // Clamped above 100.
        assert_eq!(Stage::Analyze.scaled_percent(200), 45);
    }

    #[test]
    fn index_round_trips() {
        for stage in ALL_STAGES {
            assert_eq!(Stage::from_index(stage.index()), Some(stage));
        }
        assert_eq!(Stage::from_index(0), None);
        assert_eq!(Stage::from_index(7), None);
    }
}
