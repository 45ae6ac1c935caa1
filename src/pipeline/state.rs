use crate::models::StageKind;
use serde::Serialize;

/// Where a single run stands. `Completed` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Created,
    VisionAnalysis,
    MarketResearch,
    ContentGeneration,
    ImageGeneration,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    StageCompleted,
    StageFailed,
    Aborted,
}

impl PipelineState {
    /// The stage executed while in this state, if any.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            PipelineState::VisionAnalysis => Some(StageKind::VisionAnalysis),
            PipelineState::MarketResearch => Some(StageKind::MarketResearch),
            PipelineState::ContentGeneration => Some(StageKind::ContentGeneration),
            PipelineState::ImageGeneration => Some(StageKind::ImageGeneration),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }

    /// Transition table. `with_images` decides whether content generation
    /// is followed by image generation or ends the run. Image generation is
    /// optional: its failure still completes the run. Returns `None` for
    /// transitions the table does not contain.
    pub fn advance(self, event: Event, with_images: bool) -> Option<PipelineState> {
        use PipelineState::*;
        let next = match (self, event) {
            (Created, Event::Start) => VisionAnalysis,
            (VisionAnalysis, Event::StageCompleted) => MarketResearch,
            (MarketResearch, Event::StageCompleted) => ContentGeneration,
            (ContentGeneration, Event::StageCompleted) if with_images => ImageGeneration,
            (ContentGeneration, Event::StageCompleted) => Completed,
            (ImageGeneration, Event::StageCompleted | Event::StageFailed) => Completed,
            (state, Event::StageFailed | Event::Aborted) if state.stage().is_some() => Failed,
            (Created, Event::Aborted) => Failed,
            _ => return None,
        };
        Some(next)
    }
}
