use serde::{Deserialize, Serialize};

use crate::errors::CollageError;
use crate::images::GeneratedImage;
use crate::scenarios::SCENARIO_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Generating,
    Complete,
    Failed,
}

/// What the UI shows for one generation attempt. Replaced wholesale on `begin` and `reset`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStatus,
    pub completed_count: usize,
    pub results: Vec<GeneratedImage>,
    pub error: Option<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) -> Result<(), CollageError> {
        if self.status == RunStatus::Generating {
            return Err(CollageError::Run(
                "a generation run is already in progress".to_string(),
            ));
        }
        *self = RunState {
            status: RunStatus::Generating,
            ..RunState::default()
        };
        Ok(())
    }

    /// Ignored outside `Generating`; the count never moves backwards.
    pub fn record_progress(&mut self, completed: usize) {
        if self.status != RunStatus::Generating {
            return;
        }
        self.completed_count = self.completed_count.max(completed.min(SCENARIO_COUNT));
    }

    pub fn complete(&mut self, mut results: Vec<GeneratedImage>) {
        results.sort_by_key(|result| result.scenario_index);
        self.status = RunStatus::Complete;
        self.completed_count = results.len();
        self.results = results;
        self.error = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(message.into());
    }

    pub fn reset(&mut self) {
        *self = RunState::default();
    }

    pub fn progress_pct(&self) -> u8 {
        ((self.completed_count.min(SCENARIO_COUNT) * 100) as f64 / SCENARIO_COUNT as f64).round()
            as u8
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|result| result.succeeded).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }
}
