//! Lifecycle of a load, published to observers and watch subscribers.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LoadPhase {
    #[default]
    Idle,
    HealthCheck,
    Fetching { attempt: u32, source: String },
    Retrying { attempt: u32, delay_ms: u64 },
    Parsing,
    FirstBatchReady { records: usize },
    LoadingMore { delivered: usize, total: usize },
    Complete { records: usize, stale: bool },
    Failed { reason: String },
}

impl LoadPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadPhase::Complete { .. } | LoadPhase::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoadPhase::Idle => "idle",
            LoadPhase::HealthCheck => "health_check",
            LoadPhase::Fetching { .. } => "fetching",
            LoadPhase::Retrying { .. } => "retrying",
            LoadPhase::Parsing => "parsing",
            LoadPhase::FirstBatchReady { .. } => "first_batch_ready",
            LoadPhase::LoadingMore { .. } => "loading_more",
            LoadPhase::Complete { .. } => "complete",
            LoadPhase::Failed { .. } => "failed",
        }
    }
}
