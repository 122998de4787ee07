//! Progress reporting for the presentation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Phase;

/// One progress update. Has no effect on control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub phase: Phase,
    pub percentage: u8,
    pub current_operation: String,
    pub start_time: DateTime<Utc>,
}

/// Emits `Progress` through a callback, never letting the percentage go down
/// or past 100 within a run.
pub struct ProgressReporter<'a> {
    start_time: DateTime<Utc>,
    last_percentage: u8,
    on_progress: Box<dyn FnMut(&Progress) + 'a>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(on_progress: impl FnMut(&Progress) + 'a) -> Self {
        Self {
            start_time: Utc::now(),
            last_percentage: 0,
            on_progress: Box::new(on_progress),
        }
    }

    pub fn report(&mut self, phase: Phase, percentage: u8, operation: impl Into<String>) {
        let percentage = percentage.min(100).max(self.last_percentage);
        self.last_percentage = percentage;
        let progress = Progress {
            phase,
            percentage,
            current_operation: operation.into(),
            start_time: self.start_time,
        };
        (self.on_progress)(&progress);
    }

    /// Report a phase at its nominal percentage.
    pub fn enter(&mut self, phase: Phase, operation: impl Into<String>) {
        self.report(phase, phase.progress_percent(), operation);
    }

    pub fn last_percentage(&self) -> u8 {
        self.last_percentage
    }
}
