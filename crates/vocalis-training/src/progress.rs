use crate::pipeline::UnitState;
use crate::stage::StageKind;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    UnitStarted { unit: String, index: usize, total: usize },
    StageStarted { unit: String, stage: StageKind },
    StageFinished { unit: String, stage: StageKind },
    ConfigWritten { unit: String },
    UnitFinished { unit: String },
    UnitFailed { unit: String, step: UnitState, message: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::UnitStarted { unit, index, total } => info!("[{unit}] unit {}/{total} started", index + 1),
            ProgressEvent::StageStarted { unit, stage } => info!("[{unit}] {stage} started"),
            ProgressEvent::StageFinished { unit, stage } => info!("[{unit}] {stage} finished"),
            ProgressEvent::ConfigWritten { unit } => info!("[{unit}] stage config written"),
            ProgressEvent::UnitFinished { unit } => info!("[{unit}] done"),
            ProgressEvent::UnitFailed { unit, step, message } => error!("[{unit}] {step} failed: {message}"),
        }
    }
}

/// Keeps every event in order; handy for tests and post-run inspection.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
