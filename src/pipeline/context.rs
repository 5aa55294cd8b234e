use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

/// Where a single run through the chain currently stands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running(usize),
    Completed,
    ShortCircuited,
    Intercepted,
    Failed,
}

/// Timing and outcome of one middleware invocation
#[derive(Clone, Debug, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
    #[serde(skip)]
    started: Option<Instant>,
}

/// Per-run bookkeeping; created when a payload enters the chain and
/// handed back to the caller once the run finishes.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionContext {
    pub pipeline: String,
    pub started_at: i64,
    pub stages: Vec<StageRecord>,
    pub state: RunState,
    pub intercepted: bool,
    pub interception_reason: Option<String>,
    pub short_circuited_by: Option<String>,
    pub completed: bool,
    pub duration: Option<Duration>,
    #[serde(skip)]
    started: Option<Instant>,
}

impl ExecutionContext {
    pub fn new(pipeline: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            started_at: Utc::now().timestamp_millis(),
            stages: Vec::new(),
            state: RunState::Pending,
            intercepted: false,
            interception_reason: None,
            short_circuited_by: None,
            completed: false,
            duration: None,
            started: Some(Instant::now()),
        }
    }

    pub(crate) fn start_stage(&mut self, name: &str) -> usize {
        let index = self.stages.len();
        self.stages.push(StageRecord {
            name: name.to_string(),
            started_at: Utc::now().timestamp_millis(),
            ended_at: None,
            duration: None,
            error: None,
            started: Some(Instant::now()),
        });
        self.state = RunState::Running(index);
        index
    }

    pub(crate) fn finish_stage(&mut self, index: usize, error: Option<String>) {
        if let Some(record) = self.stages.get_mut(index) {
            record.ended_at = Some(Utc::now().timestamp_millis());
            record.duration = record.started.map(|s| s.elapsed());
            if error.is_some() {
                record.error = error;
            }
        }
    }

    pub(crate) fn mark_completed(&mut self) {
        self.completed = true;
        self.state = RunState::Completed;
    }

    pub(crate) fn mark_short_circuit(&mut self, name: &str) {
        if !self.completed && self.short_circuited_by.is_none() {
            self.short_circuited_by = Some(name.to_string());
            self.state = RunState::ShortCircuited;
        }
    }

    pub(crate) fn mark_intercepted(&mut self, reason: &str) {
        self.intercepted = true;
        self.interception_reason = Some(reason.to_string());
        self.state = RunState::Intercepted;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = RunState::Failed;
    }

    pub(crate) fn finish(&mut self) {
        self.duration = self.started.map(|s| s.elapsed());
    }

    /// Names of the stages that actually ran, in order
    pub fn visited(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}
