use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Task name carried by every caption job message.
pub const CAPTION_TASK: &str = "caption.generate";

/// Lifecycle state of a caption job.
///
/// Transitions only move forward: `Pending -> Running -> {Success | Failure}`.
/// `Running` may be skipped by stores that do not track it.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Failure,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

/// Output of a successful caption job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptionResult {
    pub caption: String,
    pub width: u32,
    pub height: u32,
}

/// Terminal outcome written by the worker that processed a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success(CaptionResult),
    Failure(String),
}

impl JobOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        JobOutcome::Failure(reason.into())
    }

    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Success(_) => JobState::Success,
            JobOutcome::Failure(_) => JobState::Failure,
        }
    }
}

/// Message placed on the queue for one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMessage {
    pub id: String,
    pub task_name: String,
    pub args: Vec<String>,
    #[serde(default = "Utc::now")]
    pub enqueued_at: DateTime<Utc>,
}

impl JobMessage {
    pub fn caption(id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_name: CAPTION_TASK.to_string(),
            args: vec![input.into()],
            enqueued_at: Utc::now(),
        }
    }

    /// The image reference, if the message carries one.
    pub fn input(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

/// Terminal record persisted in the result store, keyed by job id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMeta {
    pub task_id: String,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CaptionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub date_done: DateTime<Utc>,
}

impl TaskMeta {
    pub fn from_outcome(task_id: &str, outcome: &JobOutcome) -> Self {
        let (result, error) = match outcome {
            JobOutcome::Success(result) => (Some(result.clone()), None),
            JobOutcome::Failure(reason) => (None, Some(reason.clone())),
        };

        Self {
            task_id: task_id.to_string(),
            status: outcome.state(),
            result,
            error,
            date_done: Utc::now(),
        }
    }
}

/// What a poller sees for a job id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobView {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CaptionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobView {
    pub fn pending() -> Self {
        Self::bare(JobState::Pending)
    }

    pub fn running() -> Self {
        Self::bare(JobState::Running)
    }

    fn bare(state: JobState) -> Self {
        Self {
            state,
            result: None,
            error: None,
        }
    }
}

impl From<TaskMeta> for JobView {
    fn from(meta: TaskMeta) -> Self {
        Self {
            state: meta.status,
            result: meta.result,
            error: meta.error,
        }
    }
}
