pub mod job;
pub mod record;
pub mod selector;

pub use job::{Job, JobKey, JobStatus, WorkType};
pub use record::{NewRecord, Record};
pub use selector::{RawSelector, Selector, SelectorMode};

/// Every problem found in a caller's input, reported together.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid input: {}", .0.join("; "))]
pub struct ValidationError(Vec<String>);

impl ValidationError {
    pub fn new(messages: Vec<String>) -> Self {
        Self(messages)
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self(vec![message.into()])
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    pub fn into_messages(self) -> Vec<String> {
        self.0
    }
}
