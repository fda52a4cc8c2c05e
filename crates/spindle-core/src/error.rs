use std::time::Duration;

use thiserror::Error;

use crate::domain::{DeliveryId, TaskType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskTypeError {
    #[error("task type must not be empty")]
    Empty,

    #[error("task type '{0}' must be namespaced as 'domain:action'")]
    NotNamespaced(String),

    #[error("task type '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("task type '{value}' contains invalid character {found:?}")]
    InvalidChar { value: String, found: char },
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("enqueue timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The lease expired and the delivery was handed to someone else.
    #[error("lease lost for delivery {0}")]
    LeaseLost(DeliveryId),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected value for key '{key}': {value}")]
    Corrupt { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error("handler for task type '{0}' is already registered")]
    DuplicateHandler(TaskType),

    #[error(transparent)]
    InvalidTaskType(#[from] TaskTypeError),

    #[error("invalid server config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Fanout(#[from] FanoutError),
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}' for schedule '{name}': {reason}")]
    InvalidCron {
        name: String,
        expression: String,
        reason: String,
    },

    #[error("schedule '{0}' is already registered")]
    DuplicateName(String),
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("handler '{handler_id}' already subscribed to '{event_type}'")]
    DuplicateHandler {
        event_type: TaskType,
        handler_id: String,
    },

    #[error(transparent)]
    InvalidHandlerId(#[from] TaskTypeError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
