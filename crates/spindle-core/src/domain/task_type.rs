//! TaskType - namespaced task identifiers.
//!
//! # Naming convention
//! - `{domain}:{action}` with optional further segments, e.g. `email:send`
//!   or `order:created:notify_warehouse`
//! - segments are non-empty and use `[A-Za-z0-9_.-]`
//!
//! Fanout derives one task type per handler by appending a segment, which
//! is why the separator is reserved.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TaskTypeError;

pub const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskType(String);

impl TaskType {
    pub fn new(value: impl Into<String>) -> Result<Self, TaskTypeError> {
        let value = value.into();
        Self::validate(&value)?;
        Ok(Self(value))
    }

    pub fn validate(value: &str) -> Result<(), TaskTypeError> {
        if value.is_empty() {
            return Err(TaskTypeError::Empty);
        }
        let mut segments = 0;
        for segment in value.split(SEPARATOR) {
            if segment.is_empty() {
                return Err(TaskTypeError::EmptySegment(value.to_string()));
            }
            if let Some(c) = segment
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
            {
                return Err(TaskTypeError::InvalidChar {
                    value: value.to_string(),
                    found: c,
                });
            }
            segments += 1;
        }
        if segments < 2 {
            return Err(TaskTypeError::NotNamespaced(value.to_string()));
        }
        Ok(())
    }

    /// Append a segment: `order:created` + `audit` -> `order:created:audit`.
    pub fn child(&self, segment: &str) -> Result<Self, TaskTypeError> {
        Self::new(format!("{}{SEPARATOR}{segment}", self.0))
    }

    /// First segment.
    pub fn domain(&self) -> &str {
        self.0.split(SEPARATOR).next().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskType {
    type Err = TaskTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TaskType {
    type Error = TaskTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TaskType {
    type Error = TaskTypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskType> for String {
    fn from(value: TaskType) -> Self {
        value.0
    }
}

impl AsRef<str> for TaskType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::two_segments("email:send")]
    #[case::three_segments("order:created:audit")]
    #[case::punctuation("billing-v2:charge.card_now")]
    fn accepts_namespaced_names(#[case] value: &str) {
        let task_type = TaskType::new(value).unwrap();
        assert_eq!(task_type.as_str(), value);
    }

    #[rstest]
    #[case::empty("", TaskTypeError::Empty)]
    #[case::no_namespace("send", TaskTypeError::NotNamespaced("send".into()))]
    #[case::trailing("email:", TaskTypeError::EmptySegment("email:".into()))]
    #[case::double("email::send", TaskTypeError::EmptySegment("email::send".into()))]
    #[case::space("email:send now", TaskTypeError::InvalidChar { value: "email:send now".into(), found: ' ' })]
    fn rejects_malformed_names(#[case] value: &str, #[case] expected: TaskTypeError) {
        assert_eq!(TaskType::new(value).unwrap_err(), expected);
    }

    #[test]
    fn child_appends_segment() {
        let event = TaskType::new("order:created").unwrap();
        let child = event.child("audit").unwrap();

        assert_eq!(child.as_str(), "order:created:audit");
        assert_eq!(child.domain(), "order");
        assert!(event.child("bad segment").is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: TaskType = serde_json::from_str("\"email:send\"").unwrap();
        assert_eq!(ok.as_str(), "email:send");

        assert!(serde_json::from_str::<TaskType>("\"email\"").is_err());
    }
}
