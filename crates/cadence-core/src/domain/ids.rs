//! Domain identifiers (strongly-typed IDs).
//!
//! Tasks and groups are numbered by the store, so their ids wrap a `u64`.
//! `Id<T>` carries a phantom marker type: a `TaskId` and a `GroupId` share
//! one implementation but cannot be mixed up at compile time.
//!
//! Execution tokens are different: they are minted by whichever process
//! locks a task, without coordination, so they are ULIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Supplies the display prefix of an id type (`"task-"`, `"group-"`).
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Store-assigned numeric identifier.
///
/// Serializes as the bare number; displays with its prefix.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: u64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub const fn value(&self) -> u64 {
        self.value
    }
}

impl<T: IdMarker> From<u64> for Id<T> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{input}` is not a valid {prefix}<number> id")]
pub struct ParseIdError {
    input: String,
    prefix: &'static str,
}

/// Accepts both `task-12` and a bare `12`.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix(T::prefix()).unwrap_or(s);
        digits.parse::<u64>().map(Self::new).map_err(|_| ParseIdError {
            input: s.to_string(),
            prefix: T::prefix(),
        })
    }
}

/// Marker for task ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {}

impl IdMarker for Group {
    fn prefix() -> &'static str {
        "group-"
    }
}

/// Identifier of a scheduled task.
pub type TaskId = Id<Task>;

/// Identifier of a task group (organizational only).
pub type GroupId = Id<Group>;

/// Token stored in a task's execution marks while one run holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionToken(Ulid);

impl ExecutionToken {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for ExecutionToken {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl fmt::Display for ExecutionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn ids_display_with_their_prefix() {
        assert_eq!(TaskId::new(7).to_string(), "task-7");
        assert_eq!(GroupId::new(3).to_string(), "group-3");

        // A TaskId is not a GroupId, even with the same number.
        // let _: GroupId = TaskId::new(3); // <- does not compile
    }

    #[rstest]
    #[case::prefixed("task-42", Some(42))]
    #[case::bare("42", Some(42))]
    #[case::wrong_prefix("group-42", None)]
    #[case::garbage("task-x", None)]
    #[case::negative("-1", None)]
    fn task_ids_parse(#[case] input: &str, #[case] expected: Option<u64>) {
        let parsed = input.parse::<TaskId>().ok().map(|id| id.value());
        assert_eq!(parsed, expected);
    }

    #[test]
    fn ids_serialize_as_bare_numbers() {
        let json = serde_json::to_string(&TaskId::new(9)).unwrap();
        assert_eq!(json, "9");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TaskId::new(9));
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<u64>());
        assert_eq!(size_of::<GroupId>(), size_of::<u64>());
    }

    #[test]
    fn execution_tokens_display_with_prefix() {
        let ulid = Ulid::new();
        let token = ExecutionToken::from_ulid(ulid);
        assert_eq!(token.as_ulid(), ulid);
        assert_eq!(token.to_string(), format!("exec-{ulid}"));
    }
}
