//! Task groups. Purely organizational: they order the batch and the
//! listings but never change how a task executes.

use serde::{Deserialize, Serialize};

use super::ids::GroupId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    /// Lower sorts first.
    pub sorting: i64,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDraft {
    pub name: String,
    pub description: String,
    pub sorting: i64,
}

impl GroupDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            sorting: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn sorted_at(mut self, sorting: i64) -> Self {
        self.sorting = sorting;
        self
    }
}
