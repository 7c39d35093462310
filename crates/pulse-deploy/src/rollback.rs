// Task definition references and revision arithmetic for rollbacks.

use std::fmt;
use std::str::FromStr;

use crate::error::DeployError;

/// `family:revision`, as accepted by `aws ecs update-service --task-definition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinitionRef {
    pub family: String,
    pub revision: u32,
}

impl TaskDefinitionRef {
    /// The revision immediately before this one, or `None` at revision 1.
    pub fn previous(&self) -> Option<TaskDefinitionRef> {
        if self.revision <= 1 {
            return None;
        }
        Some(TaskDefinitionRef {
            family: self.family.clone(),
            revision: self.revision - 1,
        })
    }
}

impl fmt::Display for TaskDefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.revision)
    }
}

/// Parses either a full ARN
/// (`arn:aws:ecs:us-east-1:123:task-definition/family:7`) or a bare
/// `family:7`. Surrounding whitespace (CLI text output) is ignored.
impl FromStr for TaskDefinitionRef {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || DeployError::MalformedTaskDefinition(s.to_string());
        let raw = s.trim();

        let tail = if raw.starts_with("arn:") {
            raw.split_once("task-definition/")
                .map(|(_, rest)| rest)
                .ok_or_else(malformed)?
        } else {
            raw
        };

        let (family, revision) = tail.rsplit_once(':').ok_or_else(malformed)?;
        if family.is_empty() || family.contains('/') {
            return Err(malformed());
        }
        let revision: u32 = revision.parse().map_err(|_| malformed())?;
        if revision == 0 {
            return Err(malformed());
        }

        Ok(TaskDefinitionRef {
            family: family.to_string(),
            revision,
        })
    }
}
