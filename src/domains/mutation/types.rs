//! Type definitions for the mutation queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{DomainError, ValidationError};

/// Replay band. Critical writes (attendance, safety checklists) replay before normal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MutationPriority {
    #[default]
    Normal,
    Critical,
}

impl MutationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationPriority::Normal => "normal",
            MutationPriority::Critical => "critical",
        }
    }

    /// Lower rank replays first.
    pub fn replay_rank(&self) -> u8 {
        match self {
            MutationPriority::Critical => 0,
            MutationPriority::Normal => 1,
        }
    }
}

impl FromStr for MutationPriority {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(MutationPriority::Normal),
            "critical" => Ok(MutationPriority::Critical),
            _ => Err(DomainError::Validation(ValidationError::custom(
                &format!("Invalid mutation priority: {}", s)
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Queued,
    Sending,
    /// Dead-lettered: excluded from automatic replay until the user retries it
    Failed,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Queued => "queued",
            MutationStatus::Sending => "sending",
            MutationStatus::Failed => "failed",
        }
    }
}

impl FromStr for MutationStatus {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(MutationStatus::Queued),
            "sending" => Ok(MutationStatus::Sending),
            "failed" => Ok(MutationStatus::Failed),
            _ => Err(DomainError::Validation(ValidationError::custom(
                &format!("Invalid mutation status: {}", s)
            )))
        }
    }
}

/// A write waiting to be replayed against the remote store.
///
/// `payload` carries the absolute target state of the write (e.g. `checked: true`),
/// so replaying it more than once converges to the same remote state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: Uuid,
    pub entity: String,
    pub mutation_type: String,
    pub payload: Value,
    pub priority: MutationPriority,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: MutationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedMutation {
    pub fn new(entity: &str, mutation_type: &str, payload: Value, priority: MutationPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity: entity.to_string(),
            mutation_type: mutation_type.to_string(),
            payload,
            priority,
            created_at: Utc::now(),
            retry_count: 0,
            status: MutationStatus::Queued,
            last_error: None,
        }
    }

    /// Eligible for automatic replay. `Sending` only survives a crash mid-replay.
    pub fn is_replayable(&self) -> bool {
        matches!(self.status, MutationStatus::Queued | MutationStatus::Sending)
    }

    pub fn is_dead_lettered(&self) -> bool {
        self.status == MutationStatus::Failed
    }
}

/// Result of executing an optimistic mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<O> {
    /// The remote call succeeded; the optimistic state stands.
    Applied(O),
    /// The write was persisted for later replay.
    Queued(QueuedMutation),
}

impl<O> MutationOutcome<O> {
    pub fn is_queued(&self) -> bool {
        matches!(self, MutationOutcome::Queued(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationQueueStats {
    pub total: usize,
    pub queued: usize,
    pub sending: usize,
    pub dead_lettered: usize,
    pub critical: usize,
}

/// Summary of one flush pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationFlushReport {
    pub attempted: usize,
    pub replayed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    /// Records with no registered replay handler
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parsing_and_rank() {
        assert_eq!("CRITICAL".parse::<MutationPriority>().unwrap(), MutationPriority::Critical);
        assert!("urgent".parse::<MutationPriority>().is_err());
        assert!(MutationPriority::Critical.replay_rank() < MutationPriority::Normal.replay_rank());
    }

    #[test]
    fn test_serialized_shape() {
        let mutation = QueuedMutation::new(
            "checkbox",
            "set_checked",
            serde_json::json!({"item_id": "a", "checked": true}),
            MutationPriority::Critical,
        );
        let json = serde_json::to_value(&mutation).unwrap();
        assert_eq!(json["priority"], "critical");
        assert_eq!(json["status"], "queued");
        assert!(json.get("last_error").is_none());
    }
}
