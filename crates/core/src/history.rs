use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::ActionType;
use crate::ids::{DvId, EntryId};
use crate::status::DvStatus;

/// Free-form payload attached to a history entry.
pub type ActionData = Map<String, Value>;

/// A history entry that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub dv_id: DvId,
    pub action_type: ActionType,
    pub performed_by: String,
    pub action_data: ActionData,
    pub status_before: Option<DvStatus>,
    pub status_after: Option<DvStatus>,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewHistoryEntry {
    pub fn new(
        dv_id: DvId,
        action_type: ActionType,
        performed_by: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            dv_id,
            action_type,
            performed_by: performed_by.to_string(),
            action_data: ActionData::new(),
            status_before: None,
            status_after: None,
            notes: None,
            timestamp,
        }
    }

    pub fn with_statuses(mut self, before: Option<DvStatus>, after: Option<DvStatus>) -> Self {
        self.status_before = before;
        self.status_after = after;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self
    }

    /// Adds a payload key, skipping `None` and `Null` values.
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.action_data.insert(key.to_string(), value);
        }
        self
    }
}

/// A persisted, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub entry_id: EntryId,
    pub dv_id: DvId,
    pub action_type: ActionType,
    pub action_description: String,
    pub performed_by: String,
    pub action_data: ActionData,
    pub status_before: Option<DvStatus>,
    pub status_after: Option<DvStatus>,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}
