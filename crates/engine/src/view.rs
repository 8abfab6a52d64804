use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use dvtrack_core::{
    ActionData, ActionType, DisbursementVoucher, DvStatus, HistoryEntry, NewHistoryEntry, OrsEntry,
};

/// One history row as displayed: `{type, action, date, user, status_before,
/// status_after, details}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedEntry {
    #[serde(rename = "type")]
    pub entry_type: ActionType,
    pub action: String,
    pub date: DateTime<Utc>,
    pub user: String,
    pub status_before: Option<DvStatus>,
    pub status_after: Option<DvStatus>,
    pub details: String,
}

/// Where a formatted history came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySource {
    Ledger,
    Reconstructed,
}

#[derive(Debug, Clone)]
pub struct DvView {
    pub dv: DisbursementVoucher,
    pub ors_entries: Vec<OrsEntry>,
    pub history: Vec<FormattedEntry>,
    pub history_source: HistorySource,
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        Value::Object(map) => format!("{} fields", map.len()),
        other => other.to_string(),
    }
}

/// `key: value` pairs in key order, then the notes.
fn details(data: &ActionData, notes: Option<&str>) -> String {
    let mut parts: Vec<String> = data
        .iter()
        .filter(|(key, _)| key.as_str() != "reconstructed")
        .map(|(key, value)| format!("{key}: {}", render_value(value)))
        .collect();
    if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
        parts.push(format!("notes: {}", notes.trim()));
    }
    parts.join("; ")
}

impl From<&HistoryEntry> for FormattedEntry {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            entry_type: entry.action_type,
            action: entry.action_description.clone(),
            date: entry.timestamp,
            user: entry.performed_by.clone(),
            status_before: entry.status_before,
            status_after: entry.status_after,
            details: details(&entry.action_data, entry.notes.as_deref()),
        }
    }
}

impl From<&NewHistoryEntry> for FormattedEntry {
    fn from(entry: &NewHistoryEntry) -> Self {
        Self {
            entry_type: entry.action_type,
            action: entry.action_type.description().to_string(),
            date: entry.timestamp,
            user: entry.performed_by.clone(),
            status_before: entry.status_before,
            status_after: entry.status_after,
            details: details(&entry.action_data, entry.notes.as_deref()),
        }
    }
}

/// Formats and sorts by timestamp. The sort is stable so same-instant
/// entries keep their ledger order.
pub fn format_entries<'a, E>(entries: impl IntoIterator<Item = &'a E>) -> Vec<FormattedEntry>
where
    E: 'a,
    FormattedEntry: From<&'a E>,
{
    let mut formatted: Vec<FormattedEntry> =
        entries.into_iter().map(FormattedEntry::from).collect();
    formatted.sort_by_key(|e| e.date);
    formatted
}
