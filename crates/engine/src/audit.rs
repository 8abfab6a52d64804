use std::fmt;

use chrono::{DateTime, Utc};

use dvtrack_core::{ActionType, DvStatus, HistoryEntry, NewHistoryEntry};

/// Fields the audit reads, shared by persisted and planned entries.
pub trait LedgerRecord {
    fn action_type(&self) -> ActionType;
    fn timestamp(&self) -> DateTime<Utc>;
    fn status_before(&self) -> Option<DvStatus>;
    fn status_after(&self) -> Option<DvStatus>;
}

impl LedgerRecord for HistoryEntry {
    fn action_type(&self) -> ActionType {
        self.action_type
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
    fn status_before(&self) -> Option<DvStatus> {
        self.status_before
    }
    fn status_after(&self) -> Option<DvStatus> {
        self.status_after
    }
}

impl LedgerRecord for NewHistoryEntry {
    fn action_type(&self) -> ActionType {
        self.action_type
    }
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
    fn status_before(&self) -> Option<DvStatus> {
        self.status_before
    }
    fn status_after(&self) -> Option<DvStatus> {
        self.status_after
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryViolation {
    Empty,
    FirstEntryNotReceived { found: ActionType },
    OutOfOrder { index: usize },
    BrokenChain {
        index: usize,
        expected: DvStatus,
        found: DvStatus,
    },
    OverlappingCycles { index: usize },
}

impl fmt::Display for HistoryViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("ledger is empty"),
            Self::FirstEntryNotReceived { found } => {
                write!(f, "first entry is {found}, not DV_RECEIVED")
            }
            Self::OutOfOrder { index } => {
                write!(f, "entry {index} is earlier than the entry before it")
            }
            Self::BrokenChain {
                index,
                expected,
                found,
            } => write!(
                f,
                "entry {index} starts from {found} but the DV was {expected}"
            ),
            Self::OverlappingCycles { index } => {
                write!(f, "entry {index} opens a cycle while another is open")
            }
        }
    }
}

fn opens_cycle(action: ActionType) -> bool {
    matches!(action, ActionType::RtsIssued | ActionType::NorsaIssued)
}

fn closes_cycle(action: ActionType) -> bool {
    matches!(action, ActionType::RtsReturned | ActionType::NorsaReturned)
}

/// Checks `entries` in the order given. An empty result means the ledger
/// is well formed.
pub fn audit<E: LedgerRecord>(entries: &[E]) -> Vec<HistoryViolation> {
    let Some(first) = entries.first() else {
        return vec![HistoryViolation::Empty];
    };

    let mut violations = Vec::new();
    if first.action_type() != ActionType::DvReceived {
        violations.push(HistoryViolation::FirstEntryNotReceived {
            found: first.action_type(),
        });
    }

    for (index, pair) in entries.windows(2).enumerate() {
        if pair[1].timestamp() < pair[0].timestamp() {
            violations.push(HistoryViolation::OutOfOrder { index: index + 1 });
        }
    }

    let mut current: Option<DvStatus> = None;
    let mut open_cycle = false;
    for (index, entry) in entries.iter().enumerate() {
        let action = entry.action_type();
        if opens_cycle(action) {
            if open_cycle {
                violations.push(HistoryViolation::OverlappingCycles { index });
            }
            open_cycle = true;
        } else if closes_cycle(action) {
            open_cycle = false;
        }

        if let (Some(before), Some(after)) = (entry.status_before(), entry.status_after()) {
            if let Some(expected) = current {
                if before != expected {
                    violations.push(HistoryViolation::BrokenChain {
                        index,
                        expected,
                        found: before,
                    });
                }
            }
            current = Some(after);
        } else if let Some(after) = entry.status_after() {
            current = Some(after);
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use dvtrack_core::DvId;

    fn entry(
        action: ActionType,
        minute: i64,
        before: Option<DvStatus>,
        after: DvStatus,
    ) -> NewHistoryEntry {
        let t0 = Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap();
        let at = t0 + Duration::minutes(minute);
        NewHistoryEntry::new(DvId::from_bytes([7; 16]), action, "tester", at)
            .with_statuses(before, Some(after))
    }

    fn clean() -> Vec<NewHistoryEntry> {
        use DvStatus::*;
        vec![
            entry(ActionType::DvReceived, 0, None, ForReview),
            entry(ActionType::RtsIssued, 1, Some(ForReview), ForRtsIn),
            entry(ActionType::RtsReturned, 2, Some(ForRtsIn), ForReview),
            entry(ActionType::ReviewCompleted, 3, Some(ForReview), ForCashAllocation),
        ]
    }

    #[test]
    fn clean_ledger_passes() {
        assert!(audit(&clean()).is_empty());
    }

    #[test]
    fn empty_ledger_is_reported() {
        assert_eq!(audit::<NewHistoryEntry>(&[]), vec![HistoryViolation::Empty]);
    }

    #[test]
    fn receipt_must_come_first() {
        let mut entries = clean();
        entries.remove(0);
        let violations = audit(&entries);
        assert_eq!(
            violations[0],
            HistoryViolation::FirstEntryNotReceived {
                found: ActionType::RtsIssued
            }
        );
    }

    #[test]
    fn detects_reordering_and_broken_chain() {
        let mut entries = clean();
        entries.swap(2, 3);
        let violations = audit(&entries);
        assert!(violations.contains(&HistoryViolation::OutOfOrder { index: 3 }));
        assert!(
            violations
                .iter()
                .any(|v| matches!(v, HistoryViolation::BrokenChain { index: 2, .. }))
        );
    }

    #[test]
    fn detects_overlapping_cycles() {
        use DvStatus::*;
        let mut entries = clean();
        entries.truncate(2);
        entries.push(entry(ActionType::NorsaIssued, 5, Some(ForRtsIn), ForNorsaIn));
        let violations = audit(&entries);
        assert!(violations.contains(&HistoryViolation::OverlappingCycles { index: 2 }));
    }
}
