use dvtrack_core::{ActionType, StageFields, StageSlot};

/// Which stage's actor stands for each action. Actions not listed here have
/// no stage actor.
pub const ACTOR_SLOTS: [(ActionType, StageSlot); 11] = [
    (ActionType::CashAllocation, StageSlot::CashAllocation),
    (ActionType::BoxCCertification, StageSlot::BoxC),
    (ActionType::ApprovalSent, StageSlot::ApprovalOut),
    (ActionType::ApprovalReturned, StageSlot::ApprovalIn),
    (ActionType::IndexingCompleted, StageSlot::Indexing),
    (ActionType::PaymentMethodSet, StageSlot::Payment),
    (ActionType::PayrollReturned, StageSlot::PayrollIn),
    (ActionType::EngasRecorded, StageSlot::Engas),
    (ActionType::CdjRecorded, StageSlot::Cdj),
    (ActionType::LddapCertified, StageSlot::LddapCertified),
    (ActionType::ProcessingCompleted, StageSlot::Processed),
];

pub fn actor_slot(action: ActionType) -> Option<StageSlot> {
    ACTOR_SLOTS
        .iter()
        .find(|(candidate, _)| *candidate == action)
        .map(|(_, slot)| *slot)
}

pub fn stage_actor(action: ActionType, stages: &StageFields) -> Option<&str> {
    let slot = actor_slot(action)?;
    stages.mark(slot).actor.as_deref().filter(|a| !a.trim().is_empty())
}

fn non_blank(s: &&str) -> bool {
    !s.trim().is_empty()
}

/// Explicit actor, then the actor recorded on the stage the action writes,
/// then the signed-in user, then `fallback`.
pub fn resolve_performed_by(
    action: ActionType,
    explicit: Option<&str>,
    stages: &StageFields,
    session_user: Option<&str>,
    fallback: &str,
) -> String {
    explicit
        .filter(non_blank)
        .or_else(|| stage_actor(action, stages))
        .or(session_user.filter(non_blank))
        .unwrap_or(fallback)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvtrack_core::StageMark;

    #[test]
    fn table_has_no_duplicate_actions() {
        for (i, (action, _)) in ACTOR_SLOTS.iter().enumerate() {
            assert!(ACTOR_SLOTS[i + 1..].iter().all(|(other, _)| other != action));
        }
    }

    #[test]
    fn every_action_is_either_mapped_or_intentionally_unmapped() {
        let unmapped = [
            ActionType::DvReceived,
            ActionType::DvUpdated,
            ActionType::ReviewCompleted,
            ActionType::RtsIssued,
            ActionType::RtsReturned,
            ActionType::NorsaIssued,
            ActionType::NorsaReturned,
            ActionType::CashReallocated,
        ];
        for action in ActionType::ALL {
            assert_eq!(actor_slot(action).is_none(), unmapped.contains(&action), "{action}");
        }
    }

    #[test]
    fn precedence_order() {
        let mut stages = StageFields::default();
        stages.engas.actor = Some("Recorder".into());

        let resolve = |explicit, user| {
            resolve_performed_by(ActionType::EngasRecorded, explicit, &stages, user, "System")
        };
        assert_eq!(resolve(Some("Explicit"), Some("Session")), "Explicit");
        assert_eq!(resolve(None, Some("Session")), "Recorder");
        assert_eq!(resolve(Some("  "), None), "Recorder");

        let empty = StageFields::default();
        assert_eq!(
            resolve_performed_by(
                ActionType::EngasRecorded,
                None,
                &empty,
                Some("Session"),
                "System",
            ),
            "Session"
        );
        assert_eq!(
            resolve_performed_by(ActionType::EngasRecorded, None, &empty, None, "System"),
            "System"
        );
    }

    #[test]
    fn approval_returned_uses_approver() {
        let mut stages = StageFields::default();
        stages.approval_in = StageMark {
            actor: Some("Director".into()),
            ..Default::default()
        };
        assert_eq!(stage_actor(ActionType::ApprovalReturned, &stages), Some("Director"));
        assert_eq!(stage_actor(ActionType::ApprovalSent, &stages), None);
    }
}
