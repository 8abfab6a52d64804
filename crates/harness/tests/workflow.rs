use chrono::NaiveDate;
use rust_decimal::Decimal;

use dvtrack_core::{
    ActionType, CycleOrigin, DvId, DvPatch, DvStatus, OrsEntry, PaymentMethod,
};
use dvtrack_engine::{
    Action, CashAllocationInput, CycleInput, EngasInput, EngineError, ReallocationInput,
    ReturnInput, StageInput,
};
use dvtrack_harness::{CLERK, TestDesk, TestResult};

fn cycle(date: NaiveDate, detail: &str) -> CycleInput {
    CycleInput {
        date,
        detail: detail.into(),
        note: None,
    }
}

fn returned(date: NaiveDate) -> Action {
    Action::RtsNorsaUpdate(ReturnInput {
        returned_date: date,
        note: None,
    })
}

// ============================================================================
// Forward path
// ============================================================================

#[test]
fn check_payment_runs_to_processed() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0001")?;

    let dv = desk.drive_to(dv_id, DvStatus::Processed)?;
    assert_eq!(dv.status, DvStatus::Processed);
    assert_eq!(dv.stages.payment_method, Some(PaymentMethod::Check));
    assert_eq!(dv.net_amount(), Some(Decimal::from(48_000)));
    assert!(dv.processed_date().is_some());
    dv.check_invariants()?;

    let stored = desk.engine.load_dv(dv_id)?;
    assert_eq!(stored, dv);

    let tags: Vec<_> = desk
        .engine
        .history(dv_id)?
        .iter()
        .map(|e| e.action_type)
        .collect();
    assert_eq!(
        tags,
        vec![
            ActionType::DvReceived,
            ActionType::ReviewCompleted,
            ActionType::CashAllocation,
            ActionType::BoxCCertification,
            ActionType::ApprovalSent,
            ActionType::ApprovalReturned,
            ActionType::IndexingCompleted,
            ActionType::PaymentMethodSet,
            ActionType::EngasRecorded,
            ActionType::CdjRecorded,
            ActionType::LddapCertified,
            ActionType::ProcessingCompleted,
        ]
    );
    Ok(())
}

#[test]
fn payroll_passes_through_cashiering() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0002")?;

    let dv = desk.drive_via(dv_id, DvStatus::OutToCashiering, PaymentMethod::Payroll)?;
    assert_eq!(dv.status, DvStatus::OutToCashiering);

    let dv = desk.drive_via(dv_id, DvStatus::ForEngas, PaymentMethod::Payroll)?;
    assert!(dv.stages.payroll_in.date.is_some());

    let last = desk.engine.history(dv_id)?.pop().ok_or("empty ledger")?;
    assert_eq!(last.action_type, ActionType::PayrollReturned);
    assert_eq!(last.status_before, Some(DvStatus::OutToCashiering));
    assert_eq!(last.status_after, Some(DvStatus::ForEngas));
    Ok(())
}

#[test]
fn lddap_payment_records_number() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0003")?;
    let dv = desk.drive_via(dv_id, DvStatus::Processed, PaymentMethod::Lddap)?;
    assert_eq!(dv.stages.lddap_number.as_deref(), Some("LDDAP-2025-031"));
    Ok(())
}

#[test]
fn cash_allocation_example() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0004")?;
    desk.drive_to(dv_id, DvStatus::ForCashAllocation)?;
    let before = desk.engine.history_count(dv_id)?;

    let dv = desk.act(
        dv_id,
        Action::CashAllocation(CashAllocationInput {
            stage: StageInput::on(desk.today()),
            number: "CA-001".into(),
            net_amount: Decimal::from(48_000),
        }),
    )?;
    assert_eq!(dv.status, DvStatus::ForBoxC);
    assert_eq!(dv.net_amount(), Some(Decimal::from(48_000)));
    assert_eq!(dv.stages.cash_allocation_number.as_deref(), Some("CA-001"));

    let history = desk.engine.history(dv_id)?;
    assert_eq!(history.len() as u64, before + 1);
    let entry = history.last().ok_or("empty ledger")?;
    assert_eq!(entry.action_type, ActionType::CashAllocation);
    assert_eq!(entry.status_before, Some(DvStatus::ForCashAllocation));
    assert_eq!(entry.status_after, Some(DvStatus::ForBoxC));
    assert_eq!(entry.action_data["cash_allocation_number"], "CA-001");
    Ok(())
}

#[test]
fn engas_reference_format() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0005")?;
    desk.drive_to(dv_id, DvStatus::ForEngas)?;

    let engas = |number: &str, date| {
        Action::Engas(EngasInput {
            stage: StageInput::on(date),
            engas_number: number.into(),
        })
    };
    for bad in ["2019-06-00001", "2025-13-00001", "2025-06-00000", "2025-6-00001"] {
        let err = desk.act(dv_id, engas(bad, desk.today())).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "engas_number", .. }), "{bad}");
    }
    let dv = desk.act(dv_id, engas("2025-06-00001", desk.today()))?;
    assert_eq!(dv.status, DvStatus::ForCdj);
    Ok(())
}

// ============================================================================
// Illegal transitions
// ============================================================================

#[test]
fn rejected_transition_writes_nothing() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0010")?;
    let before = desk.engine.load_dv(dv_id)?;

    let err = desk
        .act(dv_id, Action::Cdj(StageInput::on(desk.today())))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            status: DvStatus::ForReview,
            action: "cdj",
            ..
        }
    ));

    assert_eq!(desk.engine.load_dv(dv_id)?, before);
    assert_eq!(desk.engine.history_count(dv_id)?, 1);
    Ok(())
}

#[test]
fn reallocation_only_from_processed() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0011")?;
    desk.drive_to(dv_id, DvStatus::ForLddap)?;

    let err = desk
        .act(
            dv_id,
            Action::ReallocateCash(ReallocationInput {
                date: desk.today(),
                reason: "wrong fund".into(),
                note: None,
            }),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    Ok(())
}

#[test]
fn unknown_dv_is_not_found() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let err = desk
        .act(DvId::new(), Action::Indexing(StageInput::on(desk.today())))
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(matches!(desk.engine.history(DvId::new()), Err(EngineError::NotFound(_))));
    Ok(())
}

// ============================================================================
// RTS / NORSA cycles
// ============================================================================

#[test]
fn box_c_rts_returns_to_box_c() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0020")?;
    desk.drive_to(dv_id, DvStatus::ForBoxC)?;

    let dv = desk.act(dv_id, Action::BoxCRts(cycle(desk.today(), "missing docs")))?;
    assert_eq!(dv.status, DvStatus::ForRtsIn);
    assert_eq!(dv.rts_origin, Some(CycleOrigin::BoxC));
    assert_eq!(dv.rts_cycle_count, 1);
    assert_eq!(dv.rts_history.len(), 1);
    assert_eq!(dv.rts_history[0].returned_date, None);

    desk.next_day();
    let dv = desk.act(dv_id, returned(desk.today()))?;
    assert_eq!(dv.status, DvStatus::ForBoxC);
    assert_eq!(dv.rts_history[0].returned_date, Some(desk.today()));
    assert_eq!(dv.rts_cycle_count, 1);
    assert_eq!(dv.rts_origin, None);
    Ok(())
}

#[test]
fn review_cycles_return_to_review() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0021")?;

    desk.act(dv_id, Action::ReviewRts(cycle(desk.today(), "unsigned ORS")))?;
    desk.next_day();
    desk.act(dv_id, returned(desk.today()))?;
    desk.next_day();
    let dv = desk.act(dv_id, Action::ReviewNorsa(cycle(desk.today(), "2025-03-00007")))?;
    assert_eq!(dv.status, DvStatus::ForNorsaIn);
    assert_eq!(dv.norsa_origin, Some(CycleOrigin::Review));

    desk.next_day();
    let dv = desk.act(dv_id, returned(desk.today()))?;
    assert_eq!(dv.status, DvStatus::ForReview);
    assert_eq!((dv.rts_cycle_count, dv.norsa_cycle_count), (1, 1));
    assert_eq!(dv.rts_history.len(), 1);
    assert_eq!(dv.norsa_history.len(), 1);
    assert!(!dv.has_open_cycle());
    dv.check_invariants()?;
    Ok(())
}

#[test]
fn second_cycle_while_open_is_rejected() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0022")?;
    desk.act(dv_id, Action::ReviewRts(cycle(desk.today(), "incomplete")))?;

    for action in [
        Action::ReviewRts(cycle(desk.today(), "again")),
        Action::ReviewNorsa(cycle(desk.today(), "2025-03-00008")),
        Action::BoxCNorsa(cycle(desk.today(), "2025-03-00008")),
    ] {
        let err = desk.act(dv_id, action).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    let dv = desk.engine.load_dv(dv_id)?;
    assert_eq!(dv.rts_cycle_count, 1);
    assert_eq!(dv.norsa_cycle_count, 0);
    Ok(())
}

#[test]
fn repeated_cycles_keep_counts_in_step() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0023")?;
    desk.drive_to(dv_id, DvStatus::ForBoxC)?;

    for reason in ["missing docs", "wrong payee", "unsigned"] {
        desk.next_day();
        desk.act(dv_id, Action::BoxCRts(cycle(desk.today(), reason)))?;
        desk.next_day();
        let dv = desk.act(dv_id, returned(desk.today()))?;
        assert_eq!(dv.rts_cycle_count as usize, dv.rts_history.len());
        dv.check_invariants()?;
    }
    let dv = desk.engine.load_dv(dv_id)?;
    assert_eq!(dv.rts_cycle_count, 3);
    assert!(dv.rts_history.iter().all(|c| c.origin == CycleOrigin::BoxC));
    Ok(())
}

// ============================================================================
// Reallocation
// ============================================================================

#[test]
fn reallocation_round_trip() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0030")?;
    let original = desk.drive_to(dv_id, DvStatus::Processed)?.stages;

    desk.next_day();
    let dv = desk.act(
        dv_id,
        Action::ReallocateCash(ReallocationInput {
            date: desk.today(),
            reason: "fund source reclassified".into(),
            note: Some("per memo 12".into()),
        }),
    )?;
    assert_eq!(dv.status, DvStatus::ForCashAllocation);
    assert!(dv.is_reallocated);
    assert!(dv.stages.is_empty());
    assert_eq!(dv.processed_date(), None);
    assert_eq!(dv.old_stages.as_ref(), Some(&original));

    let dv = desk.drive_to(dv_id, DvStatus::ForBoxC)?;
    assert!(!dv.is_reallocated);

    let dv = desk.drive_to(dv_id, DvStatus::Processed)?;
    assert_eq!(dv.old_stages.as_ref(), Some(&original));
    assert!(!dv.is_reallocated);
    assert_eq!(
        dv.reallocation.as_ref().map(|r| r.reason.as_str()),
        Some("fund source reclassified")
    );

    let history = desk.engine.history(dv_id)?;
    let realloc = history
        .iter()
        .find(|e| e.action_type == ActionType::CashReallocated)
        .ok_or("no reallocation entry")?;
    assert_eq!(realloc.status_before, Some(DvStatus::Processed));
    assert_eq!(realloc.notes.as_deref(), Some("per memo 12"));
    assert!(realloc.action_data["archived_stages"].is_object());
    assert_eq!(
        history
            .iter()
            .filter(|e| e.action_type == ActionType::ProcessingCompleted)
            .count(),
        2
    );
    Ok(())
}

#[test]
fn second_reallocation_keeps_first_archive_in_ledger() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0031")?;
    let first = desk.drive_to(dv_id, DvStatus::Processed)?.stages;

    for reason in ["first move", "second move"] {
        desk.next_day();
        desk.act(
            dv_id,
            Action::ReallocateCash(ReallocationInput {
                date: desk.today(),
                reason: reason.into(),
                note: None,
            }),
        )?;
        desk.drive_to(dv_id, DvStatus::Processed)?;
    }

    let archives: Vec<_> = desk
        .engine
        .history(dv_id)?
        .into_iter()
        .filter(|e| e.action_type == ActionType::CashReallocated)
        .map(|e| e.action_data["archived_stages"].clone())
        .collect();
    assert_eq!(archives.len(), 2);
    assert_eq!(archives[0], serde_json::to_value(&first)?);
    assert_ne!(archives[0], archives[1]);
    Ok(())
}

// ============================================================================
// Intake and edits
// ============================================================================

#[test]
fn intake_validates_and_rejects_duplicates() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    desk.intake("2025-03-0040")?;

    let err = desk.intake("2025-03-0040").unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "dv_number", .. }));

    let mut draft = TestDesk::draft("2025-03-0041");
    draft.amount = Decimal::ZERO;
    let err = desk.engine.create_dv(&draft, Some(CLERK)).unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "amount", .. }));

    let err = desk.intake("   ").unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "dv_number", .. }));
    Ok(())
}

#[test]
fn update_records_changed_fields() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0042")?;
    desk.drive_to(dv_id, DvStatus::ForBoxC)?;

    let mut line = OrsEntry::new("General Fund");
    line.ors_number = Some("ORS-0042".into());
    let patch = DvPatch {
        payee: Some("Maria L. Santos".into()),
        particulars: Some("Office supplies for Q1".into()),
        ors_entries: Some(vec![line.clone()]),
        ..Default::default()
    };
    let outcome = desk.engine.update_dv(dv_id, &patch, Some("Records Officer"))?;
    assert_eq!(outcome.entry_ids.len(), 1);
    assert_eq!(outcome.dv.status, DvStatus::ForBoxC);
    assert_eq!(outcome.dv.payee, "Maria L. Santos");

    let view = desk.engine.get_dv(dv_id)?;
    assert_eq!(view.ors_entries, vec![line]);

    let entry = desk.engine.history(dv_id)?.pop().ok_or("empty ledger")?;
    assert_eq!(entry.action_type, ActionType::DvUpdated);
    assert_eq!(entry.performed_by, "Records Officer");
    assert_eq!(entry.action_data["changed_fields"], serde_json::json!(["payee", "ors_entries"]));
    assert_eq!(entry.status_before, entry.status_after);
    Ok(())
}

#[test]
fn no_op_update_writes_nothing() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    let dv_id = desk.intake("2025-03-0043")?;
    let before = desk.engine.load_dv(dv_id)?;

    let patch = DvPatch {
        payee: Some(before.payee.clone()),
        amount: Some(before.amount),
        ..Default::default()
    };
    let outcome = desk.engine.update_dv(dv_id, &patch, Some(CLERK))?;
    assert!(outcome.entry_ids.is_empty());
    assert_eq!(desk.engine.load_dv(dv_id)?.version, before.version);
    assert_eq!(desk.engine.history_count(dv_id)?, 1);
    Ok(())
}

#[test]
fn update_to_taken_number_is_rejected() -> TestResult<()> {
    let mut desk = TestDesk::new()?;
    desk.intake("2025-03-0044")?;
    let dv_id = desk.intake("2025-03-0045")?;

    let patch = DvPatch {
        dv_number: Some("2025-03-0044".into()),
        ..Default::default()
    };
    let err = desk.engine.update_dv(dv_id, &patch, Some(CLERK)).unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "dv_number", .. }));
    assert_eq!(desk.engine.history_count(dv_id)?, 1);
    Ok(())
}
