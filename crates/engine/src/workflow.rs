use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use dvtrack_core::{
    ActionType, CycleKind, CycleOrigin, CycleRecord, DisbursementVoucher, DvStatus,
    NewHistoryEntry, PaymentMethod, Reallocation, ReferenceNumber, StageMark, StageSlot,
};

use crate::actor::resolve_performed_by;
use crate::config::WorkflowConfig;
use crate::error::EngineError;

/// Date, actor and note supplied with a stage-completing action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInput {
    pub date: NaiveDate,
    pub actor: Option<String>,
    pub note: Option<String>,
}

impl StageInput {
    pub fn on(date: NaiveDate) -> Self {
        Self {
            date,
            actor: None,
            note: None,
        }
    }

    pub fn by(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    pub fn noted(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }

    fn mark(&self) -> StageMark {
        StageMark::new(self.date, self.actor.clone(), self.note.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashAllocationInput {
    pub stage: StageInput,
    pub number: String,
    pub net_amount: Decimal,
}

/// Opens an RTS cycle (`detail` is the reason) or a NORSA cycle (`detail` is
/// the notice number).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleInput {
    pub date: NaiveDate,
    pub detail: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnInput {
    pub returned_date: NaiveDate,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentMethodInput {
    pub stage: StageInput,
    pub method: PaymentMethod,
    pub lddap_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngasInput {
    pub stage: StageInput,
    pub engas_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReallocationInput {
    pub date: NaiveDate,
    pub reason: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ReviewComplete(StageInput),
    ReviewRts(CycleInput),
    ReviewNorsa(CycleInput),
    CashAllocation(CashAllocationInput),
    BoxCCertify(StageInput),
    BoxCRts(CycleInput),
    BoxCNorsa(CycleInput),
    RtsNorsaUpdate(ReturnInput),
    ApprovalOut(StageInput),
    ApprovalIn(StageInput),
    Indexing(StageInput),
    PaymentMethod(PaymentMethodInput),
    PayrollIn(StageInput),
    Engas(EngasInput),
    Cdj(StageInput),
    LddapCertify(StageInput),
    ReallocateCash(ReallocationInput),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReviewComplete(_) => "review_complete",
            Self::ReviewRts(_) => "review_rts",
            Self::ReviewNorsa(_) => "review_norsa",
            Self::CashAllocation(_) => "cash_allocation",
            Self::BoxCCertify(_) => "box_c_certify",
            Self::BoxCRts(_) => "box_c_rts",
            Self::BoxCNorsa(_) => "box_c_norsa",
            Self::RtsNorsaUpdate(_) => "rts_norsa_update",
            Self::ApprovalOut(_) => "approval_out",
            Self::ApprovalIn(_) => "approval_in",
            Self::Indexing(_) => "indexing",
            Self::PaymentMethod(_) => "payment_method",
            Self::PayrollIn(_) => "payroll_in",
            Self::Engas(_) => "engas",
            Self::Cdj(_) => "cdj",
            Self::LddapCertify(_) => "lddap_certify",
            Self::ReallocateCash(_) => "reallocate_cash",
        }
    }

    /// Statuses from which this action may be taken.
    pub fn allowed_from(&self) -> &'static [DvStatus] {
        match self {
            Self::ReviewComplete(_) | Self::ReviewRts(_) | Self::ReviewNorsa(_) => {
                &[DvStatus::ForReview]
            }
            Self::CashAllocation(_) => &[DvStatus::ForCashAllocation],
            Self::BoxCCertify(_) | Self::BoxCRts(_) | Self::BoxCNorsa(_) => &[DvStatus::ForBoxC],
            Self::RtsNorsaUpdate(_) => &[DvStatus::ForRtsIn, DvStatus::ForNorsaIn],
            Self::ApprovalOut(_) | Self::ApprovalIn(_) => &[DvStatus::ForApproval],
            Self::Indexing(_) => &[DvStatus::ForIndexing],
            Self::PaymentMethod(_) => &[DvStatus::ForPayment],
            Self::PayrollIn(_) => &[DvStatus::OutToCashiering],
            Self::Engas(_) => &[DvStatus::ForEngas],
            Self::Cdj(_) => &[DvStatus::ForCdj],
            Self::LddapCertify(_) => &[DvStatus::ForLddap],
            Self::ReallocateCash(_) => &[DvStatus::Processed],
        }
    }
}

pub struct TransitionContext<'a> {
    pub session_user: Option<&'a str>,
    pub now: DateTime<Utc>,
    pub config: &'a WorkflowConfig,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub dv: DisbursementVoucher,
    pub entries: Vec<NewHistoryEntry>,
}

/// Validate `action` against `current` and compute its effect. Nothing is
/// written; the caller persists the plan as one unit.
pub fn plan(
    current: &DisbursementVoucher,
    action: &Action,
    ctx: &TransitionContext<'_>,
) -> Result<Plan, EngineError> {
    let reject = |reason: String| EngineError::InvalidTransition {
        dv_number: current.dv_number.clone(),
        status: current.status,
        action: action.name(),
        reason,
    };

    if !action.allowed_from().contains(&current.status) {
        return Err(reject(format!(
            "expected one of [{}]",
            action
                .allowed_from()
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    if current.is_reallocated && !matches!(action, Action::CashAllocation(_)) {
        return Err(reject("reallocated DV must go through cash allocation first".into()));
    }

    let mut planner = Planner {
        next: current.clone(),
        entries: Vec::new(),
        ctx,
    };
    let before = current.status;

    match action {
        Action::ReviewComplete(input) => {
            planner.next.status = DvStatus::ForCashAllocation;
            let entry = planner
                .entry(ActionType::ReviewCompleted, input.actor.as_deref(), before)
                .with_data("review_date", input.date.to_string())
                .with_notes(input.note.clone());
            planner.push(entry);
        }

        Action::ReviewRts(input) => {
            planner.open_cycle(CycleKind::Rts, CycleOrigin::Review, input, &reject)?
        }
        Action::ReviewNorsa(input) => {
            planner.open_cycle(CycleKind::Norsa, CycleOrigin::Review, input, &reject)?
        }
        Action::BoxCRts(input) => {
            planner.open_cycle(CycleKind::Rts, CycleOrigin::BoxC, input, &reject)?
        }
        Action::BoxCNorsa(input) => {
            planner.open_cycle(CycleKind::Norsa, CycleOrigin::BoxC, input, &reject)?
        }

        Action::RtsNorsaUpdate(input) => planner.close_cycle(input, &reject)?,

        Action::CashAllocation(input) => {
            let number = input.number.trim();
            if number.is_empty() {
                return Err(EngineError::validation("cash_allocation_number", "is required"));
            }
            if input.net_amount <= Decimal::ZERO {
                return Err(EngineError::validation("net_amount", "must be greater than zero"));
            }
            let was_reallocated = current.is_reallocated;
            let stages = &mut planner.next.stages;
            stages.cash_allocation = input.stage.mark();
            stages.cash_allocation_number = Some(number.to_string());
            stages.net_amount = Some(input.net_amount);
            planner.next.is_reallocated = false;
            planner.next.status = DvStatus::ForBoxC;

            let mut entry = planner
                .entry(ActionType::CashAllocation, None, before)
                .with_data("cash_allocation_date", input.stage.date.to_string())
                .with_data("cash_allocation_number", number)
                .with_data("net_amount", input.net_amount.to_string())
                .with_notes(input.stage.note.clone());
            if was_reallocated {
                entry = entry.with_data("after_reallocation", true);
            }
            planner.push(entry);
        }

        Action::BoxCCertify(input) => {
            planner.complete_stage(
                StageSlot::BoxC,
                input,
                DvStatus::ForApproval,
                ActionType::BoxCCertification,
                "box_c_date",
            );
        }

        Action::ApprovalOut(input) => {
            if current.stages.approval_out.date.is_some() {
                return Err(reject("already out for approval".into()));
            }
            planner.complete_stage(
                StageSlot::ApprovalOut,
                input,
                DvStatus::ForApproval,
                ActionType::ApprovalSent,
                "approval_out_date",
            );
        }

        Action::ApprovalIn(input) => {
            let Some(out_date) = current.stages.approval_out.date else {
                return Err(reject("not yet sent out for approval".into()));
            };
            if input.date < out_date {
                return Err(EngineError::validation(
                    "approval_in_date",
                    format!("must not precede approval_out_date {out_date}"),
                ));
            }
            planner.complete_stage(
                StageSlot::ApprovalIn,
                input,
                DvStatus::ForIndexing,
                ActionType::ApprovalReturned,
                "approval_in_date",
            );
        }

        Action::Indexing(input) => {
            planner.complete_stage(
                StageSlot::Indexing,
                input,
                DvStatus::ForPayment,
                ActionType::IndexingCompleted,
                "indexing_date",
            );
        }

        Action::PaymentMethod(input) => {
            let lddap_number = match input.method {
                PaymentMethod::Lddap => {
                    let number = input
                        .lddap_number
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .ok_or_else(|| {
                            EngineError::validation(
                                "lddap_number",
                                "is required when payment_method is lddap",
                            )
                        })?;
                    Some(number.to_string())
                }
                PaymentMethod::Check | PaymentMethod::Payroll => None,
            };
            planner.next.stages.payment_method = Some(input.method);
            planner.next.stages.lddap_number = lddap_number.clone();
            planner.next.stages.payment = input.stage.mark();
            planner.next.status = input.method.next_status();

            let entry = planner
                .entry(ActionType::PaymentMethodSet, None, before)
                .with_data("payment_method", input.method.as_str())
                .with_data("payment_method_date", input.stage.date.to_string())
                .with_data("lddap_number", lddap_number)
                .with_notes(input.stage.note.clone());
            planner.push(entry);
        }

        Action::PayrollIn(input) => {
            planner.complete_stage(
                StageSlot::PayrollIn,
                input,
                DvStatus::ForEngas,
                ActionType::PayrollReturned,
                "payroll_in_date",
            );
        }

        Action::Engas(input) => {
            let number = input.engas_number.trim();
            ReferenceNumber::parse(number, ctx.config.reference_window(ctx.now))
                .map_err(|e| EngineError::validation("engas_number", e.to_string()))?;
            planner.next.stages.engas_number = Some(number.to_string());
            planner.next.stages.engas = input.stage.mark();
            planner.next.status = DvStatus::ForCdj;

            let entry = planner
                .entry(ActionType::EngasRecorded, None, before)
                .with_data("engas_number", number)
                .with_data("engas_date", input.stage.date.to_string())
                .with_notes(input.stage.note.clone());
            planner.push(entry);
        }

        Action::Cdj(input) => {
            planner.complete_stage(
                StageSlot::Cdj,
                input,
                DvStatus::ForLddap,
                ActionType::CdjRecorded,
                "cdj_date",
            );
        }

        Action::LddapCertify(input) => {
            planner.next.stages.lddap_certified = input.mark();
            planner.next.stages.processed = input.mark();
            planner.next.status = DvStatus::Processed;

            let certified = planner
                .entry(ActionType::LddapCertified, None, before)
                .with_statuses(Some(before), Some(before))
                .with_data("lddap_certified_date", input.date.to_string())
                .with_data("lddap_number", planner.next.stages.lddap_number.clone())
                .with_notes(input.note.clone());
            let completed = planner
                .entry(ActionType::ProcessingCompleted, None, before)
                .with_data("processed_date", input.date.to_string());
            planner.push(certified);
            planner.push(completed);
        }

        Action::ReallocateCash(input) => {
            let reason = input.reason.trim();
            if reason.is_empty() {
                return Err(EngineError::validation("reallocation_reason", "is required"));
            }
            let archived = std::mem::take(&mut planner.next.stages);
            let snapshot = serde_json::to_value(&archived).map_err(|e| {
                EngineError::Core(dvtrack_core::CoreError::Serialization(e.to_string()))
            })?;
            planner.next.old_stages = Some(archived);
            planner.next.is_reallocated = true;
            planner.next.reallocation = Some(Reallocation {
                date: input.date,
                reason: reason.to_string(),
            });
            planner.next.status = DvStatus::ForCashAllocation;

            let entry = planner
                .entry(ActionType::CashReallocated, None, before)
                .with_data("reallocation_date", input.date.to_string())
                .with_data("reallocation_reason", reason)
                .with_data("archived_stages", snapshot)
                .with_notes(input.note.clone());
            planner.push(entry);
        }
    }

    planner.next.updated_at = ctx.now;
    planner.next.check_invariants()?;
    Ok(Plan {
        dv: planner.next,
        entries: planner.entries,
    })
}

struct Planner<'a, 'c> {
    next: DisbursementVoucher,
    entries: Vec<NewHistoryEntry>,
    ctx: &'a TransitionContext<'c>,
}

impl Planner<'_, '_> {
    /// Entry stamped with `before` and the planned status, attributed per the
    /// actor precedence rules against the planned stage data.
    fn entry(
        &self,
        action: ActionType,
        explicit: Option<&str>,
        before: DvStatus,
    ) -> NewHistoryEntry {
        let performed_by = resolve_performed_by(
            action,
            explicit,
            &self.next.stages,
            self.ctx.session_user,
            &self.ctx.config.system_actor,
        );
        NewHistoryEntry::new(self.next.dv_id, action, &performed_by, self.ctx.now)
            .with_statuses(Some(before), Some(self.next.status))
    }

    fn push(&mut self, entry: NewHistoryEntry) {
        self.entries.push(entry);
    }

    fn complete_stage(
        &mut self,
        slot: StageSlot,
        input: &StageInput,
        to: DvStatus,
        action: ActionType,
        date_key: &str,
    ) {
        let before = self.next.status;
        *self.next.stages.mark_mut(slot) = input.mark();
        self.next.status = to;
        let entry = self
            .entry(action, None, before)
            .with_data(date_key, input.date.to_string())
            .with_notes(input.note.clone());
        self.push(entry);
    }

    fn open_cycle(
        &mut self,
        kind: CycleKind,
        origin: CycleOrigin,
        input: &CycleInput,
        reject: &dyn Fn(String) -> EngineError,
    ) -> Result<(), EngineError> {
        if let Some(open) = self
            .next
            .open_cycle(CycleKind::Rts)
            .map(|_| CycleKind::Rts)
            .or(self.next.open_cycle(CycleKind::Norsa).map(|_| CycleKind::Norsa))
        {
            return Err(reject(format!("an {} cycle is still open", open.as_str())));
        }

        let detail = input.detail.trim();
        let (action, detail_key) = match kind {
            CycleKind::Rts => {
                if detail.is_empty() {
                    return Err(EngineError::validation("rts_reason", "is required"));
                }
                (ActionType::RtsIssued, "reason")
            }
            CycleKind::Norsa => {
                ReferenceNumber::parse(detail, self.ctx.config.reference_window(self.ctx.now))
                    .map_err(|e| EngineError::validation("norsa_number", e.to_string()))?;
                (ActionType::NorsaIssued, "norsa_number")
            }
        };

        let before = self.next.status;
        let record = CycleRecord {
            date: input.date,
            detail: detail.to_string(),
            returned_date: None,
            origin,
        };
        let cycle_number = match kind {
            CycleKind::Rts => {
                self.next.rts_history.push(record);
                self.next.rts_cycle_count += 1;
                self.next.rts_origin = Some(origin);
                self.next.rts_cycle_count
            }
            CycleKind::Norsa => {
                self.next.norsa_history.push(record);
                self.next.norsa_cycle_count += 1;
                self.next.norsa_origin = Some(origin);
                self.next.norsa_cycle_count
            }
        };
        self.next.status = kind.status();

        let entry = self
            .entry(action, None, before)
            .with_data(detail_key, detail)
            .with_data("date", input.date.to_string())
            .with_data("origin", origin.as_str())
            .with_data("cycle", cycle_number)
            .with_notes(input.note.clone());
        self.push(entry);
        Ok(())
    }

    fn close_cycle(
        &mut self,
        input: &ReturnInput,
        reject: &dyn Fn(String) -> EngineError,
    ) -> Result<(), EngineError> {
        let before = self.next.status;
        let (kind, action) = match before {
            DvStatus::ForRtsIn => (CycleKind::Rts, ActionType::RtsReturned),
            _ => (CycleKind::Norsa, ActionType::NorsaReturned),
        };
        let history = match kind {
            CycleKind::Rts => &mut self.next.rts_history,
            CycleKind::Norsa => &mut self.next.norsa_history,
        };
        let Some(cycle) = history.iter_mut().rev().find(|c| c.is_open()) else {
            return Err(reject(format!("no open {} cycle to close", kind.as_str())));
        };
        if input.returned_date < cycle.date {
            return Err(EngineError::validation(
                "returned_date",
                format!("must not precede the issue date {}", cycle.date),
            ));
        }
        cycle.returned_date = Some(input.returned_date);
        let origin = cycle.origin;
        let detail = cycle.detail.clone();

        match kind {
            CycleKind::Rts => self.next.rts_origin = None,
            CycleKind::Norsa => self.next.norsa_origin = None,
        }
        self.next.status = origin.status();

        let entry = self
            .entry(action, None, before)
            .with_data("returned_date", input.returned_date.to_string())
            .with_data("origin", origin.as_str())
            .with_data(
                match kind {
                    CycleKind::Rts => "reason",
                    CycleKind::Norsa => "norsa_number",
                },
                Value::String(detail),
            )
            .with_notes(input.note.clone());
        self.push(entry);
        Ok(())
    }
}
