use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use dvtrack_core::{
    ActionType, CycleKind, CycleOrigin, CycleRecord, DisbursementVoucher, DvStatus,
    NewHistoryEntry,
};

use crate::actor::resolve_performed_by;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub entries: Vec<NewHistoryEntry>,
}

impl Reconstruction {
    /// blake3 digest of the MessagePack encoding of the entries. Equal
    /// digests mean byte-identical reconstructions.
    pub fn fingerprint(&self) -> Result<String, EngineError> {
        let bytes = rmp_serde::to_vec(&self.entries).map_err(|e| {
            EngineError::Core(dvtrack_core::CoreError::Serialization(e.to_string()))
        })?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn at_midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

struct Builder<'a> {
    dv: &'a DisbursementVoucher,
    default_actor: &'a str,
    entries: Vec<NewHistoryEntry>,
}

impl Builder<'_> {
    fn offset(&self, minutes: i64) -> DateTime<Utc> {
        self.dv.created_at + Duration::minutes(minutes)
    }

    /// Midnight of `date`, but never earlier than `minutes` after intake.
    /// Stages dated on or before the intake day keep their rule order behind
    /// the receipt.
    fn dated(&self, date: NaiveDate, minutes: i64) -> DateTime<Utc> {
        at_midnight(date).max(self.offset(minutes))
    }

    fn dated_or(&self, date: Option<NaiveDate>, minutes: i64) -> DateTime<Utc> {
        date.map_or_else(|| self.offset(minutes), |d| self.dated(d, minutes))
    }

    fn emit(
        &mut self,
        action: ActionType,
        at: DateTime<Utc>,
        before: Option<DvStatus>,
        after: Option<DvStatus>,
    ) -> &mut NewHistoryEntry {
        let performed_by =
            resolve_performed_by(action, None, &self.dv.stages, None, self.default_actor);
        let entry = NewHistoryEntry::new(self.dv.dv_id, action, &performed_by, at)
            .with_statuses(before, after)
            .with_data("reconstructed", true);
        self.entries.push(entry);
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    fn cycles(&mut self, kind: CycleKind, history: &[CycleRecord]) {
        let (issued, returned, detail_key) = match kind {
            CycleKind::Rts => (ActionType::RtsIssued, ActionType::RtsReturned, "reason"),
            CycleKind::Norsa => (
                ActionType::NorsaIssued,
                ActionType::NorsaReturned,
                "norsa_number",
            ),
        };
        for (i, cycle) in history.iter().enumerate() {
            let origin_status = cycle.origin.status();
            // A cycle follows whatever step led into its origin stage.
            let floor = match cycle.origin {
                CycleOrigin::Review => 0,
                CycleOrigin::BoxC => 10,
            };
            let entry = self.emit(
                issued,
                self.dated(cycle.date, floor),
                Some(origin_status),
                Some(kind.status()),
            );
            put(entry, detail_key, cycle.detail.clone());
            put(entry, "origin", cycle.origin.as_str());
            put(entry, "cycle", i as u64 + 1);

            if let Some(returned_date) = cycle.returned_date {
                let entry = self.emit(
                    returned,
                    self.dated(returned_date, floor),
                    Some(kind.status()),
                    Some(origin_status),
                );
                put(entry, "returned_date", returned_date.to_string());
                put(entry, "origin", cycle.origin.as_str());
            }
        }
    }
}

fn put(entry: &mut NewHistoryEntry, key: &str, value: impl Into<serde_json::Value>) {
    let value = value.into();
    if !value.is_null() {
        entry.action_data.insert(key.to_string(), value);
    }
}

pub fn reconstruct(dv: &DisbursementVoucher, default_actor: &str) -> Reconstruction {
    let mut b = Builder {
        dv,
        default_actor,
        entries: Vec::new(),
    };
    let stages = &dv.stages;
    let position = dv.workflow_position();

    let received = b.emit(
        ActionType::DvReceived,
        dv.created_at,
        None,
        Some(DvStatus::ForReview),
    );
    put(received, "dv_number", dv.dv_number.clone());
    put(received, "amount", dv.amount.to_string());

    if position.is_at_or_past(DvStatus::ForCashAllocation) {
        b.emit(
            ActionType::ReviewCompleted,
            b.offset(5),
            Some(DvStatus::ForReview),
            Some(DvStatus::ForCashAllocation),
        );
    }

    if stages.cash_allocation.date.is_some()
        || stages.cash_allocation_number.is_some()
        || stages.net_amount.is_some()
    {
        let at = b.dated_or(stages.cash_allocation.date, 10);
        let entry = b.emit(
            ActionType::CashAllocation,
            at,
            Some(DvStatus::ForCashAllocation),
            Some(DvStatus::ForBoxC),
        );
        put(entry, "cash_allocation_number", stages.cash_allocation_number.clone());
        put(entry, "net_amount", stages.net_amount.map(|n| n.to_string()));
        put(entry, "allocated_by", stages.cash_allocation.actor.clone());
    }

    if position.is_at_or_past(DvStatus::ForApproval) || stages.box_c.date.is_some() {
        let at = b.dated_or(stages.box_c.date, 15);
        b.emit(
            ActionType::BoxCCertification,
            at,
            Some(DvStatus::ForBoxC),
            Some(DvStatus::ForApproval),
        );
    }

    if let Some(out) = stages.approval_out.date {
        b.emit(
            ActionType::ApprovalSent,
            b.dated(out, 18),
            Some(DvStatus::ForApproval),
            Some(DvStatus::ForApproval),
        );
    }

    if let Some(approved) = stages.approval_in.date {
        b.emit(
            ActionType::ApprovalReturned,
            b.dated(approved, 20),
            Some(DvStatus::ForApproval),
            Some(DvStatus::ForIndexing),
        );
    }

    if stages.indexing.date.is_some() || position.is_at_or_past(DvStatus::ForPayment) {
        let at = b.dated_or(stages.indexing.date, 25);
        b.emit(
            ActionType::IndexingCompleted,
            at,
            Some(DvStatus::ForIndexing),
            Some(DvStatus::ForPayment),
        );
    }

    if let Some(method) = stages.payment_method {
        let at = b.dated_or(stages.payment.date, 30);
        let entry = b.emit(
            ActionType::PaymentMethodSet,
            at,
            Some(DvStatus::ForPayment),
            Some(method.next_status()),
        );
        put(entry, "payment_method", method.as_str());
        put(entry, "lddap_number", stages.lddap_number.clone());
    }

    if let Some(payroll_in) = stages.payroll_in.date {
        b.emit(
            ActionType::PayrollReturned,
            b.dated(payroll_in, 32),
            Some(DvStatus::OutToCashiering),
            Some(DvStatus::ForEngas),
        );
    }

    if let Some(number) = &stages.engas_number {
        let at = b.dated_or(stages.engas.date, 35);
        let entry = b.emit(
            ActionType::EngasRecorded,
            at,
            Some(DvStatus::ForEngas),
            Some(DvStatus::ForCdj),
        );
        put(entry, "engas_number", number.clone());
    }

    if let Some(cdj) = stages.cdj.date {
        b.emit(
            ActionType::CdjRecorded,
            b.dated(cdj, 40),
            Some(DvStatus::ForCdj),
            Some(DvStatus::ForLddap),
        );
    }

    if let Some(certified) = stages.lddap_certified.date {
        b.emit(
            ActionType::LddapCertified,
            b.dated(certified, 45),
            Some(DvStatus::ForLddap),
            Some(DvStatus::ForLddap),
        );
    }

    if let (DvStatus::Processed, Some(processed)) = (dv.status, stages.processed.date) {
        b.emit(
            ActionType::ProcessingCompleted,
            b.dated(processed, 45),
            Some(DvStatus::ForLddap),
            Some(DvStatus::Processed),
        );
    }

    b.cycles(CycleKind::Rts, &dv.rts_history);
    b.cycles(CycleKind::Norsa, &dv.norsa_history);

    if let Some(reallocation) = &dv.reallocation {
        let entry = b.emit(
            ActionType::CashReallocated,
            b.dated(reallocation.date, 50),
            Some(DvStatus::Processed),
            Some(DvStatus::ForCashAllocation),
        );
        put(entry, "reallocation_reason", reallocation.reason.clone());
    }

    let mut entries = b.entries;
    entries.sort_by_key(|e| e.timestamp);
    Reconstruction { entries }
}
