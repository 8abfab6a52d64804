use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::ids::{DvId, OrsId};
use crate::status::{CycleOrigin, DvStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Check,
    Lddap,
    Payroll,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Lddap => "lddap",
            Self::Payroll => "payroll",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "check" => Ok(Self::Check),
            "lddap" => Ok(Self::Lddap),
            "payroll" => Ok(Self::Payroll),
            _ => Err(CoreError::UnknownTag {
                kind: "payment method",
                value: s.to_string(),
            }),
        }
    }

    /// Status the DV moves to once this method is chosen.
    pub fn next_status(&self) -> DvStatus {
        match self {
            Self::Check | Self::Lddap => DvStatus::ForEngas,
            Self::Payroll => DvStatus::OutToCashiering,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Date, actor and note recorded when a stage is completed. Legacy rows may
/// carry any subset of the three.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMark {
    pub date: Option<NaiveDate>,
    pub actor: Option<String>,
    pub note: Option<String>,
}

impl StageMark {
    pub fn new(date: NaiveDate, actor: Option<String>, note: Option<String>) -> Self {
        Self {
            date: Some(date),
            actor,
            note,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.actor.is_none() && self.note.is_none()
    }
}

/// Per-stage data written as a DV moves forward. This is the unit archived
/// on reallocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFields {
    pub cash_allocation: StageMark,
    pub cash_allocation_number: Option<String>,
    pub net_amount: Option<Decimal>,
    pub box_c: StageMark,
    pub approval_out: StageMark,
    pub approval_in: StageMark,
    pub indexing: StageMark,
    pub payment_method: Option<PaymentMethod>,
    pub payment: StageMark,
    pub lddap_number: Option<String>,
    pub payroll_in: StageMark,
    pub engas: StageMark,
    pub engas_number: Option<String>,
    pub cdj: StageMark,
    pub lddap_certified: StageMark,
    pub processed: StageMark,
}

/// Names one [`StageMark`] within [`StageFields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageSlot {
    CashAllocation,
    BoxC,
    ApprovalOut,
    ApprovalIn,
    Indexing,
    Payment,
    PayrollIn,
    Engas,
    Cdj,
    LddapCertified,
    Processed,
}

impl StageFields {
    pub fn mark(&self, slot: StageSlot) -> &StageMark {
        match slot {
            StageSlot::CashAllocation => &self.cash_allocation,
            StageSlot::BoxC => &self.box_c,
            StageSlot::ApprovalOut => &self.approval_out,
            StageSlot::ApprovalIn => &self.approval_in,
            StageSlot::Indexing => &self.indexing,
            StageSlot::Payment => &self.payment,
            StageSlot::PayrollIn => &self.payroll_in,
            StageSlot::Engas => &self.engas,
            StageSlot::Cdj => &self.cdj,
            StageSlot::LddapCertified => &self.lddap_certified,
            StageSlot::Processed => &self.processed,
        }
    }

    pub fn mark_mut(&mut self, slot: StageSlot) -> &mut StageMark {
        match slot {
            StageSlot::CashAllocation => &mut self.cash_allocation,
            StageSlot::BoxC => &mut self.box_c,
            StageSlot::ApprovalOut => &mut self.approval_out,
            StageSlot::ApprovalIn => &mut self.approval_in,
            StageSlot::Indexing => &mut self.indexing,
            StageSlot::Payment => &mut self.payment,
            StageSlot::PayrollIn => &mut self.payroll_in,
            StageSlot::Engas => &mut self.engas,
            StageSlot::Cdj => &mut self.cdj,
            StageSlot::LddapCertified => &mut self.lddap_certified,
            StageSlot::Processed => &mut self.processed,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// One RTS or NORSA cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub date: NaiveDate,
    /// Reason for RTS cycles, notice number for NORSA cycles.
    pub detail: String,
    pub returned_date: Option<NaiveDate>,
    pub origin: CycleOrigin,
}

impl CycleRecord {
    pub fn is_open(&self) -> bool {
        self.returned_date.is_none()
    }
}

pub fn cycles_to_msgpack(cycles: &[CycleRecord]) -> Result<Vec<u8>, CoreError> {
    rmp_serde::to_vec(cycles).map_err(|e| CoreError::Serialization(e.to_string()))
}

pub fn cycles_from_msgpack(bytes: &[u8]) -> Result<Vec<CycleRecord>, CoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Rts,
    Norsa,
}

impl CycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rts => "RTS",
            Self::Norsa => "NORSA",
        }
    }

    pub fn status(&self) -> DvStatus {
        match self {
            Self::Rts => DvStatus::ForRtsIn,
            Self::Norsa => DvStatus::ForNorsaIn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reallocation {
    pub date: NaiveDate,
    pub reason: String,
}

/// Funding-source line attached to a DV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrsEntry {
    pub ors_id: OrsId,
    pub fund_source: String,
    pub uacs_code: Option<String>,
    pub ors_number: Option<String>,
    pub amount: Option<Decimal>,
}

impl OrsEntry {
    pub fn new(fund_source: &str) -> Self {
        Self {
            ors_id: OrsId::new(),
            fund_source: fund_source.to_string(),
            uacs_code: None,
            ors_number: None,
            amount: None,
        }
    }
}

/// Intake fields for a new DV.
#[derive(Debug, Clone, Default)]
pub struct DvDraft {
    pub dv_number: String,
    pub amount: Decimal,
    pub payee: String,
    pub particulars: String,
    pub transaction_type: String,
    pub implementing_unit: String,
    pub ors_entries: Vec<OrsEntry>,
}

/// Edit of the non-workflow fields. `None` leaves a field untouched;
/// `Some` for `ors_entries` replaces every line.
#[derive(Debug, Clone, Default)]
pub struct DvPatch {
    pub dv_number: Option<String>,
    pub amount: Option<Decimal>,
    pub payee: Option<String>,
    pub particulars: Option<String>,
    pub transaction_type: Option<String>,
    pub implementing_unit: Option<String>,
    pub ors_entries: Option<Vec<OrsEntry>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisbursementVoucher {
    pub dv_id: DvId,
    pub dv_number: String,
    pub amount: Decimal,
    pub payee: String,
    pub particulars: String,
    pub transaction_type: String,
    pub implementing_unit: String,
    pub status: DvStatus,
    pub stages: StageFields,
    pub rts_history: Vec<CycleRecord>,
    pub norsa_history: Vec<CycleRecord>,
    pub rts_cycle_count: u32,
    pub norsa_cycle_count: u32,
    pub rts_origin: Option<CycleOrigin>,
    pub norsa_origin: Option<CycleOrigin>,
    pub is_reallocated: bool,
    pub reallocation: Option<Reallocation>,
    /// Stage data as it stood before the most recent reallocation.
    pub old_stages: Option<StageFields>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by storage on every write.
    pub version: u64,
}

impl DisbursementVoucher {
    pub fn from_draft(draft: &DvDraft, now: DateTime<Utc>) -> Self {
        Self {
            dv_id: DvId::new(),
            dv_number: draft.dv_number.trim().to_string(),
            amount: draft.amount,
            payee: draft.payee.clone(),
            particulars: draft.particulars.clone(),
            transaction_type: draft.transaction_type.clone(),
            implementing_unit: draft.implementing_unit.clone(),
            status: DvStatus::INITIAL,
            stages: StageFields::default(),
            rts_history: Vec::new(),
            norsa_history: Vec::new(),
            rts_cycle_count: 0,
            norsa_cycle_count: 0,
            rts_origin: None,
            norsa_origin: None,
            is_reallocated: false,
            reallocation: None,
            old_stages: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn net_amount(&self) -> Option<Decimal> {
        self.stages.net_amount
    }

    pub fn processed_date(&self) -> Option<NaiveDate> {
        self.stages.processed.date
    }

    pub fn history_of(&self, kind: CycleKind) -> &[CycleRecord] {
        match kind {
            CycleKind::Rts => &self.rts_history,
            CycleKind::Norsa => &self.norsa_history,
        }
    }

    pub fn open_cycle(&self, kind: CycleKind) -> Option<&CycleRecord> {
        self.history_of(kind).iter().find(|c| c.is_open())
    }

    pub fn has_open_cycle(&self) -> bool {
        self.open_cycle(CycleKind::Rts).is_some() || self.open_cycle(CycleKind::Norsa).is_some()
    }

    /// Forward-path status the DV effectively sits at. Exception states
    /// resolve to the status of the stage the cycle was launched from.
    pub fn workflow_position(&self) -> DvStatus {
        match self.status {
            DvStatus::ForRtsIn => self.rts_origin.map_or(DvStatus::ForReview, |o| o.status()),
            DvStatus::ForNorsaIn => self.norsa_origin.map_or(DvStatus::ForReview, |o| o.status()),
            other => other,
        }
    }

    pub fn check_invariants(&self) -> Result<(), CoreError> {
        let violated = |detail: String| CoreError::InvariantViolated {
            dv_number: self.dv_number.clone(),
            detail,
        };

        if self.rts_cycle_count as usize != self.rts_history.len() {
            return Err(violated(format!(
                "rts_cycle_count {} does not match {} RTS records",
                self.rts_cycle_count,
                self.rts_history.len()
            )));
        }
        if self.norsa_cycle_count as usize != self.norsa_history.len() {
            return Err(violated(format!(
                "norsa_cycle_count {} does not match {} NORSA records",
                self.norsa_cycle_count,
                self.norsa_history.len()
            )));
        }

        let open_rts = self.rts_history.iter().filter(|c| c.is_open()).count();
        let open_norsa = self.norsa_history.iter().filter(|c| c.is_open()).count();
        if open_rts + open_norsa > 1 {
            return Err(violated(format!(
                "{open_rts} open RTS and {open_norsa} open NORSA cycles"
            )));
        }
        if (self.status == DvStatus::ForRtsIn) != (open_rts == 1) {
            return Err(violated("RTS status and open RTS cycle disagree".into()));
        }
        if (self.status == DvStatus::ForNorsaIn) != (open_norsa == 1) {
            return Err(violated("NORSA status and open NORSA cycle disagree".into()));
        }

        if self.processed_date().is_some() != (self.status == DvStatus::Processed) {
            return Err(violated("processed_date must be set exactly when processed".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn voucher() -> DisbursementVoucher {
        let draft = DvDraft {
            dv_number: " 2025-01-0001 ".into(),
            amount: Decimal::from(50_000),
            payee: "Juan Dela Cruz".into(),
            ..Default::default()
        };
        DisbursementVoucher::from_draft(&draft, Utc::now())
    }

    #[test]
    fn draft_starts_in_review() {
        let dv = voucher();
        assert_eq!(dv.status, DvStatus::ForReview);
        assert_eq!(dv.dv_number, "2025-01-0001");
        assert!(dv.stages.is_empty());
        dv.check_invariants().unwrap();
    }

    #[test]
    fn cycle_count_mismatch_is_reported() {
        let mut dv = voucher();
        dv.rts_history.push(CycleRecord {
            date: date(2025, 3, 1),
            detail: "missing docs".into(),
            returned_date: Some(date(2025, 3, 4)),
            origin: CycleOrigin::Review,
        });
        assert!(dv.check_invariants().is_err());
        dv.rts_cycle_count = 1;
        dv.check_invariants().unwrap();
    }

    #[test]
    fn open_cycle_requires_matching_status() {
        let mut dv = voucher();
        dv.norsa_history.push(CycleRecord {
            date: date(2025, 3, 1),
            detail: "2025-03-00012".into(),
            returned_date: None,
            origin: CycleOrigin::BoxC,
        });
        dv.norsa_cycle_count = 1;
        assert!(dv.check_invariants().is_err());

        dv.status = DvStatus::ForNorsaIn;
        dv.norsa_origin = Some(CycleOrigin::BoxC);
        dv.check_invariants().unwrap();
        assert_eq!(dv.workflow_position(), DvStatus::ForBoxC);
    }

    #[test]
    fn stage_fields_survive_msgpack() {
        let mut stages = StageFields::default();
        stages.cash_allocation = StageMark::new(date(2025, 2, 3), Some("Ana".into()), None);
        stages.net_amount = Some(Decimal::new(4_800_050, 2));
        stages.payment_method = Some(PaymentMethod::Lddap);
        let bytes = stages.to_msgpack().unwrap();
        assert_eq!(StageFields::from_msgpack(&bytes).unwrap(), stages);
    }
}
