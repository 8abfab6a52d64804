use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Stable tag recorded on every history entry. Tags never change once
/// persisted; display text comes from [`ActionType::description`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "DV_RECEIVED")]
    DvReceived,
    #[serde(rename = "DV_UPDATED")]
    DvUpdated,
    #[serde(rename = "REVIEW_COMPLETED")]
    ReviewCompleted,
    #[serde(rename = "RTS_ISSUED")]
    RtsIssued,
    #[serde(rename = "RTS_RETURNED")]
    RtsReturned,
    #[serde(rename = "NORSA_ISSUED")]
    NorsaIssued,
    #[serde(rename = "NORSA_RETURNED")]
    NorsaReturned,
    #[serde(rename = "CASH_ALLOCATION")]
    CashAllocation,
    #[serde(rename = "BOX_C_CERTIFICATION")]
    BoxCCertification,
    #[serde(rename = "APPROVAL_SENT")]
    ApprovalSent,
    #[serde(rename = "APPROVAL_RETURNED")]
    ApprovalReturned,
    #[serde(rename = "INDEXING_COMPLETED")]
    IndexingCompleted,
    #[serde(rename = "PAYMENT_METHOD_SET")]
    PaymentMethodSet,
    #[serde(rename = "PAYROLL_RETURNED")]
    PayrollReturned,
    #[serde(rename = "E_NGAS_RECORDED")]
    EngasRecorded,
    #[serde(rename = "CDJ_RECORDED")]
    CdjRecorded,
    #[serde(rename = "LDDAP_CERTIFIED")]
    LddapCertified,
    #[serde(rename = "PROCESSING_COMPLETED")]
    ProcessingCompleted,
    #[serde(rename = "CASH_REALLOCATED")]
    CashReallocated,
}

impl ActionType {
    pub const ALL: [ActionType; 19] = [
        Self::DvReceived,
        Self::DvUpdated,
        Self::ReviewCompleted,
        Self::RtsIssued,
        Self::RtsReturned,
        Self::NorsaIssued,
        Self::NorsaReturned,
        Self::CashAllocation,
        Self::BoxCCertification,
        Self::ApprovalSent,
        Self::ApprovalReturned,
        Self::IndexingCompleted,
        Self::PaymentMethodSet,
        Self::PayrollReturned,
        Self::EngasRecorded,
        Self::CdjRecorded,
        Self::LddapCertified,
        Self::ProcessingCompleted,
        Self::CashReallocated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DvReceived => "DV_RECEIVED",
            Self::DvUpdated => "DV_UPDATED",
            Self::ReviewCompleted => "REVIEW_COMPLETED",
            Self::RtsIssued => "RTS_ISSUED",
            Self::RtsReturned => "RTS_RETURNED",
            Self::NorsaIssued => "NORSA_ISSUED",
            Self::NorsaReturned => "NORSA_RETURNED",
            Self::CashAllocation => "CASH_ALLOCATION",
            Self::BoxCCertification => "BOX_C_CERTIFICATION",
            Self::ApprovalSent => "APPROVAL_SENT",
            Self::ApprovalReturned => "APPROVAL_RETURNED",
            Self::IndexingCompleted => "INDEXING_COMPLETED",
            Self::PaymentMethodSet => "PAYMENT_METHOD_SET",
            Self::PayrollReturned => "PAYROLL_RETURNED",
            Self::EngasRecorded => "E_NGAS_RECORDED",
            Self::CdjRecorded => "CDJ_RECORDED",
            Self::LddapCertified => "LDDAP_CERTIFIED",
            Self::ProcessingCompleted => "PROCESSING_COMPLETED",
            Self::CashReallocated => "CASH_REALLOCATED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| CoreError::UnknownActionType(s.to_string()))
    }

    /// Display label shown in history views and exports.
    pub fn description(&self) -> &'static str {
        match self {
            Self::DvReceived => "DV Received",
            Self::DvUpdated => "DV Details Updated",
            Self::ReviewCompleted => "Review Completed",
            Self::RtsIssued => "Returned to Sender",
            Self::RtsReturned => "RTS Returned",
            Self::NorsaIssued => "NORSA Issued",
            Self::NorsaReturned => "NORSA Returned",
            Self::CashAllocation => "Cash Allocation",
            Self::BoxCCertification => "Box C Certification",
            Self::ApprovalSent => "Sent for Approval",
            Self::ApprovalReturned => "Returned from Approval",
            Self::IndexingCompleted => "Indexing Completed",
            Self::PaymentMethodSet => "Payment Method Set",
            Self::PayrollReturned => "Returned from Cashiering",
            Self::EngasRecorded => "E-NGAS Recorded",
            Self::CdjRecorded => "CDJ Recorded",
            Self::LddapCertified => "LDDAP Certified",
            Self::ProcessingCompleted => "Processing Completed",
            Self::CashReallocated => "Cash Reallocated",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
