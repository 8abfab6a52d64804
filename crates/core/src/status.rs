use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DvStatus {
    ForReview,
    ForRtsIn,
    ForNorsaIn,
    ForCashAllocation,
    ForBoxC,
    ForApproval,
    ForIndexing,
    ForPayment,
    OutToCashiering,
    ForEngas,
    ForCdj,
    ForLddap,
    Processed,
}

impl DvStatus {
    pub const ALL: [DvStatus; 13] = [
        Self::ForReview,
        Self::ForRtsIn,
        Self::ForNorsaIn,
        Self::ForCashAllocation,
        Self::ForBoxC,
        Self::ForApproval,
        Self::ForIndexing,
        Self::ForPayment,
        Self::OutToCashiering,
        Self::ForEngas,
        Self::ForCdj,
        Self::ForLddap,
        Self::Processed,
    ];

    pub const INITIAL: DvStatus = Self::ForReview;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForReview => "for_review",
            Self::ForRtsIn => "for_rts_in",
            Self::ForNorsaIn => "for_norsa_in",
            Self::ForCashAllocation => "for_cash_allocation",
            Self::ForBoxC => "for_box_c",
            Self::ForApproval => "for_approval",
            Self::ForIndexing => "for_indexing",
            Self::ForPayment => "for_payment",
            Self::OutToCashiering => "out_to_cashiering",
            Self::ForEngas => "for_engas",
            Self::ForCdj => "for_cdj",
            Self::ForLddap => "for_lddap",
            Self::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }

    /// Edges of the forward path. Exception branches and the reallocation
    /// rewind are not part of this graph.
    pub fn forward_successors(&self) -> &'static [DvStatus] {
        match self {
            Self::ForReview => &[Self::ForCashAllocation],
            Self::ForCashAllocation => &[Self::ForBoxC],
            Self::ForBoxC => &[Self::ForApproval],
            Self::ForApproval => &[Self::ForIndexing],
            Self::ForIndexing => &[Self::ForPayment],
            Self::ForPayment => &[Self::ForEngas, Self::OutToCashiering],
            Self::OutToCashiering => &[Self::ForEngas],
            Self::ForEngas => &[Self::ForCdj],
            Self::ForCdj => &[Self::ForLddap],
            Self::ForLddap => &[Self::Processed],
            Self::ForRtsIn | Self::ForNorsaIn | Self::Processed => &[],
        }
    }

    /// True when `self` is reachable from `stage` along the forward graph
    /// (including `self == stage`).
    pub fn is_at_or_past(&self, stage: DvStatus) -> bool {
        let mut frontier = vec![stage];
        let mut seen = Vec::new();
        while let Some(current) = frontier.pop() {
            if current == *self {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            frontier.extend_from_slice(current.forward_successors());
        }
        false
    }
}

impl fmt::Display for DvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Macro-stage an RTS or NORSA cycle was launched from. The DV goes back to
/// this stage's status when the cycle is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOrigin {
    Review,
    BoxC,
}

impl CycleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::BoxC => "box_c",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "review" => Ok(Self::Review),
            "box_c" => Ok(Self::BoxC),
            _ => Err(CoreError::UnknownTag {
                kind: "cycle origin",
                value: s.to_string(),
            }),
        }
    }

    pub fn status(&self) -> DvStatus {
        match self {
            Self::Review => DvStatus::ForReview,
            Self::BoxC => DvStatus::ForBoxC,
        }
    }
}

impl fmt::Display for CycleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
