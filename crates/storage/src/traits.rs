use dvtrack_core::{
    DisbursementVoucher, DvId, EntryId, HistoryEntry, NewHistoryEntry, OrsEntry,
};

use crate::error::StorageError;

/// One atomic write of a DV row together with its ledger entries.
#[derive(Debug, Clone, Copy)]
pub struct DvWrite<'a> {
    pub dv: &'a DisbursementVoucher,
    /// Version the caller read. The write is rejected if the row moved on.
    pub expected_version: u64,
    /// `Some` replaces every ORS line of the DV.
    pub ors_entries: Option<&'a [OrsEntry]>,
    pub entries: &'a [NewHistoryEntry],
}

pub trait Storage {
    /// Insert a new DV, its ORS lines and its opening ledger entries.
    fn insert_dv(
        &mut self,
        dv: &DisbursementVoucher,
        ors_entries: &[OrsEntry],
        entries: &[NewHistoryEntry],
    ) -> Result<Vec<EntryId>, StorageError>;

    /// Apply a version-checked DV update and append its ledger entries in one
    /// transaction. Nothing is persisted if any part fails.
    fn commit_dv(&mut self, write: DvWrite<'_>) -> Result<Vec<EntryId>, StorageError>;

    fn get_dv(&self, dv_id: DvId) -> Result<Option<DisbursementVoucher>, StorageError>;

    fn get_dv_by_number(&self, dv_number: &str)
        -> Result<Option<DisbursementVoucher>, StorageError>;

    /// Id and dv_number of every DV in intake order. Reads only the key
    /// columns, so it succeeds even when a row's payload no longer decodes.
    fn list_dv_keys(&self) -> Result<Vec<(DvId, String)>, StorageError>;

    fn get_ors_entries(&self, dv_id: DvId) -> Result<Vec<OrsEntry>, StorageError>;

    /// Append a single ledger entry. Rejected when the DV does not exist.
    fn append_history(&mut self, entry: &NewHistoryEntry) -> Result<EntryId, StorageError>;

    /// Ledger entries for a DV ordered by timestamp, ties in append order.
    fn history_for(&self, dv_id: DvId) -> Result<Vec<HistoryEntry>, StorageError>;

    fn history_count(&self, dv_id: DvId) -> Result<u64, StorageError>;

    /// Delete every ledger entry of a DV and append `entries` in their place,
    /// in one transaction.
    fn replace_history(
        &mut self,
        dv_id: DvId,
        entries: &[NewHistoryEntry],
    ) -> Result<Vec<EntryId>, StorageError>;
}
