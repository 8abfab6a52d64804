use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use rust_decimal::Decimal;

use dvtrack_core::{
    ActionData, ActionType, CycleOrigin, DisbursementVoucher, DvId, DvStatus, EntryId,
    HistoryEntry, NewHistoryEntry, OrsEntry, OrsId, Reallocation, StageFields,
    cycles_from_msgpack, cycles_to_msgpack,
};

use crate::error::StorageError;
use crate::traits::{DvWrite, Storage};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn parse_decimal(s: &str, label: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(s).map_err(|e| StorageError::Serialization(format!("{label}: {e}")))
}

fn parse_date(s: &str, label: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StorageError::Serialization(format!("{label}: {e}")))
}

fn from_millis(ms: i64, label: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Serialization(format!("{label} out of range: {ms}")))
}

fn is_constraint_violation(e: &rusqlite::Error, needle: &str) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, msg) => {
            err.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.as_deref().is_some_and(|m| m.contains(needle))
        }
        _ => false,
    }
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

const DV_COLUMNS: &str = "dv_id, dv_number, amount, payee, particulars, transaction_type, implementing_unit, status, stages, rts_history, norsa_history, rts_cycle_count, norsa_cycle_count, rts_origin, norsa_origin, is_reallocated, reallocation_date, reallocation_reason, old_stages, created_at, updated_at, version";

/// Raw column values of a `dvs` row, decoded outside the rusqlite closure.
struct DvRow {
    dv_id: Vec<u8>,
    dv_number: String,
    amount: String,
    payee: String,
    particulars: String,
    transaction_type: String,
    implementing_unit: String,
    status: String,
    stages: Vec<u8>,
    rts_history: Vec<u8>,
    norsa_history: Vec<u8>,
    rts_cycle_count: i64,
    norsa_cycle_count: i64,
    rts_origin: Option<String>,
    norsa_origin: Option<String>,
    is_reallocated: bool,
    reallocation_date: Option<String>,
    reallocation_reason: Option<String>,
    old_stages: Option<Vec<u8>>,
    created_at: i64,
    updated_at: i64,
    version: i64,
}

impl DvRow {
    fn read(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            dv_id: row.get(0)?,
            dv_number: row.get(1)?,
            amount: row.get(2)?,
            payee: row.get(3)?,
            particulars: row.get(4)?,
            transaction_type: row.get(5)?,
            implementing_unit: row.get(6)?,
            status: row.get(7)?,
            stages: row.get(8)?,
            rts_history: row.get(9)?,
            norsa_history: row.get(10)?,
            rts_cycle_count: row.get(11)?,
            norsa_cycle_count: row.get(12)?,
            rts_origin: row.get(13)?,
            norsa_origin: row.get(14)?,
            is_reallocated: row.get(15)?,
            reallocation_date: row.get(16)?,
            reallocation_reason: row.get(17)?,
            old_stages: row.get(18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
            version: row.get(21)?,
        })
    }

    fn into_voucher(self) -> Result<DisbursementVoucher, StorageError> {
        let reallocation = match self.reallocation_date {
            Some(date) => Some(Reallocation {
                date: parse_date(&date, "reallocation_date")?,
                reason: self.reallocation_reason.unwrap_or_default(),
            }),
            None => None,
        };
        Ok(DisbursementVoucher {
            dv_id: DvId::from_bytes(to_array::<16>(self.dv_id, "dv_id")?),
            dv_number: self.dv_number,
            amount: parse_decimal(&self.amount, "amount")?,
            payee: self.payee,
            particulars: self.particulars,
            transaction_type: self.transaction_type,
            implementing_unit: self.implementing_unit,
            status: DvStatus::parse(&self.status)?,
            stages: StageFields::from_msgpack(&self.stages)?,
            rts_history: cycles_from_msgpack(&self.rts_history)?,
            norsa_history: cycles_from_msgpack(&self.norsa_history)?,
            rts_cycle_count: self.rts_cycle_count as u32,
            norsa_cycle_count: self.norsa_cycle_count as u32,
            rts_origin: self.rts_origin.as_deref().map(CycleOrigin::parse).transpose()?,
            norsa_origin: self.norsa_origin.as_deref().map(CycleOrigin::parse).transpose()?,
            is_reallocated: self.is_reallocated,
            reallocation,
            old_stages: self
                .old_stages
                .as_deref()
                .map(StageFields::from_msgpack)
                .transpose()?,
            created_at: from_millis(self.created_at, "created_at")?,
            updated_at: from_millis(self.updated_at, "updated_at")?,
            version: self.version as u64,
        })
    }
}

/// Encoded blob and denormalized columns shared by insert and update.
struct DvColumns {
    stages: Vec<u8>,
    rts_history: Vec<u8>,
    norsa_history: Vec<u8>,
    old_stages: Option<Vec<u8>>,
    net_amount: Option<String>,
    processed_date: Option<String>,
    reallocation_date: Option<String>,
    reallocation_reason: Option<String>,
}

impl DvColumns {
    fn encode(dv: &DisbursementVoucher) -> Result<Self, StorageError> {
        Ok(Self {
            stages: dv.stages.to_msgpack()?,
            rts_history: cycles_to_msgpack(&dv.rts_history)?,
            norsa_history: cycles_to_msgpack(&dv.norsa_history)?,
            old_stages: dv.old_stages.as_ref().map(StageFields::to_msgpack).transpose()?,
            net_amount: dv.net_amount().map(|d| d.to_string()),
            processed_date: dv.processed_date().map(|d| d.to_string()),
            reallocation_date: dv.reallocation.as_ref().map(|r| r.date.to_string()),
            reallocation_reason: dv.reallocation.as_ref().map(|r| r.reason.clone()),
        })
    }
}

struct HistoryRow {
    entry_id: Vec<u8>,
    dv_id: Vec<u8>,
    action_type: String,
    action_description: String,
    performed_by: String,
    action_data: String,
    status_before: Option<String>,
    status_after: Option<String>,
    notes: Option<String>,
    occurred_at: i64,
}

impl HistoryRow {
    fn into_entry(self) -> Result<HistoryEntry, StorageError> {
        let action_data: ActionData = serde_json::from_str(&self.action_data)
            .map_err(|e| StorageError::Serialization(format!("action_data: {e}")))?;
        Ok(HistoryEntry {
            entry_id: EntryId::from_bytes(to_array::<16>(self.entry_id, "entry_id")?),
            dv_id: DvId::from_bytes(to_array::<16>(self.dv_id, "dv_id")?),
            action_type: ActionType::parse(&self.action_type)?,
            action_description: self.action_description,
            performed_by: self.performed_by,
            action_data,
            status_before: self.status_before.as_deref().map(DvStatus::parse).transpose()?,
            status_after: self.status_after.as_deref().map(DvStatus::parse).transpose()?,
            notes: self.notes,
            timestamp: from_millis(self.occurred_at, "occurred_at")?,
        })
    }
}

fn insert_entry(tx: &Transaction, entry: &NewHistoryEntry) -> Result<EntryId, StorageError> {
    let entry_id = EntryId::new();
    let action_data = serde_json::to_string(&entry.action_data)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    tx.execute(
        "INSERT INTO history (entry_id, dv_id, action_type, action_description, performed_by, action_data, status_before, status_after, notes, occurred_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            entry_id.as_bytes().as_slice(),
            entry.dv_id.as_bytes().as_slice(),
            entry.action_type.as_str(),
            entry.action_type.description(),
            entry.performed_by,
            action_data,
            entry.status_before.map(|s| s.as_str()),
            entry.status_after.map(|s| s.as_str()),
            entry.notes,
            entry.timestamp.timestamp_millis(),
        ],
    )?;
    Ok(entry_id)
}

/// Insert a batch of entries inside an open DV write. Any failure is reported
/// as a history write failure so the caller can tell it apart from the row
/// update.
fn insert_entries(
    tx: &Transaction,
    entries: &[NewHistoryEntry],
) -> Result<Vec<EntryId>, StorageError> {
    entries
        .iter()
        .map(|entry| {
            insert_entry(tx, entry).map_err(|e| {
                let detail = format!("{} for {}: {e}", entry.action_type, entry.dv_id);
                StorageError::HistoryWrite(detail)
            })
        })
        .collect()
}

fn replace_ors_entries(
    tx: &Transaction,
    dv_id: DvId,
    ors_entries: &[OrsEntry],
) -> Result<(), StorageError> {
    tx.execute(
        "DELETE FROM ors_entries WHERE dv_id = ?1",
        rusqlite::params![dv_id.as_bytes().as_slice()],
    )?;
    for ors in ors_entries {
        tx.execute(
            "INSERT INTO ors_entries (ors_id, dv_id, fund_source, uacs_code, ors_number, amount) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                ors.ors_id.as_bytes().as_slice(),
                dv_id.as_bytes().as_slice(),
                ors.fund_source,
                ors.uacs_code,
                ors.ors_number,
                ors.amount.map(|a| a.to_string()),
            ],
        )?;
    }
    Ok(())
}

impl SqliteStorage {
    fn query_dv(
        &self,
        clause: &str,
        param: &dyn rusqlite::ToSql,
    ) -> Result<Option<DisbursementVoucher>, StorageError> {
        let sql = format!("SELECT {DV_COLUMNS} FROM dvs WHERE {clause}");
        let row = self
            .conn
            .query_row(&sql, [param], DvRow::read)
            .optional()?;
        row.map(DvRow::into_voucher).transpose()
    }
}

impl Storage for SqliteStorage {
    fn insert_dv(
        &mut self,
        dv: &DisbursementVoucher,
        ors_entries: &[OrsEntry],
        entries: &[NewHistoryEntry],
    ) -> Result<Vec<EntryId>, StorageError> {
        let cols = DvColumns::encode(dv)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = tx.execute(
            "INSERT INTO dvs (dv_id, dv_number, amount, payee, particulars, transaction_type, implementing_unit, status, net_amount, processed_date, stages, rts_history, norsa_history, rts_cycle_count, norsa_cycle_count, rts_origin, norsa_origin, is_reallocated, reallocation_date, reallocation_reason, old_stages, created_at, updated_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, 0)",
            rusqlite::params![
                dv.dv_id.as_bytes().as_slice(),
                dv.dv_number,
                dv.amount.to_string(),
                dv.payee,
                dv.particulars,
                dv.transaction_type,
                dv.implementing_unit,
                dv.status.as_str(),
                cols.net_amount,
                cols.processed_date,
                cols.stages,
                cols.rts_history,
                cols.norsa_history,
                dv.rts_cycle_count as i64,
                dv.norsa_cycle_count as i64,
                dv.rts_origin.map(|o| o.as_str()),
                dv.norsa_origin.map(|o| o.as_str()),
                dv.is_reallocated,
                cols.reallocation_date,
                cols.reallocation_reason,
                cols.old_stages,
                dv.created_at.timestamp_millis(),
                dv.updated_at.timestamp_millis(),
            ],
        );
        match result {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e, "dvs.dv_number") => {
                return Err(StorageError::DuplicateDvNumber(dv.dv_number.clone()));
            }
            Err(e) => return Err(StorageError::Sqlite(e)),
        }

        replace_ors_entries(&tx, dv.dv_id, ors_entries)?;
        let ids = insert_entries(&tx, entries)?;

        tx.commit()?;
        Ok(ids)
    }

    fn commit_dv(&mut self, write: DvWrite<'_>) -> Result<Vec<EntryId>, StorageError> {
        let dv = write.dv;
        let cols = DvColumns::encode(dv)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = tx.execute(
            "UPDATE dvs SET dv_number = ?1, amount = ?2, payee = ?3, particulars = ?4, transaction_type = ?5, implementing_unit = ?6, status = ?7, net_amount = ?8, processed_date = ?9, stages = ?10, rts_history = ?11, norsa_history = ?12, rts_cycle_count = ?13, norsa_cycle_count = ?14, rts_origin = ?15, norsa_origin = ?16, is_reallocated = ?17, reallocation_date = ?18, reallocation_reason = ?19, old_stages = ?20, updated_at = ?21, version = version + 1
             WHERE dv_id = ?22 AND version = ?23",
            rusqlite::params![
                dv.dv_number,
                dv.amount.to_string(),
                dv.payee,
                dv.particulars,
                dv.transaction_type,
                dv.implementing_unit,
                dv.status.as_str(),
                cols.net_amount,
                cols.processed_date,
                cols.stages,
                cols.rts_history,
                cols.norsa_history,
                dv.rts_cycle_count as i64,
                dv.norsa_cycle_count as i64,
                dv.rts_origin.map(|o| o.as_str()),
                dv.norsa_origin.map(|o| o.as_str()),
                dv.is_reallocated,
                cols.reallocation_date,
                cols.reallocation_reason,
                cols.old_stages,
                dv.updated_at.timestamp_millis(),
                dv.dv_id.as_bytes().as_slice(),
                write.expected_version as i64,
            ],
        );
        let updated = match result {
            Ok(n) => n,
            Err(e) if is_constraint_violation(&e, "dvs.dv_number") => {
                return Err(StorageError::DuplicateDvNumber(dv.dv_number.clone()));
            }
            Err(e) => return Err(StorageError::Sqlite(e)),
        };

        if updated == 0 {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM dvs WHERE dv_id = ?1)",
                rusqlite::params![dv.dv_id.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            return Err(if exists {
                StorageError::VersionConflict {
                    dv_id: dv.dv_id.to_string(),
                    expected: write.expected_version,
                }
            } else {
                StorageError::DvNotFound(dv.dv_id.to_string())
            });
        }

        if let Some(ors_entries) = write.ors_entries {
            replace_ors_entries(&tx, dv.dv_id, ors_entries)?;
        }
        let ids = insert_entries(&tx, write.entries)?;

        tx.commit()?;
        Ok(ids)
    }

    fn get_dv(&self, dv_id: DvId) -> Result<Option<DisbursementVoucher>, StorageError> {
        let key = dv_id.as_bytes().to_vec();
        self.query_dv("dv_id = ?1", &key)
    }

    fn get_dv_by_number(
        &self,
        dv_number: &str,
    ) -> Result<Option<DisbursementVoucher>, StorageError> {
        self.query_dv("dv_number = ?1", &dv_number.trim())
    }

    fn list_dv_keys(&self) -> Result<Vec<(DvId, String)>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT dv_id, dv_number FROM dvs ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (dv_id, dv_number) = row?;
            result.push((DvId::from_bytes(to_array::<16>(dv_id, "dv_id")?), dv_number));
        }
        Ok(result)
    }

    fn get_ors_entries(&self, dv_id: DvId) -> Result<Vec<OrsEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT ors_id, fund_source, uacs_code, ors_number, amount FROM ors_entries WHERE dv_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(rusqlite::params![dv_id.as_bytes().as_slice()], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (ors_id, fund_source, uacs_code, ors_number, amount) = row?;
            result.push(OrsEntry {
                ors_id: OrsId::from_bytes(to_array::<16>(ors_id, "ors_id")?),
                fund_source,
                uacs_code,
                ors_number,
                amount: amount
                    .as_deref()
                    .map(|a| parse_decimal(a, "ors amount"))
                    .transpose()?,
            });
        }
        Ok(result)
    }

    fn append_history(&mut self, entry: &NewHistoryEntry) -> Result<EntryId, StorageError> {
        let tx = self.conn.transaction()?;
        let entry_id = match insert_entry(&tx, entry) {
            Ok(id) => id,
            Err(StorageError::Sqlite(e)) if is_constraint_violation(&e, "FOREIGN KEY") => {
                return Err(StorageError::DvNotFound(entry.dv_id.to_string()));
            }
            Err(e) => return Err(e),
        };
        tx.commit()?;
        Ok(entry_id)
    }

    fn history_for(&self, dv_id: DvId) -> Result<Vec<HistoryEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, dv_id, action_type, action_description, performed_by, action_data, status_before, status_after, notes, occurred_at
             FROM history WHERE dv_id = ?1 ORDER BY occurred_at, rowid",
        )?;
        let rows = stmt.query_map(rusqlite::params![dv_id.as_bytes().as_slice()], |row| {
            Ok(HistoryRow {
                entry_id: row.get(0)?,
                dv_id: row.get(1)?,
                action_type: row.get(2)?,
                action_description: row.get(3)?,
                performed_by: row.get(4)?,
                action_data: row.get(5)?,
                status_before: row.get(6)?,
                status_after: row.get(7)?,
                notes: row.get(8)?,
                occurred_at: row.get(9)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_entry()?);
        }
        Ok(result)
    }

    fn history_count(&self, dv_id: DvId) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM history WHERE dv_id = ?1",
            rusqlite::params![dv_id.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn replace_history(
        &mut self,
        dv_id: DvId,
        entries: &[NewHistoryEntry],
    ) -> Result<Vec<EntryId>, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM dvs WHERE dv_id = ?1)",
            rusqlite::params![dv_id.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StorageError::DvNotFound(dv_id.to_string()));
        }

        tx.execute(
            "DELETE FROM history WHERE dv_id = ?1",
            rusqlite::params![dv_id.as_bytes().as_slice()],
        )?;
        let ids = insert_entries(&tx, entries)?;

        tx.commit()?;
        Ok(ids)
    }
}
