use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS dvs (
    rowid INTEGER PRIMARY KEY,
    dv_id BLOB NOT NULL UNIQUE CHECK (length(dv_id) = 16),
    dv_number TEXT NOT NULL UNIQUE CHECK (length(dv_number) > 0),
    amount TEXT NOT NULL,
    payee TEXT NOT NULL,
    particulars TEXT NOT NULL,
    transaction_type TEXT NOT NULL,
    implementing_unit TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN (
        'for_review', 'for_rts_in', 'for_norsa_in', 'for_cash_allocation',
        'for_box_c', 'for_approval', 'for_indexing', 'for_payment',
        'out_to_cashiering', 'for_engas', 'for_cdj', 'for_lddap', 'processed'
    )),
    net_amount TEXT,
    processed_date TEXT,
    stages BLOB NOT NULL,
    rts_history BLOB NOT NULL,
    norsa_history BLOB NOT NULL,
    rts_cycle_count INTEGER NOT NULL DEFAULT 0 CHECK (rts_cycle_count >= 0),
    norsa_cycle_count INTEGER NOT NULL DEFAULT 0 CHECK (norsa_cycle_count >= 0),
    rts_origin TEXT CHECK (rts_origin IS NULL OR rts_origin IN ('review', 'box_c')),
    norsa_origin TEXT CHECK (norsa_origin IS NULL OR norsa_origin IN ('review', 'box_c')),
    is_reallocated INTEGER NOT NULL DEFAULT 0,
    reallocation_date TEXT,
    reallocation_reason TEXT,
    old_stages BLOB,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    version INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_dvs_status ON dvs (status);

CREATE TABLE IF NOT EXISTS ors_entries (
    rowid INTEGER PRIMARY KEY,
    ors_id BLOB NOT NULL UNIQUE CHECK (length(ors_id) = 16),
    dv_id BLOB NOT NULL REFERENCES dvs (dv_id) ON DELETE CASCADE,
    fund_source TEXT NOT NULL,
    uacs_code TEXT,
    ors_number TEXT,
    amount TEXT
);
CREATE INDEX IF NOT EXISTS idx_ors_dv ON ors_entries (dv_id);

CREATE TABLE IF NOT EXISTS history (
    rowid INTEGER PRIMARY KEY,
    entry_id BLOB NOT NULL UNIQUE CHECK (length(entry_id) = 16),
    dv_id BLOB NOT NULL REFERENCES dvs (dv_id),
    action_type TEXT NOT NULL CHECK (length(action_type) > 0),
    action_description TEXT NOT NULL,
    performed_by TEXT NOT NULL,
    action_data TEXT NOT NULL DEFAULT '{}',
    status_before TEXT,
    status_after TEXT,
    notes TEXT,
    occurred_at INTEGER NOT NULL,
    recorded_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_history_dv ON history (dv_id, occurred_at);
";
