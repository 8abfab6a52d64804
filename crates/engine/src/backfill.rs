use tracing::{info, warn};

use dvtrack_core::DvId;
use dvtrack_storage::Storage;

use crate::error::EngineError;
use crate::reconstruct::reconstruct;
use crate::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillMode {
    /// Leave DVs that already have ledger entries untouched.
    SkipExisting,
    /// Replace every DV's ledger with a fresh reconstruction.
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    Migrated { entries: usize, fingerprint: String },
    Skipped { existing: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillFailure {
    pub dv_number: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub migrated: usize,
    pub skipped: usize,
    pub entries_written: usize,
    pub failures: Vec<BackfillFailure>,
}

impl BackfillReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Engine {
    /// Reconstruct and persist the ledger of one DV.
    pub fn backfill_dv(
        &mut self,
        dv_id: DvId,
        mode: BackfillMode,
    ) -> Result<BackfillOutcome, EngineError> {
        let dv = self.load_dv(dv_id)?;
        let existing = self.storage().history_count(dv_id)?;
        if existing > 0 && mode == BackfillMode::SkipExisting {
            return Ok(BackfillOutcome::Skipped { existing });
        }

        let reconstruction = reconstruct(&dv, &self.config().migration_actor);
        let fingerprint = reconstruction.fingerprint()?;
        let written = self
            .storage_mut()
            .replace_history(dv_id, &reconstruction.entries)?;
        Ok(BackfillOutcome::Migrated {
            entries: written.len(),
            fingerprint,
        })
    }

    /// Backfill every DV. A failure on one DV is logged and reported without
    /// stopping the rest of the batch.
    pub fn backfill_history(&mut self, mode: BackfillMode) -> Result<BackfillReport, EngineError> {
        let mut report = BackfillReport::default();

        for (dv_id, dv_number) in self.storage().list_dv_keys()? {
            match self.backfill_dv(dv_id, mode) {
                Ok(BackfillOutcome::Migrated { entries, .. }) => {
                    report.migrated += 1;
                    report.entries_written += entries;
                }
                Ok(BackfillOutcome::Skipped { .. }) => report.skipped += 1,
                Err(e) => {
                    warn!(dv_number = %dv_number, error = %e, "history backfill failed");
                    report.failures.push(BackfillFailure {
                        dv_number,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            ?mode,
            migrated = report.migrated,
            skipped = report.skipped,
            entries = report.entries_written,
            failed = report.failures.len(),
            "history backfill finished"
        );
        Ok(report)
    }
}
