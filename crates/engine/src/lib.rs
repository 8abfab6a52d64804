pub mod actor;
pub mod audit;
pub mod backfill;
pub mod clock;
pub mod config;
pub mod error;
pub mod reconstruct;
pub mod view;
pub mod workflow;

pub use audit::HistoryViolation;
pub use backfill::{BackfillFailure, BackfillMode, BackfillOutcome, BackfillReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::WorkflowConfig;
pub use error::EngineError;
pub use reconstruct::{Reconstruction, reconstruct};
pub use view::{DvView, FormattedEntry, HistorySource};
pub use workflow::{
    Action, CashAllocationInput, CycleInput, EngasInput, PaymentMethodInput, ReallocationInput,
    ReturnInput, StageInput,
};

use rust_decimal::Decimal;
use tracing::{debug, error, info};

use dvtrack_core::{
    ActionData, ActionType, DisbursementVoucher, DvDraft, DvId, DvPatch, EntryId, HistoryEntry,
    NewHistoryEntry, OrsEntry,
};
use dvtrack_storage::{DvWrite, SqliteStorage, Storage};

use crate::actor::resolve_performed_by;
use crate::workflow::TransitionContext;

/// Post-write DV snapshot and the ids of the ledger entries written with it.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub dv: DisbursementVoucher,
    pub entry_ids: Vec<EntryId>,
}

pub struct Engine {
    storage: SqliteStorage,
    config: WorkflowConfig,
    clock: Box<dyn Clock>,
}

impl Engine {
    pub fn new(storage: SqliteStorage) -> Self {
        Self::with_config(storage, WorkflowConfig::default(), SystemClock)
    }

    pub fn with_config(
        storage: SqliteStorage,
        config: WorkflowConfig,
        clock: impl Clock + 'static,
    ) -> Self {
        Self {
            storage,
            config,
            clock: Box::new(clock),
        }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Register a new DV in `for_review` and record its receipt.
    pub fn create_dv(
        &mut self,
        draft: &DvDraft,
        actor: Option<&str>,
    ) -> Result<TransitionOutcome, EngineError> {
        if draft.dv_number.trim().is_empty() {
            return Err(EngineError::validation("dv_number", "is required"));
        }
        if draft.amount <= Decimal::ZERO {
            return Err(EngineError::validation("amount", "must be greater than zero"));
        }

        let dv = DisbursementVoucher::from_draft(draft, self.clock.now());
        let performed_by = resolve_performed_by(
            ActionType::DvReceived,
            None,
            &dv.stages,
            actor,
            &self.config.system_actor,
        );
        let received =
            NewHistoryEntry::new(dv.dv_id, ActionType::DvReceived, &performed_by, dv.created_at)
            .with_statuses(None, Some(dv.status))
            .with_data("dv_number", dv.dv_number.as_str())
            .with_data("amount", dv.amount.to_string())
            .with_data("payee", dv.payee.as_str());

        let entry_ids = self.storage.insert_dv(&dv, &draft.ors_entries, &[received])?;
        info!(dv_number = %dv.dv_number, dv_id = %dv.dv_id, "DV received");
        Ok(TransitionOutcome { dv, entry_ids })
    }

    /// Edit the non-workflow fields of a DV. A patch that changes nothing
    /// writes nothing.
    pub fn update_dv(
        &mut self,
        dv_id: DvId,
        patch: &DvPatch,
        actor: Option<&str>,
    ) -> Result<TransitionOutcome, EngineError> {
        let current = self.load_dv(dv_id)?;
        let mut next = current.clone();
        let mut changed: Vec<&'static str> = Vec::new();

        if let Some(number) = &patch.dv_number {
            let number = number.trim();
            if number.is_empty() {
                return Err(EngineError::validation("dv_number", "is required"));
            }
            if number != next.dv_number {
                next.dv_number = number.to_string();
                changed.push("dv_number");
            }
        }
        if let Some(amount) = patch.amount {
            if amount <= Decimal::ZERO {
                return Err(EngineError::validation("amount", "must be greater than zero"));
            }
            if amount != next.amount {
                next.amount = amount;
                changed.push("amount");
            }
        }
        let text_fields = [
            ("payee", &patch.payee, &mut next.payee),
            ("particulars", &patch.particulars, &mut next.particulars),
            ("transaction_type", &patch.transaction_type, &mut next.transaction_type),
            ("implementing_unit", &patch.implementing_unit, &mut next.implementing_unit),
        ];
        for (name, new, field) in text_fields {
            if let Some(value) = new {
                if value.as_str() != field.as_str() {
                    *field = value.clone();
                    changed.push(name);
                }
            }
        }

        let mut ors = None;
        if let Some(lines) = &patch.ors_entries {
            if *lines != self.storage.get_ors_entries(dv_id)? {
                changed.push("ors_entries");
                ors = Some(lines.as_slice());
            }
        }

        if changed.is_empty() {
            return Ok(TransitionOutcome {
                dv: current,
                entry_ids: Vec::new(),
            });
        }

        next.updated_at = self.clock.now();
        let performed_by = resolve_performed_by(
            ActionType::DvUpdated,
            None,
            &next.stages,
            actor,
            &self.config.system_actor,
        );
        let entry =
            NewHistoryEntry::new(dv_id, ActionType::DvUpdated, &performed_by, next.updated_at)
            .with_statuses(Some(current.status), Some(current.status))
            .with_data("changed_fields", changed.clone());

        let outcome = self.commit(&current, next, ors, &[entry], "update_dv")?;
        info!(dv_number = %outcome.dv.dv_number, fields = ?changed, "DV details updated");
        Ok(outcome)
    }

    /// Load the DV and apply `action` to it.
    pub fn transition(
        &mut self,
        dv_id: DvId,
        action: &Action,
        actor: Option<&str>,
    ) -> Result<TransitionOutcome, EngineError> {
        let current = self.load_dv(dv_id)?;
        self.transition_from(&current, action, actor)
    }

    /// Apply `action` to a snapshot the caller already holds. Fails with
    /// [`EngineError::ConcurrentModification`] if the stored row has moved on
    /// since the snapshot was read.
    pub fn transition_from(
        &mut self,
        snapshot: &DisbursementVoucher,
        action: &Action,
        actor: Option<&str>,
    ) -> Result<TransitionOutcome, EngineError> {
        let ctx = TransitionContext {
            session_user: actor,
            now: self.clock.now(),
            config: &self.config,
        };
        let plan = match workflow::plan(snapshot, action, &ctx) {
            Ok(plan) => plan,
            Err(e) => {
                debug!(
                    dv_number = %snapshot.dv_number,
                    status = %snapshot.status,
                    action = action.name(),
                    error = %e,
                    "transition rejected"
                );
                return Err(e);
            }
        };

        let outcome = self.commit(snapshot, plan.dv, None, &plan.entries, action.name())?;
        info!(
            dv_number = %outcome.dv.dv_number,
            action = action.name(),
            from = %snapshot.status,
            to = %outcome.dv.status,
            entries = outcome.entry_ids.len(),
            "transition committed"
        );
        Ok(outcome)
    }

    fn commit(
        &mut self,
        current: &DisbursementVoucher,
        mut next: DisbursementVoucher,
        ors_entries: Option<&[OrsEntry]>,
        entries: &[NewHistoryEntry],
        action: &str,
    ) -> Result<TransitionOutcome, EngineError> {
        let write = DvWrite {
            dv: &next,
            expected_version: current.version,
            ors_entries,
            entries,
        };
        let entry_ids = self.storage.commit_dv(write).map_err(|e| {
            let e = EngineError::from(e);
            match &e {
                EngineError::HistoryWriteFailure(detail) => error!(
                    dv_number = %current.dv_number,
                    action,
                    detail = %detail,
                    "history write failed, DV update rolled back"
                ),
                EngineError::ConcurrentModification(_) => debug!(
                    dv_number = %current.dv_number,
                    action,
                    version = current.version,
                    "stale DV snapshot"
                ),
                _ => {}
            }
            e
        })?;
        next.version = current.version + 1;
        Ok(TransitionOutcome { dv: next, entry_ids })
    }

    pub fn load_dv(&self, dv_id: DvId) -> Result<DisbursementVoucher, EngineError> {
        self.storage
            .get_dv(dv_id)?
            .ok_or_else(|| EngineError::NotFound(dv_id.to_string()))
    }

    /// DV with its ORS lines and formatted history.
    pub fn get_dv(&self, dv_id: DvId) -> Result<DvView, EngineError> {
        let dv = self.load_dv(dv_id)?;
        self.view_of(dv)
    }

    pub fn get_dv_by_number(&self, dv_number: &str) -> Result<DvView, EngineError> {
        let dv = self
            .storage
            .get_dv_by_number(dv_number)?
            .ok_or_else(|| EngineError::NotFound(dv_number.trim().to_string()))?;
        self.view_of(dv)
    }

    fn view_of(&self, dv: DisbursementVoucher) -> Result<DvView, EngineError> {
        let ors_entries = self.storage.get_ors_entries(dv.dv_id)?;
        let (history, history_source) = self.formatted_history(&dv)?;
        Ok(DvView {
            dv,
            ors_entries,
            history,
            history_source,
        })
    }

    /// Every DV in intake order.
    pub fn list_dvs(&self) -> Result<Vec<DisbursementVoucher>, EngineError> {
        self.storage
            .list_dv_keys()?
            .into_iter()
            .map(|(dv_id, _)| self.load_dv(dv_id))
            .collect()
    }

    /// Append an entry outside a transition, stamped with the engine clock
    /// and the DV's current status on both sides.
    pub fn append_history(
        &mut self,
        dv_id: DvId,
        action: ActionType,
        actor: Option<&str>,
        data: ActionData,
        notes: Option<String>,
    ) -> Result<EntryId, EngineError> {
        let dv = self.load_dv(dv_id)?;
        let performed_by = actor
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(self.config.system_actor.as_str())
            .to_string();
        let mut entry = NewHistoryEntry::new(dv_id, action, &performed_by, self.clock.now())
            .with_statuses(Some(dv.status), Some(dv.status))
            .with_notes(notes);
        entry.action_data = data;

        let entry_id = self.storage.append_history(&entry)?;
        debug!(dv_number = %dv.dv_number, action = %action, "history appended");
        Ok(entry_id)
    }

    pub fn history(&self, dv_id: DvId) -> Result<Vec<HistoryEntry>, EngineError> {
        self.load_dv(dv_id)?;
        Ok(self.storage.history_for(dv_id)?)
    }

    pub fn history_count(&self, dv_id: DvId) -> Result<u64, EngineError> {
        self.load_dv(dv_id)?;
        Ok(self.storage.history_count(dv_id)?)
    }

    /// The ledger as display rows, or a reconstruction when the DV has no
    /// ledger yet. The reconstruction is not persisted.
    pub fn formatted_history(
        &self,
        dv: &DisbursementVoucher,
    ) -> Result<(Vec<FormattedEntry>, HistorySource), EngineError> {
        let ledger = self.storage.history_for(dv.dv_id)?;
        if !ledger.is_empty() {
            return Ok((view::format_entries(&ledger), HistorySource::Ledger));
        }
        let derived = reconstruct(dv, &self.config.migration_actor);
        Ok((view::format_entries(&derived.entries), HistorySource::Reconstructed))
    }

    pub fn audit_history(&self, dv_id: DvId) -> Result<Vec<HistoryViolation>, EngineError> {
        Ok(audit::audit(&self.history(dv_id)?))
    }
}
