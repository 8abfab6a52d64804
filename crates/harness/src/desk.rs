use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use dvtrack_core::{DisbursementVoucher, DvDraft, DvId, DvStatus, PaymentMethod};
use dvtrack_engine::{
    Action, CashAllocationInput, Clock, EngasInput, Engine, EngineError, ManualClock,
    PaymentMethodInput, StageInput, WorkflowConfig,
};
use dvtrack_storage::{SqliteStorage, Storage, StorageError};

pub type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Session user recorded on transitions driven by the fixture.
pub const CLERK: &str = "Clerk";

/// An engine over its own database with a clock that only moves when told.
pub struct TestDesk {
    pub engine: Engine,
    pub clock: ManualClock,
}

impl TestDesk {
    /// 2025-03-03 08:00 UTC.
    pub fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn new() -> Result<Self, EngineError> {
        Self::configured(WorkflowConfig::default())
    }

    pub fn configured(config: WorkflowConfig) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open_in_memory()?;
        Ok(Self::over(storage, config, ManualClock::starting_at(Self::start())))
    }

    /// Desk over a database file. Desks opened on the same path see each
    /// other's writes; pass a shared clock to keep them in step.
    pub fn on_file(path: &Path, clock: ManualClock) -> Result<Self, EngineError> {
        let path = path
            .to_str()
            .ok_or_else(|| {
                StorageError::Serialization(format!("non UTF-8 path {}", path.display()))
            })?;
        Ok(Self::over(
            SqliteStorage::open(path)?,
            WorkflowConfig::default(),
            clock,
        ))
    }

    fn over(storage: SqliteStorage, config: WorkflowConfig, clock: ManualClock) -> Self {
        Self {
            engine: Engine::with_config(storage, config, clock.clone()),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    pub fn next_day(&self) {
        self.clock.advance(Duration::days(1));
    }

    pub fn draft(dv_number: &str) -> DvDraft {
        DvDraft {
            dv_number: dv_number.to_string(),
            amount: Decimal::from(48_000),
            payee: "Maria Santos".into(),
            particulars: "Office supplies for Q1".into(),
            transaction_type: "Procurement".into(),
            implementing_unit: "Admin Division".into(),
            ors_entries: Vec::new(),
        }
    }

    /// Register a DV in `for_review`.
    pub fn intake(&mut self, dv_number: &str) -> Result<DvId, EngineError> {
        let outcome = self.engine.create_dv(&Self::draft(dv_number), Some(CLERK))?;
        Ok(outcome.dv.dv_id)
    }

    pub fn act(&mut self, dv_id: DvId, action: Action) -> Result<DisbursementVoucher, EngineError> {
        Ok(self.engine.transition(dv_id, &action, Some(CLERK))?.dv)
    }

    /// Walk the forward path one action a day until `target`, paying by
    /// check.
    pub fn drive_to(&mut self, dv_id: DvId, target: DvStatus) -> TestResult<DisbursementVoucher> {
        self.drive_via(dv_id, target, PaymentMethod::Check)
    }

    pub fn drive_via(
        &mut self,
        dv_id: DvId,
        target: DvStatus,
        method: PaymentMethod,
    ) -> TestResult<DisbursementVoucher> {
        let mut dv = self.engine.load_dv(dv_id)?;
        while dv.status != target {
            self.next_day();
            let action = self
                .forward_action(&dv, method)
                .ok_or_else(|| format!("cannot reach {target} from {}", dv.status))?;
            dv = self.act(dv_id, action)?;
        }
        Ok(dv)
    }

    fn forward_action(&self, dv: &DisbursementVoucher, method: PaymentMethod) -> Option<Action> {
        let today = StageInput::on(self.today());
        let action = match dv.status {
            DvStatus::ForReview => Action::ReviewComplete(today),
            DvStatus::ForCashAllocation => Action::CashAllocation(CashAllocationInput {
                stage: today.by("Budget Officer"),
                number: format!("CA-{}", dv.dv_number),
                net_amount: dv.amount,
            }),
            DvStatus::ForBoxC => Action::BoxCCertify(today),
            DvStatus::ForApproval if dv.stages.approval_out.date.is_none() => {
                Action::ApprovalOut(today)
            }
            DvStatus::ForApproval => Action::ApprovalIn(today.by("Regional Director")),
            DvStatus::ForIndexing => Action::Indexing(today),
            DvStatus::ForPayment => Action::PaymentMethod(PaymentMethodInput {
                stage: today,
                method,
                lddap_number: (method == PaymentMethod::Lddap)
                    .then(|| "LDDAP-2025-031".to_string()),
            }),
            DvStatus::OutToCashiering => Action::PayrollIn(today),
            DvStatus::ForEngas => Action::Engas(EngasInput {
                stage: today.by("Accounting"),
                engas_number: "2025-03-00042".into(),
            }),
            DvStatus::ForCdj => Action::Cdj(today),
            DvStatus::ForLddap => Action::LddapCertify(today.by("Chief Accountant")),
            DvStatus::ForRtsIn | DvStatus::ForNorsaIn | DvStatus::Processed => return None,
        };
        Some(action)
    }

    /// A DV row as an older system would have left it: no ledger entries.
    pub fn legacy_dv(&self, dv_number: &str, status: DvStatus) -> DisbursementVoucher {
        let mut dv = DisbursementVoucher::from_draft(&Self::draft(dv_number), self.clock.now());
        dv.status = status;
        dv
    }

    pub fn insert_legacy(&mut self, dv: &DisbursementVoucher) -> Result<(), StorageError> {
        self.engine.storage_mut().insert_dv(dv, &[], &[])?;
        Ok(())
    }

    /// Overwrite a DV's stage blob with bytes that do not decode.
    pub fn corrupt_stages(&self, dv_number: &str) -> Result<(), StorageError> {
        self.engine.storage().conn().execute(
            "UPDATE dvs SET stages = x'c1' WHERE dv_number = ?1",
            [dv_number],
        )?;
        Ok(())
    }
}
