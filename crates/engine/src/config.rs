use chrono::{DateTime, Datelike, Utc};
use dvtrack_core::YearWindow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Lowest year accepted in E-NGAS and NORSA numbers.
    pub reference_year_floor: i32,
    /// Years past the current one still accepted in reference numbers.
    pub reference_years_ahead: i32,
    /// Recorded as `performed_by` when no actor can be resolved.
    pub system_actor: String,
    /// Default actor for entries produced by history reconstruction.
    pub migration_actor: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            reference_year_floor: 2020,
            reference_years_ahead: 1,
            system_actor: "System".into(),
            migration_actor: "System Migration".into(),
        }
    }
}

impl WorkflowConfig {
    pub fn with_reference_year_floor(mut self, year: i32) -> Self {
        self.reference_year_floor = year;
        self
    }

    pub fn with_reference_years_ahead(mut self, years: i32) -> Self {
        self.reference_years_ahead = years;
        self
    }

    pub fn with_system_actor(mut self, actor: &str) -> Self {
        self.system_actor = actor.to_string();
        self
    }

    pub fn with_migration_actor(mut self, actor: &str) -> Self {
        self.migration_actor = actor.to_string();
        self
    }

    pub fn reference_window(&self, now: DateTime<Utc>) -> YearWindow {
        YearWindow {
            floor: self.reference_year_floor,
            ceiling: now.year() + self.reference_years_ahead,
        }
    }
}
