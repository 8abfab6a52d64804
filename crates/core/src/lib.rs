pub mod action;
pub mod error;
pub mod history;
pub mod ids;
pub mod reference;
pub mod status;
pub mod voucher;

pub use action::ActionType;
pub use error::CoreError;
pub use history::{ActionData, HistoryEntry, NewHistoryEntry};
pub use ids::*;
pub use reference::{ReferenceNumber, YearWindow};
pub use status::{CycleOrigin, DvStatus};
pub use voucher::*;
