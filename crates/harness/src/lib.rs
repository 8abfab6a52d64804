mod desk;

pub use desk::{CLERK, TestDesk, TestResult};
