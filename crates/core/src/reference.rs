use regex::Regex;
use std::sync::LazyLock;

use crate::error::CoreError;

static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{5})$").expect("reference pattern compiles")
});

/// Accepted year range for reference numbers, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearWindow {
    pub floor: i32,
    pub ceiling: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceNumber {
    pub year: i32,
    pub month: u32,
    pub serial: u32,
}

impl ReferenceNumber {
    pub fn parse(value: &str, window: YearWindow) -> Result<Self, CoreError> {
        let reject = |rule: String| CoreError::InvalidReference {
            value: value.to_string(),
            rule,
        };

        let caps = REFERENCE_PATTERN
            .captures(value.trim())
            .ok_or_else(|| reject("expected format YYYY-MM-NNNNN".into()))?;

        let year: i32 = caps[1]
            .parse()
            .map_err(|_| reject("year is not numeric".into()))?;
        let month: u32 = caps[2]
            .parse()
            .map_err(|_| reject("month is not numeric".into()))?;
        let serial: u32 = caps[3]
            .parse()
            .map_err(|_| reject("serial is not numeric".into()))?;

        if year < window.floor || year > window.ceiling {
            return Err(reject(format!(
                "year must be between {} and {}",
                window.floor, window.ceiling
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(reject("month must be between 01 and 12".into()));
        }
        if serial == 0 {
            return Err(reject("serial must not be 00000".into()));
        }

        Ok(Self {
            year,
            month,
            serial,
        })
    }
}
