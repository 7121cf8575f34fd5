//! Model run and forecast step identifiers.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{WxError, WxResult};

/// One execution of a model at a cycle time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub model: String,
    pub cycle: DateTime<Utc>,
}

impl RunKey {
    pub fn new(model: impl Into<String>, cycle: DateTime<Utc>) -> Self {
        Self {
            model: model.into(),
            cycle,
        }
    }

    /// Parse a cycle written as `YYYYMMDDHH`.
    pub fn parse(model: impl Into<String>, cycle: &str) -> WxResult<Self> {
        let naive = NaiveDateTime::parse_from_str(&format!("{}0000", cycle), "%Y%m%d%H%M%S")
            .map_err(|e| WxError::InvalidCycle(format!("{}: {}", cycle, e)))?;
        Ok(Self::new(model, Utc.from_utc_datetime(&naive)))
    }

    /// Cycle date as `YYYYMMDD`.
    pub fn date_str(&self) -> String {
        self.cycle.format("%Y%m%d").to_string()
    }

    pub fn cycle_hour(&self) -> u32 {
        self.cycle.hour()
    }

    /// Cycle as `YYYYMMDDHH`.
    pub fn cycle_str(&self) -> String {
        self.cycle.format("%Y%m%d%H").to_string()
    }

    pub fn step(&self, forecast_hour: u32) -> StepKey {
        StepKey {
            run: self.clone(),
            forecast_hour,
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}z", self.model, self.cycle.format("%Y%m%d %H"))
    }
}

/// A forecast step within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepKey {
    pub run: RunKey,
    pub forecast_hour: u32,
}

impl StepKey {
    /// Valid time of the step (cycle + forecast offset).
    pub fn valid_time(&self) -> DateTime<Utc> {
        self.run.cycle + Duration::hours(self.forecast_hour as i64)
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} F{:02}", self.run, self.forecast_hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cycle() {
        let run = RunKey::parse("hrrr", "2025121012").unwrap();
        assert_eq!(run.date_str(), "20251210");
        assert_eq!(run.cycle_hour(), 12);
        assert_eq!(run.cycle_str(), "2025121012");
    }

    #[test]
    fn test_parse_invalid_cycle() {
        assert!(RunKey::parse("hrrr", "20251310").is_err());
        assert!(RunKey::parse("hrrr", "garbage").is_err());
    }

    #[test]
    fn test_step_valid_time_and_display() {
        let step = RunKey::parse("hrrr", "2025121018").unwrap().step(6);
        assert_eq!(step.valid_time().format("%Y%m%d%H").to_string(), "2025121100");
        assert_eq!(step.to_string(), "hrrr 20251210 18z F06");
    }
}
