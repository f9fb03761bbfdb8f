//! Period timetable.
//!
//! A default timetable is embedded at compile time from
//! `contrib/periods.toml`; deployments may point at their own file.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const DEFAULT_TIMETABLE: &str = include_str!("../contrib/periods.toml");

#[derive(Error, Debug)]
pub enum TimetableError {
    #[error("failed to read timetable {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bad timetable TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("period {0} is listed more than once")]
    DuplicatePeriod(u32),
    #[error("period {0} is not in the timetable")]
    UnknownPeriod(u32),
}

/// One teaching slot of the day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct Period {
    pub period: u32,
    /// "HH:MM", local time.
    pub start: String,
    pub end: String,
    /// Non-instructional slot: attendance is disabled.
    #[serde(default)]
    pub free: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TimetableFile {
    #[serde(rename = "period")]
    periods: Vec<Period>,
}

#[derive(Debug, Clone)]
pub struct Timetable {
    periods: Vec<Period>,
}

impl Default for Timetable {
    fn default() -> Self {
        match Self::from_toml(DEFAULT_TIMETABLE) {
            Ok(timetable) => timetable,
            Err(e) => {
                tracing::error!(error = %e, "embedded timetable is invalid; using an empty one");
                Self { periods: Vec::new() }
            }
        }
    }
}

impl Timetable {
    pub fn from_toml(src: &str) -> Result<Self, TimetableError> {
        let file: TimetableFile = toml::from_str(src)?;
        let mut periods = file.periods;
        periods.sort_by_key(|p| p.period);
        if let Some(pair) = periods.windows(2).find(|w| w[0].period == w[1].period) {
            return Err(TimetableError::DuplicatePeriod(pair[0].period));
        }
        Ok(Self { periods })
    }

    pub fn load(path: &Path) -> Result<Self, TimetableError> {
        let src = std::fs::read_to_string(path).map_err(|source| TimetableError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let timetable = Self::from_toml(&src)?;
        tracing::info!(path = %path.display(), periods = timetable.periods.len(), "loaded timetable");
        Ok(timetable)
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn get(&self, period: u32) -> Result<&Period, TimetableError> {
        self.periods
            .iter()
            .find(|p| p.period == period)
            .ok_or(TimetableError::UnknownPeriod(period))
    }

    pub fn is_free(&self, period: u32) -> Result<bool, TimetableError> {
        self.get(period).map(|p| p.free)
    }
}
