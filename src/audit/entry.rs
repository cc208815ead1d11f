//! Audit Run Entry
//!
//! One line per run: `timestamp, event_count, ok_count, fail_count`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CustodyError;
use crate::verification::VerificationSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntry {
    pub timestamp: DateTime<Utc>,
    pub event_count: usize,
    pub ok_count: usize,
    pub fail_count: usize,
}

impl RunEntry {
    pub fn new(event_count: usize, summary: &VerificationSummary) -> Self {
        Self {
            timestamp: Utc::now(),
            event_count,
            ok_count: summary.ok_count,
            fail_count: summary.fail_count,
        }
    }
}

impl fmt::Display for RunEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.event_count,
            self.ok_count,
            self.fail_count
        )
    }
}

impl FromStr for RunEntry {
    type Err = CustodyError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = || CustodyError::validation(format!("Invalid audit line: {}", line));

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [timestamp, event_count, ok_count, fail_count] = fields.as_slice() else {
            return Err(invalid());
        };

        Ok(Self {
            timestamp: DateTime::parse_from_rfc3339(timestamp)
                .map_err(|_| invalid())?
                .with_timezone(&Utc),
            event_count: event_count.parse().map_err(|_| invalid())?,
            ok_count: ok_count.parse().map_err(|_| invalid())?,
            fail_count: fail_count.parse().map_err(|_| invalid())?,
        })
    }
}
