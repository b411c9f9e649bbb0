use chrono::{DateTime, Local};
use itertools::Itertools as _;
use memhog_data::{AccountingQuery, FlaggedJobs};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HogReport<'a> {
    pub generated_at: DateTime<Local>,
    pub query: &'a AccountingQuery,
    pub threshold: u64,
    pub hogs: &'a FlaggedJobs,
}

impl<'a> HogReport<'a> {
    pub fn new(query: &'a AccountingQuery, threshold: u64, hogs: &'a FlaggedJobs) -> Self {
        Self {
            generated_at: Local::now(),
            query,
            threshold,
            hogs,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// `user: jobid jobid ...`, one line per user
    pub fn to_text(&self) -> String {
        self.hogs
            .iter()
            .map(|(user, jobs)| format!("{user}: {}", jobs.iter().join(" ")))
            .join("\n")
    }
}
