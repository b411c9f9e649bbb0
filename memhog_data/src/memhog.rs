use std::collections::{BTreeMap, HashMap};

use derive_more::derive::Deref;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::{
    sacct::{AccountingQuery, AccountingSource, SourceError},
    slurm::{JobId, JobRecord, RecordError, SlurmUser},
    DEFAULT_THRESHOLD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateOptions {
    /// a job is a hog if `requested / max_rss > threshold`
    pub threshold: u64,
    /// don't list a job again for a user if it was the last one flagged for them (one entry per job
    /// instead of one per step)
    pub dedup: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            dedup: false,
        }
    }
}

/// job -> user, filled from the primary line of each job so that step lines can be attributed.
#[derive(Debug, Clone, Default)]
pub struct JobUserIndex(HashMap<JobId, SlurmUser>);

impl JobUserIndex {
    /// Last writer wins.
    pub fn record(&mut self, job_id: JobId, user: SlurmUser) {
        self.0.insert(job_id, user);
    }

    pub fn resolve(&self, job_id: JobId) -> Option<&SlurmUser> {
        self.0.get(&job_id)
    }
}

/// user -> flagged jobs, in the order they were flagged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, Serialize)]
#[serde(transparent)]
pub struct FlaggedJobs(BTreeMap<SlurmUser, Vec<JobId>>);

impl FlaggedJobs {
    pub fn flag(&mut self, user: &SlurmUser, job_id: JobId, dedup: bool) {
        let jobs = self.0.entry(user.clone()).or_default();
        if dedup && jobs.last() == Some(&job_id) {
            return;
        }
        jobs.push(job_id);
    }

    pub fn jobs_of(&self, user: &SlurmUser) -> &[JobId] {
        self.0.get(user).map_or(&[], Vec::as_slice)
    }

    pub fn num_flagged(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("line {line_number}: `{line}`")]
    Record {
        line_number: usize,
        line: String,
        source: RecordError,
    },
    #[error("line {line_number}: job {job_id} has no user, and no earlier line named one: `{line}`")]
    UnknownUser {
        line_number: usize,
        line: String,
        job_id: JobId,
    },
    #[error("getting accounting data")]
    Source(#[from] SourceError),
}

/// Runs `query` against `source` and collects the jobs that requested more than `threshold` times
/// the memory they actually used, grouped by user.
///
/// Lines are handled in the order the source yields them. The first error aborts the whole pass.
#[tracing::instrument(skip(source))]
pub fn aggregate<S: AccountingSource>(
    source: &mut S,
    query: &AccountingQuery,
    options: &AggregateOptions,
) -> Result<FlaggedJobs, AggregateError> {
    let mut job_users = JobUserIndex::default();
    let mut hogs = FlaggedJobs::default();
    let mut num_records = 0usize;

    for (i, line) in source.lines(query)?.enumerate() {
        let line = line?;
        let line_number = i + 1;
        if line.trim().is_empty() {
            trace!(line_number, "skipping empty line");
            continue;
        }

        let record = JobRecord::parse(&line).map_err(|source| AggregateError::Record {
            line_number,
            line: line.clone(),
            source,
        })?;
        num_records += 1;

        if let Some(user) = &record.user {
            job_users.record(record.job_id, user.clone());
        }

        let Some(ratio) = record.overallocation() else {
            continue;
        };
        if ratio <= options.threshold {
            continue;
        }

        let Some(user) = job_users.resolve(record.job_id) else {
            return Err(AggregateError::UnknownUser {
                line_number,
                job_id: record.job_id,
                line,
            });
        };
        debug!(%user, job_id = %record.job_id, ratio, requested = %record.requested, max_rss = %record.max_rss, "memory hog");
        hogs.flag(user, record.job_id, options.dedup);
    }

    info!(
        num_records,
        num_users = hogs.len(),
        num_flagged = hogs.num_flagged(),
        "aggregated accounting data"
    );
    Ok(hogs)
}
