use std::num::ParseIntError;

use derive_more::derive::{Deref, Display, From, Into};
use itertools::Itertools as _;
use serde::Serialize;
use thiserror::Error;

use crate::misc::parsing::{MemorySize, MemorySizeParseError};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, Display, From, Into, Serialize)]
#[serde(transparent)]
pub struct SlurmUser(pub String);

impl From<&str> for SlurmUser {
    fn from(value: &str) -> Self {
        SlurmUser(value.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, Display, From, Into, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u32);

impl JobId {
    /// `1234.batch`, `1234.0` and `1234` are all job `1234`, the step after the `.` is dropped.
    pub fn parse_with_step(token: &str) -> Result<JobId, ParseIntError> {
        let job = token.split_once('.').map_or(token, |(job, _step)| job);
        job.parse().map(JobId)
    }
}

/// Which `sacct` column a memory token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MemoryField {
    ReqMem,
    MaxRSS,
}

/// One line of `sacct --parsable2 --format=User,JobID,ReqMem,MaxRSS`.
///
/// Only the first line of a job carries the user, the lines of its steps leave it empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub user: Option<SlurmUser>,
    pub job_id: JobId,
    pub requested: MemorySize,
    pub max_rss: MemorySize,
}

impl JobRecord {
    pub const FIELDS: usize = 4;

    pub fn parse(line: &str) -> Result<JobRecord, RecordError> {
        let fields = line.split('|').collect_vec();
        let &[user, job_id, requested, max_rss] = fields.as_slice() else {
            return Err(RecordError::Malformed { fields: fields.len() });
        };

        let job_id = JobId::parse_with_step(job_id).map_err(|source| RecordError::JobId {
            token: job_id.to_owned(),
            source,
        })?;
        let user = (!user.is_empty()).then(|| SlurmUser::from(user));
        let max_rss = parse_memory(MemoryField::MaxRSS, max_rss)?;
        let requested = parse_memory(MemoryField::ReqMem, requested)?;

        Ok(JobRecord {
            user,
            job_id,
            requested,
            max_rss,
        })
    }

    /// `requested / max_rss` (truncated), `None` when the job never used any memory.
    pub fn overallocation(&self) -> Option<u64> {
        if self.max_rss.is_zero() {
            return None;
        }
        self.requested.ratio_to(self.max_rss)
    }
}

fn parse_memory(field: MemoryField, token: &str) -> Result<MemorySize, RecordError> {
    MemorySize::parse(token).map_err(|source| RecordError::MemorySize { field, source })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("expected {} `|`-separated fields (user|jobid|reqmem|maxrss), got {fields}", JobRecord::FIELDS)]
    Malformed { fields: usize },
    #[error("job id `{token}` is not an integer")]
    JobId { token: String, source: ParseIntError },
    #[error("parsing {field}")]
    MemorySize { field: MemoryField, source: MemorySizeParseError },
}

#[allow(non_snake_case)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn JobId__parse_with_step() {
        assert_eq!(JobId::parse_with_step("100"), Ok(JobId(100)));
        assert_eq!(JobId::parse_with_step("100.batch"), Ok(JobId(100)));
        assert_eq!(JobId::parse_with_step("100.0"), Ok(JobId(100)));
        assert_eq!(JobId::parse_with_step("100.extern.1"), Ok(JobId(100)));

        assert!(JobId::parse_with_step("").is_err());
        assert!(JobId::parse_with_step(".batch").is_err());
        assert!(JobId::parse_with_step("100_3").is_err());
    }

    #[test]
    fn JobRecord__parse__primary_line() {
        assert_eq!(
            JobRecord::parse("alice|100|8000K|1000K"),
            Ok(JobRecord {
                user: Some("alice".into()),
                job_id: JobId(100),
                requested: MemorySize(8000),
                max_rss: MemorySize(1000),
            })
        );
    }

    #[test]
    fn JobRecord__parse__step_line() {
        let record = JobRecord::parse("|100.batch|4Gn|").unwrap();
        assert_eq!(record.user, None);
        assert_eq!(record.job_id, JobId(100));
        assert_eq!(record.requested, MemorySize(4 * 1024 * 1024));
        assert_eq!(record.max_rss, MemorySize::ZERO);
        assert_eq!(record.overallocation(), None);
    }

    #[test]
    fn JobRecord__parse__wrong_field_count() {
        assert_eq!(JobRecord::parse("alice|100|8000K"), Err(RecordError::Malformed { fields: 3 }));
        // `sacct -p` (not `--parsable2`) adds a trailing `|`
        assert_eq!(JobRecord::parse("alice|100|8000K|1000K|"), Err(RecordError::Malformed { fields: 5 }));
        assert_eq!(JobRecord::parse(""), Err(RecordError::Malformed { fields: 1 }));
    }

    #[test]
    fn JobRecord__parse__bad_tokens() {
        assert!(matches!(
            JobRecord::parse("alice|abc|8000K|1000K"),
            Err(RecordError::JobId { token, .. }) if token == "abc"
        ));
        assert!(matches!(
            JobRecord::parse("alice|100|8000K|lots"),
            Err(RecordError::MemorySize { field: MemoryField::MaxRSS, .. })
        ));
        assert!(matches!(
            JobRecord::parse("alice|100|?|1000K"),
            Err(RecordError::MemorySize { field: MemoryField::ReqMem, .. })
        ));
    }

    #[test]
    fn JobRecord__overallocation() {
        let record = JobRecord::parse("bob|101|1000K|900K").unwrap();
        assert_eq!(record.overallocation(), Some(1));
        let record = JobRecord::parse("bob|102|4Gc|1G").unwrap();
        assert_eq!(record.overallocation(), Some(4));
    }
}
