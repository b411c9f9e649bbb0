pub mod memhog;
pub mod misc;
pub mod sacct;
pub mod slurm;

pub use memhog::{aggregate, AggregateError, AggregateOptions, FlaggedJobs, JobUserIndex};
pub use misc::parsing::{MemorySize, MemorySizeParseError};
pub use sacct::{AccountingQuery, AccountingSource, CannedSource, Sacct, SourceError};
pub use slurm::{JobId, JobRecord, RecordError, SlurmUser};

/// Jobs that requested more than this many times the memory they used are hogs.
pub const DEFAULT_THRESHOLD: u64 = 2;
