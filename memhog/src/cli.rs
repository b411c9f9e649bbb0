use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

/// Find Slurm memory hogs, i.e. jobs that used much less memory than they requested.
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(version, about)]
pub struct Args {
    /// Job ID to check
    #[arg(short, long, value_name = "JOBID")]
    pub jobs: Option<u32>,
    /// Select jobs that started after this date (passed to `sacct -S`)
    #[arg(short = 'S', long, value_name = "DATE")]
    pub starttime: Option<String>,
    /// Select jobs that finished before this date (passed to `sacct -E`)
    #[arg(short = 'E', long, value_name = "DATE")]
    pub endtime: Option<String>,
    /// Look at the jobs of all users, not only your own
    #[arg(short, long)]
    pub allusers: bool,
    /// Flag jobs whose requested/used memory ratio is above this
    #[arg(short, long)]
    pub threshold: Option<u64>,
    /// List each job once per user instead of once per job step
    #[arg(long)]
    pub dedup: bool,
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(short, long, default_value_t = Level::WARN)]
    pub log_level: Level,
}
