use std::{
    ffi::OsString,
    io::{self, BufRead, BufReader, Lines, Read},
    process::{Child, ChildStdout, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
};

use itertools::Itertools as _;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::slurm::JobId;

/// Columns we ask `sacct` for, in the order `JobRecord::parse` expects them.
pub const SACCT_FORMAT: &str = "User,JobID,ReqMem,MaxRSS";

/// What to ask the accounting tool for. Times are handed to `sacct` as they are, it does its own
/// validation (`-S`/`-E` accept things like `2024-01-31`, `now-7days`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountingQuery {
    pub job_id: Option<JobId>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    /// without this `sacct` only reports the jobs of the calling user
    pub all_users: bool,
}

impl AccountingQuery {
    pub fn sacct_args(&self) -> Vec<String> {
        let mut args = vec![
            "--noheader".to_owned(),
            "--parsable2".to_owned(), /* sep by `|` without trailing `|` */
            format!("--format={SACCT_FORMAT}"),
        ];
        if self.all_users {
            args.push("--allusers".to_owned());
        }
        if let Some(job_id) = self.job_id {
            args.extend(["-j".to_owned(), job_id.to_string()]);
        }
        if let Some(start) = &self.start_time {
            args.extend(["-S".to_owned(), start.clone()]);
        }
        if let Some(end) = &self.end_time {
            args.extend(["-E".to_owned(), end.clone()]);
        }
        args
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not start `{program}`")]
    Spawn { program: String, source: io::Error },
    #[error("reading output of `{program}`")]
    Read { program: String, source: io::Error },
    #[error("`{program}` failed with {status}")]
    Failed { program: String, status: ExitStatus, stderr: String },
}

/// Something that hands out accounting lines (`user|jobid[.step]|reqmem|maxrss`) in the order the
/// scheduler reports them.
pub trait AccountingSource {
    type Lines: Iterator<Item = Result<String, SourceError>>;

    fn lines(&mut self, query: &AccountingQuery) -> Result<Self::Lines, SourceError>;
}

/// Runs `sacct` and streams its stdout.
#[derive(Debug, Clone)]
pub struct Sacct {
    program: OsString,
}

impl Sacct {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self { program: program.into() }
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl Default for Sacct {
    fn default() -> Self {
        Self::new("sacct")
    }
}

impl AccountingSource for Sacct {
    type Lines = SacctLines;

    fn lines(&mut self, query: &AccountingQuery) -> Result<SacctLines, SourceError> {
        let args = query.sacct_args();
        debug!("running `{} {}`", self.program_name(), args.iter().join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SourceError::Spawn {
                program: self.program_name(),
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            reap(&mut child);
            return Err(SourceError::Read {
                program: self.program_name(),
                source: io::Error::other("stdout was not captured"),
            });
        };

        // read concurrently, a chatty child would otherwise block on a full stderr pipe while we wait for stdout
        let stderr = child.stderr.take().map(drain);

        Ok(SacctLines {
            program: self.program_name(),
            lines: BufReader::new(stdout).lines(),
            child: Some(child),
            stderr,
        })
    }
}

/// Lines of a running `sacct`. The child is waited on once stdout is exhausted, a failing exit
/// status shows up as the last item. Dropping this early kills the child.
#[derive(Debug)]
pub struct SacctLines {
    program: String,
    lines: Lines<BufReader<ChildStdout>>,
    child: Option<Child>,
    stderr: Option<JoinHandle<String>>,
}

impl SacctLines {
    fn finish(&mut self) -> Option<SourceError> {
        let mut child = self.child.take()?;
        let program = self.program.clone();

        let status = match child.wait() {
            Ok(status) => status,
            Err(source) => return Some(SourceError::Read { program, source }),
        };
        let stderr = match self.stderr.take().map(JoinHandle::join) {
            Some(Ok(stderr)) => stderr,
            Some(Err(_)) => {
                warn!("reading stderr of `{program}` panicked");
                String::new()
            }
            None => String::new(),
        };
        if status.success() {
            if !stderr.trim().is_empty() {
                warn!("`{program}` reported: {}", stderr.trim());
            }
            return None;
        }

        Some(SourceError::Failed {
            program,
            status,
            stderr: stderr.trim().to_owned(),
        })
    }
}

impl Iterator for SacctLines {
    type Item = Result<String, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.child.as_ref()?;
        match self.lines.next() {
            Some(Ok(line)) => Some(Ok(line)),
            Some(Err(source)) => {
                if let Some(mut child) = self.child.take() {
                    reap(&mut child);
                }
                Some(Err(SourceError::Read {
                    program: self.program.clone(),
                    source,
                }))
            }
            None => self.finish().map(Err),
        }
    }
}

impl Drop for SacctLines {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!("stopping `{}` before it finished", self.program);
            reap(&mut child);
        }
    }
}

/// Collects everything `pipe` yields until it is closed.
fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            warn!(?e, "reading stderr");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn reap(child: &mut Child) {
    // kill fails if it already exited, which is fine, we only need the wait
    let _ = child.kill();
    if let Err(e) = child.wait() {
        warn!(?e, "could not wait for child {}", child.id());
    }
}

/// Fixed lines, for tests and for replaying saved `sacct` output.
#[derive(Debug, Clone, Default)]
pub struct CannedSource {
    lines: Vec<String>,
    last_query: Option<AccountingQuery>,
}

impl CannedSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            last_query: None,
        }
    }

    /// Splits a whole `sacct` output into lines.
    pub fn from_output(output: &str) -> Self {
        Self::new(output.lines())
    }

    pub fn last_query(&self) -> Option<&AccountingQuery> {
        self.last_query.as_ref()
    }
}

impl AccountingSource for CannedSource {
    type Lines = std::iter::Map<std::vec::IntoIter<String>, fn(String) -> Result<String, SourceError>>;

    fn lines(&mut self, query: &AccountingQuery) -> Result<Self::Lines, SourceError> {
        self.last_query = Some(query.clone());
        Ok(self.lines.clone().into_iter().map(Ok as fn(String) -> Result<String, SourceError>))
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn AccountingQuery__sacct_args__no_filters() {
        assert_eq!(
            AccountingQuery::default().sacct_args(),
            ["--noheader", "--parsable2", "--format=User,JobID,ReqMem,MaxRSS"]
        );
    }

    #[test]
    fn AccountingQuery__sacct_args__all_filters() {
        let query = AccountingQuery {
            job_id: Some(JobId(4711)),
            start_time: Some("2024-01-01".into()),
            end_time: Some("now".into()),
            all_users: true,
        };
        assert_eq!(
            query.sacct_args(),
            [
                "--noheader",
                "--parsable2",
                "--format=User,JobID,ReqMem,MaxRSS",
                "--allusers",
                "-j",
                "4711",
                "-S",
                "2024-01-01",
                "-E",
                "now",
            ]
        );
    }

    #[test]
    fn CannedSource__records_query() {
        let mut source = CannedSource::from_output("alice|1|1K|1K\n|1.batch|1K|1K\n");
        let query = AccountingQuery {
            job_id: Some(JobId(1)),
            ..Default::default()
        };
        let lines = source.lines(&query).unwrap().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(lines, ["alice|1|1K|1K", "|1.batch|1K|1K"]);
        assert_eq!(source.last_query(), Some(&query));
    }

    #[cfg(unix)]
    #[test]
    fn Sacct__streams_stdout() {
        // `echo` ignores our sacct flags and just prints them
        let mut source = Sacct::new("echo");
        let lines = source
            .lines(&AccountingQuery::default())
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(lines, ["--noheader --parsable2 --format=User,JobID,ReqMem,MaxRSS"]);
    }

    #[cfg(unix)]
    #[test]
    fn Sacct__failing_exit_status() {
        let mut source = Sacct::new("false");
        let result = source.lines(&AccountingQuery::default()).unwrap().collect::<Result<Vec<_>, _>>();
        assert!(matches!(result, Err(SourceError::Failed { status, .. }) if !status.success()));
    }

    #[test]
    fn Sacct__missing_program() {
        let mut source = Sacct::new("/nonexistent/memhog-test/sacct");
        assert!(matches!(source.lines(&AccountingQuery::default()), Err(SourceError::Spawn { .. })));
    }
}
