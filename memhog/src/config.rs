use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use memhog_data::{AggregateOptions, DEFAULT_THRESHOLD};
use serde::Deserialize;

use crate::cli::Args;

const DEFAULT_SACCT: &str = "sacct";
const ENV_PREFIX: &str = "memhog";

/// defaults < config file < `MEMHOG_*` environment < command line
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub sacct: PathBuf,
    pub threshold: u64,
    pub all_users: bool,
    pub dedup: bool,
}

impl Settings {
    pub fn new(args: &Args) -> Result<Self, ConfigError> {
        Self::with_file(args, args.config.as_deref())
    }

    fn with_file(args: &Args, file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("sacct", DEFAULT_SACCT)?
            .set_default("threshold", DEFAULT_THRESHOLD.to_string())?
            .set_default("all_users", false)?
            .set_default("dedup", false)?;
        if let Some(file) = file {
            builder = builder.add_source(File::new(&file.to_string_lossy(), FileFormat::Toml));
        }

        builder
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .set_override_option("threshold", args.threshold.map(|t| t.to_string()))?
            .set_override_option("all_users", args.allusers.then_some(true))?
            .set_override_option("dedup", args.dedup.then_some(true))?
            .build()?
            .try_deserialize()
    }

    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            threshold: self.threshold,
            dedup: self.dedup,
        }
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod test {
    use std::io::Write as _;

    use clap::Parser as _;
    use color_eyre::Result;

    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("memhog").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn Settings__defaults() -> Result<()> {
        let settings = Settings::with_file(&args(&[]), None)?;
        assert_eq!(settings.threshold, DEFAULT_THRESHOLD);
        assert!(!settings.dedup);
        assert_eq!(settings.aggregate_options(), AggregateOptions::default());
        Ok(())
    }

    #[test]
    fn Settings__file_and_overrides() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "sacct = \"/opt/slurm/bin/sacct\"\nthreshold = 8\nall_users = true")?;

        let settings = Settings::with_file(&args(&[]), Some(file.path()))?;
        assert_eq!(settings.sacct, PathBuf::from("/opt/slurm/bin/sacct"));
        assert_eq!(settings.threshold, 8);
        assert!(settings.all_users);

        let settings = Settings::with_file(&args(&["-t", "3", "--dedup"]), Some(file.path()))?;
        assert_eq!(settings.threshold, 3);
        assert!(settings.dedup);
        assert!(settings.all_users);
        Ok(())
    }

    #[test]
    fn Settings__missing_file() {
        assert!(Settings::with_file(&args(&[]), Some(Path::new("/nonexistent/memhog.toml"))).is_err());
    }
}
