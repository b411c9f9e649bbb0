mod cli;
mod config;
mod report;

use clap::Parser as _;
use color_eyre::{
    eyre::{Context as _, Report},
    Result, Section as _, SectionExt as _,
};
use memhog_data::{aggregate, AccountingQuery, AggregateError, JobId, Sacct, SourceError};
use tracing::{debug, info, Level};

use cli::Args;
use config::Settings;
use report::HogReport;

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    register_logging(args.log_level)?;

    let settings = read_config(&args)?;
    debug!(?settings);

    let query = AccountingQuery {
        job_id: args.jobs.map(JobId),
        start_time: args.starttime.clone(),
        end_time: args.endtime.clone(),
        all_users: settings.all_users,
    };
    let options = settings.aggregate_options();

    let mut sacct = Sacct::new(&settings.sacct);
    let hogs = aggregate(&mut sacct, &query, &options)
        .map_err(|e| explain(e, &settings).wrap_err("finding memory hogs"))?;
    info!(users = hogs.len(), "done");

    let report = HogReport::new(&query, options.threshold, &hogs);
    if args.json {
        println!("{}", report.to_json().context("serializing report")?);
    } else if !hogs.is_empty() {
        println!("{}", report.to_text());
    }
    Ok(())
}

fn register_logging(level: Level) -> Result<()> {
    // stdout is for the report
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn read_config(args: &Args) -> Result<Settings> {
    info!("Loading config");
    Settings::new(args).context("parsing config")
}

fn explain(error: AggregateError, settings: &Settings) -> Report {
    match &error {
        AggregateError::Source(SourceError::Spawn { .. }) => Report::new(error).suggestion(format!(
            "is `{}` installed? Set `sacct` in the config file or MEMHOG_SACCT to point to it",
            settings.sacct.display()
        )),
        AggregateError::Source(SourceError::Failed { stderr, .. }) => {
            let stderr = stderr.clone();
            Report::new(error).note(stderr.header("Stderr:"))
        }
        AggregateError::UnknownUser { .. } => Report::new(error)
            .note("step lines carry no user, the primary line of the job has to come first"),
        _ => Report::new(error),
    }
}
