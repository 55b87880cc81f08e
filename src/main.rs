use clap::Parser;
use sparkify_etl::runner::{RunArgs, RunResult, run_pipeline};
use std::path::PathBuf;

/// Load the song catalog and the listening event logs into the Sparkify star
/// schema
#[derive(Parser, Clone)]
#[command(version)]
struct Args {
    /// Postgres connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Root directory of the song catalog documents
    #[arg(long)]
    song_data: Option<PathBuf>,

    /// Root directory of the event log files
    #[arg(long)]
    log_data: Option<PathBuf>,

    /// File name pattern to load in each directory
    #[arg(long)]
    pattern: Option<String>,

    /// Skip files in directories whose path ends with this suffix
    #[arg(long)]
    exclude: Option<String>,

    /// Drop and recreate all five tables before loading
    #[arg(long)]
    reset_schema: bool,

    /// Empty the songplays table before the event phase, so that a re-run does
    /// not duplicate song plays
    #[arg(long)]
    truncate_songplays: bool,

    /// Write a JSON report with one outcome per file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Exit with an error when any file failed to load
    #[arg(long)]
    fail_on_error: bool,

    /// Quiet mode - minimal output, only show summary
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing based on quiet mode
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if args.quiet {
        EnvFilter::new("sparkify_etl=warn,sqlx=warn")
    } else {
        EnvFilter::new("sparkify_etl=info,sqlx=warn")
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Unset flags fall back to the library defaults
    let fail_on_error = args.fail_on_error;
    let defaults = RunArgs::default();
    let run_args = RunArgs {
        database_url: args.database_url.unwrap_or(defaults.database_url),
        song_data: args.song_data.unwrap_or(defaults.song_data),
        log_data: args.log_data.unwrap_or(defaults.log_data),
        pattern: args.pattern.unwrap_or(defaults.pattern),
        exclude: args.exclude.unwrap_or(defaults.exclude),
        reset_schema: args.reset_schema,
        truncate_songplays: args.truncate_songplays,
        report_path: args.report,
        quiet: args.quiet,
    };

    if !run_args.quiet {
        println!("Sparkify ETL");
        println!("============");
        println!("Song data: {}", run_args.song_data.display());
        println!("Log data: {}", run_args.log_data.display());
        println!();
    }

    let result = run_pipeline(run_args).await?;
    print_summary(&result);

    if fail_on_error && result.failed_files() > 0 {
        anyhow::bail!(
            "{} of {} files failed to load",
            result.failed_files(),
            result.files_processed()
        );
    }

    Ok(())
}

fn print_summary(result: &RunResult) {
    let rows = result.rows();

    println!();
    println!("Run Summary");
    println!("===========");
    println!("Run ID: {}", result.run_id);
    for phase in [&result.catalog, &result.events] {
        println!(
            "{} files: {} processed, {} failed",
            phase.phase,
            phase.files_found(),
            phase.files_failed()
        );
    }
    println!(
        "Rows written: songs {}, artists {}, users {}, time {}, songplays {}",
        rows.songs, rows.artists, rows.users, rows.time, rows.songplays
    );
    println!("Duration: {:.2}s", result.duration.as_secs_f64());

    if result.failed_files() > 0 {
        println!();
        println!("Failed files:");
        for outcome in result
            .catalog
            .outcomes
            .iter()
            .chain(&result.events.outcomes)
            .filter(|o| o.is_failed())
        {
            println!(
                "  {}: {}",
                outcome.path.display(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if let Some(ref path) = result.report_path {
        println!();
        println!("Report written to {}", path.display());
    }
}
