use chrono::{NaiveDate, NaiveTime};
use clap::Parser;
use dotenvy::dotenv;
use thiserror::Error;
use tracing::{error, info};

use ks_common::batch::{
    run_daily_batch, AutoDateMode, BatchError, BatchOptions, BatchRun, CompanyUpdateMode,
    DateSelection,
};
use ks_common::db::{create_pool_from_url_checked, run_migrations, DbPoolError, MigrationError};
use ks_common::edinet::{EdinetClient, EdinetConfig, EdinetError};
use ks_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};

#[derive(Debug, Parser)]
#[command(
    name = "ks-edinet-batch",
    about = "Daily EDINET document ingestion for the kaiseki pipeline"
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Explicit target date (YYYY-MM-DD). Future dates are rejected.
    #[arg(long, conflicts_with_all = ["today", "yesterday"])]
    date: Option<NaiveDate>,

    /// Target today's JST date
    #[arg(long, conflicts_with = "yesterday")]
    today: bool,

    /// Target yesterday's JST date
    #[arg(long)]
    yesterday: bool,

    /// Re-run a date whose batch already succeeded
    #[arg(long)]
    force: bool,

    /// Night batch threshold (HH:MM, JST) for time_based auto dating
    #[arg(long, env = "KS_NIGHT_BATCH_TIME", default_value = "23:00", value_parser = parse_hhmm)]
    night_batch_time: NaiveTime,

    /// Auto date mode: time_based | yesterday_only | today_only
    #[arg(long, env = "KS_AUTO_DATE_MODE", default_value = "time_based")]
    auto_date_mode: AutoDateMode,

    /// Company master update mode: incremental | full | skip
    #[arg(long, env = "KS_COMPANY_UPDATE_MODE", default_value = "incremental")]
    company_update_mode: CompanyUpdateMode,

    /// Documents per upsert transaction
    #[arg(long, env = "KS_BATCH_CHUNK_SIZE", default_value_t = 100)]
    chunk_size: usize,

    /// EDINET list retry attempts
    #[arg(long, env = "KS_BATCH_RETRY_COUNT", default_value_t = 3)]
    retry_count: u32,

    /// Per-chunk retry attempts on lock contention
    #[arg(long, env = "KS_BATCH_DB_RETRY_COUNT", default_value_t = 3)]
    db_retry_count: u32,

    /// Abort the batch on the first failed chunk instead of skipping it
    #[arg(long)]
    stop_on_error: bool,

    /// Emit the summary event the notification relay listens for
    #[arg(long)]
    send_notification: bool,
}

fn parse_hhmm(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw, "%H:%M").map_err(|e| format!("expected HH:MM: {e}"))
}

impl Cli {
    fn date_selection(&self) -> DateSelection {
        if let Some(date) = self.date {
            DateSelection::Explicit(date)
        } else if self.today {
            DateSelection::Today
        } else if self.yesterday {
            DateSelection::Yesterday
        } else {
            DateSelection::Auto
        }
    }

    fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            date: self.date_selection(),
            auto_date_mode: self.auto_date_mode,
            night_batch_time: self.night_batch_time,
            force: self.force,
            chunk_size: self.chunk_size,
            retry_count: self.retry_count,
            db_retry_count: self.db_retry_count,
            stop_on_error: self.stop_on_error,
            company_update_mode: self.company_update_mode,
            send_notification: self.send_notification,
        }
    }
}

#[derive(Debug, Error)]
enum BatchCliError {
    #[error("database pool error: {0}")]
    Pool(#[from] DbPoolError),
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("edinet client error: {0}")]
    Edinet(#[from] EdinetError),
    #[error(transparent)]
    Batch(#[from] BatchError),
}

async fn run(cli: Cli) -> Result<(), BatchCliError> {
    let pool = create_pool_from_url_checked(&cli.database_url).await?;
    run_migrations(&pool).await?;

    let edinet = EdinetClient::new(EdinetConfig::from_env())?;
    let options = cli.batch_options();

    match run_daily_batch(&pool, &edinet, &options).await? {
        BatchRun::Completed(outcome) => {
            info!(
                batch_date = %outcome.target_date,
                listed = outcome.listed,
                inserted = outcome.inserted,
                updated = outcome.updated,
                "daily batch finished"
            );
        }
        BatchRun::SkippedAlreadySucceeded { batch_date } => {
            info!(%batch_date, "nothing to do");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error!(error = %err, "daily batch failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_date_flag_wins() {
        let cli = Cli::parse_from([
            "ks-edinet-batch",
            "--database-url",
            "postgres://localhost/kaiseki",
            "--date",
            "2024-05-15",
        ]);
        assert_eq!(
            cli.date_selection(),
            DateSelection::Explicit(NaiveDate::from_ymd_opt(2024, 5, 15).unwrap())
        );
    }

    #[test]
    fn today_and_yesterday_flags_map_to_selections() {
        let cli = Cli::parse_from([
            "ks-edinet-batch",
            "--database-url",
            "postgres://localhost/kaiseki",
            "--today",
        ]);
        assert_eq!(cli.date_selection(), DateSelection::Today);

        let cli = Cli::parse_from([
            "ks-edinet-batch",
            "--database-url",
            "postgres://localhost/kaiseki",
            "--yesterday",
        ]);
        assert_eq!(cli.date_selection(), DateSelection::Yesterday);
    }

    #[test]
    fn no_date_flags_means_auto() {
        let cli = Cli::parse_from([
            "ks-edinet-batch",
            "--database-url",
            "postgres://localhost/kaiseki",
        ]);
        assert_eq!(cli.date_selection(), DateSelection::Auto);
        assert_eq!(cli.auto_date_mode, AutoDateMode::TimeBased);
        assert_eq!(cli.chunk_size, 100);
    }

    #[test]
    fn conflicting_date_flags_are_rejected() {
        let result = Cli::try_parse_from([
            "ks-edinet-batch",
            "--database-url",
            "postgres://localhost/kaiseki",
            "--date",
            "2024-05-15",
            "--today",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn night_batch_time_parses_hhmm() {
        assert_eq!(
            parse_hhmm("23:30").unwrap(),
            NaiveTime::from_hms_opt(23, 30, 0).unwrap()
        );
        assert!(parse_hhmm("25:00").is_err());
    }
}
