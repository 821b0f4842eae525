use chrono::{Duration, Utc};
use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info};

use ks_common::db::{
    create_pool_from_url_checked, fail_stuck_sessions, purge_expired_sessions, PgPool,
};
use ks_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};

#[derive(Debug, Parser)]
#[command(
    name = "ks-session-sweeper",
    about = "Purge expired analysis sessions and fail stuck ones"
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Seconds between sweeps
    #[arg(long, env = "KS_SWEEP_INTERVAL_SECONDS", default_value_t = 3600)]
    sweep_interval: u64,

    /// Minutes a session may sit in PROCESSING before it is failed
    #[arg(long, env = "KS_STUCK_AFTER_MINUTES", default_value_t = 30)]
    stuck_after_minutes: i64,

    /// Run a single sweep and exit (for cron-style scheduling)
    #[arg(long)]
    once: bool,
}

async fn sweep(pool: &PgPool, stuck_after_minutes: i64) {
    let now = Utc::now();

    match fail_stuck_sessions(pool, now - Duration::minutes(stuck_after_minutes)).await {
        Ok(0) => {}
        Ok(failed) => info!(failed, "stuck processing sessions marked failed"),
        Err(err) => error!(error = %err, "failed to sweep stuck sessions"),
    }

    match purge_expired_sessions(pool, now).await {
        Ok(0) => {}
        Ok(purged) => info!(purged, "expired sessions purged"),
        Err(err) => error!(error = %err, "failed to purge expired sessions"),
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    let cli = Cli::parse();

    let pool = match create_pool_from_url_checked(&cli.database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "failed to connect to database");
            std::process::exit(1);
        }
    };

    if cli.once {
        sweep(&pool, cli.stuck_after_minutes).await;
        return;
    }

    info!(
        interval_seconds = cli.sweep_interval,
        stuck_after_minutes = cli.stuck_after_minutes,
        "session sweeper running"
    );

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(cli.sweep_interval.max(1)));
    loop {
        ticker.tick().await;
        sweep(&pool, cli.stuck_after_minutes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_hourly_with_thirty_minute_cutoff() {
        let cli = Cli::parse_from([
            "ks-session-sweeper",
            "--database-url",
            "postgres://localhost/kaiseki",
        ]);
        assert_eq!(cli.sweep_interval, 3600);
        assert_eq!(cli.stuck_after_minutes, 30);
        assert!(!cli.once);
    }

    #[test]
    fn once_flag_is_recognized() {
        let cli = Cli::parse_from([
            "ks-session-sweeper",
            "--database-url",
            "postgres://localhost/kaiseki",
            "--once",
        ]);
        assert!(cli.once);
    }
}
