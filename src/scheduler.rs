//! Daily backup scheduling
//!
//! Runs the backup pipeline once a day at a fixed local time until the
//! process is interrupted. Each run is independent; a failed backup is logged
//! and the scheduler waits for the next slot.

use crate::backup::BackupPipeline;
use crate::config::VaultConfig;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use tracing::{error, info, warn};

/// Parse a `HH:MM` time of day
pub fn parse_daily_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| Error::Scheduling {
        reason: format!("Invalid time '{}', expected HH:MM: {}", value, e),
    })
}

/// Next occurrence of `at` strictly after `now`.
///
/// Local times skipped by a DST transition fall through to the next day.
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let today = now.date_naive();

    for days_ahead in 0..=2 {
        let candidate = (today + Duration::days(days_ahead)).and_time(at);
        if let Some(next) = now.timezone().from_local_datetime(&candidate).earliest() {
            if next > *now {
                return next;
            }
        }
    }

    now.clone() + Duration::days(1)
}

/// Runs [`BackupPipeline`] every day at `config.schedule_at`
pub struct DailyScheduler {
    config: VaultConfig,
    at: NaiveTime,
}

impl DailyScheduler {
    pub fn new(config: VaultConfig) -> Result<Self> {
        let at = parse_daily_time(&config.schedule_at)?;
        Ok(Self { config, at })
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// Loop until Ctrl+C
    pub async fn run(self) -> Result<()> {
        info!("Scheduler started: daily backup at {}", self.at.format("%H:%M"));

        loop {
            let now = Local::now();
            let next = next_daily_run(&now, self.at);
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next backup at {}", next.format("%Y-%m-%d %H:%M:%S"));

            tokio::select! {
                _ = tokio::time::sleep(wait) => self.run_once().await,
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!("Failed to listen for Ctrl+C: {}", e);
                    }
                    info!("Scheduler stopped.");
                    return Ok(());
                }
            }
        }
    }

    async fn run_once(&self) {
        let pipeline = BackupPipeline::from_config(self.config.clone());
        match tokio::task::spawn_blocking(move || pipeline.run()).await {
            Ok(Ok(report)) => info!("Scheduled backup written to {}", report.artifact.display()),
            Ok(Err(e)) => error!("Scheduled backup failed: {}", e),
            Err(e) => error!("Scheduled backup task panicked: {}", e),
        }
    }
}
