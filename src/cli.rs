use std::time::Duration;

use anyhow::Result;
use camino::Utf8PathBuf as PathBuf;
use clap::Parser;

use crate::{
    context::StoreConfig,
    storage::RetryPolicy,
    types::WorkType,
    worker::handlers::{ChartUpload, HandlerConfig},
};

#[derive(Parser, Clone)]
#[command(version)]
pub struct Args {
    /// Directory to keep the dataset, the database and rendered charts in (defaults to cwd)
    #[clap(
        long,
        env,
        value_name = "DIR",
        default_value = ".",
        hide_default_value(true)
    )]
    pub data_dir: PathBuf,

    /// SQLite database shared by the API and the workers (defaults to <DATA_DIR>/jobs.db)
    #[clap(long, env, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Current dataset in `year,spots` lines (defaults to <DATA_DIR>/sunspots.csv)
    #[clap(long, env, value_name = "FILE")]
    pub dataset_file: Option<PathBuf>,

    /// Dataset to start from when there is no dataset file yet
    #[clap(long, env, value_name = "FILE", default_value = "data/sunspots.csv")]
    pub seed_file: PathBuf,

    /// Port to listen on
    #[clap(short, long, env, default_value_t = 5000)]
    pub port: u16,

    #[command(subcommand)]
    pub mode: Mode,

    /// Pause between attempts to reach the database at startup
    #[clap(long, env, hide(true), value_parser = parse_seconds, default_value = "3")]
    pub connect_retry_interval_sec: Duration,

    /// Give up reaching the database after this many attempts (retries forever if unset)
    #[clap(long, env, hide(true))]
    pub connect_max_attempts: Option<u32>,

    /// How often idle workers look for jobs queued by other processes
    #[clap(long, env, hide(true), value_parser = parse_millis, default_value = "500")]
    pub queue_poll_interval_ms: Duration,

    /// Where graph jobs save their charts (defaults to <DATA_DIR>/charts)
    #[clap(long, env, value_name = "DIR")]
    pub chart_dir: Option<PathBuf>,

    /// Image host to upload charts to. Charts are only kept locally if unset
    #[clap(long, env, value_name = "URL")]
    pub chart_upload_url: Option<String>,

    /// `Authorization` header value for the image host
    #[clap(long, env, hide(true))]
    pub chart_upload_auth: Option<String>,

    #[clap(long, env, hide(true))]
    pub sentry_dsn: Option<String>,

    #[clap(long, env, hide(true), default_value_t = 0.001)]
    pub sentry_traces_sample_rate: f32,

    /// Log span durations
    #[clap(long, env, hide(true))]
    pub log_span_durations: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Queue to take jobs from
    #[clap(long, env, value_enum)]
    pub work_type: WorkType,

    /// Number of jobs of this type processed concurrently
    #[clap(long, env, default_value_t = 1)]
    pub replicas: usize,
}

#[derive(clap::Subcommand, Clone)]
pub enum Mode {
    /// Serve the HTTP API
    Api,
    /// Process jobs of one type
    Worker(WorkerArgs),
    /// Serve the HTTP API and process jobs of every type in one process
    All,
}

impl Args {
    /// Resolves the paths left unset to their places under `data_dir`.
    pub fn fill_defaults(&mut self) {
        self.database = Some(self.database_path());
        self.dataset_file = Some(self.dataset_path());
        self.chart_dir = Some(self.chart_path());
        tracing::debug!(
            "Using database '{}', dataset '{}'",
            self.database_path(),
            self.dataset_path()
        );
    }

    fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("jobs.db"))
    }

    fn dataset_path(&self) -> PathBuf {
        self.dataset_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("sunspots.csv"))
    }

    fn chart_path(&self) -> PathBuf {
        self.chart_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("charts"))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            database: self.database_path(),
            dataset_file: self.dataset_path(),
            queue_poll_interval: self.queue_poll_interval_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: self.connect_retry_interval_sec,
            max_attempts: self.connect_max_attempts,
        }
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            chart_dir: self.chart_path(),
            chart_upload: self.chart_upload_url.clone().map(|url| ChartUpload {
                url,
                authorization: self.chart_upload_auth.clone(),
            }),
        }
    }
}

fn parse_seconds(s: &str) -> Result<Duration> {
    Ok(Duration::from_secs(s.parse()?))
}

fn parse_millis(s: &str) -> Result<Duration> {
    Ok(Duration::from_millis(s.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_data_dir() {
        let mut args = Args::parse_from(["sunspot-jobs", "--data-dir", "/var/lib/spots", "api"]);
        args.fill_defaults();
        let config = args.store_config();
        assert_eq!(config.database, "/var/lib/spots/jobs.db");
        assert_eq!(config.dataset_file, "/var/lib/spots/sunspots.csv");
        assert_eq!(config.queue_poll_interval, Duration::from_millis(500));
        assert_eq!(args.retry_policy().interval, Duration::from_secs(3));
        assert_eq!(args.handler_config().chart_dir, "/var/lib/spots/charts");
        assert!(args.handler_config().chart_upload.is_none());
    }

    #[test]
    fn test_explicit_paths_win_over_data_dir() {
        let mut args = Args::parse_from([
            "sunspot-jobs",
            "--data-dir",
            "/var/lib/spots",
            "--database",
            "/tmp/other.db",
            "--chart-dir",
            "/tmp/charts",
            "all",
        ]);
        args.fill_defaults();
        assert_eq!(args.database, Some("/tmp/other.db".into()));
        assert_eq!(args.dataset_file, Some("/var/lib/spots/sunspots.csv".into()));
        assert_eq!(args.store_config().database, "/tmp/other.db");
        assert_eq!(args.handler_config().chart_dir, "/tmp/charts");
    }

    #[test]
    fn test_worker_mode() {
        let args = Args::parse_from([
            "sunspot-jobs",
            "--chart-upload-url",
            "https://images.example/upload",
            "worker",
            "--work-type",
            "graph",
            "--replicas",
            "3",
        ]);
        match &args.mode {
            Mode::Worker(worker) => {
                assert_eq!(worker.work_type, WorkType::Graph);
                assert_eq!(worker.replicas, 3);
            }
            _ => panic!("expected worker mode"),
        }
        let upload = args.handler_config().chart_upload.unwrap();
        assert_eq!(upload.url, "https://images.example/upload");
        assert_eq!(upload.authorization, None);
    }

    #[test]
    fn test_unknown_work_type_is_rejected() {
        assert!(Args::try_parse_from(["sunspot-jobs", "worker", "--work-type", "plot"]).is_err());
    }
}
