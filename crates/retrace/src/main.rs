mod record;
mod replay;

use clap::{Parser, Subcommand};
use retrace_engine::config::{ConfigLoader, RetraceConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retrace", version, about = "Record browser sessions and replay them")]
struct Args {
    /// Config file (defaults to ./retrace.yaml, then ~/.retrace/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record user interactions into an action log
    Record {
        /// Write the exported log here when the session ends
        #[arg(long, global = true)]
        out: Option<PathBuf>,

        #[command(subcommand)]
        host: RecordHost,
    },
    /// Replay an action log against a browser
    Replay {
        /// Action log produced by `record`
        #[arg(long)]
        file: PathBuf,

        /// Template variable, `name=value` (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Data rows, one replay each: a `.csv` table or a JSON array of objects
        #[arg(long)]
        data: Option<PathBuf>,

        /// Write the step reports as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write one CSV line per replayed step, across all runs
        #[arg(long)]
        actions_log: Option<PathBuf>,

        /// Save a screenshot of each skipped or failed step under this directory
        #[arg(long)]
        screenshots: Option<PathBuf>,

        /// Override the start URL
        #[arg(long)]
        start_url: Option<String>,

        /// Override the per-action element wait
        #[arg(long)]
        wait_timeout_ms: Option<u64>,

        /// Override the post-click navigation wait
        #[arg(long)]
        navigation_timeout_ms: Option<u64>,

        /// Override the delay between actions
        #[arg(long)]
        pacing_ms: Option<u64>,

        #[command(subcommand)]
        driver: ReplayDriver,
    },
}

#[derive(Subcommand)]
pub(crate) enum RecordHost {
    /// Record in a Chromium page driven over CDP
    Headless {
        /// Launch browser in visible mode (not headless)
        #[arg(long)]
        visible: bool,

        /// Page to open before recording
        #[arg(long)]
        url: String,
    },
    /// Accept page events from a remote host (browser extension) over WebSocket
    Remote {
        /// WebSocket port
        #[arg(long, default_value_t = retrace_r::server::DEFAULT_PORT)]
        port: u16,
    },
}

#[derive(Subcommand)]
pub(crate) enum ReplayDriver {
    /// Use headless browser (Chromium) via CDP
    Headless {
        #[arg(long)]
        visible: bool,
    },
    /// Use a WebDriver endpoint
    Embedded {
        /// WebDriver URL (defaults to http://localhost:4444)
        #[arg(long)]
        driver_url: Option<String>,
    },
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{}'", s)),
    }
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RetraceConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_from(path).await?,
        None => ConfigLoader::load_default().await?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the REPL and reports.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref()).await?;

    match args.command {
        Command::Record { out, host } => record::run(&config, host, out).await,
        Command::Replay {
            file,
            vars,
            data,
            report,
            actions_log,
            screenshots,
            start_url,
            wait_timeout_ms,
            navigation_timeout_ms,
            pacing_ms,
            driver,
        } => {
            let mut config = config;
            let overrides = &mut config.replay;
            overrides.start_url = start_url.or(overrides.start_url.take());
            overrides.wait_timeout_ms = wait_timeout_ms.unwrap_or(overrides.wait_timeout_ms);
            overrides.navigation_timeout_ms =
                navigation_timeout_ms.unwrap_or(overrides.navigation_timeout_ms);
            overrides.pacing_ms = pacing_ms.unwrap_or(overrides.pacing_ms);

            let job = replay::ReplayJob {
                file,
                vars: vars.into_iter().collect(),
                data,
                report,
                actions_log,
                screenshots,
            };
            replay::run(&config, job, driver).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("user=alice").unwrap(),
            ("user".to_string(), "alice".to_string())
        );
        assert_eq!(
            parse_var("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_cli_shape() {
        let args = Args::try_parse_from([
            "retrace",
            "replay",
            "--file",
            "log.json",
            "--var",
            "a=1",
            "--var",
            "b=2",
            "--data",
            "users.csv",
            "--actions-log",
            "actions_log.csv",
            "--screenshots",
            "shots",
            "embedded",
            "--driver-url",
            "http://localhost:9515",
        ])
        .unwrap();
        match args.command {
            Command::Replay {
                vars,
                actions_log,
                screenshots,
                driver,
                ..
            } => {
                assert_eq!(vars.len(), 2);
                assert_eq!(actions_log, Some(PathBuf::from("actions_log.csv")));
                assert_eq!(screenshots, Some(PathBuf::from("shots")));
                assert!(matches!(driver, ReplayDriver::Embedded { driver_url: Some(_) }));
            }
            _ => panic!("expected replay"),
        }

        let args = Args::try_parse_from(["retrace", "record", "remote"]).unwrap();
        match args.command {
            Command::Record {
                host: RecordHost::Remote { port },
                out,
            } => {
                assert_eq!(port, retrace_r::server::DEFAULT_PORT);
                assert!(out.is_none());
            }
            _ => panic!("expected record remote"),
        }
    }
}
