use crate::RecordHost;
use anyhow::Context;
use retrace_engine::cli::{self, OutputHandlers, ReplOptions};
use retrace_engine::config::RetraceConfig;
use retrace_engine::driver::Driver;
use retrace_engine::formatter::format_action;
use retrace_engine::protocol::{Action, ControlCommand};
use retrace_engine::recorder::Recorder;
use retrace_engine::service::{RecorderHandle, RecorderService};
use retrace_engine::storage::FileStore;
use retrace_h::HeadlessDriver;
use retrace_h::recording::{PageLocationProbe, RecordingHost};
use retrace_r::server::RemoteServer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn output() -> OutputHandlers {
    OutputHandlers {
        out: |msg| println!("{}", msg),
        err: |msg| eprintln!("{}", msg),
    }
}

fn build_recorder(config: &RetraceConfig) -> Recorder {
    let recorder = Recorder::new(&config.recorder).with_sink(|action: &Action| {
        info!("Recorded {}", format_action(action));
    });
    if config.recorder.persist {
        info!("Persisting recorder state to {}", config.storage.path.display());
        recorder.with_store(FileStore::new(config.storage.path.clone()))
    } else {
        recorder
    }
}

/// Accept `example.com` as shorthand for `https://example.com`.
fn normalize_url(input: &str) -> anyhow::Result<String> {
    match url::Url::parse(input) {
        Ok(url) => Ok(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let url = url::Url::parse(&format!("https://{}", input))
                .with_context(|| format!("invalid URL '{}'", input))?;
            Ok(url.to_string())
        }
        Err(e) => Err(e).with_context(|| format!("invalid URL '{}'", input)),
    }
}

pub async fn run(
    config: &RetraceConfig,
    host: RecordHost,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let poll_interval = Duration::from_millis(config.recorder.poll_interval_ms);
    let (service, handle) = RecorderService::new(build_recorder(config), poll_interval);

    match host {
        RecordHost::Headless { visible, url } => {
            let url = normalize_url(&url)?;
            let mut driver = HeadlessDriver::new_with_visibility(visible);
            driver.launch().await?;
            driver.goto(&url).await?;

            let page = driver
                .page()
                .context("browser page missing after launch")?
                .clone();
            let task = service
                .with_probe(Arc::new(PageLocationProbe::new(page.clone())))
                .spawn();
            let recording = RecordingHost::attach(&page, handle.clone()).await?;

            let result = session(&handle, out).await;

            recording.detach();
            drop(handle);
            task.await?;
            driver.close().await?;
            result
        }
        RecordHost::Remote { port } => {
            let task = service.spawn();
            let server = RemoteServer::new(port).start(handle.clone()).await?;
            println!("Connect the page host to ws://{}", server.local_addr);

            let result = session(&handle, out).await;

            server.shutdown();
            drop(handle);
            task.await?;
            result
        }
    }
}

async fn session(handle: &RecorderHandle, out: Option<PathBuf>) -> anyhow::Result<()> {
    let options = ReplOptions {
        banner_lines: &[
            "Recording host ready. Type 'start' to begin capturing.",
            "Commands: start, stop, clear, flush, export, get_all, exit",
        ],
        ..ReplOptions::default()
    };
    cli::run_repl(handle, output(), options)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    if let Some(path) = out {
        save_log(handle, &path).await?;
        println!("Saved action log to {}", path.display());
    }
    Ok(())
}

/// Write the session as it stands, including fills still inside their quiet
/// period.
async fn save_log(handle: &RecorderHandle, path: &Path) -> anyhow::Result<()> {
    handle.send(ControlCommand::Flush).await?;
    let response = handle.send(ControlCommand::Export).await?;
    let json = response
        .json
        .with_context(|| response.error.unwrap_or_else(|| "export failed".into()))?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
