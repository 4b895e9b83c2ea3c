use crate::ReplayDriver;
use anyhow::{Context, bail};
use retrace_e::EmbeddedDriver;
use retrace_engine::config::RetraceConfig;
use retrace_engine::driver::Driver;
use retrace_engine::formatter::format_report;
use retrace_engine::protocol::Session;
use retrace_engine::replay::{ReplayEngine, ReplayOptions, ReplayReport};
use retrace_engine::template::{Variables, variables_from_row};
use retrace_h::HeadlessDriver;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct ReplayJob {
    pub file: PathBuf,
    pub vars: Variables,
    pub data: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub actions_log: Option<PathBuf>,
    pub screenshots: Option<PathBuf>,
}

const ACTIONS_LOG_HEADER: [&str; 9] = [
    "run_index",
    "row",
    "action_index",
    "type",
    "selector",
    "value",
    "status",
    "note",
    "screenshot",
];

async fn load_session(path: &Path) -> anyhow::Result<Session> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Session::from_json(&json).with_context(|| format!("{} is not an action log", path.display()))
}

/// One variable set per replay run. Without a data file that is just the
/// `--var` set; otherwise each row layered under the `--var` values. Files
/// ending in `.csv` are read as a header row plus data rows, anything else as
/// a JSON array of objects.
async fn load_runs(data: Option<&Path>, vars: &Variables) -> anyhow::Result<Vec<Variables>> {
    let Some(path) = data else {
        return Ok(vec![vars.clone()]);
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let rows = if is_csv {
        csv_rows(&bytes).with_context(|| format!("{} is not a valid CSV table", path.display()))?
    } else {
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_slice(&bytes)
            .with_context(|| format!("{} must be a JSON array of objects", path.display()))?;
        rows.iter().map(variables_from_row).collect()
    };
    Ok(layer_rows(rows, vars))
}

/// Header names become variable names. Cells are trimmed.
fn csv_rows(bytes: &[u8]) -> Result<Vec<Variables>, csv::Error> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes)
        .into_deserialize()
        .collect()
}

fn layer_rows(rows: Vec<Variables>, vars: &Variables) -> Vec<Variables> {
    rows.into_iter()
        .map(|mut row| {
            row.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            row
        })
        .collect()
}

/// One CSV line per replayed step, across every run.
fn write_actions_log(path: &Path, runs: &[(Variables, ReplayReport)]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    wtr.write_record(ACTIONS_LOG_HEADER)?;

    for (n, (vars, report)) in runs.iter().enumerate() {
        let row = serde_json::to_string(&vars.iter().collect::<BTreeMap<_, _>>())?;
        let run_index = (n + 1).to_string();
        for step in &report.steps {
            wtr.write_record([
                run_index.as_str(),
                row.as_str(),
                step.index.to_string().as_str(),
                step.kind.to_string().as_str(),
                step.selector.as_deref().unwrap_or(""),
                step.value.as_deref().or(step.url.as_deref()).unwrap_or(""),
                step.status.to_string().as_str(),
                step.note.as_deref().unwrap_or(""),
                step.screenshot.as_deref().unwrap_or(""),
            ])?;
        }
    }
    wtr.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub async fn run(config: &RetraceConfig, job: ReplayJob, driver: ReplayDriver) -> anyhow::Result<()> {
    let session = load_session(&job.file).await?;
    let runs = load_runs(job.data.as_deref(), &job.vars).await?;
    if runs.is_empty() {
        warn!("Data file has no rows; nothing to replay");
        return Ok(());
    }

    let options = ReplayOptions::from(&config.replay);
    let total = runs.len();

    let mut driver: Box<dyn Driver> = match driver {
        ReplayDriver::Headless { visible } => Box::new(HeadlessDriver::new_with_visibility(visible)),
        ReplayDriver::Embedded { driver_url } => match driver_url {
            Some(url) => Box::new(EmbeddedDriver::with_url(url)),
            None => Box::new(EmbeddedDriver::new()),
        },
    };
    driver.launch().await.context("Failed to launch driver")?;

    let mut completed: Vec<(Variables, ReplayReport)> = Vec::with_capacity(total);
    let mut outcome: anyhow::Result<()> = Ok(());
    for (n, vars) in runs.into_iter().enumerate() {
        info!("Replay run {} of {} action(s)", n + 1, session.len());
        let mut engine = ReplayEngine::new(options.clone()).with_variables(vars.clone());
        if let Some(dir) = &job.screenshots {
            engine = engine.with_screenshot_dir(dir.join(format!("run_{:03}", n + 1)));
        }
        match engine.run(driver.as_ref(), &session).await {
            Ok(report) => {
                println!("{}", format_report(&report));
                completed.push((vars, report));
            }
            Err(e) => {
                outcome =
                    Err(anyhow::Error::new(e).context(format!("replay run {} aborted", n + 1)));
                break;
            }
        }
    }

    let reports: Vec<&ReplayReport> = completed.iter().map(|(_, report)| report).collect();
    if let Some(path) = &job.report {
        let json = serde_json::to_string_pretty(&reports)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    if let Some(path) = &job.actions_log {
        write_actions_log(path, &completed)?;
    }
    if let Err(e) = driver.close().await {
        warn!("Failed to close driver: {}", e);
    }

    outcome?;
    let unclean = reports.iter().filter(|r| !r.is_clean()).count();
    if unclean > 0 {
        bail!("{} replay run(s) skipped or failed steps", unclean);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_vars_override_row_values() {
        let rows: Vec<Variables> = [json!({"user": "alice", "age": 30}), json!({"user": "bob"})]
            .iter()
            .map(|row| variables_from_row(row.as_object().unwrap()))
            .collect();
        let vars: Variables = [
            ("env".to_string(), "staging".to_string()),
            ("user".to_string(), "root".to_string()),
        ]
        .into();

        let runs = layer_rows(rows, &vars);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0]["user"], "root");
        assert_eq!(runs[0]["age"], "30");
        assert_eq!(runs[1]["env"], "staging");
        assert!(!runs[1].contains_key("age"));
    }

    #[tokio::test]
    async fn test_no_data_file_runs_once() {
        let vars: Variables = [("a".to_string(), "1".to_string())].into();
        let runs = load_runs(None, &vars).await.unwrap();
        assert_eq!(runs, vec![vars]);
    }

    #[tokio::test]
    async fn test_csv_data_file_gives_one_run_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.CSV");
        std::fs::write(&path, "user, password\n alice ,s3cret\nbob,\n").unwrap();
        let vars: Variables = [("env".to_string(), "staging".to_string())].into();

        let runs = load_runs(Some(&path), &vars).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0]["user"], "alice");
        assert_eq!(runs[0]["password"], "s3cret");
        assert_eq!(runs[1]["password"], "");
        assert_eq!(runs[1]["env"], "staging");
    }

    #[tokio::test]
    async fn test_ragged_csv_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        std::fs::write(&path, "user,password\nalice\n").unwrap();

        let err = load_runs(Some(&path), &Variables::new()).await.unwrap_err();
        assert!(err.to_string().contains("not a valid CSV table"));
    }

    #[test]
    fn test_actions_log_has_a_line_per_step() {
        use retrace_engine::replay::StepStatus;

        let run_report = |status: StepStatus, screenshot: Option<&str>| {
            let mut report: ReplayReport = serde_json::from_value(json!({
                "start_url": "https://shop.test/",
                "steps": [
                    {"index": 0, "type": "fill", "selector": "#q", "value": "shoes", "status": "performed"},
                    {"index": 1, "type": "click", "selector": "#buy", "status": "performed"},
                ]
            }))
            .unwrap();
            report.steps[1].status = status;
            report.steps[1].screenshot = screenshot.map(str::to_string);
            report
        };
        let runs = vec![
            (
                Variables::from([("q".to_string(), "shoes".to_string())]),
                run_report(StepStatus::Performed, None),
            ),
            (
                Variables::from([("q".to_string(), "hats".to_string())]),
                run_report(StepStatus::Skipped, Some("shots/run_002/step-001-skipped.png")),
            ),
        ];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions_log.csv");
        write_actions_log(&path, &runs).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        assert_eq!(rdr.headers().unwrap(), ACTIONS_LOG_HEADER.as_slice());
        let lines: Vec<csv::StringRecord> = rdr.records().map(Result::unwrap).collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(&lines[0][1], r#"{"q":"shoes"}"#);
        assert_eq!(&lines[0][3], "fill");
        assert_eq!(&lines[0][5], "shoes");
        assert_eq!(&lines[3][0], "2");
        assert_eq!(&lines[3][6], "skipped");
        assert_eq!(&lines[3][8], "shots/run_002/step-001-skipped.png");
    }
}
