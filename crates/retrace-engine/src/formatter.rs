use crate::replay::{ReplayReport, StepStatus};
use retrace_common::protocol::{Action, ControlResponse};

pub fn format_action(action: &Action) -> String {
    match action {
        Action::Click { selector, .. } => format!("click {}", selector),
        Action::Fill {
            selector, value, ..
        } => format!("fill {} = {:?}", selector, value),
        Action::Goto { url, .. } => format!("goto {}", url),
    }
}

pub fn format_response(resp: &ControlResponse) -> String {
    if !resp.ok {
        return format!("Error: {}", resp.error.as_deref().unwrap_or("unknown error"));
    }
    if let Some(json) = &resp.json {
        return json.clone();
    }
    if let Some(actions) = &resp.actions {
        if actions.is_empty() {
            return "No actions recorded.".to_string();
        }
        let mut output = format!("{} action(s):", actions.len());
        for (i, action) in actions.iter().enumerate() {
            output.push_str(&format!("\n{:>3}. {}", i, format_action(action)));
        }
        return output;
    }
    match resp.active {
        Some(true) => "OK (recording)".to_string(),
        Some(false) => "OK (idle)".to_string(),
        None => "OK".to_string(),
    }
}

pub fn format_report(report: &ReplayReport) -> String {
    let mut output = String::new();
    if let Some(url) = &report.start_url {
        output.push_str(&format!("Start: {}\n", url));
    }
    for step in &report.steps {
        let target = step
            .selector
            .as_deref()
            .or(step.url.as_deref())
            .unwrap_or("");
        output.push_str(&format!(
            "[{:>3}] {:<5} {:<9} {}",
            step.index,
            step.kind.to_string(),
            step.status.to_string(),
            target
        ));
        if let Some(note) = &step.note
            && step.status != StepStatus::Navigated
        {
            output.push_str(&format!(" ({})", note));
        }
        if let Some(path) = &step.screenshot {
            output.push_str(&format!(" [{}]", path));
        }
        output.push('\n');
    }
    output.push_str(&format!(
        "{} step(s): {} performed, {} navigated, {} skipped, {} failed",
        report.steps.len(),
        report.count(StepStatus::Performed),
        report.count(StepStatus::Navigated),
        report.skipped(),
        report.failed()
    ));
    output
}
