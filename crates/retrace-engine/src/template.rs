//! `{{ name }}` placeholder rendering for data-driven replays.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use retrace_common::protocol::Action;
use std::collections::HashMap;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}").expect("placeholder regex");
}

pub type Variables = HashMap<String, String>;

/// Substitute known placeholders. Unknown ones are left verbatim.
pub fn render(input: &str, vars: &Variables) -> String {
    if vars.is_empty() || !input.contains("{{") {
        return input.to_string();
    }
    PLACEHOLDER
        .replace_all(input, |caps: &Captures| match vars.get(&caps[1]) {
            Some(v) => v.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Names referenced by placeholders in `input`, in order of appearance.
pub fn placeholders(input: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(input)
        .map(|c| c[1].to_string())
        .collect()
}

/// Render the selector, value and url of an action.
pub fn render_action(action: &Action, vars: &Variables) -> Action {
    if vars.is_empty() {
        return action.clone();
    }
    match action {
        Action::Click {
            selector,
            timestamp,
            context,
        } => Action::Click {
            selector: render(selector, vars),
            timestamp: *timestamp,
            context: context.clone(),
        },
        Action::Fill {
            selector,
            value,
            timestamp,
            context,
        } => Action::Fill {
            selector: render(selector, vars),
            value: render(value, vars),
            timestamp: *timestamp,
            context: context.clone(),
        },
        Action::Goto {
            url,
            timestamp,
            context,
        } => Action::Goto {
            url: render(url, vars),
            timestamp: *timestamp,
            context: context.clone(),
        },
    }
}

/// Convert one data row (a JSON object) into variables. Non-string scalars
/// are rendered with their JSON text; nested values are skipped.
pub fn variables_from_row(row: &serde_json::Map<String, serde_json::Value>) -> Variables {
    row.iter()
        .filter_map(|(k, v)| {
            let s = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => String::new(),
                _ => return None,
            };
            Some((k.clone(), s))
        })
        .collect()
}
