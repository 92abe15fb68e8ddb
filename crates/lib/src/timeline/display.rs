//! Text rendering of timeline entries. Truncation here never touches stored values.

use chrono::Local;
use serde_json::{Map, Value};

use super::correlator::{TimelineEntry, ToolCallEvent, ToolStatus};

const PARAM_LIMIT: usize = 30;
const RESULT_LIMIT: usize = 100;

/// Keep at most `limit` chars; longer text becomes `limit - 3` chars plus `...`.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// `stockLookup` -> `Stock Lookup`
pub fn format_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            out.push(' ');
            out.push(ch);
        } else if i == 0 {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
    }
    out.trim().to_string()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `key: value, key: value`; string values over 30 chars are shortened.
pub fn format_parameters(params: &Map<String, Value>) -> String {
    params
        .iter()
        .map(|(key, value)| {
            let shown = match value {
                Value::String(s) => truncate(s, PARAM_LIMIT),
                other => value_text(other),
            };
            format!("{}: {}", key, shown)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Display text for a completed call's result; `None` when there is nothing to show.
pub fn format_result(result: &Value) -> Option<String> {
    match result {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(truncate(s, RESULT_LIMIT)),
        other => Some(value_text(other)),
    }
}

fn status_marker(status: ToolStatus) -> &'static str {
    match status {
        ToolStatus::Calling => "…",
        ToolStatus::Completed => "✓",
        ToolStatus::Failed => "✗",
    }
}

fn render_tool(call: &ToolCallEvent, lines: &mut Vec<String>) {
    let mut head = format!(
        "{} {}",
        status_marker(call.status),
        format_tool_name(&call.tool_name)
    );
    if let Some(ms) = call.duration {
        head.push_str(&format!(" ({}ms)", ms));
    }
    lines.push(head);
    if !call.parameters.is_empty() {
        lines.push(format!("    {}", format_parameters(&call.parameters)));
    }
    match call.status {
        ToolStatus::Completed => {
            if let Some(text) = call.result.as_ref().and_then(format_result) {
                lines.push(format!("    Result: {}", text));
            }
        }
        ToolStatus::Failed => {
            if let Some(err) = &call.error {
                lines.push(format!("    Error: {}", truncate(err, RESULT_LIMIT)));
            }
        }
        ToolStatus::Calling => {}
    }
}

/// Lines for one entry, the first one prefixed with local wall-clock time.
pub fn render_entry(entry: &TimelineEntry<'_>) -> Vec<String> {
    let clock = entry.timestamp().with_timezone(&Local).format("%H:%M:%S");
    let mut lines = Vec::new();
    match entry {
        TimelineEntry::Reasoning(step) => lines.push(format!("Reasoning: {}", step.content)),
        TimelineEntry::Tool(call) => render_tool(call, &mut lines),
    }
    if let Some(first) = lines.first_mut() {
        *first = format!("[{}] {}", clock, first);
    }
    lines
}

pub fn render_timeline(entries: &[TimelineEntry<'_>]) -> Vec<String> {
    entries.iter().flat_map(render_entry).collect()
}
