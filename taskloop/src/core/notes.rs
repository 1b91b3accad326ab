//! Markdown sections appended to task bodies (results, decisions, failures).

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

const EXECUTION_RESULT_TEMPLATE: &str = include_str!("templates/execution_result.md");
const NOTE_TEMPLATE: &str = include_str!("templates/note.md");

/// Data for the `## Execution Loop Result` block.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult<'a> {
    pub status: &'a str,
    pub timestamp: &'a str,
    pub iterations: u32,
    pub max_iterations: u32,
    pub completed: &'a [String],
    pub remaining: &'a [String],
    pub blocked_on: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub last_error: Option<&'a str>,
}

/// A headed note with a timestamp line and `**Label:** value` fields.
#[derive(Debug, Clone)]
pub struct Note {
    heading: String,
    stamp_label: String,
    timestamp: String,
    fields: Vec<(String, String)>,
    text: Option<String>,
}

impl Note {
    pub fn new(heading: &str, stamp_label: &str, timestamp: &str) -> Self {
        Self {
            heading: heading.to_string(),
            stamp_label: stamp_label.to_string(),
            timestamp: timestamp.to_string(),
            fields: Vec::new(),
            text: None,
        }
    }

    pub fn field(mut self, label: &str, value: impl Into<String>) -> Self {
        self.fields.push((label.to_string(), value.into()));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn render(&self) -> Result<String> {
        NoteEngine::new().render_note(self)
    }
}

struct NoteEngine {
    env: Environment<'static>,
}

impl NoteEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("execution_result", EXECUTION_RESULT_TEMPLATE)
            .expect("execution result template should be valid");
        env.add_template("note", NOTE_TEMPLATE)
            .expect("note template should be valid");
        Self { env }
    }

    fn render_note(&self, note: &Note) -> Result<String> {
        let template = self.env.get_template("note")?;
        let rendered = template.render(context! {
            heading => &note.heading,
            stamp_label => &note.stamp_label,
            timestamp => &note.timestamp,
            fields => &note.fields,
            text => note.text.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered.trim_end().to_string())
    }

    fn render_execution_result(&self, result: &ExecutionResult<'_>) -> Result<String> {
        let template = self.env.get_template("execution_result")?;
        let rendered = template.render(result)?;
        Ok(rendered.trim_end().to_string())
    }
}

pub fn render_execution_result(result: &ExecutionResult<'_>) -> Result<String> {
    NoteEngine::new().render_execution_result(result)
}

/// One-line retry marker appended below earlier retries.
pub fn retry_line(attempt: u32, timestamp: &str, reason: &str) -> String {
    format!("- **Retry {attempt} At:** {timestamp} ({})", reason.trim())
}
