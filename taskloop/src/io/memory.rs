//! Write-mostly lesson log in `Memory/decisions.md`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use super::clock;

pub const MEMORY_HEADER: &str =
    "# Decisions & Lessons\n\n| Date | Task | Lesson |\n|------|------|--------|\n";

#[derive(Debug, Clone)]
pub struct MemoryLog {
    path: PathBuf,
}

impl MemoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append a `| date | task | lesson |` row, creating the table on first use.
    pub fn append(&self, task_id: &str, lesson: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut row = String::new();
        if !self.path.exists() {
            row.push_str(MEMORY_HEADER);
        }
        row.push_str(&format!(
            "| {} | {} | {} |\n",
            clock::today().format("%Y-%m-%d"),
            cell(task_id),
            cell(lesson)
        ));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(row.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))
    }
}

fn cell(value: &str) -> String {
    value
        .replace(['\r', '\n'], " ")
        .replace('|', "\\|")
        .trim()
        .to_string()
}
