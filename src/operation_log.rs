//! Append-only record of every side-effecting action of a run.
//!
//! Each recorded `Operation` goes to three places, in this order:
//! the in-memory list, the caller's callback, and the durable log file.
//! Writing the file is best-effort; a failed append never reaches the caller.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

/// Bytes of captured output kept per operation (the tail).
pub const OUTPUT_TAIL_BYTES: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationAction {
    Create,
    Modify,
    Delete,
    Copy,
    Mount,
    Unmount,
    Execute,
}

/// One logged action. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub timestamp: DateTime<Utc>,
    pub action: OperationAction,
    /// Affected path, or the command line for `Execute`.
    pub path: String,
    pub purpose: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl Operation {
    pub fn succeeded(action: OperationAction, path: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            path: path.into(),
            purpose: purpose.into(),
            success: true,
            error: None,
            output: None,
        }
    }

    pub fn failed(
        action: OperationAction,
        path: impl Into<String>,
        purpose: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::succeeded(action, path, purpose)
        }
    }

    /// Attach captured output, keeping only its last `OUTPUT_TAIL_BYTES`.
    /// Empty output is not attached.
    pub fn with_output(mut self, output: &str) -> Self {
        if !output.is_empty() {
            self.output = Some(tail_truncate(output, OUTPUT_TAIL_BYTES).to_string());
        }
        self
    }

    /// `[ts] ACTION path - purpose (SUCCESS|FAILED: reason)` plus an output block.
    pub fn format_log_entry(&self) -> String {
        let status = if self.success {
            "SUCCESS".to_string()
        } else {
            format!("FAILED: {}", self.error.as_deref().unwrap_or("unknown error"))
        };
        let mut entry = format!(
            "[{}] {} {} - {} ({})\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.action.to_string().to_uppercase(),
            self.path,
            self.purpose,
            status
        );
        if let Some(output) = &self.output {
            entry.push_str("--- OUTPUT ---\n");
            entry.push_str(output);
            if !output.ends_with('\n') {
                entry.push('\n');
            }
            entry.push_str("--- END OUTPUT ---\n");
        }
        entry
    }
}

/// Last `max_bytes` of `text`, moved forward to the next char boundary.
pub fn tail_truncate(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// The run's operation list plus its two mirrors.
pub struct OperationLog<'a> {
    log_path: PathBuf,
    operations: Vec<Operation>,
    on_operation: Box<dyn FnMut(&Operation) + 'a>,
}

impl<'a> OperationLog<'a> {
    pub fn new(log_path: impl Into<PathBuf>, on_operation: impl FnMut(&Operation) + 'a) -> Self {
        Self {
            log_path: log_path.into(),
            operations: Vec::new(),
            on_operation: Box::new(on_operation),
        }
    }

    /// Log without a callback; used by standalone cleanup.
    pub fn detached(log_path: impl Into<PathBuf>) -> Self {
        Self::new(log_path, |_| {})
    }

    pub fn record(&mut self, operation: Operation) {
        (self.on_operation)(&operation);
        append_to_file(&self.log_path, &operation.format_log_entry());
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

fn append_to_file(path: &Path, entry: &str) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = fs::create_dir_all(parent);
        }
    }
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(entry.as_bytes()));
    if let Err(e) = written {
        log::debug!("Could not append to operation log {:?}: {}", path, e);
    }
}
