//! Process records owned by the supervisor.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use ipcscope_core::{Category, ProcessId, Role, Source};

/// Lifecycle status. Only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Exited,
}

/// Which child stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
    pub timestamp: u64,
}

/// Ring buffer of the most recent output lines.
#[derive(Debug)]
pub struct OutputLog {
    lines: VecDeque<OutputLine>,
    capacity: usize,
}

impl OutputLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, line: OutputLine) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<OutputLine> {
        self.lines.iter().cloned().collect()
    }
}

/// Supervisor-side state of one child.
pub(crate) struct ProcessRecord {
    pub id: ProcessId,
    pub category: Category,
    pub program: String,
    pub role: Role,
    pub args: Vec<String>,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    pub output: OutputLog,
    pub stdin_tx: mpsc::Sender<String>,
    /// Forced-kill trigger held until the monitor task finalizes the record.
    pub kill_tx: Option<oneshot::Sender<()>>,
    pub stop_requested: bool,
    /// The OS has reported the exit; output may still be draining.
    pub reaped: bool,
}

impl ProcessRecord {
    pub fn is_live(&self) -> bool {
        self.status != ProcessStatus::Exited
    }

    /// Whether stop and stdin requests can still reach the child.
    pub fn accepts_requests(&self) -> bool {
        self.is_live() && !self.reaped
    }

    /// The child was waited on. Its pid may be reused from here on.
    pub fn mark_reaped(&mut self) {
        self.reaped = true;
        self.pid = None;
    }

    /// Move forward to `next`; an earlier status is ignored.
    pub fn advance(&mut self, next: ProcessStatus) {
        if next > self.status {
            self.status = next;
        }
    }

    pub fn source(&self) -> Source {
        Source {
            process_id: self.id,
            category: self.category,
            program: self.program.clone(),
        }
    }

    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            id: self.id,
            category: self.category,
            program: self.program.clone(),
            args: self.args.clone(),
            pid: self.pid,
            status: self.status,
            running: self.accepts_requests(),
            exit_code: self.exit_code,
            start_time: self.started_at,
            end_time: self.ended_at,
        }
    }
}

/// Public view of a process record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub id: ProcessId,
    pub category: Category,
    pub program: String,
    pub args: Vec<String>,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub running: bool,
    pub exit_code: Option<i32>,
    pub start_time: u64,
    pub end_time: Option<u64>,
}

/// A summary plus the retained output.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessDetail {
    #[serde(flatten)]
    pub summary: ProcessSummary,
    pub output: Vec<OutputLine>,
}
