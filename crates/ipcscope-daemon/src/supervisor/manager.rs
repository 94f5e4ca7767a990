//! IPC demo process lifecycle manager.
//!
//! Spawns demo programs, feeds their stdin, decodes their output into events,
//! keeps the mechanism mirror current and accounts for their exit.
//!
//! Per child there is one stdin writer task, one reader task per output
//! stream, and one monitor task that owns the `Child`. A reader decodes,
//! reconciles and publishes each line in order. The monitor waits for the
//! exit, lets the readers drain, then finalizes the record. Nothing for a
//! process is published after its `exit` event.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ipcscope_core::config::{MirrorConfig, SupervisorConfig};
use ipcscope_core::decode::{DecodedLine, LineSplitter, decode_line};
use ipcscope_core::{
    Category, Envelope, MechanismMirror, ProcessId, Role, Source, StateReconciler, unix_millis,
};

use super::error::SupervisorError;
use super::record::{
    OutputLine, OutputLog, OutputStream, ProcessDetail, ProcessRecord, ProcessStatus,
    ProcessSummary,
};
use super::resolve;
use crate::bus::EventBus;

const READ_CHUNK: usize = 8 * 1024;
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Supervisor for IPC demo processes.
#[derive(Clone)]
pub struct ProcessSupervisor {
    ctx: Arc<SupervisorContext>,
}

/// Everything the supervisor's tasks share.
struct SupervisorContext {
    records: RwLock<HashMap<ProcessId, ProcessRecord>>,
    reconciler: RwLock<StateReconciler>,
    bus: Arc<EventBus>,
    config: SupervisorConfig,
    backend_dir: PathBuf,
    next_id: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(
        backend_dir: PathBuf,
        config: SupervisorConfig,
        mirror: MirrorConfig,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            ctx: Arc::new(SupervisorContext {
                records: RwLock::new(HashMap::new()),
                reconciler: RwLock::new(StateReconciler::new(mirror)),
                bus,
                config,
                backend_dir,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.ctx.bus
    }

    pub fn backend_dir(&self) -> &Path {
        &self.ctx.backend_dir
    }

    /// Start `program` of `category` with `args`.
    ///
    /// Resolution and spawn failures are returned to the caller; no record is
    /// created and nothing is published for them.
    pub async fn start(
        &self,
        category: Category,
        program: &str,
        args: Vec<String>,
    ) -> Result<ProcessId, SupervisorError> {
        let ctx = &self.ctx;
        let path = resolve::resolve_program(&ctx.backend_dir, category, program)?;
        let role = Role::resolve(category, program);

        let mut cmd = Command::new(&path);
        cmd.args(&args)
            .current_dir(path.parent().unwrap_or(&ctx.backend_dir))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Role check and registration happen under one lock so two concurrent
        // starts cannot both take the same role.
        let mut records = ctx.records.write().await;
        if role.is_exclusive() && !ctx.config.allow_duplicate_roles {
            if let Some(holder) = records.values().find(|r| r.role == role && r.is_live()) {
                return Err(SupervisorError::RoleBusy {
                    role,
                    id: holder.id,
                });
            }
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            program: program.to_string(),
            reason: e.to_string(),
        })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(SupervisorError::SpawnFailed {
                program: program.to_string(),
                reason: "Failed to capture stdio".to_string(),
            });
        };

        let id = ProcessId::new(ctx.next_id.fetch_add(1, Ordering::Relaxed));
        let pid = child.id();
        let (stdin_tx, stdin_rx) = mpsc::channel(ctx.config.command_queue.max(1));
        let (kill_tx, kill_rx) = oneshot::channel();
        let record = ProcessRecord {
            id,
            category,
            program: program.to_string(),
            role,
            args,
            pid,
            status: ProcessStatus::Starting,
            exit_code: None,
            started_at: unix_millis(),
            ended_at: None,
            output: OutputLog::new(ctx.config.output_log_lines),
            stdin_tx,
            kill_tx: Some(kill_tx),
            stop_requested: false,
            reaped: false,
        };
        let source = record.source();
        info!(
            process_id = %id,
            category = %category,
            program,
            args = ?record.args,
            pid = ?pid,
            "Process started"
        );
        records.insert(id, record);
        drop(records);

        let snapshot = {
            let mut reconciler = ctx.reconciler.write().await;
            reconciler.mark_started(role);
            reconciler.snapshot(category)
        };
        if let Some(record) = ctx.records.write().await.get_mut(&id) {
            record.advance(ProcessStatus::Running);
        }
        ctx.bus
            .publish(&Envelope::state_update(source.clone(), true, snapshot))
            .await;

        tokio::spawn(write_stdin(id, stdin, stdin_rx));
        let readers = [
            tokio::spawn(read_output(
                Arc::clone(ctx),
                source.clone(),
                role,
                OutputStream::Stdout,
                stdout,
            )),
            tokio::spawn(read_output(
                Arc::clone(ctx),
                source.clone(),
                role,
                OutputStream::Stderr,
                stderr,
            )),
        ];
        tokio::spawn(monitor(Arc::clone(ctx), source, role, child, readers, kill_rx));

        Ok(id)
    }

    /// Queue `command` for the process's stdin. Fire-and-forget.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn send_command(&self, id: ProcessId, command: &str) -> Result<(), SupervisorError> {
        let line = command.trim_end_matches(['\r', '\n']).to_string();
        let records = self.ctx.records.read().await;
        let record = records
            .get(&id)
            .filter(|r| r.accepts_requests())
            .ok_or(SupervisorError::ProcessNotFound { id })?;

        match record.stdin_tx.try_send(line) {
            Ok(()) => {
                debug!(process_id = %id, command, "Command queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(process_id = %id, "Command queue full");
                Err(SupervisorError::CommandQueueFull { id })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SupervisorError::ProcessNotFound { id })
            }
        }
    }

    /// Ask the process to terminate; escalate to a forced kill if it is still
    /// alive after the grace window. Returns once the request is sent; the
    /// `exit` event reports completion.
    pub async fn stop(&self, id: ProcessId) -> Result<(), SupervisorError> {
        let (pid, first_request) = {
            let mut records = self.ctx.records.write().await;
            let record = records
                .get_mut(&id)
                .filter(|r| r.accepts_requests())
                .ok_or(SupervisorError::ProcessNotFound { id })?;
            (record.pid, !std::mem::replace(&mut record.stop_requested, true))
        };

        info!(process_id = %id, pid = ?pid, "Stopping process");
        if !send_terminate(id, pid) {
            self.ctx.force_kill(id).await;
            return Ok(());
        }

        if first_request {
            let ctx = Arc::clone(&self.ctx);
            let grace = ctx.config.terminate_timeout();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if ctx.force_kill(id).await {
                    warn!(
                        process_id = %id,
                        grace_ms = grace.as_millis(),
                        "Process still running after grace window, killed"
                    );
                }
            });
        }
        Ok(())
    }

    /// All retained records, oldest first.
    pub async fn list_processes(&self) -> Vec<ProcessSummary> {
        let mut summaries: Vec<ProcessSummary> = self
            .ctx
            .records
            .read()
            .await
            .values()
            .map(ProcessRecord::summary)
            .collect();
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    /// One record with its retained output.
    pub async fn process(&self, id: ProcessId) -> Option<ProcessDetail> {
        let records = self.ctx.records.read().await;
        records.get(&id).map(|r| ProcessDetail {
            summary: r.summary(),
            output: r.output.snapshot(),
        })
    }

    pub async fn live_count(&self) -> usize {
        self.ctx
            .records
            .read()
            .await
            .values()
            .filter(|r| r.is_live())
            .count()
    }

    /// Runnable programs per category.
    pub fn list_programs(&self) -> BTreeMap<Category, Vec<String>> {
        resolve::list_programs(&self.ctx.backend_dir)
    }

    pub async fn mirror(&self) -> MechanismMirror {
        self.ctx.reconciler.read().await.mirror().clone()
    }

    /// Stop every live process and wait, bounded, for them to exit.
    pub async fn shutdown(&self) {
        let live: Vec<ProcessId> = self
            .ctx
            .records
            .read()
            .await
            .values()
            .filter(|r| r.is_live())
            .map(|r| r.id)
            .collect();
        if live.is_empty() {
            return;
        }

        info!(count = live.len(), "Stopping live processes");
        for id in live {
            if let Err(e) = self.stop(id).await {
                debug!(process_id = %id, error = %e, "Process already gone");
            }
        }

        let limit = self.ctx.config.terminate_timeout()
            + self.ctx.config.drain_timeout()
            + Duration::from_secs(1);
        let wait = async {
            while self.live_count().await > 0 {
                tokio::time::sleep(SHUTDOWN_POLL).await;
            }
        };
        if tokio::time::timeout(limit, wait).await.is_err() {
            warn!(remaining = self.live_count().await, "Processes still alive at shutdown deadline");
        }
    }
}

impl SupervisorContext {
    /// Fire the forced-kill trigger of a live record. Returns whether it fired.
    async fn force_kill(&self, id: ProcessId) -> bool {
        let kill_tx = self
            .records
            .write()
            .await
            .get_mut(&id)
            .filter(|r| r.accepts_requests())
            .and_then(|r| r.kill_tx.take());
        kill_tx.is_some_and(|tx| tx.send(()).is_ok())
    }

    async fn append_output(&self, id: ProcessId, stream: OutputStream, line: &str) {
        if let Some(record) = self.records.write().await.get_mut(&id) {
            record.output.push(OutputLine {
                stream,
                line: line.to_string(),
                timestamp: unix_millis(),
            });
        }
    }

    async fn handle_line(&self, source: &Source, role: Role, stream: OutputStream, line: String) {
        self.append_output(source.process_id, stream, &line).await;
        match stream {
            OutputStream::Stderr => {
                debug!(process_id = %source.process_id, "stderr: {}", line);
                self.bus.publish(&Envelope::error(source.clone(), line)).await;
            }
            OutputStream::Stdout => self.handle_stdout(source, role, line).await,
        }
    }

    async fn handle_stdout(&self, source: &Source, role: Role, line: String) {
        let record = match decode_line(&line) {
            DecodedLine::Structured(record) if record.kind.route(source.category).is_some() => {
                record
            }
            DecodedLine::Structured(record) => {
                debug!(
                    process_id = %source.process_id,
                    kind = ?record.kind,
                    "Unrecognized record type, forwarding as text"
                );
                self.bus.publish(&Envelope::output(source.clone(), line)).await;
                return;
            }
            DecodedLine::Freeform(text) => {
                self.bus.publish(&Envelope::output(source.clone(), text)).await;
                return;
            }
        };

        let update = {
            let mut reconciler = self.reconciler.write().await;
            reconciler
                .apply(source.category, role, &record)
                .then(|| reconciler.snapshot(source.category))
        };
        self.bus
            .publish(&Envelope::json_output(source.clone(), record.raw))
            .await;
        if let Some(state) = update {
            self.bus
                .publish(&Envelope::state_update(source.clone(), true, state))
                .await;
        }
    }

    async fn finalize(&self, source: &Source, role: Role, status: io::Result<ExitStatus>) {
        let (exit_code, description) = describe_exit(&status);
        let id = source.process_id;

        let role_still_held = {
            let mut records = self.records.write().await;
            if let Some(record) = records.get_mut(&id) {
                record.advance(ProcessStatus::Exited);
                record.exit_code = exit_code;
                record.ended_at = Some(unix_millis());
                record.kill_tx = None;
            }
            records.values().any(|r| r.role == role && r.is_live())
        };
        let snapshot = {
            let mut reconciler = self.reconciler.write().await;
            if !role_still_held {
                reconciler.mark_stopped(role);
            }
            reconciler.snapshot(source.category)
        };

        info!(process_id = %id, exit_code = ?exit_code, "{description}");
        self.bus
            .publish(&Envelope::exit(source.clone(), exit_code, description))
            .await;
        self.bus
            .publish(&Envelope::state_update(source.clone(), false, snapshot))
            .await;
    }
}

async fn write_stdin(id: ProcessId, mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        if let Err(e) = stdin.write_all(&bytes).await {
            warn!(process_id = %id, error = %e, "Failed to write to stdin");
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!(process_id = %id, error = %e, "Failed to flush stdin");
            break;
        }
    }
    debug!(process_id = %id, "stdin writer finished");
}

async fn read_output<R>(
    ctx: Arc<SupervisorContext>,
    source: Source,
    role: Role,
    stream: OutputStream,
    mut reader: R,
) where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&chunk[..n]) {
                    ctx.handle_line(&source, role, stream, line).await;
                }
            }
            Err(e) => {
                warn!(process_id = %source.process_id, ?stream, error = %e, "Output read failed");
                break;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        ctx.handle_line(&source, role, stream, line).await;
    }
    debug!(process_id = %source.process_id, ?stream, "Output reader finished");
}

async fn monitor(
    ctx: Arc<SupervisorContext>,
    source: Source,
    role: Role,
    mut child: Child,
    readers: [JoinHandle<()>; 2],
    mut kill_rx: oneshot::Receiver<()>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            if let Err(e) = child.start_kill() {
                error!(process_id = %source.process_id, error = %e, "Failed to kill process");
            }
            child.wait().await
        }
    };
    if let Some(record) = ctx.records.write().await.get_mut(&source.process_id) {
        record.mark_reaped();
    }

    let deadline = tokio::time::Instant::now() + ctx.config.drain_timeout();
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            debug!(process_id = %source.process_id, "Output reader did not drain in time");
            reader.abort();
            let _ = reader.await;
        }
    }

    ctx.finalize(&source, role, status).await;

    tokio::time::sleep(ctx.config.exit_retention()).await;
    ctx.records.write().await.remove(&source.process_id);
    debug!(process_id = %source.process_id, "Process record removed");
}

/// Exit code and a human-readable description.
fn describe_exit(status: &io::Result<ExitStatus>) -> (Option<i32>, String) {
    match status {
        Ok(status) => {
            if let Some(code) = status.code() {
                return (Some(code), format!("Process exited with code {code}"));
            }
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return (None, format!("Process terminated by signal {signal}"));
                }
            }
            (None, "Process exited".to_string())
        }
        Err(e) => (None, format!("Failed to wait for process: {e}")),
    }
}

/// Send SIGTERM. Returns `false` when there is no graceful path.
#[cfg(unix)]
fn send_terminate(id: ProcessId, pid: Option<u32>) -> bool {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; pid belongs to a
    // child this supervisor spawned.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
    if ret != 0 {
        let err = io::Error::last_os_error();
        warn!(process_id = %id, pid, error = %err, "Failed to send SIGTERM");
        return false;
    }
    true
}

#[cfg(not(unix))]
const fn send_terminate(_id: ProcessId, _pid: Option<u32>) -> bool {
    false
}
