//! Applies decoded records to the mechanism mirror.
//!
//! Exact discriminator and field matches come first. Keyword matching on the
//! human-readable `message` is a fallback for cues the demos only express in
//! prose (the socket demos, for instance, never say "connected" in a field).
//!
//! Lifecycle flags are owned by the supervisor: only [`StateReconciler::mark_started`]
//! and [`StateReconciler::mark_stopped`] touch them.

use tracing::trace;

use super::state::{CategoryState, MechanismMirror, Semaphore};
use crate::category::{Category, Role};
use crate::config::MirrorConfig;
use crate::decode::{Record, RecordFields, RecordKind};

const PIPE_WRITE_WORDS: &[&str] = &["escrita", "written"];
const PIPE_READ_WORDS: &[&str] = &["leitura"];
const PIPE_CLOSE_WORDS: &[&str] = &["fechando", "closing"];

const SOCKET_ESTABLISHED_WORDS: &[&str] = &["conectado ao servidor", "connected to server"];
const SOCKET_CLOSED_WORDS: &[&str] = &["fechada", "fechou a conexão", "closed"];
const SOCKET_RESET_WORDS: &[&str] = &["resetado", "reset"];

const SEMAPHORE_RELEASE_WORDS: &[&str] = &["liberado", "released"];

/// Prefix of the acknowledgement the pipe monitor prints after a write.
const PIPE_ACK_PREFIX: &str = "bytes=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipeCue {
    Write(u64),
    Acknowledged,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketCue {
    Established,
    Closed,
    Reset,
}

/// Owner of the [`MechanismMirror`].
#[derive(Debug, Default)]
pub struct StateReconciler {
    mirror: MechanismMirror,
    config: MirrorConfig,
}

impl StateReconciler {
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            mirror: MechanismMirror::default(),
            config,
        }
    }

    pub const fn mirror(&self) -> &MechanismMirror {
        &self.mirror
    }

    pub fn snapshot(&self, category: Category) -> CategoryState {
        self.mirror.category(category)
    }

    /// Apply one record printed by a process of `origin` category and `role`.
    ///
    /// Returns `true` if the mirror changed.
    pub fn apply(&mut self, origin: Category, role: Role, record: &Record) -> bool {
        let Some(target) = record.kind.route(origin) else {
            return false;
        };
        // A record only describes the mechanism of the program that printed it.
        if target != origin {
            return false;
        }

        let changed = match target {
            Category::Pipes => self.apply_pipe(record),
            Category::Sockets => self.apply_socket(role, record),
            Category::SharedMemory => self.apply_memory(record),
        };
        if changed {
            trace!(category = %target, kind = ?record.kind, "Mirror updated");
        }
        changed
    }

    /// Lifecycle hook: a process holding `role` is now running.
    pub fn mark_started(&mut self, role: Role) -> bool {
        let flag = match role {
            Role::PipeMonitor => &mut self.mirror.pipes.running,
            Role::SocketServer => &mut self.mirror.sockets.server.running,
            Role::SocketClient => &mut self.mirror.sockets.client.running,
            Role::MemoryManager => &mut self.mirror.shared_memory.manager_running,
            Role::Other(_) => return false,
        };
        !std::mem::replace(flag, true)
    }

    /// Lifecycle hook: the process holding `role` has exited. Resets whatever
    /// that process owned.
    pub fn mark_stopped(&mut self, role: Role) -> bool {
        let before = self.mirror.clone();
        match role {
            Role::PipeMonitor => {
                self.mirror.pipes.running = false;
                self.mirror.pipes.buffer = 0;
            }
            Role::SocketServer => {
                let sockets = &mut self.mirror.sockets;
                sockets.server.running = false;
                sockets.server.connections = 0;
                sockets.client.connected = false;
            }
            Role::SocketClient => {
                let sockets = &mut self.mirror.sockets;
                sockets.client.running = false;
                if std::mem::take(&mut sockets.client.connected) {
                    sockets.server.connections = sockets.server.connections.saturating_sub(1);
                }
            }
            Role::MemoryManager => {
                self.mirror.shared_memory.manager_running = false;
                self.mirror.shared_memory.reset();
            }
            Role::Other(_) => {}
        }
        before != self.mirror
    }

    fn apply_pipe(&mut self, record: &Record) -> bool {
        let Some(cue) = self.pipe_cue(record) else {
            return false;
        };
        let pipes = &mut self.mirror.pipes;
        let before = pipes.buffer;
        match cue {
            PipeCue::Write(bytes) => pipes.buffer = pipes.buffer.saturating_add(bytes),
            PipeCue::Read => pipes.buffer = pipes.buffer.saturating_sub(self.config.pipe_read_unit),
            PipeCue::Acknowledged => {}
        }
        before != pipes.buffer
    }

    fn pipe_cue(&self, record: &Record) -> Option<PipeCue> {
        let fields = &record.fields;
        match record.kind {
            RecordKind::PipeWrite => Some(self.write_cue(fields)),
            RecordKind::PipeRead => Some(PipeCue::Read),
            RecordKind::Pipe | RecordKind::Process if !fields.mentions(PIPE_CLOSE_WORDS) => {
                if fields.mentions(PIPE_WRITE_WORDS) {
                    Some(self.write_cue(fields))
                } else if fields.mentions(PIPE_READ_WORDS) {
                    Some(PipeCue::Read)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Payload length when the record carries the written text, nothing for
    /// the `bytes=<n>` acknowledgement of a write already counted, the default
    /// unit otherwise.
    fn write_cue(&self, fields: &RecordFields) -> PipeCue {
        match fields.data.as_deref() {
            Some(data)
                if data
                    .strip_prefix(PIPE_ACK_PREFIX)
                    .is_some_and(|n| n.parse::<u64>().is_ok()) =>
            {
                PipeCue::Acknowledged
            }
            Some(data) if !data.is_empty() => PipeCue::Write(data.len() as u64),
            _ => PipeCue::Write(self.config.pipe_default_unit),
        }
    }

    fn apply_socket(&mut self, role: Role, record: &Record) -> bool {
        let Some(cue) = socket_cue(role, record) else {
            return false;
        };
        let sockets = &mut self.mirror.sockets;
        match cue {
            SocketCue::Established => {
                sockets.client.connected = true;
                sockets.server.connections = sockets.server.connections.saturating_add(1);
                true
            }
            SocketCue::Closed => {
                if sockets.client.connected {
                    sockets.client.connected = false;
                    sockets.server.connections = sockets.server.connections.saturating_sub(1);
                    true
                } else {
                    false
                }
            }
            SocketCue::Reset => std::mem::take(&mut sockets.client.connected),
        }
    }

    fn apply_memory(&mut self, record: &Record) -> bool {
        let fields = &record.fields;
        let memory = &mut self.mirror.shared_memory;
        let before = memory.clone();
        match &record.kind {
            RecordKind::MemoryState(snapshot) => {
                memory.counter = snapshot.counter;
                memory.last_writer.clone_from(&snapshot.last_writer);
                if let Some(available) = snapshot.semaphore_available {
                    memory.semaphore = if available {
                        Semaphore::Unlocked
                    } else {
                        Semaphore::Locked
                    };
                }
            }
            RecordKind::Write => {
                memory.counter = memory.counter.saturating_add(1);
                memory.last_writer = Some(writer_identity(fields));
                memory.semaphore = Semaphore::Locked;
            }
            RecordKind::Read => memory.semaphore = Semaphore::Unlocked,
            RecordKind::Semaphore if fields.mentions(SEMAPHORE_RELEASE_WORDS) => {
                memory.semaphore = Semaphore::Unlocked;
            }
            _ => {}
        }
        before != *memory
    }
}

fn socket_cue(role: Role, record: &Record) -> Option<SocketCue> {
    let fields = &record.fields;
    match record.kind {
        RecordKind::Connection => {
            let from_client = match fields.component.as_deref() {
                Some(component) => component == "client",
                None => role == Role::SocketClient,
            };
            if from_client && fields.mentions(SOCKET_ESTABLISHED_WORDS) {
                Some(SocketCue::Established)
            } else if fields.mentions(SOCKET_CLOSED_WORDS) {
                Some(SocketCue::Closed)
            } else {
                None
            }
        }
        RecordKind::System if fields.mentions(SOCKET_RESET_WORDS) => Some(SocketCue::Reset),
        _ => None,
    }
}

fn writer_identity(fields: &RecordFields) -> String {
    fields
        .pid
        .map(|pid| pid.to_string())
        .or_else(|| fields.process.clone())
        .or_else(|| fields.component.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::decode::parse_line;
    use crate::mirror::state::MemoryState;

    fn record(json: &str) -> Record {
        parse_line(json).unwrap()
    }

    fn pipe_write(data: &str) -> Record {
        record(&format!(
            r#"{{"type":"pipe_write","process":"parent","pid":10,"message":"Escrevendo no pipe","data":"{data}"}}"#
        ))
    }

    fn pipe_read() -> Record {
        record(r#"{"type":"pipe_read","process":"child","pid":11,"message":"Mensagem recebida","data":"x"}"#)
    }

    #[test]
    fn pipe_write_adds_payload_length_then_read_floors_at_zero() {
        let mut reconciler = StateReconciler::default();
        assert!(reconciler.apply(Category::Pipes, Role::PipeMonitor, &pipe_write("hello world!")));
        assert_eq!(reconciler.mirror().pipes.buffer, 12);

        assert!(reconciler.apply(Category::Pipes, Role::PipeMonitor, &pipe_read()));
        assert_eq!(reconciler.mirror().pipes.buffer, 2);

        assert!(reconciler.apply(Category::Pipes, Role::PipeMonitor, &pipe_read()));
        assert_eq!(reconciler.mirror().pipes.buffer, 0);

        assert!(!reconciler.apply(Category::Pipes, Role::PipeMonitor, &pipe_read()));
        assert_eq!(reconciler.mirror().pipes.buffer, 0);
    }

    #[test]
    fn pipe_write_without_payload_uses_default_unit() {
        let mut reconciler = StateReconciler::default();
        let cue = record(r#"{"type":"pipe_write","message":"Escrevendo no pipe"}"#);
        reconciler.apply(Category::Pipes, Role::PipeMonitor, &cue);
        assert_eq!(reconciler.mirror().pipes.buffer, 10);
    }

    #[test]
    fn pipe_write_acknowledgement_is_not_counted_twice() {
        let mut reconciler = StateReconciler::default();
        reconciler.apply(Category::Pipes, Role::PipeMonitor, &pipe_write("abc"));
        let ack = record(r#"{"type":"pipe_write","message":"Mensagem escrita com sucesso","data":"bytes=3"}"#);
        assert!(!reconciler.apply(Category::Pipes, Role::PipeMonitor, &ack));
        assert_eq!(reconciler.mirror().pipes.buffer, 3);
    }

    #[test]
    fn pipe_level_tracks_running_sum_clamped_at_zero() {
        let mut reconciler = StateReconciler::default();
        let payloads = ["a", "", "0123456789abcdef", "xy", "hello"];
        let mut expected: u64 = 0;
        for step in 0..40usize {
            if step % 3 == 2 {
                reconciler.apply(Category::Pipes, Role::PipeMonitor, &pipe_read());
                expected = expected.saturating_sub(10);
            } else {
                let payload = payloads[step % payloads.len()];
                let cue = if payload.is_empty() {
                    record(r#"{"type":"pipe_write","message":"Escrevendo no pipe"}"#)
                } else {
                    pipe_write(payload)
                };
                reconciler.apply(Category::Pipes, Role::PipeMonitor, &cue);
                expected += if payload.is_empty() { 10 } else { payload.len() as u64 };
            }
            assert_eq!(reconciler.mirror().pipes.buffer, expected, "step {step}");
        }
    }

    #[test]
    fn pipe_keyword_fallback_ignores_close_messages() {
        let mut reconciler = StateReconciler::default();
        let written = record(r#"{"type":"pipe","message":"Dados em escrita"}"#);
        assert!(reconciler.apply(Category::Pipes, Role::PipeMonitor, &written));
        let closing = record(r#"{"type":"pipe","message":"Fechando extremidade de escrita"}"#);
        assert!(!reconciler.apply(Category::Pipes, Role::PipeMonitor, &closing));
        let instruction = record(
            r#"{"type":"instruction","message":"Comandos disponíveis: create_pipe, send <message>, read"}"#,
        );
        assert!(!reconciler.apply(Category::Pipes, Role::PipeMonitor, &instruction));
        assert_eq!(reconciler.mirror().pipes.buffer, 10);
    }

    #[test]
    fn client_connection_cue_updates_both_ends() {
        let mut reconciler = StateReconciler::default();
        let connected = record(
            r#"{"type":"connection","component":"client","message":"Conectado ao servidor","data":"/tmp/demo_socket"}"#,
        );
        assert!(reconciler.apply(Category::Sockets, Role::SocketClient, &connected));
        let sockets = &reconciler.mirror().sockets;
        assert!(sockets.client.connected);
        assert_eq!(sockets.server.connections, 1);
    }

    #[test]
    fn server_side_announcement_does_not_double_count() {
        let mut reconciler = StateReconciler::default();
        let accepted =
            record(r#"{"type":"connection","component":"server","client_id":1,"message":"Cliente conectado"}"#);
        assert!(!reconciler.apply(Category::Sockets, Role::SocketServer, &accepted));
        assert_eq!(reconciler.mirror().sockets.server.connections, 0);
    }

    #[test]
    fn close_applies_only_when_connected() {
        let mut reconciler = StateReconciler::default();
        let closed = record(r#"{"type":"connection","component":"client","message":"Conexão fechada"}"#);
        assert!(!reconciler.apply(Category::Sockets, Role::SocketClient, &closed));

        let connected =
            record(r#"{"type":"connection","component":"client","message":"Conectado ao servidor"}"#);
        reconciler.apply(Category::Sockets, Role::SocketClient, &connected);
        assert!(reconciler.apply(Category::Sockets, Role::SocketClient, &closed));
        let sockets = &reconciler.mirror().sockets;
        assert!(!sockets.client.connected);
        assert_eq!(sockets.server.connections, 0);

        // The server's own close notice arrives after the client's.
        let server_closed = record(
            r#"{"type":"connection","component":"server","client_id":1,"message":"Conexão com cliente fechada"}"#,
        );
        assert!(!reconciler.apply(Category::Sockets, Role::SocketServer, &server_closed));
        assert_eq!(reconciler.mirror().sockets.server.connections, 0);
    }

    #[test]
    fn reset_clears_client_connection() {
        let mut reconciler = StateReconciler::default();
        let connected =
            record(r#"{"type":"connection","component":"client","message":"Conectado ao servidor"}"#);
        reconciler.apply(Category::Sockets, Role::SocketClient, &connected);
        let reset = record(r#"{"type":"system","message":"Estado resetado"}"#);
        assert!(reconciler.apply(Category::Sockets, Role::SocketClient, &reset));
        assert!(!reconciler.mirror().sockets.client.connected);
        assert_eq!(reconciler.mirror().sockets.server.connections, 1);
    }

    #[test]
    fn stopping_server_clears_connection_state() {
        let mut reconciler = StateReconciler::default();
        reconciler.mark_started(Role::SocketServer);
        reconciler.mark_started(Role::SocketClient);
        let connected =
            record(r#"{"type":"connection","component":"client","message":"Conectado ao servidor"}"#);
        reconciler.apply(Category::Sockets, Role::SocketClient, &connected);

        assert!(reconciler.mark_stopped(Role::SocketServer));
        let sockets = &reconciler.mirror().sockets;
        assert!(!sockets.server.running);
        assert_eq!(sockets.server.connections, 0);
        assert!(!sockets.client.connected);
        assert!(sockets.client.running);
    }

    #[test]
    fn memory_write_then_manager_stop() {
        let mut reconciler = StateReconciler::default();
        reconciler.mark_started(Role::MemoryManager);
        let write = record(
            r#"{"type":"write","process":"writer","pid":321,"message":"Dados escritos na memória","data":"abc"}"#,
        );
        assert!(reconciler.apply(Category::SharedMemory, Role::MemoryManager, &write));
        let memory = &reconciler.mirror().shared_memory;
        assert_eq!(memory.counter, 1);
        assert_eq!(memory.last_writer.as_deref(), Some("321"));
        assert_eq!(memory.semaphore, Semaphore::Locked);

        assert!(reconciler.mark_stopped(Role::MemoryManager));
        assert_eq!(reconciler.mirror().shared_memory, MemoryState::default());
    }

    #[test]
    fn memory_release_and_read_unlock() {
        let mut reconciler = StateReconciler::default();
        let write = record(r#"{"type":"write","process":"writer","message":"Dados escritos","data":"abc"}"#);
        reconciler.apply(Category::SharedMemory, Role::MemoryManager, &write);
        assert_eq!(reconciler.mirror().shared_memory.last_writer.as_deref(), Some("writer"));

        let acquired = record(r#"{"type":"semaphore","message":"Semáforo obtido - escrevendo"}"#);
        assert!(!reconciler.apply(Category::SharedMemory, Role::MemoryManager, &acquired));

        let released = record(r#"{"type":"semaphore","message":"Semáforo liberado"}"#);
        assert!(reconciler.apply(Category::SharedMemory, Role::MemoryManager, &released));
        assert_eq!(reconciler.mirror().shared_memory.semaphore, Semaphore::Unlocked);

        reconciler.apply(Category::SharedMemory, Role::MemoryManager, &write);
        let read = record(r#"{"type":"read","message":"Dados lidos da memória","data":"abc"}"#);
        assert!(reconciler.apply(Category::SharedMemory, Role::MemoryManager, &read));
        assert_eq!(reconciler.mirror().shared_memory.semaphore, Semaphore::Unlocked);
        assert_eq!(reconciler.mirror().shared_memory.counter, 2);
    }

    #[test]
    fn snapshot_overwrites_counter_and_writer() {
        let mut reconciler = StateReconciler::default();
        let snapshot = record(
            r#"{"type":"memory_state","memory":{"counter":9,"last_writer":55},"semaphore":{"available":false}}"#,
        );
        assert!(reconciler.apply(Category::SharedMemory, Role::MemoryManager, &snapshot));
        let memory = &reconciler.mirror().shared_memory;
        assert_eq!(memory.counter, 9);
        assert_eq!(memory.last_writer.as_deref(), Some("55"));
        assert_eq!(memory.semaphore, Semaphore::Locked);
    }

    #[test]
    fn records_from_other_categories_are_ignored() {
        let mut reconciler = StateReconciler::default();
        let write = record(r#"{"type":"write","message":"looks like shared memory","data":"abc"}"#);
        assert!(!reconciler.apply(Category::Sockets, Role::SocketClient, &write));
        assert_eq!(reconciler.mirror().shared_memory.counter, 0);
    }

    #[test]
    fn lifecycle_flags_follow_hooks() {
        let mut reconciler = StateReconciler::default();
        assert!(reconciler.mark_started(Role::PipeMonitor));
        assert!(!reconciler.mark_started(Role::PipeMonitor));
        reconciler.apply(Category::Pipes, Role::PipeMonitor, &pipe_write("abc"));
        assert!(reconciler.mark_stopped(Role::PipeMonitor));
        assert!(!reconciler.mirror().pipes.running);
        assert_eq!(reconciler.mirror().pipes.buffer, 0);
        assert!(!reconciler.mark_started(Role::Other(Category::Sockets)));
    }

    #[test]
    fn counters_saturate_instead_of_overflowing() {
        let mut reconciler = StateReconciler::default();
        let snapshot = record(&format!(
            r#"{{"type":"memory_state","memory":{{"counter":{},"last_writer":1}},"semaphore":{{"available":true}}}}"#,
            u64::MAX
        ));
        reconciler.apply(Category::SharedMemory, Role::MemoryManager, &snapshot);
        let write = record(r#"{"type":"write","pid":2,"message":"Dados escritos","data":"abc"}"#);
        assert!(reconciler.apply(Category::SharedMemory, Role::MemoryManager, &write));
        assert_eq!(reconciler.mirror().shared_memory.counter, u64::MAX);

        reconciler.mirror.sockets.server.connections = u64::MAX;
        let connect = record(
            r#"{"type":"connection","component":"client","message":"Conectado ao servidor"}"#,
        );
        assert!(reconciler.apply(Category::Sockets, Role::SocketClient, &connect));
        assert_eq!(reconciler.mirror().sockets.server.connections, u64::MAX);
    }
}
