//! Per-mechanism state mirror.
//!
//! An approximation of what the demo programs are doing, for display and
//! coordination only. Never the source of truth for the OS mechanism.

use serde::{Deserialize, Serialize};

use crate::category::Category;

/// Pipe monitor mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipeState {
    pub running: bool,
    /// Bytes believed to sit in the pipe.
    pub buffer: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketServerState {
    pub running: bool,
    pub connections: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketClientState {
    pub running: bool,
    pub connected: bool,
}

/// Socket server/client mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketState {
    pub server: SocketServerState,
    pub client: SocketClientState,
}

/// Semaphore guarding the shared segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Semaphore {
    #[default]
    Unlocked,
    Locked,
}

/// Shared-memory manager mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryState {
    pub manager_running: bool,
    pub semaphore: Semaphore,
    pub last_writer: Option<String>,
    pub counter: u64,
}

impl MemoryState {
    /// Back to the state of a freshly created segment.
    pub fn reset(&mut self) {
        self.semaphore = Semaphore::Unlocked;
        self.last_writer = None;
        self.counter = 0;
    }
}

/// One category's slice of the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CategoryState {
    Pipes(PipeState),
    Sockets(SocketState),
    SharedMemory(MemoryState),
}

/// All three mirrors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanismMirror {
    pub pipes: PipeState,
    pub sockets: SocketState,
    pub shared_memory: MemoryState,
}

impl MechanismMirror {
    pub fn category(&self, category: Category) -> CategoryState {
        match category {
            Category::Pipes => CategoryState::Pipes(self.pipes.clone()),
            Category::Sockets => CategoryState::Sockets(self.sockets.clone()),
            Category::SharedMemory => CategoryState::SharedMemory(self.shared_memory.clone()),
        }
    }
}
