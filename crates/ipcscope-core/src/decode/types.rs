//! Record types emitted by the IPC demo programs.

use serde_json::Value;

use crate::category::Category;

/// One decoded output line.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    /// A self-contained record with a `type` discriminator.
    Structured(Record),
    /// Anything else, kept verbatim.
    Freeform(String),
}

/// A structured record: its discriminator, the common fields, and the raw value.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: RecordKind,
    pub fields: RecordFields,
    pub raw: Value,
}

/// Record discriminators understood by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    /// Lifecycle chatter every demo emits; belongs to the emitter's category.
    System,

    Pipe,
    PipeWrite,
    PipeRead,
    Process,
    Instruction,
    Warning,

    Socket,
    Connection,
    Send,
    Receive,
    Config,

    Shm,
    Semaphore,
    Operation,
    Write,
    Read,
    MemoryState(MemorySnapshot),

    Unknown(String),
}

impl RecordKind {
    /// Map a discriminator to its kind. `memory_state` needs the payload and is
    /// handled by the parser.
    pub fn from_discriminator(msg_type: &str) -> Self {
        match msg_type {
            "system" => Self::System,
            "pipe" => Self::Pipe,
            "pipe_write" => Self::PipeWrite,
            "pipe_read" => Self::PipeRead,
            "process" => Self::Process,
            "instruction" => Self::Instruction,
            "warning" => Self::Warning,
            "socket" => Self::Socket,
            "connection" => Self::Connection,
            "send" => Self::Send,
            "receive" => Self::Receive,
            "config" => Self::Config,
            "shm" => Self::Shm,
            "semaphore" => Self::Semaphore,
            "operation" => Self::Operation,
            "write" => Self::Write,
            "read" => Self::Read,
            "memory_state" => Self::MemoryState(MemorySnapshot::default()),
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Category this record describes, given the category of the process that
    /// printed it. `None` for unrecognized discriminators.
    pub const fn route(&self, origin: Category) -> Option<Category> {
        match self {
            Self::System => Some(origin),
            Self::Pipe
            | Self::PipeWrite
            | Self::PipeRead
            | Self::Process
            | Self::Instruction
            | Self::Warning => Some(Category::Pipes),
            Self::Socket | Self::Connection | Self::Send | Self::Receive | Self::Config => {
                Some(Category::Sockets)
            }
            Self::Shm
            | Self::Semaphore
            | Self::Operation
            | Self::Write
            | Self::Read
            | Self::MemoryState(_) => Some(Category::SharedMemory),
            Self::Unknown(_) => None,
        }
    }
}

/// Fields shared by every demo's log records. All optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFields {
    pub message: String,
    pub data: Option<String>,
    pub pid: Option<i64>,
    pub client_id: Option<i64>,
    pub component: Option<String>,
    pub process: Option<String>,
}

impl RecordFields {
    /// Case-insensitive substring match on the human-readable message.
    pub fn mentions(&self, needles: &[&str]) -> bool {
        let message = self.message.to_lowercase();
        needles.iter().any(|n| message.contains(n))
    }
}

/// Full shared-memory snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub counter: u64,
    pub last_writer: Option<String>,
    pub semaphore_available: Option<bool>,
}
