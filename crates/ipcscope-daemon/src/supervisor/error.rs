use std::path::PathBuf;

use ipcscope_core::{Category, ProcessId, Role};

const BUILD_HINT: &str = "Execute: cd backend && make";

/// Errors from supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Program {category}/{program} not found (searched {})", searched.display())]
    ProgramNotFound {
        category: Category,
        program: String,
        searched: PathBuf,
    },

    #[error("Program is not executable: {}", path.display())]
    NotExecutable { path: PathBuf },

    #[error("Invalid program name: {program:?}")]
    InvalidProgramName { program: String },

    #[error("The {role} is already running as process {id}")]
    RoleBusy { role: Role, id: ProcessId },

    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Process not found: {id}")]
    ProcessNotFound { id: ProcessId },

    #[error("Command queue full for process {id}")]
    CommandQueueFull { id: ProcessId },
}

impl SupervisorError {
    /// Corrective hint for the caller, when there is one.
    pub const fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ProgramNotFound { .. } | Self::NotExecutable { .. } => Some(BUILD_HINT),
            Self::RoleBusy { .. } => Some("Stop the running process first"),
            Self::CommandQueueFull { .. } => Some("Wait for the process to consume its input"),
            Self::InvalidProgramName { .. }
            | Self::SpawnFailed { .. }
            | Self::ProcessNotFound { .. } => None,
        }
    }
}
