//! Process supervision for IPC demo programs.

mod error;
mod manager;
mod record;
pub mod resolve;

pub use error::SupervisorError;
pub use manager::ProcessSupervisor;
pub use record::{
    OutputLine, OutputLog, OutputStream, ProcessDetail, ProcessStatus, ProcessSummary,
};
