//! ipcscope Daemon Library
//!
//! Core functionality for the ipcscope daemon:
//! - Supervision of IPC demo processes (spawn, commands, two-phase stop)
//! - Event bus fanning decoded output and mirror changes out to viewers
//! - HTTP/SSE edge for remote callers

pub mod bus;
pub mod server;
pub mod supervisor;
