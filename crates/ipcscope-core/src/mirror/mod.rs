//! Mechanism mirror and the reconciler that keeps it current.

mod reconciler;
mod state;

pub use reconciler::StateReconciler;
pub use state::{
    CategoryState, MechanismMirror, MemoryState, PipeState, Semaphore, SocketClientState,
    SocketServerState, SocketState,
};
