//! Mechanism categories and program roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One of the three simulated IPC mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Pipes,
    Sockets,
    SharedMemory,
}

impl Category {
    pub const ALL: [Self; 3] = [Self::Pipes, Self::Sockets, Self::SharedMemory];

    /// Wire name, also the sub-directory of the backend tree holding the demos.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pipes => "pipes",
            Self::Sockets => "sockets",
            Self::SharedMemory => "shared_memory",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipes" | "pipe" => Ok(Self::Pipes),
            "sockets" | "socket" => Ok(Self::Sockets),
            "shared_memory" | "memory" => Ok(Self::SharedMemory),
            other => Err(Error::UnknownCategory(other.to_string())),
        }
    }
}

/// The executable variant within a category.
///
/// Derived from the category and program name; the mirror keeps one slot per
/// exclusive role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    PipeMonitor,
    SocketServer,
    SocketClient,
    MemoryManager,
    /// A program in a category with no dedicated mirror slot.
    Other(Category),
}

impl Role {
    pub fn resolve(category: Category, program: &str) -> Self {
        match category {
            Category::Pipes => Self::PipeMonitor,
            Category::Sockets => match program {
                "server" => Self::SocketServer,
                "client" => Self::SocketClient,
                _ => Self::Other(Category::Sockets),
            },
            Category::SharedMemory => Self::MemoryManager,
        }
    }

    pub const fn category(self) -> Category {
        match self {
            Self::PipeMonitor => Category::Pipes,
            Self::SocketServer | Self::SocketClient => Category::Sockets,
            Self::MemoryManager => Category::SharedMemory,
            Self::Other(category) => category,
        }
    }

    /// Whether at most one live process should hold this role.
    pub const fn is_exclusive(self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PipeMonitor => f.write_str("pipe monitor"),
            Self::SocketServer => f.write_str("socket server"),
            Self::SocketClient => f.write_str("socket client"),
            Self::MemoryManager => f.write_str("shared-memory manager"),
            Self::Other(category) => write!(f, "{category} program"),
        }
    }
}
