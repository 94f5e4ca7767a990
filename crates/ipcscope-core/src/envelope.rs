//! Outward event envelopes.
//!
//! Every message sent to a subscriber is one self-describing JSON object whose
//! `type` selects the variant:
//!
//! ```json
//! {"type":"output","processId":"3","category":"pipes","program":"pipe_monitor","data":"...","timestamp":1714557600000}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::category::Category;
use crate::mirror::CategoryState;
use crate::unix_millis;

/// Supervisor-assigned process identifier. Rendered as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u64);

impl ProcessId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for ProcessId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProcessId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = ProcessId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a process id as a string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ProcessId(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// Where an event came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub process_id: ProcessId,
    pub category: Category,
    pub program: String,
}

/// Payload of a `state_update` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateUpdate {
    pub category: Category,
    pub program: String,
    pub running: bool,
    pub state: CategoryState,
}

/// One outward message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Freeform stdout line, or a record with an unrecognized discriminator.
    Output {
        #[serde(flatten)]
        source: Source,
        data: String,
        timestamp: u64,
    },
    /// One stderr line.
    Error {
        #[serde(flatten)]
        source: Source,
        data: String,
        timestamp: u64,
    },
    Exit {
        #[serde(flatten)]
        source: Source,
        data: String,
        exit_code: Option<i32>,
        timestamp: u64,
    },
    /// A recognized structured record, payload as parsed.
    JsonOutput {
        #[serde(flatten)]
        source: Source,
        data: Value,
        timestamp: u64,
    },
    StateUpdate {
        #[serde(flatten)]
        source: Source,
        data: StateUpdate,
        timestamp: u64,
    },
    /// First message on every subscription.
    Connected {
        message: String,
        subscriber_id: String,
        timestamp: u64,
    },
}

impl Envelope {
    pub fn output(source: Source, line: impl Into<String>) -> Self {
        Self::Output {
            source,
            data: line.into(),
            timestamp: unix_millis(),
        }
    }

    pub fn error(source: Source, line: impl Into<String>) -> Self {
        Self::Error {
            source,
            data: line.into(),
            timestamp: unix_millis(),
        }
    }

    pub fn exit(source: Source, exit_code: Option<i32>, description: impl Into<String>) -> Self {
        Self::Exit {
            source,
            data: description.into(),
            exit_code,
            timestamp: unix_millis(),
        }
    }

    pub fn json_output(source: Source, record: Value) -> Self {
        Self::JsonOutput {
            source,
            data: record,
            timestamp: unix_millis(),
        }
    }

    pub fn state_update(source: Source, running: bool, state: CategoryState) -> Self {
        let data = StateUpdate {
            category: source.category,
            program: source.program.clone(),
            running,
            state,
        };
        Self::StateUpdate {
            source,
            data,
            timestamp: unix_millis(),
        }
    }

    pub fn connected(subscriber_id: impl Into<String>) -> Self {
        Self::Connected {
            message: "Connected to the IPC event stream".to_string(),
            subscriber_id: subscriber_id.into(),
            timestamp: unix_millis(),
        }
    }

    /// Wire name of the variant.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Output { .. } => "output",
            Self::Error { .. } => "error",
            Self::Exit { .. } => "exit",
            Self::JsonOutput { .. } => "json_output",
            Self::StateUpdate { .. } => "state_update",
            Self::Connected { .. } => "connected",
        }
    }
}
