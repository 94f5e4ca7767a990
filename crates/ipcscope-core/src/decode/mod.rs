//! Output decoder for IPC demo programs.
//!
//! Child stdout is newline-delimited text. Each line is either one
//! self-contained JSON record with a `type` discriminator or free text. This
//! module frames the byte stream into lines and classifies each one.

mod lines;
mod parser;
mod types;

pub use lines::{DEFAULT_MAX_LINE_BYTES, LineSplitter};
pub use parser::{decode_line, parse_line, parse_value};
pub use types::*;
