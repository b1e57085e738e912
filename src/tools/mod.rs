//! Tool execution and tool-directive parsing.
//!
//! * [`ToolRunner`]: runs shell / web / ssh / serial calls in the
//!   foreground or as tracked background tasks with a completion queue.
//! * [`ToolParser`]: pulls `<tool>` / ```` ```tool ```` / `<agent>`
//!   directives out of a model reply.

pub mod parser;
pub mod runner;

pub use parser::{AgentRequest, ParsedResponse, ToolKind, ToolParser, ToolRequest};
pub use runner::{ToolCall, ToolResult, ToolRunner};
