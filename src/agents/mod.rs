//! Sub-agents: independent plan-then-execute workers.
//!
//! ```text
//! DialogManager ──spawn_agent──▶ SubAgentOrchestrator ──▶ SubAgent (task)
//!       ▲                                 │
//!       └────────── next_result ◀─────────┘  AgentResult queue
//! ```

pub mod orchestrator;
pub mod sub_agent;

pub use orchestrator::{AgentSummary, SubAgentOrchestrator};
pub use sub_agent::{AgentResult, AgentStatus, Specialty, StatusCell, SubAgent};
