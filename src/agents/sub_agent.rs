//! A single plan-then-execute sub-agent.
//!
//! ```text
//! Pending ──run()──▶ Running ──┬─▶ Completed
//!                              ├─▶ Failed      (LLM error, panic)
//!                              └─▶ Cancelled   (token fired)
//! ```
//!
//! The agent makes two model calls: a short plan, then an execution reply.
//! Tool directives in the execution reply run synchronously through the
//! shared [`ToolRunner`]; their results land in
//! [`AgentResult::tool_results`] and the directives are stripped from the
//! result text.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::llm::{ChatMessage, LlmClient, LlmError};
use crate::tools::{ToolParser, ToolResult, ToolRunner};

// ---------------------------------------------------------------------------
// AgentStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a sub-agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AgentStatus {
    /// Completed, failed and cancelled are final.
    ///
    /// ```
    /// use voice_agent::agents::AgentStatus;
    ///
    /// assert!(!AgentStatus::Pending.is_terminal());
    /// assert!(!AgentStatus::Running.is_terminal());
    /// assert!(AgentStatus::Completed.is_terminal());
    /// assert!(AgentStatus::Failed.is_terminal());
    /// assert!(AgentStatus::Cancelled.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Cancelled
        )
    }

    /// Only pending → running and running → terminal are allowed.
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        match self {
            AgentStatus::Pending => next == AgentStatus::Running,
            AgentStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for AgentStatus {
    fn default() -> Self {
        AgentStatus::Pending
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Specialty
// ---------------------------------------------------------------------------

const BASE_PROMPT: &str = "You are a helpful sub-agent executing a specific task. \
You can use tools to accomplish your goals.";

/// Role profile selecting the sub-agent's system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Specialty {
    #[default]
    General,
    Coding,
    Research,
    System,
    Network,
    Hardware,
}

impl Specialty {
    /// Parse a specialty name; anything unrecognised is `General`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "coding" => Specialty::Coding,
            "research" => Specialty::Research,
            "system" => Specialty::System,
            "network" => Specialty::Network,
            "hardware" => Specialty::Hardware,
            _ => Specialty::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Specialty::General => "general",
            Specialty::Coding => "coding",
            Specialty::Research => "research",
            Specialty::System => "system",
            Specialty::Network => "network",
            Specialty::Hardware => "hardware",
        }
    }

    fn focus(&self) -> Option<&'static str> {
        match self {
            Specialty::General => None,
            Specialty::Coding => Some(
                "You specialize in writing, debugging, and analyzing code. You understand \
                 multiple programming languages and can use command-line tools effectively.",
            ),
            Specialty::Research => Some(
                "You specialize in researching information, gathering data from various \
                 sources, and synthesizing findings. You can search the web and analyze documents.",
            ),
            Specialty::System => Some(
                "You specialize in system administration and operations. You can execute \
                 shell commands, manage files, and interact with the system.",
            ),
            Specialty::Network => Some(
                "You specialize in network operations. You can SSH into remote systems, \
                 check network connectivity, and manage network resources.",
            ),
            Specialty::Hardware => Some(
                "You specialize in hardware interaction. You can communicate with devices \
                 over serial ports, USB, and other interfaces.",
            ),
        }
    }

    /// Base prompt, plus the specialty paragraph, plus the tool grammar.
    pub fn system_prompt(&self) -> String {
        let mut prompt = BASE_PROMPT.to_string();
        if let Some(focus) = self.focus() {
            prompt.push_str("\n\n");
            prompt.push_str(focus);
        }
        prompt.push_str("\n\n");
        prompt.push_str(ToolParser::tool_system_prompt());
        prompt
    }
}

impl fmt::Display for Specialty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AgentResult
// ---------------------------------------------------------------------------

/// Final report of one sub-agent.  Produced exactly once per agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResult {
    pub agent_id: String,
    pub task_description: String,
    pub status: AgentStatus,
    pub result_text: String,
    pub tool_results: Vec<ToolResult>,
    pub error: Option<String>,
}

impl AgentResult {
    pub(crate) fn cancelled(agent_id: &str, task: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            task_description: task.to_string(),
            status: AgentStatus::Cancelled,
            result_text: "Task was cancelled".into(),
            tool_results: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn failed(agent_id: &str, task: &str, error: String) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            task_description: task.to_string(),
            status: AgentStatus::Failed,
            result_text: format!("Task failed: {error}"),
            tool_results: Vec::new(),
            error: Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// SubAgent
// ---------------------------------------------------------------------------

/// Status cell shared by an agent and its observers.
pub type StatusCell = Arc<watch::Sender<AgentStatus>>;

/// Move `cell` to `next` if the transition is legal.
pub(crate) fn transition(cell: &watch::Sender<AgentStatus>, next: AgentStatus) -> bool {
    cell.send_if_modified(|current| {
        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            false
        }
    })
}

/// One independent task worker.  Consumed by [`run`](Self::run).
pub struct SubAgent {
    pub agent_id: String,
    pub task_description: String,
    pub specialty: Specialty,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRunner>,
    status: StatusCell,
    cancel: CancellationToken,
}

impl SubAgent {
    pub fn new(
        agent_id: String,
        task_description: String,
        specialty: Specialty,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRunner>,
    ) -> Self {
        let (status, _) = watch::channel(AgentStatus::Pending);
        Self {
            agent_id,
            task_description,
            specialty,
            llm,
            tools,
            status: Arc::new(status),
            cancel: CancellationToken::new(),
        }
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.borrow()
    }

    /// Shared handle to the status cell, for observers.
    pub fn status_cell(&self) -> StatusCell {
        Arc::clone(&self.status)
    }

    /// Token that cancels this agent when fired.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Plan, execute and report.  Never returns an error: failures and
    /// cancellation become the corresponding [`AgentResult`].
    pub async fn run(self) -> AgentResult {
        if self.cancel.is_cancelled() {
            // Never started: pending → running → cancelled keeps the
            // transition rules intact.
            transition(&self.status, AgentStatus::Running);
            transition(&self.status, AgentStatus::Cancelled);
            return AgentResult::cancelled(&self.agent_id, &self.task_description);
        }
        transition(&self.status, AgentStatus::Running);
        log::info!(
            "agents: {} ({}) started: {}",
            self.agent_id,
            self.specialty,
            self.task_description
        );

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            outcome = self.execute() => Some(outcome),
        };

        let result = match outcome {
            Some(Ok(_)) | None if self.cancel.is_cancelled() => {
                AgentResult::cancelled(&self.agent_id, &self.task_description)
            }
            Some(Ok((text, tool_results))) => AgentResult {
                agent_id: self.agent_id.clone(),
                task_description: self.task_description.clone(),
                status: AgentStatus::Completed,
                result_text: text,
                tool_results,
                error: None,
            },
            Some(Err(e)) => AgentResult::failed(&self.agent_id, &self.task_description, e.to_string()),
            None => AgentResult::cancelled(&self.agent_id, &self.task_description),
        };

        transition(&self.status, result.status);
        log::info!("agents: {} {}", self.agent_id, result.status);
        result
    }

    async fn execute(&self) -> Result<(String, Vec<ToolResult>), LlmError> {
        let system = self.specialty.system_prompt();

        let plan = self
            .llm
            .chat(&[
                ChatMessage::system(system.clone()),
                ChatMessage::user(format!(
                    "Task: {}\n\nCreate a brief plan (2-4 steps) to accomplish this task.",
                    self.task_description
                )),
            ])
            .await?;
        log::debug!("agents: {} plan: {plan}", self.agent_id);

        let reply = self
            .llm
            .chat(&[
                ChatMessage::system(system),
                ChatMessage::user(format!("Task: {}", self.task_description)),
                ChatMessage::assistant(format!("Plan:\n{plan}")),
                ChatMessage::user(
                    "Execute this plan now. Use tools as needed and provide a summary of results.",
                ),
            ])
            .await?;

        let parsed = ToolParser::parse_response(&reply);
        let mut tool_results = Vec::new();
        for request in &parsed.tool_requests {
            match request.to_call() {
                Some(call) => tool_results.push(self.tools.execute(&call).await),
                None => log::warn!(
                    "agents: {} skipping incomplete {} directive",
                    self.agent_id,
                    request.kind
                ),
            }
        }
        Ok((parsed.speech_text, tool_results))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
