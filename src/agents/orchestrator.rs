//! Registry and completion queue for running sub-agents.
//!
//! ```text
//! spawn_agent ──▶ registry[id] = {task, specialty, status rx, token}
//!      │
//!      ├──▶ worker:     SubAgent::run()
//!      └──▶ supervisor: await worker ──▶ results queue (exactly once)
//! ```
//!
//! Entries stay in the registry after they finish so `list_agents` can
//! report terminal states.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::llm::LlmClient;
use crate::tools::ToolRunner;

use super::sub_agent::{transition, AgentResult, AgentStatus, Specialty, SubAgent};

/// Length of a generated agent id.
const ID_LEN: usize = 8;

struct AgentEntry {
    task: String,
    specialty: Specialty,
    status: watch::Receiver<AgentStatus>,
    cancel: CancellationToken,
}

/// Point-in-time view of one registered agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    pub agent_id: String,
    pub task: String,
    pub specialty: Specialty,
    pub status: AgentStatus,
}

impl AgentSummary {
    fn from_entry(agent_id: &str, entry: &AgentEntry) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            task: entry.task.clone(),
            specialty: entry.specialty,
            status: *entry.status.borrow(),
        }
    }
}

/// Launches sub-agents and collects their results.
pub struct SubAgentOrchestrator {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRunner>,
    agents: Mutex<IndexMap<String, AgentEntry>>,
    results_tx: mpsc::UnboundedSender<AgentResult>,
    results_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<AgentResult>>,
}

impl SubAgentOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRunner>) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            llm,
            tools,
            agents: Mutex::new(IndexMap::new()),
            results_tx,
            results_rx: tokio::sync::Mutex::new(results_rx),
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, IndexMap<String, AgentEntry>> {
        self.agents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register and launch an agent; returns its short id at once.
    ///
    /// Unknown specialty names fall back to the general profile.
    pub fn spawn_agent(&self, task: &str, specialty: Option<&str>) -> String {
        let specialty = specialty.map(Specialty::parse).unwrap_or_default();
        let mut registry = self.registry();

        let agent_id = loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string()[..ID_LEN].to_string();
            if !registry.contains_key(&candidate) {
                break candidate;
            }
        };

        let agent = SubAgent::new(
            agent_id.clone(),
            task.to_string(),
            specialty,
            Arc::clone(&self.llm),
            Arc::clone(&self.tools),
        );
        let status = agent.status_cell();
        registry.insert(
            agent_id.clone(),
            AgentEntry {
                task: task.to_string(),
                specialty,
                status: status.subscribe(),
                cancel: agent.cancel_token(),
            },
        );
        drop(registry);

        let worker = tokio::spawn(agent.run());
        let tx = self.results_tx.clone();
        let id = agent_id.clone();
        let task = task.to_string();
        tokio::spawn(async move {
            let result = match worker.await {
                Ok(result) => result,
                Err(e) => {
                    log::error!("agents: {id} worker died: {e}");
                    transition(&status, AgentStatus::Failed);
                    AgentResult::failed(&id, &task, e.to_string())
                }
            };
            let _ = tx.send(result);
        });

        log::info!("agents: spawned {agent_id} ({specialty})");
        agent_id
    }

    /// Cancel an agent and wait until it reaches a terminal state.
    ///
    /// Returns `false` for unknown ids.  Cancelling a finished agent is a
    /// no-op that still returns `true`.
    pub async fn cancel_agent(&self, agent_id: &str) -> bool {
        let handle = {
            let registry = self.registry();
            registry
                .get(agent_id)
                .map(|e| (e.cancel.clone(), e.status.clone()))
        };
        let Some((cancel, mut status)) = handle else {
            return false;
        };
        cancel.cancel();
        // An error here means the agent and its supervisor are both gone.
        let _ = status.wait_for(AgentStatus::is_terminal).await;
        true
    }

    /// Cancel every non-terminal agent; returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let live: Vec<String> = self
            .list_agents()
            .into_iter()
            .filter(|a| !a.status.is_terminal())
            .map(|a| a.agent_id)
            .collect();
        let mut cancelled = 0;
        for id in &live {
            if self.cancel_agent(id).await {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            log::info!("agents: cancelled {cancelled} agent(s)");
        }
        cancelled
    }

    /// Snapshot of every registered agent, in spawn order.
    pub fn list_agents(&self) -> Vec<AgentSummary> {
        self.registry()
            .iter()
            .map(|(id, entry)| AgentSummary::from_entry(id, entry))
            .collect()
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<AgentSummary> {
        self.registry()
            .get(agent_id)
            .map(|entry| AgentSummary::from_entry(agent_id, entry))
    }

    /// Wait up to `timeout` for the next agent result.  A zero timeout only
    /// drains what is already queued.
    pub async fn next_result(&self, timeout: Duration) -> Option<AgentResult> {
        let mut rx = self.results_rx.lock().await;
        if timeout.is_zero() {
            return rx.try_recv().ok();
        }
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }
}

impl Drop for SubAgentOrchestrator {
    fn drop(&mut self) {
        for entry in self.registry().values() {
            entry.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;
    use crate::llm::{ChatMessage, EchoLlm, FragmentStream, LlmError};
    use async_trait::async_trait;

    struct HangingLlm;

    #[async_trait]
    impl LlmClient for HangingLlm {
        async fn complete(&self, _: &[ChatMessage]) -> Result<FragmentStream, LlmError> {
            futures::future::pending().await
        }
    }

    fn orchestrator(llm: Arc<dyn LlmClient>) -> SubAgentOrchestrator {
        let tools = Arc::new(ToolRunner::new(ToolConfig::default()));
        SubAgentOrchestrator::new(llm, tools)
    }

    const WAIT: Duration = Duration::from_secs(5);

    // -----------------------------------------------------------------------
    // Spawning
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn spawned_agent_reports_once() {
        let orch = orchestrator(Arc::new(EchoLlm::new(200)));
        let id = orch.spawn_agent("count files", Some("system"));
        assert_eq!(id.len(), ID_LEN);

        let result = orch.next_result(WAIT).await.expect("agent result");
        assert_eq!(result.agent_id, id);
        assert_eq!(result.status, AgentStatus::Completed);
        assert!(result.result_text.starts_with("Echo reply: "));

        assert!(orch.next_result(Duration::from_millis(50)).await.is_none());
        assert_eq!(orch.get_agent(&id).unwrap().status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn list_agents_reports_spawn_order_and_specialty() {
        let orch = orchestrator(Arc::new(HangingLlm));
        let a = orch.spawn_agent("first", Some("coding"));
        let b = orch.spawn_agent("second", Some("unknown"));

        let listed = orch.list_agents();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].agent_id, a);
        assert_eq!(listed[0].specialty, Specialty::Coding);
        assert_eq!(listed[1].agent_id, b);
        assert_eq!(listed[1].specialty, Specialty::General);
        assert!(listed.iter().all(|s| !s.status.is_terminal()));

        orch.cancel_all().await;
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let orch = orchestrator(Arc::new(HangingLlm));
        let mut ids: Vec<String> = (0..20).map(|i| orch.spawn_agent(&i.to_string(), None)).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        orch.cancel_all().await;
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn cancel_before_completion_is_cancelled_never_completed() {
        let orch = orchestrator(Arc::new(HangingLlm));
        let id = orch.spawn_agent("wait forever", None);

        assert!(orch.cancel_agent(&id).await);
        assert_eq!(orch.get_agent(&id).unwrap().status, AgentStatus::Cancelled);

        let result = orch.next_result(WAIT).await.expect("cancelled result");
        assert_eq!(result.status, AgentStatus::Cancelled);
        assert_eq!(result.result_text, "Task was cancelled");
        assert!(orch.next_result(Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn cancel_unknown_agent_is_false() {
        let orch = orchestrator(Arc::new(HangingLlm));
        assert!(!orch.cancel_agent("nope").await);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let orch = orchestrator(Arc::new(HangingLlm));
        let id = orch.spawn_agent("x", None);
        assert!(orch.cancel_agent(&id).await);
        assert!(orch.cancel_agent(&id).await);
        assert_eq!(orch.get_agent(&id).unwrap().status, AgentStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_all_skips_finished_agents() {
        let orch = orchestrator(Arc::new(HangingLlm));
        orch.spawn_agent("a", None);
        orch.spawn_agent("b", None);
        assert_eq!(orch.cancel_all().await, 2);
        assert_eq!(orch.cancel_all().await, 0);
        assert!(orch
            .list_agents()
            .iter()
            .all(|a| a.status == AgentStatus::Cancelled));
    }
}
