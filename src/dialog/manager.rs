//! One conversational turn, start to finish.
//!
//! ```text
//! user text ─▶ legacy command? ──yes──▶ tool / agent action ─┐
//!                  │ no                                       │
//!                  ▼                                          │
//!             LLM reply ─▶ ToolParser ─┬─ silent   → background
//!                                      ├─ foreground → ToolResult
//!                                      └─ <agent>  → orchestrator
//!                                                             ▼
//!                              summary call ─▶ SessionLog ─▶ DialogTurn
//! ```
//!
//! Background completions (tools and sub-agents) are turned into their own
//! [`DialogTurn`]s by [`DialogManager::poll_background`].

use std::sync::Arc;
use std::time::Duration;

use crate::agents::{AgentResult, SubAgentOrchestrator};
use crate::llm::{head, LlmClient, PromptBuilder};
use crate::tools::{ToolCall, ToolParser, ToolResult, ToolRunner};

use super::session::SessionLog;

/// Characters of a sub-agent result quoted in its announcement.
const AGENT_RESULT_CHARS: usize = 300;

/// Spoken when the reply call fails.
const REPLY_FALLBACK: &str = "Sorry, I couldn't get an answer just now. Please try again.";

/// Outcome of one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogTurn {
    pub user_text: String,
    pub response_text: String,
    pub tool_results: Vec<ToolResult>,
    pub summary: Option<String>,
}

// ---------------------------------------------------------------------------
// Legacy commands
// ---------------------------------------------------------------------------

/// Typed commands recognised before the model is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LegacyCommand<'a> {
    /// `runbg <cmd>`
    RunBackground(&'a str),
    /// `run`, `web`, `ssh`, `serial`
    Tool(ToolCall),
    /// `agent [specialty:]<task>`
    Agent {
        specialty: Option<&'a str>,
        task: &'a str,
    },
    /// `agents`
    ListAgents,
    /// `cancel agents`
    CancelAgents,
}

impl<'a> LegacyCommand<'a> {
    fn parse(text: &'a str) -> Option<Self> {
        let text = text.trim();
        match text {
            "agents" => return Some(Self::ListAgents),
            "cancel agents" => return Some(Self::CancelAgents),
            _ => {}
        }

        let (verb, rest) = text.split_once(char::is_whitespace)?;
        let rest = rest.trim();
        if rest.is_empty() {
            return None;
        }
        match verb {
            "runbg" => Some(Self::RunBackground(rest)),
            "run" => Some(Self::Tool(ToolCall::shell(rest))),
            "web" => Some(Self::Tool(ToolCall::Web {
                url: rest.to_string(),
                method: "GET".into(),
            })),
            "ssh" => {
                let (host, command) = rest.split_once(char::is_whitespace)?;
                Some(Self::Tool(ToolCall::Ssh {
                    host: host.to_string(),
                    command: command.trim().to_string(),
                    user: None,
                    port: 22,
                }))
            }
            "serial" => {
                let (port, payload) = rest.split_once(char::is_whitespace)?;
                Some(Self::Tool(ToolCall::Serial {
                    port: port.to_string(),
                    payload: payload.trim().to_string(),
                }))
            }
            "agent" => {
                // A leading single word followed by ':' names the specialty.
                match rest.split_once(':') {
                    Some((specialty, task))
                        if !specialty.trim().is_empty()
                            && !specialty.trim().contains(char::is_whitespace)
                            && !task.trim().is_empty() =>
                    {
                        Some(Self::Agent {
                            specialty: Some(specialty.trim()),
                            task: task.trim(),
                        })
                    }
                    _ => Some(Self::Agent {
                        specialty: None,
                        task: rest,
                    }),
                }
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// DialogManager
// ---------------------------------------------------------------------------

/// Runs dialog turns against a language model, the tool runner and
/// (optionally) the sub-agent orchestrator.
pub struct DialogManager {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRunner>,
    agents: Option<Arc<SubAgentOrchestrator>>,
    sessions: Arc<dyn SessionLog>,
    prompts: PromptBuilder,
    smart_tools: bool,
    session_id: String,
}

impl DialogManager {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRunner>,
        agents: Option<Arc<SubAgentOrchestrator>>,
        sessions: Arc<dyn SessionLog>,
        smart_tools: bool,
    ) -> Self {
        Self {
            llm,
            tools,
            agents,
            sessions,
            prompts: PromptBuilder::new(smart_tools),
            smart_tools,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tools(&self) -> &Arc<ToolRunner> {
        &self.tools
    }

    pub fn agents(&self) -> Option<&Arc<SubAgentOrchestrator>> {
        self.agents.as_ref()
    }

    /// Run one turn for `text`.
    ///
    /// Every failure is reported inside the turn: tool and agent failures as
    /// results, a failed reply call as a spoken apology.
    pub async fn handle_user_text(&self, text: &str) -> DialogTurn {
        let mut tool_results = Vec::new();

        match LegacyCommand::parse(text) {
            Some(LegacyCommand::RunBackground(command)) => {
                let task_id = self
                    .tools
                    .submit_background(ToolCall::shell(command), None);
                let response = format!("Started background task {task_id} for: {command}");
                return self.finish_turn(text, response, tool_results).await;
            }
            Some(LegacyCommand::Agent { specialty, task }) => {
                let response = self.spawn_agent(task, specialty);
                return self.finish_turn(text, response, tool_results).await;
            }
            Some(LegacyCommand::ListAgents) => {
                let response = self.describe_agents();
                return self.finish_turn(text, response, tool_results).await;
            }
            Some(LegacyCommand::CancelAgents) => {
                let response = match &self.agents {
                    Some(agents) => {
                        let n = agents.cancel_all().await;
                        format!("Cancelled {n} agent(s).")
                    }
                    None => "Sub-agents are not available.".to_string(),
                };
                return self.finish_turn(text, response, tool_results).await;
            }
            Some(LegacyCommand::Tool(call)) => {
                tool_results.push(self.tools.execute(&call).await);
            }
            None => {}
        }

        let reply = match self
            .llm
            .chat(&self.prompts.build_turn(text, &tool_results))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("dialog: reply failed: {e}");
                return self
                    .finish_turn(text, REPLY_FALLBACK.to_string(), tool_results)
                    .await;
            }
        };
        let mut response = reply.trim().to_string();

        if self.smart_tools {
            let parsed = ToolParser::parse_response(&response);
            response = parsed.speech_text;

            for request in &parsed.tool_requests {
                let Some(call) = request.to_call() else {
                    log::warn!("dialog: skipping incomplete {} directive", request.kind);
                    continue;
                };
                if request.silent {
                    self.tools.submit_background(call, None);
                } else {
                    tool_results.push(self.tools.execute(&call).await);
                }
            }
            for request in &parsed.agent_requests {
                self.spawn_agent(&request.task, request.specialty.as_deref());
            }
        }

        self.finish_turn(text, response, tool_results).await
    }

    /// Turn every completed background tool and sub-agent into a turn.
    ///
    /// Never waits: only results already queued are drained.
    pub async fn poll_background(&self) -> Vec<DialogTurn> {
        let mut turns = Vec::new();

        while let Some(result) = self.tools.next_result(Duration::ZERO).await {
            let user_text = format!("[background task {} complete]", result.task_id);
            let response = match self.llm.chat(&self.prompts.build_background(&result)).await {
                Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
                Ok(_) => PromptBuilder::background_fact(&result),
                Err(e) => {
                    log::warn!("dialog: background announcement failed: {e}");
                    PromptBuilder::background_fact(&result)
                }
            };
            turns.push(self.finish_turn(&user_text, response, vec![result]).await);
        }

        if let Some(agents) = &self.agents {
            while let Some(result) = agents.next_result(Duration::ZERO).await {
                let user_text = format!("[agent {} {}]", result.agent_id, result.status);
                let fact = agent_fact(&result);
                let response = match self.llm.chat(&self.prompts.build_announcement(&fact)).await {
                    Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
                    Ok(_) => fact,
                    Err(e) => {
                        log::warn!("dialog: agent announcement failed: {e}");
                        fact
                    }
                };
                turns.push(
                    self.finish_turn(&user_text, response, result.tool_results)
                        .await,
                );
            }
        }

        turns
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn spawn_agent(&self, task: &str, specialty: Option<&str>) -> String {
        match &self.agents {
            Some(agents) => {
                let id = agents.spawn_agent(task, specialty);
                let specialty = agents
                    .get_agent(&id)
                    .map(|a| a.specialty.to_string())
                    .unwrap_or_else(|| "general".into());
                format!("Started {specialty} agent {id} for: {task}")
            }
            None => {
                log::warn!("dialog: agent requested but sub-agents are disabled");
                "Sub-agents are not available.".to_string()
            }
        }
    }

    fn describe_agents(&self) -> String {
        let Some(agents) = &self.agents else {
            return "Sub-agents are not available.".to_string();
        };
        let listed = agents.list_agents();
        if listed.is_empty() {
            return "No agents have been started.".to_string();
        }
        let parts: Vec<String> = listed
            .iter()
            .map(|a| format!("{} {} {}: {}", a.agent_id, a.specialty, a.status, a.task))
            .collect();
        format!("{} agent(s): {}", listed.len(), parts.join("; "))
    }

    /// Summarise, record and assemble the turn.
    async fn finish_turn(
        &self,
        user_text: &str,
        response_text: String,
        tool_results: Vec<ToolResult>,
    ) -> DialogTurn {
        let summary = self
            .summarize(user_text, &response_text, &tool_results)
            .await;
        self.record(user_text, &response_text, &tool_results, summary.as_deref());
        DialogTurn {
            user_text: user_text.to_string(),
            response_text,
            tool_results,
            summary,
        }
    }

    async fn summarize(
        &self,
        user_text: &str,
        response_text: &str,
        tool_results: &[ToolResult],
    ) -> Option<String> {
        let messages = self
            .prompts
            .build_summary(user_text, response_text, tool_results);
        match self.llm.chat(&messages).await {
            Ok(summary) => {
                let summary = summary.trim();
                (!summary.is_empty()).then(|| summary.to_string())
            }
            Err(e) => {
                log::warn!("dialog: summary failed: {e}");
                None
            }
        }
    }

    fn record(
        &self,
        user_text: &str,
        response_text: &str,
        tool_results: &[ToolResult],
        summary: Option<&str>,
    ) {
        let recorded =
            self.sessions
                .record_turn(&self.session_id, user_text, response_text, tool_results);
        if let Err(e) = recorded {
            log::warn!("dialog: failed to record turn: {e}");
        }
        if let Some(summary) = summary {
            if let Err(e) = self.sessions.record_summary(&self.session_id, summary) {
                log::warn!("dialog: failed to record summary: {e}");
            }
        }
    }
}

/// Plain-text statement of a finished sub-agent.
fn agent_fact(result: &AgentResult) -> String {
    format!(
        "Agent {} {} task '{}'. Result: {}",
        result.agent_id,
        result.status,
        result.task_description,
        head(&result.result_text, AGENT_RESULT_CHARS)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentStatus;
    use crate::config::ToolConfig;
    use crate::dialog::session::MemorySessionLog;
    use crate::llm::{ChatMessage, FragmentStream, LlmError};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted replies; `None` in the script fails that call.  Once the
    /// script runs out every call answers `"ok"`.
    struct MockLlm {
        script: Mutex<VecDeque<Option<&'static str>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl MockLlm {
        fn new(script: &[Option<&'static str>]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Vec<ChatMessage>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<FragmentStream, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            match self.script.lock().unwrap().pop_front() {
                Some(None) => Err(LlmError::Timeout),
                Some(Some(reply)) => Ok(futures::stream::once(async move { Ok(reply.to_string()) }).boxed()),
                None => Ok(futures::stream::once(async { Ok("ok".to_string()) }).boxed()),
            }
        }
    }

    struct Fixture {
        llm: Arc<MockLlm>,
        log: Arc<MemorySessionLog>,
        dialog: DialogManager,
    }

    fn fixture(script: &[Option<&'static str>], with_agents: bool) -> Fixture {
        let llm = MockLlm::new(script);
        let log = Arc::new(MemorySessionLog::default());
        let tools = Arc::new(ToolRunner::new(ToolConfig::default()));
        let agents = with_agents.then(|| {
            Arc::new(SubAgentOrchestrator::new(
                Arc::new(crate::llm::EchoLlm::new(100)),
                Arc::clone(&tools),
            ))
        });
        let dialog = DialogManager::new(llm.clone(), tools, agents, log.clone(), true);
        Fixture { llm, log, dialog }
    }

    async fn poll_until_some(dialog: &DialogManager) -> Vec<DialogTurn> {
        for _ in 0..200 {
            let turns = dialog.poll_background().await;
            if !turns.is_empty() {
                return turns;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("no background turn arrived");
    }

    // -----------------------------------------------------------------------
    // Legacy command parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parses_legacy_commands() {
        assert_eq!(
            LegacyCommand::parse("runbg sleep 5"),
            Some(LegacyCommand::RunBackground("sleep 5"))
        );
        assert_eq!(
            LegacyCommand::parse("run ls -la"),
            Some(LegacyCommand::Tool(ToolCall::shell("ls -la")))
        );
        assert_eq!(
            LegacyCommand::parse("ssh pi@box uptime -p"),
            Some(LegacyCommand::Tool(ToolCall::Ssh {
                host: "pi@box".into(),
                command: "uptime -p".into(),
                user: None,
                port: 22,
            }))
        );
        assert_eq!(
            LegacyCommand::parse("serial /dev/ttyUSB0 STATUS"),
            Some(LegacyCommand::Tool(ToolCall::Serial {
                port: "/dev/ttyUSB0".into(),
                payload: "STATUS".into(),
            }))
        );
        assert_eq!(
            LegacyCommand::parse("agent research: find the LTS kernel"),
            Some(LegacyCommand::Agent {
                specialty: Some("research"),
                task: "find the LTS kernel",
            })
        );
        assert_eq!(
            LegacyCommand::parse("agent check the time: now"),
            Some(LegacyCommand::Agent {
                specialty: None,
                task: "check the time: now",
            })
        );
        assert_eq!(LegacyCommand::parse("agents"), Some(LegacyCommand::ListAgents));
        assert_eq!(
            LegacyCommand::parse("cancel agents"),
            Some(LegacyCommand::CancelAgents)
        );
    }

    #[test]
    fn ordinary_speech_is_not_a_command() {
        assert_eq!(LegacyCommand::parse("what's the weather"), None);
        assert_eq!(LegacyCommand::parse("run"), None);
        assert_eq!(LegacyCommand::parse("ssh onlyhost"), None);
        assert_eq!(LegacyCommand::parse("running late today"), None);
    }

    // -----------------------------------------------------------------------
    // Turns
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn plain_turn_replies_summarises_and_records() {
        let f = fixture(&[Some("  Hello there. "), Some("user greeted")], false);
        let turn = f.dialog.handle_user_text("hi").await;

        assert_eq!(turn.user_text, "hi");
        assert_eq!(turn.response_text, "Hello there.");
        assert!(turn.tool_results.is_empty());
        assert_eq!(turn.summary.as_deref(), Some("user greeted"));

        let records = f.log.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["type"], "turn");
        assert_eq!(records[0]["session"], f.dialog.session_id());
        assert_eq!(records[1]["summary"], "user greeted");
    }

    #[tokio::test]
    async fn run_command_feeds_tool_note_to_model() {
        let f = fixture(&[Some("Done.")], false);
        let turn = f.dialog.handle_user_text("run echo hi").await;

        assert_eq!(turn.tool_results.len(), 1);
        assert_eq!(turn.tool_results[0].task_id, "foreground");
        assert_eq!(turn.tool_results[0].stdout, "hi\n");

        let first = &f.llm.calls()[0];
        assert_eq!(first.len(), 3);
        assert_eq!(first[2].content, "Tools: tool foreground exit 0: hi\n");
    }

    #[tokio::test]
    async fn runbg_starts_task_without_reply_call() {
        let f = fixture(&[], false);
        let turn = f.dialog.handle_user_text("runbg echo later").await;
        assert!(turn
            .response_text
            .starts_with("Started background task "));
        assert!(turn.response_text.ends_with(" for: echo later"));
        // Only the summary call.
        assert_eq!(f.llm.calls().len(), 1);

        let turns = poll_until_some(&f.dialog).await;
        assert_eq!(turns.len(), 1);
        assert!(turns[0].user_text.starts_with("[background task "));
        assert_eq!(turns[0].tool_results[0].stdout, "later\n");
    }

    #[tokio::test]
    async fn foreground_directive_runs_before_reply_returns() {
        let f = fixture(
            &[Some("Checking. <tool type=\"shell\" silent=\"false\">echo 7</tool>")],
            false,
        );
        let turn = f.dialog.handle_user_text("what is seven").await;
        assert_eq!(turn.response_text, "Checking.");
        assert_eq!(turn.tool_results.len(), 1);
        assert_eq!(turn.tool_results[0].stdout, "7\n");
    }

    #[tokio::test]
    async fn silent_directive_goes_to_background() {
        let f = fixture(&[Some("On it. <tool type=\"shell\">echo bg</tool>")], false);
        let turn = f.dialog.handle_user_text("do it quietly").await;
        assert_eq!(turn.response_text, "On it.");
        assert!(turn.tool_results.is_empty());

        let turns = poll_until_some(&f.dialog).await;
        assert_eq!(turns[0].tool_results[0].stdout, "bg\n");
    }

    #[tokio::test]
    async fn malformed_directive_does_not_block_others() {
        let f = fixture(
            &[Some(
                "A <tool type=\"teleport\">x</tool> B <tool type=\"shell\" silent=\"false\">echo ok</tool>",
            )],
            false,
        );
        let turn = f.dialog.handle_user_text("go").await;
        assert_eq!(turn.tool_results.len(), 1);
        assert_eq!(turn.tool_results[0].stdout, "ok\n");
    }

    #[tokio::test]
    async fn reply_failure_is_spoken_and_recorded() {
        let f = fixture(&[None], false);
        let turn = f.dialog.handle_user_text("hi").await;
        assert_eq!(turn.user_text, "hi");
        assert_eq!(turn.response_text, REPLY_FALLBACK);
        assert_eq!(f.log.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn reply_failure_keeps_legacy_tool_result() {
        let f = fixture(&[None], false);
        let turn = f.dialog.handle_user_text("run echo hi").await;
        assert_eq!(turn.response_text, REPLY_FALLBACK);
        assert_eq!(turn.tool_results.len(), 1);
        assert_eq!(turn.tool_results[0].stdout, "hi\n");
    }

    #[tokio::test]
    async fn summary_failure_is_absorbed() {
        let f = fixture(&[Some("Fine."), None], false);
        let turn = f.dialog.handle_user_text("hi").await;
        assert_eq!(turn.response_text, "Fine.");
        assert!(turn.summary.is_none());
        assert_eq!(f.log.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn background_announcement_falls_back_to_fact() {
        let f = fixture(&[None, None], false);
        f.dialog
            .tools()
            .submit_background(ToolCall::shell("echo done"), None);

        let turns = poll_until_some(&f.dialog).await;
        let fact = PromptBuilder::background_fact(&turns[0].tool_results[0]);
        assert_eq!(turns[0].response_text, fact);
        assert!(turns[0].summary.is_none());
    }

    // -----------------------------------------------------------------------
    // Sub-agents
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn agent_command_spawns_and_reports() {
        let f = fixture(&[], true);
        let turn = f
            .dialog
            .handle_user_text("agent coding: tidy the repo")
            .await;
        assert!(turn.response_text.starts_with("Started coding agent "));
        assert!(turn.response_text.ends_with("for: tidy the repo"));

        let turns = poll_until_some(&f.dialog).await;
        assert!(turns[0].user_text.ends_with(" completed]"));

        let listing = f.dialog.handle_user_text("agents").await;
        assert!(listing.response_text.starts_with("1 agent(s): "));
        assert!(listing.response_text.contains("coding completed: tidy the repo"));
    }

    #[tokio::test]
    async fn agent_directive_in_reply_spawns_agent() {
        let f = fixture(
            &[Some("Sure. <agent specialty=\"research\">find kernel</agent>")],
            true,
        );
        let turn = f.dialog.handle_user_text("look it up").await;
        assert_eq!(turn.response_text, "Sure.");
        let agents = f.dialog.agents().unwrap().list_agents();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].task, "find kernel");
    }

    #[tokio::test]
    async fn agents_disabled_is_reported() {
        let f = fixture(&[], false);
        let turn = f.dialog.handle_user_text("agent do stuff").await;
        assert_eq!(turn.response_text, "Sub-agents are not available.");
    }

    #[tokio::test]
    async fn cancel_agents_counts() {
        let f = fixture(&[], true);
        let turn = f.dialog.handle_user_text("cancel agents").await;
        assert_eq!(turn.response_text, "Cancelled 0 agent(s).");
        assert!(f
            .dialog
            .agents()
            .unwrap()
            .list_agents()
            .iter()
            .all(|a| a.status != AgentStatus::Running));
    }
}
