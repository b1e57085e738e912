//! Prompt builder for dialog turns.
//!
//! [`PromptBuilder`] produces the chat-message lists for the three calls a
//! dialog turn can make:
//! * **Turn** (`build_turn`): answer the user, optionally with the tool
//!   directive grammar and a note about tools that already ran.
//! * **Summary** (`build_summary`): a short memory note for the session log.
//! * **Background** (`build_background`): announce a finished background
//!   task or sub-agent.

use crate::tools::{ToolParser, ToolResult};

use super::client::ChatMessage;

// ---------------------------------------------------------------------------
// System instructions
// ---------------------------------------------------------------------------

const VOICE_PERSONA: &str =
    "You are a natural, concise voice agent that can run tools silently and report summaries.";

const TOOL_OUTCOME_HINT: &str = "If tools were run, summarize their outcome briefly.";

const SUMMARY_INSTRUCTION: &str = "Keep summaries under 40 words.";

const BACKGROUND_INSTRUCTION: &str = "Summarize background tool completion concisely.";

/// Characters of tool stdout quoted back to the model on a dialog turn.
const TURN_STDOUT_CHARS: usize = 200;
/// Characters of tool stdout quoted in a background announcement.
const BACKGROUND_STDOUT_CHARS: usize = 300;

/// First `n` characters of `s` (char-boundary safe).
pub fn head(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// PromptBuilder
// ---------------------------------------------------------------------------

/// Builds the message lists sent to the [`LlmClient`](super::LlmClient).
///
/// # Example
/// ```rust
/// use voice_agent::llm::PromptBuilder;
///
/// let builder = PromptBuilder::new(false);
/// let messages = builder.build_turn("what time is it", &[]);
/// assert_eq!(messages.len(), 2);
/// assert_eq!(messages[1].content, "what time is it");
/// ```
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    smart_tools: bool,
}

impl PromptBuilder {
    /// `smart_tools` appends the tool directive grammar to the system prompt.
    pub fn new(smart_tools: bool) -> Self {
        Self { smart_tools }
    }

    pub fn system_prompt(&self) -> String {
        let mut parts = vec![VOICE_PERSONA.to_string(), TOOL_OUTCOME_HINT.to_string()];
        if self.smart_tools {
            parts.push(ToolParser::tool_system_prompt().to_string());
        }
        parts.join("\n")
    }

    /// Messages for one dialog turn.  When `tool_results` is non-empty an
    /// assistant note `"Tools: ..."` follows the user message.
    pub fn build_turn(&self, user_text: &str, tool_results: &[ToolResult]) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(user_text),
        ];
        let note = tool_results
            .iter()
            .map(|r| {
                format!(
                    "tool {} exit {}: {}",
                    r.task_id,
                    r.returncode,
                    head(&r.stdout, TURN_STDOUT_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join(" \n");
        if !note.is_empty() {
            messages.push(ChatMessage::assistant(format!("Tools: {note}")));
        }
        messages
    }

    /// Messages asking for a memory summary of one exchange.
    pub fn build_summary(
        &self,
        user_text: &str,
        response_text: &str,
        tool_results: &[ToolResult],
    ) -> Vec<ChatMessage> {
        let mut prompt =
            format!("Summarize this exchange for memory: {user_text} | {response_text}");
        let tool_note = tool_results
            .iter()
            .map(|r| format!("task {} exit {}", r.task_id, r.returncode))
            .collect::<Vec<_>>()
            .join("; ");
        if !tool_note.is_empty() {
            prompt.push_str(" | tools: ");
            prompt.push_str(&tool_note);
        }
        vec![
            ChatMessage::system(SUMMARY_INSTRUCTION),
            ChatMessage::user(prompt),
        ]
    }

    /// Messages announcing a finished background tool.
    pub fn build_background(&self, result: &ToolResult) -> Vec<ChatMessage> {
        self.build_announcement(&Self::background_fact(result))
    }

    /// Messages asking the model to announce any background `fact`
    /// (a finished tool or sub-agent).
    pub fn build_announcement(&self, fact: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(BACKGROUND_INSTRUCTION),
            ChatMessage::user(fact),
        ]
    }

    /// Plain-text statement of a background completion; also the spoken
    /// fallback when the model is unavailable.
    pub fn background_fact(result: &ToolResult) -> String {
        format!(
            "Background task {} finished with code {}. Output: {}",
            result.task_id,
            result.returncode,
            head(&result.stdout, BACKGROUND_STDOUT_CHARS)
        )
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
