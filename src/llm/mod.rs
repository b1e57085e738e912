//! Language-model access for the dialog manager and sub-agents.
//!
//! This module provides:
//! * [`LlmClient`]: async trait implemented by every backend.
//! * [`ApiClient`]: OpenAI-compatible REST API client (streaming or blocking).
//! * [`EchoLlm`]: offline stub that echoes the last message.
//! * [`PromptBuilder`]: builds turn, summary and background prompts.
//! * [`LlmError`]: error variants for LLM operations.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use voice_agent::config::AppConfig;
//! use voice_agent::llm::{ApiClient, LlmClient, PromptBuilder};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let llm = ApiClient::from_config(&config.llm);
//!
//!     let messages = PromptBuilder::new(true).build_turn("what's the weather", &[]);
//!     let reply = llm.chat(&messages).await.unwrap();
//!     println!("{}", reply);
//! }
//! ```

pub mod client;
pub mod prompt;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use client::{ApiClient, ChatMessage, EchoLlm, FragmentStream, LlmClient, LlmError};
pub use prompt::{head, PromptBuilder};
