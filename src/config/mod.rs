//! Configuration module for the voice agent.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each subsystem,
//! `AppPaths` for cross-platform data directories, TOML persistence via
//! `AppConfig::load` / `AppConfig::save`, and `VA_*` environment overrides.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, AudioConfig, DialogConfig, IdleConfig, LlmConfig, LlmProvider, PlaybackConfig,
    SessionConfig, SttConfig, SttProvider, ToolConfig, TtsConfig, TtsProvider, VadConfig,
    WakeConfig,
};
