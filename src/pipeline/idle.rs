//! Inactivity prompts and suspension.
//!
//! ```text
//! touch() ──▶ last_active = now, asked = suspended = false
//!
//! every 1 s:
//!   idle ≥ ask_after     && !asked     → speak idle prompt,               asked = true
//!   idle ≥ suspend_after && !suspended → speak suspend prompt (if any),
//!                                        on_suspend(),                    suspended = true
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::IdleConfig;

use super::speaker::Speaker;

const TICK: Duration = Duration::from_secs(1);

/// Called once each time the manager suspends.
pub type SuspendHook = Arc<dyn Fn() + Send + Sync>;

/// Snapshot of the idle bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleState {
    pub last_active: Instant,
    pub asked: bool,
    pub suspended: bool,
}

impl IdleState {
    fn fresh() -> Self {
        Self {
            last_active: Instant::now(),
            asked: false,
            suspended: false,
        }
    }
}

struct Inner {
    ask_after: Duration,
    suspend_after: Duration,
    idle_prompt: String,
    suspend_prompt: String,
    speaker: Arc<dyn Speaker>,
    on_suspend: Option<SuspendHook>,
    state: Mutex<IdleState>,
}

impl Inner {
    fn state(&self) -> std::sync::MutexGuard<'_, IdleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Speaks an idle prompt after a quiet spell and suspends after a longer one.
pub struct IdleManager {
    inner: Arc<Inner>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl IdleManager {
    pub fn new(
        config: &IdleConfig,
        speaker: Arc<dyn Speaker>,
        on_suspend: Option<SuspendHook>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ask_after: Duration::from_secs(config.ask_after_secs),
                suspend_after: Duration::from_secs(config.suspend_after_secs),
                idle_prompt: config.idle_prompt.clone(),
                suspend_prompt: config.suspend_prompt.clone(),
                speaker,
                on_suspend,
                state: Mutex::new(IdleState::fresh()),
            }),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Reset the clock and start the timer.  No-op when already running.
    pub async fn start(&self) {
        let mut slot = self.task.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *self.inner.state() = IdleState::fresh();
        *slot = Some(tokio::spawn(idle_loop(Arc::clone(&self.inner))));
        log::debug!("idle: started");
    }

    /// Stop the timer and wait for it to end.  Idempotent.
    pub async fn stop(&self) {
        let mut slot = self.task.lock().await;
        if let Some(handle) = slot.take() {
            handle.abort();
            let _ = handle.await;
            log::debug!("idle: stopped");
        }
    }

    /// Record activity: restart the clock and clear both flags.
    pub fn touch(&self) {
        *self.inner.state() = IdleState::fresh();
    }

    pub fn state(&self) -> IdleState {
        *self.inner.state()
    }
}

async fn idle_loop(inner: Arc<Inner>) {
    loop {
        let (ask, suspend) = {
            let mut state = inner.state();
            let idle_for = state.last_active.elapsed();
            let ask = !state.asked && idle_for >= inner.ask_after;
            let suspend = !state.suspended && idle_for >= inner.suspend_after;
            state.asked |= ask;
            state.suspended |= suspend;
            (ask, suspend)
        };

        if ask {
            log::info!("idle: no activity for {:?}, asking", inner.ask_after);
            inner.speaker.play(&inner.idle_prompt).await;
        }
        if suspend {
            log::info!("idle: suspending");
            if !inner.suspend_prompt.is_empty() {
                inner.speaker.play(&inner.suspend_prompt).await;
            }
            if let Some(hook) = &inner.on_suspend {
                hook();
            }
        }

        tokio::time::sleep(TICK).await;
    }
}

impl Drop for IdleManager {
    fn drop(&mut self) {
        if let Ok(slot) = self.task.try_lock() {
            if let Some(handle) = slot.as_ref() {
                handle.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSpeaker {
        spoken: Mutex<Vec<String>>,
    }

    impl RecordingSpeaker {
        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Speaker for RecordingSpeaker {
        async fn play(&self, text: &str) {
            self.spoken.lock().unwrap().push(text.to_string());
        }

        async fn stop(&self) {}
    }

    fn config() -> IdleConfig {
        IdleConfig {
            ask_after_secs: 120,
            suspend_after_secs: 600,
            idle_prompt: "still there?".into(),
            suspend_prompt: "going idle".into(),
        }
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn asks_then_suspends_each_once() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let suspends = Arc::new(AtomicUsize::new(0));
        let hook_count = Arc::clone(&suspends);
        let hook: SuspendHook = Arc::new(move || {
            hook_count.fetch_add(1, Ordering::SeqCst);
        });
        let idle = IdleManager::new(&config(), speaker.clone(), Some(hook));
        idle.start().await;

        advance(119).await;
        assert!(speaker.spoken().is_empty());

        advance(2).await;
        assert_eq!(speaker.spoken(), vec!["still there?"]);
        assert!(idle.state().asked);

        advance(480).await;
        assert_eq!(speaker.spoken(), vec!["still there?", "going idle"]);
        assert_eq!(suspends.load(Ordering::SeqCst), 1);

        advance(1000).await;
        assert_eq!(speaker.spoken().len(), 2);
        assert_eq!(suspends.load(Ordering::SeqCst), 1);
        idle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn touch_at_119_prevents_ask_at_120() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let idle = IdleManager::new(&config(), speaker.clone(), None);
        idle.start().await;

        advance(119).await;
        idle.touch();
        advance(2).await;
        assert!(speaker.spoken().is_empty());
        assert!(!idle.state().asked);

        advance(119).await;
        assert_eq!(speaker.spoken(), vec!["still there?"]);
        idle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn touch_clears_flags_so_prompts_repeat() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let idle = IdleManager::new(&config(), speaker.clone(), None);
        idle.start().await;

        advance(121).await;
        idle.touch();
        assert!(!idle.state().asked);
        advance(121).await;
        assert_eq!(speaker.spoken().len(), 2);
        idle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_suspend_prompt_suspends_silently() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let mut cfg = config();
        cfg.suspend_prompt.clear();
        let idle = IdleManager::new(&cfg, speaker.clone(), None);
        idle.start().await;

        advance(601).await;
        assert_eq!(speaker.spoken(), vec!["still there?"]);
        assert!(idle.state().suspended);
        idle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_silences_timer() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let idle = IdleManager::new(&config(), speaker.clone(), None);
        idle.start().await;
        idle.stop().await;
        idle.stop().await;

        advance(700).await;
        assert!(speaker.spoken().is_empty());
    }
}
