//! Stepwise volume interpolation with cancellation, used by the alert
//! controller and favourite-playback fade-ins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const MIN_STEP_MS: u64 = 200;

/// Cancellable, keyed stepwise volume fade. Scheduling under a key already
/// in flight cancels the prior fade atomically before starting the new one.
pub struct FadeController {
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl FadeController {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Schedules a fade from `from` to `to` over `duration_ms`, calling
    /// `on_step` at each tick (first call is immediate, with `from`) and
    /// `on_complete` once the fade reaches `to` without being cancelled.
    pub async fn schedule_fade<Step, StepFut, Complete, CompleteFut>(
        self: &Arc<Self>,
        key: impl Into<String>,
        from: i32,
        to: i32,
        duration_ms: u64,
        on_step: Step,
        on_complete: Option<Complete>,
    ) where
        Step: Fn(u8) -> StepFut + Send + Sync + 'static,
        StepFut: Future<Output = ()> + Send,
        Complete: FnOnce() -> CompleteFut + Send + 'static,
        CompleteFut: Future<Output = ()> + Send,
    {
        let key = key.into();
        let token = CancellationToken::new();

        {
            let mut guard = self.active.lock().await;
            if let Some(prev) = guard.insert(key.clone(), token.clone()) {
                prev.cancel();
            }
        }

        let steps = ((duration_ms as f64 / MIN_STEP_MS as f64).ceil() as u64).max(1);
        let step_interval = Duration::from_millis((duration_ms / steps).max(50));

        let from_clamped = from.clamp(0, 100);
        let to_clamped = to.clamp(0, 100);

        on_step(from_clamped as u8).await;

        for i in 1..=steps {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(step_interval) => {}
            }

            let value = if i == steps {
                to_clamped
            } else {
                let progress = i as f64 / steps as f64;
                from_clamped + ((to_clamped - from_clamped) as f64 * progress).round() as i32
            };
            on_step(value.clamp(0, 100) as u8).await;
        }

        {
            let mut guard = self.active.lock().await;
            if guard.get(&key).map(|t| t.is_cancelled()) == Some(false) {
                guard.remove(&key);
            }
        }

        if let Some(on_complete) = on_complete {
            on_complete().await;
        }
    }

    pub async fn cancel(&self, key: &str) {
        if let Some(token) = self.active.lock().await.remove(key) {
            token.cancel();
        }
    }
}

impl Default for FadeController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[tokio::test]
    async fn fade_reaches_target_without_overshoot() {
        let controller = Arc::new(FadeController::new());
        let steps: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let steps_clone = steps.clone();

        controller
            .schedule_fade(
                "zone-1",
                0,
                100,
                400,
                move |v| {
                    let steps = steps_clone.clone();
                    async move {
                        steps.lock().await.push(v);
                    }
                },
                None::<fn() -> std::future::Ready<()>>,
            )
            .await;

        let recorded = steps.lock().await;
        assert_eq!(*recorded.last().unwrap(), 100);
        assert!(recorded.iter().all(|v| *v <= 100));
    }

    #[tokio::test]
    async fn scheduling_under_same_key_cancels_prior_fade() {
        let controller = Arc::new(FadeController::new());
        let reached_complete = Arc::new(AtomicI32::new(0));
        let reached_clone = reached_complete.clone();

        let long_fade = controller.clone();
        let handle = tokio::spawn(async move {
            long_fade
                .schedule_fade(
                    "zone-1",
                    0,
                    100,
                    5000,
                    |_v| async move {},
                    Some(move || async move {
                        reached_clone.store(1, Ordering::SeqCst);
                    }),
                )
                .await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        controller
            .schedule_fade(
                "zone-1",
                0,
                50,
                50,
                |_v| async move {},
                None::<fn() -> std::future::Ready<()>>,
            )
            .await;

        let _ = handle.await;
        assert_eq!(reached_complete.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn on_step_error_is_swallowed_and_fade_proceeds() {
        let controller = Arc::new(FadeController::new());
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        controller
            .schedule_fade(
                "zone-2",
                0,
                10,
                200,
                move |_v| {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if let Err(e) = Err::<(), &str>("simulated backend error") {
                            warn!(error = e, "fade step failed");
                        }
                    }
                },
                None::<fn() -> std::future::Ready<()>>,
            )
            .await;

        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
