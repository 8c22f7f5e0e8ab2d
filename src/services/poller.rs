//! Fixed-interval polling that detects when a WhatsApp pairing completes.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use uuid::Uuid;

use super::gateway::{InstanceProfile, LinkedProfile, SessionGateway};
use crate::error::AppResult;

#[async_trait]
pub trait ProfileProbe: Send + Sync {
    async fn fetch_profile(&self, instance_name: &str) -> AppResult<InstanceProfile>;
}

#[async_trait]
impl ProfileProbe for SessionGateway {
    async fn fetch_profile(&self, instance_name: &str) -> AppResult<InstanceProfile> {
        SessionGateway::fetch_profile(self, instance_name).await
    }
}

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` polls until cancelled.
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Linked(LinkedProfile),
    GaveUp { attempts: u32 },
}

/// Poll `probe` until it reports a complete profile.
///
/// Fetch errors and incomplete profiles both count as "still disconnected".
/// There is no backoff: every attempt waits exactly one interval.
pub async fn poll_until_linked<P>(probe: &P, instance_name: &str, settings: PollSettings) -> PollOutcome
where
    P: ProfileProbe + ?Sized,
{
    // tokio rejects a zero period.
    let period = settings.interval.max(MIN_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempts = 0;
    loop {
        ticker.tick().await;
        attempts += 1;

        match probe.fetch_profile(instance_name).await {
            Ok(profile) => match profile.linked() {
                Some(linked) => {
                    tracing::info!(instance_name, attempts, "Pairing completed");
                    return PollOutcome::Linked(linked);
                }
                None => tracing::debug!(instance_name, attempts, "Profile incomplete"),
            },
            Err(e) => tracing::debug!(instance_name, attempts, "Profile fetch failed: {}", e),
        }

        if settings.max_attempts.is_some_and(|max| attempts >= max) {
            tracing::warn!(instance_name, attempts, "Pairing poll gave up");
            return PollOutcome::GaveUp { attempts };
        }
    }
}

/// At most one running poll per connection.
#[derive(Default)]
pub struct PollerRegistry {
    tasks: Mutex<HashMap<Uuid, (u64, JoinHandle<()>)>>,
    next_generation: Mutex<u64>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling for `connection_id`, cancelling any poll already
    /// running for it. `on_done` runs once with the outcome.
    ///
    /// The entry stays registered until `on_done` has finished, so `cancel`
    /// also aborts an outcome that is still being recorded.
    pub fn start<F, Fut>(
        self: &Arc<Self>,
        connection_id: Uuid,
        probe: Arc<dyn ProfileProbe>,
        instance_name: String,
        settings: PollSettings,
        on_done: F,
    ) where
        F: FnOnce(PollOutcome) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = {
            let mut next = self.next_generation.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };

        // Held across the spawn so a fast poll cannot finish before it is registered.
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = poll_until_linked(probe.as_ref(), &instance_name, settings).await;
            on_done(outcome).await;
            registry.finish(connection_id, generation);
        });

        if let Some((_, previous)) = tasks.insert(connection_id, (generation, handle)) {
            previous.abort();
            tracing::debug!(%connection_id, "Replaced running pairing poll");
        }
    }

    pub fn cancel(&self, connection_id: Uuid) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.remove(&connection_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, connection_id: Uuid) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.contains_key(&connection_id)
    }

    fn finish(&self, connection_id: Uuid, generation: u64) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if tasks.get(&connection_id).is_some_and(|(g, _)| *g == generation) {
            tasks.remove(&connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicBool, AtomicU32, Ordering},
    };

    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, task};

    use super::*;
    use crate::error::AppError;

    struct ScriptedProbe {
        replies: Mutex<VecDeque<AppResult<InstanceProfile>>>,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(replies: Vec<AppResult<InstanceProfile>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ProfileProbe for ScriptedProbe {
        async fn fetch_profile(&self, _instance_name: &str) -> AppResult<InstanceProfile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(InstanceProfile::default()))
        }
    }

    fn complete() -> InstanceProfile {
        InstanceProfile {
            profile_name: Some("Loja Centro".into()),
            contact: Some("5511999990000".into()),
            profile_picture_url: Some("https://pps.whatsapp.net/v/p.jpg".into()),
        }
    }

    fn fast(max_attempts: Option<u32>) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn incomplete_profile_keeps_polling() {
        let missing_picture = InstanceProfile {
            profile_picture_url: None,
            ..complete()
        };
        let probe = ScriptedProbe::new(vec![
            Ok(missing_picture),
            Err(AppError::Upstream("502".into())),
            Ok(complete()),
        ]);

        let outcome = poll_until_linked(&probe, "loja", fast(None)).await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        match outcome {
            PollOutcome::Linked(linked) => assert_eq!(linked.profile_name, "Loja Centro"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let probe = ScriptedProbe::new(vec![]);

        let outcome = poll_until_linked(&probe, "loja", fast(Some(4))).await;

        assert_eq!(outcome, PollOutcome::GaveUp { attempts: 4 });
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn registry_reports_outcome_and_clears_entry() {
        let registry = Arc::new(PollerRegistry::new());
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        registry.start(
            id,
            Arc::new(ScriptedProbe::new(vec![Ok(complete())])),
            "loja".into(),
            fast(None),
            move |outcome| async move {
                let _ = tx.send(outcome);
            },
        );

        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, PollOutcome::Linked(_)));

        // The entry is dropped right after the callback returns.
        for _ in 0..100 {
            if !registry.is_polling(id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!registry.is_polling(id));
    }

    #[tokio::test]
    async fn restarting_cancels_previous_poll() {
        let registry = Arc::new(PollerRegistry::new());
        let id = Uuid::new_v4();
        let (first_tx, first_rx) = oneshot::channel::<PollOutcome>();

        // Never links, so only cancellation can end it.
        registry.start(
            id,
            Arc::new(ScriptedProbe::new(vec![])),
            "loja".into(),
            fast(None),
            move |outcome| async move {
                let _ = first_tx.send(outcome);
            },
        );
        assert!(registry.is_polling(id));

        let (second_tx, second_rx) = oneshot::channel();
        registry.start(
            id,
            Arc::new(ScriptedProbe::new(vec![Ok(complete())])),
            "loja".into(),
            fast(None),
            move |outcome| async move {
                let _ = second_tx.send(outcome);
            },
        );

        assert!(matches!(second_rx.await.unwrap(), PollOutcome::Linked(_)));
        // The aborted task dropped its sender without reporting.
        assert!(first_rx.await.is_err());
    }

    #[tokio::test]
    async fn first_fetch_waits_one_interval() {
        let probe = ScriptedProbe::new(vec![Ok(complete())]);
        let settings = PollSettings {
            interval: Duration::from_secs(3),
            max_attempts: None,
        };

        let mut poll = task::spawn(poll_until_linked(&probe, "loja", settings));
        assert_pending!(poll.poll());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_interval_still_polls() {
        let probe = ScriptedProbe::new(vec![]);
        let settings = PollSettings {
            interval: Duration::ZERO,
            max_attempts: Some(2),
        };

        let outcome = poll_until_linked(&probe, "loja", settings).await;

        assert_eq!(outcome, PollOutcome::GaveUp { attempts: 2 });
    }

    #[tokio::test]
    async fn cancel_aborts_outcome_being_recorded() {
        let registry = Arc::new(PollerRegistry::new());
        let id = Uuid::new_v4();
        let recorded = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = oneshot::channel();

        let flag = Arc::clone(&recorded);
        registry.start(
            id,
            Arc::new(ScriptedProbe::new(vec![Ok(complete())])),
            "loja".into(),
            fast(None),
            move |_| async move {
                let _ = started_tx.send(());
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
            },
        );

        started_rx.await.unwrap();
        assert!(registry.is_polling(id));
        assert!(registry.cancel(id));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!recorded.load(Ordering::SeqCst));
        assert!(!registry.is_polling(id));
    }

    #[tokio::test]
    async fn cancel_stops_polling() {
        let registry = Arc::new(PollerRegistry::new());
        let id = Uuid::new_v4();

        registry.start(
            id,
            Arc::new(ScriptedProbe::new(vec![])),
            "loja".into(),
            fast(None),
            |_| async {},
        );

        assert!(registry.cancel(id));
        assert!(!registry.is_polling(id));
        assert!(!registry.cancel(id));
    }
}
