// Lifecycle sweeper
// Periodically ends expired sessions and prunes ended entries from the fast
// tier. Several sweepers (one per instance) may run against the same store.

use crate::session::{SessionError, SessionManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration as TokioDuration, MissedTickBehavior, interval};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Sessions ended per durable-tier scan
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            batch_size: 500,
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions transitioned to ended
    pub ended: usize,
    /// Ended entries dropped from the fast tier
    pub evicted: usize,
}

pub struct LifecycleSweeper {
    sessions: Arc<SessionManager>,
    config: SweeperConfig,
    shutdown: watch::Sender<bool>,
}

impl LifecycleSweeper {
    pub fn new(sessions: Arc<SessionManager>, config: SweeperConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            sessions,
            config,
            shutdown,
        }
    }

    /// One full sweep: end everything expired, then evict fast-tier entries
    /// that ended before the retention window
    pub async fn run_once(&self) -> Result<SweepReport, SessionError> {
        let ended = self
            .sessions
            .end_expired_sessions_in_batches(self.config.batch_size)
            .await?;

        let cutoff = self.sessions.now() - self.sessions.config().ended_retention();
        let evicted = match self.sessions.evict_ended_before(cutoff).await {
            Ok(evicted) => evicted,
            Err(e) => {
                // The fast tier expires entries on its own; eviction only tightens the bound
                error!("Fast tier eviction failed: {}", e);
                0
            }
        };

        Ok(SweepReport { ended, evicted })
    }

    /// Start the background sweep loop
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            "Starting lifecycle sweeper (every {}s, batch {})",
            self.config.interval_secs, self.config.batch_size
        );
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(TokioDuration::from_secs(self.config.interval_secs.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                match self.run_once().await {
                    Ok(report) if report.ended > 0 || report.evicted > 0 => {
                        info!(
                            "Sweep ended {} sessions, evicted {} cache entries",
                            report.ended, report.evicted
                        );
                    }
                    Ok(_) => debug!("Sweep found nothing to do"),
                    Err(e) => error!("Sweep failed: {}", e),
                }
            }

            info!("Lifecycle sweeper stopped");
        })
    }

    /// Ask a running loop to stop after its current sweep
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fingerprint::DeviceFingerprintEngine;
    use crate::session::{
        FastTier, MemoryDurableStore, MemoryFastTier, SessionConfig, SessionContext,
    };
    use chrono::Duration;

    fn setup() -> (Arc<ManualClock>, Arc<MemoryFastTier>, Arc<SessionManager>) {
        let clock = Arc::new(ManualClock::starting_now());
        let fast = Arc::new(MemoryFastTier::new(clock.clone()));
        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemoryDurableStore::new()),
            fast.clone(),
            Arc::new(DeviceFingerprintEngine::default()),
            clock.clone(),
            SessionConfig::default(),
        ));
        (clock, fast, sessions)
    }

    fn context() -> SessionContext {
        SessionContext {
            ip_address: "192.168.1.1".to_string(),
            user_agent: None,
            persistent: false,
        }
    }

    #[tokio::test]
    async fn test_run_once_ends_expired_in_batches() {
        let (clock, _, sessions) = setup();
        for i in 0..7 {
            sessions
                .create_session(&format!("user-{}", i), &context())
                .await
                .unwrap();
        }
        clock.advance(Duration::hours(25));
        let live = sessions.create_session("user-live", &context()).await.unwrap();

        let sweeper = LifecycleSweeper::new(
            sessions.clone(),
            SweeperConfig {
                batch_size: 3,
                ..Default::default()
            },
        );

        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.ended, 7);
        assert!(sessions.get_valid_session(&live.session_id).await.is_ok());

        assert_eq!(sweeper.run_once().await.unwrap().ended, 0);
    }

    #[tokio::test]
    async fn test_run_once_evicts_after_retention() {
        let (clock, fast, sessions) = setup();
        let s = sessions.create_session("user-1", &context()).await.unwrap();
        sessions.invalidate_session(&s.session_id, "logout").await.unwrap();

        let sweeper = LifecycleSweeper::new(sessions.clone(), SweeperConfig::default());

        // Inside the retention window the ended entry stays cached
        clock.advance(Duration::hours(1));
        assert_eq!(sweeper.run_once().await.unwrap().evicted, 0);
        assert!(fast.get(&s.session_id).await.unwrap().is_some());

        clock.advance(Duration::hours(24));
        sweeper.run_once().await.unwrap();
        assert!(fast.get(&s.session_id).await.unwrap().is_none());

        // The durable record is kept for audit
        let stored = sessions.get_session(&s.session_id).await.unwrap();
        assert!(stored.is_ended);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (clock, _, sessions) = setup();
        let s = sessions.create_session("user-1", &context()).await.unwrap();
        clock.advance(Duration::hours(25));

        let sweeper = Arc::new(LifecycleSweeper::new(
            sessions.clone(),
            SweeperConfig {
                interval_secs: 1,
                ..Default::default()
            },
        ));
        let handle = sweeper.clone().start();

        // First tick fires immediately
        for _ in 0..50 {
            if sessions.get_session(&s.session_id).await.unwrap().is_ended {
                break;
            }
            tokio::time::sleep(TokioDuration::from_millis(10)).await;
        }
        assert!(sessions.get_session(&s.session_id).await.unwrap().is_ended);

        sweeper.stop();
        handle.await.unwrap();
    }
}
