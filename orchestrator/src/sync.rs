use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{BackendService, RemoteResult, RemoteState, RemoteStatus},
    error::RegistryErr,
    registry::{SessionRegistry, SessionStore},
    session::{Completion, SessionStatus, SessionUpdate},
};

/// Polling policy of the background sync.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    /// Consecutive `NotFound` answers tolerated before the session fails.
    pub max_not_found: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_not_found: 8,
        }
    }
}

/// How the tracking of one delegated session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    Failed,
    Stopped,
    /// The sync was shut down first.
    Cancelled,
    /// The local session disappeared from the registry.
    Detached,
}

/// Mirrors backend delegated runs into the local registry.
///
/// Each tracked session gets its own polling task, all of them stop when `shutdown` is called.
pub struct BackendSync<S: SessionStore> {
    backend: Arc<dyn BackendService>,
    registry: Arc<SessionRegistry<S>>,
    config: SyncConfig,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<SyncOutcome>>>,
}

impl<S: SessionStore + 'static> BackendSync<S> {
    /// Creates a new `BackendSync`.
    ///
    /// # Arguments
    /// * `backend` - The service the runs were delegated to.
    /// * `registry` - The registry the delegated sessions live in.
    /// * `config` - The polling policy.
    pub fn new(
        backend: Arc<dyn BackendService>,
        registry: Arc<SessionRegistry<S>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            config,
            token: CancellationToken::new(),
            tasks: Mutex::default(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn BackendService> {
        &self.backend
    }

    /// Starts polling `backend_id` on behalf of the local session `session_id`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn track(&self, session_id: String, backend_id: String) {
        let tracker = Tracker {
            backend: Arc::clone(&self.backend),
            registry: Arc::clone(&self.registry),
            config: self.config,
            token: self.token.child_token(),
            session_id,
            backend_id,
        };

        let handle = tokio::spawn(tracker.run());
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Stops every polling task and waits for them to exit.
    ///
    /// # Returns
    /// The outcome of every task that was still tracked.
    pub async fn shutdown(&self) -> Vec<SyncOutcome> {
        self.token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or(SyncOutcome::Cancelled))
            .collect()
    }

    /// Waits for every tracked session to reach an outcome without cancelling them.
    pub async fn join(&self) -> Vec<SyncOutcome> {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or(SyncOutcome::Cancelled))
            .collect()
    }
}

impl<S: SessionStore> Drop for BackendSync<S> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Tracker<S: SessionStore> {
    backend: Arc<dyn BackendService>,
    registry: Arc<SessionRegistry<S>>,
    config: SyncConfig,
    token: CancellationToken,
    session_id: String,
    backend_id: String,
}

impl<S: SessionStore> Tracker<S> {
    async fn run(self) -> SyncOutcome {
        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut not_found = 0;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => return SyncOutcome::Cancelled,
                _ = interval.tick() => {}
            }

            match self.backend.status(&self.backend_id).await {
                Ok(status) => {
                    not_found = 0;
                    if let Some(outcome) = self.apply(status) {
                        info!(
                            session = self.session_id.as_str();
                            "delegated session finished: {outcome:?}"
                        );
                        return outcome;
                    }
                }
                Err(e) if e.is_not_found() => {
                    not_found += 1;
                    debug!(
                        session = self.session_id.as_str(), misses = not_found;
                        "backend has not seen the session yet"
                    );

                    if not_found > self.config.max_not_found {
                        let error = format!(
                            "backend lost track of the session after {not_found} status polls"
                        );
                        return match self.registry.fail_session(&self.session_id, error) {
                            Ok(()) => SyncOutcome::Failed,
                            Err(_) => SyncOutcome::Detached,
                        };
                    }
                }
                Err(e) => warn!(session = self.session_id.as_str(); "status poll failed: {e}"),
            }
        }
    }

    /// Writes a status into the registry.
    ///
    /// # Returns
    /// The outcome if the remote run is over.
    fn apply(&self, remote: RemoteStatus) -> Option<SyncOutcome> {
        let id = self.session_id.as_str();

        for line in &remote.logs {
            debug!(session = id; "backend {}: {}", line.level, line.message);
        }

        let Some(local) = self.registry.get_session(id) else {
            return Some(SyncOutcome::Detached);
        };

        for metrics in remote.epoch_metrics.iter().skip(local.epoch_metrics.len()) {
            let update = SessionUpdate {
                loss: Some(metrics.train_loss),
                accuracy: Some(metrics.train_accuracy),
                epoch_metrics: Some(metrics.clone()),
                ..Default::default()
            };

            if self.registry.update_session(id, update).is_err() {
                return Some(SyncOutcome::Detached);
            }
        }

        let (status, outcome) = match remote.status {
            RemoteState::Queued => (SessionStatus::Preparing, None),
            RemoteState::Running => (SessionStatus::Training, None),
            RemoteState::Paused => (SessionStatus::Paused, None),
            RemoteState::Stopped => (SessionStatus::Idle, Some(SyncOutcome::Stopped)),
            RemoteState::Completed => {
                let result = remote.result.unwrap_or(RemoteResult {
                    final_loss: local.loss,
                    final_accuracy: local.accuracy,
                    blob_reference: None,
                });

                let completion = Completion {
                    loss: result.final_loss,
                    accuracy: result.final_accuracy,
                    blob_reference: result.blob_reference,
                };

                return Some(match self.registry.complete_session(id, completion) {
                    Ok(()) => SyncOutcome::Completed,
                    Err(e) => {
                        warn!(session = id; "failed to record completion: {e}");
                        SyncOutcome::Detached
                    }
                });
            }
            RemoteState::Failed => {
                let error = remote
                    .error
                    .unwrap_or_else(|| "backend reported a failure".to_string());

                return Some(match self.registry.fail_session(id, error) {
                    Ok(()) => SyncOutcome::Failed,
                    Err(_) => SyncOutcome::Detached,
                });
            }
        };

        let progress = SessionUpdate {
            progress: Some(remote.progress),
            current_epoch: Some(remote.current_epoch),
            ..Default::default()
        };
        let update = SessionUpdate {
            status: Some(status),
            ..progress.clone()
        };

        // While another session holds the active slot only progress is mirrored, the
        // status catches up on a later poll or with the terminal transition.
        let mirrored = match self.registry.update_session(id, update) {
            Err(RegistryErr::ActiveSessionExists(holder)) => {
                debug!(
                    session = id, holder = holder.as_str();
                    "active slot taken, mirroring progress only"
                );
                self.registry.update_session(id, progress)
            }
            other => other,
        };

        match mirrored {
            Ok(()) => outcome,
            Err(e) => {
                warn!(session = id; "failed to mirror backend status: {e}");
                Some(SyncOutcome::Detached)
            }
        }
    }
}
