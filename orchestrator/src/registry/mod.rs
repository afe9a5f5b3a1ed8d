mod store;

use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use machine_learning::ModelType;
use parking_lot::RwLock;
use trainer::Hyperparameters;
use uuid::Uuid;

pub use store::{JsonFileStore, MemoryStore, SessionStore, Snapshot};

use crate::{
    error::RegistryErr,
    session::{
        Completion, HistoryEntry, RegistryStats, SessionStatus, SessionUpdate, TrainingSession,
    },
};

pub type Result<T> = std::result::Result<T, RegistryErr>;

#[derive(Debug, Default)]
struct State {
    /// In creation order.
    sessions: Vec<TrainingSession>,
    history: Vec<HistoryEntry>,
    current: Option<String>,
    stats: RegistryStats,
}

impl State {
    fn find(&self, id: &str) -> Result<&TrainingSession> {
        self.sessions
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| RegistryErr::NotFound(id.to_string()))
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut TrainingSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| RegistryErr::NotFound(id.to_string()))
    }

    /// Like `find_mut`, but refuses sessions that already completed or failed.
    fn find_unfinished(&mut self, id: &str) -> Result<&mut TrainingSession> {
        let session = self.find_mut(id)?;
        if session.status.is_terminal() {
            return Err(RegistryErr::Finished {
                id: id.to_string(),
                status: session.status,
            });
        }
        Ok(session)
    }

    fn active(&self) -> Option<&TrainingSession> {
        self.sessions.iter().find(|s| s.status.is_active())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            sessions: self
                .sessions
                .iter()
                .filter(|s| s.status.is_terminal())
                .cloned()
                .collect(),
            history: self.history.clone(),
            stats: self.stats,
        }
    }
}

/// The shared record of every training session.
///
/// Every mutation goes through a single write lock. Terminal transitions (complete, fail,
/// remove) persist a snapshot with only the completed and failed sessions to the store.
/// At most one session may be in an active status at any time.
#[derive(Debug)]
pub struct SessionRegistry<S: SessionStore = MemoryStore> {
    state: RwLock<State>,
    store: S,
}

impl SessionRegistry<MemoryStore> {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::default(),
            store: MemoryStore::new(),
        }
    }
}

impl<S: SessionStore> SessionRegistry<S> {
    /// Opens a registry, restoring whatever `store` last saved.
    ///
    /// # Arguments
    /// * `store` - The persistence backend.
    ///
    /// # Returns
    /// A new registry or the error the store failed to load with.
    pub fn open(store: S) -> Result<Self> {
        let Snapshot {
            sessions,
            history,
            stats,
        } = store.load()?;

        debug!(sessions = sessions.len(), history = history.len(); "session registry restored");

        let state = State {
            sessions,
            history,
            current: None,
            stats,
        };

        Ok(Self {
            state: RwLock::new(state),
            store,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Registers a new idle session and makes it the current one.
    ///
    /// # Returns
    /// The freshly generated id of the session.
    pub fn create_session(
        &self,
        model_id: impl Into<String>,
        model_type: ModelType,
        hyperparameters: Hyperparameters,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let session = TrainingSession::new(id.clone(), model_id.into(), model_type, hyperparameters);

        let mut state = self.state.write();
        state.sessions.push(session);
        state.current = Some(id.clone());

        info!(session = id.as_str(), model = model_type.to_string().as_str(); "session created");
        id
    }

    /// Applies a partial update to a session.
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `ActiveSessionExists` if the update would make a
    /// second session active.
    pub fn update_session(&self, id: &str, update: SessionUpdate) -> Result<()> {
        let mut state = self.state.write();

        if let Some(status) = update.status
            && status.is_active()
            && let Some(active) = state.active()
            && active.id != id
        {
            return Err(RegistryErr::ActiveSessionExists(active.id.clone()));
        }

        state.find_mut(id)?.apply(update);
        Ok(())
    }

    /// Marks a session as completed and appends its history entry.
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `Finished` if the session already completed or failed.
    pub fn complete_session(&self, id: &str, completion: Completion) -> Result<()> {
        let mut state = self.state.write();
        let now = Utc::now();

        let session = state.find_unfinished(id)?;
        session.status = SessionStatus::Completed;
        session.progress = 100.;
        session.loss = completion.loss;
        session.accuracy = completion.accuracy;
        session.end_time = Some(now);
        if completion.blob_reference.is_some() {
            session.blob_reference = completion.blob_reference;
        }

        let duration = session.duration();
        let entry = HistoryEntry {
            session_id: session.id.clone(),
            timestamp: now,
            model_type: session.model_type,
            final_loss: session.loss,
            final_accuracy: session.accuracy,
            duration,
            blob_reference: session.blob_reference.clone(),
        };

        state.history.push(entry);
        state.stats.completed_count += 1;
        state.stats.total_duration += duration;
        if state.current.as_deref() == Some(id) {
            state.current = None;
        }

        info!(session = id, accuracy = completion.accuracy; "session completed");
        self.persist(&state)
    }

    /// Marks a session as failed, keeping everything it accumulated so far.
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `Finished` if the session already completed or failed.
    pub fn fail_session(&self, id: &str, error: impl Into<String>) -> Result<()> {
        let mut state = self.state.write();

        let session = state.find_unfinished(id)?;
        let error = error.into();
        warn!(session = id; "session failed: {error}");

        session.status = SessionStatus::Failed;
        session.error = Some(error);
        session.end_time = Some(Utc::now());

        self.persist(&state)
    }

    /// Removes a session together with its history entries.
    pub fn remove_session(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();

        let before = state.sessions.len();
        state.sessions.retain(|s| s.id != id);
        if state.sessions.len() == before {
            return Err(RegistryErr::NotFound(id.to_string()));
        }

        state.history.retain(|h| h.session_id != id);
        if state.current.as_deref() == Some(id) {
            state.current = None;
        }

        debug!(session = id; "session removed");
        self.persist(&state)
    }

    pub fn get_session(&self, id: &str) -> Option<TrainingSession> {
        self.state.read().find(id).ok().cloned()
    }

    /// The session in the active slot, if any.
    pub fn active_session(&self) -> Option<TrainingSession> {
        self.state.read().active().cloned()
    }

    /// The most recently created session, until it completes or is removed.
    pub fn current_session(&self) -> Option<TrainingSession> {
        let state = self.state.read();
        let id = state.current.as_deref()?;
        state.find(id).ok().cloned()
    }

    pub fn sessions(&self) -> Vec<TrainingSession> {
        self.state.read().sessions.clone()
    }

    /// Up to `limit` sessions, newest start time first.
    pub fn recent_sessions(&self, limit: usize) -> Vec<TrainingSession> {
        let mut sessions = self.sessions();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        sessions.truncate(limit);
        sessions
    }

    /// Mean accuracy over completed sessions, `0` if there are none.
    pub fn average_accuracy(&self) -> f32 {
        self.completed_mean(|s| s.accuracy)
    }

    /// Mean loss over completed sessions, `0` if there are none.
    pub fn average_loss(&self) -> f32 {
        self.completed_mean(|s| s.loss)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().history.clone()
    }

    pub fn stats(&self) -> RegistryStats {
        self.state.read().stats
    }

    /// Average wall time of a completed session.
    pub fn average_duration(&self) -> Duration {
        let stats = self.stats();
        match u32::try_from(stats.completed_count) {
            Ok(n) if n > 0 => stats.total_duration / n,
            _ => Duration::ZERO,
        }
    }

    fn completed_mean(&self, f: impl Fn(&TrainingSession) -> f32) -> f32 {
        let state = self.state.read();
        let (sum, n) = state
            .sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .fold((0., 0usize), |(sum, n), s| (sum + f(s), n + 1));

        if n == 0 { 0. } else { sum / n as f32 }
    }

    fn persist(&self, state: &State) -> Result<()> {
        self.store.save(&state.snapshot()).inspect_err(|e| {
            warn!("failed to persist the session registry: {e}");
        })
    }
}
