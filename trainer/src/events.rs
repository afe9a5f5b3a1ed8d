use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::metrics::{EpochMetrics, ProgressUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    fn as_log(self) -> log::Level {
        match self {
            Self::Info | Self::Success => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
        };

        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// What an observer of a training run gets to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum TrainingEvent {
    Progress(ProgressUpdate),
    EpochComplete(EpochMetrics),
    Log(LogLine),
}

/// A subscriber to the events of one session.
pub trait Observer: Send {
    fn notify(&mut self, event: &TrainingEvent);
}

impl<F> Observer for F
where
    F: FnMut(&TrainingEvent) + Send,
{
    fn notify(&mut self, event: &TrainingEvent) {
        self(event)
    }
}

/// Ordered multicast of the events of a single session.
///
/// Delivery takes `&mut self`, so observers are called one at a time in
/// subscription order and never re-entrantly.
pub struct Emitter {
    session: String,
    observers: Vec<Box<dyn Observer>>,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("session", &self.session)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Emitter {
    /// Creates a new `Emitter` without observers.
    ///
    /// # Arguments
    /// * `session` - The session the events belong to, used to tag log records.
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            observers: Vec::new(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn subscribe<O: Observer + 'static>(&mut self, observer: O) {
        self.observers.push(Box::new(observer));
    }

    /// Builder flavour of `subscribe`.
    pub fn with<O: Observer + 'static>(mut self, observer: O) -> Self {
        self.subscribe(observer);
        self
    }

    /// Subscribes a channel and returns its receiving end.
    ///
    /// Dropping the receiver silently stops the forwarding.
    pub fn subscribe_channel(&mut self) -> mpsc::UnboundedReceiver<TrainingEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |event: &TrainingEvent| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    pub fn emit(&mut self, event: TrainingEvent) {
        for observer in self.observers.iter_mut() {
            observer.notify(&event);
        }
    }

    /// Emits a log line and mirrors it to the `log` facade.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        log::log!(level.as_log(), session = self.session.as_str(); "{message}");

        self.emit(TrainingEvent::Log(LogLine {
            timestamp: Utc::now(),
            level,
            message,
        }));
    }
}
