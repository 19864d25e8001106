//! Progress reporting for training runs.
//!
//! Purely observational: sinks see a start and a finish event per model and
//! cannot influence control flow.

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// A timestamped progress message for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    Started {
        model: String,
        at: DateTime<Utc>,
    },
    Finished {
        model: String,
        at: DateTime<Utc>,
        success: bool,
    },
}

impl ProgressEvent {
    pub fn started(model: impl Into<String>) -> Self {
        Self::Started {
            model: model.into(),
            at: Utc::now(),
        }
    }

    pub fn finished(model: impl Into<String>, success: bool) -> Self {
        Self::Finished {
            model: model.into(),
            at: Utc::now(),
            success,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Started { model, .. } | Self::Finished { model, .. } => model,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Started { at, .. } | Self::Finished { at, .. } => *at,
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = self.timestamp().format("%Y-%m-%d %H:%M:%S");
        match self {
            Self::Started { model, .. } => write!(f, "[{at}] Started training {model}"),
            Self::Finished { model, success: true, .. } => {
                write!(f, "[{at}] Model {model} done")
            }
            Self::Finished { model, success: false, .. } => {
                write!(f, "[{at}] Model {model} failed")
            }
        }
    }
}

/// Receiver of progress events.
pub trait ProgressSink {
    fn on_event(&self, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl ProgressSink for Silent {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Finished { success: false, .. } => warn!("{}", event),
            _ => info!("{}", event),
        }
    }
}

/// Forwards events over a channel.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgress {
    fn on_event(&self, event: &ProgressEvent) {
        // Best-effort send; a dropped receiver must not affect training.
        let _ = self.tx.try_send(event.clone());
    }
}
