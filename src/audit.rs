//! Integrity audit trail.
//!
//! Every dropped row and every completeness violation becomes an
//! [`IntegrityEvent`]. Each event is forwarded to pluggable sinks (a file, a
//! SIEM shipper, a test collector), which hold the full history. In memory
//! the trail keeps only the most recent events.

use std::collections::{vec_deque, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RowFault;
use crate::record::RowId;

/// A sink that receives integrity events.
pub trait IntegritySink: Send {
    /// Called once per event, in the order events are raised.
    fn append(&mut self, event: IntegrityEvent);
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum IntegrityEventKind {
    /// The row failed a per-row check and was left out of the result.
    RowDropped { fault: RowFault },
    /// The chain broke at this row and the scan was aborted.
    CompletenessViolation,
}

/// A permanent record of an integrity failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityEvent {
    pub row_id: RowId,
    #[serde(flatten)]
    pub kind: IntegrityEventKind,
    /// Opaque identity of the caller whose scan observed the failure.
    pub caller: String,
    pub timestamp: DateTime<Utc>,
}

impl IntegrityEvent {
    pub fn new(row_id: RowId, kind: IntegrityEventKind, caller: &str) -> Self {
        Self {
            row_id,
            kind,
            caller: caller.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Events kept in memory by default.
pub const DEFAULT_RETAINED_EVENTS: usize = 1024;

/// A bounded, in-memory trail of the most recent integrity events.
pub struct AuditTrail {
    events: VecDeque<IntegrityEvent>,
    capacity: usize,
    forward_sinks: Vec<Box<dyn IntegritySink>>,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RETAINED_EVENTS)
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("events", &self.events)
            .field("capacity", &self.capacity)
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// A trail that keeps at most `capacity` events in memory.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_RETAINED_EVENTS)),
            capacity,
            forward_sinks: Vec::new(),
        }
    }

    /// Change the retention limit, evicting the oldest events if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.events.len() > capacity {
            self.events.pop_front();
        }
    }

    /// Add a sink to receive a copy of every event.
    pub fn add_forward_sink(&mut self, sink: Box<dyn IntegritySink>) {
        self.forward_sinks.push(sink);
    }

    /// Forward an event to attached sinks and retain it, evicting the oldest
    /// retained event once the trail is full.
    pub fn append(&mut self, event: IntegrityEvent) {
        for sink in self.forward_sinks.iter_mut() {
            sink.append(event.clone());
        }
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Retained events, oldest first.
    pub fn iter(&self) -> vec_deque::Iter<'_, IntegrityEvent> {
        self.events.iter()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes events as JSON lines to a file opened in append mode.
pub struct FileIntegritySink {
    file: std::fs::File,
}

impl FileIntegritySink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl IntegritySink for FileIntegritySink {
    fn append(&mut self, event: IntegrityEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "cannot serialize integrity event");
                return;
            }
        };
        if let Err(err) = writeln!(self.file, "{line}").and_then(|_| self.file.flush()) {
            tracing::warn!(error = %err, "cannot write integrity event");
        }
    }
}
