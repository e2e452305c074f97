//! Turns noisy per-frame predictions into one stable access decision per
//! window of observations.

use crate::common::Result;
use crate::core::labels::{LabelMap, UNKNOWN};
use crate::storage::{AccessLevel, EventLog, JobStatus, RosterRecord, RosterStore};

/// Source of roster records for resolved names.
pub trait RosterLookup {
    fn lookup(&self, name: &str) -> Result<Option<RosterRecord>>;
}

impl RosterLookup for RosterStore {
    fn lookup(&self, name: &str) -> Result<Option<RosterRecord>> {
        RosterStore::lookup(self, name)
    }
}

/// Bounded buffer of resolved names in arrival order.
#[derive(Debug, Clone)]
pub struct ObservationWindow {
    capacity: usize,
    names: Vec<String>,
}

impl ObservationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            names: Vec::with_capacity(capacity),
        }
    }

    /// Appends `name` and reports whether the window is now full.
    pub fn push(&mut self, name: &str) -> bool {
        self.names.push(name.to_string());
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.names.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    /// Name with the highest count. Among tied counts the name that first
    /// appeared earliest in the window wins.
    pub fn winner(&self) -> Option<(&str, usize)> {
        let mut histogram: Vec<(&str, usize)> = Vec::new();
        for name in &self.names {
            match histogram.iter_mut().find(|(n, _)| *n == name.as_str()) {
                Some((_, count)) => *count += 1,
                None => histogram.push((name.as_str(), 1)),
            }
        }

        let mut best: Option<(&str, usize)> = None;
        for (name, count) in histogram {
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((name, count));
            }
        }
        best
    }
}

/// Stabilized identity for one window, with the roster fields it resolved to.
/// The roster fields are `None` when the name has no roster row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub name: String,
    pub count: usize,
    pub job_status: Option<JobStatus>,
    pub permission_level: Option<AccessLevel>,
    pub door_number: Option<String>,
}

impl AccessDecision {
    fn resolve(name: &str, count: usize, record: Option<RosterRecord>) -> Self {
        match record {
            Some(record) => Self {
                name: name.to_string(),
                count,
                job_status: Some(record.job_status),
                permission_level: Some(record.access_level),
                door_number: Some(record.door_number),
            },
            None => Self {
                name: name.to_string(),
                count,
                job_status: None,
                permission_level: None,
                door_number: None,
            },
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.permission_level.is_some()
    }

    pub fn permission_label(&self) -> String {
        self.permission_level
            .map(|l| l.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn door_label(&self) -> &str {
        self.door_number.as_deref().unwrap_or("")
    }
}

pub struct RecognitionAggregator<R: RosterLookup = RosterStore> {
    acceptance_threshold: f64,
    window: ObservationWindow,
    roster: R,
    event_log: EventLog,
}

impl<R: RosterLookup> RecognitionAggregator<R> {
    pub fn new(acceptance_threshold: f64, capacity: usize, roster: R, event_log: EventLog) -> Self {
        Self {
            acceptance_threshold,
            window: ObservationWindow::new(capacity),
            roster,
            event_log,
        }
    }

    pub fn window(&self) -> &ObservationWindow {
        &self.window
    }

    pub fn roster(&self) -> &R {
        &self.roster
    }

    /// Feeds one prediction. Returns a decision only when this observation
    /// filled the window and the winner is an enrolled name.
    pub fn observe(
        &mut self,
        label: Option<u32>,
        confidence: f64,
        labels: &LabelMap,
    ) -> Option<AccessDecision> {
        if confidence <= self.acceptance_threshold {
            return None;
        }
        if !self.window.push(labels.name(label)) {
            return None;
        }

        let decision = self.decide();
        self.window.clear();
        decision
    }

    fn decide(&mut self) -> Option<AccessDecision> {
        let (name, count) = self.window.winner()?;
        if name == UNKNOWN {
            tracing::debug!("Window dominated by unknown faces ({} of {})", count, self.window.len());
            return None;
        }
        let name = name.to_string();

        if let Err(e) = self.event_log.append(&name, count) {
            tracing::warn!("Failed to append to event log {}: {}", self.event_log.path().display(), e);
        }

        let record = match self.roster.lookup(&name) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Roster lookup for {} failed: {}", name, e);
                None
            }
        };
        if record.is_none() {
            tracing::info!("{} is not on the roster", name);
        }

        let decision = AccessDecision::resolve(&name, count, record);
        tracing::info!(
            "Recognized {} ({}/{}), level {}, door {:?}",
            decision.name, count, self.window.capacity(), decision.permission_label(), decision.door_label()
        );
        Some(decision)
    }

    /// Drops any partially filled window.
    pub fn reset(&mut self) {
        self.window.clear();
    }
}
