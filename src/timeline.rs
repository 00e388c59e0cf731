//! Cross-call memory per subject
//!
//! The timeline diffs the newest report against the subject's last snapshot
//! and emits an event for each material change:
//! - dominant behavior label changed
//! - probability of the dominant label moved by at least the shift threshold
//! - any breakout tracker changed state
//!
//! Zone bounds move with ATR from call to call, so a tracker is paired with
//! its predecessor by overlapping bounds rather than by its rounded key.
//! - regime changed
//!
//! The snapshot is overwritten after every call whether or not events fired.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::StoreError;
use crate::structure::{Behavior, BehaviorProbabilities, BreakoutState, BreakoutStatus, Regime};
use crate::types::Subject;
use chrono::{DateTime, Utc};

/// Persisted per-subject snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineState {
    pub last_regime: Regime,
    pub last_zone_signature: String,
    pub last_behavior_probs: BehaviorProbabilities,
    pub last_dominant: Behavior,
    /// Every breakout tracker with its bounds and state
    pub last_breakout_state: Vec<BreakoutStatus>,
    /// Wall clock of the last write
    pub last_updated_ts: DateTime<Utc>,
    /// Bumped on every write, used for compare-and-swap
    pub version: u64,
}

/// Kind of timeline event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    DominantChange,
    ProbabilityShift,
    BreakoutTransition,
    RegimeChange,
}

impl fmt::Display for TimelineEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelineEventType::DominantChange => write!(f, "dominant_change"),
            TimelineEventType::ProbabilityShift => write!(f, "probability_shift"),
            TimelineEventType::BreakoutTransition => write!(f, "breakout_transition"),
            TimelineEventType::RegimeChange => write!(f, "regime_change"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Time of the bar that produced the change
    pub timestamp: DateTime<Utc>,
    pub event_type: TimelineEventType,
    /// Signed probability change, 0 where not applicable
    pub delta: f64,
    /// Template identifier for the display layer
    pub reason_key: String,
}

/// Fresh report fragments the timeline compares against
#[derive(Debug, Clone)]
pub struct TimelineSnapshot {
    pub as_of: DateTime<Utc>,
    pub regime: Regime,
    pub zone_signature: String,
    pub probabilities: BehaviorProbabilities,
    pub dominant: Behavior,
    pub breakout_states: Vec<BreakoutStatus>,
}

/// Diffs snapshots and emits events
#[derive(Debug, Clone)]
pub struct TimelineManager {
    shift_threshold: f64,
}

impl Default for TimelineManager {
    fn default() -> Self {
        Self { shift_threshold: 0.12 }
    }
}

impl TimelineManager {
    pub fn new(shift_threshold: f64) -> Self {
        Self { shift_threshold }
    }

    /// Compare against the previous state and build the next one.
    ///
    /// A subject seen for the first time only establishes its baseline.
    pub fn update(
        &self,
        previous: Option<&TimelineState>,
        snapshot: TimelineSnapshot,
        now: DateTime<Utc>,
    ) -> (Vec<TimelineEvent>, TimelineState) {
        let events = match previous {
            Some(prev) => self.diff(prev, &snapshot),
            None => Vec::new(),
        };

        let state = TimelineState {
            last_regime: snapshot.regime,
            last_zone_signature: snapshot.zone_signature,
            last_behavior_probs: snapshot.probabilities,
            last_dominant: snapshot.dominant,
            last_breakout_state: snapshot.breakout_states,
            last_updated_ts: now,
            version: previous.map_or(1, |p| p.version + 1),
        };

        (events, state)
    }

    fn diff(&self, prev: &TimelineState, snapshot: &TimelineSnapshot) -> Vec<TimelineEvent> {
        let mut events = Vec::new();
        let event = |event_type, delta, reason_key: String| TimelineEvent {
            timestamp: snapshot.as_of,
            event_type,
            delta,
            reason_key,
        };

        let dominant = snapshot.dominant;
        let delta = snapshot.probabilities.get(dominant) - prev.last_behavior_probs.get(dominant);

        if dominant != prev.last_dominant {
            events.push(event(
                TimelineEventType::DominantChange,
                delta,
                format!("timeline.dominant_change.{}", dominant),
            ));
        }

        if delta.abs() >= self.shift_threshold {
            let direction = if delta > 0.0 { "up" } else { "down" };
            events.push(event(
                TimelineEventType::ProbabilityShift,
                delta,
                format!("timeline.probability_shift.{}.{}", dominant, direction),
            ));
        }

        if let Some(state) = strongest_transition(&prev.last_breakout_state, &snapshot.breakout_states) {
            events.push(event(
                TimelineEventType::BreakoutTransition,
                0.0,
                format!("timeline.breakout_transition.{}", state),
            ));
        }

        if snapshot.regime != prev.last_regime {
            events.push(event(
                TimelineEventType::RegimeChange,
                0.0,
                format!("timeline.regime_change.{}_to_{}", prev.last_regime, snapshot.regime),
            ));
        }

        if prev.last_zone_signature != snapshot.zone_signature {
            debug!("zone signature {} -> {}", prev.last_zone_signature, snapshot.zone_signature);
        }

        events
    }
}

/// Most significant new state among trackers that changed.
/// Only trackers with a predecessor are compared; a zone that just appeared
/// has no earlier state to transition from.
fn strongest_transition(prev: &[BreakoutStatus], next: &[BreakoutStatus]) -> Option<BreakoutState> {
    next.iter()
        .filter_map(|status| predecessor(prev, status).map(|before| (before.state, status.state)))
        .filter(|(before, after)| before != after)
        .map(|(_, after)| after)
        .max_by_key(|state| transition_priority(*state))
}

/// Previous tracker sharing the widest span with `status`, first on ties
fn predecessor<'a>(prev: &'a [BreakoutStatus], status: &BreakoutStatus) -> Option<&'a BreakoutStatus> {
    let mut best: Option<(&BreakoutStatus, f64)> = None;
    for candidate in prev {
        if let Some(shared) = candidate.overlap(status) {
            if best.map_or(true, |(_, widest)| shared > widest) {
                best = Some((candidate, shared));
            }
        }
    }
    best.map(|(candidate, _)| candidate)
}

fn transition_priority(state: BreakoutState) -> u8 {
    match state {
        BreakoutState::Confirmed => 3,
        BreakoutState::Fakeout => 2,
        BreakoutState::Attempt => 1,
        BreakoutState::Idle => 0,
    }
}

/// Key-value persistence for timeline state
pub trait TimelineStore: Send + Sync {
    fn load(&self, subject: &Subject) -> Result<Option<TimelineState>, StoreError>;

    /// Store `state` only if the stored version still equals
    /// `expected_version` (`None`: nothing stored yet). Returns whether the
    /// write happened.
    fn compare_and_swap(
        &self,
        subject: &Subject,
        expected_version: Option<u64>,
        state: &TimelineState,
    ) -> Result<bool, StoreError>;
}

type Slot = Arc<Mutex<Option<TimelineState>>>;

/// Process-local store. Each subject has its own slot; the map lock is only
/// held long enough to find or create a slot.
#[derive(Debug, Default)]
pub struct InMemoryTimelineStore {
    slots: RwLock<HashMap<Subject, Slot>>,
}

impl InMemoryTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, subject: &Subject) -> Slot {
        if let Some(slot) = self.slots.read().get(subject) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(subject.clone()).or_default())
    }

    pub fn len(&self) -> usize {
        self.slots.read().values().filter(|s| s.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TimelineStore for InMemoryTimelineStore {
    fn load(&self, subject: &Subject) -> Result<Option<TimelineState>, StoreError> {
        Ok(self.slot(subject).lock().clone())
    }

    fn compare_and_swap(
        &self,
        subject: &Subject,
        expected_version: Option<u64>,
        state: &TimelineState,
    ) -> Result<bool, StoreError> {
        let slot = self.slot(subject);
        let mut current = slot.lock();
        if current.as_ref().map(|s| s.version) != expected_version {
            return Ok(false);
        }
        *current = Some(state.clone());
        Ok(true)
    }
}
