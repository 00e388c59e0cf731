//! Breakout State Machine
//!
//! One tracker per zone boundary and direction:
//! resistance zones watch their high for an upside break, support zones
//! watch their low for a downside break.
//!
//! 1. IDLE - waiting for a bar to poke through the boundary from inside
//! 2. ATTEMPT - boundary crossed, waiting for confirmation or failure
//! 3. CONFIRMED - Nc closes beyond boundary + epsilon on elevated volume
//! 4. FAKEOUT - price closed back inside (or rejected hard); resets next bar

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

use super::features::FeatureSet;
use super::zones::{Zone, ZoneKey, ZoneKind, ZoneSet};
use crate::config::AnalysisParams;
use crate::types::Bar;
use chrono::{DateTime, Utc};

/// Direction of a boundary break
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    /// Direction a zone of this kind is watched for
    pub fn for_zone(kind: ZoneKind) -> Self {
        match kind {
            ZoneKind::Resistance => Direction::Up,
            ZoneKind::Support => Direction::Down,
        }
    }

    #[inline]
    fn beyond(&self, price: f64, level: f64) -> bool {
        match self {
            Direction::Up => price > level,
            Direction::Down => price < level,
        }
    }

    #[inline]
    fn offset(&self, level: f64, distance: f64) -> f64 {
        match self {
            Direction::Up => level + distance,
            Direction::Down => level - distance,
        }
    }

    #[inline]
    fn extreme(&self, bar: &Bar) -> f64 {
        match self {
            Direction::Up => bar.high,
            Direction::Down => bar.low,
        }
    }

    /// Wick pointing back against the break
    #[inline]
    fn rejection_wick(&self, features: &FeatureSet) -> f64 {
        match self {
            Direction::Up => features.upper_wick_ratio,
            Direction::Down => features.lower_wick_ratio,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of one boundary tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutState {
    #[default]
    Idle,
    Attempt,
    Confirmed,
    Fakeout,
}

impl BreakoutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakoutState::Idle => "idle",
            BreakoutState::Attempt => "attempt",
            BreakoutState::Confirmed => "confirmed",
            BreakoutState::Fakeout => "fakeout",
        }
    }
}

impl fmt::Display for BreakoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transition emitted by a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// idle -> attempt
    Attempt,
    /// attempt -> confirmed
    Confirmed,
    /// attempt -> fakeout
    Fakeout,
    /// attempt -> idle, window elapsed without resolution
    Expired,
    /// confirmed -> idle, price closed back inside
    Rearmed,
    /// fakeout -> idle
    Reset,
}

impl SignalType {
    /// State the tracker is in after this transition
    pub fn target_state(&self) -> BreakoutState {
        match self {
            SignalType::Attempt => BreakoutState::Attempt,
            SignalType::Confirmed => BreakoutState::Confirmed,
            SignalType::Fakeout => BreakoutState::Fakeout,
            SignalType::Expired | SignalType::Rearmed | SignalType::Reset => BreakoutState::Idle,
        }
    }
}

/// Typed breakout signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutSignal {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub direction: Direction,
    /// Boundary being broken
    pub level: f64,
    pub confidence: f64,
    pub bar_time: DateTime<Utc>,
}

/// Configuration for the breakout trackers
#[derive(Debug, Clone)]
pub struct BreakoutConfig {
    /// Minimum volume_ratio to confirm (default: 1.8)
    pub volume_threshold: f64,
    /// Consecutive closes beyond the boundary to confirm (default: 2)
    pub confirm_bars: usize,
    /// Bars after the attempt in which a fakeout can be declared (default: 3)
    pub fakeout_window: usize,
    /// Confirmation clearance beyond the boundary, in ATR (default: 0.1)
    pub epsilon_atr_mult: f64,
    /// Wick ratio counted as rejection (default: 0.5)
    pub rejection_wick_ratio: f64,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 1.8,
            confirm_bars: 2,
            fakeout_window: 3,
            epsilon_atr_mult: 0.1,
            rejection_wick_ratio: 0.5,
        }
    }
}

impl BreakoutConfig {
    pub fn from_params(params: &AnalysisParams) -> Self {
        Self {
            volume_threshold: params.breakout_volume_threshold,
            confirm_bars: params.breakout_confirm_bars,
            fakeout_window: params.fakeout_window,
            epsilon_atr_mult: params.breakout_epsilon_atr_mult,
            rejection_wick_ratio: params.rejection_wick_ratio,
        }
    }
}

/// Snapshot of a bar inside the current attempt cycle
#[derive(Debug, Clone, Copy)]
struct AttemptBar {
    extreme: f64,
    volume_ratio: f64,
    rejection_wick: f64,
}

/// State machine for one zone boundary
#[derive(Debug, Clone)]
pub struct BreakoutTracker {
    key: ZoneKey,
    kind: ZoneKind,
    zone_low: f64,
    zone_high: f64,
    direction: Direction,
    level: f64,
    state: BreakoutState,
    /// Bars since the attempt bar (0 on the attempt bar itself)
    attempt_age: usize,
    closes_outside: usize,
    /// Bars of the current attempt cycle, bounded to fakeout_window + 1
    history: VecDeque<AttemptBar>,
}

impl BreakoutTracker {
    pub fn new(zone: &Zone, signature_decimals: u32, fakeout_window: usize) -> Self {
        let direction = Direction::for_zone(zone.kind);
        let level = match direction {
            Direction::Up => zone.high,
            Direction::Down => zone.low,
        };
        Self {
            key: zone.key(signature_decimals),
            kind: zone.kind,
            zone_low: zone.low,
            zone_high: zone.high,
            direction,
            level,
            state: BreakoutState::Idle,
            attempt_age: 0,
            closes_outside: 0,
            history: VecDeque::with_capacity(fakeout_window + 1),
        }
    }

    pub fn state(&self) -> BreakoutState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    /// Stable identity across calls: zone key plus direction
    pub fn state_key(&self) -> String {
        format!("{}:{}", self.key, self.direction)
    }

    /// Process a bar and return the transitions it caused, in order
    pub fn process_bar(
        &mut self,
        bar: &Bar,
        features: &FeatureSet,
        prev_close: f64,
        atr: f64,
        config: &BreakoutConfig,
    ) -> Vec<BreakoutSignal> {
        let mut signals = Vec::new();

        match self.state {
            BreakoutState::Idle => self.process_idle(bar, features, prev_close, atr, config, &mut signals),
            BreakoutState::Attempt => {
                self.attempt_age += 1;
                self.process_attempt(bar, features, atr, config, &mut signals);
            }
            BreakoutState::Confirmed => self.process_confirmed(bar, features, atr, config, &mut signals),
            BreakoutState::Fakeout => {
                // Fakeout closes the cycle; the same bar may open a new one
                self.transition(SignalType::Reset, bar, features, atr, config, &mut signals);
                self.process_idle(bar, features, prev_close, atr, config, &mut signals);
            }
        }

        signals
    }

    fn process_idle(
        &mut self,
        bar: &Bar,
        features: &FeatureSet,
        prev_close: f64,
        atr: f64,
        config: &BreakoutConfig,
        signals: &mut Vec<BreakoutSignal>,
    ) {
        // A crossing: the extreme pokes through from a close on the inside
        let crossed = self.direction.beyond(self.direction.extreme(bar), self.level)
            && !self.direction.beyond(prev_close, self.level);
        if !crossed {
            return;
        }

        self.start_cycle();
        self.transition(SignalType::Attempt, bar, features, atr, config, signals);
        // The attempt bar itself can already resolve the attempt
        self.process_attempt(bar, features, atr, config, signals);
    }

    fn process_attempt(
        &mut self,
        bar: &Bar,
        features: &FeatureSet,
        atr: f64,
        config: &BreakoutConfig,
        signals: &mut Vec<BreakoutSignal>,
    ) {
        let closed_beyond = self.direction.beyond(bar.close, self.level);
        self.closes_outside = if closed_beyond { self.closes_outside + 1 } else { 0 };

        let attempt_bar = self.history.front().copied();
        self.record(bar, features, config);

        let epsilon = config.epsilon_atr_mult * atr.max(0.0);
        let cleared = self.direction.beyond(bar.close, self.direction.offset(self.level, epsilon));
        let volume_ok = features.volume_ratio_or_zero() >= config.volume_threshold;

        if cleared && volume_ok && self.closes_outside >= config.confirm_bars {
            self.transition(SignalType::Confirmed, bar, features, atr, config, signals);
            return;
        }

        if !closed_beyond {
            self.transition(SignalType::Fakeout, bar, features, atr, config, signals);
            return;
        }

        // Rejecting, high-volume attempt bar that the next bar fails to extend
        if self.attempt_age == 1 {
            if let Some(first) = attempt_bar {
                let rejected = first.rejection_wick >= config.rejection_wick_ratio
                    && first.volume_ratio >= config.volume_threshold;
                let follow_through = self.direction.beyond(self.direction.extreme(bar), first.extreme);
                if rejected && !follow_through {
                    self.transition(SignalType::Fakeout, bar, features, atr, config, signals);
                    return;
                }
            }
        }

        if self.attempt_age >= config.fakeout_window {
            self.transition(SignalType::Expired, bar, features, atr, config, signals);
        }
    }

    fn process_confirmed(
        &mut self,
        bar: &Bar,
        features: &FeatureSet,
        atr: f64,
        config: &BreakoutConfig,
        signals: &mut Vec<BreakoutSignal>,
    ) {
        if self.direction.beyond(bar.close, self.level) {
            return;
        }
        // Cycle over; only a fresh crossing opens the next one
        self.start_cycle();
        self.transition(SignalType::Rearmed, bar, features, atr, config, signals);
    }

    fn start_cycle(&mut self) {
        self.attempt_age = 0;
        self.closes_outside = 0;
        self.history.clear();
    }

    fn record(&mut self, bar: &Bar, features: &FeatureSet, config: &BreakoutConfig) {
        if self.history.len() > config.fakeout_window {
            self.history.pop_front();
        }
        self.history.push_back(AttemptBar {
            extreme: self.direction.extreme(bar),
            volume_ratio: features.volume_ratio_or_zero(),
            rejection_wick: self.direction.rejection_wick(features),
        });
    }

    fn transition(
        &mut self,
        signal_type: SignalType,
        bar: &Bar,
        features: &FeatureSet,
        atr: f64,
        config: &BreakoutConfig,
        signals: &mut Vec<BreakoutSignal>,
    ) {
        let from = self.state;
        self.state = signal_type.target_state();
        debug!(
            "{} {} {:.4}: {} -> {} at {}",
            self.kind, self.direction, self.level, from, self.state, bar.timestamp
        );
        signals.push(BreakoutSignal {
            signal_type,
            direction: self.direction,
            level: self.level,
            confidence: signal_confidence(bar.close, self.level, features, atr, config),
            bar_time: bar.timestamp,
        });
    }
}

/// Half from how far volume_ratio runs past Vth, half from how far the
/// close sits from the level in ATR
fn signal_confidence(close: f64, level: f64, features: &FeatureSet, atr: f64, config: &BreakoutConfig) -> f64 {
    let volume_part = (features.volume_ratio_or_zero() / (2.0 * config.volume_threshold)).clamp(0.0, 1.0);
    let distance_part = if atr > 0.0 {
        ((close - level).abs() / atr).clamp(0.0, 1.0)
    } else {
        0.0
    };
    0.5 * volume_part + 0.5 * distance_part
}

/// Final state of one tracked boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutStatus {
    pub key: String,
    pub zone_kind: ZoneKind,
    pub direction: Direction,
    /// Zone bounds at the time of the call
    pub low: f64,
    pub high: f64,
    pub level: f64,
    pub state: BreakoutState,
}

impl BreakoutStatus {
    /// Shared price span with a tracker of the same kind and direction,
    /// `None` when they are different trackers
    pub fn overlap(&self, other: &BreakoutStatus) -> Option<f64> {
        if self.zone_kind != other.zone_kind || self.direction != other.direction {
            return None;
        }
        let shared = self.high.min(other.high) - self.low.max(other.low);
        (shared >= 0.0).then_some(shared)
    }
}

/// Result of running every tracker over the bar history
#[derive(Debug, Clone, Default)]
pub struct BreakoutOutcome {
    /// All transitions in bar order
    pub signals: Vec<BreakoutSignal>,
    pub statuses: Vec<BreakoutStatus>,
}

impl BreakoutOutcome {
    pub fn status_for(&self, zone: &Zone, decimals: u32) -> Option<&BreakoutStatus> {
        let key = format!("{}:{}", zone.key(decimals), Direction::for_zone(zone.kind));
        self.statuses.iter().find(|s| s.key == key)
    }

    pub fn any_in_state(&self, direction: Direction, state: BreakoutState) -> bool {
        self.statuses.iter().any(|s| s.direction == direction && s.state == state)
    }
}

/// Arena of trackers, one per zone, indexed in zone order
#[derive(Debug, Clone)]
pub struct BreakoutBook {
    config: BreakoutConfig,
    trackers: Vec<BreakoutTracker>,
}

impl BreakoutBook {
    pub fn new(zones: &ZoneSet, config: BreakoutConfig, signature_decimals: u32) -> Self {
        let trackers = zones
            .all()
            .map(|zone| BreakoutTracker::new(zone, signature_decimals, config.fakeout_window))
            .collect();
        Self { config, trackers }
    }

    pub fn trackers(&self) -> &[BreakoutTracker] {
        &self.trackers
    }

    /// Replay the full history through every tracker.
    ///
    /// `fallback_atr` stands in while the per-bar ATR is still warming up.
    pub fn run(mut self, bars: &[Bar], features: &[FeatureSet], fallback_atr: f64) -> BreakoutOutcome {
        let mut signals = Vec::new();

        for i in 1..bars.len().min(features.len()) {
            let atr = features[i].atr.unwrap_or(fallback_atr);
            let prev_close = bars[i - 1].close;
            for tracker in self.trackers.iter_mut() {
                signals.extend(tracker.process_bar(&bars[i], &features[i], prev_close, atr, &self.config));
            }
        }

        let statuses = self
            .trackers
            .iter()
            .map(|t| BreakoutStatus {
                key: t.state_key(),
                zone_kind: t.kind,
                direction: t.direction,
                low: t.zone_low,
                high: t.zone_high,
                level: t.level,
                state: t.state,
            })
            .collect();

        debug!("{} breakout transitions across {} trackers", signals.len(), self.trackers.len());

        BreakoutOutcome { signals, statuses }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bar(i: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2025, 5, 5, 14, 0, 0).unwrap() + Duration::minutes(5 * i);
        Bar::new(ts, o, h, l, c, 1000.0)
    }

    fn features_for(bar: &Bar, volume_ratio: f64) -> FeatureSet {
        let range = bar.range();
        let (upper, lower) = if range > 0.0 {
            ((bar.high - bar.body_top()) / range, (bar.body_bottom() - bar.low) / range)
        } else {
            (0.0, 0.0)
        };
        FeatureSet {
            atr: Some(2.0),
            true_range: range,
            range,
            volume_ratio: Some(volume_ratio),
            body_ratio: 0.0,
            upper_wick_ratio: upper,
            lower_wick_ratio: lower,
            up_efficiency: 0.0,
            down_efficiency: 0.0,
        }
    }

    fn zone(kind: ZoneKind, low: f64, high: f64) -> Zone {
        Zone {
            kind,
            low,
            high,
            score: 1.0,
            touches: 2,
            reaction_strength: 1.0,
        }
    }

    /// Feed (bar, volume_ratio) pairs after a seed bar, collecting signal types
    fn run(tracker: &mut BreakoutTracker, seed_close: f64, steps: &[(Bar, f64)]) -> Vec<SignalType> {
        let config = BreakoutConfig::default();
        let mut prev_close = seed_close;
        let mut types = Vec::new();
        for (bar, vr) in steps {
            let f = features_for(bar, *vr);
            types.extend(tracker.process_bar(bar, &f, prev_close, 2.0, &config).into_iter().map(|s| s.signal_type));
            prev_close = bar.close;
        }
        types
    }

    #[test]
    fn test_tracker_init() {
        let tracker = BreakoutTracker::new(&zone(ZoneKind::Resistance, 100.0, 102.0), 2, 3);
        assert_eq!(tracker.state(), BreakoutState::Idle);
        assert_eq!(tracker.direction(), Direction::Up);
        assert_eq!(tracker.level(), 102.0);
        assert_eq!(tracker.state_key(), "resistance:10000:10200:up");
    }

    #[test]
    fn test_confirmed_breakout_survives_pullback() {
        let mut tracker = BreakoutTracker::new(&zone(ZoneKind::Resistance, 100.0, 102.0), 2, 3);
        let steps = vec![
            (bar(1, 101.5, 105.5, 101.0, 105.0), 2.0),
            (bar(2, 105.0, 105.8, 104.5, 105.0), 2.0),
        ];
        let types = run(&mut tracker, 101.0, &steps);
        assert_eq!(types, vec![SignalType::Attempt, SignalType::Confirmed]);
        assert_eq!(tracker.state(), BreakoutState::Confirmed);

        // back to 101 inside the fakeout window: re-arm, never fakeout
        let pullback = vec![(bar(3, 105.0, 105.0, 100.8, 101.0), 1.0)];
        let types = run(&mut tracker, 105.0, &pullback);
        assert_eq!(types, vec![SignalType::Rearmed]);
        assert_eq!(tracker.state(), BreakoutState::Idle);

        // a second close inside without crossing stays quiet
        let inside = vec![(bar(4, 101.0, 101.6, 100.6, 101.0), 2.0)];
        assert!(run(&mut tracker, 101.0, &inside).is_empty());
        assert_eq!(tracker.state(), BreakoutState::Idle);

        // only a new crossing starts another cycle
        let retest = vec![(bar(5, 101.0, 103.5, 100.9, 103.0), 1.0)];
        assert_eq!(run(&mut tracker, 101.0, &retest), vec![SignalType::Attempt]);
    }

    #[test]
    fn test_status_overlap_matches_same_tracker() {
        let status = |kind: ZoneKind, low: f64, high: f64| BreakoutStatus {
            key: String::new(),
            zone_kind: kind,
            direction: Direction::for_zone(kind),
            low,
            high,
            level: high,
            state: BreakoutState::Idle,
        };
        let a = status(ZoneKind::Resistance, 98.11, 99.86);
        let drifted = status(ZoneKind::Resistance, 98.10, 99.87);
        assert!(a.overlap(&drifted).unwrap() > 1.7);
        assert_eq!(a.overlap(&status(ZoneKind::Resistance, 101.0, 102.0)), None);
        assert_eq!(a.overlap(&status(ZoneKind::Support, 98.11, 99.86)), None);
    }

    #[test]
    fn test_close_back_inside_is_fakeout() {
        let mut tracker = BreakoutTracker::new(&zone(ZoneKind::Resistance, 100.0, 102.0), 2, 3);
        let steps = vec![
            (bar(1, 101.5, 103.5, 101.0, 103.0), 1.0),
            (bar(2, 103.0, 103.2, 101.0, 101.5), 1.0),
            (bar(3, 101.5, 102.0, 101.0, 101.2), 1.0),
        ];
        let types = run(&mut tracker, 101.0, &steps);
        assert_eq!(types, vec![SignalType::Attempt, SignalType::Fakeout, SignalType::Reset]);
        assert_eq!(tracker.state(), BreakoutState::Idle);
    }

    #[test]
    fn test_wick_through_support_is_immediate_fakeout() {
        // support [100, 102]: low 98 sweeps it, close 101 is back inside
        let mut tracker = BreakoutTracker::new(&zone(ZoneKind::Support, 100.0, 102.0), 2, 3);
        let steps = vec![(bar(1, 101.5, 102.0, 98.0, 101.0), 2.0)];
        let types = run(&mut tracker, 101.5, &steps);
        assert_eq!(types, vec![SignalType::Attempt, SignalType::Fakeout]);
        assert_ne!(tracker.state(), BreakoutState::Confirmed);
    }

    #[test]
    fn test_attempt_expires_without_volume() {
        let mut tracker = BreakoutTracker::new(&zone(ZoneKind::Resistance, 100.0, 102.0), 2, 3);
        let steps = vec![
            (bar(1, 101.5, 103.5, 101.4, 103.0), 1.0),
            (bar(2, 103.0, 104.0, 102.8, 103.5), 1.0),
            (bar(3, 103.5, 104.5, 103.2, 104.0), 1.0),
            (bar(4, 104.0, 104.8, 103.8, 104.5), 1.0),
        ];
        let types = run(&mut tracker, 101.0, &steps);
        assert_eq!(types, vec![SignalType::Attempt, SignalType::Expired]);
        assert_eq!(tracker.state(), BreakoutState::Idle);

        // price is already beyond the boundary: no re-attempt without a crossing
        let more = vec![(bar(5, 104.5, 105.5, 104.2, 105.0), 3.0)];
        assert!(run(&mut tracker, 104.5, &more).is_empty());
    }

    #[test]
    fn test_rejection_wick_without_follow_through() {
        // attempt bar: long upper wick on heavy volume, close just outside
        let mut tracker = BreakoutTracker::new(&zone(ZoneKind::Resistance, 100.0, 102.0), 2, 3);
        let steps = vec![
            (bar(1, 102.1, 108.0, 102.0, 102.5), 2.5),
            (bar(2, 102.5, 104.0, 102.3, 103.0), 1.0),
        ];
        let types = run(&mut tracker, 101.0, &steps);
        assert_eq!(types, vec![SignalType::Attempt, SignalType::Fakeout]);
    }

    #[test]
    fn test_book_runs_every_zone() {
        let zones = ZoneSet {
            support: vec![zone(ZoneKind::Support, 95.0, 96.0)],
            resistance: vec![zone(ZoneKind::Resistance, 100.0, 102.0)],
        };
        let bars = vec![
            bar(0, 101.0, 101.5, 100.5, 101.0),
            bar(1, 101.5, 105.5, 101.0, 105.0),
            bar(2, 105.0, 105.8, 104.5, 105.0),
        ];
        let features: Vec<FeatureSet> = bars.iter().map(|b| features_for(b, 2.0)).collect();

        let book = BreakoutBook::new(&zones, BreakoutConfig::default(), 2);
        assert_eq!(book.trackers().len(), 2);
        let outcome = book.run(&bars, &features, 2.0);

        assert_eq!(outcome.signals.len(), 2);
        assert!(outcome.any_in_state(Direction::Up, BreakoutState::Confirmed));
        let support = outcome.status_for(&zones.support[0], 2).unwrap();
        assert_eq!(support.state, BreakoutState::Idle);
        assert!(outcome.signals.iter().all(|s| (0.0..=1.0).contains(&s.confidence)));
    }
}
