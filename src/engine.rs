//! Analysis orchestration
//!
//! `analyze` is the pure pipeline: bars + parameters + previous timeline
//! state in, report + next timeline state out. `AnalysisService` wraps it
//! with a timeline store and serializes calls per subject.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AnalysisParams;
use crate::error::{AnalysisError, StoreError};
use crate::preprocess::prepare_bars;
use crate::report::{AnalysisReport, DataQuality, MarketState};
use crate::source::BarSource;
use crate::structure::behavior::{BehaviorContext, BehaviorScorer};
use crate::structure::breakout::{BreakoutBook, BreakoutConfig};
use crate::structure::features::{latest_atr, mean_true_range, FeatureExtractor};
use crate::structure::playbook::PlaybookGenerator;
use crate::structure::swings::{detect_swings, SwingDetector};
use crate::structure::regime::classify_regime;
use crate::structure::zones::{ZoneBuilder, ZoneSet};
use crate::timeline::{TimelineManager, TimelineSnapshot, TimelineState, TimelineStore};
use crate::types::{Bar, Subject};
use chrono::{DateTime, Utc};

/// Compare-and-swap attempts before a write is abandoned
const MAX_STORE_ATTEMPTS: usize = 5;

/// Pipeline result before it is diffed against the timeline
#[derive(Debug, Clone)]
pub struct StructureAnalysis {
    /// Complete except for `timeline`, which is still empty
    report: AnalysisReport,
    snapshot: TimelineSnapshot,
    timeline: TimelineManager,
}

impl StructureAnalysis {
    pub fn report(&self) -> &AnalysisReport {
        &self.report
    }

    /// Diff against the previous state, producing the final report and the
    /// state to persist
    pub fn with_timeline(&self, previous: Option<&TimelineState>, now: DateTime<Utc>) -> (AnalysisReport, TimelineState) {
        let (events, state) = self.timeline.update(previous, self.snapshot.clone(), now);
        let mut report = self.report.clone();
        report.timeline = events;
        (report, state)
    }
}

/// Run every stage except the timeline diff
pub fn run_pipeline(bars: Vec<Bar>, params: &AnalysisParams, subject: &Subject) -> Result<StructureAnalysis, AnalysisError> {
    params.validate()?;
    let prepared = prepare_bars(bars, subject.timeframe, params.gap_factor)?;
    let bars = prepared.bars;
    let last = bars.last().ok_or(AnalysisError::EmptySeries)?;
    let close = last.close;
    let as_of = last.timestamp;

    // 1. Features
    let features = FeatureExtractor::from_params(params).extract(&bars);
    let atr = latest_atr(&features);
    let scale = atr.unwrap_or_else(|| mean_true_range(&features));

    // 2. Swings and regime
    let detector = SwingDetector::new(&bars, params.swing_half_window);
    let swings = detect_swings(&bars, &features, params.swing_half_window, params.swing_filter_atr_mult);
    let regime = classify_regime(&swings, params.regime_swing_count);

    // 3. Zones, only once volatility is known
    let zones = match atr {
        Some(atr) => ZoneBuilder::from_params(params).build(&bars, &swings, atr, close),
        None => ZoneSet::default(),
    };
    let zone_signature = zones.signature(params.signature_decimals);

    // 4. Breakout trackers
    let breakouts = BreakoutBook::new(&zones, BreakoutConfig::from_params(params), params.signature_decimals)
        .run(&bars, &features, scale);

    // 5. Behavior
    let behavior = BehaviorScorer::from_params(params).score(&BehaviorContext {
        bars: &bars,
        features: &features,
        zones: &zones,
        regime: &regime,
        breakouts: &breakouts,
        atr: scale,
    });

    // 6. Playbook
    let playbook = PlaybookGenerator::from_params(params).generate(&bars, &zones, &breakouts, scale);

    let insufficient_history = atr.is_none() || !detector.has_enough_bars() || regime.is_insufficient();
    debug!(
        "{}: {} bars, {} swings, {} zones, {} breakout signals",
        subject,
        bars.len(),
        swings.len(),
        zones.support.len() + zones.resistance.len(),
        breakouts.signals.len()
    );

    let snapshot = TimelineSnapshot {
        as_of,
        regime: regime.regime,
        zone_signature: zone_signature.clone(),
        probabilities: behavior.probabilities,
        dominant: behavior.dominant,
        breakout_states: breakouts.statuses.clone(),
    };

    let keep_from = breakouts.signals.len().saturating_sub(params.max_signals);
    let report = AnalysisReport {
        subject: subject.clone(),
        as_of,
        market_state: MarketState {
            regime: regime.regime,
            confidence: regime.confidence,
        },
        zones,
        zone_signature,
        signals: breakouts.signals[keep_from..].to_vec(),
        breakouts: breakouts.statuses,
        behavior,
        timeline: Vec::new(),
        playbook: playbook.to_vec(),
        data_quality: DataQuality {
            data_gaps: prepared.gap_count > 0,
            insufficient_history,
        },
    };

    Ok(StructureAnalysis {
        report,
        snapshot,
        timeline: TimelineManager::new(params.probability_shift_threshold),
    })
}

/// The full pure pipeline. `now` only lands in the returned state's
/// `last_updated_ts`; the report is a function of the other inputs alone.
pub fn analyze(
    bars: Vec<Bar>,
    params: &AnalysisParams,
    subject: &Subject,
    previous: Option<&TimelineState>,
    now: DateTime<Utc>,
) -> Result<(AnalysisReport, TimelineState), AnalysisError> {
    Ok(run_pipeline(bars, params, subject)?.with_timeline(previous, now))
}

/// Store-backed analysis with per-subject serialization.
/// The lock map grows with every subject seen; eviction is left to the owner.
pub struct AnalysisService<S: TimelineStore> {
    store: S,
    locks: Mutex<HashMap<Subject, Arc<Mutex<()>>>>,
}

impl<S: TimelineStore> AnalysisService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn lock_for(&self, subject: &Subject) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(subject.clone()).or_default())
    }

    /// Analyse and persist. Calls for the same subject run one at a time;
    /// other subjects proceed in parallel.
    pub fn analyze(&self, subject: &Subject, bars: Vec<Bar>, params: &AnalysisParams) -> Result<AnalysisReport, AnalysisError> {
        let analysis = run_pipeline(bars, params, subject)?;

        let lock = self.lock_for(subject);
        let _guard = lock.lock();

        // The lock covers this process; the version check covers other
        // writers sharing the store
        for attempt in 1..=MAX_STORE_ATTEMPTS {
            let previous = self.store.load(subject)?;
            let expected = previous.as_ref().map(|s| s.version);
            let (report, state) = analysis.with_timeline(previous.as_ref(), Utc::now());

            if self.store.compare_and_swap(subject, expected, &state)? {
                info!(
                    "{}: {} ({:.2}), dominant {} ({:.2}), {} events",
                    subject,
                    report.market_state.regime,
                    report.market_state.confidence,
                    report.behavior.dominant,
                    report.behavior.probabilities.get(report.behavior.dominant),
                    report.timeline.len()
                );
                return Ok(report);
            }
            warn!("{}: timeline version conflict (attempt {})", subject, attempt);
        }

        Err(StoreError::Contention {
            subject: subject.to_string(),
            attempts: MAX_STORE_ATTEMPTS,
        }
        .into())
    }

    /// Fetch bars from `source`, then analyse
    pub fn analyze_from_source(
        &self,
        source: &dyn BarSource,
        subject: &Subject,
        params: &AnalysisParams,
    ) -> Result<AnalysisReport, AnalysisError> {
        params.validate()?;
        let bars = source.fetch(subject)?;
        self.analyze(subject, bars, params)
    }
}
