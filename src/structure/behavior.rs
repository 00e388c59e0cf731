//! Behavior Scoring
//!
//! Five competing hypotheses about who is active at the current bar, each a
//! weighted sum of named signals:
//!
//! - accumulation: near support, volume, (1 - down efficiency), lower wick
//! - shakeout: support sweep, reclaim, lower wick, volume
//! - markup: confirmed breakout, higher lows, advance volume dominance, up efficiency
//! - distribution: near resistance, volume, (1 - up efficiency), upper wick, rejections
//! - markdown: confirmed breakdown, lower structure, decline volume dominance, down efficiency
//!
//! Every signal lands in [0, 1] before weighting. Scores are calibrated with
//! a max-shifted softmax.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::breakout::{BreakoutOutcome, BreakoutState, Direction, SignalType};
use super::features::FeatureSet;
use super::regime::RegimeResult;
use super::zones::{Zone, ZoneSet};
use crate::config::{AnalysisParams, NormalizationMode};
use crate::types::Bar;
use chrono::{DateTime, Utc};

/// Bars inspected for a support sweep
const SWEEP_LOOKBACK: usize = 3;
/// Rejections at resistance beyond this count add nothing
const REJECTION_SATURATION: usize = 3;

/// Behavior classes, in tie-break priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Accumulation,
    Shakeout,
    Markup,
    Distribution,
    Markdown,
}

impl Behavior {
    pub const ALL: [Behavior; 5] = [
        Behavior::Accumulation,
        Behavior::Shakeout,
        Behavior::Markup,
        Behavior::Distribution,
        Behavior::Markdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::Accumulation => "accumulation",
            Behavior::Shakeout => "shakeout",
            Behavior::Markup => "markup",
            Behavior::Distribution => "distribution",
            Behavior::Markdown => "markdown",
        }
    }

    /// Named summands of this class's score
    pub fn signals(&self) -> &'static [Signal] {
        match self {
            Behavior::Accumulation => &[
                Signal::NearSupport,
                Signal::VolumeRatio,
                Signal::DownEfficiencyInverse,
                Signal::LowerWick,
            ],
            Behavior::Shakeout => &[
                Signal::SweepSupport,
                Signal::Reclaim,
                Signal::LowerWick,
                Signal::VolumeRatio,
            ],
            Behavior::Markup => &[
                Signal::BreakoutConfirmed,
                Signal::HigherLowCount,
                Signal::AdvanceVolumeDominance,
                Signal::UpEfficiency,
            ],
            Behavior::Distribution => &[
                Signal::NearResistance,
                Signal::VolumeRatio,
                Signal::UpEfficiencyInverse,
                Signal::UpperWick,
                Signal::RejectionCount,
            ],
            Behavior::Markdown => &[
                Signal::BreakdownConfirmed,
                Signal::LowerStructureCount,
                Signal::LowPullbackVolume,
                Signal::DownEfficiency,
            ],
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named signal feeding one or more behavior scores.
/// Weights are configured per signal, so a shared signal weighs the same in
/// every class that uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    NearSupport,
    NearResistance,
    VolumeRatio,
    LowerWick,
    UpperWick,
    UpEfficiency,
    DownEfficiency,
    UpEfficiencyInverse,
    DownEfficiencyInverse,
    SweepSupport,
    Reclaim,
    BreakoutConfirmed,
    BreakdownConfirmed,
    HigherLowCount,
    LowerStructureCount,
    AdvanceVolumeDominance,
    LowPullbackVolume,
    RejectionCount,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::NearSupport => "near_support",
            Signal::NearResistance => "near_resistance",
            Signal::VolumeRatio => "volume_ratio",
            Signal::LowerWick => "lower_wick",
            Signal::UpperWick => "upper_wick",
            Signal::UpEfficiency => "up_efficiency",
            Signal::DownEfficiency => "down_efficiency",
            Signal::UpEfficiencyInverse => "up_efficiency_inverse",
            Signal::DownEfficiencyInverse => "down_efficiency_inverse",
            Signal::SweepSupport => "sweep_support",
            Signal::Reclaim => "reclaim",
            Signal::BreakoutConfirmed => "breakout_confirmed",
            Signal::BreakdownConfirmed => "breakdown_confirmed",
            Signal::HigherLowCount => "higher_low_count",
            Signal::LowerStructureCount => "lower_structure_count",
            Signal::AdvanceVolumeDominance => "advance_volume_dominance",
            Signal::LowPullbackVolume => "low_pullback_volume",
            Signal::RejectionCount => "rejection_count",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Probability per class, serialized in priority order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProbabilities {
    pub accumulation: f64,
    pub shakeout: f64,
    pub markup: f64,
    pub distribution: f64,
    pub markdown: f64,
}

impl BehaviorProbabilities {
    pub fn uniform() -> Self {
        Self::from_array([0.2; 5])
    }

    pub fn from_array(values: [f64; 5]) -> Self {
        Self {
            accumulation: values[0],
            shakeout: values[1],
            markup: values[2],
            distribution: values[3],
            markdown: values[4],
        }
    }

    pub fn as_array(&self) -> [f64; 5] {
        [self.accumulation, self.shakeout, self.markup, self.distribution, self.markdown]
    }

    pub fn get(&self, behavior: Behavior) -> f64 {
        match behavior {
            Behavior::Accumulation => self.accumulation,
            Behavior::Shakeout => self.shakeout,
            Behavior::Markup => self.markup,
            Behavior::Distribution => self.distribution,
            Behavior::Markdown => self.markdown,
        }
    }

    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }

    /// Highest probability; ties go to the earlier class
    pub fn dominant(&self) -> Behavior {
        arg_max(&self.as_array())
    }
}

/// A bar-anchored reason supporting the dominant class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub behavior: Behavior,
    pub signal: Signal,
    pub bar_time: DateTime<Utc>,
    /// 1-3 named feature values
    pub values: BTreeMap<String, f64>,
    pub template_key: String,
}

/// Calibrated classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorAssessment {
    pub probabilities: BehaviorProbabilities,
    pub dominant: Behavior,
    pub evidence: Vec<EvidenceItem>,
}

/// Everything the scorer looks at
#[derive(Debug, Clone, Copy)]
pub struct BehaviorContext<'a> {
    pub bars: &'a [Bar],
    pub features: &'a [FeatureSet],
    pub zones: &'a ZoneSet,
    pub regime: &'a RegimeResult,
    pub breakouts: &'a BreakoutOutcome,
    /// Volatility scale for proximity checks
    pub atr: f64,
}

/// One evaluated signal
#[derive(Debug, Clone, PartialEq)]
struct Reading {
    value: f64,
    bar_index: usize,
    values: Vec<(&'static str, f64)>,
}

impl Reading {
    fn new(value: f64, bar_index: usize) -> Self {
        Self {
            value: value.clamp(0.0, 1.0),
            bar_index,
            values: Vec::new(),
        }
    }

    fn with(mut self, name: &'static str, value: f64) -> Self {
        self.values.push((name, value));
        self
    }
}

/// Heuristic scorer plus softmax calibration
#[derive(Debug, Clone)]
pub struct BehaviorScorer {
    normalization: NormalizationMode,
    scoring_window: usize,
    proximity_atr_mult: f64,
    weights: BTreeMap<Signal, f64>,
}

impl BehaviorScorer {
    pub fn from_params(params: &AnalysisParams) -> Self {
        Self {
            normalization: params.normalization,
            scoring_window: params.scoring_window,
            proximity_atr_mult: params.proximity_atr_mult,
            weights: params.signal_weights.clone(),
        }
    }

    fn weight(&self, signal: Signal) -> f64 {
        self.weights.get(&signal).copied().unwrap_or(1.0)
    }

    pub fn score(&self, ctx: &BehaviorContext<'_>) -> BehaviorAssessment {
        let Some(last) = ctx.bars.len().checked_sub(1).filter(|&l| l < ctx.features.len()) else {
            return BehaviorAssessment {
                probabilities: BehaviorProbabilities::uniform(),
                dominant: Behavior::Accumulation,
                evidence: Vec::new(),
            };
        };

        let readings = self.readings(ctx, last);

        let mut scores = [0.0; 5];
        for (slot, behavior) in scores.iter_mut().zip(Behavior::ALL) {
            *slot = behavior
                .signals()
                .iter()
                .map(|s| self.weight(*s) * readings.get(s).map_or(0.0, |r| r.value))
                .sum();
        }

        let probabilities = calibrate(&scores);
        let dominant = arg_max(&scores);
        let evidence = select_evidence(dominant, &readings, ctx.bars);

        BehaviorAssessment {
            probabilities,
            dominant,
            evidence,
        }
    }

    fn readings(&self, ctx: &BehaviorContext<'_>, last: usize) -> BTreeMap<Signal, Reading> {
        let mut out = BTreeMap::new();
        let start = (last + 1).saturating_sub(self.scoring_window);
        let window = &ctx.features[start..=last];
        let current = &ctx.features[last];
        let close = ctx.bars[last].close;

        // Continuous per-bar signals, scaled against the scoring window
        let volume: Vec<f64> = window.iter().filter_map(|f| f.volume_ratio).collect();
        let volume_value = current
            .volume_ratio
            .map_or(0.0, |vr| self.normalize(&volume, vr));
        out.insert(
            Signal::VolumeRatio,
            Reading::new(volume_value, last).with("volume_ratio", current.volume_ratio_or_zero()),
        );

        let series = |pick: fn(&FeatureSet) -> f64| -> (Vec<f64>, f64) {
            (window.iter().map(pick).collect(), pick(current))
        };

        let (lower, lower_now) = series(|f| f.lower_wick_ratio);
        out.insert(
            Signal::LowerWick,
            Reading::new(self.normalize(&lower, lower_now), last).with("lower_wick_ratio", lower_now),
        );
        let (upper, upper_now) = series(|f| f.upper_wick_ratio);
        out.insert(
            Signal::UpperWick,
            Reading::new(self.normalize(&upper, upper_now), last).with("upper_wick_ratio", upper_now),
        );

        let (up, up_now) = series(|f| f.up_efficiency);
        let up_norm = self.normalize(&up, up_now);
        out.insert(
            Signal::UpEfficiency,
            Reading::new(up_norm, last).with("up_efficiency", up_now),
        );
        out.insert(
            Signal::UpEfficiencyInverse,
            Reading::new(1.0 - up_norm, last).with("up_efficiency", up_now),
        );

        let (down, down_now) = series(|f| f.down_efficiency);
        let down_norm = self.normalize(&down, down_now);
        out.insert(
            Signal::DownEfficiency,
            Reading::new(down_norm, last).with("down_efficiency", down_now),
        );
        out.insert(
            Signal::DownEfficiencyInverse,
            Reading::new(1.0 - down_norm, last).with("down_efficiency", down_now),
        );

        // Zone proximity
        let proximity = self.proximity_atr_mult * ctx.atr.max(0.0);
        let near = |zone: Option<&Zone>| -> Reading {
            match zone {
                Some(z) => {
                    let hit = z.distance_to(close) <= proximity;
                    Reading::new(if hit { 1.0 } else { 0.0 }, last)
                        .with("close", close)
                        .with("zone_low", z.low)
                        .with("zone_high", z.high)
                }
                None => Reading::new(0.0, last).with("close", close),
            }
        };
        out.insert(Signal::NearSupport, near(nearest(&ctx.zones.support, close)));
        out.insert(Signal::NearResistance, near(nearest(&ctx.zones.resistance, close)));

        // Sweep of a support low, then reclaim by the latest close
        let sweep_from = (last + 1).saturating_sub(SWEEP_LOOKBACK);
        let sweep = ctx.zones.support.iter().find_map(|zone| {
            (sweep_from..=last)
                .rev()
                .find(|&i| ctx.bars[i].low < zone.low)
                .map(|i| (zone, i))
        });
        match sweep {
            Some((zone, i)) => {
                out.insert(
                    Signal::SweepSupport,
                    Reading::new(1.0, i).with("low", ctx.bars[i].low).with("zone_low", zone.low),
                );
                let reclaimed = close >= zone.low;
                out.insert(
                    Signal::Reclaim,
                    Reading::new(if reclaimed { 1.0 } else { 0.0 }, last)
                        .with("close", close)
                        .with("zone_low", zone.low),
                );
            }
            None => {
                out.insert(Signal::SweepSupport, Reading::new(0.0, last));
                out.insert(Signal::Reclaim, Reading::new(0.0, last));
            }
        }

        // Confirmed breaks from the state machines
        let confirmed = |direction: Direction| -> Reading {
            let active = ctx.breakouts.any_in_state(direction, BreakoutState::Confirmed);
            let latest = ctx
                .breakouts
                .signals
                .iter()
                .rev()
                .find(|s| s.direction == direction && s.signal_type == SignalType::Confirmed);
            let index = latest
                .and_then(|s| ctx.bars.iter().rposition(|b| b.timestamp == s.bar_time))
                .unwrap_or(last);
            let reading = Reading::new(if active { 1.0 } else { 0.0 }, index);
            match latest {
                Some(s) => reading.with("level", s.level),
                None => reading,
            }
        };
        out.insert(Signal::BreakoutConfirmed, confirmed(Direction::Up));
        out.insert(Signal::BreakdownConfirmed, confirmed(Direction::Down));

        // Structure counts, already shares in [0, 1]
        let swing_bar = ctx.regime.last_swing_index.filter(|&i| i <= last).unwrap_or(last);
        out.insert(
            Signal::HigherLowCount,
            Reading::new(ctx.regime.higher_low_share(), swing_bar)
                .with("higher_lows", ctx.regime.higher_lows as f64)
                .with("low_pairs", ctx.regime.low_pairs as f64),
        );
        out.insert(
            Signal::LowerStructureCount,
            Reading::new(ctx.regime.lower_structure_share(), swing_bar)
                .with("lower_lows", ctx.regime.lower_lows as f64)
                .with("lower_highs", ctx.regime.lower_highs as f64),
        );

        // Volume carried by advances versus declines
        let (advance, decline) = directional_volume(&ctx.bars[start..=last], window);
        let total = advance + decline;
        let (advance_share, decline_share) = if total > 0.0 {
            (((advance - decline) / total).max(0.0), ((decline - advance) / total).max(0.0))
        } else {
            (0.0, 0.0)
        };
        out.insert(
            Signal::AdvanceVolumeDominance,
            Reading::new(advance_share, last)
                .with("advance_volume_ratio", advance)
                .with("pullback_volume_ratio", decline),
        );
        out.insert(
            Signal::LowPullbackVolume,
            Reading::new(decline_share, last)
                .with("decline_volume_ratio", decline)
                .with("pullback_volume_ratio", advance),
        );

        // Failed pushes into the nearest resistance
        let rejection = match nearest(&ctx.zones.resistance, close) {
            Some(zone) => {
                let hits: Vec<usize> = (start..=last)
                    .filter(|&i| ctx.bars[i].high >= zone.low && ctx.bars[i].close < zone.low)
                    .collect();
                let count = hits.len().min(REJECTION_SATURATION);
                Reading::new(count as f64 / REJECTION_SATURATION as f64, hits.last().copied().unwrap_or(last))
                    .with("rejections", hits.len() as f64)
                    .with("zone_low", zone.low)
            }
            None => Reading::new(0.0, last),
        };
        out.insert(Signal::RejectionCount, rejection);

        out
    }

    fn normalize(&self, window: &[f64], value: f64) -> f64 {
        normalize(self.normalization, window, value)
    }
}

/// Scale `value` against a reference window into [0, 1].
///
/// Min-max maps a flat window to 0. Z-score passes the standard score through
/// a logistic, so a flat window maps to 0.5.
pub fn normalize(mode: NormalizationMode, window: &[f64], value: f64) -> f64 {
    if window.is_empty() || !value.is_finite() {
        return 0.0;
    }
    match mode {
        NormalizationMode::MinMax => {
            let min = window.iter().copied().fold(f64::INFINITY, f64::min).min(value);
            let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max).max(value);
            let spread = max - min;
            if spread > f64::EPSILON {
                ((value - min) / spread).clamp(0.0, 1.0)
            } else {
                0.0
            }
        }
        NormalizationMode::ZScore => {
            let n = window.len() as f64;
            let mean = window.iter().sum::<f64>() / n;
            let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();
            let z = if std > f64::EPSILON { (value - mean) / std } else { 0.0 };
            1.0 / (1.0 + (-z).exp())
        }
    }
}

/// Numerically stable softmax
pub fn calibrate(scores: &[f64; 5]) -> BehaviorProbabilities {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return BehaviorProbabilities::uniform();
    }
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    let mut out = [0.0; 5];
    for (slot, e) in out.iter_mut().zip(exps) {
        *slot = e / total;
    }
    BehaviorProbabilities::from_array(out)
}

/// First strict maximum in priority order
fn arg_max(values: &[f64; 5]) -> Behavior {
    let mut best = 0;
    for i in 1..values.len() {
        if values[i] > values[best] {
            best = i;
        }
    }
    Behavior::ALL[best]
}

/// Zone closest to price; earlier (higher scored) zones win ties
fn nearest(zones: &[Zone], price: f64) -> Option<&Zone> {
    zones.iter().fold(None, |best: Option<&Zone>, zone| match best {
        Some(b) if b.distance_to(price) <= zone.distance_to(price) => Some(b),
        _ => Some(zone),
    })
}

/// Mean volume_ratio of up bars and of down bars
fn directional_volume(bars: &[Bar], features: &[FeatureSet]) -> (f64, f64) {
    let mut up = (0.0, 0usize);
    let mut down = (0.0, 0usize);
    for (bar, f) in bars.iter().zip(features) {
        let Some(vr) = f.volume_ratio else { continue };
        if bar.is_up() {
            up = (up.0 + vr, up.1 + 1);
        } else if bar.is_down() {
            down = (down.0 + vr, down.1 + 1);
        }
    }
    let mean = |(sum, n): (f64, usize)| if n > 0 { sum / n as f64 } else { 0.0 };
    (mean(up), mean(down))
}

/// Up to three strongest positive signals of the dominant class
fn select_evidence(dominant: Behavior, readings: &BTreeMap<Signal, Reading>, bars: &[Bar]) -> Vec<EvidenceItem> {
    let mut ranked: Vec<(Signal, &Reading)> = dominant
        .signals()
        .iter()
        .filter_map(|s| readings.get(s).map(|r| (*s, r)))
        .filter(|(_, r)| r.value > 0.0)
        .collect();
    // stable: equal values keep the class's signal order
    ranked.sort_by(|a, b| b.1.value.total_cmp(&a.1.value));

    ranked
        .into_iter()
        .take(3)
        .filter_map(|(signal, reading)| {
            let bar = bars.get(reading.bar_index)?;
            let mut values: BTreeMap<String, f64> = reading
                .values
                .iter()
                .take(2)
                .map(|(k, v)| (k.to_string(), *v))
                .collect();
            values.insert("normalized".to_string(), reading.value);
            Some(EvidenceItem {
                behavior: dominant,
                signal,
                bar_time: bar.timestamp,
                values,
                template_key: format!("evidence.{}.{}", dominant, signal),
            })
        })
        .collect()
}
