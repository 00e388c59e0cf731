//! Per-bar interpretable features: volatility, relative volume, candle
//! geometry and move efficiency.

use serde::{Deserialize, Serialize};

use crate::config::AnalysisParams;
use crate::types::Bar;

/// Features derived for a single bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Wilder ATR, `None` until `atr_period` bars are available
    pub atr: Option<f64>,
    pub true_range: f64,
    pub range: f64,
    /// volume / SMA(volume, N), `None` for the first N-1 bars
    pub volume_ratio: Option<f64>,
    pub body_ratio: f64,
    pub upper_wick_ratio: f64,
    pub lower_wick_ratio: f64,
    /// Net advance over the efficiency window divided by the path length
    pub up_efficiency: f64,
    /// Net decline over the efficiency window divided by the path length
    pub down_efficiency: f64,
}

impl FeatureSet {
    /// volume_ratio with the undefined warm-up treated as no participation
    #[inline]
    pub fn volume_ratio_or_zero(&self) -> f64 {
        self.volume_ratio.unwrap_or(0.0)
    }
}

/// Computes one `FeatureSet` per bar. Pure function of its input.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    pub atr_period: usize,
    pub volume_window: usize,
    pub efficiency_window: usize,
}

impl FeatureExtractor {
    pub fn new(atr_period: usize, volume_window: usize, efficiency_window: usize) -> Self {
        Self {
            atr_period,
            volume_window,
            efficiency_window,
        }
    }

    pub fn from_params(params: &AnalysisParams) -> Self {
        Self::new(params.atr_period, params.volume_window, params.efficiency_window)
    }

    pub fn extract(&self, bars: &[Bar]) -> Vec<FeatureSet> {
        let true_ranges = true_ranges(bars);
        let atr = wilder_atr(&true_ranges, self.atr_period);
        let volume_ratio = volume_ratios(bars, self.volume_window);

        bars.iter()
            .enumerate()
            .map(|(i, bar)| {
                let (body_ratio, upper_wick_ratio, lower_wick_ratio) = candle_geometry(bar);
                let (up_efficiency, down_efficiency) = move_efficiency(bars, i, self.efficiency_window);
                FeatureSet {
                    atr: atr[i],
                    true_range: true_ranges[i],
                    range: bar.range(),
                    volume_ratio: volume_ratio[i],
                    body_ratio,
                    upper_wick_ratio,
                    lower_wick_ratio,
                    up_efficiency,
                    down_efficiency,
                }
            })
            .collect()
    }
}

/// Most recent defined ATR
pub fn latest_atr(features: &[FeatureSet]) -> Option<f64> {
    features.iter().rev().find_map(|f| f.atr)
}

/// Mean true range over whatever bars exist. Used where a volatility scale
/// is still needed while the ATR is warming up.
pub fn mean_true_range(features: &[FeatureSet]) -> f64 {
    if features.is_empty() {
        return 0.0;
    }
    features.iter().map(|f| f.true_range).sum::<f64>() / features.len() as f64
}

fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut prev_close: Option<f64> = None;
    for bar in bars {
        let tr = match prev_close {
            Some(pc) => bar
                .range()
                .max((bar.high - pc).abs())
                .max((bar.low - pc).abs()),
            None => bar.range(),
        };
        out.push(tr);
        prev_close = Some(bar.close);
    }
    out
}

/// Seeded with the simple mean of the first `period` true ranges, then
/// Wilder-smoothed.
fn wilder_atr(true_ranges: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; true_ranges.len()];
    if period == 0 || true_ranges.len() < period {
        return out;
    }

    let p = period as f64;
    let mut atr = true_ranges[..period].iter().sum::<f64>() / p;
    out[period - 1] = Some(atr);
    for i in period..true_ranges.len() {
        atr = (atr * (p - 1.0) + true_ranges[i]) / p;
        out[i] = Some(atr);
    }
    out
}

fn volume_ratios(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if window == 0 {
        return out;
    }

    let mut rolling_sum = 0.0;
    for (i, bar) in bars.iter().enumerate() {
        rolling_sum += bar.volume;
        if i >= window {
            rolling_sum -= bars[i - window].volume;
        }
        if i + 1 >= window {
            let sma = rolling_sum / window as f64;
            // zero average volume: no relative participation to speak of
            out[i] = Some(if sma > 0.0 { bar.volume / sma } else { 0.0 });
        }
    }
    out
}

/// (body, upper wick, lower wick) as fractions of the range.
/// A zero-range bar has all three at 0.
fn candle_geometry(bar: &Bar) -> (f64, f64, f64) {
    let range = bar.range();
    if range <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let body = (bar.close - bar.open).abs() / range;
    let upper = (bar.high - bar.body_top()) / range;
    let lower = (bar.body_bottom() - bar.low) / range;
    (body.clamp(0.0, 1.0), upper.clamp(0.0, 1.0), lower.clamp(0.0, 1.0))
}

fn move_efficiency(bars: &[Bar], i: usize, window: usize) -> (f64, f64) {
    let start = i.saturating_sub(window);
    if start == i {
        return (0.0, 0.0);
    }

    let net = bars[i].close - bars[start].close;
    let path: f64 = bars[start..=i]
        .windows(2)
        .map(|w| (w[1].close - w[0].close).abs())
        .sum();
    if path <= 0.0 {
        return (0.0, 0.0);
    }
    ((net.max(0.0) / path), ((-net).max(0.0) / path))
}
