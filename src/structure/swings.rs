//! Fractal swing extraction
//!
//! A bar is a swing high when its high is the maximum of the window
//! `[i - n, i + n]` (ties resolve to the leftmost bar), and a swing low
//! analogously. The last `n` bars can never be confirmed because their
//! right-hand side has not printed yet.

use serde::{Deserialize, Serialize};

use super::features::FeatureSet;
use crate::types::Bar;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingKind {
    High,
    Low,
}

/// A confirmed local extreme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub kind: SwingKind,
    /// Index of the source bar
    pub index: usize,
}

/// Detects swings over a bar slice. Each call to [`SwingDetector::iter`]
/// starts a fresh lazy scan.
#[derive(Debug, Clone, Copy)]
pub struct SwingDetector<'a> {
    bars: &'a [Bar],
    half_window: usize,
}

impl<'a> SwingDetector<'a> {
    pub fn new(bars: &'a [Bar], half_window: usize) -> Self {
        Self { bars, half_window }
    }

    pub fn iter(&self) -> Swings<'a> {
        Swings {
            bars: self.bars,
            n: self.half_window,
            next: self.half_window,
            pending: None,
        }
    }

    /// At least one bar has a full window on both sides
    pub fn has_enough_bars(&self) -> bool {
        self.bars.len() > 2 * self.half_window
    }

    /// Bars at or after this index are still provisional
    pub fn provisional_from(&self) -> usize {
        self.bars.len().saturating_sub(self.half_window)
    }
}

/// Lazy, ordered sequence of swing points
#[derive(Debug, Clone)]
pub struct Swings<'a> {
    bars: &'a [Bar],
    n: usize,
    next: usize,
    pending: Option<SwingPoint>,
}

impl<'a> Swings<'a> {
    fn point(&self, index: usize, kind: SwingKind) -> SwingPoint {
        let bar = &self.bars[index];
        SwingPoint {
            timestamp: bar.timestamp,
            price: match kind {
                SwingKind::High => bar.high,
                SwingKind::Low => bar.low,
            },
            kind,
            index,
        }
    }

    fn is_swing_high(&self, i: usize) -> bool {
        let h = self.bars[i].high;
        self.bars[i - self.n..i].iter().all(|b| b.high < h)
            && self.bars[i + 1..=i + self.n].iter().all(|b| b.high <= h)
    }

    fn is_swing_low(&self, i: usize) -> bool {
        let l = self.bars[i].low;
        self.bars[i - self.n..i].iter().all(|b| b.low > l)
            && self.bars[i + 1..=i + self.n].iter().all(|b| b.low >= l)
    }
}

impl<'a> Iterator for Swings<'a> {
    type Item = SwingPoint;

    fn next(&mut self) -> Option<SwingPoint> {
        if let Some(point) = self.pending.take() {
            return Some(point);
        }

        while self.n > 0 && self.next + self.n < self.bars.len() {
            let i = self.next;
            self.next += 1;

            match (self.is_swing_high(i), self.is_swing_low(i)) {
                (true, true) => {
                    // outside bar: report both extremes, high first
                    self.pending = Some(self.point(i, SwingKind::Low));
                    return Some(self.point(i, SwingKind::High));
                }
                (true, false) => return Some(self.point(i, SwingKind::High)),
                (false, true) => return Some(self.point(i, SwingKind::Low)),
                (false, false) => {}
            }
        }
        None
    }
}

/// Drops swings whose advance/retrace from the prior accepted opposite
/// swing is smaller than `k x ATR` at the swing bar.
#[derive(Debug, Clone)]
pub struct NoiseFiltered<'f, I> {
    inner: I,
    features: &'f [FeatureSet],
    atr_mult: f64,
    last_high: Option<f64>,
    last_low: Option<f64>,
}

impl<'f, I: Iterator<Item = SwingPoint>> NoiseFiltered<'f, I> {
    pub fn new(inner: I, features: &'f [FeatureSet], atr_mult: f64) -> Self {
        Self {
            inner,
            features,
            atr_mult,
            last_high: None,
            last_low: None,
        }
    }

    fn accepts(&self, point: &SwingPoint) -> bool {
        // without an ATR there is no scale to judge noise against
        let Some(atr) = self.features.get(point.index).and_then(|f| f.atr) else {
            return true;
        };
        let min_move = self.atr_mult * atr;
        match point.kind {
            SwingKind::High => self.last_low.map_or(true, |low| point.price - low >= min_move),
            SwingKind::Low => self.last_high.map_or(true, |high| high - point.price >= min_move),
        }
    }
}

impl<'f, I: Iterator<Item = SwingPoint>> Iterator for NoiseFiltered<'f, I> {
    type Item = SwingPoint;

    fn next(&mut self) -> Option<SwingPoint> {
        loop {
            let point = self.inner.next()?;
            if self.accepts(&point) {
                match point.kind {
                    SwingKind::High => self.last_high = Some(point.price),
                    SwingKind::Low => self.last_low = Some(point.price),
                }
                return Some(point);
            }
        }
    }
}

/// Swing sequence used by the pipeline: fractal detection plus the optional
/// noise filter.
pub fn detect_swings(bars: &[Bar], features: &[FeatureSet], half_window: usize, filter_atr_mult: Option<f64>) -> Vec<SwingPoint> {
    let detector = SwingDetector::new(bars, half_window);
    match filter_atr_mult {
        Some(k) if k > 0.0 => NoiseFiltered::new(detector.iter(), features, k).collect(),
        _ => detector.iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::features::FeatureExtractor;
    use chrono::{Duration, TimeZone};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(start + Duration::minutes(5 * i as i64), c, c + 0.5, c - 0.5, c, 100.0))
            .collect()
    }

    #[test]
    fn test_detects_peak_and_trough() {
        let bars = bars_from_closes(&[100.0, 101.0, 102.0, 101.0, 100.0, 99.0, 98.0, 99.0, 100.0]);
        let swings: Vec<SwingPoint> = SwingDetector::new(&bars, 2).iter().collect();

        assert_eq!(swings.len(), 2);
        assert_eq!(swings[0].kind, SwingKind::High);
        assert_eq!(swings[0].index, 2);
        assert_eq!(swings[0].price, 102.5);
        assert_eq!(swings[1].kind, SwingKind::Low);
        assert_eq!(swings[1].index, 6);
        assert_eq!(swings[1].price, 97.5);
    }

    #[test]
    fn test_tail_never_confirms() {
        // the final bar is the lowest, but has no right-hand window
        let bars = bars_from_closes(&[100.0, 101.0, 102.0, 101.0, 100.0, 99.0, 95.0]);
        let detector = SwingDetector::new(&bars, 2);
        let swings: Vec<SwingPoint> = detector.iter().collect();
        assert!(swings.iter().all(|s| s.index < detector.provisional_from()));
        assert!(swings.iter().all(|s| s.kind == SwingKind::High));
    }

    #[test]
    fn test_plateau_resolves_leftmost() {
        let bars = bars_from_closes(&[100.0, 101.0, 103.0, 103.0, 101.0, 100.0]);
        let swings: Vec<SwingPoint> = SwingDetector::new(&bars, 2).iter().collect();
        let highs: Vec<usize> = swings.iter().filter(|s| s.kind == SwingKind::High).map(|s| s.index).collect();
        assert_eq!(highs, vec![2]);
    }

    #[test]
    fn test_insufficient_bars() {
        let bars = bars_from_closes(&[100.0, 101.0, 100.0, 99.0]);
        let detector = SwingDetector::new(&bars, 2);
        assert!(!detector.has_enough_bars());
        assert_eq!(detector.iter().count(), 0);
    }

    #[test]
    fn test_iteration_is_restartable() {
        let bars = bars_from_closes(&[100.0, 102.0, 104.0, 102.0, 100.0, 102.0, 104.0, 106.0, 104.0, 102.0]);
        let detector = SwingDetector::new(&bars, 1);
        let first: Vec<SwingPoint> = detector.iter().collect();
        let second: Vec<SwingPoint> = detector.iter().collect();
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_noise_filter_drops_micro_swings() {
        // a large swing up, a tiny dip, then continuation
        let closes = [
            100.0, 100.0, 100.0, 100.0, 100.0, 110.0, 120.0, 119.6, 120.5, 121.0, 122.0, 123.0,
        ];
        let bars = bars_from_closes(&closes);
        let features = FeatureExtractor::new(3, 3, 3).extract(&bars);

        let raw: Vec<SwingPoint> = SwingDetector::new(&bars, 1).iter().collect();
        assert!(raw.iter().any(|s| s.index == 7 && s.kind == SwingKind::Low));

        let filtered = detect_swings(&bars, &features, 1, Some(1.0));
        assert!(!filtered.iter().any(|s| s.index == 7));
        assert!(filtered.len() < raw.len());
    }
}
