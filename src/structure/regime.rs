//! Regime Classification
//!
//! Determines whether recent structure is an Uptrend (higher highs and
//! higher lows), a Downtrend (lower lows and lower highs) or a Range, from
//! the most recent swing points.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::swings::{SwingKind, SwingPoint};

/// Regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Uptrend,
    Downtrend,
    /// No side has the majority of swing comparisons
    Range,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Uptrend => "uptrend",
            Regime::Downtrend => "downtrend",
            Regime::Range => "range",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of regime analysis over the most recent swings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeResult {
    pub regime: Regime,
    /// (winning - losing) / total comparisons, in [0, 1]
    pub confidence: f64,
    pub higher_highs: u32,
    pub lower_highs: u32,
    pub higher_lows: u32,
    pub lower_lows: u32,
    /// Consecutive same-kind comparisons, equal prices included
    pub high_pairs: u32,
    pub low_pairs: u32,
    /// Bar index of the newest swing considered
    pub last_swing_index: Option<usize>,
}

impl RegimeResult {
    pub fn total_comparisons(&self) -> u32 {
        self.high_pairs + self.low_pairs
    }

    /// Fewer than two same-kind swings: nothing could be compared
    pub fn is_insufficient(&self) -> bool {
        self.total_comparisons() == 0
    }

    /// Share of low-to-low comparisons that were higher lows
    pub fn higher_low_share(&self) -> f64 {
        if self.low_pairs == 0 {
            0.0
        } else {
            self.higher_lows as f64 / self.low_pairs as f64
        }
    }

    /// Share of all comparisons that were lower lows or lower highs
    pub fn lower_structure_share(&self) -> f64 {
        let total = self.total_comparisons();
        if total == 0 {
            0.0
        } else {
            (self.lower_lows + self.lower_highs) as f64 / total as f64
        }
    }
}

/// Classify the regime from the most recent `max_swings` swing points
pub fn classify_regime(swings: &[SwingPoint], max_swings: usize) -> RegimeResult {
    let start = swings.len().saturating_sub(max_swings);
    let window = &swings[start..];

    let mut result = RegimeResult {
        regime: Regime::Range,
        confidence: 0.0,
        higher_highs: 0,
        lower_highs: 0,
        higher_lows: 0,
        lower_lows: 0,
        high_pairs: 0,
        low_pairs: 0,
        last_swing_index: window.last().map(|s| s.index),
    };

    let mut prev_high: Option<f64> = None;
    let mut prev_low: Option<f64> = None;

    for swing in window {
        match swing.kind {
            SwingKind::High => {
                if let Some(prev) = prev_high {
                    result.high_pairs += 1;
                    if swing.price > prev {
                        result.higher_highs += 1;
                    } else if swing.price < prev {
                        result.lower_highs += 1;
                    }
                }
                prev_high = Some(swing.price);
            }
            SwingKind::Low => {
                if let Some(prev) = prev_low {
                    result.low_pairs += 1;
                    if swing.price > prev {
                        result.higher_lows += 1;
                    } else if swing.price < prev {
                        result.lower_lows += 1;
                    }
                }
                prev_low = Some(swing.price);
            }
        }
    }

    let up = result.higher_highs + result.higher_lows;
    let down = result.lower_lows + result.lower_highs;
    let total = result.total_comparisons();

    // Strict majority wins, ties (including 0-0) are a range
    result.regime = if up > down {
        Regime::Uptrend
    } else if down > up {
        Regime::Downtrend
    } else {
        Regime::Range
    };

    result.confidence = if total == 0 {
        0.0
    } else {
        ((up.max(down) - up.min(down)) as f64 / total as f64).clamp(0.0, 1.0)
    };

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn swing(index: usize, kind: SwingKind, price: f64) -> SwingPoint {
        SwingPoint {
            timestamp: Utc.timestamp_opt(index as i64 * 60, 0).unwrap(),
            price,
            kind,
            index,
        }
    }

    fn alternating(prices: &[f64], first: SwingKind) -> Vec<SwingPoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let kind = match (first, i % 2) {
                    (SwingKind::High, 0) | (SwingKind::Low, 1) => SwingKind::High,
                    _ => SwingKind::Low,
                };
                swing(i * 5, kind, p)
            })
            .collect()
    }

    #[test]
    fn test_rising_structure_is_uptrend() {
        // L 100, H 110, L 104, H 115, L 108, H 120, L 112, H 126
        let swings = alternating(&[100.0, 110.0, 104.0, 115.0, 108.0, 120.0, 112.0, 126.0], SwingKind::Low);
        let result = classify_regime(&swings, 8);
        assert_eq!(result.regime, Regime::Uptrend);
        assert!(result.confidence > 0.5);
        assert_eq!(result.higher_highs, 3);
        assert_eq!(result.higher_lows, 3);
        assert_eq!(result.higher_low_share(), 1.0);
    }

    #[test]
    fn test_falling_structure_is_downtrend() {
        let swings = alternating(&[130.0, 120.0, 126.0, 115.0, 121.0, 110.0], SwingKind::High);
        let result = classify_regime(&swings, 8);
        assert_eq!(result.regime, Regime::Downtrend);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.lower_structure_share(), 1.0);
    }

    #[test]
    fn test_tie_is_range() {
        // HH then LH, HL then LL: 2 vs 2
        let swings = alternating(&[100.0, 110.0, 104.0, 112.0, 102.0, 108.0], SwingKind::Low);
        let result = classify_regime(&swings, 8);
        assert_eq!(result.regime, Regime::Range);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_no_swings_is_insufficient() {
        let result = classify_regime(&[], 8);
        assert_eq!(result.regime, Regime::Range);
        assert_eq!(result.confidence, 0.0);
        assert!(result.is_insufficient());

        let single = vec![swing(3, SwingKind::High, 100.0)];
        let result = classify_regime(&single, 8);
        assert!(result.is_insufficient());
        assert_eq!(result.last_swing_index, Some(3));
    }

    #[test]
    fn test_only_recent_swings_count() {
        // old downtrend followed by a fresh uptrend
        let mut swings = alternating(&[150.0, 140.0, 145.0, 130.0, 135.0, 120.0], SwingKind::High);
        let offset = swings.len() * 5;
        let up = alternating(&[122.0, 130.0, 125.0, 134.0, 128.0, 140.0], SwingKind::Low);
        swings.extend(up.into_iter().map(|mut s| {
            s.index += offset;
            s
        }));
        let result = classify_regime(&swings, 6);
        assert_eq!(result.regime, Regime::Uptrend);
    }
}
