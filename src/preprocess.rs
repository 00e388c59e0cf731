//! Bar hygiene before the structure pipeline: validation, ordering,
//! de-duplication and gap detection.

use tracing::debug;

use crate::error::AnalysisError;
use crate::types::{Bar, Timeframe};

/// Sorted, de-duplicated bars plus what was noticed while preparing them
#[derive(Debug, Clone)]
pub struct PreparedBars {
    pub bars: Vec<Bar>,
    /// Number of discontinuities larger than gap_factor x timeframe
    pub gap_count: usize,
    /// Bars dropped because another bar had the same timestamp
    pub duplicates_removed: usize,
}

impl PreparedBars {
    pub fn has_gaps(&self) -> bool {
        self.gap_count > 0
    }
}

/// Validate, sort and de-duplicate a raw bar sequence.
///
/// Duplicate timestamps keep the bar that appeared last in the input.
pub fn prepare_bars(bars: Vec<Bar>, timeframe: Timeframe, gap_factor: f64) -> Result<PreparedBars, AnalysisError> {
    if bars.is_empty() {
        return Err(AnalysisError::EmptySeries);
    }

    for (index, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|reason| AnalysisError::MalformedBar {
            index,
            reason: reason.to_string(),
        })?;
    }

    let input_len = bars.len();
    let mut indexed: Vec<(usize, Bar)> = bars.into_iter().enumerate().collect();
    // Stable on timestamp, later input position last
    indexed.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(&b.0)));

    let mut sorted: Vec<Bar> = Vec::with_capacity(input_len);
    for (_, bar) in indexed {
        match sorted.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => sorted.push(bar),
        }
    }
    let duplicates_removed = input_len - sorted.len();

    let gap_count = count_gaps(&sorted, timeframe, gap_factor);

    debug!(
        "prepared {} bars ({} duplicates removed, {} gaps)",
        sorted.len(),
        duplicates_removed,
        gap_count
    );

    Ok(PreparedBars {
        bars: sorted,
        gap_count,
        duplicates_removed,
    })
}

/// Count spacings wider than gap_factor x the nominal bar spacing
pub fn count_gaps(bars: &[Bar], timeframe: Timeframe, gap_factor: f64) -> usize {
    let nominal_ms = timeframe.duration().num_milliseconds() as f64;
    let limit_ms = nominal_ms * gap_factor;

    bars.windows(2)
        .filter(|pair| {
            let spacing = (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64;
            spacing > limit_ms
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar_at(minute: i64, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2025, 1, 6, 14, 0, 0).unwrap() + Duration::minutes(minute);
        Bar::new(ts, close, close + 1.0, close - 1.0, close, 100.0)
    }

    #[test]
    fn test_sorts_and_dedupes() {
        let bars = vec![bar_at(2, 102.0), bar_at(0, 100.0), bar_at(1, 101.0), bar_at(1, 111.0)];
        let prepared = prepare_bars(bars, Timeframe::Min1, 1.5).unwrap();

        assert_eq!(prepared.bars.len(), 3);
        assert_eq!(prepared.duplicates_removed, 1);
        // last write wins for the duplicated minute
        assert_eq!(prepared.bars[1].close, 111.0);
        assert!(prepared.bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(!prepared.has_gaps());
    }

    #[test]
    fn test_detects_gap() {
        let bars = vec![bar_at(0, 100.0), bar_at(1, 100.0), bar_at(5, 100.0), bar_at(6, 100.0)];
        let prepared = prepare_bars(bars, Timeframe::Min1, 1.5).unwrap();
        assert_eq!(prepared.gap_count, 1);
        assert!(prepared.has_gaps());
    }

    #[test]
    fn test_rejects_malformed_bar() {
        let mut broken = bar_at(1, 100.0);
        broken.high = 90.0;
        let result = prepare_bars(vec![bar_at(0, 100.0), broken], Timeframe::Min1, 1.5);
        match result {
            Err(AnalysisError::MalformedBar { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected MalformedBar, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_series() {
        assert!(matches!(
            prepare_bars(Vec::new(), Timeframe::Hour1, 1.5),
            Err(AnalysisError::EmptySeries)
        ));
    }
}
