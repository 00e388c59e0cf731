#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use market_structure::Bar;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 3, 0, 0, 0).unwrap()
}

/// Bars that open at the previous close, with 0.3 of wick either side
pub fn bars_from_closes(closes: &[f64], step: Duration) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(closes.len());
    let mut prev = closes.first().copied().unwrap_or(100.0);
    for (i, &close) in closes.iter().enumerate() {
        let open = prev;
        let high = open.max(close) + 0.3;
        let low = open.min(close) - 0.3;
        let volume = 1000.0 + 10.0 * (i % 5) as f64;
        bars.push(Bar::new(start_time() + step * i as i32, open, high, low, close, volume));
        prev = close;
    }
    bars
}

/// Closes walking `steps` bars of `delta` per leg
pub fn zigzag(start: f64, legs: &[(usize, f64)]) -> Vec<f64> {
    let mut closes = vec![start];
    let mut price = start;
    for &(steps, delta) in legs {
        for _ in 0..steps {
            price += delta;
            closes.push(price);
        }
    }
    closes
}

/// Up 8, down 5, repeated: higher highs and higher lows
pub fn rising_closes(cycles: usize) -> Vec<f64> {
    let legs: Vec<(usize, f64)> = (0..cycles).flat_map(|_| [(8, 1.0), (5, -1.0)]).collect();
    zigzag(100.0, &legs)
}

pub fn csv_for(bars: &[Bar]) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for bar in bars {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            bar.timestamp.to_rfc3339(),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume
        ));
    }
    out
}
