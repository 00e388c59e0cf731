//! Conditional trade plans derived from the current structure.
//!
//! Both plans are always produced. They describe what would have to happen,
//! not what is happening.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::breakout::{BreakoutOutcome, BreakoutState};
use super::zones::{Zone, ZoneSet};
use crate::config::AnalysisParams;
use crate::types::{Bar, Timeframe};

/// Bars scanned for a fallback level when no zone of a kind exists
const FALLBACK_LOOKBACK: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    /// Plan A: trend continuation through resistance
    Continuation,
    /// Plan B: reversal through support
    Reversal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTag {
    #[serde(rename = "noise_high_1m")]
    NoiseHigh1m,
    LiquidityRisk,
    EventRisk,
}

impl fmt::Display for RiskTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTag::NoiseHigh1m => write!(f, "noise_high_1m"),
            RiskTag::LiquidityRisk => write!(f, "liquidity_risk"),
            RiskTag::EventRisk => write!(f, "event_risk"),
        }
    }
}

/// Trigger condition, kept as a template key plus its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTrigger {
    pub template_key: String,
    pub level: f64,
    pub volume_ratio_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookPlan {
    pub kind: PlanKind,
    pub trigger: PlanTrigger,
    pub target: f64,
    pub invalidation: f64,
    pub risk_tag: RiskTag,
    /// Current state of the boundary the trigger refers to
    pub breakout_state: BreakoutState,
}

/// Builds the two plans
#[derive(Debug, Clone)]
pub struct PlaybookGenerator {
    timeframe: Timeframe,
    target_atr_mult: f64,
    volume_threshold: f64,
    signature_decimals: u32,
}

impl PlaybookGenerator {
    pub fn from_params(params: &AnalysisParams) -> Self {
        Self {
            timeframe: params.timeframe,
            target_atr_mult: params.playbook_target_atr_mult,
            volume_threshold: params.breakout_volume_threshold,
            signature_decimals: params.signature_decimals,
        }
    }

    /// Plan A then Plan B
    pub fn generate(&self, bars: &[Bar], zones: &ZoneSet, breakouts: &BreakoutOutcome, atr: f64) -> [PlaybookPlan; 2] {
        let close = bars.last().map_or(0.0, |b| b.close);
        let recent = &bars[bars.len().saturating_sub(FALLBACK_LOOKBACK)..];
        let step = self.target_atr_mult * atr.max(0.0);

        // Plan A: break above the top resistance
        let resistance = zones.resistance.first();
        let (res_low, res_high) = match resistance {
            Some(z) => (z.low, z.high),
            None => {
                let high = recent.iter().map(|b| b.high).fold(close, f64::max);
                (high, high)
            }
        };
        let next_above = zones
            .resistance
            .iter()
            .filter(|z| z.low > res_high)
            .map(|z| z.low)
            .fold(None, |acc: Option<f64>, low| Some(acc.map_or(low, |a| a.min(low))));
        let plan_a = PlaybookPlan {
            kind: PlanKind::Continuation,
            trigger: PlanTrigger {
                template_key: "playbook.trigger.breakout_above".to_string(),
                level: res_high,
                volume_ratio_threshold: self.volume_threshold,
            },
            target: next_above.unwrap_or(close + step),
            invalidation: res_low,
            risk_tag: self.risk_tag(resistance),
            breakout_state: self.state_of(resistance, breakouts),
        };

        // Plan B: break below the top support
        let support = zones.support.first();
        let (sup_low, sup_high) = match support {
            Some(z) => (z.low, z.high),
            None => {
                let low = recent.iter().map(|b| b.low).fold(close, f64::min);
                (low, low)
            }
        };
        let next_below = zones
            .support
            .iter()
            .filter(|z| z.high < sup_low)
            .map(|z| z.high)
            .fold(None, |acc: Option<f64>, high| Some(acc.map_or(high, |a| a.max(high))));
        let plan_b = PlaybookPlan {
            kind: PlanKind::Reversal,
            trigger: PlanTrigger {
                template_key: "playbook.trigger.breakdown_below".to_string(),
                level: sup_low,
                volume_ratio_threshold: self.volume_threshold,
            },
            target: next_below.unwrap_or(close - step),
            invalidation: sup_high,
            risk_tag: self.risk_tag(support),
            breakout_state: self.state_of(support, breakouts),
        };

        [plan_a, plan_b]
    }

    fn risk_tag(&self, zone: Option<&Zone>) -> RiskTag {
        if self.timeframe == Timeframe::Min1 {
            RiskTag::NoiseHigh1m
        } else if zone.map_or(true, |z| z.touches < 2) {
            RiskTag::LiquidityRisk
        } else {
            RiskTag::EventRisk
        }
    }

    fn state_of(&self, zone: Option<&Zone>, breakouts: &BreakoutOutcome) -> BreakoutState {
        zone.and_then(|z| breakouts.status_for(z, self.signature_decimals))
            .map_or(BreakoutState::Idle, |s| s.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::zones::ZoneKind;
    use chrono::{Duration, TimeZone, Utc};

    fn bars() -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        (0..30)
            .map(|i| {
                let c = 100.0 + (i % 5) as f64;
                Bar::new(start + Duration::hours(i), c, c + 1.0, c - 1.0, c, 10.0)
            })
            .collect()
    }

    fn zone(kind: ZoneKind, low: f64, high: f64, touches: u32) -> Zone {
        Zone {
            kind,
            low,
            high,
            score: 0.5,
            touches,
            reaction_strength: 1.0,
        }
    }

    #[test]
    fn test_plans_use_zones() {
        let zones = ZoneSet {
            support: vec![zone(ZoneKind::Support, 95.0, 96.0, 3), zone(ZoneKind::Support, 90.0, 91.0, 2)],
            resistance: vec![
                zone(ZoneKind::Resistance, 106.0, 107.0, 3),
                zone(ZoneKind::Resistance, 112.0, 113.0, 2),
            ],
        };
        let generator = PlaybookGenerator::from_params(&AnalysisParams::for_timeframe(Timeframe::Hour1));
        let [a, b] = generator.generate(&bars(), &zones, &BreakoutOutcome::default(), 2.0);

        assert_eq!(a.kind, PlanKind::Continuation);
        assert_eq!(a.trigger.level, 107.0);
        assert_eq!(a.trigger.volume_ratio_threshold, 1.8);
        assert_eq!(a.target, 112.0);
        assert_eq!(a.invalidation, 106.0);
        assert_eq!(a.risk_tag, RiskTag::EventRisk);
        assert_eq!(a.breakout_state, BreakoutState::Idle);

        assert_eq!(b.kind, PlanKind::Reversal);
        assert_eq!(b.trigger.level, 95.0);
        assert_eq!(b.target, 91.0);
        assert_eq!(b.invalidation, 96.0);
    }

    #[test]
    fn test_fallback_without_zones() {
        let generator = PlaybookGenerator::from_params(&AnalysisParams::for_timeframe(Timeframe::Day1));
        let [a, b] = generator.generate(&bars(), &ZoneSet::default(), &BreakoutOutcome::default(), 2.0);

        // last close 104, recent range 99..105: targets are close +/- 2 x ATR
        assert_eq!(a.trigger.level, 105.0);
        assert_eq!(a.target, 108.0);
        assert_eq!(a.risk_tag, RiskTag::LiquidityRisk);
        assert_eq!(b.trigger.level, 99.0);
        assert_eq!(b.target, 100.0);
    }

    #[test]
    fn test_no_next_zone_targets_from_close() {
        let zones = ZoneSet {
            support: vec![zone(ZoneKind::Support, 97.0, 98.0, 2)],
            resistance: vec![zone(ZoneKind::Resistance, 106.0, 107.0, 2)],
        };
        let generator = PlaybookGenerator::from_params(&AnalysisParams::for_timeframe(Timeframe::Hour1));
        let [a, b] = generator.generate(&bars(), &zones, &BreakoutOutcome::default(), 1.5);

        assert_eq!(a.trigger.level, 107.0);
        assert_eq!(a.target, 107.0);
        assert_eq!(b.trigger.level, 97.0);
        assert_eq!(b.target, 101.0);
    }

    #[test]
    fn test_one_minute_is_noisy() {
        let zones = ZoneSet {
            support: vec![zone(ZoneKind::Support, 95.0, 96.0, 5)],
            resistance: Vec::new(),
        };
        let generator = PlaybookGenerator::from_params(&AnalysisParams::for_timeframe(Timeframe::Min1));
        let plans = generator.generate(&bars(), &zones, &BreakoutOutcome::default(), 1.0);
        assert!(plans.iter().all(|p| p.risk_tag == RiskTag::NoiseHigh1m));
    }
}
