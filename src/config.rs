//! Analysis parameters with per-timeframe defaults

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::AnalysisError;
use crate::structure::behavior::Signal;
use crate::types::Timeframe;

/// How swing extrema are grouped into zone candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringMethod {
    /// Fixed-width price bins, neighbouring bins merge
    #[default]
    Binning,
    /// Gap linkage: sorted prices split wherever the gap exceeds the bin width
    Density,
}

/// How each behavior summand is scaled before weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    #[default]
    MinMax,
    ZScore,
}

/// Full parameter set for one analysis call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Timeframe the defaults were derived for
    pub timeframe: Timeframe,

    /// Fractal half-window n: a swing needs n bars on each side
    pub swing_half_window: usize,
    /// ATR period
    pub atr_period: usize,
    /// Volume SMA window N for volume_ratio
    pub volume_window: usize,
    /// Lookback for up/down move efficiency
    pub efficiency_window: usize,
    /// Swings closer than k x ATR to the prior opposite swing are dropped. None disables.
    pub swing_filter_atr_mult: Option<f64>,

    /// Most recent swings considered by the regime classifier (m)
    pub regime_swing_count: usize,

    /// Cluster bin width as a multiple of ATR
    pub zone_bin_atr_mult: f64,
    /// Zone padding w around the cluster, multiple of ATR
    pub zone_width_atr_mult: f64,
    /// Bars after a touch inspected for the reaction
    pub zone_reaction_lookahead: usize,
    pub zone_touch_weight: f64,
    pub zone_reaction_weight: f64,
    /// Top K zones kept per kind
    pub max_zones: usize,
    pub clustering: ClusteringMethod,

    /// Vth: volume_ratio needed to confirm a breakout
    pub breakout_volume_threshold: f64,
    /// Nc: consecutive closes outside the zone needed to confirm
    pub breakout_confirm_bars: usize,
    /// M: bars after an attempt during which a fakeout can be declared
    pub fakeout_window: usize,
    /// Confirmation clearance beyond the boundary, multiple of ATR
    pub breakout_epsilon_atr_mult: f64,
    /// Wick ratio that counts as a rejecting wick
    pub rejection_wick_ratio: f64,

    pub normalization: NormalizationMode,
    /// Bars used as the reference population when normalizing signals
    pub scoring_window: usize,
    /// Distance from a zone, in ATR, that still counts as "near"
    pub proximity_atr_mult: f64,
    /// Per-signal weight overrides. Missing signals weigh 1.0.
    pub signal_weights: BTreeMap<Signal, f64>,

    /// Dominant probability move that produces a timeline event
    pub probability_shift_threshold: f64,

    /// Fallback target distance for playbook plans, multiple of ATR
    pub playbook_target_atr_mult: f64,

    /// Decimals kept when rounding zone boundaries for the signature
    pub signature_decimals: u32,
    /// A gap is flagged when bars are more than gap_factor x timeframe apart
    pub gap_factor: f64,
    /// Most recent breakout signals kept in the report
    pub max_signals: usize,
}

impl AnalysisParams {
    /// Documented defaults for a timeframe
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        let intraday = timeframe.is_intraday();
        Self {
            timeframe,
            swing_half_window: if intraday { 4 } else { 3 },
            atr_period: 14,
            volume_window: if intraday { 30 } else { 20 },
            efficiency_window: 10,
            swing_filter_atr_mult: Some(1.0),
            regime_swing_count: 8,
            zone_bin_atr_mult: 0.5,
            zone_width_atr_mult: if intraday { 0.35 } else { 0.5 },
            zone_reaction_lookahead: 5,
            zone_touch_weight: 0.5,
            zone_reaction_weight: 0.5,
            max_zones: 4,
            clustering: ClusteringMethod::Binning,
            breakout_volume_threshold: 1.8,
            breakout_confirm_bars: 2,
            fakeout_window: 3,
            breakout_epsilon_atr_mult: 0.1,
            rejection_wick_ratio: 0.5,
            normalization: NormalizationMode::MinMax,
            scoring_window: 20,
            proximity_atr_mult: 0.5,
            signal_weights: BTreeMap::new(),
            probability_shift_threshold: 0.12,
            playbook_target_atr_mult: 2.0,
            signature_decimals: 2,
            gap_factor: match timeframe {
                Timeframe::Day1 => 3.5,
                // 8 days
                Timeframe::Week1 => 8.0 / 7.0,
                _ => 1.5,
            },
            max_signals: 50,
        }
    }

    /// Rejects out-of-domain values. Runs before any computation.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        fn positive(name: &str, value: f64) -> Result<(), AnalysisError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(AnalysisError::InvalidParams(format!("{} must be > 0, got {}", name, value)))
            }
        }
        fn non_negative(name: &str, value: f64) -> Result<(), AnalysisError> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(AnalysisError::InvalidParams(format!("{} must be >= 0, got {}", name, value)))
            }
        }
        fn at_least(name: &str, value: usize, min: usize) -> Result<(), AnalysisError> {
            if value >= min {
                Ok(())
            } else {
                Err(AnalysisError::InvalidParams(format!("{} must be >= {}, got {}", name, min, value)))
            }
        }

        at_least("swing_half_window", self.swing_half_window, 1)?;
        at_least("atr_period", self.atr_period, 1)?;
        at_least("volume_window", self.volume_window, 1)?;
        at_least("efficiency_window", self.efficiency_window, 1)?;
        at_least("regime_swing_count", self.regime_swing_count, 2)?;
        at_least("zone_reaction_lookahead", self.zone_reaction_lookahead, 1)?;
        at_least("max_zones", self.max_zones, 1)?;
        at_least("breakout_confirm_bars", self.breakout_confirm_bars, 1)?;
        at_least("fakeout_window", self.fakeout_window, 1)?;
        // the attempt bar plus M more is the most closes an attempt can collect
        if self.breakout_confirm_bars > self.fakeout_window + 1 {
            return Err(AnalysisError::InvalidParams(format!(
                "breakout_confirm_bars ({}) must be <= fakeout_window + 1 ({})",
                self.breakout_confirm_bars,
                self.fakeout_window + 1
            )));
        }
        at_least("scoring_window", self.scoring_window, 2)?;

        if let Some(k) = self.swing_filter_atr_mult {
            non_negative("swing_filter_atr_mult", k)?;
        }
        positive("zone_bin_atr_mult", self.zone_bin_atr_mult)?;
        positive("zone_width_atr_mult", self.zone_width_atr_mult)?;
        non_negative("zone_touch_weight", self.zone_touch_weight)?;
        non_negative("zone_reaction_weight", self.zone_reaction_weight)?;
        positive(
            "zone_touch_weight + zone_reaction_weight",
            self.zone_touch_weight + self.zone_reaction_weight,
        )?;
        positive("breakout_volume_threshold", self.breakout_volume_threshold)?;
        non_negative("breakout_epsilon_atr_mult", self.breakout_epsilon_atr_mult)?;
        positive("rejection_wick_ratio", self.rejection_wick_ratio)?;
        if self.rejection_wick_ratio > 1.0 {
            return Err(AnalysisError::InvalidParams(format!(
                "rejection_wick_ratio must be <= 1, got {}",
                self.rejection_wick_ratio
            )));
        }
        non_negative("proximity_atr_mult", self.proximity_atr_mult)?;
        for (signal, weight) in &self.signal_weights {
            non_negative(&format!("signal_weights.{}", signal.as_str()), *weight)?;
        }
        positive("probability_shift_threshold", self.probability_shift_threshold)?;
        if self.probability_shift_threshold > 1.0 {
            return Err(AnalysisError::InvalidParams(format!(
                "probability_shift_threshold must be <= 1, got {}",
                self.probability_shift_threshold
            )));
        }
        positive("playbook_target_atr_mult", self.playbook_target_atr_mult)?;
        if self.signature_decimals > 10 {
            return Err(AnalysisError::InvalidParams(format!(
                "signature_decimals must be <= 10, got {}",
                self.signature_decimals
            )));
        }
        if !(self.gap_factor.is_finite() && self.gap_factor >= 1.0) {
            return Err(AnalysisError::InvalidParams(format!(
                "gap_factor must be >= 1, got {}",
                self.gap_factor
            )));
        }
        Ok(())
    }
}

/// Sparse overrides, typically loaded from a JSON file.
/// Every field is independent; `None` keeps the timeframe default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamOverrides {
    pub swing_half_window: Option<usize>,
    pub atr_period: Option<usize>,
    pub volume_window: Option<usize>,
    pub efficiency_window: Option<usize>,
    /// Some(None) (JSON `null`) disables the swing noise filter
    #[serde(with = "double_option", skip_serializing_if = "Option::is_none")]
    pub swing_filter_atr_mult: Option<Option<f64>>,
    pub regime_swing_count: Option<usize>,
    pub zone_bin_atr_mult: Option<f64>,
    pub zone_width_atr_mult: Option<f64>,
    pub zone_reaction_lookahead: Option<usize>,
    pub zone_touch_weight: Option<f64>,
    pub zone_reaction_weight: Option<f64>,
    pub max_zones: Option<usize>,
    pub clustering: Option<ClusteringMethod>,
    pub breakout_volume_threshold: Option<f64>,
    pub breakout_confirm_bars: Option<usize>,
    pub fakeout_window: Option<usize>,
    pub breakout_epsilon_atr_mult: Option<f64>,
    pub rejection_wick_ratio: Option<f64>,
    pub normalization: Option<NormalizationMode>,
    pub scoring_window: Option<usize>,
    pub proximity_atr_mult: Option<f64>,
    pub signal_weights: Option<BTreeMap<Signal, f64>>,
    pub probability_shift_threshold: Option<f64>,
    pub playbook_target_atr_mult: Option<f64>,
    pub signature_decimals: Option<u32>,
    pub gap_factor: Option<f64>,
    pub max_signals: Option<usize>,
}

macro_rules! apply_fields {
    ($overrides:expr, $params:expr; $($field:ident),* $(,)?) => {
        $(
            if let Some(value) = $overrides.$field {
                $params.$field = value;
            }
        )*
    };
}

impl ParamOverrides {
    /// Timeframe defaults with these overrides layered on top
    pub fn resolve(self, timeframe: Timeframe) -> AnalysisParams {
        self.apply(AnalysisParams::for_timeframe(timeframe))
    }

    pub fn apply(self, mut params: AnalysisParams) -> AnalysisParams {
        apply_fields!(self, params;
            swing_half_window,
            atr_period,
            volume_window,
            efficiency_window,
            swing_filter_atr_mult,
            regime_swing_count,
            zone_bin_atr_mult,
            zone_width_atr_mult,
            zone_reaction_lookahead,
            zone_touch_weight,
            zone_reaction_weight,
            max_zones,
            clustering,
            breakout_volume_threshold,
            breakout_confirm_bars,
            fakeout_window,
            breakout_epsilon_atr_mult,
            rejection_wick_ratio,
            normalization,
            scoring_window,
            proximity_atr_mult,
            probability_shift_threshold,
            playbook_target_atr_mult,
            signature_decimals,
            gap_factor,
            max_signals,
        );
        if let Some(weights) = self.signal_weights {
            params.signal_weights.extend(weights);
        }
        params
    }
}

/// Distinguishes a missing field from an explicit `null`
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            None => serializer.serialize_none(),
            Some(inner) => inner.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_defaults() {
        let intraday = AnalysisParams::for_timeframe(Timeframe::Min5);
        assert_eq!(intraday.swing_half_window, 4);
        assert_eq!(intraday.volume_window, 30);
        assert_eq!(intraday.zone_width_atr_mult, 0.35);

        let daily = AnalysisParams::for_timeframe(Timeframe::Day1);
        assert_eq!(daily.swing_half_window, 3);
        assert_eq!(daily.volume_window, 20);
        assert_eq!(daily.zone_width_atr_mult, 0.5);
        assert_eq!(daily.gap_factor, 3.5);

        assert!(intraday.validate().is_ok());
        assert!(daily.validate().is_ok());

        // weekly bars may sit 8 days apart before a gap is flagged
        let weekly = AnalysisParams::for_timeframe(Timeframe::Week1);
        let tolerance = Timeframe::Week1.duration().num_seconds() as f64 * weekly.gap_factor;
        assert!((tolerance - 8.0 * 86_400.0).abs() < 1e-6);
        assert!(weekly.validate().is_ok());
    }

    #[test]
    fn test_confirmation_must_fit_the_window() {
        let mut params = AnalysisParams::for_timeframe(Timeframe::Min15);
        params.fakeout_window = 2;
        params.breakout_confirm_bars = 3;
        assert!(params.validate().is_ok());

        params.breakout_confirm_bars = 4;
        assert!(matches!(params.validate(), Err(AnalysisError::InvalidParams(_))));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = AnalysisParams::for_timeframe(Timeframe::Hour1);
        params.breakout_volume_threshold = 0.0;
        assert!(matches!(params.validate(), Err(AnalysisError::InvalidParams(_))));

        let mut params = AnalysisParams::for_timeframe(Timeframe::Hour1);
        params.swing_half_window = 0;
        assert!(matches!(params.validate(), Err(AnalysisError::InvalidParams(_))));

        let mut params = AnalysisParams::for_timeframe(Timeframe::Hour1);
        params.signal_weights.insert(Signal::VolumeRatio, -1.0);
        assert!(matches!(params.validate(), Err(AnalysisError::InvalidParams(_))));

        let mut params = AnalysisParams::for_timeframe(Timeframe::Hour1);
        params.zone_touch_weight = 0.0;
        params.zone_reaction_weight = 0.0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_overrides_from_json() {
        let overrides: ParamOverrides = serde_json::from_str(
            r#"{
                "swing_half_window": 2,
                "breakout_volume_threshold": 2.5,
                "swing_filter_atr_mult": null,
                "normalization": "z_score",
                "signal_weights": { "volume_ratio": 2.0 }
            }"#,
        )
        .unwrap();

        let params = overrides.resolve(Timeframe::Day1);
        assert_eq!(params.swing_half_window, 2);
        assert_eq!(params.breakout_volume_threshold, 2.5);
        assert_eq!(params.swing_filter_atr_mult, None);
        assert_eq!(params.normalization, NormalizationMode::ZScore);
        assert_eq!(params.signal_weights.get(&Signal::VolumeRatio), Some(&2.0));
        assert_eq!(params.signal_weights.get(&Signal::LowerWick), None);
        // untouched fields keep the daily defaults
        assert_eq!(params.volume_window, 20);
    }

    #[test]
    fn test_unknown_override_rejected() {
        let result: Result<ParamOverrides, _> = serde_json::from_str(r#"{ "vth": 2.0 }"#);
        assert!(result.is_err());
    }
}
