//! Support / resistance zones clustered from swing extrema
//!
//! Swing lows become support candidates and swing highs resistance
//! candidates. Candidates are grouped by price (binning by default), each
//! cluster padded by `w x ATR` on both sides, then scored by touch count and
//! by how hard price reacted away from the zone after each touch.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

use super::swings::{SwingKind, SwingPoint};
use crate::config::{AnalysisParams, ClusteringMethod};
use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    Support,
    Resistance,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::Support => "support",
            ZoneKind::Resistance => "resistance",
        }
    }

    fn source_swing(&self) -> SwingKind {
        match self {
            ZoneKind::Support => SwingKind::Low,
            ZoneKind::Resistance => SwingKind::High,
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scored price band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub kind: ZoneKind,
    pub low: f64,
    pub high: f64,
    /// Normalized blend of touches and reaction strength, in [0, 1]
    pub score: f64,
    pub touches: u32,
    /// Mean post-touch reversal, in ATR units
    pub reaction_strength: f64,
}

impl Zone {
    /// Distance from price to the band, 0 inside it
    pub fn distance_to(&self, price: f64) -> f64 {
        if price < self.low {
            self.low - price
        } else if price > self.high {
            price - self.high
        } else {
            0.0
        }
    }

    /// Content-derived identity: kind plus rounded boundaries
    pub fn key(&self, decimals: u32) -> ZoneKey {
        let scale = 10f64.powi(decimals as i32);
        ZoneKey {
            kind: self.kind,
            low: (self.low * scale).round() as i64,
            high: (self.high * scale).round() as i64,
        }
    }
}

/// Zone identity across calls. Zones are rebuilt every call, so two zones
/// are "the same" when kind and rounded boundaries match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneKey {
    pub kind: ZoneKind,
    pub low: i64,
    pub high: i64,
}

impl fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.low, self.high)
    }
}

/// Support and resistance zones, each sorted by descending score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneSet {
    pub support: Vec<Zone>,
    pub resistance: Vec<Zone>,
}

impl ZoneSet {
    pub fn is_empty(&self) -> bool {
        self.support.is_empty() && self.resistance.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &Zone> {
        self.support.iter().chain(self.resistance.iter())
    }

    pub fn of_kind(&self, kind: ZoneKind) -> &[Zone] {
        match kind {
            ZoneKind::Support => &self.support,
            ZoneKind::Resistance => &self.resistance,
        }
    }

    /// Hash over the sorted (kind, rounded low, rounded high) tuples.
    /// Score changes alone never change it.
    pub fn signature(&self, decimals: u32) -> String {
        let mut keys: Vec<ZoneKey> = self.all().map(|z| z.key(decimals)).collect();
        keys.sort();

        let mut hasher = Sha256::new();
        for key in &keys {
            hasher.update(key.to_string().as_bytes());
            hasher.update(b";");
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

/// A swing extreme offered to the clustering step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub price: f64,
    pub index: usize,
}

/// Groups price-sorted candidates into clusters
pub trait ClusterStrategy: fmt::Debug + Send + Sync {
    /// `candidates` are sorted ascending by price. Every candidate must land
    /// in exactly one cluster.
    fn cluster(&self, candidates: &[Candidate], bin_width: f64) -> Vec<Vec<Candidate>>;
}

/// Fixed bins of `bin_width`. A cluster spans its first bin and the one
/// adjacent to it, so no cluster is wider than two bins.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinningStrategy;

impl ClusterStrategy for BinningStrategy {
    fn cluster(&self, candidates: &[Candidate], bin_width: f64) -> Vec<Vec<Candidate>> {
        let mut clusters: Vec<Vec<Candidate>> = Vec::new();
        let mut anchor_bin: Option<i64> = None;

        for &candidate in candidates {
            let bin = (candidate.price / bin_width).floor() as i64;
            match (anchor_bin, clusters.last_mut()) {
                (Some(anchor), Some(current)) if bin - anchor <= 1 => current.push(candidate),
                _ => {
                    clusters.push(vec![candidate]);
                    anchor_bin = Some(bin);
                }
            }
        }
        clusters
    }
}

/// Single linkage on price: a new cluster starts wherever the gap to the
/// previous candidate exceeds `bin_width`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DensityStrategy;

impl ClusterStrategy for DensityStrategy {
    fn cluster(&self, candidates: &[Candidate], bin_width: f64) -> Vec<Vec<Candidate>> {
        let mut clusters: Vec<Vec<Candidate>> = Vec::new();
        let mut prev_price: Option<f64> = None;

        for &candidate in candidates {
            match (prev_price, clusters.last_mut()) {
                (Some(prev), Some(current)) if candidate.price - prev <= bin_width => current.push(candidate),
                _ => clusters.push(vec![candidate]),
            }
            prev_price = Some(candidate.price);
        }
        clusters
    }
}

impl ClusteringMethod {
    pub fn strategy(&self) -> Box<dyn ClusterStrategy> {
        match self {
            ClusteringMethod::Binning => Box::new(BinningStrategy),
            ClusteringMethod::Density => Box::new(DensityStrategy),
        }
    }
}

/// Builds scored zones from swings
#[derive(Debug)]
pub struct ZoneBuilder {
    strategy: Box<dyn ClusterStrategy>,
    bin_atr_mult: f64,
    width_atr_mult: f64,
    reaction_lookahead: usize,
    touch_weight: f64,
    reaction_weight: f64,
    max_zones: usize,
}

impl ZoneBuilder {
    pub fn from_params(params: &AnalysisParams) -> Self {
        Self {
            strategy: params.clustering.strategy(),
            bin_atr_mult: params.zone_bin_atr_mult,
            width_atr_mult: params.zone_width_atr_mult,
            reaction_lookahead: params.zone_reaction_lookahead,
            touch_weight: params.zone_touch_weight,
            reaction_weight: params.zone_reaction_weight,
            max_zones: params.max_zones,
        }
    }

    /// Swap the clustering strategy, keeping every other setting
    pub fn with_strategy(mut self, strategy: Box<dyn ClusterStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn build(&self, bars: &[Bar], swings: &[SwingPoint], atr: f64, current_close: f64) -> ZoneSet {
        if !(atr.is_finite() && atr > 0.0) {
            return ZoneSet::default();
        }

        let mut zones: Vec<Zone> = [ZoneKind::Support, ZoneKind::Resistance]
            .iter()
            .flat_map(|&kind| self.raw_zones(kind, bars, swings, atr))
            .collect();

        self.score(&mut zones);

        let mut set = ZoneSet::default();
        for kind in [ZoneKind::Support, ZoneKind::Resistance] {
            let mut of_kind: Vec<Zone> = zones.iter().filter(|z| z.kind == kind).cloned().collect();
            of_kind.sort_by(|a, b| rank_order(a, b, current_close));
            of_kind.truncate(self.max_zones);
            match kind {
                ZoneKind::Support => set.support = of_kind,
                ZoneKind::Resistance => set.resistance = of_kind,
            }
        }

        debug!(
            "built {} support / {} resistance zones (atr {:.4})",
            set.support.len(),
            set.resistance.len(),
            atr
        );
        set
    }

    fn raw_zones(&self, kind: ZoneKind, bars: &[Bar], swings: &[SwingPoint], atr: f64) -> Vec<Zone> {
        let mut candidates: Vec<Candidate> = swings
            .iter()
            .filter(|s| s.kind == kind.source_swing())
            .map(|s| Candidate {
                price: s.price,
                index: s.index,
            })
            .collect();

        if candidates.len() < 2 {
            return Vec::new();
        }
        candidates.sort_by(|a, b| a.price.total_cmp(&b.price).then(a.index.cmp(&b.index)));

        let pad = self.width_atr_mult * atr;
        self.strategy
            .cluster(&candidates, self.bin_atr_mult * atr)
            .into_iter()
            .filter(|cluster| !cluster.is_empty())
            .map(|cluster| {
                let min = cluster.iter().map(|c| c.price).fold(f64::INFINITY, f64::min);
                let max = cluster.iter().map(|c| c.price).fold(f64::NEG_INFINITY, f64::max);
                let reaction = cluster
                    .iter()
                    .map(|c| self.reaction(kind, bars, c, atr))
                    .sum::<f64>()
                    / cluster.len() as f64;
                Zone {
                    kind,
                    low: min - pad,
                    high: max + pad,
                    score: 0.0,
                    touches: cluster.len() as u32,
                    reaction_strength: reaction,
                }
            })
            .collect()
    }

    /// Largest move away from the touch within the lookahead, in ATR
    fn reaction(&self, kind: ZoneKind, bars: &[Bar], touch: &Candidate, atr: f64) -> f64 {
        let start = touch.index + 1;
        let end = (touch.index + self.reaction_lookahead).min(bars.len().saturating_sub(1));
        if start > end {
            return 0.0;
        }
        let window = &bars[start..=end];
        let magnitude = match kind {
            ZoneKind::Support => window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max) - touch.price,
            ZoneKind::Resistance => touch.price - window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min),
        };
        (magnitude / atr).max(0.0)
    }

    fn score(&self, zones: &mut [Zone]) {
        let touches: Vec<f64> = zones.iter().map(|z| z.touches as f64).collect();
        let reactions: Vec<f64> = zones.iter().map(|z| z.reaction_strength).collect();
        let touches_norm = min_max(&touches);
        let reactions_norm = min_max(&reactions);
        let total_weight = self.touch_weight + self.reaction_weight;

        for (i, zone) in zones.iter_mut().enumerate() {
            let blended = self.touch_weight * touches_norm[i] + self.reaction_weight * reactions_norm[i];
            zone.score = (blended / total_weight).clamp(0.0, 1.0);
        }
    }
}

/// Min-max scaling. When every value is equal there is no spread to scale:
/// positive values map to 1, zeros to 0.
fn min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = max - min;
    values
        .iter()
        .map(|&v| {
            if spread > f64::EPSILON {
                (v - min) / spread
            } else if v > 0.0 {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Higher score first; ties prefer more touches, then the zone nearest to
/// price, then the lower band.
fn rank_order(a: &Zone, b: &Zone, price: f64) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(b.touches.cmp(&a.touches))
        .then(a.distance_to(price).total_cmp(&b.distance_to(price)))
        .then(a.low.total_cmp(&b.low))
}
