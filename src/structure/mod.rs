//! Structure & behavior inference pipeline stages

pub mod behavior;
pub mod breakout;
pub mod features;
pub mod playbook;
pub mod regime;
pub mod swings;
pub mod zones;

pub use behavior::{Behavior, BehaviorAssessment, BehaviorProbabilities, BehaviorScorer, EvidenceItem, Signal};
pub use breakout::{BreakoutBook, BreakoutConfig, BreakoutSignal, BreakoutState, BreakoutStatus, Direction, SignalType};
pub use features::{FeatureExtractor, FeatureSet};
pub use playbook::{PlaybookGenerator, PlaybookPlan, RiskTag};
pub use regime::{classify_regime, Regime, RegimeResult};
pub use swings::{detect_swings, SwingDetector, SwingKind, SwingPoint};
pub use zones::{ClusterStrategy, Zone, ZoneBuilder, ZoneKind, ZoneSet};
