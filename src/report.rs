//! Analysis report: the aggregate output of one call

use serde::{Deserialize, Serialize};

use crate::structure::{BehaviorAssessment, BreakoutSignal, BreakoutStatus, PlaybookPlan, Regime, ZoneSet};
use crate::timeline::TimelineEvent;
use crate::types::Subject;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub regime: Regime,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataQuality {
    /// A time discontinuity was found in the input
    pub data_gaps: bool,
    /// Some indicator did not have enough bars; its sub-result is empty
    pub insufficient_history: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub subject: Subject,
    /// Timestamp of the last bar analysed
    pub as_of: DateTime<Utc>,
    pub market_state: MarketState,
    pub zones: ZoneSet,
    pub zone_signature: String,
    /// Most recent breakout transitions, oldest first
    pub signals: Vec<BreakoutSignal>,
    /// Final state of every tracked boundary
    pub breakouts: Vec<BreakoutStatus>,
    pub behavior: BehaviorAssessment,
    /// Events since the previous call for this subject
    pub timeline: Vec<TimelineEvent>,
    /// Plan A (continuation) then Plan B (reversal)
    pub playbook: Vec<PlaybookPlan>,
    pub data_quality: DataQuality,
}

impl AnalysisReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
