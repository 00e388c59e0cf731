// Library crate - market structure & behavior inference engine

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod preprocess;
pub mod report;
pub mod source;
pub mod structure;
pub mod timeline;
pub mod types;

// Re-export commonly used types
pub use config::{AnalysisParams, ParamOverrides};
pub use engine::{analyze, AnalysisService};
pub use error::{AnalysisError, BarSourceError, StoreError};
pub use report::AnalysisReport;
pub use timeline::{InMemoryTimelineStore, TimelineState, TimelineStore};
pub use types::*;
