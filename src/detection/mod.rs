//! Element detection: tree flattening, target extraction, the staged search
//! and its result types.

pub mod engine;
pub mod result;
pub mod target;
pub mod traversal;

pub use engine::{DetectionEngine, FindRequest, RaceOutcome};
pub use result::{
    DiagnosticEvent, FuzzyCandidate, MatchDiagnostics, MatchResult, MatchedElement, SearchStage,
    StageReport,
};
pub use target::{extract, Extraction, ExtractionMethod, TargetExtractor};
pub use traversal::{
    flatten_application, read_attribute, Traversal, TraversalLimits, TraversalStats,
};
