pub mod annotation;
pub mod caption;
pub mod extraction;
pub mod model;
pub mod ocr;
pub mod orchestrator; // Stage sequencing + report assembly
pub mod source;
pub mod text;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use orchestrator::{AnalysisOutcome, AnalysisPipeline, AnalysisRequest, PipelineError};
pub use source::{DocumentHandle, DocumentSource};
pub use types::*;
