//! Per-row VLM annotation of tabular social-media data.

mod annotator;
pub mod damage_annotator;
pub mod flood_annotator;
pub mod impact_annotator;
mod manager;
pub mod parser;
mod types;

pub use annotator::{attachment_line, float_cell, Annotator, Platform, TaskKind};
pub use damage_annotator::DamageAnnotator;
pub use flood_annotator::FloodAnnotator;
pub use impact_annotator::ImpactAnnotator;
pub use manager::{AnnotationManager, PipelineError, RowError, RunState};
pub use types::{
    AnnotationEvent, AnnotationOutput, BatchAnnotationResult, Evidence, EvidenceError,
    NO_EVIDENCE_REASON,
};
