//! Output contract handling
//!
//! Agents must end every response with a JSON footer and include four markdown
//! sections. This module extracts the footer, validates footer and report, and
//! derives the compression summary that later stages receive as handoff context.

pub mod compression;
pub mod extract;
pub mod model;
pub mod validate;

pub use compression::{build_compression_summary, AcceptanceStatus, CompressionFooter};
pub use extract::extract_contract;
pub use model::{contract_schema, ActionItem, Artifact, ArtifactValue, ContractStatus, OutputContract};
pub use validate::{
    format_contract_error_feedback, required_artifact_paths, validate_contract,
    validate_report_structure, validate_task_output,
};
