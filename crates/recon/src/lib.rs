//! `nodepix-recon` - node photo reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded tables and file names, returns the
//! export table with its quality flags. No CLI or file-format dependencies;
//! spreadsheets are reached through the [`sync::SheetTarget`] trait.

pub mod canonical;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod extract;
pub mod merge;
pub mod model;
pub mod quality;
pub mod sync;

pub use config::{ColumnMapping, Field, FieldLayout, FilenameFormat, ProjectConfig, QualityConfig};
pub use engine::run;
pub use error::{ErrorKind, ReconError};
pub use evidence::{build_evidence_table, EvidenceSource};
pub use merge::reconcile;
pub use model::{ExportResult, ReconInput, ReconSummary};
pub use quality::{annotate, FlagReason, QualityFlag};
pub use sync::{synchronize, SheetTarget, SyncOptions, SyncReport};
