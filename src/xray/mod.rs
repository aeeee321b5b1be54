//! Xray configuration pipeline
//!
//! - `document`: typed model of the configuration document
//! - `synthesizer`: pure derivation of the document from entity snapshots
//! - `applier`: backup, atomic write and supervised restart with rollback
//! - `reconciler`: the convergence loop tying the pieces together

pub mod applier;
pub mod document;
pub mod reconciler;
pub mod synthesizer;

pub use applier::{ApplyOutcome, ApplyPhase, ProcessControl, SystemctlControl, XrayApplier};
pub use document::XrayDocument;
pub use reconciler::{run_cycle_once, CycleOutcome, Reconciler, ReconcilerHandle};
pub use synthesizer::synthesize;
