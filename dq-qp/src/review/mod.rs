//! Review queue and approval workflow
//!
//! Audit runs, `explanation_audit` items and polish proposals enqueue
//! revisions; a reviewer commits exactly one of them or rejects the
//! candidate. Decisions are final.

pub mod workflow;

pub use workflow::{ReviewWorkflow, Selection};
