//! Core types for the Hansei diagnostics pipeline
//!
//! Issue records, the rules turning them into editor messages, versioned
//! document snapshots, the taint vulnerability store and configuration.

pub mod binding;
pub mod config;
pub mod document;
pub mod issue;
pub mod message;
pub mod taint;

pub use binding::BindingContext;
pub use document::VersionedDocument;
pub use issue::{Flow, Issue, IssueLocation, IssueSeverity, TaintIssue, TextRange, VersionedIssue};
pub use message::{DisplaySeverity, flow_message};
pub use taint::{InMemoryTaintStore, TaintStore};
