//! Conversion of local and taint issues into one ordered diagnostics list

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hansei_core::{DisplaySeverity, Flow, TaintIssue, TextRange, flow_message};
use serde_json::Value;
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticRelatedInformation, DiagnosticSeverity, Location, NumberOrString,
    Position, Range, Url,
};
use tracing::info;

use crate::client::EditorClient;
use crate::issues_cache::{IssueId, IssueSet};

pub const SOURCE: &str = "hansei";
pub const TAINT_SOURCE: &str = "hansei taint";

pub struct DiagnosticPublisher {
    client: Arc<dyn EditorClient>,
    first_secret_detected: AtomicBool,
}

impl DiagnosticPublisher {
    pub fn new(client: Arc<dyn EditorClient>) -> Self {
        Self {
            client,
            first_secret_detected: AtomicBool::new(false),
        }
    }

    /// Seeds the latch from persisted state. A latch already set stays set.
    pub fn initialize(&self, first_secret_detected: bool) {
        if first_secret_detected {
            self.first_secret_detected.store(true, Ordering::Release);
        }
    }

    pub fn publish_diagnostics(&self, uri: &Url, local_issues: &IssueSet, taint_issues: &[TaintIssue]) {
        if local_issues.values().any(|v| !v.resolved && v.issue.is_secret())
            && self
                .first_secret_detected
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            info!(uri = %uri, "first secret detected");
            self.client.show_first_secret_detection_notification();
        }

        let diagnostics = build_diagnostics(uri, local_issues, taint_issues);
        self.client.publish_diagnostics(uri.clone(), diagnostics);
    }
}

/// Local issues followed by taint issues, sorted by start line then message.
/// Local issues resolved on the server are left out.
pub fn build_diagnostics(uri: &Url, local_issues: &IssueSet, taint_issues: &[TaintIssue]) -> Vec<Diagnostic> {
    let mut local: Vec<_> = local_issues.iter().filter(|(_, v)| !v.resolved).collect();
    local.sort_by_key(|(id, _)| **id);

    let mut diagnostics: Vec<Diagnostic> = local
        .into_iter()
        .map(|(id, versioned)| convert_local(uri, *id, &versioned.issue))
        .chain(taint_issues.iter().map(|issue| convert_taint(uri, issue)))
        .collect();

    diagnostics.sort_by(|a, b| {
        a.range
            .start
            .line
            .cmp(&b.range.start.line)
            .then_with(|| a.message.cmp(&b.message))
    });

    diagnostics
}

pub fn convert_local(uri: &Url, id: IssueId, issue: &hansei_core::Issue) -> Diagnostic {
    Diagnostic {
        range: convert_range(&issue.range),
        severity: Some(convert_severity(issue.severity.display_severity())),
        code: Some(NumberOrString::String(issue.rule_key.clone())),
        code_description: None,
        source: Some(SOURCE.to_string()),
        message: flow_message(&issue.message, &issue.flows),
        related_information: related_information(uri, &issue.flows),
        tags: None,
        data: Some(Value::String(id.to_string())),
    }
}

pub fn convert_taint(uri: &Url, issue: &TaintIssue) -> Diagnostic {
    Diagnostic {
        range: convert_range(&issue.range),
        severity: Some(convert_severity(issue.severity.display_severity())),
        code: Some(NumberOrString::String(issue.rule_key.clone())),
        code_description: None,
        source: Some(TAINT_SOURCE.to_string()),
        message: flow_message(&issue.message, &issue.flows),
        related_information: related_information(uri, &issue.flows),
        tags: None,
        data: Some(Value::String(issue.key.clone())),
    }
}

fn convert_severity(severity: DisplaySeverity) -> DiagnosticSeverity {
    match severity {
        DisplaySeverity::Warning => DiagnosticSeverity::WARNING,
        DisplaySeverity::Information => DiagnosticSeverity::INFORMATION,
        DisplaySeverity::Hint => DiagnosticSeverity::HINT,
    }
}

pub fn convert_range(range: &TextRange) -> Range {
    Range {
        start: Position {
            line: range.start_line.saturating_sub(1),
            character: range.start_column,
        },
        end: Position {
            line: range.end_line.saturating_sub(1),
            character: range.end_column,
        },
    }
}

fn related_information(uri: &Url, flows: &[Flow]) -> Option<Vec<DiagnosticRelatedInformation>> {
    let related: Vec<DiagnosticRelatedInformation> = flows
        .iter()
        .flat_map(|flow| flow.locations.iter())
        .filter_map(|location| {
            let range = location.range.as_ref()?;
            Some(DiagnosticRelatedInformation {
                location: Location {
                    uri: uri.clone(),
                    range: convert_range(range),
                },
                message: location.message.clone().unwrap_or_default(),
            })
        })
        .collect();

    if related.is_empty() { None } else { Some(related) }
}
