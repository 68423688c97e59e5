//! Issue records reported by the analysis engine and fetched from the server
//!
//! Lines are 1-based and columns 0-based, as produced by the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rule repository of the secrets detection analyzer.
pub const SECRETS_REPOSITORY: &str = "secrets";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRange {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl TextRange {
    pub fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    pub fn line(line: u32) -> Self {
        Self::new(line, 0, line, 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLocation {
    #[serde(default)]
    pub range: Option<TextRange>,
    #[serde(default)]
    pub message: Option<String>,
}

impl IssueLocation {
    pub fn new(range: TextRange, message: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default)]
    pub locations: Vec<IssueLocation>,
}

impl Flow {
    pub fn new(locations: Vec<IssueLocation>) -> Self {
        Self { locations }
    }
}

/// Severity as reported by the engine or the server.
///
/// Parsing is case-insensitive and never fails: unrecognized values are kept
/// verbatim so they survive a serialization round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IssueSeverity {
    Blocker,
    Critical,
    Major,
    Minor,
    Info,
    Unknown(String),
}

impl IssueSeverity {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "BLOCKER" => IssueSeverity::Blocker,
            "CRITICAL" => IssueSeverity::Critical,
            "MAJOR" => IssueSeverity::Major,
            "MINOR" => IssueSeverity::Minor,
            "INFO" => IssueSeverity::Info,
            _ => IssueSeverity::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            IssueSeverity::Blocker => "BLOCKER",
            IssueSeverity::Critical => "CRITICAL",
            IssueSeverity::Major => "MAJOR",
            IssueSeverity::Minor => "MINOR",
            IssueSeverity::Info => "INFO",
            IssueSeverity::Unknown(raw) => raw,
        }
    }
}

impl From<String> for IssueSeverity {
    fn from(value: String) -> Self {
        IssueSeverity::parse(&value)
    }
}

impl From<IssueSeverity> for String {
    fn from(value: IssueSeverity) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issue detected by the embedded engine on the current file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub rule_key: String,
    pub message: String,
    pub severity: IssueSeverity,
    pub range: TextRange,
    #[serde(default)]
    pub flows: Vec<Flow>,
}

impl Issue {
    pub fn new(
        rule_key: impl Into<String>,
        severity: IssueSeverity,
        message: impl Into<String>,
        range: TextRange,
    ) -> Self {
        Self {
            rule_key: rule_key.into(),
            message: message.into(),
            severity,
            range,
            flows: Vec::new(),
        }
    }

    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flows.push(flow);
        self
    }

    /// Repository part of the rule key (`secrets` in `secrets:S6290`).
    pub fn repository(&self) -> &str {
        rule_repository(&self.rule_key)
    }

    pub fn is_secret(&self) -> bool {
        self.repository() == SECRETS_REPOSITORY
    }
}

/// A vulnerability computed by the server's taint analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaintIssue {
    /// Server-assigned key, stable across analyses.
    pub key: String,
    pub rule_key: String,
    pub message: String,
    pub severity: IssueSeverity,
    pub range: TextRange,
    #[serde(default)]
    pub flows: Vec<Flow>,
    #[serde(default)]
    pub resolved: bool,
}

impl TaintIssue {
    pub fn new(
        key: impl Into<String>,
        rule_key: impl Into<String>,
        severity: IssueSeverity,
        message: impl Into<String>,
        range: TextRange,
    ) -> Self {
        Self {
            key: key.into(),
            rule_key: rule_key.into(),
            message: message.into(),
            severity,
            range,
            flows: Vec::new(),
            resolved: false,
        }
    }

    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flows.push(flow);
        self
    }
}

/// A local issue pinned to the document version it was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedIssue {
    pub issue: Issue,
    pub document_version: i32,
    /// Key of the matching server issue, once tracked against a bound project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_key: Option<String>,
    /// Marked resolved on the server. Such issues are not published.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub resolved: bool,
}

impl VersionedIssue {
    pub fn new(issue: Issue, document_version: i32) -> Self {
        Self {
            issue,
            document_version,
            server_key: None,
            resolved: false,
        }
    }

    pub fn with_server_status(mut self, server_key: Option<String>, resolved: bool) -> Self {
        self.server_key = server_key;
        self.resolved = resolved;
        self
    }
}

fn rule_repository(rule_key: &str) -> &str {
    rule_key
        .split_once(':')
        .map(|(repository, _)| repository)
        .unwrap_or(rule_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parse_is_case_insensitive() {
        assert_eq!(IssueSeverity::parse("blocker"), IssueSeverity::Blocker);
        assert_eq!(IssueSeverity::parse("Major"), IssueSeverity::Major);
        assert_eq!(IssueSeverity::parse("INFO"), IssueSeverity::Info);
    }

    #[test]
    fn unknown_severity_keeps_raw_value() {
        let severity = IssueSeverity::parse("Trivial");
        assert_eq!(severity, IssueSeverity::Unknown("Trivial".to_string()));
        assert_eq!(severity.as_str(), "Trivial");
    }

    #[test]
    fn severity_deserializes_from_plain_string() {
        let severity: IssueSeverity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(severity, IssueSeverity::Critical);
        assert_eq!(serde_json::to_string(&severity).unwrap(), "\"CRITICAL\"");
    }

    #[test]
    fn secrets_repository_is_detected() {
        let secret = Issue::new(
            "secrets:S6290",
            IssueSeverity::Blocker,
            "AWS key",
            TextRange::line(1),
        );
        let other = Issue::new(
            "javascript:S1481",
            IssueSeverity::Minor,
            "Unused",
            TextRange::line(1),
        );

        assert!(secret.is_secret());
        assert!(!other.is_secret());
    }

    #[test]
    fn rule_key_without_repository_is_its_own_repository() {
        let issue = Issue::new("S100", IssueSeverity::Info, "msg", TextRange::line(1));
        assert_eq!(issue.repository(), "S100");
        assert!(!issue.is_secret());
    }

    #[test]
    fn issue_deserializes_from_engine_json() {
        let json = r#"{
            "ruleKey": "python:S1192",
            "message": "Define a constant",
            "severity": "CRITICAL",
            "range": {"startLine": 3, "startColumn": 4, "endLine": 3, "endColumn": 12},
            "flows": [{"locations": [{"range": {"startLine": 7, "startColumn": 0, "endLine": 7, "endColumn": 3}}]}]
        }"#;

        let issue: Issue = serde_json::from_str(json).unwrap();

        assert_eq!(issue.rule_key, "python:S1192");
        assert_eq!(issue.severity, IssueSeverity::Critical);
        assert_eq!(issue.range.start_line, 3);
        assert_eq!(issue.flows.len(), 1);
        assert_eq!(issue.flows[0].locations[0].message, None);
    }

    #[test]
    fn server_status_is_serialized_only_once_tracked() {
        let issue = Issue::new("py:S100", IssueSeverity::Major, "m", TextRange::line(1));
        let local = serde_json::to_value(VersionedIssue::new(issue.clone(), 2)).unwrap();
        let tracked = serde_json::to_value(
            VersionedIssue::new(issue, 2).with_server_status(Some("AX-3".to_string()), true),
        )
        .unwrap();

        assert!(local.get("serverKey").is_none());
        assert!(local.get("resolved").is_none());
        assert_eq!(tracked["serverKey"], "AX-3");
        assert_eq!(tracked["resolved"], true);
    }
}
