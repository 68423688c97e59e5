//! Integration tests across the issue model, message rules, taint store and
//! configuration.

use std::fs;

use hansei_core::config::{find_config_file, load_config_with_warnings};
use hansei_core::message::message_with_pluralized_suffix;
use hansei_core::{
    DisplaySeverity, Flow, InMemoryTaintStore, Issue, IssueLocation, IssueSeverity, TaintIssue,
    TaintStore, TextRange, VersionedDocument, VersionedIssue, flow_message,
};
use insta::assert_json_snapshot;
use url::Url;

fn uri(path: &str) -> Url {
    Url::parse(&format!("file:///work/shop/{path}")).unwrap()
}

#[test]
fn server_payload_flows_into_taint_store_and_messages() {
    let payload = r#"[
        {
            "key": "AX-1",
            "ruleKey": "javasecurity:S3649",
            "message": "Change this code to not construct SQL queries from user data",
            "severity": "blocker",
            "range": {"startLine": 42, "startColumn": 8, "endLine": 42, "endColumn": 60},
            "flows": [
                {"locations": [
                    {"range": {"startLine": 12, "startColumn": 4, "endLine": 12, "endColumn": 20}, "message": "source"},
                    {"range": {"startLine": 30, "startColumn": 4, "endLine": 30, "endColumn": 20}, "message": "propagation"},
                    {"message": "sink"}
                ]}
            ]
        },
        {
            "key": "AX-2",
            "ruleKey": "javasecurity:S5146",
            "message": "Open redirect",
            "severity": "MAJOR",
            "range": {"startLine": 7, "startColumn": 0, "endLine": 7, "endColumn": 10},
            "resolved": true
        }
    ]"#;
    let issues: Vec<TaintIssue> = serde_json::from_str(payload).unwrap();
    let store = InMemoryTaintStore::new();
    let file = uri("src/Db.java");

    store.reload(&file, issues);

    let kept = store.get(&file);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].severity, IssueSeverity::Blocker);
    assert_eq!(kept[0].severity.display_severity(), DisplaySeverity::Warning);
    assert_eq!(
        flow_message(&kept[0].message, &kept[0].flows),
        "Change this code to not construct SQL queries from user data (3 locations)"
    );
    assert!(kept[0].flows[0].locations[2].range.is_none());
}

#[test]
fn secondary_locations_and_multiple_flows_are_counted_differently() {
    let secondary = |line| Flow::new(vec![IssueLocation::new(TextRange::line(line), "also here")]);
    let path = |lines: Vec<u32>| {
        Flow::new(
            lines
                .into_iter()
                .map(|line| IssueLocation::new(TextRange::line(line), "step"))
                .collect(),
        )
    };

    let duplicated = Issue::new("java:S1192", IssueSeverity::Critical, "Define a constant", TextRange::line(1))
        .with_flow(secondary(4))
        .with_flow(secondary(9));
    let branching = Issue::new("java:S2259", IssueSeverity::Major, "Null dereference", TextRange::line(2))
        .with_flow(path(vec![1, 2]))
        .with_flow(path(vec![5, 6, 2]));

    assert_eq!(
        flow_message(&duplicated.message, &duplicated.flows),
        "Define a constant (2 locations)"
    );
    assert_eq!(
        flow_message(&branching.message, &branching.flows),
        "Null dereference (2 flows)"
    );
    assert_eq!(message_with_pluralized_suffix("One", 1, "flow"), "One (1 flow)");
}

#[test]
fn secret_issue_is_detected_by_repository() {
    let secret = Issue::new("secrets:S6290", IssueSeverity::Blocker, "AWS key", TextRange::line(1));
    let lookalike = Issue::new("python:secrets", IssueSeverity::Blocker, "m", TextRange::line(1));

    assert!(secret.is_secret());
    assert!(!lookalike.is_secret());
}

#[test]
fn versioned_issue_serializes_for_editor_commands() {
    let issue = Issue::new(
        "secrets:S6290",
        IssueSeverity::Blocker,
        "Make sure this AWS Secret Access Key gets revoked",
        TextRange::new(3, 14, 3, 54),
    );

    assert_json_snapshot!(VersionedIssue::new(issue, 7), @r#"
    {
      "issue": {
        "ruleKey": "secrets:S6290",
        "message": "Make sure this AWS Secret Access Key gets revoked",
        "severity": "BLOCKER",
        "range": {
          "startLine": 3,
          "startColumn": 14,
          "endLine": 3,
          "endColumn": 54
        },
        "flows": []
      },
      "documentVersion": 7
    }
    "#);
}

#[test]
fn config_binding_resolves_document_paths_and_issue_links() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("shop");
    let nested = root.join("src").join("db");
    fs::create_dir_all(&nested).unwrap();
    fs::write(
        root.join("hansei.toml"),
        r#"
[analyzer]
command = ["hansei-analyzer", "--stdin"]

[server]
url = "https://sonar.example.com/"
project_key = "shop"
branch = "release"
colour = "blue"

[notifications]
first_secret_detected = true
"#,
    )
    .unwrap();

    let config_path = find_config_file(&nested).unwrap();
    let loaded = load_config_with_warnings(&config_path).unwrap();
    let binding = loaded.config.server.as_ref().unwrap().binding().unwrap();

    assert_eq!(loaded.warnings, vec!["Unknown config option in [server]: 'colour'"]);
    assert!(loaded.config.notifications.first_secret_detected);
    assert_eq!(loaded.config.analyzer.command, vec!["hansei-analyzer", "--stdin"]);

    let file = Url::from_file_path(nested.join("Repo.java")).unwrap();
    let document = VersionedDocument::new(file, 3, "class Repo {}").with_workspace_root(Some(&root));
    assert_eq!(document.relative_path, "src/db/Repo.java");

    let link = binding.issue_url("AX-9").unwrap();
    assert_eq!(
        link.as_str(),
        "https://sonar.example.com/project/issues?id=shop&issues=AX-9&open=AX-9&branch=release"
    );
}
