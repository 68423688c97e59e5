//! Code actions offered on Hansei diagnostics

use hansei_core::{BindingContext, Flow, TextRange};
use serde_json::{Value, json};
use tower_lsp::lsp_types::{
    CodeAction, CodeActionKind, CodeActionOrCommand, Command, Diagnostic, Url,
};

use crate::issues_cache::IssuesCache;

pub const SHOW_ALL_LOCATIONS_COMMAND: &str = "hansei.showAllLocations";
pub const OPEN_IN_SERVER_COMMAND: &str = "hansei.openIssueInServer";

/// Actions for the diagnostics the editor sent along with the request.
///
/// Diagnostics that no longer resolve to an issue (a newer pass replaced the
/// set, or they come from another server) get no action.
pub fn generate_code_actions(
    uri: &Url,
    diagnostics: &[Diagnostic],
    cache: &IssuesCache,
    binding: Option<&BindingContext>,
) -> Vec<CodeActionOrCommand> {
    let mut actions = Vec::new();

    for diagnostic in diagnostics {
        if let Some(versioned) = cache.issue_for_diagnostic(uri, diagnostic) {
            let issue = &versioned.issue;
            if !issue.flows.is_empty() {
                actions.push(show_all_locations(
                    uri,
                    diagnostic,
                    &issue.rule_key,
                    &issue.message,
                    &issue.range,
                    &issue.flows,
                ));
            }
            if let Some(action) = versioned
                .server_key
                .as_deref()
                .and_then(|key| open_in_server(binding, key, &issue.rule_key, diagnostic))
            {
                actions.push(action);
            }
            continue;
        }

        if let Some(taint) = cache.taint_issue_for_diagnostic(uri, diagnostic) {
            if !taint.flows.is_empty() {
                actions.push(show_all_locations(
                    uri,
                    diagnostic,
                    &taint.rule_key,
                    &taint.message,
                    &taint.range,
                    &taint.flows,
                ));
            }
            if let Some(action) = open_in_server(binding, &taint.key, &taint.rule_key, diagnostic) {
                actions.push(action);
            }
        }
    }

    actions
}

fn open_in_server(
    binding: Option<&BindingContext>,
    server_key: &str,
    rule_key: &str,
    diagnostic: &Diagnostic,
) -> Option<CodeActionOrCommand> {
    let url = binding?.issue_url(server_key)?;
    Some(command_action(
        format!("Open '{}' in server", rule_key),
        diagnostic,
        OPEN_IN_SERVER_COMMAND,
        Value::String(url.to_string()),
    ))
}

fn show_all_locations(
    uri: &Url,
    diagnostic: &Diagnostic,
    rule_key: &str,
    message: &str,
    range: &TextRange,
    flows: &[Flow],
) -> CodeActionOrCommand {
    let argument = json!({
        "uri": uri.as_str(),
        "ruleKey": rule_key,
        "message": message,
        "range": range,
        "flows": flows,
    });

    command_action(
        format!("Show all locations for issue '{}'", rule_key),
        diagnostic,
        SHOW_ALL_LOCATIONS_COMMAND,
        argument,
    )
}

fn command_action(
    title: String,
    diagnostic: &Diagnostic,
    command: &str,
    argument: Value,
) -> CodeActionOrCommand {
    CodeActionOrCommand::CodeAction(CodeAction {
        title: title.clone(),
        kind: Some(CodeActionKind::QUICKFIX),
        diagnostics: Some(vec![diagnostic.clone()]),
        edit: None,
        command: Some(Command {
            title,
            command: command.to_string(),
            arguments: Some(vec![argument]),
        }),
        is_preferred: None,
        disabled: None,
        data: None,
    })
}
