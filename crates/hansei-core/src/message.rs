//! Conversion rules from issue shapes to editor-facing messages and severities

use crate::issue::{Flow, IssueSeverity};

pub const ITEM_LOCATION: &str = "location";
pub const ITEM_FLOW: &str = "flow";

/// Severity buckets understood by editor severity filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplaySeverity {
    Warning,
    Information,
    Hint,
}

impl IssueSeverity {
    pub fn display_severity(&self) -> DisplaySeverity {
        match self {
            IssueSeverity::Blocker | IssueSeverity::Critical | IssueSeverity::Major => {
                DisplaySeverity::Warning
            }
            IssueSeverity::Minor => DisplaySeverity::Information,
            IssueSeverity::Info | IssueSeverity::Unknown(_) => DisplaySeverity::Hint,
        }
    }
}

pub fn pluralize(count: usize, item: &str) -> String {
    if count == 1 {
        item.to_string()
    } else {
        format!("{item}s")
    }
}

pub fn message_with_pluralized_suffix(message: &str, count: usize, item: &str) -> String {
    if count == 0 {
        return message.to_string();
    }
    format!("{message} ({count} {})", pluralize(count, item))
}

/// Builds the displayed message of an issue from its flows.
///
/// A single flow reports its own location count. Several single-location flows
/// are secondary locations and are counted as locations, anything else is
/// counted as flows.
pub fn flow_message(message: &str, flows: &[Flow]) -> String {
    match flows {
        [] => message.to_string(),
        [flow] => message_with_pluralized_suffix(message, flow.locations.len(), ITEM_LOCATION),
        _ if flows.iter().all(|flow| flow.locations.len() == 1) => {
            message_with_pluralized_suffix(message, flows.len(), ITEM_LOCATION)
        }
        _ => message_with_pluralized_suffix(message, flows.len(), ITEM_FLOW),
    }
}
