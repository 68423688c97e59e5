//! Per-file store of taint vulnerabilities fetched from the server

use dashmap::DashMap;
use url::Url;

use crate::issue::TaintIssue;

pub trait TaintStore: Send + Sync {
    /// Vulnerabilities of `uri` in server order. Empty when never fetched.
    fn get(&self, uri: &Url) -> Vec<TaintIssue>;

    /// Replaces everything known for `uri`. Resolved issues are dropped.
    fn reload(&self, uri: &Url, issues: Vec<TaintIssue>);

    fn remove(&self, uri: &Url);
}

#[derive(Debug, Default)]
pub struct InMemoryTaintStore {
    issues: DashMap<Url, Vec<TaintIssue>>,
}

impl InMemoryTaintStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaintStore for InMemoryTaintStore {
    fn get(&self, uri: &Url) -> Vec<TaintIssue> {
        self.issues
            .get(uri)
            .map(|issues| issues.clone())
            .unwrap_or_default()
    }

    fn reload(&self, uri: &Url, issues: Vec<TaintIssue>) {
        let open: Vec<TaintIssue> = issues.into_iter().filter(|i| !i.resolved).collect();
        if open.is_empty() {
            self.issues.remove(uri);
        } else {
            self.issues.insert(uri.clone(), open);
        }
    }

    fn remove(&self, uri: &Url) {
        self.issues.remove(uri);
    }
}
