//! Per-file issue lifecycle between analysis passes and diagnostics publication
//!
//! Each file has a committed set (last completed pass) and an in-progress set
//! (pass currently running). Reads prefer the in-progress set and never mix the
//! two. A pass that succeeds replaces the committed set, a pass that fails is
//! dropped. Taint issues are refreshed from the server in the background, at
//! most one refresh per file at a time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hansei_core::{BindingContext, Issue, TaintIssue, TaintStore, VersionedDocument, VersionedIssue};
use parking_lot::Mutex;
use tokio::sync::watch;
use tower_lsp::lsp_types::{Diagnostic, Url};
use tracing::{debug, info, trace, warn};

use crate::publisher::{DiagnosticPublisher, SOURCE, TAINT_SOURCE};
use crate::remote::{IssueListener, ServerIssueFetcher, ServerIssueTracker, TrackedIssue};

/// Opaque reference from a diagnostic back to the issue it was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueId(u64);

impl IssueId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IssueId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(IssueId)
    }
}

pub type IssueSet = HashMap<IssueId, Arc<VersionedIssue>>;

#[derive(Clone)]
struct RefreshTask {
    generation: u64,
    done: watch::Receiver<bool>,
}

impl RefreshTask {
    fn is_done(&self) -> bool {
        *self.done.borrow() || self.done.has_changed().is_err()
    }

    async fn wait(mut self) {
        // Err means the task went away without signalling, which also ends the wait.
        let _ = self.done.wait_for(|done| *done).await;
    }
}

pub struct IssuesCache {
    publisher: DiagnosticPublisher,
    taint_store: Arc<dyn TaintStore>,
    fetcher: Arc<dyn ServerIssueFetcher>,
    committed: DashMap<Url, IssueSet>,
    in_progress: DashMap<Url, IssueSet>,
    update_tasks: DashMap<Url, RefreshTask>,
    publication_locks: DashMap<Url, Arc<Mutex<()>>>,
    next_issue_id: AtomicU64,
    next_refresh: AtomicU64,
}

impl IssuesCache {
    pub fn new(
        publisher: DiagnosticPublisher,
        taint_store: Arc<dyn TaintStore>,
        fetcher: Arc<dyn ServerIssueFetcher>,
    ) -> Self {
        Self {
            publisher,
            taint_store,
            fetcher,
            committed: DashMap::new(),
            in_progress: DashMap::new(),
            update_tasks: DashMap::new(),
            publication_locks: DashMap::new(),
            next_issue_id: AtomicU64::new(1),
            next_refresh: AtomicU64::new(1),
        }
    }

    pub fn publisher(&self) -> &DiagnosticPublisher {
        &self.publisher
    }

    /// Forgets everything about `uri`, taint issues included, and publishes an
    /// empty list for it. A refresh still running for `uri` is dropped when it
    /// finishes.
    pub fn clear(&self, uri: &Url) {
        let lock = self.publication_lock(uri);
        let _guard = lock.lock();

        self.update_tasks.remove(uri);
        self.committed.remove(uri);
        self.in_progress.remove(uri);
        self.taint_store.remove(uri);
        self.publisher.publish_diagnostics(uri, &IssueSet::new(), &[]);

        debug!(uri = %uri, "issues cleared");
    }

    /// Starts a new pass. Issues of the last completed pass stay visible.
    pub fn analysis_started(&self, document: &VersionedDocument) {
        trace!(uri = %document.uri, version = document.version, "analysis started");
        self.in_progress.remove(&document.uri);
    }

    pub fn report_issue(&self, document: &VersionedDocument, issue: Issue) -> IssueId {
        let id = self.next_id();
        self.in_progress
            .entry(document.uri.clone())
            .or_default()
            .insert(id, Arc::new(VersionedIssue::new(issue, document.version)));

        self.republish(&document.uri);
        id
    }

    /// Like [`report_issue`](Self::report_issue), for files bound to a server
    /// project: every in-progress issue of the file is tracked again and takes
    /// the server key and resolution of its match before publishing.
    pub fn report_issue_connected(
        &self,
        document: &VersionedDocument,
        issue: Issue,
        tracker: &dyn ServerIssueTracker,
    ) -> IssueId {
        let id = self.next_id();
        let (ids, issues_to_track): (Vec<IssueId>, Vec<Issue>) = {
            let mut issues = self.in_progress.entry(document.uri.clone()).or_default();
            issues.insert(id, Arc::new(VersionedIssue::new(issue, document.version)));

            let mut tracked: Vec<_> = issues.iter().map(|(id, v)| (*id, v.issue.clone())).collect();
            tracked.sort_by_key(|(id, _)| *id);
            tracked.into_iter().unzip()
        };

        let listener = TrackingListener::new(&document.uri);
        tracker.match_and_track(&document.relative_path, &issues_to_track, &listener);
        listener.log_summary();
        self.apply_tracking(&document.uri, &ids, listener.into_results());

        self.republish(&document.uri);
        id
    }

    /// Drops the in-progress set. The committed set stays authoritative.
    pub fn analysis_failed(&self, document: &VersionedDocument) {
        debug!(uri = %document.uri, version = document.version, "analysis failed, keeping previous issues");
        self.in_progress.remove(&document.uri);
    }

    /// Waits for a pending server issues update of the file, then commits the
    /// in-progress set and publishes.
    pub async fn analysis_succeeded(&self, document: &VersionedDocument) {
        let uri = &document.uri;
        let pending = self.update_tasks.get(uri).map(|task| task.clone());
        if let Some(task) = pending {
            if !task.is_done() {
                debug!(uri = %uri, "waiting for server issues update");
                task.wait().await;
            }
        }

        self.commit(uri);
    }

    pub fn count(&self, uri: &Url) -> usize {
        self.with_current(uri, |issues| issues.len())
    }

    pub fn issue(&self, uri: &Url, id: IssueId) -> Option<Arc<VersionedIssue>> {
        self.with_current(uri, |issues| issues.get(&id).cloned())
    }

    /// Resolves a diagnostic published for a local issue back to that issue.
    pub fn issue_for_diagnostic(&self, uri: &Url, diagnostic: &Diagnostic) -> Option<Arc<VersionedIssue>> {
        if diagnostic.source.as_deref() != Some(SOURCE) {
            return None;
        }
        let id: IssueId = diagnostic.data.as_ref()?.as_str()?.parse().ok()?;
        self.issue(uri, id)
    }

    /// Resolves a diagnostic published for a taint issue back to that issue.
    pub fn taint_issue_for_diagnostic(&self, uri: &Url, diagnostic: &Diagnostic) -> Option<TaintIssue> {
        if diagnostic.source.as_deref() != Some(TAINT_SOURCE) {
            return None;
        }
        let key = diagnostic.data.as_ref()?.as_str()?;
        self.taint_store
            .get(uri)
            .into_iter()
            .find(|issue| issue.key == key)
    }

    pub fn is_updating_server_issues(&self, uri: &Url) -> bool {
        self.update_tasks
            .get(uri)
            .is_some_and(|task| !task.is_done())
    }

    /// Starts one taint refresh per file, skipping files whose previous refresh
    /// is still running.
    pub fn schedule_update_of_server_issues(
        self: &Arc<Self>,
        documents: &[VersionedDocument],
        binding: &BindingContext,
    ) {
        for document in documents {
            let entry = match self.update_tasks.entry(document.uri.clone()) {
                Entry::Occupied(running) if !running.get().is_done() => {
                    trace!(uri = %document.uri, "server issues update already running");
                    continue;
                }
                entry => entry,
            };

            let generation = self.next_refresh.fetch_add(1, Ordering::Relaxed);
            let (done_tx, done_rx) = watch::channel(false);
            entry.insert(RefreshTask {
                generation,
                done: done_rx,
            });

            let cache = Arc::clone(self);
            let binding = binding.clone();
            let uri = document.uri.clone();
            let relative_path = document.relative_path.clone();

            tokio::spawn(async move {
                cache
                    .update_server_issues(&uri, &relative_path, &binding, generation)
                    .await;
                let _ = done_tx.send(true);
            });
        }
    }

    async fn update_server_issues(
        &self,
        uri: &Url,
        relative_path: &str,
        binding: &BindingContext,
        generation: u64,
    ) {
        let issues = match self.fetcher.fetch_taint_issues(binding, relative_path).await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(uri = %uri, error = %e, "failed to update server issues");
                return;
            }
        };

        self.apply_refresh(uri, issues, generation);
    }

    /// Reloads the taint store and republishes, unless the file was cleared
    /// since `generation` started. Runs under the publication lock so a
    /// concurrent `clear` lands either before the check or after the publish.
    fn apply_refresh(&self, uri: &Url, issues: Vec<TaintIssue>, generation: u64) {
        let lock = self.publication_lock(uri);
        let _guard = lock.lock();

        let live = self
            .update_tasks
            .get(uri)
            .is_some_and(|task| task.generation == generation);
        if !live {
            debug!(uri = %uri, "file cleared during server issues update, dropping result");
            return;
        }

        self.taint_store.reload(uri, issues);
        let taint = self.taint_store.get(uri);
        if !taint.is_empty() {
            info!(
                "Fetched {} taint {} for {}",
                taint.len(),
                if taint.len() == 1 { "vulnerability" } else { "vulnerabilities" },
                uri
            );
        }

        let issues = self.with_current(uri, |issues| issues.clone());
        self.publisher.publish_diagnostics(uri, &issues, &taint);
    }

    /// Copies tracking results onto the in-progress issues they were computed
    /// for. Issues dropped meanwhile by a new pass are skipped.
    fn apply_tracking(&self, uri: &Url, ids: &[IssueId], results: Vec<TrackedIssue>) {
        let Some(mut issues) = self.in_progress.get_mut(uri) else {
            return;
        };
        for tracked in results {
            let Some(id) = ids.get(tracked.index) else {
                continue;
            };
            let Some(current) = issues.get_mut(id) else {
                continue;
            };
            if current.server_key != tracked.server_key || current.resolved != tracked.resolved {
                let updated = current
                    .as_ref()
                    .clone()
                    .with_server_status(tracked.server_key, tracked.resolved);
                *current = Arc::new(updated);
            }
        }
    }

    fn commit(&self, uri: &Url) {
        let lock = self.publication_lock(uri);
        let _guard = lock.lock();

        // Insert before removing so readers never observe an empty window.
        let finished = self.in_progress.get(uri).map(|issues| issues.clone());
        match finished {
            Some(issues) => {
                self.committed.insert(uri.clone(), issues);
                self.in_progress.remove(uri);
            }
            None => {
                self.committed.remove(uri);
            }
        }

        debug!(uri = %uri, count = self.count(uri), "analysis committed");
        self.publish_current(uri);
    }

    fn republish(&self, uri: &Url) {
        let lock = self.publication_lock(uri);
        let _guard = lock.lock();
        self.publish_current(uri);
    }

    fn publish_current(&self, uri: &Url) {
        let issues = self.with_current(uri, |issues| issues.clone());
        let taint = self.taint_store.get(uri);
        self.publisher.publish_diagnostics(uri, &issues, &taint);
    }

    fn with_current<R>(&self, uri: &Url, f: impl FnOnce(&IssueSet) -> R) -> R {
        if let Some(issues) = self.in_progress.get(uri) {
            return f(&issues);
        }
        match self.committed.get(uri) {
            Some(issues) => f(&issues),
            None => f(&IssueSet::new()),
        }
    }

    /// Entries live as long as the cache so every caller for `uri` shares one lock.
    fn publication_lock(&self, uri: &Url) -> Arc<Mutex<()>> {
        self.publication_locks
            .entry(uri.clone())
            .or_default()
            .clone()
    }

    fn next_id(&self) -> IssueId {
        IssueId::new(self.next_issue_id.fetch_add(1, Ordering::Relaxed))
    }
}

struct TrackingListener<'a> {
    uri: &'a Url,
    results: RefCell<Vec<TrackedIssue>>,
}

impl<'a> TrackingListener<'a> {
    fn new(uri: &'a Url) -> Self {
        Self {
            uri,
            results: RefCell::new(Vec::new()),
        }
    }

    fn log_summary(&self) {
        let results = self.results.borrow();
        trace!(
            uri = %self.uri,
            total = results.len(),
            matched = results.iter().filter(|t| t.server_key.is_some()).count(),
            resolved = results.iter().filter(|t| t.resolved).count(),
            "issues tracked against server"
        );
    }

    fn into_results(self) -> Vec<TrackedIssue> {
        self.results.into_inner()
    }
}

impl IssueListener for TrackingListener<'_> {
    fn on_tracked(&self, tracked: TrackedIssue) {
        self.results.borrow_mut().push(tracked);
    }
}
