//! Server-side issues: taint vulnerability fetching and local issue tracking

use dashmap::DashMap;
use hansei_core::{BindingContext, Issue, TaintIssue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

const TAINT_ENDPOINT: &str = "api/issues/taint";
const ISSUES_ENDPOINT: &str = "api/issues/tracking";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid endpoint on '{base}': {message}")]
    InvalidUrl { base: String, message: String },
    #[error("Request to '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Server returned {status} for '{url}'")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// An issue as stored on the server, used to keep local issue identity stable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerIssue {
    pub key: String,
    pub rule_key: String,
    pub message: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub resolved: bool,
}

#[tower_lsp::async_trait]
pub trait ServerIssueFetcher: Send + Sync {
    async fn fetch_taint_issues(
        &self,
        binding: &BindingContext,
        relative_path: &str,
    ) -> Result<Vec<TaintIssue>, FetchError>;

    async fn fetch_issues(
        &self,
        binding: &BindingContext,
        relative_path: &str,
    ) -> Result<Vec<ServerIssue>, FetchError>;
}

#[derive(Deserialize)]
struct IssuesPage<T> {
    issues: Vec<T>,
}

#[derive(Debug, Clone, Default)]
pub struct HttpIssueFetcher {
    http: reqwest::Client,
}

impl HttpIssueFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_issues<T: DeserializeOwned>(
        &self,
        binding: &BindingContext,
        endpoint: &str,
        relative_path: &str,
    ) -> Result<Vec<T>, FetchError> {
        let mut url = binding
            .server_url
            .join(endpoint)
            .map_err(|e| FetchError::InvalidUrl {
                base: binding.server_url.to_string(),
                message: e.to_string(),
            })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("project", &binding.project_key)
                .append_pair("path", relative_path);
            if let Some(branch) = &binding.branch {
                query.append_pair("branch", branch);
            }
        }

        let mut request = self.http.get(url.clone());
        if let Some(token) = &binding.token {
            request = request.bearer_auth(token);
        }

        debug!(url = %url, "fetching server issues");
        let response = request.send().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let page: IssuesPage<T> = response.json().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

        Ok(page.issues)
    }
}

#[tower_lsp::async_trait]
impl ServerIssueFetcher for HttpIssueFetcher {
    async fn fetch_taint_issues(
        &self,
        binding: &BindingContext,
        relative_path: &str,
    ) -> Result<Vec<TaintIssue>, FetchError> {
        self.get_issues(binding, TAINT_ENDPOINT, relative_path).await
    }

    async fn fetch_issues(
        &self,
        binding: &BindingContext,
        relative_path: &str,
    ) -> Result<Vec<ServerIssue>, FetchError> {
        self.get_issues(binding, ISSUES_ENDPOINT, relative_path).await
    }
}

/// Outcome of matching one local issue against the server history.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedIssue {
    /// Position of the issue in the slice given to the tracker.
    pub index: usize,
    pub issue: Issue,
    pub server_key: Option<String>,
    pub resolved: bool,
}

pub trait IssueListener {
    fn on_tracked(&self, tracked: TrackedIssue);
}

pub trait ServerIssueTracker: Send + Sync {
    /// Matches every issue in `issues` and reports each one to `listener`.
    fn match_and_track(&self, relative_path: &str, issues: &[Issue], listener: &dyn IssueListener);
}

/// Tracks local issues against the last known server issues of each file.
///
/// Matching is done on rule key, start line and message first, then on rule
/// key and message so an issue keeps its server key after the code above it
/// moved. A server issue matches at most one local issue.
#[derive(Debug, Default)]
pub struct HistoryIssueTracker {
    known: DashMap<String, Vec<ServerIssue>>,
}

impl HistoryIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, relative_path: &str, issues: Vec<ServerIssue>) {
        self.known.insert(relative_path.to_string(), issues);
    }

    pub async fn sync(
        &self,
        fetcher: &dyn ServerIssueFetcher,
        binding: &BindingContext,
        relative_path: &str,
    ) -> Result<usize, FetchError> {
        let issues = fetcher.fetch_issues(binding, relative_path).await?;
        let count = issues.len();
        self.update(relative_path, issues);
        Ok(count)
    }
}

impl ServerIssueTracker for HistoryIssueTracker {
    fn match_and_track(&self, relative_path: &str, issues: &[Issue], listener: &dyn IssueListener) {
        let known = self
            .known
            .get(relative_path)
            .map(|known| known.clone())
            .unwrap_or_default();

        let mut taken = vec![false; known.len()];
        let mut matches: Vec<Option<usize>> = vec![None; issues.len()];

        let exact = |local: &Issue, server: &ServerIssue| {
            server.rule_key == local.rule_key
                && server.line == Some(local.range.start_line)
                && server.message == local.message
        };
        let moved = |local: &Issue, server: &ServerIssue| {
            server.rule_key == local.rule_key && server.message == local.message
        };

        let matchers: [&dyn Fn(&Issue, &ServerIssue) -> bool; 2] = [&exact, &moved];
        for matcher in matchers {
            for (index, local) in issues.iter().enumerate() {
                if matches[index].is_some() {
                    continue;
                }
                let found = known
                    .iter()
                    .enumerate()
                    .find(|(candidate, server)| !taken[*candidate] && matcher(local, *server))
                    .map(|(candidate, _)| candidate);
                if let Some(candidate) = found {
                    taken[candidate] = true;
                    matches[index] = Some(candidate);
                }
            }
        }

        for (index, (local, matched)) in issues.iter().zip(matches).enumerate() {
            let server = matched.map(|candidate| &known[candidate]);
            listener.on_tracked(TrackedIssue {
                index,
                issue: local.clone(),
                server_key: server.map(|s| s.key.clone()),
                resolved: server.is_some_and(|s| s.resolved),
            });
        }
    }
}
