use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hansei_core::config::{ConfigResult, find_config_file, load_config_with_warnings};
use hansei_core::{BindingContext, InMemoryTaintStore, Issue, VersionedDocument};
use parking_lot::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::{
    CodeActionParams, CodeActionResponse, DidChangeConfigurationParams,
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, InitializeParams, InitializeResult, InitializedParams, MessageType,
    Url,
};
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, info, instrument, trace, warn};

use crate::analysis::{AnalysisEngine, AnalysisError, ExternalAnalyzer};
use crate::capabilities::{server_capabilities, server_info};
use crate::client::ForwardingClient;
use crate::code_actions::generate_code_actions;
use crate::debouncer::Debouncer;
use crate::document::DocumentStore;
use crate::issues_cache::IssuesCache;
use crate::publisher::DiagnosticPublisher;
use crate::remote::{HistoryIssueTracker, HttpIssueFetcher, ServerIssueFetcher};

const TOKEN_ENV_VAR: &str = "HANSEI_TOKEN";
const CREDENTIALS_FILE: &str = ".hansei/credentials";

/// Everything an analysis pass needs, cloneable into debounced tasks.
#[derive(Clone)]
struct Pipeline {
    documents: Arc<DocumentStore>,
    issues: Arc<IssuesCache>,
    analyzer: Arc<RwLock<Arc<dyn AnalysisEngine>>>,
    fetcher: Arc<dyn ServerIssueFetcher>,
    tracker: Arc<HistoryIssueTracker>,
    binding: Arc<RwLock<Option<BindingContext>>>,
    workspace_root: Arc<RwLock<Option<PathBuf>>>,
}

impl Pipeline {
    fn new(issues: Arc<IssuesCache>, fetcher: Arc<dyn ServerIssueFetcher>) -> Self {
        let analyzer: Arc<dyn AnalysisEngine> = Arc::new(ExternalAnalyzer::default());
        Self {
            documents: Arc::new(DocumentStore::new()),
            issues,
            analyzer: Arc::new(RwLock::new(analyzer)),
            fetcher,
            tracker: Arc::new(HistoryIssueTracker::new()),
            binding: Arc::new(RwLock::new(None)),
            workspace_root: Arc::new(RwLock::new(None)),
        }
    }

    fn snapshot(&self, uri: &Url) -> Option<VersionedDocument> {
        let root = self.workspace_root.read().clone();
        self.documents.snapshot(uri, root.as_deref())
    }

    /// One pass over the current text of `uri`.
    async fn analyze(&self, uri: &Url) {
        let Some(document) = self.snapshot(uri) else {
            trace!(uri = %uri, "document closed before analysis");
            return;
        };
        let analyzer = self.analyzer.read().clone();
        let binding = self.binding.read().clone();

        self.issues.analysis_started(&document);
        if let Some(binding) = &binding {
            self.issues
                .schedule_update_of_server_issues(std::slice::from_ref(&document), binding);
        }

        let issues = &self.issues;
        let tracker = self.tracker.as_ref();
        let snapshot = &document;
        let bound = binding.is_some();
        let on_issue = move |issue: Issue| {
            if bound {
                issues.report_issue_connected(snapshot, issue, tracker);
            } else {
                issues.report_issue(snapshot, issue);
            }
        };

        match analyzer.analyze(&document, &on_issue).await {
            Ok(()) => self.issues.analysis_succeeded(&document).await,
            Err(AnalysisError::NotConfigured) => {
                trace!(uri = %uri, "no analyzer configured, publishing server issues only");
                self.issues.analysis_succeeded(&document).await;
            }
            Err(e) => {
                warn!(uri = %uri, version = document.version, error = %e, "analysis failed");
                self.issues.analysis_failed(&document);
            }
        }

        if !self.documents.contains(uri) {
            self.issues.clear(uri);
        }
    }

    async fn sync_server_history(&self, uri: &Url) {
        let Some(binding) = self.binding.read().clone() else {
            return;
        };
        let Some(document) = self.snapshot(uri) else {
            return;
        };

        match self
            .tracker
            .sync(self.fetcher.as_ref(), &binding, &document.relative_path)
            .await
        {
            Ok(count) => debug!(uri = %uri, count, "server issue history updated"),
            Err(e) => warn!(uri = %uri, error = %e, "failed to fetch server issue history"),
        }
    }
}

pub struct HanseiLanguageServer {
    client: Client,
    pipeline: Pipeline,
    debouncer: Arc<Debouncer>,
    config_path: Option<PathBuf>,
}

impl HanseiLanguageServer {
    /// Must be called from within a tokio runtime.
    pub fn new(client: Client, config_path: Option<PathBuf>) -> Self {
        let editor = Arc::new(ForwardingClient::spawn(client.clone()));
        let fetcher: Arc<dyn ServerIssueFetcher> = Arc::new(HttpIssueFetcher::new());
        let issues = Arc::new(IssuesCache::new(
            DiagnosticPublisher::new(editor),
            Arc::new(InMemoryTaintStore::new()),
            fetcher.clone(),
        ));

        Self {
            client,
            pipeline: Pipeline::new(issues, fetcher),
            debouncer: Arc::new(Debouncer::new()),
            config_path,
        }
    }

    async fn load_configuration(&self) {
        let explicit = self.config_path.clone();
        let root = self.pipeline.workspace_root.read().clone();

        let loaded = tokio::task::spawn_blocking(move || {
            read_config(explicit.as_deref(), root.as_deref())
        })
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "configuration loader failed");
            ConfigResult::default()
        });

        for warning in &loaded.warnings {
            warn!(warning = %warning, "configuration");
        }
        let config = loaded.config;

        self.pipeline
            .issues
            .publisher()
            .initialize(config.notifications.first_secret_detected);
        self.debouncer
            .set_delay(Duration::from_millis(config.analyzer.debounce_ms));
        let analyzer = ExternalAnalyzer::new(config.analyzer.command);
        if !analyzer.is_configured() {
            info!("no analyzer command configured, only server issues will be shown");
        }
        *self.pipeline.analyzer.write() = Arc::new(analyzer);

        let binding = match config.server.as_ref().map(|server| server.binding()) {
            Some(Ok(binding)) => Some(with_resolved_token(binding).await),
            Some(Err(e)) => {
                warn!(error = %e, "ignoring server binding");
                None
            }
            None => None,
        };
        if let Some(binding) = &binding {
            info!(
                server = %binding.server_url,
                project = %binding.project_key,
                authenticated = binding.token.is_some(),
                "bound to server project"
            );
        }
        *self.pipeline.binding.write() = binding;
    }

    fn schedule_analysis(&self, uri: Url) {
        let pipeline = self.pipeline.clone();
        self.debouncer.schedule(uri.clone(), move || async move {
            pipeline.analyze(&uri).await;
        });
    }

    fn analyze_now(&self, uri: Url) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            pipeline.sync_server_history(&uri).await;
            pipeline.analyze(&uri).await;
        });
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for HanseiLanguageServer {
    #[instrument(skip(self, params), name = "lsp/initialize")]
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        info!("initializing LSP server");

        if let Some(root) = workspace_root(&params) {
            debug!(root = %root.display(), "workspace root");
            *self.pipeline.workspace_root.write() = Some(root);
        }

        Ok(InitializeResult {
            capabilities: server_capabilities(),
            server_info: Some(server_info()),
        })
    }

    #[instrument(skip(self, _params), name = "lsp/initialized")]
    async fn initialized(&self, _params: InitializedParams) {
        info!("LSP server initialized");

        self.load_configuration().await;

        let bound = self.pipeline.binding.read().is_some();
        self.client
            .log_message(
                MessageType::INFO,
                format!(
                    "hansei-lsp initialized ({})",
                    if bound { "bound to server" } else { "standalone" }
                ),
            )
            .await;
    }

    #[instrument(skip(self), name = "lsp/shutdown")]
    async fn shutdown(&self) -> Result<()> {
        info!("shutting down LSP server");
        Ok(())
    }

    #[instrument(skip(self, params), fields(uri = %params.text_document.uri), name = "lsp/textDocument/didOpen")]
    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        debug!(uri = %document.uri, version = document.version, "opening document");
        self.pipeline
            .documents
            .open(document.uri.clone(), document.version, &document.text);
        self.analyze_now(document.uri);
    }

    #[instrument(skip(self, params), fields(uri = %params.text_document.uri), name = "lsp/textDocument/didChange")]
    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        if let Some(change) = params.content_changes.into_iter().last() {
            if self.pipeline.documents.update(&uri, version, &change.text) {
                debug!(uri = %uri, version, "document changed");
                self.schedule_analysis(uri);
            }
        }
    }

    #[instrument(skip(self, params), fields(uri = %params.text_document.uri), name = "lsp/textDocument/didSave")]
    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        self.schedule_analysis(params.text_document.uri);
    }

    #[instrument(skip(self, params), fields(uri = %params.text_document.uri), name = "lsp/textDocument/didClose")]
    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        debug!(
            uri = %uri,
            analysis_pending = self.debouncer.is_pending(&uri),
            refreshing = self.pipeline.issues.is_updating_server_issues(&uri),
            "closing document"
        );
        self.debouncer.cancel(&uri);
        self.pipeline.documents.close(&uri);
        self.pipeline.issues.clear(&uri);
    }

    #[instrument(skip(self, params), fields(uri = %params.text_document.uri), name = "lsp/textDocument/codeAction")]
    async fn code_action(&self, params: CodeActionParams) -> Result<Option<CodeActionResponse>> {
        let uri = &params.text_document.uri;
        let binding = self.pipeline.binding.read().clone();

        let actions = generate_code_actions(
            uri,
            &params.context.diagnostics,
            &self.pipeline.issues,
            binding.as_ref(),
        );

        if actions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(actions))
        }
    }

    #[instrument(skip(self, _params), name = "lsp/workspace/didChangeConfiguration")]
    async fn did_change_configuration(&self, _params: DidChangeConfigurationParams) {
        info!("configuration changed, reloading");
        self.load_configuration().await;

        let root = self.pipeline.workspace_root.read().clone();
        for document in self.pipeline.documents.snapshot_all(root.as_deref()) {
            self.schedule_analysis(document.uri);
        }
    }
}

fn workspace_root(params: &InitializeParams) -> Option<PathBuf> {
    let from_folders = params
        .workspace_folders
        .as_ref()
        .and_then(|folders| folders.first())
        .and_then(|folder| folder.uri.to_file_path().ok());

    #[allow(deprecated)]
    let from_root_uri = || {
        params
            .root_uri
            .as_ref()
            .and_then(|uri| uri.to_file_path().ok())
    };

    from_folders.or_else(from_root_uri)
}

fn read_config(explicit: Option<&Path>, workspace_root: Option<&Path>) -> ConfigResult {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match workspace_root.and_then(find_config_file) {
            Some(path) => path,
            None => {
                debug!("no configuration file found, using defaults");
                return ConfigResult::default();
            }
        },
    };

    match load_config_with_warnings(&path) {
        Ok(result) => {
            info!(path = %path.display(), "configuration loaded");
            result
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid configuration, using defaults");
            ConfigResult::default()
        }
    }
}

async fn with_resolved_token(binding: BindingContext) -> BindingContext {
    if binding.token.is_some() {
        return binding;
    }
    let env = std::env::var(TOKEN_ENV_VAR).ok();
    let credentials = read_credentials().await;
    match pick_token(env, credentials) {
        Some(token) => binding.with_token(token),
        None => binding,
    }
}

fn pick_token(env: Option<String>, credentials: Option<String>) -> Option<String> {
    [env, credentials]
        .into_iter()
        .flatten()
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

async fn read_credentials() -> Option<String> {
    let path = dirs::home_dir()?.join(CREDENTIALS_FILE);
    tokio::fs::read_to_string(path).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::RecordingClient;
    use crate::remote::{FetchError, ServerIssue};
    use hansei_core::{IssueSeverity, TaintIssue, TextRange};
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    struct ScriptedAnalyzer {
        issues: Vec<Issue>,
        fail: bool,
        started: Option<Arc<Notify>>,
        release: Option<Arc<Notify>>,
    }

    impl ScriptedAnalyzer {
        fn reporting(issues: Vec<Issue>) -> Self {
            Self {
                issues,
                fail: false,
                started: None,
                release: None,
            }
        }
    }

    #[tower_lsp::async_trait]
    impl AnalysisEngine for ScriptedAnalyzer {
        async fn analyze(
            &self,
            _document: &VersionedDocument,
            on_issue: &(dyn Fn(Issue) + Send + Sync),
        ) -> std::result::Result<(), AnalysisError> {
            for issue in &self.issues {
                on_issue(issue.clone());
            }
            if let Some(started) = &self.started {
                started.notify_one();
            }
            if let Some(release) = &self.release {
                release.notified().await;
            }
            if self.fail {
                return Err(AnalysisError::Io(std::io::Error::other("analyzer crashed")));
            }
            Ok(())
        }
    }

    struct StaticFetcher {
        taint: Vec<TaintIssue>,
    }

    #[tower_lsp::async_trait]
    impl ServerIssueFetcher for StaticFetcher {
        async fn fetch_taint_issues(
            &self,
            _binding: &BindingContext,
            _relative_path: &str,
        ) -> std::result::Result<Vec<TaintIssue>, FetchError> {
            Ok(self.taint.clone())
        }

        async fn fetch_issues(
            &self,
            _binding: &BindingContext,
            _relative_path: &str,
        ) -> std::result::Result<Vec<ServerIssue>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn pipeline_with(taint: Vec<TaintIssue>) -> (Pipeline, Arc<RecordingClient>) {
        let client = Arc::new(RecordingClient::default());
        let fetcher: Arc<dyn ServerIssueFetcher> = Arc::new(StaticFetcher { taint });
        let issues = Arc::new(IssuesCache::new(
            DiagnosticPublisher::new(client.clone()),
            Arc::new(InMemoryTaintStore::new()),
            fetcher.clone(),
        ));
        (Pipeline::new(issues, fetcher), client)
    }

    fn set_analyzer(pipeline: &Pipeline, analyzer: ScriptedAnalyzer) {
        *pipeline.analyzer.write() = Arc::new(analyzer);
    }

    fn uri() -> Url {
        Url::parse("file:///work/app.py").unwrap()
    }

    fn issue(line: u32, message: &str) -> Issue {
        Issue::new("py:S1", IssueSeverity::Major, message, TextRange::line(line))
    }

    fn messages(client: &RecordingClient) -> Vec<String> {
        client
            .last_publication(&uri())
            .unwrap_or_default()
            .into_iter()
            .map(|d| d.message)
            .collect()
    }

    #[tokio::test]
    async fn successful_pass_commits_reported_issues() {
        let (pipeline, client) = pipeline_with(vec![]);
        set_analyzer(&pipeline, ScriptedAnalyzer::reporting(vec![issue(2, "b"), issue(1, "a")]));
        pipeline.documents.open(uri(), 1, "text");

        pipeline.analyze(&uri()).await;

        assert_eq!(pipeline.issues.count(&uri()), 2);
        assert_eq!(messages(&client), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failed_pass_keeps_previous_issues() {
        let (pipeline, _client) = pipeline_with(vec![]);
        pipeline.documents.open(uri(), 1, "text");
        set_analyzer(&pipeline, ScriptedAnalyzer::reporting(vec![issue(1, "kept")]));
        pipeline.analyze(&uri()).await;

        let mut failing = ScriptedAnalyzer::reporting(vec![issue(1, "x"), issue(2, "y"), issue(3, "z")]);
        failing.fail = true;
        set_analyzer(&pipeline, failing);
        pipeline.documents.update(&uri(), 2, "edited");
        pipeline.analyze(&uri()).await;

        assert_eq!(pipeline.issues.count(&uri()), 1);
    }

    #[tokio::test]
    async fn closed_document_is_not_analyzed() {
        let (pipeline, client) = pipeline_with(vec![]);
        set_analyzer(&pipeline, ScriptedAnalyzer::reporting(vec![issue(1, "a")]));

        pipeline.analyze(&uri()).await;

        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn closing_during_pass_leaves_empty_diagnostics() {
        let (pipeline, client) = pipeline_with(vec![]);
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        set_analyzer(
            &pipeline,
            ScriptedAnalyzer {
                issues: vec![issue(1, "late")],
                fail: false,
                started: Some(started.clone()),
                release: Some(release.clone()),
            },
        );
        pipeline.documents.open(uri(), 1, "text");

        let running = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.analyze(&uri()).await })
        };
        started.notified().await;
        pipeline.documents.close(&uri());
        pipeline.issues.clear(&uri());
        release.notify_one();
        running.await.unwrap();

        assert_eq!(client.last_publication(&uri()), Some(vec![]));
        assert_eq!(pipeline.issues.count(&uri()), 0);
    }

    #[tokio::test]
    async fn unconfigured_analyzer_still_publishes_taint_issues() {
        let taint = TaintIssue::new(
            "AX-1",
            "pythonsecurity:S3649",
            IssueSeverity::Blocker,
            "SQL injection",
            TextRange::line(3),
        );
        let (pipeline, client) = pipeline_with(vec![taint]);
        *pipeline.binding.write() = Some(BindingContext::new(
            Url::parse("https://sonar.example.com").unwrap(),
            "shop",
        ));
        pipeline.documents.open(uri(), 1, "text");

        pipeline.analyze(&uri()).await;

        assert_eq!(messages(&client), vec!["SQL injection"]);
        assert_eq!(pipeline.issues.count(&uri()), 0);
    }

    #[tokio::test]
    async fn bound_pass_reports_through_tracker() {
        let (pipeline, client) = pipeline_with(vec![]);
        *pipeline.binding.write() = Some(BindingContext::new(
            Url::parse("https://sonar.example.com").unwrap(),
            "shop",
        ));
        set_analyzer(&pipeline, ScriptedAnalyzer::reporting(vec![issue(1, "a"), issue(4, "b")]));
        pipeline.documents.open(uri(), 1, "text");

        pipeline.sync_server_history(&uri()).await;
        pipeline.analyze(&uri()).await;

        assert_eq!(pipeline.issues.count(&uri()), 2);
        assert_eq!(messages(&client), vec!["a", "b"]);
    }

    #[test]
    fn read_config_discovers_file_from_workspace_root() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("hansei.toml"),
            "[analyzer]\ncommand = [\"hansei-analyzer\"]\ndebounce_ms = 300\n",
        )
        .unwrap();

        let result = read_config(None, Some(dir.path()));

        assert_eq!(result.config.analyzer.command, vec!["hansei-analyzer"]);
        assert_eq!(result.config.analyzer.debounce_ms, 300);
    }

    #[test]
    fn read_config_prefers_explicit_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hansei.toml"), "[analyzer]\ndebounce_ms = 300\n").unwrap();
        let explicit = dir.path().join("other.toml");
        fs::write(&explicit, "[analyzer]\ndebounce_ms = 10\n").unwrap();

        let result = read_config(Some(&explicit), Some(dir.path()));

        assert_eq!(result.config.analyzer.debounce_ms, 10);
    }

    #[test]
    fn read_config_falls_back_to_defaults_on_invalid_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hansei.toml"), "[analyzer\n").unwrap();

        let result = read_config(None, Some(dir.path()));

        assert_eq!(result.config, Default::default());
    }

    #[test]
    fn read_config_without_root_uses_defaults() {
        let result = read_config(None, None);

        assert!(result.config.server.is_none());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn pick_token_prefers_environment_then_credentials() {
        assert_eq!(
            pick_token(Some("env".to_string()), Some("file".to_string())),
            Some("env".to_string())
        );
        assert_eq!(
            pick_token(Some("  ".to_string()), Some("file\n".to_string())),
            Some("file".to_string())
        );
        assert_eq!(pick_token(None, None), None);
    }

    #[tokio::test]
    async fn configured_token_is_kept() {
        let binding = BindingContext::new(Url::parse("https://sonar.example.com").unwrap(), "shop")
            .with_token("from-config");

        let resolved = with_resolved_token(binding).await;

        assert_eq!(resolved.token.as_deref(), Some("from-config"));
    }

    #[test]
    #[allow(deprecated)]
    fn workspace_root_prefers_workspace_folders() {
        let params = InitializeParams {
            root_uri: Some(Url::parse("file:///legacy").unwrap()),
            workspace_folders: Some(vec![tower_lsp::lsp_types::WorkspaceFolder {
                uri: Url::parse("file:///work").unwrap(),
                name: "work".to_string(),
            }]),
            ..Default::default()
        };

        assert_eq!(workspace_root(&params), Some(PathBuf::from("/work")));
    }

    #[test]
    #[allow(deprecated)]
    fn workspace_root_falls_back_to_root_uri() {
        let params = InitializeParams {
            root_uri: Some(Url::parse("file:///legacy").unwrap()),
            ..Default::default()
        };

        assert_eq!(workspace_root(&params), Some(PathBuf::from("/legacy")));
    }
}
