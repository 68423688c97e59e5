//! Analysis passes delegated to an external analyzer process

use std::process::{ExitStatus, Stdio};

use hansei_core::{Issue, VersionedDocument};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Environment variable carrying the workspace-relative path of the analyzed file.
pub const FILE_ENV_VAR: &str = "HANSEI_FILE";

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("No analyzer command configured")]
    NotConfigured,
    #[error("Failed to start analyzer '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to communicate with analyzer: {0}")]
    Io(#[from] std::io::Error),
    #[error("Analyzer exited with {status}")]
    Exit { status: ExitStatus },
}

/// Runs one analysis pass over a document snapshot.
///
/// Issues are handed to `on_issue` as soon as they are found, before the pass
/// completes. An `Err` means the pass failed and its issues must be discarded.
#[tower_lsp::async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(
        &self,
        document: &VersionedDocument,
        on_issue: &(dyn Fn(Issue) + Send + Sync),
    ) -> Result<(), AnalysisError>;
}

/// Analyzer speaking a line protocol: file content on stdin, one JSON issue
/// per line on stdout.
#[derive(Debug, Clone, Default)]
pub struct ExternalAnalyzer {
    command: Vec<String>,
}

impl ExternalAnalyzer {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }
}

#[tower_lsp::async_trait]
impl AnalysisEngine for ExternalAnalyzer {
    async fn analyze(
        &self,
        document: &VersionedDocument,
        on_issue: &(dyn Fn(Issue) + Send + Sync),
    ) -> Result<(), AnalysisError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(AnalysisError::NotConfigured)?;

        let mut child = Command::new(program)
            .args(args)
            .env(FILE_ENV_VAR, &document.relative_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AnalysisError::Spawn {
                command: program.clone(),
                source,
            })?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(AnalysisError::Io(std::io::Error::other(
                "analyzer pipes unavailable",
            )));
        };

        // Feed stdin concurrently so a chatty analyzer cannot block on a full stdout pipe.
        let content = document.content.clone();
        let writer = tokio::spawn(async move {
            stdin.write_all(content.as_bytes()).await?;
            stdin.shutdown().await
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut reported = 0usize;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Issue>(line) {
                Ok(issue) => {
                    trace!(rule = %issue.rule_key, line = issue.range.start_line, "issue reported");
                    reported += 1;
                    on_issue(issue);
                }
                Err(e) => warn!(error = %e, "skipping malformed analyzer output"),
            }
        }

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "analyzer closed stdin early"),
            Err(e) => debug!(error = %e, "stdin writer task failed"),
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(AnalysisError::Exit { status });
        }

        debug!(uri = %document.uri, version = document.version, reported, "analysis finished");
        Ok(())
    }
}
