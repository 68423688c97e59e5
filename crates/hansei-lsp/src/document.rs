use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use hansei_core::VersionedDocument;
use tower_lsp::lsp_types::Url;

struct OpenDocument {
    version: i32,
    text: Arc<str>,
}

/// Text of the documents currently open in the editor.
pub struct DocumentStore {
    documents: DashMap<Url, OpenDocument>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
        }
    }

    pub fn open(&self, uri: Url, version: i32, text: &str) {
        self.documents.insert(
            uri,
            OpenDocument {
                version,
                text: Arc::from(text),
            },
        );
    }

    /// Replaces the text of `uri`. Out-of-order updates carrying an older
    /// version are ignored.
    pub fn update(&self, uri: &Url, version: i32, text: &str) -> bool {
        let mut document = self
            .documents
            .entry(uri.clone())
            .or_insert_with(|| OpenDocument {
                version,
                text: Arc::from(""),
            });
        if version < document.version {
            return false;
        }
        document.version = version;
        document.text = Arc::from(text);
        true
    }

    pub fn close(&self, uri: &Url) {
        self.documents.remove(uri);
    }

    /// Immutable view of `uri` for one analysis pass.
    pub fn snapshot(&self, uri: &Url, workspace_root: Option<&Path>) -> Option<VersionedDocument> {
        self.documents.get(uri).map(|document| {
            VersionedDocument::new(uri.clone(), document.version, document.text.clone())
                .with_workspace_root(workspace_root)
        })
    }

    pub fn snapshot_all(&self, workspace_root: Option<&Path>) -> Vec<VersionedDocument> {
        self.documents
            .iter()
            .map(|entry| {
                VersionedDocument::new(entry.key().clone(), entry.version, entry.text.clone())
                    .with_workspace_root(workspace_root)
            })
            .collect()
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.documents.contains_key(uri)
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}
