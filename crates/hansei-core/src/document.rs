//! Versioned document snapshots handed to an analysis pass

use std::path::Path;
use std::sync::Arc;

use url::Url;

/// Content of a file at a given editor version.
///
/// Cloning is cheap: the text is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDocument {
    pub uri: Url,
    pub version: i32,
    pub relative_path: String,
    pub content: Arc<str>,
}

impl VersionedDocument {
    pub fn new(uri: Url, version: i32, content: impl Into<Arc<str>>) -> Self {
        let relative_path = relative_path(None, &uri);
        Self {
            uri,
            version,
            relative_path,
            content: content.into(),
        }
    }

    pub fn with_workspace_root(mut self, root: Option<&Path>) -> Self {
        self.relative_path = relative_path(root, &self.uri);
        self
    }
}

/// Path of `uri` relative to the workspace root, `/`-separated.
///
/// Falls back to the URI path when the file is outside the root or is not a
/// `file://` URI.
pub fn relative_path(root: Option<&Path>, uri: &Url) -> String {
    let relative = root.and_then(|root| {
        let path = uri.to_file_path().ok()?;
        let stripped = path.strip_prefix(root).ok()?;
        let parts: Vec<String> = stripped
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    });

    relative.unwrap_or_else(|| uri.path().trim_start_matches('/').to_string())
}
