//! Binding of a workspace to a remote server project

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingContext {
    pub server_url: Url,
    pub token: Option<String>,
    pub project_key: String,
    pub branch: Option<String>,
}

impl BindingContext {
    pub fn new(server_url: Url, project_key: impl Into<String>) -> Self {
        Self {
            server_url,
            token: None,
            project_key: project_key.into(),
            branch: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Link to a taint issue in the server UI.
    pub fn issue_url(&self, issue_key: &str) -> Option<Url> {
        let mut url = self.server_url.join("project/issues").ok()?;
        url.query_pairs_mut()
            .append_pair("id", &self.project_key)
            .append_pair("issues", issue_key)
            .append_pair("open", issue_key);
        if let Some(branch) = &self.branch {
            url.query_pairs_mut().append_pair("branch", branch);
        }
        Some(url)
    }
}
