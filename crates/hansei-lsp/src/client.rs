//! Outbound traffic to the editor
//!
//! Publications are produced from synchronous cache operations. They are queued
//! on a channel and forwarded to the transport by a single task, which keeps
//! them in the order they were produced.

use tokio::sync::mpsc;
use tower_lsp::Client;
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::{Diagnostic, Url};
use tracing::{debug, trace};

pub trait EditorClient: Send + Sync {
    fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>);

    fn show_first_secret_detection_notification(&self);
}

pub enum ShowFirstSecretDetection {}

impl Notification for ShowFirstSecretDetection {
    type Params = ();
    const METHOD: &'static str = "hansei/showFirstSecretDetectionNotification";
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Diagnostics {
        uri: Url,
        diagnostics: Vec<Diagnostic>,
    },
    FirstSecretDetected,
}

pub struct ForwardingClient {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ForwardingClient {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Must be called from within a tokio runtime.
    pub fn spawn(client: Client) -> Self {
        let (forwarding, rx) = Self::channel();
        tokio::spawn(forward(client, rx));
        forwarding
    }

    fn send(&self, message: Outbound) {
        if self.tx.send(message).is_err() {
            debug!("editor connection closed, dropping outbound message");
        }
    }
}

impl EditorClient for ForwardingClient {
    fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        self.send(Outbound::Diagnostics { uri, diagnostics });
    }

    fn show_first_secret_detection_notification(&self) {
        self.send(Outbound::FirstSecretDetected);
    }
}

async fn forward(client: Client, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(message) = rx.recv().await {
        match message {
            Outbound::Diagnostics { uri, diagnostics } => {
                trace!(uri = %uri, count = diagnostics.len(), "publishing diagnostics");
                client.publish_diagnostics(uri, diagnostics, None).await;
            }
            Outbound::FirstSecretDetected => {
                client
                    .send_notification::<ShowFirstSecretDetection>(())
                    .await;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn test_uri(name: &str) -> Url {
        Url::parse(&format!("file:///test/{}", name)).unwrap()
    }

    #[tokio::test]
    async fn forwarding_client_preserves_order() {
        let (client, mut rx) = ForwardingClient::channel();
        let uri = test_uri("a.py");

        client.publish_diagnostics(uri.clone(), vec![]);
        client.show_first_secret_detection_notification();
        client.publish_diagnostics(uri.clone(), vec![Diagnostic::default()]);

        assert_eq!(
            rx.recv().await,
            Some(Outbound::Diagnostics {
                uri: uri.clone(),
                diagnostics: vec![]
            })
        );
        assert_eq!(rx.recv().await, Some(Outbound::FirstSecretDetected));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Diagnostics {
                uri,
                diagnostics: vec![Diagnostic::default()]
            })
        );
    }

    #[test]
    fn sending_after_receiver_dropped_does_not_panic() {
        let (client, rx) = ForwardingClient::channel();
        drop(rx);

        client.publish_diagnostics(test_uri("a.py"), vec![]);
        client.show_first_secret_detection_notification();
    }

    #[test]
    fn notification_method_is_namespaced() {
        assert_eq!(
            ShowFirstSecretDetection::METHOD,
            "hansei/showFirstSecretDetectionNotification"
        );
    }
}
