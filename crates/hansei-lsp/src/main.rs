mod analysis;
mod capabilities;
mod cli;
mod client;
mod code_actions;
mod debouncer;
mod document;
mod issues_cache;
mod logging;
mod publisher;
mod remote;
mod server;

use clap::Parser;
use server::HanseiLanguageServer;
use tower_lsp::{LspService, Server};

use crate::cli::Cli;
use crate::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _guard = init_logging(&cli);

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let config_path = cli.config.clone();
    let (service, socket) =
        LspService::new(move |client| HanseiLanguageServer::new(client, config_path.clone()));
    Server::new(stdin, stdout, socket).serve(service).await;
}
