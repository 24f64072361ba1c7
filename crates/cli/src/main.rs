//! Dossier CLI
//!
//! Research companies, read account plans and rewrite plan sections
//! against a running Dossier backend.

mod chat;
mod logging;
mod render;

use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use dossier_client::{ClientConfig, ClientResult, HttpResources, ResourceApi};

use crate::logging::init_logging;
use crate::render::sessions_table;

#[derive(Debug, Parser)]
#[command(name = "dossier", version, about = "Company research assistant")]
struct Cli {
    /// Backend base URL (overrides config file and DOSSIER_SERVER_URL)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Session to open instead of the most recent one
    #[arg(long, global = true, env = "DOSSIER_SESSION")]
    session: Option<String>,

    /// Delay between stream reconnect attempts, in milliseconds
    #[arg(long, global = true)]
    reconnect_delay_ms: Option<u64>,

    /// Speak finished responses
    #[arg(long, global = true)]
    speak: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive research chat (default)
    Chat,
    /// List research sessions
    Sessions,
    /// Check that the backend is reachable
    Status,
}

impl Cli {
    fn config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::load()?;
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(ms) = self.reconnect_delay_ms {
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if self.speak {
            config.speak_responses = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logging = init_logging()?;
    let config = cli.config()?;

    tracing::info!(
        component = "cli",
        event = "cli.started",
        server_url = %config.server_url,
        log_path = %logging.log_path.display(),
    );

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat::run(config, cli.session).await?,
        Command::Sessions => {
            let resources = HttpResources::new(&config)?;
            let sessions = resources.list_sessions().await?;
            if sessions.is_empty() {
                println!("{}", style("No sessions yet.").dim());
            } else {
                println!("{}", sessions_table(&sessions, None));
            }
        }
        Command::Status => {
            let resources = HttpResources::new(&config)?;
            let health = resources.health().await;
            println!("{}", status_report(resources.base_url(), health)?);
        }
    }

    Ok(())
}

/// Health summary for `dossier status`; an unreachable backend is an error
fn status_report(base_url: &str, health: ClientResult<serde_json::Value>) -> anyhow::Result<String> {
    match health {
        Ok(body) => Ok(format!(
            "{} {}\n{}",
            style("●").green(),
            base_url,
            serde_json::to_string_pretty(&body)?
        )),
        Err(err) => {
            tracing::warn!(
                component = "cli",
                event = "cli.status_unreachable",
                server_url = %base_url,
                error = %err,
            );
            anyhow::bail!("{} {base_url} is unreachable: {err}", style("●").red())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_client::ClientError;
    use serde_json::json;

    #[test]
    fn status_report_lists_health_body() {
        let report = status_report("http://localhost:8000", Ok(json!({"status": "ok"})))
            .expect("healthy backend");
        assert!(report.contains("http://localhost:8000"));
        assert!(report.contains("\"status\": \"ok\""));
    }

    #[test]
    fn unreachable_backend_is_an_error() {
        let err = status_report(
            "http://localhost:8000",
            Err(ClientError::Status {
                method: "GET",
                url: "http://localhost:8000/health".to_string(),
                status: 503,
            }),
        )
        .expect_err("unhealthy backend");
        let message = err.to_string();
        assert!(message.contains("http://localhost:8000 is unreachable"));
        assert!(message.contains("returned status 503"));
    }
}
