//! Shared utilities for demos.
//!
//! Provides common functionality used across all demos:
//! - Command-line argument parsing
//! - Logging initialization
//! - A scripted local notification server

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::SinkExt;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for demos.
#[derive(Debug, Clone)]
pub struct Args {
    pub debug: bool,
    /// Remote endpoint. A local scripted server is used when absent.
    pub endpoint: Option<String>,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let endpoint = args
            .iter()
            .position(|a| a == "--endpoint")
            .and_then(|i| args.get(i + 1))
            .cloned();

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            endpoint,
        }
    }
}

/// One frame the local server sends after a delay.
#[derive(Debug, Clone)]
pub struct ScriptedFrame {
    pub delay: Duration,
    pub text: String,
}

impl ScriptedFrame {
    pub fn after(delay_ms: u64, text: impl Into<String>) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            text: text.into(),
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "project_event_mux=debug"
    } else {
        "project_event_mux=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Starts a local WebSocket server that plays `script` to each client.
///
/// Returns the `ws://` URL to connect to.
pub async fn spawn_scripted_server(script: Vec<ScriptedFrame>) -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let script = script.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                for frame in script {
                    tokio::time::sleep(frame.delay).await;
                    if ws.send(Message::text(frame.text)).await.is_err() {
                        return;
                    }
                }
                // Hold the connection open until the client leaves
                tokio::time::sleep(Duration::from_secs(3600)).await;
            });
        }
    });

    Ok(format!("ws://{addr}/ws"))
}

/// Builds a progress frame.
pub fn progress(project_id: &str, step: u32, step_count: u32) -> String {
    format!(
        r#"{{"type":"progress","projectId":"{project_id}","step":{step},"stepCount":{step_count}}}"#
    )
}

/// Builds a status frame (`queued`, `started`, `completed`, ...).
pub fn status(kind: &str, project_id: &str) -> String {
    format!(r#"{{"type":"{kind}","projectId":"{project_id}"}}"#)
}

/// Builds a `jobCompleted` frame.
pub fn job_completed(project_id: &str, result_url: &str) -> String {
    format!(r#"{{"type":"jobCompleted","projectId":"{project_id}","resultUrl":"{result_url}"}}"#)
}

/// Builds a `failed` frame.
pub fn failed(project_id: &str, error: &str) -> String {
    format!(r#"{{"type":"failed","projectId":"{project_id}","error":"{error}"}}"#)
}
