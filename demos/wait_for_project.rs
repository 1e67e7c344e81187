//! Waiting for a single project.
//!
//! Demonstrates:
//! - Building an EventMux with a progress observer
//! - Frames arriving before the project is tracked (buffered, then replayed)
//! - Resolving on `jobCompleted`
//!
//! Usage:
//!   cargo run --example wait_for_project
//!   cargo run --example wait_for_project -- --debug
//!   cargo run --example wait_for_project -- --endpoint wss://host/ws

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::{Args, ScriptedFrame};
use project_event_mux::{ClientId, Endpoint, EventMux, ProgressUpdate};

// ============================================================================
// Constants
// ============================================================================

const PROJECT_ID: &str = "demo-project";
const RESULT_URL: &str = "https://cdn.example.com/out.png";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    println!("=== Wait For Project ===\n");

    // ========================================================================
    // Endpoint
    // ========================================================================

    let base = match args.endpoint {
        Some(endpoint) => endpoint,
        None => {
            println!("[Setup] Starting local scripted server...");
            let url = common::spawn_scripted_server(vec![
                ScriptedFrame::after(0, common::status("queued", PROJECT_ID)),
                ScriptedFrame::after(0, common::progress(PROJECT_ID, 1, 4)),
                ScriptedFrame::after(300, common::progress(PROJECT_ID, 2, 4)),
                ScriptedFrame::after(300, common::progress(PROJECT_ID, 4, 4)),
                ScriptedFrame::after(100, common::job_completed(PROJECT_ID, RESULT_URL)),
                ScriptedFrame::after(50, common::status("completed", PROJECT_ID)),
            ])
            .await?;
            println!("        ✓ Listening on {url}\n");
            url
        }
    };

    let client_id = ClientId::generate();
    let endpoint = Endpoint::for_client(&base, &client_id)?;

    // ========================================================================
    // Build Multiplexer
    // ========================================================================

    println!("[1] Building multiplexer...");
    println!("    Client: {client_id}");

    let mux: EventMux<String> = EventMux::builder()
        .endpoint(endpoint)
        .completion_timeout(Duration::from_secs(30))
        .observer(|file: &String, update: &ProgressUpdate| {
            println!("    [{file}] {}%", update.percent().unwrap_or(0));
        })
        .build()?;

    let opened = mux.wait_for_open(Duration::from_secs(5)).await;
    println!("    ✓ Open: {opened}\n");

    // Early frames land in the buffer while we "submit" the job
    tokio::time::sleep(Duration::from_millis(200)).await;

    // ========================================================================
    // Wait
    // ========================================================================

    println!("[2] Waiting for {PROJECT_ID}...");

    let result = mux
        .wait_for_project_completion(PROJECT_ID, "portrait.png".to_string())
        .await?;

    println!("    ✓ Result: {:?}\n", result.result_url);

    let stats = mux.stats().await?;
    println!("[3] Stats: {stats:?}\n");

    mux.shutdown().await;
    println!("=== Done ===");

    Ok(())
}
