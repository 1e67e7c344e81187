//! Many concurrent projects over one stream.
//!
//! Demonstrates:
//! - Sharing one EventMux between concurrent tasks
//! - Interleaved frames routed to the right caller
//! - Remote failures and timeouts reported per project
//!
//! Usage:
//!   cargo run --example many_projects
//!   cargo run --example many_projects -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use common::{Args, ScriptedFrame};
use project_event_mux::{EventMux, ProgressUpdate};

// ============================================================================
// Constants
// ============================================================================

const PROJECT_COUNT: usize = 8;
const STEPS: u32 = 5;

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
    println!("=== Many Projects ===\n");

    // ========================================================================
    // Endpoint
    // ========================================================================

    let endpoint = match args.endpoint {
        Some(endpoint) => endpoint,
        None => common::spawn_scripted_server(script()).await?,
    };

    let mux: EventMux<usize> = EventMux::builder()
        .endpoint(endpoint)
        .observer(|index: &usize, update: &ProgressUpdate| {
            if update.step == update.step_count {
                println!("    [project-{index}] all steps reported");
            }
        })
        .build()?;

    mux.wait_for_open(Duration::from_secs(5)).await;

    // ========================================================================
    // Concurrent Waits
    // ========================================================================

    println!("[1] Waiting for {PROJECT_COUNT} projects...\n");
    let started = Instant::now();

    let mut handles = Vec::with_capacity(PROJECT_COUNT);
    for index in 0..PROJECT_COUNT {
        let mux = mux.clone();
        handles.push(tokio::spawn(async move {
            let outcome = mux
                .wait_for_project_completion_with_timeout(
                    format!("project-{index}"),
                    index,
                    Duration::from_secs(3),
                )
                .await;
            (index, outcome)
        }));
    }

    for handle in handles {
        let (index, outcome) = handle.await?;
        match outcome {
            Ok(result) => println!("    ✓ project-{index}: {:?}", result.result_url),
            Err(e) if e.is_timeout() => println!("    ⏱ project-{index}: {e}"),
            Err(e) => println!("    ✗ project-{index}: {e}"),
        }
    }

    println!("\n    Elapsed: {:?}", started.elapsed());
    println!("    Stats: {:?}\n", mux.stats().await?);

    mux.shutdown().await;
    println!("=== Done ===");

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Interleaves frames of every project; the last one never finishes.
fn script() -> Vec<ScriptedFrame> {
    let mut frames = Vec::new();

    for step in 1..=STEPS {
        for index in 0..PROJECT_COUNT {
            let id = format!("project-{index}");
            frames.push(ScriptedFrame::after(10, common::progress(&id, step, STEPS)));
        }
    }

    for index in 0..PROJECT_COUNT - 1 {
        let id = format!("project-{index}");
        if index % 3 == 2 {
            frames.push(ScriptedFrame::after(20, common::failed(&id, "out of memory")));
        } else {
            let url = format!("https://cdn.example.com/{id}.png");
            frames.push(ScriptedFrame::after(20, common::job_completed(&id, &url)));
            frames.push(ScriptedFrame::after(5, common::status("completed", &id)));
        }
    }

    frames
}
