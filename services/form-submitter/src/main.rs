mod cli;

use anyhow::Result;
use clap::Parser;
use common::SubmitterConfig;
use submission::FormManager;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SubmitterConfig::from_env()?;
    cli.apply(&mut config);
    common::logging::init(&config.log_level);

    let form = cli.build_form()?;
    tracing::info!("📨 Form submitter starting...");
    tracing::info!("Target: {} ({} submissions)", form.url, cli.repeat);

    let mut manager = FormManager::new(config)?;
    let mut events = manager
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;

    for _ in 0..cli.repeat {
        manager.submit_form(form.clone(), cli.ignore_reply)?;
    }

    let mut expected = if cli.ignore_reply { 0 } else { cli.repeat };
    let mut failures = 0usize;

    while expected > 0 {
        tokio::select! {
            event = events.recv() => {
                let Some(response) = event else { break };
                expected -= 1;
                if !response.ok {
                    failures += 1;
                    tracing::error!(
                        "Submission {} failed: {}",
                        response.id,
                        response.error.as_deref().unwrap_or("unknown error")
                    );
                }
                println!("{}", serde_json::to_string(&response)?);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, canceling current submission");
                break;
            }
        }
    }

    // Ignored replies are still sent; wait for the queue to drain before leaving
    while expected == 0 && manager.queue_len() > 0 {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.shutdown().await;

    if failures > 0 {
        anyhow::bail!("{failures} submission(s) failed");
    }
    Ok(())
}
