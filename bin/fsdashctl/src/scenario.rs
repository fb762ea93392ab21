//! ---
//! fsd_section: "05-networking-external-interfaces"
//! fsd_subsection: "binary"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Scenario subcommands for the dashboard control CLI."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use anyhow::{bail, Result};
use clap::Subcommand;
use fsd_core::{DashboardEngine, RunOutcome};
use tokio::sync::broadcast::error::RecvError;

use crate::render;

/// Dispatch entry point for scenario subcommands.
pub async fn run(engine: &DashboardEngine, command: ScenarioCommand) -> Result<()> {
    match command {
        ScenarioCommand::List => {
            for summary in engine.scenarios() {
                let marker = if summary.explain_only { " (explain only)" } else { "" };
                println!("{:<22} {}{marker}", summary.id, summary.title);
                if !summary.description.is_empty() {
                    println!("{:<22} {}", "", summary.description);
                }
            }
        }
        ScenarioCommand::Run { id, explain } => {
            engine.set_explain_mode(explain);
            if explain {
                for line in engine.explain_scenario(&id)? {
                    println!("{line}");
                }
                return Ok(());
            }
            execute(engine, &id).await?;
        }
        ScenarioCommand::Explain { id } => {
            for line in engine.explain_scenario(&id)? {
                println!("{line}");
            }
        }
        ScenarioCommand::Reset => {
            let report = engine.reset_scenarios().await;
            if let Some(active) = &report.cancelled {
                println!("Cancelled running scenario {active}");
            }
            for name in &report.deleted {
                println!("Deleted {name}");
            }
            for (name, err) in &report.failed {
                eprintln!("Could not delete {name}: {err}");
            }
            if let Some(err) = &report.listing_error {
                bail!("reset failed: {err}");
            }
            if !report.is_clean() {
                bail!("{} demo file(s) could not be removed", report.failed.len());
            }
        }
    }
    Ok(())
}

/// Run a scenario while streaming its console lines to stdout.
async fn execute(engine: &DashboardEngine, id: &str) -> Result<()> {
    let mut console = engine.narrative().subscribe();
    let run = engine.run_scenario(id);
    tokio::pin!(run);

    let report = loop {
        tokio::select! {
            biased;
            line = console.recv() => match line {
                Ok(line) => println!("{}", render::narrative_line(&line)),
                Err(RecvError::Lagged(skipped)) => println!("... {skipped} line(s) skipped"),
                Err(RecvError::Closed) => {}
            },
            report = &mut run => break report?,
        }
    };
    // lines emitted alongside the final step
    while let Ok(line) = console.try_recv() {
        println!("{}", render::narrative_line(&line));
    }
    for alert in engine.alerts() {
        println!("{}", render::alert_line(&alert));
    }

    match report.outcome {
        RunOutcome::Completed => {
            println!("{id} completed in {:.1}s", report.elapsed.as_secs_f64());
            Ok(())
        }
        RunOutcome::Failed(reason) => bail!("{id} failed: {reason}"),
        RunOutcome::Cancelled => bail!("{id} was cancelled"),
    }
}

#[derive(Debug, Subcommand)]
pub enum ScenarioCommand {
    /// List registered scenarios.
    #[command(name = "list")]
    List,
    /// Run a scenario, or only explain it with `--explain`.
    #[command(name = "run")]
    Run {
        #[arg(value_name = "ID")]
        id: String,
        #[arg(long)]
        explain: bool,
    },
    /// Print a scenario's explanation without touching the server.
    #[command(name = "explain")]
    Explain {
        #[arg(value_name = "ID")]
        id: String,
    },
    /// Cancel any running scenario and delete demo artifacts.
    #[command(name = "reset")]
    Reset,
}
