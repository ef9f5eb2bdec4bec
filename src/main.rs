//! Warden CLI - drive the control plane from a terminal.
//!
//! The binary hosts one in-process control plane per invocation (durability
//! is the embedding caller's concern): inspect status, then run one team or
//! every team against a task with live timeline output.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use warden::config::WardenConfig;
use warden::control::WorldState;
use warden::engine::{EventSink, LoopEvent};
use warden::plane::{ControlPlane, RunOptions};
use warden::provider::MockProvider;
use warden::SessionStatus;

#[derive(Parser)]
#[command(name = "warden", version, about = "Orchestration control plane for agent teams")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "warden.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show world, team, and budget status.
    Status,
    /// Run one team's agent loop on a task.
    Run {
        /// Team id from the registry.
        team: String,
        /// The delegated task.
        task: String,
        /// Override the configured iteration cap.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Use the mock provider instead of a real API.
        #[arg(long)]
        mock: bool,
    },
    /// Run every team on the same task in bounded batches.
    RunAll {
        /// The delegated task.
        task: String,
        /// Use the mock provider instead of a real API.
        #[arg(long)]
        mock: bool,
    },
}

/// Prints timeline events as they happen.
struct PrintSink;

impl EventSink for PrintSink {
    fn emit(&self, event: LoopEvent) {
        match event {
            LoopEvent::SessionStarted { team_id, task } => {
                println!("{} {} - {}", "session".cyan().bold(), team_id, task);
            }
            LoopEvent::IterationStarted { iteration } => {
                println!("  {} {}", "iteration".dimmed(), iteration);
            }
            LoopEvent::ToolCall { call, .. } => {
                println!("    {} {}", "tool".yellow(), call.name);
            }
            LoopEvent::ToolResult { ok, detail, .. } => {
                let marker = if ok { "ok".green() } else { "err".red() };
                println!("    {} {}", marker, detail);
            }
            LoopEvent::TaskCreated { task } => {
                println!("    {} {}", "+task".green().bold(), task.title);
            }
            LoopEvent::DecisionCreated { decision } => {
                println!("    {} {}", "+decision".green().bold(), decision.title);
            }
            LoopEvent::MessageSent { message } => {
                println!(
                    "    {} {}",
                    "+message".green().bold(),
                    message.subject.as_deref().unwrap_or(&message.body)
                );
            }
            LoopEvent::IterationCompleted { usage, .. } => {
                println!(
                    "  {} {} in / {} out",
                    "tokens".dimmed(),
                    usage.input_tokens,
                    usage.output_tokens
                );
            }
            LoopEvent::SessionFinished { status, iterations } => {
                let label = match status {
                    SessionStatus::Completed => "completed".green().bold(),
                    SessionStatus::Exhausted => "exhausted".yellow().bold(),
                    SessionStatus::Failed => "failed".red().bold(),
                    SessionStatus::Cancelled => "cancelled".yellow().bold(),
                };
                println!("{} after {} iteration(s)", label, iterations);
            }
        }
    }
}

fn run_options(mock: bool, max_iterations: Option<u32>) -> RunOptions {
    RunOptions {
        max_iterations,
        provider_override: if mock {
            Some(Arc::new(MockProvider::new().completing("mock run finished")))
        } else {
            None
        },
        sink: Arc::new(PrintSink),
        ..RunOptions::default()
    }
}

async fn print_status(plane: &ControlPlane) {
    let world = plane.world_status().await;
    println!("{} {}", "world:".bold(), world.state);
    if world.emergency_stop.active {
        println!(
            "{} {}",
            "EMERGENCY STOP:".red().bold(),
            world.emergency_stop.reason.as_deref().unwrap_or("active")
        );
    }

    let credit = plane.check_credit_limits().await;
    println!(
        "{} ${:.2}/{:.2} daily, ${:.2}/{:.2} monthly ({})",
        "budget:".bold(),
        credit.daily_spend,
        credit.daily_limit,
        credit.monthly_spend,
        credit.monthly_limit,
        credit.state
    );

    println!("{}", "teams:".bold());
    for team in plane.all_team_statuses().await {
        println!(
            "  {:<12} {:<8} {:<10} runs={} actions=[{}]",
            team.id,
            team.status.to_string(),
            team.automation_level.to_string(),
            team.run_count,
            team.allowed_actions
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let config = WardenConfig::load(&cli.config)?;
    let plane = ControlPlane::new(config)?;

    match cli.command {
        Command::Status => print_status(&plane).await,
        Command::Run {
            team,
            task,
            max_iterations,
            mock,
        } => {
            // The registry starts paused; a direct CLI run is an operator
            // decision, so bring the world up first.
            plane.set_world_state(WorldState::SemiAuto, "cli").await?;
            let session = plane
                .run_agent_loop(&team, &task, run_options(mock, max_iterations))
                .await?;
            println!("{}", session.summary());
        }
        Command::RunAll { task, mock } => {
            plane.set_world_state(WorldState::SemiAuto, "cli").await?;
            for outcome in plane.run_all_teams(&task, run_options(mock, None)).await {
                match outcome.result {
                    Ok(session) => println!("{}", session.summary()),
                    Err(e) => println!("{} {}: {}", "skipped".yellow(), outcome.team_id, e),
                }
            }
        }
    }

    Ok(())
}
