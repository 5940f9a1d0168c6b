//! cotask demo CLI
//!
//! Demonstration workloads for the cooperative scheduler: interleaved
//! counters, the parent/child lifecycle, and a non-blocking HTTP echo
//! server.

use anyhow::Context;
use clap::{Parser, Subcommand};
use cotask_core::Scheduler;
use std::net::TcpListener;
use std::time::Instant;

mod demos;
mod server;

#[derive(Parser)]
#[command(name = "cotask")]
#[command(about = "Cooperative task scheduler demos", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interleave counter tasks, one iteration per scheduling turn
    Counters {
        /// Iterations per task
        #[arg(short, long, default_value_t = 4)]
        iterations: u32,
        /// Number of tasks
        #[arg(short, long, default_value_t = 2)]
        tasks: u32,
    },

    /// Parent task that spawns a child and kills it after three turns
    Lifecycle,

    /// Non-blocking HTTP echo server driven by readiness waits
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Counters { iterations, tasks } => run_counters(iterations, tasks),
        Commands::Lifecycle => run_lifecycle(),
        Commands::Serve { host, port } => run_serve(&host, port),
    }
}

fn run_counters(iterations: u32, tasks: u32) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut scheduler = Scheduler::new();
    for _ in 0..tasks {
        scheduler.spawn(demos::counter(iterations));
    }
    scheduler.run().context("scheduler run failed")?;
    log::info!("{} tasks finished in {:?}", tasks, started.elapsed());
    Ok(())
}

fn run_lifecycle() -> anyhow::Result<()> {
    let mut scheduler = Scheduler::new();
    scheduler.spawn(demos::ParentTask::new());
    scheduler.run().context("scheduler run failed")?;
    Ok(())
}

fn run_serve(host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener =
        TcpListener::bind(&addr).with_context(|| format!("failed to bind {}", addr))?;
    log::info!("listening on {}", addr);

    let mut scheduler = Scheduler::new();
    let accept = server::AcceptLoop::new(listener).context("failed to configure listener")?;
    scheduler.spawn(accept);
    scheduler.run().context("scheduler run failed")?;
    Ok(())
}
