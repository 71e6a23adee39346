//! `loaf`: a local agent runtime serving JSON-RPC 2.0 over stdio.

mod rpc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use loaf_core::AgentRuntime;
use loaf_core::RuntimeConfig;
use loaf_core::compact::CompactionPolicy;
use loaf_core::compact::DEFAULT_HIGH_WATERMARK_RATIO;
use loaf_core::compact::DEFAULT_TARGET_RATIO;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "loaf",
    about = "Local agent runtime: tools, background shells, and context compaction over JSON-RPC stdio.",
    version
)]
struct Cli {
    /// Data directory (default: ~/.loaf).
    #[arg(long = "home-dir", value_name = "PATH")]
    home_dir: Option<PathBuf>,

    /// Resume an existing rollout instead of starting a fresh session.
    #[arg(long = "rollout", value_name = "PATH")]
    rollout: Option<PathBuf>,

    /// Compaction trigger as a fraction of the model context window.
    #[arg(long = "high-watermark", default_value_t = DEFAULT_HIGH_WATERMARK_RATIO)]
    high_watermark: f64,

    /// Compaction target as a fraction of the model context window.
    #[arg(long = "target-ratio", default_value_t = DEFAULT_TARGET_RATIO)]
    target_ratio: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout belongs to the JSON-RPC stream.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = Arc::new(AgentRuntime::new(RuntimeConfig {
        home_dir: cli.home_dir,
        compaction_policy: CompactionPolicy::new(cli.high_watermark, cli.target_ratio),
    }));

    let rollout = match cli.rollout {
        Some(rollout) => rollout,
        None => fresh_rollout_path(&runtime)?,
    };
    rpc::log_startup(&rollout);

    rpc::RpcServer::new(runtime, rollout).serve().await
}

fn fresh_rollout_path(runtime: &AgentRuntime) -> anyhow::Result<PathBuf> {
    let sessions = runtime.sessions_dir();
    std::fs::create_dir_all(&sessions)
        .with_context(|| format!("creating sessions dir {}", sessions.display()))?;
    let stamp = chrono::Utc::now().format("%Y-%m-%d");
    let name = format!("rollout-{stamp}-{}.jsonl", uuid::Uuid::new_v4());
    Ok(sessions.join(name))
}
