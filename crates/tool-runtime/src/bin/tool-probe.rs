//! tool-probe: connect to the servers in a TOML file, list their tools and
//! optionally run one call.
//!
//! ```text
//! tool-probe --servers config/servers.toml
//! tool-probe --servers config/servers.toml --call search --args '{"query":"rust"}'
//! ```

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use toolwire_core::{load_dotenv, parse_servers_toml, Logger, RuntimeConfig};
use toolwire_mcp::{cancel_pair, CancelSignal};
use toolwire_tool_runtime::ToolHub;

// ── CLI ─────────────────────────────────────────────────────────────

/// Probe tool servers: register them, print their tools, call one.
#[derive(Parser, Debug)]
#[command(name = "tool-probe", version, about)]
struct Cli {
    /// Path to a TOML file with a `[[servers]]` list.
    #[arg(long, env = "TOOLWIRE_SERVERS", default_value = "config/servers.toml")]
    servers: String,

    /// Tool to execute after discovery.
    #[arg(long)]
    call: Option<String>,

    /// JSON arguments for `--call`.
    #[arg(long, default_value = "{}")]
    args: String,

    /// Abort the call after this many seconds (0 waits for the server timeout).
    #[arg(long, default_value_t = 0)]
    deadline: u64,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let runtime = RuntimeConfig::from_env()?;
    runtime.log_summary();

    let source = std::fs::read_to_string(&cli.servers)
        .with_context(|| format!("reading server list {}", cli.servers))?;
    let configs = parse_servers_toml(&source)?;
    info!(path = %cli.servers, servers = configs.len(), "loaded server list");

    let hub = ToolHub::new(runtime, Logger::component("tool-probe"));
    for (name, error) in hub.register_all(configs).await {
        tracing::warn!(server = %name, error = %error, "server unavailable");
    }

    println!("Servers:");
    for server in hub.list_servers().await {
        let detail = server.error.as_deref().unwrap_or("");
        println!(
            "  {:<20} {:<6} {:<12} {:>3} tools  {}",
            server.name,
            server.transport.to_string(),
            server.status.to_string(),
            server.tool_count,
            detail
        );
    }

    println!("Tools:");
    for tool in hub.list_tools().await {
        println!("  {:<30} {}", tool.to_string(), tool.description);
    }

    if let Some(tool) = cli.call.as_deref() {
        let args: serde_json::Value =
            serde_json::from_str(&cli.args).context("--args must be a JSON value")?;

        let (handle, cancel) = if cli.deadline > 0 {
            let (handle, cancel) = cancel_pair();
            (Some(handle), cancel)
        } else {
            (None, CancelSignal::never())
        };
        let deadline = handle.map(|handle| {
            let secs = cli.deadline;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                handle.cancel();
            })
        });

        let result = hub.execute(tool, args, &cancel).await;
        if let Some(deadline) = deadline {
            deadline.abort();
        }

        match result {
            Ok(result) => {
                println!(
                    "Result ({}ms, {}):",
                    result.elapsed.as_millis(),
                    if result.is_success() { "ok" } else { "error" }
                );
                println!("{}", result.display_text());
            }
            Err(e) => {
                hub.shutdown().await;
                return Err(e.into());
            }
        }
    }

    hub.shutdown().await;
    info!("tool-probe exited cleanly");
    Ok(())
}
