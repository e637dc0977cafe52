// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Demo binary wiring the console multiplexer to the reference collaborator
//! implementations (A2, A4, A5): a [`StaticConfigStore`] seeded from a JSON
//! node-attribute file, a [`StaticCollective`] of this process's own name,
//! a [`PtyConsolePlugin`] backend, and a [`FileLogSink`] (or [`NullLogSink`]
//! when `--no-logging` is passed). There is no real HTTP/websocket surface
//! here — attaching a client is out of scope (§1) — so this binary only
//! proves the registry stays reconciled against the node file until killed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use console_mux::collective::StaticCollective;
use console_mux::config::{NodeAttributes, StaticConfigStore};
use console_mux::event_log::{FileLogSink, LogSink, NullLogSink};
use console_mux::pty::PtyConsolePlugin;
use console_mux::RuntimeConfig;

/// Process configuration for the demo binary (A2).
#[derive(Debug, Parser)]
#[command(name = "console-mux", version, about = "Multi-subscriber console multiplexer demo")]
struct Config {
    /// This process's own identity within the collective.
    #[arg(long, default_value = "local", env = "CONSOLE_MUX_NAME")]
    name: String,

    /// JSON file mapping node name -> attribute map; reloaded only at
    /// startup (§6 config store contract `get_node_attributes`/`list_nodes`).
    #[arg(long, env = "CONSOLE_MUX_NODES")]
    nodes: Option<PathBuf>,

    /// Directory JSONL console logs are appended to. Omit to disable
    /// persistence entirely (`console.logging` still governs on-demand
    /// policy per node regardless).
    #[arg(long, env = "CONSOLE_MUX_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Rough collective size used by the retry backoff formula (§3
    /// invariant 5).
    #[arg(long, default_value_t = 1, env = "CONSOLE_MUX_CLUSTER_SIZE")]
    cluster_size: usize,

    /// Terminal columns for spawned PTY backends.
    #[arg(long, default_value_t = 100, env = "CONSOLE_MUX_COLS")]
    cols: u16,

    /// Terminal rows for spawned PTY backends.
    #[arg(long, default_value_t = 31, env = "CONSOLE_MUX_ROWS")]
    rows: u16,

    /// Log level filter (passed to `tracing_subscriber::EnvFilter`).
    #[arg(long, default_value = "info", env = "CONSOLE_MUX_LOG_LEVEL")]
    log_level: String,
}

fn load_nodes(path: &PathBuf) -> anyhow::Result<HashMap<String, NodeAttributes>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store = StaticConfigStore::new("default");
    if let Some(path) = &config.nodes {
        match load_nodes(path) {
            Ok(nodes) => {
                for (node, attrs) in nodes {
                    store.add_node(node, attrs);
                }
            }
            Err(err) => {
                eprintln!("error: failed to load node attribute file {}: {err:#}", path.display());
                std::process::exit(2);
            }
        }
    }

    let collective = StaticCollective::new(config.name.clone());
    let plugin = PtyConsolePlugin::new(config.cols, config.rows);
    let log_sink: Arc<dyn LogSink> = match &config.log_dir {
        Some(dir) => Arc::new(FileLogSink::new(dir.clone())),
        None => Arc::new(NullLogSink),
    };

    info!(name = %config.name, cluster_size = config.cluster_size, "starting console multiplexer");

    let _registry = console_mux::run(RuntimeConfig {
        config: Arc::new(store),
        collective: Arc::new(collective),
        plugin: Arc::new(plugin),
        log_sink,
        cluster_size: config.cluster_size,
    });

    if tokio::signal::ctrl_c().await.is_err() {
        info!("signal handler failed, exiting");
    }
}
