//! tangible-replay: replay a scene script and print the final store.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: log filter (default: "info")
//! - `TANGIBLE_REPLACE_POLICY`, `TANGIBLE_MAX_CASCADE`,
//!   `TANGIBLE_WRITE_TIMEOUT_MS`: configuration overrides
//!
//! # Usage
//!
//! ```bash
//! tangible-replay scene.yaml
//! tangible-replay scene.yaml --config tangible.yaml --tree
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use tangible::config::RuntimeConfig;
use tangible::script::Script;
use tangible::surface::Surface;

/// Replay a scene script against a fresh surface.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scene script (YAML).
    script: PathBuf,

    /// Runtime configuration (YAML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also print the connectivity tree under every root.
    #[arg(long)]
    tree: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    config.apply_env_overrides()?;

    let script = Script::from_yaml_file(&args.script)
        .with_context(|| format!("Failed to load script {}", args.script.display()))?;
    log::info!(
        "Replaying '{}' ({} events)",
        script.name.as_deref().unwrap_or("unnamed"),
        script.events.len()
    );

    let surface = Surface::new(config);
    surface.model().subscribe_all(|event| log::info!("{}", event));

    let report = surface.replay(&script);
    log::info!(
        "Applied {} events, rejected {}",
        report.applied,
        report.rejected.len()
    );

    let mut output = json!({ "components": surface.model().snapshot() });
    if args.tree {
        let graph = surface.graph().lock();
        let trees = graph
            .roots()
            .into_iter()
            .map(|root| graph.subtree(root))
            .collect::<Result<Vec<_>, _>>()?;
        output["tree"] = serde_json::to_value(trees)?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);

    surface.shutdown();
    Ok(())
}
