// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::Context;
use clap::Parser;
use libdd_future_map::{build_analysis, graphviz, report, tools, type_graph};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Prints the async structure recovered from a binary's debug info, either
/// as a readable report or as the analysis JSON.
#[derive(Parser)]
#[command(name = "future-map-analyze")]
struct Cli {
    /// Binary with debug info to analyze.
    binary: PathBuf,
    /// Emit the analysis JSON instead of the textual report.
    #[arg(long)]
    json: bool,
    /// Also write the dependency graph in DOT format to this path.
    #[arg(long, value_name = "PATH")]
    dot: Option<PathBuf>,
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let dump = tools::dump_dwarf(&cli.binary)
        .with_context(|| format!("dumping debug info of {}", cli.binary.display()))?;
    let index = type_graph::build_index(&dump)?;

    if cli.json {
        let analysis = build_analysis(&index);
        println!(
            "{}",
            serde_json::to_string_pretty(&analysis).context("serializing analysis")?
        );
    } else {
        print!("{}", report::render_analysis(&index));
        print!("{}", report::render_dependency_tree(&index));
    }

    if let Some(dot_path) = &cli.dot {
        std::fs::write(dot_path, graphviz::dot_graph(&index))
            .with_context(|| format!("writing DOT graph to {}", dot_path.display()))?;
        eprintln!("DOT file generated: {}", dot_path.display());
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    if let Err(err) = run(&cli) {
        eprintln!("future-map-analyze: {err:#}");
        std::process::exit(1);
    }
}
