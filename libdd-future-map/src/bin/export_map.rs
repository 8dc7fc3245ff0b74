// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::Parser;
use libdd_future_map::export_future_map;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exports the future map of a binary: every async state machine found in
/// its debug info, keyed by type id, paired with its mangled poll symbol.
#[derive(Parser)]
#[command(name = "future-map-export")]
struct Cli {
    /// Binary with debug info to analyze.
    binary: PathBuf,
    /// Output path for the future map JSON.
    output: PathBuf,
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

    match export_future_map(&cli.binary, &cli.output) {
        Ok(count) => {
            println!("[+] exported {count} futures to {}", cli.output.display());
        }
        Err(err) => {
            eprintln!("future-map-export: {err:#}");
            std::process::exit(1);
        }
    }
}
