// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Thin shims over the external dumper and demangler. Each invocation is
//! scoped to the call: the child is spawned, waited on, and its stdout
//! returned; any failure surfaces as a [`ToolError`].

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

pub const DUMPER: &str = "objdump";
pub const DEMANGLER: &str = "rustfilt";

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("{tool} produced non-utf8 output")]
    BadOutput { tool: &'static str },
}

fn finish(tool: &'static str, output: std::process::Output) -> Result<String, ToolError> {
    if !output.status.success() {
        return Err(ToolError::Failed {
            tool,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    String::from_utf8(output.stdout).map_err(|_| ToolError::BadOutput { tool })
}

/// Dumps the textual DIE listing of `binary`'s debug-info section.
pub fn dump_dwarf(binary: &Path) -> Result<String, ToolError> {
    let output = Command::new(DUMPER)
        .arg("--dwarf=info")
        .arg(binary)
        .output()
        .map_err(|source| ToolError::Launch {
            tool: DUMPER,
            source,
        })?;
    finish(DUMPER, output)
}

/// Dumps `binary`'s symbol table listing.
pub fn dump_symbols(binary: &Path) -> Result<String, ToolError> {
    let output = Command::new(DUMPER)
        .arg("-t")
        .arg(binary)
        .output()
        .map_err(|source| ToolError::Launch {
            tool: DUMPER,
            source,
        })?;
    finish(DUMPER, output)
}

/// Pipes `input` through the external demangler. The demangler preserves
/// line count, which the symbol table loader relies on.
pub fn demangle(input: &str) -> Result<String, ToolError> {
    let mut child = Command::new(DEMANGLER)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ToolError::Launch {
            tool: DEMANGLER,
            source,
        })?;
    // The demangler is a streaming filter: stdin must be fed while stdout is
    // drained, or both pipes fill and the processes deadlock on listings
    // larger than the pipe buffer.
    let writer = child.stdin.take().map(|mut stdin| {
        let input = input.to_string();
        std::thread::spawn(move || match stdin.write_all(input.as_bytes()) {
            // The child may exit without consuming all of its input.
            Err(err) if err.kind() != std::io::ErrorKind::BrokenPipe => Err(err),
            _ => Ok(()),
        })
    });
    let output = child.wait_with_output().map_err(|source| ToolError::Launch {
        tool: DEMANGLER,
        source,
    })?;
    if let Some(handle) = writer {
        if let Ok(Err(source)) = handle.join() {
            return Err(ToolError::Launch {
                tool: DEMANGLER,
                source,
            });
        }
    }
    finish(DEMANGLER, output)
}
