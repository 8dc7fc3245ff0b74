// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracers read data out of the stopped inferior at instrumentation points.
//! Plugins configure them as specs; the sequencer runs each spec per
//! invocation and stores the resulting datum.

use crate::host::DebugHost;
use serde::Serialize;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    /// Locals and arguments of the stopped frame.
    Local,
    /// Process-wide statics.
    Static,
}

/// Configuration of one tracer, instantiated per invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TracerSpec {
    Variable {
        expression: String,
        scope: VariableScope,
    },
    Backtrace,
    RawMemory {
        expression: String,
        len: u64,
    },
}

impl TracerSpec {
    pub fn local(expression: impl Into<String>) -> Self {
        TracerSpec::Variable {
            expression: expression.into(),
            scope: VariableScope::Local,
        }
    }

    pub fn statik(expression: impl Into<String>) -> Self {
        TracerSpec::Variable {
            expression: expression.into(),
            scope: VariableScope::Static,
        }
    }

    /// Stable label used to key the datum in the invocation store.
    pub fn label(&self) -> String {
        match self {
            TracerSpec::Variable { expression, .. } => format!("VariableTracer({expression})"),
            TracerSpec::Backtrace => "BacktraceTracer".to_string(),
            TracerSpec::RawMemory { expression, .. } => format!("RawMemoryTracer({expression})"),
        }
    }

    /// Runs the tracer against the stopped inferior. Failures never
    /// propagate; they are captured as an `Error: …` datum.
    pub fn run(&self, host: &mut dyn DebugHost) -> TracerDatum {
        let result = match self {
            TracerSpec::Variable { expression, .. } => read_variable(host, expression),
            TracerSpec::Backtrace => read_backtrace(host),
            TracerSpec::RawMemory { expression, len } => read_raw_memory(host, expression, *len),
        };
        match result {
            Ok(datum) => datum,
            Err(err) => {
                warn!(tracer = %self.label(), %err, "tracer failed");
                TracerDatum::Error(format!("Error: {err}"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub pc: u64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TracerDatum {
    /// Little-endian word read straight out of inferior memory.
    Word(u64),
    /// Value obtained through the evaluating fallback.
    Int(i64),
    Frames(Vec<FrameRecord>),
    /// Raw memory slice, hex encoded.
    Bytes(String),
    Text(String),
    Error(String),
}

impl fmt::Display for TracerDatum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracerDatum::Word(value) => write!(f, "{value}"),
            TracerDatum::Int(value) => write!(f, "{value}"),
            TracerDatum::Frames(frames) => {
                let rendered = serde_json::to_string(frames).unwrap_or_default();
                write!(f, "{rendered}")
            }
            TracerDatum::Bytes(hex) => write!(f, "{hex}"),
            TracerDatum::Text(text) | TracerDatum::Error(text) => write!(f, "{text}"),
        }
    }
}

/// Hybrid variable read: a non-intrusive memory read first, the evaluating
/// read as a fallback for register-resident values.
fn read_variable(host: &mut dyn DebugHost, expression: &str) -> anyhow::Result<TracerDatum> {
    let value = host.evaluate(expression)?;
    if let Some(address) = value.address {
        match value.byte_size {
            size @ (1 | 2 | 4 | 8) => {
                if let Ok(bytes) = host.read_memory(address, size) {
                    if bytes.len() == size as usize {
                        let mut word = [0u8; 8];
                        word[..bytes.len()].copy_from_slice(&bytes);
                        return Ok(TracerDatum::Word(u64::from_le_bytes(word)));
                    }
                }
                // Memory not readable; fall through to the evaluating read.
            }
            other => return Ok(TracerDatum::Text(format!("Unsupported size: {other}"))),
        }
    }
    Ok(TracerDatum::Int(host.evaluate_int(expression)?))
}

/// Records `{pc, name}` for every frame of the current thread, newest to
/// oldest.
fn read_backtrace(host: &mut dyn DebugHost) -> anyhow::Result<TracerDatum> {
    let mut frames = Vec::new();
    let mut current = Some(host.newest_frame()?);
    while let Some(frame) = current {
        let info = host.frame_info(frame)?;
        frames.push(FrameRecord {
            pc: info.pc,
            name: info.name,
        });
        current = host.older_frame(frame)?;
    }
    Ok(TracerDatum::Frames(frames))
}

fn read_raw_memory(host: &mut dyn DebugHost, expression: &str, len: u64) -> anyhow::Result<TracerDatum> {
    let value = host.evaluate(expression)?;
    let address = value
        .address
        .ok_or_else(|| anyhow::anyhow!("expression {expression} has no address"))?;
    let bytes = host.read_memory(address, len)?;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    Ok(TracerDatum::Bytes(hex))
}
